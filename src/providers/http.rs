//! Outbound HTTP for URL-based providers

use once_cell::sync::Lazy;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};

use crate::core::{config::ClientConfig, image::Image};
use crate::prelude::Duration;
use crate::{Error, Result};

/// Shared async HTTP client; per-request settings come from [`ClientConfig`]
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(16)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Fetches `url` and validates the response against the client allow-lists
pub async fn fetch(client: &ClientConfig, url: &str) -> Result<Image> {
    let mut request = HTTP_CLIENT
        .get(url)
        .timeout(client.timeout())
        .header(USER_AGENT, &client.user_agent);
    for (name, value) in &client.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await?;

    let status = response.status().as_u16();
    if !client.accepts_status(status) {
        log::debug!("{} returned status {}", url, status);
        return Err(Error::RemoteServer(status));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !client.accepts_content_type(&content_type) {
        return Err(Error::InvalidContentType(content_type));
    }

    if let Some(length) = response.content_length() {
        if length > client.max_length {
            return Err(Error::InvalidContentLength(length));
        }
    }

    let body = response.bytes().await?;
    if body.len() as u64 > client.max_length {
        return Err(Error::InvalidContentLength(body.len() as u64));
    }

    Ok(Image::new(body.to_vec(), content_type))
}
