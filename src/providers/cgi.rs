use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::registry::{decode_config, BuildContext};
use super::template::{self, TemplateOptions};
use crate::core::{
    config::ClientConfig,
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::prelude::{Arc, HashMap};
use crate::traits::Provider;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CgiConfig {
    #[serde(default)]
    exec: PathBuf,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    #[serde(default)]
    invalid_as_error: bool,
}

/// Produces tiles by running a CGI/1.1 program, such as a map server binary
pub struct CgiProvider {
    exec: PathBuf,
    args: Vec<String>,
    uri: String,
    domain: String,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    invalid_as_error: bool,
    client: ClientConfig,
}

/// Status, content type and body of a CGI response
#[derive(Debug, PartialEq)]
struct CgiResponse {
    status: u16,
    content_type: String,
    body: Vec<u8>,
}

/// Splits CGI output into headers and body.
///
/// Without a `Status` header the status is 200. Output with no header block
/// at all is treated as a bare body.
fn parse_response(output: &[u8]) -> CgiResponse {
    let separator = [&b"\r\n\r\n"[..], &b"\n\n"[..]]
        .iter()
        .filter_map(|sep| find(output, sep).map(|at| (at, sep.len())))
        .min_by_key(|(at, _)| *at);

    let (head, body) = match separator {
        Some((at, len)) => (&output[..at], &output[at + len..]),
        None => (&output[..0], output),
    };

    let mut response = CgiResponse {
        status: 200,
        content_type: String::new(),
        body: body.to_vec(),
    };

    for line in String::from_utf8_lossy(head).lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("status") {
            response.status = value
                .split_whitespace()
                .next()
                .and_then(|code| code.parse().ok())
                .unwrap_or(500);
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            response.content_type = value.to_string();
        }
    }
    response
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

impl CgiProvider {
    fn environment(&self, ctx: &RequestContext, uri: &str) -> Vec<(String, String)> {
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        let server_name = if self.domain.is_empty() {
            "localhost"
        } else {
            self.domain.as_str()
        };

        let mut env: Vec<(String, String)> = [
            ("GATEWAY_INTERFACE", "CGI/1.1"),
            ("SERVER_SOFTWARE", self.client.user_agent.as_str()),
            ("SERVER_PROTOCOL", "HTTP/1.1"),
            ("SERVER_NAME", server_name),
            ("REQUEST_METHOD", "GET"),
            ("SCRIPT_NAME", ""),
            ("PATH_INFO", path),
            ("QUERY_STRING", query),
            ("REQUEST_URI", uri),
            ("REMOTE_ADDR", ctx.info.ip.as_str()),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        for (name, value) in &ctx.info.headers {
            let name = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
            env.push((name, value.clone()));
        }
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: CgiConfig = decode_config(raw)?;
    if config.exec.as_os_str().is_empty() {
        return Err(cx.required("exec"));
    }
    if !config.exec.is_file() {
        return Err(cx.invalid("exec", config.exec.display()));
    }
    if config.uri.is_empty() {
        return Err(cx.required("uri"));
    }

    Ok(Arc::new(CgiProvider {
        exec: config.exec,
        args: config.args,
        uri: config.uri,
        domain: config.domain,
        env: config.env,
        working_dir: config.working_dir,
        invalid_as_error: config.invalid_as_error,
        client: cx.client.clone(),
    }))
}

#[async_trait]
impl Provider for CgiProvider {
    async fn pre_auth(
        &self,
        _ctx: &RequestContext,
        _provider_context: ProviderContext,
    ) -> Result<ProviderContext> {
        Ok(ProviderContext::bypass())
    }

    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        _provider_context: &ProviderContext,
        request: &TileRequest,
    ) -> Result<Image> {
        let uri = template::expand(&self.uri, request, ctx, TemplateOptions::default())?;

        let mut command = Command::new(&self.exec);
        command
            .args(&self.args)
            .envs(self.environment(ctx, &uri))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command.output().await?;
        if !output.stderr.is_empty() {
            log::debug!("{} stderr: {}", self.exec.display(), String::from_utf8_lossy(&output.stderr).trim());
        }
        if !output.status.success() {
            return Err(Error::Provider(format!(
                "{} exited with {}",
                self.exec.display(),
                output.status
            )));
        }

        let response = parse_response(&output.stdout);
        let valid_status = self.client.accepts_status(response.status);
        let valid_type = self.client.accepts_content_type(&response.content_type);

        if valid_status && valid_type {
            return Ok(Image::new(response.body, response.content_type));
        }
        if self.invalid_as_error {
            return Err(if valid_status {
                Error::InvalidContentType(response.content_type)
            } else {
                Error::RemoteServer(response.status)
            });
        }

        log::warn!(
            "{} answered {} with status {} ({}); passing through uncached",
            self.exec.display(),
            uri,
            response.status,
            response.content_type
        );
        Ok(Image::new(response.body, response.content_type).with_force_skip_cache(true))
    }

    fn name(&self) -> &str {
        "cgi"
    }
}
