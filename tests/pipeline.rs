//! End-to-end rendering through configured layer groups

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use tilegate::imaging;
use tilegate::providers::{blend::BlendProvider, static_image::StaticProvider};
use tilegate::prelude::*;

fn config(value: Value) -> Config {
    serde_json::from_value(value).unwrap()
}

fn group(value: Value, providers: &ProviderRegistry) -> Arc<LayerGroup> {
    LayerGroup::from_config(&config(value), providers, &CacheRegistry::default()).unwrap()
}

async fn render(group: &LayerGroup, layer: &str, z: u32, x: u32, y: u32) -> Result<Image> {
    group
        .render_tile(&RequestContext::default(), &TileRequest::new(layer, z, x, y))
        .await
}

async fn pixel(group: &LayerGroup, layer: &str, z: u32, x: u32, y: u32) -> [u8; 4] {
    let image = render(group, layer, z, x, y).await.unwrap();
    imaging::decode(&image).unwrap().get_pixel(3, 3).0
}

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const YELLOW: [u8; 4] = [255, 255, 0, 255];

/// Counts calls and answers with fixed bytes, or fails
#[derive(Default)]
struct Counter {
    calls: AtomicUsize,
    fail: bool,
}

impl Counter {
    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CustomScript for Counter {
    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        _provider_context: &ProviderContext,
        request: &TileRequest,
        _params: &Value,
    ) -> anyhow::Result<Option<Image>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("upstream down");
        }
        let style = ctx.layer_binding("style").unwrap_or_default();
        Ok(Some(Image::new(format!("{style}:{request}").into_bytes(), "text/plain")))
    }
}

#[tokio::test]
async fn fallback_zoom_gating() {
    let group = group(
        json!({"layers": [{
            "id": "fb",
            "provider": {
                "name": "fallback",
                "zoom": "1-5",
                "primary": {"name": "static", "color": "F00"},
                "secondary": {"name": "static", "color": "0F0"}
            }
        }]}),
        &ProviderRegistry::default(),
    );

    assert_eq!(pixel(&group, "fb", 2, 1, 1).await, RED);
    assert_eq!(pixel(&group, "fb", 9, 1, 1).await, GREEN);
}

async fn secondary_calls(cache_mode: &str, primary: Arc<Counter>, z: u32) -> (usize, usize) {
    let secondary = Arc::new(Counter::default());
    let mut providers = ProviderRegistry::default();
    providers.register_script("primary", primary.clone());
    providers.register_script("secondary", secondary.clone());

    let group = group(
        json!({
            "cache": {"name": "memory"},
            "layers": [{
                "id": "fb",
                "provider": {
                    "name": "fallback",
                    "zoom": "0-5",
                    "cacheMode": cache_mode,
                    "primary": {"name": "custom", "script": "primary"},
                    "secondary": {"name": "custom", "script": "secondary"}
                }
            }]
        }),
        &providers,
    );

    for _ in 0..2 {
        render(&group, "fb", z, 0, 0).await.unwrap();
    }
    (primary.calls(), secondary.calls())
}

#[tokio::test]
async fn fallback_cache_matrix() {
    // Primary failing: unless-error keeps the fallback out of the cache
    let (_, secondary) = secondary_calls("unless-error", Counter::failing(), 2).await;
    assert_eq!(secondary, 2);

    // Primary failing: always caches the fallback
    let (_, secondary) = secondary_calls("always", Counter::failing(), 2).await;
    assert_eq!(secondary, 1);

    // No fallback: unless-fallback caches the primary
    let (primary, secondary) = secondary_calls("unless-fallback", Arc::new(Counter::default()), 2).await;
    assert_eq!((primary, secondary), (1, 0));

    // Out of zoom range: unless-fallback skips the save
    let (primary, secondary) = secondary_calls("unless-fallback", Arc::new(Counter::default()), 8).await;
    assert_eq!((primary, secondary), (0, 2));
}

#[tokio::test]
async fn blend_add_is_yellow() {
    let group = group(
        json!({"layers": [{
            "id": "mix",
            "provider": {
                "name": "blend",
                "mode": "add",
                "providers": [
                    {"name": "static", "color": "F00"},
                    {"name": "static", "color": "0F0"}
                ]
            }
        }]}),
        &ProviderRegistry::default(),
    );

    let image = render(&group, "mix", 3, 2, 2).await.unwrap();
    assert_eq!(image.content_type, "image/png");
    let decoded = imaging::decode(&image).unwrap();
    assert!(decoded.pixels().all(|p| p.0 == YELLOW));
}

#[tokio::test]
async fn blend_over_referenced_layers() {
    let group = group(
        json!({"layers": [
            {"id": "mix", "provider": {
                "name": "blend",
                "mode": "add",
                "layer": "color_{c}",
                "values": [{"c": "red"}, {"c": "green"}]
            }},
            {"id": "color_red", "provider": {"name": "static", "color": "F00"}},
            {"id": "color_green", "provider": {"name": "static", "color": "0F0"}}
        ]}),
        &ProviderRegistry::default(),
    );

    assert_eq!(pixel(&group, "mix", 1, 0, 1).await, YELLOW);
}

#[tokio::test]
async fn ref_renders_target_layer() {
    let group = group(
        json!({"layers": [
            {"id": "alias", "provider": {"name": "ref", "layer": "base"}},
            {"id": "base", "provider": {"name": "static", "color": "F00"}}
        ]}),
        &ProviderRegistry::default(),
    );

    assert_eq!(pixel(&group, "alias", 4, 3, 3).await, RED);
}

/// Rejects its first generate call as an auth failure
#[derive(Default)]
struct Flaky {
    pre_auths: AtomicUsize,
    generates: AtomicUsize,
    rejected_once: AtomicBool,
    always_reject: bool,
}

#[async_trait]
impl Provider for Flaky {
    async fn pre_auth(&self, _ctx: &RequestContext, _pc: ProviderContext) -> Result<ProviderContext> {
        let n = self.pre_auths.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderContext::authenticated(
            format!("token-{n}"),
            SystemTime::now() + Duration::from_secs(3600),
        ))
    }

    async fn generate_tile(
        &self,
        _ctx: &RequestContext,
        pc: &ProviderContext,
        _request: &TileRequest,
    ) -> Result<Image> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        if self.always_reject || !self.rejected_once.swap(true, Ordering::SeqCst) {
            return Err(TileError::ProviderAuth(format!("{} expired", pc.auth_token)));
        }
        Ok(Image::new(pc.auth_token.clone().into_bytes(), "text/plain"))
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

#[tokio::test]
async fn auth_retry_once() {
    let provider = Arc::new(Flaky::default());
    let layer = Layer::new("auth", provider.clone(), Arc::new(NoopCache)).unwrap();

    let image = layer
        .render_tile(&RequestContext::default(), &TileRequest::new("auth", 0, 0, 0))
        .await
        .unwrap();

    assert_eq!(image.bytes(), b"token-1");
    assert_eq!(provider.generates.load(Ordering::SeqCst), 2);
    assert_eq!(provider.pre_auths.load(Ordering::SeqCst), 2);

    // Still valid: no further pre-auth
    layer
        .render_tile(&RequestContext::default(), &TileRequest::new("auth", 0, 0, 0))
        .await
        .unwrap();
    assert_eq!(provider.pre_auths.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn auth_failure_after_retry_is_surfaced() {
    let provider = Arc::new(Flaky {
        always_reject: true,
        ..Flaky::default()
    });
    let layer = Layer::new("auth", provider.clone(), Arc::new(NoopCache)).unwrap();

    let err = layer
        .render_tile(&RequestContext::default(), &TileRequest::new("auth", 0, 0, 0))
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::ProviderAuth);
    assert_eq!(provider.generates.load(Ordering::SeqCst), 2);
    assert_eq!(provider.pre_auths.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn blend_children_keep_their_own_auth() {
    let authed = Arc::new(Flaky::default());
    let children: Vec<Arc<dyn Provider>> = vec![
        authed.clone(),
        Arc::new(StaticProvider::from_color("0F0").unwrap()),
    ];
    let blend = BlendProvider::new(children, imaging::BlendMode::Add).unwrap();

    let ctx = RequestContext::default();
    let pc = blend.pre_auth(&ctx, ProviderContext::default()).await.unwrap();
    assert!(!pc.auth_bypass);
    assert_eq!(pc.children[&0].auth_token, "token-0");
    assert!(pc.children[&1].auth_bypass);
    assert!(!pc.needs_auth(SystemTime::now()));
}

#[tokio::test]
async fn routing_first_match_and_bindings() {
    let counter = Arc::new(Counter::default());
    let mut providers = ProviderRegistry::default();
    providers.register_script("echo", counter.clone());

    let group = group(
        json!({"layers": [
            {
                "id": "roads",
                "pattern": "roads_{style}",
                "paramValidator": {"style": "[a-z]+"},
                "provider": {"name": "custom", "script": "echo"}
            },
            {
                "id": "roads_any",
                "pattern": "roads_{anything}",
                "provider": {"name": "static", "color": "00F"}
            }
        ]}),
        &providers,
    );

    let (layer, bindings) = group.find_layer("roads_dark").unwrap();
    assert_eq!(layer.id(), "roads");
    assert_eq!(bindings.get("style").map(String::as_str), Some("dark"));

    let image = render(&group, "roads_dark", 1, 1, 0).await.unwrap();
    assert_eq!(image.bytes(), b"dark:roads_dark/1/1/0");

    // Fails validation on the first layer, falls through to the second
    assert_eq!(group.find_layer("roads_42").unwrap().0.id(), "roads_any");

    let err = render(&group, "rail", 0, 0, 0).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Answers with the value bound to `{c}` after letting siblings run
struct BindingEcho;

#[async_trait]
impl CustomScript for BindingEcho {
    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        _provider_context: &ProviderContext,
        _request: &TileRequest,
        _params: &Value,
    ) -> anyhow::Result<Option<Image>> {
        tokio::task::yield_now().await;
        let value = ctx.layer_binding("c").unwrap_or_default();
        Ok(Some(Image::new(value.into_bytes(), "application/x-protobuf")))
    }
}

fn binding_group(layers: Value) -> Arc<LayerGroup> {
    let mut providers = ProviderRegistry::default();
    providers.register_script("echo", Arc::new(BindingEcho));
    group(json!({ "layers": layers }), &providers)
}

#[tokio::test]
async fn concurrent_refs_keep_their_bindings() {
    let group = binding_group(json!([
        {"id": "both", "provider": {"name": "composite", "providers": [
            {"name": "ref", "layer": "w_a"},
            {"name": "ref", "layer": "w_b"}
        ]}},
        {"id": "w", "pattern": "w_{c}", "provider": {"name": "custom", "script": "echo"}}
    ]));

    let image = render(&group, "both", 0, 0, 0).await.unwrap();
    assert_eq!(image.bytes(), b"ab");
}

#[tokio::test]
async fn ref_leaves_outer_bindings_intact() {
    let group = binding_group(json!([
        {"id": "o", "pattern": "o_{c}", "provider": {"name": "composite", "providers": [
            {"name": "ref", "layer": "w_inner"},
            {"name": "custom", "script": "echo"}
        ]}},
        {"id": "w", "pattern": "w_{c}", "provider": {"name": "custom", "script": "echo"}}
    ]));

    let image = render(&group, "o_outer", 0, 0, 0).await.unwrap();
    assert_eq!(image.bytes(), b"innerouter");
}

#[tokio::test]
async fn permissions_are_enforced_before_cache() {
    let group = group(
        json!({
            "cache": {"name": "memory"},
            "layers": [
                {"id": "public", "provider": {"name": "static", "color": "F00"}},
                {"id": "secret", "provider": {"name": "static", "color": "0F0"}}
            ]
        }),
        &ProviderRegistry::default(),
    );

    let request = TileRequest::new("secret", 2, 1, 1);
    let open = RequestContext::default();
    group.render_tile(&open, &request).await.unwrap();

    // Cached now, but still not visible to a restricted request
    let restricted = RequestContext::default().with_allowed_layers(["public"]);
    let err = group.render_tile(&restricted, &request).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let fenced = RequestContext::default().with_allowed_area(Bounds::new(10.0, 20.0, 10.0, 20.0));
    let err = group
        .render_tile(&fenced, &TileRequest::new("public", 2, 1, 1))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(group.render_tile(&fenced, &TileRequest::new("public", 0, 0, 0)).await.is_err());
    assert!(group.render_tile(&fenced, &TileRequest::new("public", 10, 541, 480)).await.is_ok());
}

#[tokio::test]
async fn transform_uses_registered_function() {
    let mut providers = ProviderRegistry::default();
    providers.register_pixel_function("invert", Arc::new(|r, g, b, a| (255 - r, 255 - g, 255 - b, a)));

    let group = group(
        json!({"layers": [{
            "id": "inv",
            "provider": {
                "name": "transform",
                "function": "invert",
                "threads": 4,
                "provider": {"name": "static", "color": "F00"}
            }
        }]}),
        &providers,
    );

    assert_eq!(pixel(&group, "inv", 0, 0, 0).await, [0, 255, 255, 255]);

    let missing = LayerGroup::from_config(
        &config(json!({"layers": [{
            "id": "inv",
            "provider": {"name": "transform", "function": "nope", "provider": {"name": "static", "color": "F00"}}
        }]})),
        &providers,
        &CacheRegistry::default(),
    );
    assert!(missing.err().unwrap().to_string().contains("invert"));
}

#[tokio::test]
async fn multi_tier_cache_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(Counter::default());
    let mut providers = ProviderRegistry::default();
    providers.register_script("count", counter.clone());

    let group = group(
        json!({
            "cache": {"name": "multi", "tiers": [
                {"name": "memory", "maxSize": 16},
                {"name": "disk", "path": dir.path()}
            ]},
            "layers": [{"id": "tiles", "provider": {"name": "custom", "script": "count"}}]
        }),
        &providers,
    );

    render(&group, "tiles", 3, 1, 2).await.unwrap();
    render(&group, "tiles", 3, 1, 2).await.unwrap();

    assert_eq!(counter.calls(), 1);
    assert!(dir.path().join("tiles/3/1/2").exists());
}

#[tokio::test]
async fn configuration_errors_are_collected() {
    let result = LayerGroup::from_config(
        &config(json!({"layers": [
            {"id": "a", "provider": {"name": "nope"}},
            {"id": "b", "provider": {"name": "static", "color": "F00"}},
            {"id": "b", "provider": {"name": "static", "color": "F00"}},
            {"id": "c", "provider": {"name": "effect", "mode": "invert", "intensity": 2,
                "provider": {"name": "static", "color": "F00"}}}
        ]})),
        &ProviderRegistry::default(),
        &CacheRegistry::default(),
    );

    match result.err().unwrap() {
        TileError::Joined(errors) => assert_eq!(errors.len(), 3),
        other => panic!("expected joined error, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_effect_radius_is_rejected() {
    let result = LayerGroup::from_config(
        &config(json!({"layers": [{
            "id": "fx",
            "provider": {"name": "effect", "mode": "blur", "intensity": 1e12,
                "provider": {"name": "static", "color": "F00"}}
        }]})),
        &ProviderRegistry::default(),
        &CacheRegistry::default(),
    );
    assert_eq!(result.err().unwrap().kind(), ErrorKind::Config);
}
