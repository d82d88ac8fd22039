//! Per-resource-class caching strategies and the ordered routing table.
//!
//! Every request the application makes passes through [`StrategyEngine`],
//! which classifies it against [`ROUTES`] (first match wins) and applies the
//! matching strategy. Cache-store failures never fail the response path;
//! they are logged and the response is returned anyway.

use chrono::Duration;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::net::cache::{CachedResponse, ResponseCache};

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
  /// An HTML page load.
  Navigation,
  /// Any subresource fetch.
  Resource,
}

/// An outgoing resource request.
#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub kind: RequestKind,
}

impl Request {
  pub fn resource(url: Url) -> Self {
    Self {
      url,
      kind: RequestKind::Resource,
    }
  }

  pub fn navigation(url: Url) -> Self {
    Self {
      url,
      kind: RequestKind::Navigation,
    }
  }

  fn extension(&self) -> Option<String> {
    let path = self.url.path();
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
  }
}

/// The network seam. Implementations return `Ok` for any HTTP response
/// (whatever the status) and `Err` only for transport failures.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<CachedResponse>>;
}

/// Real fetcher over reqwest.
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(client: reqwest::Client) -> Self {
    Self { client }
  }
}

impl Fetcher for HttpFetcher {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<CachedResponse>> {
    let client = self.client.clone();
    let url = request.url.clone();
    async move {
      let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::network(e.to_string()))?;
      let status = response.status().as_u16();
      let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
      let body = response
        .bytes()
        .await
        .map_err(|e| Error::network(e.to_string()))?
        .to_vec();
      Ok(CachedResponse {
        url: url.to_string(),
        status,
        content_type,
        body,
      })
    }
    .boxed()
  }
}

// ============================================================================
// Routing table
// ============================================================================

/// Resource classes, one per caching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// App shell asset enumerated at install. Cache-first.
  Shell,
  /// Remote API call. Network-first with cache fallback.
  Api,
  /// Image. Cache-first with bounded retention.
  Image,
  /// Page load. Network-first with offline fallback.
  Navigation,
  /// Other static resource. Stale-while-revalidate.
  StaticAsset,
  /// Everything else goes straight to the network.
  Passthrough,
}

/// Static request facts the predicates match against.
#[derive(Debug, Clone)]
pub struct RouteContext {
  /// Base URL of the remote story service.
  pub api_base: Url,
  /// Full URLs of the app shell assets.
  pub shell_urls: Vec<String>,
  /// URL of the cached page served when a navigation fails offline.
  pub offline_page: String,
}

/// One routing rule: the first route whose predicate matches decides the
/// strategy.
pub struct Route {
  pub class: RequestClass,
  pub matches: fn(&Request, &RouteContext) -> bool,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico"];
const STATIC_EXTENSIONS: &[&str] = &["js", "css", "woff", "woff2", "map", "webmanifest"];

/// Canonical strategy ordering. Evaluated top to bottom, first match wins.
pub const ROUTES: &[Route] = &[
  Route {
    class: RequestClass::Shell,
    matches: |req, ctx| ctx.shell_urls.iter().any(|u| u == req.url.as_str()),
  },
  Route {
    class: RequestClass::Api,
    matches: |req, ctx| {
      req.url.origin() == ctx.api_base.origin()
        && req.url.path().starts_with(ctx.api_base.path())
    },
  },
  Route {
    class: RequestClass::Image,
    matches: |req, _| {
      req
        .extension()
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
    },
  },
  Route {
    class: RequestClass::Navigation,
    matches: |req, _| req.kind == RequestKind::Navigation,
  },
  Route {
    class: RequestClass::StaticAsset,
    matches: |req, _| {
      req
        .extension()
        .is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext.as_str()))
    },
  },
];

/// Classify a request against [`ROUTES`].
pub fn classify(request: &Request, ctx: &RouteContext) -> RequestClass {
  ROUTES
    .iter()
    .find(|route| (route.matches)(request, ctx))
    .map(|route| route.class)
    .unwrap_or(RequestClass::Passthrough)
}

// ============================================================================
// Cache namespaces
// ============================================================================

/// Versioned cache namespace names. Bumping the version retires every
/// namespace of the previous build on activation.
#[derive(Debug, Clone)]
pub struct CacheNames {
  pub shell: String,
  pub dynamic: String,
  pub api: String,
  pub images: String,
}

impl CacheNames {
  pub fn versioned(version: &str) -> Self {
    Self {
      shell: format!("shell-{version}"),
      dynamic: format!("dynamic-{version}"),
      api: format!("api-{version}"),
      images: format!("images-{version}"),
    }
  }

  /// Namespaces the current version is allowed to keep.
  pub fn allow_list(&self) -> Vec<String> {
    vec![
      self.shell.clone(),
      self.dynamic.clone(),
      self.api.clone(),
      self.images.clone(),
    ]
  }
}

impl Default for CacheNames {
  fn default() -> Self {
    Self::versioned("v1")
  }
}

/// Retention bounds for the images namespace.
#[derive(Debug, Clone, Copy)]
pub struct ImageCacheLimits {
  pub max_entries: usize,
  pub max_age: Duration,
}

impl Default for ImageCacheLimits {
  fn default() -> Self {
    Self {
      max_entries: 100,
      max_age: Duration::days(30),
    }
  }
}

// ============================================================================
// Strategy engine
// ============================================================================

fn is_success(response: &CachedResponse) -> bool {
  (200..300).contains(&response.status)
}

/// Applies the per-class strategy for each intercepted request.
pub struct StrategyEngine<F: Fetcher> {
  cache: Arc<ResponseCache>,
  fetcher: Arc<F>,
  names: CacheNames,
  ctx: RouteContext,
  image_limits: ImageCacheLimits,
}

impl<F: Fetcher> StrategyEngine<F> {
  pub fn new(
    cache: Arc<ResponseCache>,
    fetcher: Arc<F>,
    names: CacheNames,
    ctx: RouteContext,
    image_limits: ImageCacheLimits,
  ) -> Self {
    Self {
      cache,
      fetcher,
      names,
      ctx,
      image_limits,
    }
  }

  pub fn names(&self) -> &CacheNames {
    &self.names
  }

  /// Fetch bypassing the routing table. Install-time pre-caching uses this
  /// so a stale same-version copy never masks the network.
  pub async fn fetch_fresh(&self, request: &Request) -> Result<CachedResponse> {
    self.fetcher.fetch(request).await
  }

  /// Route a request to its strategy and produce a response.
  pub async fn handle(&self, request: &Request) -> Result<CachedResponse> {
    match classify(request, &self.ctx) {
      RequestClass::Shell => self.cache_first(&self.names.shell, request).await,
      RequestClass::Api => self.network_first_api(request).await,
      RequestClass::Image => self.cache_first_bounded(request).await,
      RequestClass::Navigation => self.network_first_navigation(request).await,
      RequestClass::StaticAsset => self.stale_while_revalidate(request).await,
      RequestClass::Passthrough => self.fetcher.fetch(request).await,
    }
  }

  /// Serve from cache if present, else fetch and store.
  async fn cache_first(&self, namespace: &str, request: &Request) -> Result<CachedResponse> {
    if let Some(cached) = self.lookup(namespace, request.url.as_str()) {
      return Ok(cached);
    }
    let fresh = self.fetcher.fetch(request).await?;
    self.store(namespace, &fresh);
    Ok(fresh)
  }

  /// Attempt network first; on success store a copy keyed by full URL; on
  /// network failure fall back to the most recent cached response.
  async fn network_first_api(&self, request: &Request) -> Result<CachedResponse> {
    match self.fetcher.fetch(request).await {
      Ok(fresh) => {
        self.store(&self.names.api, &fresh);
        Ok(fresh)
      }
      Err(err) => match self.lookup(&self.names.api, request.url.as_str()) {
        Some(cached) => Ok(cached),
        None => Err(err),
      },
    }
  }

  /// Cache-first with bounded retention for the images namespace.
  async fn cache_first_bounded(&self, request: &Request) -> Result<CachedResponse> {
    if let Some(cached) = self.lookup(&self.names.images, request.url.as_str()) {
      return Ok(cached);
    }
    let fresh = self.fetcher.fetch(request).await?;
    self.store(&self.names.images, &fresh);
    if let Err(err) = self.cache.trim(
      &self.names.images,
      self.image_limits.max_entries,
      self.image_limits.max_age,
    ) {
      warn!("image cache trim failed: {err}");
    }
    Ok(fresh)
  }

  /// Network-first for page loads, masked by the cached offline page when
  /// the network is down.
  async fn network_first_navigation(&self, request: &Request) -> Result<CachedResponse> {
    match self.fetcher.fetch(request).await {
      Ok(fresh) => Ok(fresh),
      Err(err) => match self.lookup(&self.names.shell, &self.ctx.offline_page) {
        Some(fallback) => Ok(fallback),
        None => Err(err),
      },
    }
  }

  /// Serve a cached copy immediately while refreshing it in the background;
  /// with no cached copy, wait for the network.
  async fn stale_while_revalidate(&self, request: &Request) -> Result<CachedResponse> {
    if let Some(cached) = self.lookup(&self.names.dynamic, request.url.as_str()) {
      let cache = Arc::clone(&self.cache);
      let fetcher = Arc::clone(&self.fetcher);
      let namespace = self.names.dynamic.clone();
      let request = request.clone();
      tokio::spawn(async move {
        match fetcher.fetch(&request).await {
          Ok(fresh) if is_success(&fresh) => {
            if let Err(err) = cache.put(&namespace, &fresh) {
              warn!("revalidation store failed for {}: {err}", fresh.url);
            }
          }
          Ok(_) => {}
          Err(err) => warn!("revalidation fetch failed for {}: {err}", request.url),
        }
      });
      return Ok(cached);
    }

    let fresh = self.fetcher.fetch(request).await?;
    self.store(&self.names.dynamic, &fresh);
    Ok(fresh)
  }

  fn lookup(&self, namespace: &str, url: &str) -> Option<CachedResponse> {
    match self.cache.get(namespace, url) {
      Ok(hit) => hit,
      Err(err) => {
        warn!("cache read failed for {url}: {err}");
        None
      }
    }
  }

  /// Fire-and-forget relative to the response path: a failed store is
  /// logged, never surfaced.
  fn store(&self, namespace: &str, response: &CachedResponse) {
    if !is_success(response) {
      return;
    }
    if let Err(err) = self.cache.put(namespace, response) {
      warn!("cache store failed for {}: {err}", response.url);
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// Scripted fetcher: serves canned responses and counts network attempts.
  pub(crate) struct MockFetcher {
    responses: Mutex<HashMap<String, CachedResponse>>,
    pub calls: AtomicUsize,
    pub offline: std::sync::atomic::AtomicBool,
  }

  impl MockFetcher {
    pub fn new() -> Self {
      Self {
        responses: Mutex::new(HashMap::new()),
        calls: AtomicUsize::new(0),
        offline: std::sync::atomic::AtomicBool::new(false),
      }
    }

    pub fn serve(&self, url: &str, body: &str) {
      self.responses.lock().unwrap().insert(
        url.to_string(),
        CachedResponse {
          url: url.to_string(),
          status: 200,
          content_type: Some("text/plain".to_string()),
          body: body.as_bytes().to_vec(),
        },
      );
    }

    pub fn call_count(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  impl Fetcher for MockFetcher {
    fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<CachedResponse>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let result = if self.offline.load(Ordering::SeqCst) {
        Err(Error::network("offline"))
      } else {
        self
          .responses
          .lock()
          .unwrap()
          .get(request.url.as_str())
          .cloned()
          .ok_or_else(|| Error::network("connection refused"))
      };
      async move { result }.boxed()
    }
  }

  fn context() -> RouteContext {
    RouteContext {
      api_base: Url::parse("https://story-api.dicoding.dev/v1/").unwrap(),
      shell_urls: vec![
        "https://app.example.com/index.html".to_string(),
        "https://app.example.com/app.js".to_string(),
      ],
      offline_page: "https://app.example.com/index.html".to_string(),
    }
  }

  fn engine(fetcher: Arc<MockFetcher>) -> StrategyEngine<MockFetcher> {
    StrategyEngine::new(
      Arc::new(ResponseCache::open_in_memory().unwrap()),
      fetcher,
      CacheNames::default(),
      context(),
      ImageCacheLimits {
        max_entries: 3,
        max_age: Duration::days(30),
      },
    )
  }

  fn req(url: &str) -> Request {
    Request::resource(Url::parse(url).unwrap())
  }

  #[test]
  fn routing_is_ordered_first_match_wins() {
    let ctx = context();
    // A shell asset with a static extension still routes as shell.
    assert_eq!(
      classify(&req("https://app.example.com/app.js"), &ctx),
      RequestClass::Shell
    );
    assert_eq!(
      classify(&req("https://story-api.dicoding.dev/v1/stories?page=1"), &ctx),
      RequestClass::Api
    );
    assert_eq!(
      classify(&req("https://cdn.example.com/photo.jpg"), &ctx),
      RequestClass::Image
    );
    assert_eq!(
      classify(
        &Request::navigation(Url::parse("https://app.example.com/home").unwrap()),
        &ctx
      ),
      RequestClass::Navigation
    );
    assert_eq!(
      classify(&req("https://cdn.example.com/vendor.css"), &ctx),
      RequestClass::StaticAsset
    );
    assert_eq!(
      classify(&req("https://elsewhere.example.com/feed"), &ctx),
      RequestClass::Passthrough
    );
  }

  #[tokio::test]
  async fn api_requests_hit_network_before_cache() {
    let fetcher = Arc::new(MockFetcher::new());
    let url = "https://story-api.dicoding.dev/v1/stories?page=1&size=20&location=1";
    fetcher.serve(url, "fresh");
    let engine = engine(Arc::clone(&fetcher));

    // Seed the cache, then confirm the network is still attempted first.
    let first = engine.handle(&req(url)).await.unwrap();
    assert_eq!(first.body, b"fresh");
    fetcher.serve(url, "fresher");
    let second = engine.handle(&req(url)).await.unwrap();
    assert_eq!(second.body, b"fresher");
    assert_eq!(fetcher.call_count(), 2);
  }

  #[tokio::test]
  async fn api_failure_falls_back_to_cached_response() {
    let fetcher = Arc::new(MockFetcher::new());
    let url = "https://story-api.dicoding.dev/v1/stories?page=1";
    fetcher.serve(url, "cached-list");
    let engine = engine(Arc::clone(&fetcher));

    engine.handle(&req(url)).await.unwrap();
    fetcher.offline.store(true, Ordering::SeqCst);
    let offline = engine.handle(&req(url)).await.unwrap();
    assert_eq!(offline.body, b"cached-list");
  }

  #[tokio::test]
  async fn api_failure_without_cache_propagates() {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.offline.store(true, Ordering::SeqCst);
    let engine = engine(Arc::clone(&fetcher));

    let err = engine
      .handle(&req("https://story-api.dicoding.dev/v1/stories?page=9"))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Network(_)));
  }

  #[tokio::test]
  async fn cached_images_are_served_without_a_network_attempt() {
    let fetcher = Arc::new(MockFetcher::new());
    let url = "https://cdn.example.com/photo.jpg";
    fetcher.serve(url, "jpegbytes");
    let engine = engine(Arc::clone(&fetcher));

    engine.handle(&req(url)).await.unwrap();
    assert_eq!(fetcher.call_count(), 1);
    engine.handle(&req(url)).await.unwrap();
    // Second hit came from cache.
    assert_eq!(fetcher.call_count(), 1);
  }

  #[tokio::test]
  async fn image_namespace_is_bounded() {
    let fetcher = Arc::new(MockFetcher::new());
    let engine = engine(Arc::clone(&fetcher));

    for i in 0..5 {
      let url = format!("https://cdn.example.com/photo{i}.png");
      fetcher.serve(&url, "img");
      engine.handle(&req(&url)).await.unwrap();
    }
    assert!(engine.cache.len(&engine.names.images).unwrap() <= 3);
  }

  #[tokio::test]
  async fn navigation_failure_serves_offline_page() {
    let fetcher = Arc::new(MockFetcher::new());
    let engine = engine(Arc::clone(&fetcher));
    engine
      .cache
      .put(
        &engine.names.shell,
        &CachedResponse {
          url: "https://app.example.com/index.html".to_string(),
          status: 200,
          content_type: Some("text/html".to_string()),
          body: b"<html>shell</html>".to_vec(),
        },
      )
      .unwrap();

    fetcher.offline.store(true, Ordering::SeqCst);
    let nav = Request::navigation(Url::parse("https://app.example.com/home").unwrap());
    let response = engine.handle(&nav).await.unwrap();
    assert_eq!(response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn stale_while_revalidate_serves_cache_and_refreshes() {
    let fetcher = Arc::new(MockFetcher::new());
    let url = "https://cdn.example.com/vendor.css";
    fetcher.serve(url, "v1");
    let engine = engine(Arc::clone(&fetcher));

    // First request has no cache: waits for the network.
    let first = engine.handle(&req(url)).await.unwrap();
    assert_eq!(first.body, b"v1");

    // Second request serves the cached copy immediately and revalidates.
    fetcher.serve(url, "v2");
    let second = engine.handle(&req(url)).await.unwrap();
    assert_eq!(second.body, b"v1");

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let refreshed = engine.cache.get(&engine.names.dynamic, url).unwrap().unwrap();
    assert_eq!(refreshed.body, b"v2");
  }
}
