//! Background worker hosting the network interception layer.
//!
//! The worker runs in its own tokio task and owns the response cache and
//! strategy engine. The application context talks to it exclusively through
//! messages; no mutable state is shared across that boundary. Lifecycle:
//! install (pre-populate the shell namespace), activate (evict namespaces
//! absent from the allow-list), then serve fetch/push messages. No fetch
//! message is handled before activation finishes.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::net::cache::{CachedResponse, ResponseCache};
use crate::net::strategy::{Fetcher, Request, StrategyEngine};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Activating,
  Activated,
}

/// Shell assets pre-populated at install. Failure to cache a required
/// asset fails the install; optional entries are tolerated.
#[derive(Debug, Clone, Default)]
pub struct ShellManifest {
  pub required: Vec<String>,
  pub optional: Vec<String>,
}

/// A notification rendered from a push payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub require_interaction: bool,
  /// Target for the "view" action.
  pub url: String,
}

/// Actions attached to every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
  /// Open or focus a client window at the notification's URL.
  View,
  /// Dismiss only.
  Close,
}

/// Client-window surface used when a notification is clicked. Reuses an
/// already-open window with a matching URL when one exists.
pub trait WindowClients: Send + Sync + 'static {
  fn find(&self, url: &str) -> Option<usize>;
  fn focus(&mut self, id: usize);
  fn open(&mut self, url: &str);
}

/// Window surface for the CLI build, where there is nothing to focus.
pub struct LogWindowClients;

impl WindowClients for LogWindowClients {
  fn find(&self, _url: &str) -> Option<usize> {
    None
  }

  fn focus(&mut self, _id: usize) {}

  fn open(&mut self, url: &str) {
    info!("open window: {url}");
  }
}

/// Messages into the worker.
pub enum WorkerMessage {
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<CachedResponse>>,
  },
  Push {
    payload: Vec<u8>,
  },
  NotificationClick {
    action: NotificationAction,
    url: String,
  },
  SubscriptionChange,
}

/// Events out of the worker, consumed by the application context.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
  /// A push payload was rendered into a notification.
  Notification(Notification),
  /// The platform rotated the push subscription; the bridge must
  /// re-register with the remote service.
  SubscriptionChanged,
}

pub struct Worker<F: Fetcher> {
  state: WorkerState,
  engine: StrategyEngine<F>,
  cache: Arc<ResponseCache>,
  shell: ShellManifest,
  windows: Box<dyn WindowClients>,
  events: mpsc::UnboundedSender<WorkerEvent>,
}

impl<F: Fetcher> Worker<F> {
  pub fn new(
    engine: StrategyEngine<F>,
    cache: Arc<ResponseCache>,
    shell: ShellManifest,
    windows: Box<dyn WindowClients>,
    events: mpsc::UnboundedSender<WorkerEvent>,
  ) -> Self {
    Self {
      state: WorkerState::Installing,
      engine,
      cache,
      shell,
      windows,
      events,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Spawn the worker task. Messages sent before activation completes are
  /// queued and served afterwards.
  pub fn spawn(mut self) -> WorkerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();

    tokio::spawn(async move {
      if let Err(err) = self.install().await {
        error!("worker install failed: {err}");
        return;
      }
      if let Err(err) = self.activate() {
        error!("worker activation failed: {err}");
        return;
      }
      while let Some(message) = rx.recv().await {
        self.handle(message).await;
      }
    });

    WorkerHandle { tx }
  }

  /// Pre-populate the shell namespace. Required assets must all cache;
  /// optional entries may fail without blocking the install.
  pub async fn install(&mut self) -> Result<()> {
    self.state = WorkerState::Installing;

    let required = self.shell.required.clone();
    for url in &required {
      let response = self.fetch_asset(url).await?;
      self.cache.put(&self.engine.names().shell, &response)?;
    }
    let optional = self.shell.optional.clone();
    for url in &optional {
      match self.fetch_asset(url).await {
        Ok(response) => {
          if let Err(err) = self.cache.put(&self.engine.names().shell, &response) {
            warn!("optional shell asset store failed for {url}: {err}");
          }
        }
        Err(err) => warn!("optional shell asset skipped ({url}): {err}"),
      }
    }

    self.state = WorkerState::Installed;
    info!("worker installed, {} shell assets cached", self.shell.required.len());
    Ok(())
  }

  async fn fetch_asset(&self, url: &str) -> Result<CachedResponse> {
    let url = Url::parse(url).map_err(|e| Error::network(format!("bad shell url {url}: {e}")))?;
    let response = self.engine.fetch_fresh(&Request::resource(url)).await?;
    if !(200..300).contains(&response.status) {
      return Err(Error::network(format!(
        "shell asset {} answered {}",
        response.url, response.status
      )));
    }
    Ok(response)
  }

  /// Delete every cache namespace absent from the current allow-list.
  pub fn activate(&mut self) -> Result<()> {
    self.state = WorkerState::Activating;

    let allowed = self.engine.names().allow_list();
    for namespace in self.cache.namespaces()? {
      if !allowed.contains(&namespace) {
        info!("evicting stale cache namespace {namespace}");
        self.cache.delete_namespace(&namespace)?;
      }
    }

    self.state = WorkerState::Activated;
    Ok(())
  }

  pub async fn handle(&mut self, message: WorkerMessage) {
    match message {
      WorkerMessage::Fetch { request, reply } => {
        let response = self.engine.handle(&request).await;
        let _ = reply.send(response);
      }
      WorkerMessage::Push { payload } => {
        let notification = parse_push_payload(&payload);
        let _ = self.events.send(WorkerEvent::Notification(notification));
      }
      WorkerMessage::NotificationClick { action, url } => match action {
        NotificationAction::View => match self.windows.find(&url) {
          Some(id) => self.windows.focus(id),
          None => self.windows.open(&url),
        },
        NotificationAction::Close => {}
      },
      WorkerMessage::SubscriptionChange => {
        let _ = self.events.send(WorkerEvent::SubscriptionChanged);
      }
    }
  }
}

/// Handle held by the application context. Cloneable; all communication is
/// message passing.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
  /// Route a request through the interception layer.
  pub async fn fetch(&self, request: Request) -> Result<CachedResponse> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(WorkerMessage::Fetch { request, reply })
      .map_err(|_| Error::network("worker is gone"))?;
    rx.await.map_err(|_| Error::network("worker dropped the request"))?
  }

  /// Deliver an incoming push payload.
  pub fn push(&self, payload: Vec<u8>) {
    let _ = self.tx.send(WorkerMessage::Push { payload });
  }

  pub fn notification_click(&self, action: NotificationAction, url: String) {
    let _ = self.tx.send(WorkerMessage::NotificationClick { action, url });
  }

  pub fn subscription_change(&self) {
    let _ = self.tx.send(WorkerMessage::SubscriptionChange);
  }
}

const DEFAULT_TITLE: &str = "Story App Notification";
const DEFAULT_BODY: &str = "New update available";
const DEFAULT_URL: &str = "/";

/// Parse a push payload as structured JSON; fall back to treating the raw
/// payload as a plain-text body.
pub fn parse_push_payload(payload: &[u8]) -> Notification {
  let (title, body) = match serde_json::from_slice::<serde_json::Value>(payload) {
    Ok(value) => {
      let title = value
        .get("title")
        .and_then(|t| t.as_str())
        .unwrap_or(DEFAULT_TITLE)
        .to_string();
      let body = value
        .get("options")
        .and_then(|o| o.get("body"))
        .and_then(|b| b.as_str())
        .unwrap_or(DEFAULT_BODY)
        .to_string();
      (title, body)
    }
    Err(_) => (
      DEFAULT_TITLE.to_string(),
      String::from_utf8_lossy(payload).into_owned(),
    ),
  };

  Notification {
    title,
    body,
    icon: "/icons/icon-192x192.png".to_string(),
    badge: "/icons/badge-72x72.png".to_string(),
    tag: "story-notification".to_string(),
    require_interaction: true,
    url: DEFAULT_URL.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::strategy::tests::MockFetcher;
  use crate::net::strategy::{CacheNames, ImageCacheLimits, RouteContext};
  use chrono::Duration;

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

  fn worker(
    fetcher: Arc<MockFetcher>,
    cache: Arc<ResponseCache>,
    shell: ShellManifest,
  ) -> (Worker<MockFetcher>, mpsc::UnboundedReceiver<WorkerEvent>) {
    let engine = StrategyEngine::new(
      Arc::clone(&cache),
      fetcher,
      CacheNames::default(),
      context(),
      ImageCacheLimits::default(),
    );
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    (
      Worker::new(engine, cache, shell, Box::new(LogWindowClients), events_tx),
      events_rx,
    )
  }

  #[tokio::test]
  async fn install_precaches_required_shell_assets() {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.serve("https://app.example.com/index.html", "<html>");
    fetcher.serve("https://app.example.com/app.js", "js");
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let (mut w, _events) = worker(
      Arc::clone(&fetcher),
      Arc::clone(&cache),
      ShellManifest {
        required: vec![
          "https://app.example.com/index.html".to_string(),
          "https://app.example.com/app.js".to_string(),
        ],
        optional: vec!["https://app.example.com/missing.png".to_string()],
      },
    );

    w.install().await.unwrap();
    assert_eq!(w.state(), WorkerState::Installed);
    assert!(cache
      .get("shell-v1", "https://app.example.com/index.html")
      .unwrap()
      .is_some());
    // The missing optional asset did not block the install.
    assert!(cache
      .get("shell-v1", "https://app.example.com/missing.png")
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn install_refreshes_previously_cached_shell_assets() {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.serve("https://app.example.com/index.html", "<html>v2</html>");
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    cache
      .put(
        "shell-v1",
        &CachedResponse {
          url: "https://app.example.com/index.html".to_string(),
          status: 200,
          content_type: Some("text/html".to_string()),
          body: b"<html>v1</html>".to_vec(),
        },
      )
      .unwrap();

    let (mut w, _events) = worker(
      Arc::clone(&fetcher),
      Arc::clone(&cache),
      ShellManifest {
        required: vec!["https://app.example.com/index.html".to_string()],
        optional: vec![],
      },
    );
    w.install().await.unwrap();

    // The stale copy did not short-circuit the fetch.
    assert_eq!(fetcher.call_count(), 1);
    let cached = cache
      .get("shell-v1", "https://app.example.com/index.html")
      .unwrap()
      .unwrap();
    assert_eq!(cached.body, b"<html>v2</html>");
  }

  #[tokio::test]
  async fn install_fails_when_a_required_asset_fails() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let (mut w, _events) = worker(
      fetcher,
      cache,
      ShellManifest {
        required: vec!["https://app.example.com/index.html".to_string()],
        optional: vec![],
      },
    );

    assert!(w.install().await.is_err());
    assert_eq!(w.state(), WorkerState::Installing);
  }

  #[tokio::test]
  async fn activation_evicts_namespaces_outside_the_allow_list() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let stale = CachedResponse {
      url: "https://a/x".to_string(),
      status: 200,
      content_type: None,
      body: b"x".to_vec(),
    };
    cache.put("shell-v0", &stale).unwrap();
    cache.put("api-v0", &stale).unwrap();
    cache.put("api-v1", &stale).unwrap();

    let (mut w, _events) = worker(fetcher, Arc::clone(&cache), ShellManifest::default());
    w.activate().unwrap();

    assert_eq!(w.state(), WorkerState::Activated);
    assert_eq!(cache.namespaces().unwrap(), vec!["api-v1".to_string()]);
  }

  #[tokio::test]
  async fn fetch_messages_are_served_after_activation() {
    let fetcher = Arc::new(MockFetcher::new());
    let url = "https://story-api.dicoding.dev/v1/stories?page=1";
    fetcher.serve(url, "list");
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let (w, _events) = worker(fetcher, cache, ShellManifest::default());
    let handle = w.spawn();

    let response = handle
      .fetch(Request::resource(Url::parse(url).unwrap()))
      .await
      .unwrap();
    assert_eq!(response.body, b"list");
  }

  #[tokio::test]
  async fn push_payloads_become_notifications() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let (w, mut events) = worker(fetcher, cache, ShellManifest::default());
    let handle = w.spawn();

    handle.push(br#"{"title":"New story","options":{"body":"from Dimas"}}"#.to_vec());
    let event = events.recv().await.unwrap();
    match event {
      WorkerEvent::Notification(n) => {
        assert_eq!(n.title, "New story");
        assert_eq!(n.body, "from Dimas");
        assert!(n.require_interaction);
      }
      other => panic!("unexpected event: {other:?}"),
    }
  }

  #[test]
  fn unparseable_push_payload_falls_back_to_plain_text() {
    let n = parse_push_payload(b"server going down at noon");
    assert_eq!(n.title, "Story App Notification");
    assert_eq!(n.body, "server going down at noon");
  }

  #[test]
  fn structured_payload_missing_fields_uses_defaults() {
    let n = parse_push_payload(br#"{"unrelated":true}"#);
    assert_eq!(n.title, "Story App Notification");
    assert_eq!(n.body, "New update available");
    assert_eq!(n.tag, "story-notification");
  }

  #[tokio::test]
  async fn subscription_change_is_forwarded_to_the_application() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let (w, mut events) = worker(fetcher, cache, ShellManifest::default());
    let handle = w.spawn();

    handle.subscription_change();
    assert_eq!(events.recv().await.unwrap(), WorkerEvent::SubscriptionChanged);
  }

  struct RecordingWindows {
    open: Arc<std::sync::Mutex<Vec<String>>>,
    focused: Arc<std::sync::Mutex<Vec<usize>>>,
    existing: Option<(usize, String)>,
  }

  impl WindowClients for RecordingWindows {
    fn find(&self, url: &str) -> Option<usize> {
      match &self.existing {
        Some((id, u)) if u == url => Some(*id),
        _ => None,
      }
    }

    fn focus(&mut self, id: usize) {
      self.focused.lock().unwrap().push(id);
    }

    fn open(&mut self, url: &str) {
      self.open.lock().unwrap().push(url.to_string());
    }
  }

  #[tokio::test]
  async fn view_action_focuses_matching_window_or_opens_one() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let opened = Arc::new(std::sync::Mutex::new(Vec::new()));
    let focused = Arc::new(std::sync::Mutex::new(Vec::new()));

    let engine = StrategyEngine::new(
      Arc::clone(&cache),
      fetcher,
      CacheNames::default(),
      context(),
      ImageCacheLimits {
        max_entries: 10,
        max_age: Duration::days(1),
      },
    );
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let mut w = Worker::new(
      engine,
      cache,
      ShellManifest::default(),
      Box::new(RecordingWindows {
        open: Arc::clone(&opened),
        focused: Arc::clone(&focused),
        existing: Some((7, "/stories/s1".to_string())),
      }),
      events_tx,
    );

    // Matching window: focused, not reopened.
    w.handle(WorkerMessage::NotificationClick {
      action: NotificationAction::View,
      url: "/stories/s1".to_string(),
    })
    .await;
    assert_eq!(*focused.lock().unwrap(), vec![7]);
    assert!(opened.lock().unwrap().is_empty());

    // No matching window: a new one opens.
    w.handle(WorkerMessage::NotificationClick {
      action: NotificationAction::View,
      url: "/home".to_string(),
    })
    .await;
    assert_eq!(*opened.lock().unwrap(), vec!["/home".to_string()]);

    // Close dismisses only.
    w.handle(WorkerMessage::NotificationClick {
      action: NotificationAction::Close,
      url: "/home".to_string(),
    })
    .await;
    assert_eq!(opened.lock().unwrap().len(), 1);
  }
}
