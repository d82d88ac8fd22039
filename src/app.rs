//! Application wiring and command execution.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::api::types::NewStory;
use crate::api::StoryClient;
use crate::config::Config;
use crate::net::{
  HttpFetcher, Request, ResponseCache, StrategyEngine, Worker, WorkerEvent, WorkerHandle,
};
use crate::presenter::{LoadOutcome, StoryPresenter};
use crate::push::{decode_server_key, LocalPushPlatform, Permission, PushBridge};
use crate::session::SessionContext;
use crate::store::EntityStore;

pub struct App {
  config: Config,
  data_dir: PathBuf,
  session: SessionContext,
  store: Arc<EntityStore>,
  client: StoryClient,
  worker: WorkerHandle,
  worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
  presenter: StoryPresenter<StoryClient>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let session = SessionContext::load(&data_dir);
    let store = Arc::new(EntityStore::open(&data_dir)?);
    let client = StoryClient::new(
      config.base_url()?,
      session.clone(),
      config.remote_timeout(),
    )?;

    // The interception worker lives in its own task; the app talks to it
    // through the handle only.
    let cache = Arc::new(ResponseCache::open(&data_dir)?);
    let fetcher = Arc::new(HttpFetcher::new(
      reqwest::Client::builder()
        .timeout(config.remote_timeout())
        .build()
        .map_err(|e| eyre!("Failed to build http client: {e}"))?,
    ));
    let engine = StrategyEngine::new(
      Arc::clone(&cache),
      fetcher,
      config.cache_names(),
      config.route_context()?,
      config.image_limits(),
    );
    let (events_tx, worker_events) = mpsc::unbounded_channel();
    let worker = Worker::new(
      engine,
      cache,
      config.shell_manifest(),
      Box::new(crate::net::worker::LogWindowClients),
      events_tx,
    )
    .spawn();

    let presenter = StoryPresenter::new(
      client.clone(),
      Arc::clone(&store),
      session.clone(),
      config.remote_timeout(),
    );

    Ok(Self {
      config,
      data_dir,
      session,
      store,
      client,
      worker,
      worker_events,
      presenter,
    })
  }

  // ==========================================================================
  // Account
  // ==========================================================================

  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
    let message = self
      .client
      .register(name, email, password)
      .await
      .map_err(|e| eyre!(e.user_message()))?;
    println!("{message}");
    Ok(())
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<()> {
    let result = self
      .client
      .login(email, password)
      .await
      .map_err(|e| eyre!(e.user_message()))?;
    println!("Logged in as {}", result.name);
    Ok(())
  }

  pub fn logout(&self) {
    self.session.clear();
    println!("Logged out.");
  }

  // ==========================================================================
  // Stories
  // ==========================================================================

  pub async fn list_stories(&mut self) -> Result<()> {
    match self.presenter.load_stories().await {
      LoadOutcome::Fresh { stories, show_map } => {
        for story in &stories {
          print_story(story, false);
        }
        if show_map {
          let located = stories.iter().filter(|s| s.has_map_location()).count();
          println!("({located} stories have map locations)");
        }
      }
      LoadOutcome::Offline { stories, show_map } => {
        println!("[offline] showing locally saved stories");
        for story in &stories {
          print_story(story, true);
        }
        if show_map {
          let located = stories.iter().filter(|s| s.has_map_location()).count();
          println!("({located} stories have map locations)");
        }
      }
      LoadOutcome::Empty { load_failed } => {
        if load_failed {
          println!("Could not load stories and nothing is saved locally yet.");
        } else {
          println!("No stories yet.");
        }
      }
      LoadOutcome::Unauthorized => {
        println!("Session expired. Please login again.");
      }
    }
    self.drain_worker_events().await;
    Ok(())
  }

  pub async fn add_story(
    &self,
    description: &str,
    photo_path: &Path,
    lat: Option<f64>,
    lon: Option<f64>,
  ) -> Result<()> {
    let photo = tokio::fs::read(photo_path)
      .await
      .map_err(|e| eyre!("Failed to read photo {}: {e}", photo_path.display()))?;
    let photo_name = photo_path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "photo.jpg".to_string());

    let story = NewStory {
      description: description.to_string(),
      photo,
      photo_name,
      lat,
      lon,
    };
    let message = self
      .presenter
      .add_story(&story)
      .await
      .map_err(|e| eyre!(e.user_message()))?;
    println!("Story added: {message}");
    Ok(())
  }

  /// Fetch a story's photo through the interception layer, exercising the
  /// bounded image cache.
  pub async fn fetch_photo(&self, id: &str, output: Option<&Path>) -> Result<()> {
    let story = match self.store.get_story(id)? {
      Some(story) => story,
      None => self
        .client
        .get_story_detail(id)
        .await
        .map_err(|e| eyre!(e.user_message()))?,
    };

    let url = url::Url::parse(&story.photo_url)
      .map_err(|e| eyre!("Story {id} has an unusable photo url: {e}"))?;
    let response = self
      .worker
      .fetch(Request::resource(url))
      .await
      .map_err(|e| eyre!(e.user_message()))?;

    let target = output
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from(format!("{id}.jpg")));
    tokio::fs::write(&target, &response.body)
      .await
      .map_err(|e| eyre!("Failed to write {}: {e}", target.display()))?;
    println!("Photo saved to {} ({} bytes)", target.display(), response.body.len());
    Ok(())
  }

  // ==========================================================================
  // Saved stories and favorites
  // ==========================================================================

  pub fn saved_list(&self) -> Result<()> {
    let stories = self.store.get_all_stories()?;
    if stories.is_empty() {
      println!("No saved stories.");
      return Ok(());
    }
    for story in &stories {
      print_story(story, true);
    }
    Ok(())
  }

  pub fn saved_remove(&self, id: &str) -> Result<()> {
    self.store.delete_story(id)?;
    println!("Removed {id} from saved stories.");
    Ok(())
  }

  pub fn saved_clear(&self) -> Result<()> {
    self.store.clear_all()?;
    println!("Cleared saved stories and favorites.");
    Ok(())
  }

  pub fn favorites_list(&self) -> Result<()> {
    let favorites = self.store.get_all_favorites()?;
    if favorites.is_empty() {
      println!("No favorites yet.");
      return Ok(());
    }
    for entry in &favorites {
      println!(
        "* {} — {} (favorited {})",
        entry.story.id,
        entry.story.name,
        entry.favorited_at.format("%Y-%m-%d %H:%M")
      );
    }
    Ok(())
  }

  pub async fn favorite_add(&mut self, id: &str) -> Result<()> {
    println!("{}", self.favorite_add_outcome(id).await);
    Ok(())
  }

  async fn favorite_add_outcome(&mut self, id: &str) -> String {
    // Favoriting works off the in-memory working set, so refresh it first.
    if self.presenter.load_stories().await == LoadOutcome::Unauthorized {
      return "Session expired. Please login again.".to_string();
    }
    if self.presenter.add_story_to_favorites(id) {
      format!("Added {id} to favorites.")
    } else {
      format!("Story {id} is not in the current list.")
    }
  }

  pub fn favorite_remove(&self, id: &str) -> Result<()> {
    if self.presenter.remove_story_from_favorites(id) {
      println!("Removed {id} from favorites.");
    } else {
      println!("Could not remove {id} from favorites.");
    }
    Ok(())
  }

  // ==========================================================================
  // Push
  // ==========================================================================

  fn push_bridge(&self) -> Result<PushBridge<LocalPushPlatform, StoryClient>> {
    let key = decode_server_key(&self.config.push.server_key)
      .map_err(|e| eyre!(e.user_message()))?;
    Ok(PushBridge::new(
      LocalPushPlatform::new(&self.data_dir),
      self.client.clone(),
      key,
    ))
  }

  pub fn push_status(&self) -> Result<()> {
    let bridge = self.push_bridge()?;
    let support = bridge.check_support();
    let permission = match support.permission {
      Permission::Granted => "granted",
      Permission::Denied => "denied",
      Permission::Default => "not asked",
    };
    println!(
      "Push supported: {}, permission: {permission}",
      support.supported
    );
    Ok(())
  }

  pub async fn push_subscribe(&self) -> Result<()> {
    let mut bridge = self.push_bridge()?;
    let subscription = bridge
      .subscribe()
      .await
      .map_err(|e| eyre!(e.user_message()))?;
    println!("Subscribed: {}", subscription.endpoint);
    Ok(())
  }

  pub async fn push_unsubscribe(&self) -> Result<()> {
    let mut bridge = self.push_bridge()?;
    if bridge
      .unsubscribe()
      .await
      .map_err(|e| eyre!(e.user_message()))?
    {
      println!("Unsubscribed.");
    } else {
      println!("No active subscription.");
    }
    Ok(())
  }

  /// Surface pending worker events: rendered notifications and
  /// subscription-change signals.
  async fn drain_worker_events(&mut self) {
    while let Ok(event) = self.worker_events.try_recv() {
      match event {
        WorkerEvent::Notification(n) => {
          println!("[notification] {}: {}", n.title, n.body);
        }
        WorkerEvent::SubscriptionChanged => {
          info!("push subscription rotated, re-registering");
          if let Ok(mut bridge) = self.push_bridge() {
            bridge.handle_subscription_change().await;
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn favorite_add_reports_an_expired_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
      data_dir: Some(dir.path().to_path_buf()),
      ..Config::default()
    };
    let mut app = App::new(config).unwrap();

    // No stored session: the refresh is refused before any network call.
    let message = app.favorite_add_outcome("story-1").await;
    assert!(message.contains("Session expired"));
    assert!(!app.store.is_favorite("story-1").unwrap());
  }
}

fn print_story(story: &crate::api::Story, from_store: bool) {
  let marker = if story.is_favorite { "*" } else { " " };
  let location = if story.has_map_location() {
    format!(
      " @({:.4}, {:.4})",
      story.lat.unwrap_or_default(),
      story.lon.unwrap_or_default()
    )
  } else {
    String::new()
  };
  let suffix = if from_store {
    story
      .saved_at
      .map(|t| format!(" [saved {}]", t.format("%Y-%m-%d %H:%M")))
      .unwrap_or_default()
  } else {
    String::new()
  };
  println!(
    "{marker} {} — {}: {}{location}{suffix}",
    story.id, story.name, story.description
  );
}
