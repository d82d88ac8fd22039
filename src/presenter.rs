//! Synchronization presenter: decides per list-load whether data comes from
//! the remote service or the local entity store, and keeps the store
//! populated for future offline reads.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::api::types::{NewStory, Story};
use crate::error::{Error, Result};
use crate::session::SessionContext;
use crate::store::EntityStore;

/// The remote seam the presenter drives. `StoryClient` is the production
/// implementation; tests substitute scripted ones.
pub trait StoryBackend: Send + Sync {
  fn fetch_stories(
    &self,
    page: u32,
    size: u32,
    with_location: bool,
  ) -> impl std::future::Future<Output = Result<Vec<Story>>> + Send;

  fn submit_story(
    &self,
    story: &NewStory,
  ) -> impl std::future::Future<Output = Result<String>> + Send;
}

impl StoryBackend for crate::api::StoryClient {
  async fn fetch_stories(&self, page: u32, size: u32, with_location: bool) -> Result<Vec<Story>> {
    self.get_all_stories(page, size, with_location).await
  }

  async fn submit_story(&self, story: &NewStory) -> Result<String> {
    self.add_story(story).await
  }
}

/// Every list load ends in exactly one of these UI states.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
  /// Fresh data from the remote service.
  Fresh { stories: Vec<Story>, show_map: bool },
  /// The remote call failed; these are locally stored stories.
  Offline { stories: Vec<Story>, show_map: bool },
  /// Nothing to show. `load_failed` distinguishes "load failed and the
  /// store was empty" from "loaded fine, there are simply no stories".
  Empty { load_failed: bool },
  /// The session token is invalid; the caller must route to login.
  Unauthorized,
}

pub struct StoryPresenter<B: StoryBackend> {
  backend: B,
  store: Arc<EntityStore>,
  session: SessionContext,
  /// Bound on the remote call so the offline fallback triggers in bounded
  /// time even when the server never answers.
  remote_timeout: Duration,
  /// In-memory working set from the most recent load.
  stories: Vec<Story>,
}

impl<B: StoryBackend> StoryPresenter<B> {
  pub fn new(
    backend: B,
    store: Arc<EntityStore>,
    session: SessionContext,
    remote_timeout: Duration,
  ) -> Self {
    Self {
      backend,
      store,
      session,
      remote_timeout,
      stories: Vec::new(),
    }
  }

  pub fn working_set(&self) -> &[Story] {
    &self.stories
  }

  /// Load the story list: remote first, local store on failure, explicit
  /// empty state when both come up short.
  pub async fn load_stories(&mut self) -> LoadOutcome {
    let remote = tokio::time::timeout(
      self.remote_timeout,
      self.backend.fetch_stories(1, 20, true),
    )
    .await;

    match remote {
      Ok(Ok(stories)) => self.on_remote_success(stories),
      Ok(Err(err)) if err.is_unauthorized() => {
        // The token is known invalid going forward.
        self.session.clear();
        LoadOutcome::Unauthorized
      }
      Ok(Err(err)) => {
        warn!("remote story load failed: {err}");
        self.offline_fallback()
      }
      Err(_) => {
        warn!("remote story load timed out after {:?}", self.remote_timeout);
        self.offline_fallback()
      }
    }
  }

  fn on_remote_success(&mut self, mut stories: Vec<Story>) -> LoadOutcome {
    let now = Utc::now();
    for story in &mut stories {
      story.saved_at = Some(now);
      story.is_favorite = self.store.is_favorite(&story.id).unwrap_or(false);
      // Write-through is best-effort: the remote call already succeeded,
      // so a store failure is logged, not surfaced.
      if let Err(err) = self.store.upsert_story(story) {
        warn!("write-through failed for {}: {err}", story.id);
      }
    }

    self.stories = stories.clone();
    if stories.is_empty() {
      return LoadOutcome::Empty { load_failed: false };
    }
    let show_map = stories.iter().any(Story::has_map_location);
    LoadOutcome::Fresh { stories, show_map }
  }

  fn offline_fallback(&mut self) -> LoadOutcome {
    let stories = match self.store.get_all_stories() {
      Ok(stories) => stories,
      Err(err) => {
        warn!("offline fallback read failed: {err}");
        return LoadOutcome::Empty { load_failed: true };
      }
    };
    if stories.is_empty() {
      return LoadOutcome::Empty { load_failed: true };
    }
    self.stories = stories.clone();
    let show_map = stories.iter().any(Story::has_map_location);
    LoadOutcome::Offline { stories, show_map }
  }

  /// Validate and submit a new story to the remote service.
  pub async fn add_story(&self, story: &NewStory) -> Result<String> {
    if let Err(message) = validate_new_story(story) {
      return Err(Error::api(400, message));
    }
    self.backend.submit_story(story).await
  }

  /// Copy a story from the in-memory working set into the favorites
  /// collection. Returns false when the id is unknown or the store write
  /// failed; the caller owns the optimistic UI rollback.
  pub fn add_story_to_favorites(&self, id: &str) -> bool {
    let Some(story) = self.stories.iter().find(|s| s.id == id) else {
      return false;
    };
    match self.store.add_to_favorites(story) {
      Ok(()) => true,
      Err(err) => {
        warn!("favoriting {id} failed: {err}");
        false
      }
    }
  }

  /// Delete by id from the favorites collection only.
  pub fn remove_story_from_favorites(&self, id: &str) -> bool {
    match self.store.remove_from_favorites(id) {
      Ok(()) => true,
      Err(err) => {
        warn!("unfavoriting {id} failed: {err}");
        false
      }
    }
  }
}

const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

/// Form validation rules for story submission.
pub fn validate_new_story(story: &NewStory) -> std::result::Result<(), String> {
  if story.description.is_empty() {
    return Err("Description is required".to_string());
  }
  let chars = story.description.chars().count();
  if chars < 10 {
    return Err("Description must be at least 10 characters".to_string());
  }
  if chars > 1000 {
    return Err("Description must not exceed 1000 characters".to_string());
  }
  if story.photo.is_empty() {
    return Err("Please capture a photo".to_string());
  }
  if story.photo.len() > MAX_PHOTO_BYTES {
    return Err("Photo size must be less than 5MB".to_string());
  }
  if story.lat.is_none() || story.lon.is_none() {
    return Err("Please select a location".to_string());
  }
  Ok(())
}
