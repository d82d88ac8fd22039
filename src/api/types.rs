//! Domain types and remote response envelopes for the story service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A user-submitted story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
  pub id: String,
  pub name: String,
  pub description: String,
  pub photo_url: String,
  /// Latitude. The server is loose about this field, so we accept numbers
  /// or numeric strings and drop everything else.
  #[serde(default, deserialize_with = "lenient_coordinate")]
  pub lat: Option<f64>,
  /// Longitude, same handling as `lat`.
  #[serde(default, deserialize_with = "lenient_coordinate")]
  pub lon: Option<f64>,
  /// Server-assigned creation timestamp (ISO-8601), authoritative.
  #[serde(default)]
  pub created_at: Option<String>,
  /// Local timestamp stamped when the record is written into the entity
  /// store. Never sent to the server.
  #[serde(default, skip_serializing)]
  pub saved_at: Option<DateTime<Utc>>,
  /// True only when a matching record exists in the favorites collection.
  #[serde(default, skip_serializing)]
  pub is_favorite: bool,
}

impl Story {
  /// A story participates in map rendering only when both coordinates are
  /// present, finite, and not exactly zero.
  pub fn has_map_location(&self) -> bool {
    match (self.lat, self.lon) {
      (Some(lat), Some(lon)) => {
        lat.is_finite() && lon.is_finite() && lat != 0.0 && lon != 0.0
      }
      _ => false,
    }
  }
}

/// A story snapshot copied into the favorites collection.
///
/// Favoriting copies the story data rather than referencing it: deleting a
/// story from the main collection must not destroy its favorite copy, and
/// vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteEntry {
  pub story: Story,
  pub favorited_at: DateTime<Utc>,
}

fn lenient_coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = serde_json::Value::deserialize(deserializer)?;
  Ok(match value {
    serde_json::Value::Number(n) => n.as_f64(),
    serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
    _ => None,
  })
}

// ============================================================================
// Remote response envelopes
// ============================================================================

/// Generic `{error, message}` envelope used by write endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
  pub error: bool,
  pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryListResponse {
  pub error: bool,
  pub message: String,
  #[serde(default)]
  pub list_story: Vec<Story>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDetailResponse {
  pub error: bool,
  pub message: String,
  pub story: Story,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
  pub error: bool,
  pub message: String,
  pub login_result: Option<LoginResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
  pub user_id: String,
  pub name: String,
  pub token: String,
}

/// A story being submitted.
#[derive(Debug, Clone)]
pub struct NewStory {
  pub description: String,
  pub photo: Vec<u8>,
  pub photo_name: String,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
}
