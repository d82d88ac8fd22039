//! Error taxonomy shared across the client.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the client library.
#[derive(Debug, Error)]
pub enum Error {
  /// Transport-level failure: no HTTP response was received.
  #[error("network error: {0}")]
  Network(String),

  /// The server answered with a non-2xx status.
  #[error("api error ({status}): {message}")]
  Api { status: u16, message: String },

  /// A local persistence transaction failed.
  #[error("store error: {0}")]
  Store(String),

  /// Push permission, support, or registration failure.
  #[error("push error: {0}")]
  Push(String),
}

impl Error {
  pub fn network(message: impl Into<String>) -> Self {
    Error::Network(message.into())
  }

  pub fn api(status: u16, message: impl Into<String>) -> Self {
    Error::Api {
      status,
      message: message.into(),
    }
  }

  pub fn push(message: impl Into<String>) -> Self {
    Error::Push(message.into())
  }

  /// True when the session token is known to be invalid.
  pub fn is_unauthorized(&self) -> bool {
    matches!(self, Error::Api { status: 401, .. })
  }

  /// Human-readable message suitable for direct display.
  pub fn user_message(&self) -> String {
    match self {
      Error::Api { status, message } => match status {
        401 => "Session expired. Please login again.".into(),
        403 => "You don't have permission to perform this action.".into(),
        404 => "The requested resource was not found.".into(),
        413 => "The file you're trying to upload is too large.".into(),
        429 => "Too many requests. Please try again later.".into(),
        500 => "Server error. Please try again later.".into(),
        _ => message.clone(),
      },
      Error::Network(_) => "Network error: Please check your internet connection.".into(),
      other => other.to_string(),
    }
  }
}

impl From<rusqlite::Error> for Error {
  fn from(err: rusqlite::Error) -> Self {
    Error::Store(err.to_string())
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    match err.status() {
      Some(status) => Error::api(status.as_u16(), err.to_string()),
      None => Error::Network(err.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unauthorized_detection() {
    assert!(Error::api(401, "expired").is_unauthorized());
    assert!(!Error::api(500, "boom").is_unauthorized());
    assert!(!Error::network("down").is_unauthorized());
  }

  #[test]
  fn user_messages_map_known_statuses() {
    assert_eq!(
      Error::api(401, "x").user_message(),
      "Session expired. Please login again."
    );
    assert_eq!(
      Error::api(418, "teapot").user_message(),
      "teapot"
    );
    assert!(Error::network("refused").user_message().contains("internet"));
  }
}
