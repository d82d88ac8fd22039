//! Remote story service: domain types and HTTP client.

pub mod client;
pub mod types;

pub use client::StoryClient;
pub use types::{FavoriteEntry, LoginResult, NewStory, Story};
