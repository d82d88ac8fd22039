//! Network interception layer: response cache, routing strategies, and the
//! background worker.

pub mod cache;
pub mod strategy;
pub mod worker;

pub use cache::{CachedResponse, ResponseCache};
pub use strategy::{
  CacheNames, Fetcher, HttpFetcher, ImageCacheLimits, Request, RequestKind, RouteContext,
  StrategyEngine,
};
pub use worker::{
  Notification, NotificationAction, ShellManifest, Worker, WorkerEvent, WorkerHandle, WorkerState,
};
