//! Publishing for Meridian
//!
//! Exposes a ready model outside the cluster through a gateway route, a
//! per-key rate limit policy and an API key secret, and keeps those three
//! resources consistent across publish, update, key rotation and unpublish.

#![deny(missing_docs)]

pub mod api_key;
pub mod manifests;
pub mod orchestrator;
pub mod types;

pub use orchestrator::PublishOrchestrator;
pub use types::{PublishConfig, PublishState, PublishedModel, RateLimiting, ResourceRef, SecretRef};
