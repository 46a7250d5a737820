//! Meridian HTTP API
//!
//! Bearer token authentication, tenant scoping and the REST surface over the
//! registry, prediction proxy and publishing orchestrator.

#![deny(missing_docs)]

pub mod auth;
pub mod cli;
pub mod error;
pub mod handlers;
pub mod server;

pub use auth::{AuthConfig, Authenticator, Caller, JwksVerifier};
pub use cli::Cli;
pub use error::{ApiError, ApiResult};
pub use server::{build_router, start_server, AppState, ServerConfig};
