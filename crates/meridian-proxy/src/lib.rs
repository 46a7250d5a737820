//! Prediction proxy for Meridian
//!
//! Sends ad-hoc prediction requests to a model's inference endpoint, either
//! the one KServe reports for the model or one described by per-request
//! connection settings (custom target, headers, virtual host, pinned name
//! resolution).

#![deny(missing_docs)]

pub mod proxy;
pub mod settings;

pub use proxy::{PredictionPayload, PredictionProxy, PredictionResult};
pub use settings::{ConnectionSettings, DnsOverride, HeaderPair, PredictRequest};
