//! Model registry for Meridian
//!
//! Translates between the model descriptors API clients work with and the
//! KServe InferenceServices that actually run the models. Readiness and the
//! external URL are projections of the resource status and are never taken
//! from input.

#![deny(missing_docs)]

pub mod adapter;
pub mod logs;
pub mod registry;

pub use adapter::{CreateModelRequest, ModelDescriptor, UpdateModelRequest};
pub use logs::{LogSource, PodLogSource, PodLogs};
pub use registry::{ModelLogs, ModelRegistry};
