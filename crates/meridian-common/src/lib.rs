//! Common types for Meridian: cluster resources, errors, and utilities
//!
//! Every other Meridian crate talks to the cluster exclusively through the
//! [`resources::ResourceClient`] trait defined here, and reports failures
//! through the shared [`Error`] taxonomy.

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod identity;
pub mod kube_utils;
pub mod model;
pub mod resources;
pub mod retry;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::PlatformConfig;
pub use error::Error;
pub use identity::CallerIdentity;
pub use resources::{KubeResourceClient, ResourceClient, ResourceError, Selection};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Labels and annotations
// =============================================================================

/// Standard Kubernetes label for the managing component
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on every resource Meridian creates
pub const LABEL_MANAGED_BY_MERIDIAN: &str = "meridian";

/// Label naming the model a resource belongs to
pub const LABEL_MODEL: &str = "meridian.dev/model";

/// Label carrying the model type tag, written once at model creation
pub const LABEL_MODEL_TYPE: &str = "meridian.dev/model-type";

/// Label marking resources that make up a published model
pub const LABEL_PUBLISHED: &str = "meridian.dev/published";

/// Label carrying the owning tenant of a published model
pub const LABEL_TENANT: &str = "meridian.dev/tenant";

/// Label KServe puts on predictor pods
pub const LABEL_KSERVE_ISVC: &str = "serving.kserve.io/inferenceservice";

/// Annotation holding the serialized publish configuration on the route
pub const ANNOTATION_PUBLISH_CONFIG: &str = "meridian.dev/publish-config";

/// Annotation counting API key generations on the key secret
pub const ANNOTATION_KEY_GENERATION: &str = "meridian.dev/key-generation";

/// Label selector matching every published-model resource
pub const PUBLISHED_SELECTOR: &str = "meridian.dev/published=true";
