//! Model vocabulary shared by the registry, proxy and publisher
//!
//! Frameworks, scaling metrics and the model type tag are closed enums so a
//! bad value is rejected once at the edge instead of being carried around as
//! a string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

// =============================================================================
// Framework
// =============================================================================

/// Model serving framework (KServe `modelFormat.name`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    /// scikit-learn
    Sklearn,
    /// XGBoost
    Xgboost,
    /// LightGBM
    Lightgbm,
    /// TensorFlow SavedModel
    Tensorflow,
    /// PyTorch / TorchServe
    Pytorch,
    /// ONNX runtime
    Onnx,
    /// NVIDIA Triton
    Triton,
    /// Hugging Face transformers runtime
    Huggingface,
    /// PMML
    Pmml,
    /// PaddlePaddle
    Paddle,
}

impl Framework {
    /// Every framework Meridian knows how to describe
    pub const ALL: [Framework; 10] = [
        Framework::Sklearn,
        Framework::Xgboost,
        Framework::Lightgbm,
        Framework::Tensorflow,
        Framework::Pytorch,
        Framework::Onnx,
        Framework::Triton,
        Framework::Huggingface,
        Framework::Pmml,
        Framework::Paddle,
    ];

    /// Name as written into `modelFormat.name`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sklearn => "sklearn",
            Self::Xgboost => "xgboost",
            Self::Lightgbm => "lightgbm",
            Self::Tensorflow => "tensorflow",
            Self::Pytorch => "pytorch",
            Self::Onnx => "onnx",
            Self::Triton => "triton",
            Self::Huggingface => "huggingface",
            Self::Pmml => "pmml",
            Self::Paddle => "paddle",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| Error::validation(format!("unknown framework '{}'", s)))
    }
}

// =============================================================================
// ModelType
// =============================================================================

/// Interface a model exposes, fixed at creation.
///
/// Schema-compatible models speak the chat/completions API and are published
/// through the AI gateway with token-based rate limits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Classic predict-endpoint model
    #[default]
    Predictive,
    /// OpenAI-schema chat/completions model
    #[serde(alias = "openai-compatible")]
    Openai,
}

impl ModelType {
    /// Label value stored on the model-serving resource
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Predictive => "predictive",
            Self::Openai => "openai",
        }
    }

    /// Whether the model matches the standardized chat/completions schema
    pub fn is_schema_compatible(&self) -> bool {
        matches!(self, Self::Openai)
    }

    /// Read the tag back from a label value; absent or unknown means predictive
    pub fn from_label(value: Option<&str>) -> Self {
        match value {
            Some("openai") => Self::Openai,
            _ => Self::Predictive,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ScaleMetric
// =============================================================================

/// Autoscaling metric for the predictor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMetric {
    /// In-flight requests per replica
    #[default]
    Concurrency,
    /// Requests per second per replica
    Rps,
    /// CPU utilization
    Cpu,
    /// Memory utilization
    Memory,
}

impl ScaleMetric {
    /// Name as written into `predictor.scaleMetric`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concurrency => "concurrency",
            Self::Rps => "rps",
            Self::Cpu => "cpu",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for ScaleMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrency" => Ok(Self::Concurrency),
            "rps" => Ok(Self::Rps),
            "cpu" => Ok(Self::Cpu),
            "memory" => Ok(Self::Memory),
            other => Err(Error::validation(format!("unknown scale metric '{}'", other))),
        }
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

/// Storage URI schemes the model runtime can pull from
pub const STORAGE_URI_SCHEMES: [&str; 8] = [
    "s3://", "gs://", "pvc://", "hf://", "https://", "http://", "oci://", "azure://",
];

/// Validate a DNS-1123 label (model names, namespaces)
pub fn validate_dns_label(field: &str, value: &str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::validation(format!("{} must not be empty", field)));
    }
    if value.len() > 63 {
        return Err(Error::validation(format!(
            "{} '{}' exceeds 63 characters",
            field, value
        )));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let alnum_edges = value
        .chars()
        .next()
        .zip(value.chars().last())
        .map(|(a, b)| a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric())
        .unwrap_or(false);
    if !valid_chars || !alnum_edges {
        return Err(Error::validation(format!(
            "{} '{}' must be lowercase alphanumerics or '-', starting and ending with an alphanumeric",
            field, value
        )));
    }
    Ok(())
}

/// Validate a DNS hostname (dot-separated labels)
pub fn validate_hostname(value: &str) -> Result<(), Error> {
    if value.is_empty() || value.len() > 253 {
        return Err(Error::validation(format!("invalid hostname '{}'", value)));
    }
    for label in value.split('.') {
        validate_dns_label("hostname label", label)
            .map_err(|_| Error::validation(format!("invalid hostname '{}'", value)))?;
    }
    Ok(())
}

/// Validate a model storage URI
pub fn validate_storage_uri(uri: &str) -> Result<(), Error> {
    if uri.trim().is_empty() {
        return Err(Error::validation("storageUri must not be empty"));
    }
    if !STORAGE_URI_SCHEMES.iter().any(|s| uri.starts_with(s)) {
        return Err(Error::validation(format!(
            "storageUri must start with one of: {}",
            STORAGE_URI_SCHEMES.join(", ")
        )));
    }
    Ok(())
}
