//! Published model vocabulary

use std::fmt;

use serde::{Deserialize, Serialize};

use meridian_common::model::{validate_hostname, ModelType};
use meridian_common::{Error, Result};

/// Requested publication of a model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishConfig {
    /// Tenant publishing the model; must be the model's namespace
    #[serde(default)]
    pub tenant_id: String,
    /// Hostname the model is served on externally
    #[serde(default)]
    pub public_hostname: String,
    /// Quotas enforced per API key
    #[serde(default)]
    pub rate_limiting: RateLimiting,
}

/// Per-key quotas
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiting {
    /// Requests per minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u64>,
    /// Requests per hour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_hour: Option<u64>,
    /// Total LLM tokens per minute (schema-compatible models only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_minute: Option<u64>,
    /// Total LLM tokens per hour (schema-compatible models only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_hour: Option<u64>,
}

impl RateLimiting {
    fn has_token_limits(&self) -> bool {
        self.tokens_per_minute.is_some() || self.tokens_per_hour.is_some()
    }
}

impl PublishConfig {
    /// Check the configuration against the model it will publish
    pub fn validate(&self, namespace: &str, model_type: ModelType) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(Error::validation("tenantId is required"));
        }
        if self.tenant_id != namespace {
            return Err(Error::validation(format!(
                "tenantId '{}' does not own namespace '{}'",
                self.tenant_id, namespace
            )));
        }
        validate_hostname(&self.public_hostname)?;

        let limits = &self.rate_limiting;
        let named = [
            ("requestsPerMinute", limits.requests_per_minute),
            ("requestsPerHour", limits.requests_per_hour),
            ("tokensPerMinute", limits.tokens_per_minute),
            ("tokensPerHour", limits.tokens_per_hour),
        ];
        if let Some((field, _)) = named.iter().find(|(_, v)| *v == Some(0)) {
            return Err(Error::validation(format!("{} must be greater than 0", field)));
        }
        if limits.requests_per_minute.is_none() && limits.requests_per_hour.is_none() {
            return Err(Error::validation(
                "rateLimiting needs requestsPerMinute or requestsPerHour",
            ));
        }
        if limits.has_token_limits() && !model_type.is_schema_compatible() {
            return Err(Error::validation(format!(
                "token limits require a schema-compatible model, this model is '{}'",
                model_type
            )));
        }
        Ok(())
    }
}

/// Reference to one cluster resource backing a published model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Resource kind
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Server-assigned uid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Reference to the API key secret
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Resource kind
    pub kind: String,
    /// Secret name
    pub name: String,
    /// Server-assigned uid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Key generation, incremented on every rotation
    pub generation: u64,
}

/// A model exposed through the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedModel {
    /// Model name
    pub model_name: String,
    /// Tenant namespace
    pub namespace: String,
    /// Owning tenant
    pub tenant_id: String,
    /// External hostname
    pub public_hostname: String,
    /// Interface the model exposes
    pub model_type: ModelType,
    /// Where external clients send requests
    pub external_url: String,
    /// Enforced quotas
    pub rate_limiting: RateLimiting,
    /// Route resource
    pub route: ResourceRef,
    /// Traffic policy resource
    pub policy: ResourceRef,
    /// API key secret
    pub api_key_secret: SecretRef,
    /// Plaintext key; only present in publish and rotate responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Lifecycle of a published model, recorded on log lines
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishState {
    /// No publishing resources exist
    Unpublished,
    /// Creating route, policy and key
    Publishing,
    /// Route, policy and key all present
    Published,
    /// A publish step failed and was rolled back
    PublishFailed,
    /// Route and policy being updated in place
    Updating,
    /// Key being replaced
    RotatingKey,
    /// Resources being removed
    Unpublishing,
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unpublished => "Unpublished",
            Self::Publishing => "Publishing",
            Self::Published => "Published",
            Self::PublishFailed => "PublishFailed",
            Self::Updating => "Updating",
            Self::RotatingKey => "RotatingKey",
            Self::Unpublishing => "Unpublishing",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PublishConfig {
        PublishConfig {
            tenant_id: "tenant-a".into(),
            public_hostname: "api.example.com".into(),
            rate_limiting: RateLimiting {
                requests_per_minute: Some(100),
                ..Default::default()
            },
        }
    }

    #[test]
    fn request_limits_are_required() {
        assert!(config().validate("tenant-a", ModelType::Predictive).is_ok());

        let mut no_limits = config();
        no_limits.rate_limiting = RateLimiting::default();
        assert!(no_limits.validate("tenant-a", ModelType::Predictive).is_err());

        let mut zero = config();
        zero.rate_limiting.requests_per_minute = Some(0);
        assert!(zero.validate("tenant-a", ModelType::Predictive).is_err());
    }

    #[test]
    fn token_limits_need_a_schema_compatible_model() {
        let mut tokens = config();
        tokens.rate_limiting.tokens_per_minute = Some(10_000);
        assert_eq!(
            tokens
                .validate("tenant-a", ModelType::Predictive)
                .unwrap_err()
                .kind(),
            "ValidationError"
        );
        assert!(tokens.validate("tenant-a", ModelType::Openai).is_ok());
    }

    #[test]
    fn tenant_and_hostname_are_checked() {
        assert!(config().validate("tenant-b", ModelType::Predictive).is_err());

        let mut bad_host = config();
        bad_host.public_hostname = "not a host".into();
        assert!(bad_host.validate("tenant-a", ModelType::Predictive).is_err());
    }

    #[test]
    fn api_key_is_omitted_unless_set() {
        let model = PublishedModel {
            model_name: "iris".into(),
            namespace: "tenant-a".into(),
            tenant_id: "tenant-a".into(),
            public_hostname: "api.example.com".into(),
            model_type: ModelType::Predictive,
            external_url: "https://api.example.com/v1/models/iris".into(),
            rate_limiting: config().rate_limiting,
            route: ResourceRef {
                kind: "HTTPRoute".into(),
                name: "iris-public".into(),
                uid: None,
            },
            policy: ResourceRef {
                kind: "BackendTrafficPolicy".into(),
                name: "iris-ratelimit".into(),
                uid: None,
            },
            api_key_secret: SecretRef {
                kind: "Secret".into(),
                name: "iris-api-key".into(),
                uid: None,
                generation: 1,
            },
            api_key: None,
        };
        let json = serde_json::to_value(&model).unwrap();
        assert!(json.get("apiKey").is_none());
        assert_eq!(json["apiKeySecret"]["generation"], 1);
        assert_eq!(json["rateLimiting"]["requestsPerMinute"], 100);
    }
}
