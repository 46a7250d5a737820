//! Envoy Gateway BackendTrafficPolicy types
//!
//! Used to encode per-API-key rate limits on a published route. Request
//! limits count requests; token limits charge each request the total tokens
//! the AI gateway recorded in dynamic metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kube_utils::{impl_resource_boilerplate, HasApiResource, ObjectMeta};

/// Dynamic metadata namespace the AI gateway writes token usage into
pub const AI_GATEWAY_METADATA_NAMESPACE: &str = "io.envoy.ai_gateway";

/// Envoy Gateway BackendTrafficPolicy resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendTrafficPolicy {
    /// API version (gateway.envoyproxy.io/v1alpha1)
    #[serde(default = "BackendTrafficPolicy::default_api_version")]
    pub api_version: String,
    /// Resource kind (BackendTrafficPolicy)
    #[serde(default = "BackendTrafficPolicy::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Policy specification
    pub spec: BackendTrafficPolicySpec,
}

impl HasApiResource for BackendTrafficPolicy {
    const API_VERSION: &'static str = "gateway.envoyproxy.io/v1alpha1";
    const KIND: &'static str = "BackendTrafficPolicy";
}

impl_resource_boilerplate!(BackendTrafficPolicy);

impl BackendTrafficPolicy {
    /// Create a new BackendTrafficPolicy
    pub fn new(metadata: ObjectMeta, spec: BackendTrafficPolicySpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// BackendTrafficPolicy spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendTrafficPolicySpec {
    /// Routes the policy attaches to
    pub target_refs: Vec<PolicyTargetRef>,
    /// Rate limiting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSpec>,
    /// Retries, timeouts, circuit breakers, ...
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Local policy target reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetRef {
    /// API group of the target
    pub group: String,
    /// Kind of the target
    pub kind: String,
    /// Name of the target
    pub name: String,
}

impl PolicyTargetRef {
    /// Target an HTTPRoute by name
    pub fn http_route(name: impl Into<String>) -> Self {
        Self {
            group: "gateway.networking.k8s.io".to_string(),
            kind: "HTTPRoute".to_string(),
            name: name.into(),
        }
    }
}

/// Rate limit configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSpec {
    /// Global or Local
    #[serde(rename = "type")]
    pub type_: String,
    /// Global rate limit rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalRateLimit>,
}

/// Global rate limit
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRateLimit {
    /// Rules, each an independent bucket
    pub rules: Vec<RateLimitRule>,
}

/// One rate limit bucket
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    /// Which requests share a bucket
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_selectors: Vec<RateLimitSelector>,
    /// Allowed amount per unit
    pub limit: RateLimitValue,
    /// Custom cost (token limits)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<RateLimitCost>,
}

/// Client selector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSelector {
    /// Header based selection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderSelector>,
}

/// Header selector; `Distinct` gives each header value its own bucket
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSelector {
    /// Header name
    pub name: String,
    /// Exact, RegularExpression or Distinct
    #[serde(rename = "type")]
    pub type_: String,
}

/// Limit value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitValue {
    /// Requests (or cost units) allowed per unit
    pub requests: u64,
    /// Second, Minute, Hour, Day
    pub unit: String,
}

/// Request/response cost
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCost {
    /// Cost charged on request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<CostSpecifier>,
    /// Cost charged on response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CostSpecifier>,
}

/// Where a cost value comes from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CostSpecifier {
    /// Number or Metadata
    pub from: String,
    /// Fixed cost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    /// Metadata-derived cost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataKey>,
}

/// Dynamic metadata key reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataKey {
    /// Metadata namespace
    pub namespace: String,
    /// Metadata key
    pub key: String,
}

impl RateLimitCost {
    /// Charge nothing on request and the recorded token total on response
    pub fn tokens(metadata_key: &str) -> Self {
        Self {
            request: Some(CostSpecifier {
                from: "Number".to_string(),
                number: Some(0),
                metadata: None,
            }),
            response: Some(CostSpecifier {
                from: "Metadata".to_string(),
                number: None,
                metadata: Some(MetadataKey {
                    namespace: AI_GATEWAY_METADATA_NAMESPACE.to_string(),
                    key: metadata_key.to_string(),
                }),
            }),
        }
    }
}
