//! Gateway route types
//!
//! - **HTTPRoute** (Gateway API) for predictive models
//! - **AIGatewayRoute** (Envoy AI Gateway) for chat/completions models
//!
//! Route specs are fully owned by Meridian, but defaults filled in by the
//! gateway controllers are kept in `extra` so an in-place update does not
//! fight the controller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kube_utils::{impl_resource_boilerplate, HasApiResource, ObjectMeta};

/// Header the AI gateway uses to select a model
pub const AI_MODEL_HEADER: &str = "x-ai-eg-model";

// =============================================================================
// Shared route types
// =============================================================================

/// Parent reference for route resources
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    /// API group (gateway.networking.k8s.io)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Resource kind (Gateway)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Gateway name
    pub name: String,
    /// Gateway namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Listener section name to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl ParentRef {
    /// Reference a Gateway, optionally a specific listener
    pub fn gateway(name: &str, namespace: &str, section_name: Option<String>) -> Self {
        Self {
            group: Some("gateway.networking.k8s.io".to_string()),
            kind: Some("Gateway".to_string()),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            section_name,
        }
    }
}

/// Backend reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    /// Resource kind (Service)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Backend name
    pub name: String,
    /// Backend namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Service port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// HTTP header match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpHeaderMatch {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
    /// Match type (Exact or RegularExpression)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

// =============================================================================
// HTTPRoute
// =============================================================================

/// Kubernetes Gateway API HTTPRoute resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// API version (gateway.networking.k8s.io/v1)
    #[serde(default = "HttpRoute::default_api_version")]
    pub api_version: String,
    /// Resource kind (HTTPRoute)
    #[serde(default = "HttpRoute::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// HTTPRoute specification
    pub spec: HttpRouteSpec,
}

impl HasApiResource for HttpRoute {
    const API_VERSION: &'static str = "gateway.networking.k8s.io/v1";
    const KIND: &'static str = "HTTPRoute";
}

impl_resource_boilerplate!(HttpRoute);

impl HttpRoute {
    /// Create a new HTTPRoute
    pub fn new(metadata: ObjectMeta, spec: HttpRouteSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// HTTPRoute spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Parent gateway references
    pub parent_refs: Vec<ParentRef>,
    /// Hostnames to match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// Routing rules
    #[serde(default)]
    pub rules: Vec<HttpRouteRule>,
    /// Controller-defaulted fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// HTTPRoute rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    /// Request matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpRouteMatch>,
    /// Backend references
    pub backend_refs: Vec<BackendRef>,
}

/// HTTP route match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    /// Path match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathMatch>,
    /// Header matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HttpHeaderMatch>,
}

/// HTTP path match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathMatch {
    /// Match type (PathPrefix, Exact)
    #[serde(rename = "type")]
    pub type_: String,
    /// Path value
    pub value: String,
}

impl HttpPathMatch {
    /// Prefix match on a path
    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            type_: "PathPrefix".to_string(),
            value: value.into(),
        }
    }
}

// =============================================================================
// AIGatewayRoute
// =============================================================================

/// Envoy AI Gateway AIGatewayRoute resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiGatewayRoute {
    /// API version (aigateway.envoyproxy.io/v1alpha1)
    #[serde(default = "AiGatewayRoute::default_api_version")]
    pub api_version: String,
    /// Resource kind (AIGatewayRoute)
    #[serde(default = "AiGatewayRoute::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// AIGatewayRoute specification
    pub spec: AiGatewayRouteSpec,
}

impl HasApiResource for AiGatewayRoute {
    const API_VERSION: &'static str = "aigateway.envoyproxy.io/v1alpha1";
    const KIND: &'static str = "AIGatewayRoute";
}

impl_resource_boilerplate!(AiGatewayRoute);

impl AiGatewayRoute {
    /// Create a new AIGatewayRoute
    pub fn new(metadata: ObjectMeta, spec: AiGatewayRouteSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// AIGatewayRoute spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiGatewayRouteSpec {
    /// Parent gateway references
    pub parent_refs: Vec<ParentRef>,
    /// Hostnames to match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// Input API schema the route accepts
    pub schema: ApiSchema,
    /// Routing rules
    #[serde(default)]
    pub rules: Vec<AiGatewayRouteRule>,
    /// Token usage metadata the gateway records per request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub llm_request_costs: Vec<LlmRequestCost>,
    /// Controller-defaulted fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// API schema selector
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiSchema {
    /// Schema name (OpenAI)
    pub name: String,
}

impl ApiSchema {
    /// The OpenAI chat/completions schema
    pub fn openai() -> Self {
        Self {
            name: "OpenAI".to_string(),
        }
    }
}

/// AIGatewayRoute rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiGatewayRouteRule {
    /// Header matches (typically the model header)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<AiGatewayRouteMatch>,
    /// Backend references
    pub backend_refs: Vec<BackendRef>,
}

/// AIGatewayRoute match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiGatewayRouteMatch {
    /// Header matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HttpHeaderMatch>,
}

/// Token cost captured into dynamic metadata
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmRequestCost {
    /// Dynamic metadata key
    pub metadata_key: String,
    /// InputToken, OutputToken or TotalToken
    #[serde(rename = "type")]
    pub type_: String,
}

impl LlmRequestCost {
    /// Total tokens consumed by a request, the key used for token rate limits
    pub fn total_tokens() -> Self {
        Self {
            metadata_key: "llm_total_token".to_string(),
            type_: "TotalToken".to_string(),
        }
    }
}
