//! Typed cluster resources Meridian reads and writes
//!
//! - [`InferenceService`] - KServe model-serving resource
//! - [`HttpRoute`] / [`AiGatewayRoute`] - public routes for published models
//! - [`BackendTrafficPolicy`] - rate limits for published models
//!
//! Secrets use `k8s_openapi::api::core::v1::Secret` directly.

pub mod gateway;
pub mod inference_service;
pub mod traffic_policy;

pub use gateway::{
    AiGatewayRoute, AiGatewayRouteMatch, AiGatewayRouteRule, AiGatewayRouteSpec, ApiSchema,
    BackendRef, HttpHeaderMatch, HttpPathMatch, HttpRoute, HttpRouteMatch, HttpRouteRule,
    HttpRouteSpec, LlmRequestCost, ParentRef, AI_MODEL_HEADER,
};
pub use inference_service::{
    Condition, InferenceService, InferenceServiceSpec, InferenceServiceStatus, ModelFormat,
    ModelSpec, PredictorSpec, CONDITION_READY,
};
pub use traffic_policy::{
    BackendTrafficPolicy, BackendTrafficPolicySpec, GlobalRateLimit, HeaderSelector,
    PolicyTargetRef, RateLimitCost, RateLimitRule, RateLimitSelector, RateLimitSpec,
    RateLimitValue,
};
