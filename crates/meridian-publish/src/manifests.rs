//! Desired-state builders for publishing resources
//!
//! Names follow a fixed convention in the tenant namespace, which is how a
//! published model is found again: `<model>-public` for the route,
//! `<model>-ratelimit` for the policy and `<model>-api-key` for the secret.

use std::collections::BTreeMap;

use meridian_common::config::PlatformConfig;
use meridian_common::crd::{
    AiGatewayRoute, AiGatewayRouteMatch, AiGatewayRouteRule, AiGatewayRouteSpec, ApiSchema,
    BackendRef, BackendTrafficPolicy, BackendTrafficPolicySpec, GlobalRateLimit, HeaderSelector,
    HttpHeaderMatch, HttpPathMatch, HttpRoute, HttpRouteMatch, HttpRouteRule, HttpRouteSpec,
    LlmRequestCost, ParentRef, PolicyTargetRef, RateLimitCost, RateLimitRule, RateLimitSelector,
    RateLimitSpec, RateLimitValue, AI_MODEL_HEADER,
};
use meridian_common::kube_utils::{HasApiResource, ObjectMeta};
use meridian_common::model::ModelType;
use meridian_common::{
    Error, Result, ANNOTATION_PUBLISH_CONFIG, LABEL_MANAGED_BY, LABEL_MANAGED_BY_MERIDIAN,
    LABEL_MODEL, LABEL_PUBLISHED, LABEL_TENANT,
};

use crate::types::{PublishConfig, RateLimiting};

/// Route name for a model
pub fn route_name(model: &str) -> String {
    format!("{}-public", model)
}

/// Traffic policy name for a model
pub fn policy_name(model: &str) -> String {
    format!("{}-ratelimit", model)
}

/// API key secret name for a model
pub fn secret_name(model: &str) -> String {
    format!("{}-api-key", model)
}

/// Where external clients reach a published model
pub fn external_url(hostname: &str, model: &str, model_type: ModelType) -> String {
    match model_type {
        ModelType::Openai => format!("https://{}/v1/chat/completions", hostname),
        ModelType::Predictive => format!("https://{}/v1/models/{}", hostname, model),
    }
}

/// Labels carried by every publishing resource
pub fn publish_labels(model: &str, tenant: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_MERIDIAN.to_string(),
        ),
        (LABEL_MODEL.to_string(), model.to_string()),
        (LABEL_PUBLISHED.to_string(), "true".to_string()),
        (LABEL_TENANT.to_string(), tenant.to_string()),
    ])
}

fn publish_meta(name: String, namespace: &str, model: &str, tenant: &str) -> ObjectMeta {
    let mut meta = ObjectMeta::new(name, namespace);
    meta.labels.extend(publish_labels(model, tenant));
    meta
}

/// The route of a published model; its kind follows the model type
#[derive(Clone, Debug, PartialEq)]
pub enum PublicRoute {
    /// Gateway API route for predictive models
    Http(HttpRoute),
    /// AI gateway route for schema-compatible models
    Ai(AiGatewayRoute),
}

impl PublicRoute {
    /// Resource kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => HttpRoute::KIND,
            Self::Ai(_) => AiGatewayRoute::KIND,
        }
    }

    /// Resource metadata
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Http(r) => &r.metadata,
            Self::Ai(r) => &r.metadata,
        }
    }

    /// Mutable resource metadata
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Http(r) => &mut r.metadata,
            Self::Ai(r) => &mut r.metadata,
        }
    }

    /// Model type implied by the route kind
    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Http(_) => ModelType::Predictive,
            Self::Ai(_) => ModelType::Openai,
        }
    }

    /// First hostname on the route
    pub fn hostname(&self) -> Option<&str> {
        let hostnames = match self {
            Self::Http(r) => &r.spec.hostnames,
            Self::Ai(r) => &r.spec.hostnames,
        };
        hostnames.first().map(String::as_str)
    }

    /// Publish configuration recorded on the route, if readable
    pub fn recorded_config(&self) -> Option<PublishConfig> {
        self.meta()
            .annotations
            .get(ANNOTATION_PUBLISH_CONFIG)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Take `desired` spec and metadata while keeping server-owned state.
    ///
    /// Controller-defaulted spec fields and the resourceVersion of `self`
    /// are preserved so the update is a true in-place edit.
    pub fn with_desired(&self, desired: &PublicRoute) -> PublicRoute {
        let mut next = desired.clone();
        match (&mut next, self) {
            (Self::Http(n), Self::Http(c)) => n.spec.extra = c.spec.extra.clone(),
            (Self::Ai(n), Self::Ai(c)) => n.spec.extra = c.spec.extra.clone(),
            _ => {}
        }
        next.meta_mut().carry_over(self.meta());
        next
    }
}

fn parent_ref(platform: &PlatformConfig) -> ParentRef {
    ParentRef::gateway(
        &platform.gateway.name,
        &platform.gateway.namespace,
        platform.gateway.section_name.clone(),
    )
}

fn predictor_backend(model: &str, namespace: &str, platform: &PlatformConfig) -> BackendRef {
    BackendRef {
        kind: Some("Service".to_string()),
        name: format!("{}-predictor", model),
        namespace: Some(namespace.to_string()),
        port: Some(platform.predictor_port),
    }
}

/// Desired route for a model of the given type
pub fn build_route(
    namespace: &str,
    model: &str,
    model_type: ModelType,
    config: &PublishConfig,
    platform: &PlatformConfig,
) -> Result<PublicRoute> {
    let mut meta = publish_meta(route_name(model), namespace, model, &config.tenant_id);
    let raw = serde_json::to_string(config)
        .map_err(|e| Error::internal(format!("failed to record publish config: {}", e)))?;
    meta.annotations.insert(ANNOTATION_PUBLISH_CONFIG.to_string(), raw);

    let route = match model_type {
        ModelType::Predictive => PublicRoute::Http(HttpRoute::new(
            meta,
            HttpRouteSpec {
                parent_refs: vec![parent_ref(platform)],
                hostnames: vec![config.public_hostname.clone()],
                rules: vec![HttpRouteRule {
                    matches: vec![HttpRouteMatch {
                        path: Some(HttpPathMatch::prefix(format!("/v1/models/{}", model))),
                        headers: vec![],
                    }],
                    backend_refs: vec![predictor_backend(model, namespace, platform)],
                }],
                extra: BTreeMap::new(),
            },
        )),
        ModelType::Openai => PublicRoute::Ai(AiGatewayRoute::new(
            meta,
            AiGatewayRouteSpec {
                parent_refs: vec![parent_ref(platform)],
                hostnames: vec![config.public_hostname.clone()],
                schema: ApiSchema::openai(),
                rules: vec![AiGatewayRouteRule {
                    matches: vec![AiGatewayRouteMatch {
                        headers: vec![HttpHeaderMatch {
                            name: AI_MODEL_HEADER.to_string(),
                            value: model.to_string(),
                            type_: Some("Exact".to_string()),
                        }],
                    }],
                    backend_refs: vec![predictor_backend(model, namespace, platform)],
                }],
                llm_request_costs: vec![LlmRequestCost::total_tokens()],
                extra: BTreeMap::new(),
            },
        )),
    };
    Ok(route)
}

fn per_key_rule(
    header: &str,
    requests: u64,
    unit: &str,
    cost: Option<RateLimitCost>,
) -> RateLimitRule {
    RateLimitRule {
        client_selectors: vec![RateLimitSelector {
            headers: vec![HeaderSelector {
                name: header.to_string(),
                type_: "Distinct".to_string(),
            }],
        }],
        limit: RateLimitValue {
            requests,
            unit: unit.to_string(),
        },
        cost,
    }
}

/// Desired traffic policy for the route of `model`.
///
/// Each limit is its own bucket keyed by the API key header. Token limits
/// charge the total tokens recorded by the AI gateway on the response.
pub fn build_policy(
    namespace: &str,
    model: &str,
    config: &PublishConfig,
    platform: &PlatformConfig,
) -> BackendTrafficPolicy {
    let header = platform.api_key_header.as_str();
    let limits = &config.rate_limiting;
    let token_cost = || Some(RateLimitCost::tokens(&LlmRequestCost::total_tokens().metadata_key));

    let mut rules = Vec::new();
    if let Some(rpm) = limits.requests_per_minute {
        rules.push(per_key_rule(header, rpm, "Minute", None));
    }
    if let Some(rph) = limits.requests_per_hour {
        rules.push(per_key_rule(header, rph, "Hour", None));
    }
    if let Some(tpm) = limits.tokens_per_minute {
        rules.push(per_key_rule(header, tpm, "Minute", token_cost()));
    }
    if let Some(tph) = limits.tokens_per_hour {
        rules.push(per_key_rule(header, tph, "Hour", token_cost()));
    }

    BackendTrafficPolicy::new(
        publish_meta(policy_name(model), namespace, model, &config.tenant_id),
        BackendTrafficPolicySpec {
            target_refs: vec![PolicyTargetRef::http_route(route_name(model))],
            rate_limit: Some(RateLimitSpec {
                type_: "Global".to_string(),
                global: Some(GlobalRateLimit { rules }),
            }),
            extra: BTreeMap::new(),
        },
    )
}

/// Read quotas back from a policy built by [`build_policy`]
pub fn rate_limiting_from_policy(policy: &BackendTrafficPolicy) -> RateLimiting {
    let mut limits = RateLimiting::default();
    let rules = policy
        .spec
        .rate_limit
        .as_ref()
        .and_then(|r| r.global.as_ref())
        .map(|g| g.rules.as_slice())
        .unwrap_or_default();
    for rule in rules {
        let value = Some(rule.limit.requests);
        match (rule.cost.is_some(), rule.limit.unit.as_str()) {
            (false, "Minute") => limits.requests_per_minute = value,
            (false, "Hour") => limits.requests_per_hour = value,
            (true, "Minute") => limits.tokens_per_minute = value,
            (true, "Hour") => limits.tokens_per_hour = value,
            _ => {}
        }
    }
    limits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(limits: RateLimiting) -> PublishConfig {
        PublishConfig {
            tenant_id: "tenant-a".into(),
            public_hostname: "api.example.com".into(),
            rate_limiting: limits,
        }
    }

    #[test]
    fn predictive_models_get_an_http_route() {
        let platform = PlatformConfig::default();
        let route = build_route(
            "tenant-a",
            "iris",
            ModelType::Predictive,
            &config(RateLimiting::default()),
            &platform,
        )
        .unwrap();
        let PublicRoute::Http(http) = &route else {
            panic!("expected HTTPRoute");
        };
        assert_eq!(http.metadata.name, "iris-public");
        assert_eq!(http.metadata.label(LABEL_PUBLISHED), Some("true"));
        assert_eq!(http.metadata.label(LABEL_TENANT), Some("tenant-a"));
        assert_eq!(http.spec.hostnames, ["api.example.com"]);
        assert_eq!(http.spec.rules[0].backend_refs[0].name, "iris-predictor");
        assert_eq!(http.spec.parent_refs[0].name, platform.gateway.name);
        assert_eq!(
            route.recorded_config().unwrap().public_hostname,
            "api.example.com"
        );
    }

    #[test]
    fn schema_compatible_models_get_an_ai_route() {
        let route = build_route(
            "tenant-a",
            "llama",
            ModelType::Openai,
            &config(RateLimiting::default()),
            &PlatformConfig::default(),
        )
        .unwrap();
        let PublicRoute::Ai(ai) = &route else {
            panic!("expected AIGatewayRoute");
        };
        assert_eq!(ai.spec.schema.name, "OpenAI");
        assert_eq!(ai.spec.rules[0].matches[0].headers[0].value, "llama");
        assert_eq!(route.model_type(), ModelType::Openai);
    }

    #[test]
    fn policy_rules_round_trip_to_limits() {
        let limits = RateLimiting {
            requests_per_minute: Some(100),
            requests_per_hour: Some(1000),
            tokens_per_minute: Some(50_000),
            tokens_per_hour: None,
        };
        let policy = build_policy(
            "tenant-a",
            "llama",
            &config(limits.clone()),
            &PlatformConfig::default(),
        );

        assert_eq!(policy.metadata.name, "llama-ratelimit");
        assert_eq!(policy.spec.target_refs[0].name, "llama-public");
        let rules = &policy.spec.rate_limit.as_ref().unwrap().global.as_ref().unwrap().rules;
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].client_selectors[0].headers[0].name, "x-api-key");
        assert!(rules[2].cost.is_some());
        assert_eq!(rate_limiting_from_policy(&policy), limits);
    }

    #[test]
    fn updates_keep_server_state() {
        let platform = PlatformConfig::default();
        let mut current = build_route(
            "tenant-a",
            "iris",
            ModelType::Predictive,
            &config(RateLimiting::default()),
            &platform,
        )
        .unwrap();
        current.meta_mut().resource_version = Some("7".into());
        current.meta_mut().uid = Some("uid-1".into());
        current
            .meta_mut()
            .extra
            .insert("finalizers".into(), serde_json::json!(["gateway.example.com/cleanup"]));
        current.meta_mut().extra.insert(
            "ownerReferences".into(),
            serde_json::json!([{"apiVersion": "v1", "kind": "Namespace", "name": "tenant-a", "uid": "ns-1"}]),
        );
        if let PublicRoute::Http(r) = &mut current {
            r.spec
                .extra
                .insert("timeouts".into(), serde_json::json!({"request": "10s"}));
        }

        let mut new_config = config(RateLimiting::default());
        new_config.public_hostname = "models.example.com".into();
        let desired = build_route("tenant-a", "iris", ModelType::Predictive, &new_config, &platform)
        .unwrap();
        let next = current.with_desired(&desired);

        assert_eq!(next.hostname(), Some("models.example.com"));
        assert_eq!(next.meta().resource_version.as_deref(), Some("7"));
        assert_eq!(next.meta().uid.as_deref(), Some("uid-1"));
        let wire = serde_json::to_value(next.meta()).unwrap();
        assert_eq!(wire["finalizers"][0], "gateway.example.com/cleanup");
        assert_eq!(wire["ownerReferences"][0]["uid"], "ns-1");
        let PublicRoute::Http(r) = next else {
            panic!("expected HTTPRoute");
        };
        assert!(r.spec.extra.contains_key("timeouts"));
    }

    #[test]
    fn external_urls_follow_model_type() {
        assert_eq!(
            external_url("api.example.com", "iris", ModelType::Predictive),
            "https://api.example.com/v1/models/iris"
        );
        assert_eq!(
            external_url("api.example.com", "llama", ModelType::Openai),
            "https://api.example.com/v1/chat/completions"
        );
    }
}
