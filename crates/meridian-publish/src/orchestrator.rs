//! Publishing orchestration
//!
//! A published model is the triple (route, traffic policy, API key secret)
//! found by naming convention in the tenant namespace. There is no
//! transaction spanning the three, so publish undoes its own steps in
//! reverse order when one fails and reports anything it could not remove as
//! a `PartialFailure`.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, error, info, warn};

use meridian_common::crd::{AiGatewayRoute, BackendTrafficPolicy, HttpRoute};
use meridian_common::identity::ListScope;
use meridian_common::kube_utils::HasApiResource;
use meridian_common::model::ModelType;
use meridian_common::resources::SECRET_KIND;
use meridian_common::retry::{retry_with_backoff, RetryPolicy};
use meridian_common::{
    CallerIdentity, Error, PlatformConfig, ResourceClient, ResourceError, Result, Selection,
    LABEL_MODEL, LABEL_TENANT, PUBLISHED_SELECTOR,
};
use meridian_registry::ModelRegistry;

use crate::api_key::{build_secret, generate_api_key, key_generation, set_api_key};
use crate::manifests::{
    build_policy, build_route, external_url, policy_name, publish_labels,
    rate_limiting_from_policy, route_name, secret_name, PublicRoute,
};
use crate::types::{PublishConfig, PublishState, PublishedModel, ResourceRef, SecretRef};

/// Attempts for read-modify-write when the resourceVersion goes stale
const UPDATE_ATTEMPTS: u32 = 3;

/// One publishing resource, in creation order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Route(ModelType),
    Policy,
    Secret,
}

impl Step {
    fn describe(&self, model: &str) -> String {
        match self {
            Self::Route(ModelType::Predictive) => format!("{}/{}", HttpRoute::KIND, route_name(model)),
            Self::Route(ModelType::Openai) => {
                format!("{}/{}", AiGatewayRoute::KIND, route_name(model))
            }
            Self::Policy => format!("{}/{}", BackendTrafficPolicy::KIND, policy_name(model)),
            Self::Secret => format!("{}/{}", SECRET_KIND, secret_name(model)),
        }
    }
}

/// Cluster state of a published model
struct Published {
    route: PublicRoute,
    policy: BackendTrafficPolicy,
    secret: Secret,
}

fn not_published(namespace: &str, model: &str) -> Error {
    Error::not_found(format!(
        "model '{}' is not published in namespace '{}'",
        model, namespace
    ))
}

/// Creates, updates and removes the resources exposing models externally
pub struct PublishOrchestrator {
    client: Arc<dyn ResourceClient>,
    registry: Arc<ModelRegistry>,
    config: Arc<PlatformConfig>,
    cleanup_retry: RetryPolicy,
}

impl PublishOrchestrator {
    /// Create an orchestrator; cleanup deletions use the default backoff
    pub fn new(
        client: Arc<dyn ResourceClient>,
        registry: Arc<ModelRegistry>,
        config: Arc<PlatformConfig>,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            cleanup_retry: RetryPolicy::default(),
        }
    }

    /// Override the backoff used for rollback and unpublish deletions
    pub fn with_cleanup_retry(mut self, policy: RetryPolicy) -> Self {
        self.cleanup_retry = policy;
        self
    }

    /// Publish a ready model: route, then policy, then API key secret.
    ///
    /// Validation failures never touch the cluster. A failed step rolls back
    /// the steps before it; the plaintext key is only ever returned here.
    pub async fn publish(
        &self,
        caller: &CallerIdentity,
        namespace: &str,
        model: &str,
        config: &PublishConfig,
    ) -> Result<PublishedModel> {
        let descriptor = match self.registry.get(namespace, model).await {
            Ok(descriptor) => descriptor,
            Err(Error::NotFound(_)) => {
                return Err(Error::validation(format!(
                    "model '{}' does not exist in namespace '{}'",
                    model, namespace
                )))
            }
            Err(e) => return Err(e),
        };
        if !descriptor.ready {
            return Err(Error::validation(format!(
                "model '{}' is not ready; only ready models can be published",
                model
            )));
        }
        if !caller.is_admin && caller.tenant_id != config.tenant_id {
            return Err(Error::validation(format!(
                "tenantId '{}' does not match the caller's tenant",
                config.tenant_id
            )));
        }
        let model_type = descriptor.model_type;
        config.validate(namespace, model_type)?;

        if let Some(existing) = self.fetch_route(namespace, model).await? {
            return Err(Error::Conflict(format!(
                "model '{}' already has a public route ({}/{})",
                model,
                existing.kind(),
                existing.meta().name
            )));
        }

        info!(
            model = %model,
            namespace = %namespace,
            model_type = %model_type,
            state = %PublishState::Publishing,
            "publishing model"
        );

        let desired_route = build_route(namespace, model, model_type, config, &self.config)?;
        let api_key = generate_api_key();
        let mut created = Vec::new();
        match self
            .create_resources(namespace, model, &desired_route, config, &api_key, &mut created)
            .await
        {
            Ok(published) => {
                info!(
                    model = %model,
                    namespace = %namespace,
                    state = %PublishState::Published,
                    "model published"
                );
                let mut record = assemble(namespace, model, &published);
                record.api_key = Some(api_key);
                Ok(record)
            }
            Err(e) => Err(self.rollback(namespace, model, created, e.into()).await),
        }
    }

    async fn create_resources(
        &self,
        namespace: &str,
        model: &str,
        desired: &PublicRoute,
        config: &PublishConfig,
        api_key: &str,
        created: &mut Vec<Step>,
    ) -> std::result::Result<Published, ResourceError> {
        let model_type = desired.model_type();
        let route = self.create_route(namespace, desired).await?;
        created.push(Step::Route(model_type));
        debug!(model = %model, kind = route.kind(), "route created");

        let policy = self
            .client
            .create_traffic_policy(
                namespace,
                &build_policy(namespace, model, config, &self.config),
            )
            .await?;
        created.push(Step::Policy);
        debug!(model = %model, "traffic policy created");

        let secret = build_secret(
            &secret_name(model),
            namespace,
            publish_labels(model, &config.tenant_id),
            api_key,
            1,
        );
        let secret = self.client.create_secret(namespace, &secret).await?;
        created.push(Step::Secret);
        debug!(model = %model, "api key secret created");

        Ok(Published {
            route,
            policy,
            secret,
        })
    }

    /// Undo `created` in reverse order, returning the error to report
    async fn rollback(&self, namespace: &str, model: &str, created: Vec<Step>, cause: Error) -> Error {
        warn!(
            model = %model,
            namespace = %namespace,
            error = %cause,
            steps = created.len(),
            "publish failed, rolling back"
        );

        let mut leftover = Vec::new();
        for step in created.into_iter().rev() {
            if !self.ensure_deleted(namespace, model, step).await {
                leftover.push(step.describe(model));
            }
        }

        if leftover.is_empty() {
            info!(
                model = %model,
                namespace = %namespace,
                state = %PublishState::PublishFailed,
                "publish rolled back"
            );
            return cause;
        }
        error!(
            model = %model,
            namespace = %namespace,
            state = %PublishState::PublishFailed,
            resources = ?leftover,
            "rollback incomplete"
        );
        Error::PartialFailure {
            message: format!("publishing '{}' failed: {}", model, cause),
            resources: leftover,
        }
    }

    /// Remove every publishing resource of a model.
    ///
    /// Absent resources count as removed, so repeating the call converges.
    pub async fn unpublish(&self, namespace: &str, model: &str) -> Result<()> {
        info!(
            model = %model,
            namespace = %namespace,
            state = %PublishState::Unpublishing,
            "unpublishing model"
        );

        let steps = [
            Step::Secret,
            Step::Policy,
            Step::Route(ModelType::Openai),
            Step::Route(ModelType::Predictive),
        ];
        let mut leftover = Vec::new();
        for step in steps {
            if !self.ensure_deleted(namespace, model, step).await {
                leftover.push(step.describe(model));
            }
        }

        if !leftover.is_empty() {
            return Err(Error::PartialFailure {
                message: format!("unpublishing '{}' did not complete", model),
                resources: leftover,
            });
        }
        info!(
            model = %model,
            namespace = %namespace,
            state = %PublishState::Unpublished,
            "model unpublished"
        );
        Ok(())
    }

    /// Apply a new configuration to the route and policy in place.
    ///
    /// The API key is kept. If the policy cannot be updated the route is put
    /// back the way it was.
    pub async fn update(
        &self,
        caller: &CallerIdentity,
        namespace: &str,
        model: &str,
        config: &PublishConfig,
    ) -> Result<PublishedModel> {
        let current = self.load(namespace, model).await?;
        let model_type = current.route.model_type();
        if !caller.is_admin && caller.tenant_id != config.tenant_id {
            return Err(Error::validation(format!(
                "tenantId '{}' does not match the caller's tenant",
                config.tenant_id
            )));
        }
        config.validate(namespace, model_type)?;

        info!(
            model = %model,
            namespace = %namespace,
            state = %PublishState::Updating,
            "updating published model"
        );

        let previous = current.route.clone();
        let desired_route = build_route(namespace, model, model_type, config, &self.config)?;
        let route = self
            .apply_route(namespace, model, current.route, &desired_route)
            .await?;

        let desired_policy = build_policy(namespace, model, config, &self.config);
        let policy = match self
            .apply_policy(namespace, model, current.policy, &desired_policy)
            .await
        {
            Ok(policy) => policy,
            Err(cause) => {
                warn!(model = %model, error = %cause, "policy update failed, restoring route");
                if let Err(restore) = self.apply_route(namespace, model, route, &previous).await {
                    error!(model = %model, error = %restore, "route restore failed");
                    return Err(Error::PartialFailure {
                        message: format!(
                            "updating '{}' failed ({}) and the route could not be restored",
                            model, cause
                        ),
                        resources: vec![Step::Route(model_type).describe(model)],
                    });
                }
                return Err(cause);
            }
        };

        info!(
            model = %model,
            namespace = %namespace,
            state = %PublishState::Published,
            "published model updated"
        );
        Ok(assemble(
            namespace,
            model,
            &Published {
                route,
                policy,
                secret: current.secret,
            },
        ))
    }

    /// Replace the API key; route and policy are left untouched
    pub async fn rotate_key(&self, namespace: &str, model: &str) -> Result<PublishedModel> {
        let current = self.load(namespace, model).await?;
        info!(
            model = %model,
            namespace = %namespace,
            state = %PublishState::RotatingKey,
            "rotating api key"
        );

        let api_key = generate_api_key();
        let mut secret = current.secret;
        let mut attempt = 0;
        let rotated = loop {
            attempt += 1;
            let generation = key_generation(&secret) + 1;
            set_api_key(&mut secret, &api_key, generation);
            match self.client.update_secret(namespace, &secret).await {
                Ok(updated) => break updated,
                Err(ResourceError::Conflict { .. }) if attempt < UPDATE_ATTEMPTS => {
                    debug!(model = %model, attempt, "stale secret, re-fetching");
                    secret = self
                        .client
                        .get_secret(namespace, &secret_name(model))
                        .await
                        .map_err(|e| self.published_error(namespace, model, e))?;
                }
                Err(e) => return Err(self.published_error(namespace, model, e)),
            }
        };

        info!(
            model = %model,
            namespace = %namespace,
            generation = key_generation(&rotated),
            state = %PublishState::Published,
            "api key rotated"
        );
        let mut record = assemble(
            namespace,
            model,
            &Published {
                route: current.route,
                policy: current.policy,
                secret: rotated,
            },
        );
        record.api_key = Some(api_key);
        Ok(record)
    }

    /// A published model; NotFound unless route, policy and key all exist
    pub async fn get(&self, namespace: &str, model: &str) -> Result<PublishedModel> {
        let published = self.load(namespace, model).await?;
        Ok(assemble(namespace, model, &published))
    }

    /// Every complete published model in scope, sorted by namespace and name
    pub async fn list(&self, scope: &ListScope) -> Result<Vec<PublishedModel>> {
        let selection = Selection {
            namespace: scope.namespace().map(str::to_string),
            labels: Some(PUBLISHED_SELECTOR.to_string()),
        };

        let mut routes: Vec<PublicRoute> = self
            .client
            .list_http_routes(&selection)
            .await?
            .into_iter()
            .map(PublicRoute::Http)
            .collect();
        routes.extend(
            self.client
                .list_ai_gateway_routes(&selection)
                .await?
                .into_iter()
                .map(PublicRoute::Ai),
        );

        let mut policies: BTreeMap<(String, String), BackendTrafficPolicy> = self
            .client
            .list_traffic_policies(&selection)
            .await?
            .into_iter()
            .map(|p| ((p.metadata.namespace.clone(), p.metadata.name.clone()), p))
            .collect();
        let mut secrets: BTreeMap<(String, String), Secret> = self
            .client
            .list_secrets(&selection)
            .await?
            .into_iter()
            .filter_map(|s| {
                let key = (s.metadata.namespace.clone()?, s.metadata.name.clone()?);
                Some((key, s))
            })
            .collect();

        let mut published = Vec::new();
        for route in routes {
            let namespace = route.meta().namespace.clone();
            let model = match route.meta().label(LABEL_MODEL) {
                Some(model) => model.to_string(),
                None => match route.meta().name.strip_suffix("-public") {
                    Some(model) => model.to_string(),
                    None => continue,
                },
            };
            let policy = policies.remove(&(namespace.clone(), policy_name(&model)));
            let secret = secrets.remove(&(namespace.clone(), secret_name(&model)));
            match (policy, secret) {
                (Some(policy), Some(secret)) => published.push(assemble(
                    &namespace,
                    &model,
                    &Published {
                        route,
                        policy,
                        secret,
                    },
                )),
                _ => debug!(model = %model, namespace = %namespace, "skipping incomplete published model"),
            }
        }

        published.sort_by(|a, b| {
            (a.namespace.as_str(), a.model_name.as_str())
                .cmp(&(b.namespace.as_str(), b.model_name.as_str()))
        });
        Ok(published)
    }

    async fn load(&self, namespace: &str, model: &str) -> Result<Published> {
        let route = self
            .fetch_route(namespace, model)
            .await?
            .ok_or_else(|| not_published(namespace, model))?;
        let policy = self
            .client
            .get_traffic_policy(namespace, &policy_name(model))
            .await
            .map_err(|e| self.published_error(namespace, model, e))?;
        let secret = self
            .client
            .get_secret(namespace, &secret_name(model))
            .await
            .map_err(|e| self.published_error(namespace, model, e))?;
        Ok(Published {
            route,
            policy,
            secret,
        })
    }

    fn published_error(&self, namespace: &str, model: &str, err: ResourceError) -> Error {
        if err.is_not_found() {
            not_published(namespace, model)
        } else {
            err.into()
        }
    }

    /// The route of either kind, if one exists
    async fn fetch_route(&self, namespace: &str, model: &str) -> Result<Option<PublicRoute>> {
        let name = route_name(model);
        match self.client.get_http_route(namespace, &name).await {
            Ok(route) => return Ok(Some(PublicRoute::Http(route))),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        match self.client.get_ai_gateway_route(namespace, &name).await {
            Ok(route) => Ok(Some(PublicRoute::Ai(route))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_route(
        &self,
        namespace: &str,
        route: &PublicRoute,
    ) -> std::result::Result<PublicRoute, ResourceError> {
        match route {
            PublicRoute::Http(r) => self
                .client
                .create_http_route(namespace, r)
                .await
                .map(PublicRoute::Http),
            PublicRoute::Ai(r) => self
                .client
                .create_ai_gateway_route(namespace, r)
                .await
                .map(PublicRoute::Ai),
        }
    }

    async fn update_route(
        &self,
        namespace: &str,
        route: &PublicRoute,
    ) -> std::result::Result<PublicRoute, ResourceError> {
        match route {
            PublicRoute::Http(r) => self
                .client
                .update_http_route(namespace, r)
                .await
                .map(PublicRoute::Http),
            PublicRoute::Ai(r) => self
                .client
                .update_ai_gateway_route(namespace, r)
                .await
                .map(PublicRoute::Ai),
        }
    }

    /// Write `desired` over `current`, re-fetching on a stale resourceVersion
    async fn apply_route(
        &self,
        namespace: &str,
        model: &str,
        mut current: PublicRoute,
        desired: &PublicRoute,
    ) -> Result<PublicRoute> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.update_route(namespace, &current.with_desired(desired)).await {
                Ok(updated) => return Ok(updated),
                Err(ResourceError::Conflict { .. }) if attempt < UPDATE_ATTEMPTS => {
                    debug!(model = %model, attempt, "stale route, re-fetching");
                    current = self
                        .fetch_route(namespace, model)
                        .await?
                        .ok_or_else(|| not_published(namespace, model))?;
                }
                Err(e) => return Err(self.published_error(namespace, model, e)),
            }
        }
    }

    async fn apply_policy(
        &self,
        namespace: &str,
        model: &str,
        mut current: BackendTrafficPolicy,
        desired: &BackendTrafficPolicy,
    ) -> Result<BackendTrafficPolicy> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut next = desired.clone();
            next.spec.extra = current.spec.extra.clone();
            next.metadata.carry_over(&current.metadata);

            match self.client.update_traffic_policy(namespace, &next).await {
                Ok(updated) => return Ok(updated),
                Err(ResourceError::Conflict { .. }) if attempt < UPDATE_ATTEMPTS => {
                    debug!(model = %model, attempt, "stale traffic policy, re-fetching");
                    current = self
                        .client
                        .get_traffic_policy(namespace, &policy_name(model))
                        .await
                        .map_err(|e| self.published_error(namespace, model, e))?;
                }
                Err(e) => return Err(self.published_error(namespace, model, e)),
            }
        }
    }

    async fn delete_step(
        &self,
        namespace: &str,
        model: &str,
        step: Step,
    ) -> std::result::Result<(), ResourceError> {
        match step {
            Step::Route(ModelType::Predictive) => {
                self.client
                    .delete_http_route(namespace, &route_name(model))
                    .await
            }
            Step::Route(ModelType::Openai) => {
                self.client
                    .delete_ai_gateway_route(namespace, &route_name(model))
                    .await
            }
            Step::Policy => {
                self.client
                    .delete_traffic_policy(namespace, &policy_name(model))
                    .await
            }
            Step::Secret => self.client.delete_secret(namespace, &secret_name(model)).await,
        }
    }

    /// Delete one resource with bounded retries; absent counts as deleted
    async fn ensure_deleted(&self, namespace: &str, model: &str, step: Step) -> bool {
        let what = step.describe(model);
        let result = retry_with_backoff(
            &self.cleanup_retry,
            &format!("delete {}", what),
            ResourceError::is_retryable,
            || self.delete_step(namespace, model, step),
        )
        .await;
        match result {
            Ok(()) => {
                debug!(resource = %what, namespace = %namespace, "deleted");
                true
            }
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!(resource = %what, namespace = %namespace, error = %e, "delete failed");
                false
            }
        }
    }
}

fn assemble(namespace: &str, model: &str, published: &Published) -> PublishedModel {
    let Published {
        route,
        policy,
        secret,
    } = published;
    let recorded = route.recorded_config();
    let tenant_id = route
        .meta()
        .label(LABEL_TENANT)
        .map(str::to_string)
        .or_else(|| recorded.as_ref().map(|c| c.tenant_id.clone()))
        .unwrap_or_else(|| namespace.to_string());
    let public_hostname = route
        .hostname()
        .map(str::to_string)
        .or_else(|| recorded.map(|c| c.public_hostname))
        .unwrap_or_default();
    let model_type = route.model_type();

    PublishedModel {
        model_name: model.to_string(),
        namespace: namespace.to_string(),
        external_url: external_url(&public_hostname, model, model_type),
        tenant_id,
        public_hostname,
        model_type,
        rate_limiting: rate_limiting_from_policy(policy),
        route: ResourceRef {
            kind: route.kind().to_string(),
            name: route.meta().name.clone(),
            uid: route.meta().uid.clone(),
        },
        policy: ResourceRef {
            kind: BackendTrafficPolicy::KIND.to_string(),
            name: policy.metadata.name.clone(),
            uid: policy.metadata.uid.clone(),
        },
        api_key_secret: SecretRef {
            kind: SECRET_KIND.to_string(),
            name: secret.metadata.name.clone().unwrap_or_else(|| secret_name(model)),
            uid: secret.metadata.uid.clone(),
            generation: key_generation(secret),
        },
        api_key: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use meridian_common::resources::MockResourceClient;
    use meridian_common::testing::{Family, InMemoryResourceClient, Op};
    use meridian_registry::logs::MockLogSource;
    use meridian_registry::CreateModelRequest;

    use crate::api_key::stored_api_key;
    use crate::types::RateLimiting;

    fn tenant(id: &str) -> CallerIdentity {
        CallerIdentity {
            subject: format!("user@{}", id),
            tenant_id: id.to_string(),
            is_admin: false,
        }
    }

    fn config(rpm: u64) -> PublishConfig {
        PublishConfig {
            tenant_id: "tenant-a".into(),
            public_hostname: "api.example.com".into(),
            rate_limiting: RateLimiting {
                requests_per_minute: Some(rpm),
                ..Default::default()
            },
        }
    }

    fn unavailable() -> ResourceError {
        ResourceError::Unavailable("etcd leader election".into())
    }

    struct Harness {
        cluster: Arc<InMemoryResourceClient>,
        registry: Arc<ModelRegistry>,
        orchestrator: PublishOrchestrator,
    }

    fn harness() -> Harness {
        let config = Arc::new(PlatformConfig::default());
        let cluster = Arc::new(InMemoryResourceClient::new());
        let registry = Arc::new(ModelRegistry::new(
            cluster.clone(),
            Arc::new(MockLogSource::new()),
            config.clone(),
        ));
        let orchestrator = PublishOrchestrator::new(cluster.clone(), registry.clone(), config)
            .with_cleanup_retry(RetryPolicy::immediate(3));
        Harness {
            cluster,
            registry,
            orchestrator,
        }
    }

    impl Harness {
        async fn deploy(&self, name: &str, model_type: ModelType, ready: bool) {
            self.registry
                .create(
                    "tenant-a",
                    &CreateModelRequest {
                        name: name.into(),
                        framework: "sklearn".into(),
                        storage_uri: format!("s3://bucket/{}", name),
                        model_type: Some(model_type),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            if ready {
                self.cluster.set_ready(
                    "tenant-a",
                    name,
                    &format!("http://{}.tenant-a.svc.cluster.local", name),
                );
            }
        }

        fn publishing_resources(&self) -> usize {
            self.cluster.http_routes().len()
                + self.cluster.ai_gateway_routes().len()
                + self.cluster.traffic_policies().len()
                + self.cluster.secrets().len()
        }
    }

    #[tokio::test]
    async fn publish_creates_route_policy_and_key() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;

        let published = h
            .orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap();

        assert_eq!(published.external_url, "https://api.example.com/v1/models/iris");
        assert_eq!(published.route.kind, "HTTPRoute");
        assert_eq!(published.rate_limiting.requests_per_minute, Some(100));
        assert_eq!(published.api_key_secret.generation, 1);
        let key = published.api_key.clone().unwrap();
        assert_eq!(stored_api_key(&h.cluster.secrets()[0]), Some(key));

        let fetched = h.orchestrator.get("tenant-a", "iris").await.unwrap();
        assert_eq!(fetched.api_key, None);
        assert_eq!(fetched.route, published.route);
    }

    #[tokio::test]
    async fn schema_compatible_models_get_token_limits() {
        let h = harness();
        h.deploy("llama", ModelType::Openai, true).await;
        let mut cfg = config(60);
        cfg.rate_limiting.tokens_per_minute = Some(10_000);

        let published = h
            .orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "llama", &cfg)
            .await
            .unwrap();

        assert_eq!(published.route.kind, "AIGatewayRoute");
        assert_eq!(
            published.external_url,
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(published.rate_limiting.tokens_per_minute, Some(10_000));
        assert_eq!(h.cluster.http_routes().len(), 0);
    }

    #[tokio::test]
    async fn unready_model_is_rejected_without_touching_the_cluster() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, false).await;
        let before = h.cluster.mutations();

        let err = h
            .orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(h.cluster.mutations(), before);
        assert_eq!(h.publishing_resources(), 0);
    }

    #[tokio::test]
    async fn invalid_requests_create_nothing() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;

        let mut tokens = config(100);
        tokens.rate_limiting.tokens_per_hour = Some(1_000);
        let missing = h
            .orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "ghost", &config(100))
            .await
            .unwrap_err();
        let wrong_tenant = h
            .orchestrator
            .publish(&tenant("tenant-b"), "tenant-a", "iris", &config(100))
            .await
            .unwrap_err();
        let token_limits = h
            .orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &tokens)
            .await
            .unwrap_err();

        for err in [missing, wrong_tenant, token_limits] {
            assert_eq!(err.kind(), "ValidationError", "{err}");
        }
        assert_eq!(h.publishing_resources(), 0);
    }

    #[tokio::test]
    async fn admins_may_publish_for_any_tenant() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        let admin = CallerIdentity {
            subject: "root".into(),
            tenant_id: "platform".into(),
            is_admin: true,
        };

        let published = h
            .orchestrator
            .publish(&admin, "tenant-a", "iris", &config(100))
            .await
            .unwrap();
        assert_eq!(published.tenant_id, "tenant-a");
    }

    #[tokio::test]
    async fn second_publish_conflicts() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        let caller = tenant("tenant-a");
        h.orchestrator
            .publish(&caller, "tenant-a", "iris", &config(100))
            .await
            .unwrap();

        let err = h
            .orchestrator
            .publish(&caller, "tenant-a", "iris", &config(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(h.cluster.http_routes().len(), 1);
    }

    /// Story: the policy step fails, the route from this attempt is removed
    /// and the model reads as not published
    #[tokio::test]
    async fn story_policy_failure_rolls_back_the_route() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        h.cluster.fail(
            Op::Create,
            Family::TrafficPolicy,
            ResourceError::Invalid {
                kind: "BackendTrafficPolicy",
                message: "admission webhook denied the request".into(),
            },
        );

        let err = h
            .orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(h.cluster.calls(Op::Delete, Family::HttpRoute), 1);
        assert_eq!(h.publishing_resources(), 0);
        let lookup = h.orchestrator.get("tenant-a", "iris").await.unwrap_err();
        assert!(matches!(lookup, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn secret_failure_rolls_back_in_reverse_order() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        h.cluster
            .fail(Op::Create, Family::Secret, unavailable());

        h.orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap_err();

        assert_eq!(h.cluster.calls(Op::Delete, Family::TrafficPolicy), 1);
        assert_eq!(h.cluster.calls(Op::Delete, Family::HttpRoute), 1);
        assert_eq!(h.publishing_resources(), 0);
    }

    #[tokio::test]
    async fn rollback_retries_transient_delete_failures() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        h.cluster.fail(Op::Create, Family::TrafficPolicy, unavailable());
        h.cluster
            .fail_times(Op::Delete, Family::HttpRoute, unavailable(), 2);

        let err = h
            .orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ClusterUnavailable(_)));
        assert_eq!(h.cluster.calls(Op::Delete, Family::HttpRoute), 3);
        assert!(h.cluster.http_routes().is_empty());
    }

    #[tokio::test]
    async fn incomplete_rollback_names_leftover_resources() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        h.cluster.fail(Op::Create, Family::Secret, unavailable());
        h.cluster.fail(Op::Delete, Family::HttpRoute, unavailable());

        let err = h
            .orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap_err();

        match err {
            Error::PartialFailure { resources, .. } => {
                assert_eq!(resources, ["HTTPRoute/iris-public"]);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert!(h.cluster.traffic_policies().is_empty());
    }

    #[tokio::test]
    async fn unpublish_is_idempotent() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        h.orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap();

        h.orchestrator.unpublish("tenant-a", "iris").await.unwrap();
        h.orchestrator.unpublish("tenant-a", "iris").await.unwrap();
        h.orchestrator.unpublish("tenant-a", "never-published").await.unwrap();

        assert_eq!(h.publishing_resources(), 0);
        assert_eq!(h.cluster.inference_services().len(), 1);
    }

    #[tokio::test]
    async fn unpublish_reports_what_it_could_not_remove() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        h.orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap();
        h.cluster.fail(Op::Delete, Family::TrafficPolicy, unavailable());

        let err = h.orchestrator.unpublish("tenant-a", "iris").await.unwrap_err();
        match err {
            Error::PartialFailure { resources, .. } => {
                assert_eq!(resources, ["BackendTrafficPolicy/iris-ratelimit"]);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert!(h.cluster.secrets().is_empty());
        assert!(h.cluster.http_routes().is_empty());
    }

    #[tokio::test]
    async fn rotation_replaces_only_the_key() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        let published = h
            .orchestrator
            .publish(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap();

        let rotated = h.orchestrator.rotate_key("tenant-a", "iris").await.unwrap();

        assert_ne!(rotated.api_key, published.api_key);
        assert_eq!(rotated.api_key_secret.generation, 2);
        assert_eq!(rotated.route.uid, published.route.uid);
        assert_eq!(rotated.policy.uid, published.policy.uid);
        assert_eq!(h.cluster.calls(Op::Update, Family::HttpRoute), 0);
        assert_eq!(h.cluster.calls(Op::Update, Family::TrafficPolicy), 0);
        assert_eq!(stored_api_key(&h.cluster.secrets()[0]), rotated.api_key);
    }

    #[tokio::test]
    async fn rotating_an_unpublished_model_is_not_found() {
        let h = harness();
        let err = h.orchestrator.rotate_key("tenant-a", "iris").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn update_changes_route_and_policy_in_place() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        let caller = tenant("tenant-a");
        let published = h
            .orchestrator
            .publish(&caller, "tenant-a", "iris", &config(100))
            .await
            .unwrap();

        let mut next = config(500);
        next.public_hostname = "models.example.com".into();
        let updated = h
            .orchestrator
            .update(&caller, "tenant-a", "iris", &next)
            .await
            .unwrap();

        assert_eq!(updated.public_hostname, "models.example.com");
        assert_eq!(updated.rate_limiting.requests_per_minute, Some(500));
        assert_eq!(updated.route.uid, published.route.uid);
        assert_eq!(updated.api_key_secret.generation, 1);
        assert_eq!(updated.api_key, None);
        assert_eq!(h.cluster.calls(Op::Delete, Family::HttpRoute), 0);
        assert_eq!(h.cluster.calls(Op::Update, Family::Secret), 0);
    }

    #[tokio::test]
    async fn failed_policy_update_restores_the_route() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        let caller = tenant("tenant-a");
        h.orchestrator
            .publish(&caller, "tenant-a", "iris", &config(100))
            .await
            .unwrap();
        h.cluster.fail(
            Op::Update,
            Family::TrafficPolicy,
            ResourceError::Invalid {
                kind: "BackendTrafficPolicy",
                message: "rejected".into(),
            },
        );

        let mut next = config(500);
        next.public_hostname = "models.example.com".into();
        h.orchestrator
            .update(&caller, "tenant-a", "iris", &next)
            .await
            .unwrap_err();

        assert_eq!(h.cluster.calls(Op::Update, Family::HttpRoute), 2);
        h.cluster.clear_failures();
        let current = h.orchestrator.get("tenant-a", "iris").await.unwrap();
        assert_eq!(current.public_hostname, "api.example.com");
        assert_eq!(current.rate_limiting.requests_per_minute, Some(100));
    }

    #[tokio::test]
    async fn update_of_unpublished_model_is_not_found() {
        let h = harness();
        let err = h
            .orchestrator
            .update(&tenant("tenant-a"), "tenant-a", "iris", &config(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn list_joins_complete_triples() {
        let h = harness();
        h.deploy("iris", ModelType::Predictive, true).await;
        h.deploy("llama", ModelType::Openai, true).await;
        let caller = tenant("tenant-a");
        for model in ["llama", "iris"] {
            h.orchestrator
                .publish(&caller, "tenant-a", model, &config(100))
                .await
                .unwrap();
        }

        let listed = h
            .orchestrator
            .list(&ListScope::Namespace("tenant-a".into()))
            .await
            .unwrap();
        let names: Vec<_> = listed.iter().map(|p| p.model_name.as_str()).collect();
        assert_eq!(names, ["iris", "llama"]);
        assert!(listed.iter().all(|p| p.api_key.is_none()));

        let other = h
            .orchestrator
            .list(&ListScope::Namespace("tenant-b".into()))
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    /// Story: the policy update fails and putting the route back fails too,
    /// so the caller is told exactly which route needs attention
    #[tokio::test]
    async fn story_unrestorable_route_is_a_partial_failure() {
        let config_arc = Arc::new(PlatformConfig::default());
        let seed = build_route(
            "tenant-a",
            "iris",
            ModelType::Predictive,
            &config(100),
            &config_arc,
        )
        .unwrap();
        let PublicRoute::Http(mut route) = seed else {
            panic!("expected HTTPRoute");
        };
        route.metadata.resource_version = Some("1".into());
        let policy = build_policy("tenant-a", "iris", &config(100), &config_arc);
        let secret = build_secret("iris-api-key", "tenant-a", BTreeMap::new(), "mk_old", 1);

        let mut mock = MockResourceClient::new();
        let stored = route.clone();
        mock.expect_get_http_route()
            .returning(move |_, _| Ok(stored.clone()));
        mock.expect_get_traffic_policy()
            .returning(move |_, _| Ok(policy.clone()));
        mock.expect_get_secret()
            .returning(move |_, _| Ok(secret.clone()));
        let route_updates = Arc::new(AtomicU32::new(0));
        let counter = route_updates.clone();
        mock.expect_update_http_route().returning(move |_, r| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(r.clone())
            } else {
                Err(ResourceError::Unavailable("connection reset".into()))
            }
        });
        mock.expect_update_traffic_policy().returning(|_, _| {
            Err(ResourceError::Invalid {
                kind: "BackendTrafficPolicy",
                message: "rejected".into(),
            })
        });

        let client: Arc<dyn ResourceClient> = Arc::new(mock);
        let registry = Arc::new(ModelRegistry::new(
            client.clone(),
            Arc::new(MockLogSource::new()),
            config_arc.clone(),
        ));
        let orchestrator = PublishOrchestrator::new(client, registry, config_arc);

        let err = orchestrator
            .update(&tenant("tenant-a"), "tenant-a", "iris", &config(500))
            .await
            .unwrap_err();

        match err {
            Error::PartialFailure { resources, .. } => {
                assert_eq!(resources, ["HTTPRoute/iris-public"]);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert_eq!(route_updates.load(Ordering::SeqCst), 2);
    }
}
