//! Resource Client: Meridian's only contact with the cluster API
//!
//! Typed get/list/create/update/delete for the five resource families:
//! InferenceService, HTTPRoute, AIGatewayRoute, BackendTrafficPolicy and
//! Secret. Each call addresses exactly one resource (or one list) and
//! returns a typed [`ResourceError`].
//!
//! # Retries
//!
//! Every call is wrapped in a bounded backoff that retries only
//! [`ResourceError::Unavailable`]. `Invalid`, `AlreadyExists`, `NotFound`
//! and `Conflict` are returned immediately. Updates carry the fetched
//! `resourceVersion`, so a concurrent writer surfaces as `Conflict` and the
//! caller re-fetches and reapplies rather than overwriting blindly.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::crd::{AiGatewayRoute, BackendTrafficPolicy, HttpRoute, InferenceService};
use crate::kube_utils::{from_dynamic, to_dynamic, HasApiResource, HasMetadata};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Kind name used in errors for core Secrets
pub const SECRET_KIND: &str = "Secret";

// =============================================================================
// Errors
// =============================================================================

/// Typed failure of a single cluster API call
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ResourceError {
    /// The addressed resource does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// A resource with this name already exists
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// The resourceVersion we sent is stale
    #[error("{kind} '{name}' was modified concurrently")]
    Conflict {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// Schema or validation rejection from the cluster API
    #[error("{kind} rejected by cluster API: {message}")]
    Invalid {
        /// Resource kind
        kind: &'static str,
        /// Rejection message
        message: String,
    },

    /// The cluster API refused Meridian's own credentials (RBAC or auth)
    #[error("cluster API denied access to {kind}: {message}")]
    Denied {
        /// Resource kind
        kind: &'static str,
        /// Denial message
        message: String,
    },

    /// Transient connectivity or server-side failure
    #[error("cluster API unavailable: {0}")]
    Unavailable(String),
}

impl ResourceError {
    /// Only transient failures may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// True for [`ResourceError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classify a kube-rs error
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => match ae.code {
                404 => Self::NotFound {
                    kind,
                    name: name.to_string(),
                },
                409 if ae.reason == "AlreadyExists" => Self::AlreadyExists {
                    kind,
                    name: name.to_string(),
                },
                409 => Self::Conflict {
                    kind,
                    name: name.to_string(),
                },
                401 | 403 => Self::Denied {
                    kind,
                    message: ae.message,
                },
                429 | 500..=599 => {
                    Self::Unavailable(format!("{} '{}': {}", kind, name, ae.message))
                }
                _ => Self::Invalid {
                    kind,
                    message: ae.message,
                },
            },
            kube::Error::SerdeError(e) => Self::Invalid {
                kind,
                message: e.to_string(),
            },
            other => Self::Unavailable(format!("{} '{}': {}", kind, name, other)),
        }
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Which resources a list call returns
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// Namespace to list; None lists across all namespaces
    pub namespace: Option<String>,
    /// Equality label selector (`a=b,c=d`)
    pub labels: Option<String>,
}

impl Selection {
    /// Everything in one namespace
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            labels: None,
        }
    }

    /// Everything in every namespace
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict by label selector
    pub fn with_labels(mut self, selector: impl Into<String>) -> Self {
        self.labels = Some(selector.into());
        self
    }

    fn list_params(&self) -> ListParams {
        match &self.labels {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        }
    }
}

// =============================================================================
// Trait
// =============================================================================

/// Typed CRUD over the cluster resources Meridian manages
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Get an InferenceService
    async fn get_inference_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<InferenceService, ResourceError>;
    /// List InferenceServices
    async fn list_inference_services(
        &self,
        selection: &Selection,
    ) -> Result<Vec<InferenceService>, ResourceError>;
    /// Create an InferenceService
    async fn create_inference_service(
        &self,
        namespace: &str,
        isvc: &InferenceService,
    ) -> Result<InferenceService, ResourceError>;
    /// Replace an InferenceService (optimistic on resourceVersion)
    async fn update_inference_service(
        &self,
        namespace: &str,
        isvc: &InferenceService,
    ) -> Result<InferenceService, ResourceError>;
    /// Delete an InferenceService
    async fn delete_inference_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError>;

    /// Get an HTTPRoute
    async fn get_http_route(&self, namespace: &str, name: &str)
        -> Result<HttpRoute, ResourceError>;
    /// List HTTPRoutes
    async fn list_http_routes(&self, selection: &Selection)
        -> Result<Vec<HttpRoute>, ResourceError>;
    /// Create an HTTPRoute
    async fn create_http_route(
        &self,
        namespace: &str,
        route: &HttpRoute,
    ) -> Result<HttpRoute, ResourceError>;
    /// Replace an HTTPRoute
    async fn update_http_route(
        &self,
        namespace: &str,
        route: &HttpRoute,
    ) -> Result<HttpRoute, ResourceError>;
    /// Delete an HTTPRoute
    async fn delete_http_route(&self, namespace: &str, name: &str) -> Result<(), ResourceError>;

    /// Get an AIGatewayRoute
    async fn get_ai_gateway_route(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<AiGatewayRoute, ResourceError>;
    /// List AIGatewayRoutes
    async fn list_ai_gateway_routes(
        &self,
        selection: &Selection,
    ) -> Result<Vec<AiGatewayRoute>, ResourceError>;
    /// Create an AIGatewayRoute
    async fn create_ai_gateway_route(
        &self,
        namespace: &str,
        route: &AiGatewayRoute,
    ) -> Result<AiGatewayRoute, ResourceError>;
    /// Replace an AIGatewayRoute
    async fn update_ai_gateway_route(
        &self,
        namespace: &str,
        route: &AiGatewayRoute,
    ) -> Result<AiGatewayRoute, ResourceError>;
    /// Delete an AIGatewayRoute
    async fn delete_ai_gateway_route(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError>;

    /// Get a BackendTrafficPolicy
    async fn get_traffic_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BackendTrafficPolicy, ResourceError>;
    /// List BackendTrafficPolicies
    async fn list_traffic_policies(
        &self,
        selection: &Selection,
    ) -> Result<Vec<BackendTrafficPolicy>, ResourceError>;
    /// Create a BackendTrafficPolicy
    async fn create_traffic_policy(
        &self,
        namespace: &str,
        policy: &BackendTrafficPolicy,
    ) -> Result<BackendTrafficPolicy, ResourceError>;
    /// Replace a BackendTrafficPolicy
    async fn update_traffic_policy(
        &self,
        namespace: &str,
        policy: &BackendTrafficPolicy,
    ) -> Result<BackendTrafficPolicy, ResourceError>;
    /// Delete a BackendTrafficPolicy
    async fn delete_traffic_policy(&self, namespace: &str, name: &str)
        -> Result<(), ResourceError>;

    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ResourceError>;
    /// List Secrets
    async fn list_secrets(&self, selection: &Selection) -> Result<Vec<Secret>, ResourceError>;
    /// Create a Secret
    async fn create_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, ResourceError>;
    /// Replace a Secret
    async fn update_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, ResourceError>;
    /// Delete a Secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ResourceError>;
}

// =============================================================================
// kube-rs implementation
// =============================================================================

/// Resource client backed by the cluster API server
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
    retry: RetryPolicy,
}

impl KubeResourceClient {
    /// Wrap a kube client with the given retry policy for transient failures
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    fn dynamic_api<T: HasApiResource>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = T::api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn secret_api(&self, namespace: Option<&str>) -> Api<Secret> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    async fn get_typed<T>(&self, namespace: &str, name: &str) -> Result<T, ResourceError>
    where
        T: DeserializeOwned + HasApiResource,
    {
        let api = self.dynamic_api::<T>(Some(namespace));
        let object = retry_with_backoff(
            &self.retry,
            &format!("get {}", T::KIND),
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                async move {
                    api.get(name)
                        .await
                        .map_err(|e| ResourceError::from_kube(T::KIND, name, e))
                }
            },
        )
        .await?;
        from_dynamic(object)
    }

    async fn list_typed<T>(&self, selection: &Selection) -> Result<Vec<T>, ResourceError>
    where
        T: DeserializeOwned + HasApiResource,
    {
        let api = self.dynamic_api::<T>(selection.namespace.as_deref());
        let params = selection.list_params();
        let list = retry_with_backoff(
            &self.retry,
            &format!("list {}", T::KIND),
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                let params = params.clone();
                async move {
                    api.list(&params)
                        .await
                        .map_err(|e| ResourceError::from_kube(T::KIND, "*", e))
                }
            },
        )
        .await?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn create_typed<T>(&self, namespace: &str, resource: &T) -> Result<T, ResourceError>
    where
        T: Serialize + DeserializeOwned + HasApiResource + HasMetadata,
    {
        let api = self.dynamic_api::<T>(Some(namespace));
        let name = resource.meta().name.as_str();
        let object = to_dynamic(resource)?;
        let created = retry_with_backoff(
            &self.retry,
            &format!("create {}", T::KIND),
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                let object = object.clone();
                async move {
                    api.create(&PostParams::default(), &object)
                        .await
                        .map_err(|e| ResourceError::from_kube(T::KIND, name, e))
                }
            },
        )
        .await?;
        debug!(kind = T::KIND, namespace = %namespace, name = %name, "created resource");
        from_dynamic(created)
    }

    async fn update_typed<T>(&self, namespace: &str, resource: &T) -> Result<T, ResourceError>
    where
        T: Serialize + DeserializeOwned + HasApiResource + HasMetadata,
    {
        let api = self.dynamic_api::<T>(Some(namespace));
        let name = resource.meta().name.as_str();
        let object = to_dynamic(resource)?;
        let updated = retry_with_backoff(
            &self.retry,
            &format!("update {}", T::KIND),
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                let object = object.clone();
                async move {
                    api.replace(name, &PostParams::default(), &object)
                        .await
                        .map_err(|e| ResourceError::from_kube(T::KIND, name, e))
                }
            },
        )
        .await?;
        debug!(kind = T::KIND, namespace = %namespace, name = %name, "updated resource");
        from_dynamic(updated)
    }

    async fn delete_typed<T>(&self, namespace: &str, name: &str) -> Result<(), ResourceError>
    where
        T: HasApiResource,
    {
        let api = self.dynamic_api::<T>(Some(namespace));
        retry_with_backoff(
            &self.retry,
            &format!("delete {}", T::KIND),
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                async move {
                    api.delete(name, &DeleteParams::default())
                        .await
                        .map(|_| ())
                        .map_err(|e| ResourceError::from_kube(T::KIND, name, e))
                }
            },
        )
        .await?;
        debug!(kind = T::KIND, namespace = %namespace, name = %name, "deleted resource");
        Ok(())
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    #[instrument(skip(self))]
    async fn get_inference_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<InferenceService, ResourceError> {
        self.get_typed(namespace, name).await
    }

    async fn list_inference_services(
        &self,
        selection: &Selection,
    ) -> Result<Vec<InferenceService>, ResourceError> {
        self.list_typed(selection).await
    }

    async fn create_inference_service(
        &self,
        namespace: &str,
        isvc: &InferenceService,
    ) -> Result<InferenceService, ResourceError> {
        self.create_typed(namespace, isvc).await
    }

    async fn update_inference_service(
        &self,
        namespace: &str,
        isvc: &InferenceService,
    ) -> Result<InferenceService, ResourceError> {
        self.update_typed(namespace, isvc).await
    }

    async fn delete_inference_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        self.delete_typed::<InferenceService>(namespace, name).await
    }

    async fn get_http_route(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<HttpRoute, ResourceError> {
        self.get_typed(namespace, name).await
    }

    async fn list_http_routes(
        &self,
        selection: &Selection,
    ) -> Result<Vec<HttpRoute>, ResourceError> {
        self.list_typed(selection).await
    }

    async fn create_http_route(
        &self,
        namespace: &str,
        route: &HttpRoute,
    ) -> Result<HttpRoute, ResourceError> {
        self.create_typed(namespace, route).await
    }

    async fn update_http_route(
        &self,
        namespace: &str,
        route: &HttpRoute,
    ) -> Result<HttpRoute, ResourceError> {
        self.update_typed(namespace, route).await
    }

    async fn delete_http_route(&self, namespace: &str, name: &str) -> Result<(), ResourceError> {
        self.delete_typed::<HttpRoute>(namespace, name).await
    }

    async fn get_ai_gateway_route(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<AiGatewayRoute, ResourceError> {
        self.get_typed(namespace, name).await
    }

    async fn list_ai_gateway_routes(
        &self,
        selection: &Selection,
    ) -> Result<Vec<AiGatewayRoute>, ResourceError> {
        self.list_typed(selection).await
    }

    async fn create_ai_gateway_route(
        &self,
        namespace: &str,
        route: &AiGatewayRoute,
    ) -> Result<AiGatewayRoute, ResourceError> {
        self.create_typed(namespace, route).await
    }

    async fn update_ai_gateway_route(
        &self,
        namespace: &str,
        route: &AiGatewayRoute,
    ) -> Result<AiGatewayRoute, ResourceError> {
        self.update_typed(namespace, route).await
    }

    async fn delete_ai_gateway_route(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        self.delete_typed::<AiGatewayRoute>(namespace, name).await
    }

    async fn get_traffic_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BackendTrafficPolicy, ResourceError> {
        self.get_typed(namespace, name).await
    }

    async fn list_traffic_policies(
        &self,
        selection: &Selection,
    ) -> Result<Vec<BackendTrafficPolicy>, ResourceError> {
        self.list_typed(selection).await
    }

    async fn create_traffic_policy(
        &self,
        namespace: &str,
        policy: &BackendTrafficPolicy,
    ) -> Result<BackendTrafficPolicy, ResourceError> {
        self.create_typed(namespace, policy).await
    }

    async fn update_traffic_policy(
        &self,
        namespace: &str,
        policy: &BackendTrafficPolicy,
    ) -> Result<BackendTrafficPolicy, ResourceError> {
        self.update_typed(namespace, policy).await
    }

    async fn delete_traffic_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        self.delete_typed::<BackendTrafficPolicy>(namespace, name)
            .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ResourceError> {
        let api = self.secret_api(Some(namespace));
        retry_with_backoff(
            &self.retry,
            "get Secret",
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                async move {
                    api.get(name)
                        .await
                        .map_err(|e| ResourceError::from_kube(SECRET_KIND, name, e))
                }
            },
        )
        .await
    }

    async fn list_secrets(&self, selection: &Selection) -> Result<Vec<Secret>, ResourceError> {
        let api = self.secret_api(selection.namespace.as_deref());
        let params = selection.list_params();
        let list = retry_with_backoff(
            &self.retry,
            "list Secret",
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                let params = params.clone();
                async move {
                    api.list(&params)
                        .await
                        .map_err(|e| ResourceError::from_kube(SECRET_KIND, "*", e))
                }
            },
        )
        .await?;
        Ok(list.items)
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ResourceError> {
        let api = self.secret_api(Some(namespace));
        let name = secret.metadata.name.clone().unwrap_or_default();
        retry_with_backoff(
            &self.retry,
            "create Secret",
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                let name = name.as_str();
                async move {
                    api.create(&PostParams::default(), secret)
                        .await
                        .map_err(|e| ResourceError::from_kube(SECRET_KIND, name, e))
                }
            },
        )
        .await
    }

    async fn update_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ResourceError> {
        let api = self.secret_api(Some(namespace));
        let name = secret.metadata.name.clone().unwrap_or_default();
        retry_with_backoff(
            &self.retry,
            "update Secret",
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                let name = name.as_str();
                async move {
                    api.replace(name, &PostParams::default(), secret)
                        .await
                        .map_err(|e| ResourceError::from_kube(SECRET_KIND, name, e))
                }
            },
        )
        .await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ResourceError> {
        let api = self.secret_api(Some(namespace));
        retry_with_backoff(
            &self.retry,
            "delete Secret",
            ResourceError::is_retryable,
            || {
                let api = api.clone();
                async move {
                    api.delete(name, &DeleteParams::default())
                        .await
                        .map(|_| ())
                        .map_err(|e| ResourceError::from_kube(SECRET_KIND, name, e))
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{} failure", reason),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(ResourceError::from_kube("HTTPRoute", "r", api_error(404, "NotFound")).is_not_found());
        assert_eq!(
            ResourceError::from_kube("HTTPRoute", "r", api_error(409, "AlreadyExists")),
            ResourceError::AlreadyExists {
                kind: "HTTPRoute",
                name: "r".into()
            }
        );
        assert_eq!(
            ResourceError::from_kube("HTTPRoute", "r", api_error(409, "Conflict")),
            ResourceError::Conflict {
                kind: "HTTPRoute",
                name: "r".into()
            }
        );
        assert!(matches!(
            ResourceError::from_kube("HTTPRoute", "r", api_error(422, "Invalid")),
            ResourceError::Invalid { .. }
        ));
    }

    #[test]
    fn rbac_denials_are_not_caller_errors() {
        for code in [401u16, 403] {
            let err = ResourceError::from_kube("InferenceService", "iris", api_error(code, "Forbidden"));
            assert!(matches!(err, ResourceError::Denied { kind: "InferenceService", .. }));
            assert!(!err.is_retryable());

            let surfaced: crate::Error = err.into();
            assert_eq!(surfaced.kind(), "Internal");
            assert_eq!(surfaced.status_code(), 500);
        }
    }

    #[test]
    fn only_server_side_and_throttling_errors_are_retryable() {
        for code in [429u16, 500, 503, 504] {
            assert!(ResourceError::from_kube("Secret", "s", api_error(code, "x")).is_retryable());
        }
        for code in [400u16, 403, 404, 409, 422] {
            assert!(!ResourceError::from_kube("Secret", "s", api_error(code, "x")).is_retryable());
        }
    }

    #[test]
    fn selection_builders() {
        let sel = Selection::namespace("tenant-a").with_labels("meridian.dev/published=true");
        assert_eq!(sel.namespace.as_deref(), Some("tenant-a"));
        assert_eq!(sel.labels.as_deref(), Some("meridian.dev/published=true"));
        assert_eq!(Selection::all().namespace, None);
    }
}
