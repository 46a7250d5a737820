//! Model registry operations
//!
//! Namespace authorization happens before these are called; every method
//! here acts on exactly the namespace it is given.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use meridian_common::identity::ListScope;
use meridian_common::model::Framework;
use meridian_common::{Error, PlatformConfig, ResourceClient, ResourceError, Result, Selection};

use crate::adapter::{
    apply_update, build_inference_service, descriptor_from, CreateModelRequest, ModelDescriptor,
    UpdateModelRequest,
};
use crate::logs::{clamp_lines, LogSource, PodLogs};

/// Attempts for read-modify-write when the resourceVersion goes stale
const UPDATE_ATTEMPTS: u32 = 3;

/// Recent logs of a model's predictor pods
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelLogs {
    /// Model name
    pub model_name: String,
    /// Tenant namespace
    pub namespace: String,
    /// Lines requested per pod
    pub lines: u32,
    /// Per-pod log lines
    pub pods: Vec<PodLogs>,
}

/// Model lifecycle over the cluster's InferenceServices
pub struct ModelRegistry {
    client: Arc<dyn ResourceClient>,
    logs: Arc<dyn LogSource>,
    config: Arc<PlatformConfig>,
}

fn model_error(namespace: &str, name: &str, err: ResourceError) -> Error {
    match err {
        ResourceError::NotFound { .. } => Error::not_found(format!(
            "model '{}' not found in namespace '{}'",
            name, namespace
        )),
        ResourceError::AlreadyExists { .. } => Error::Conflict(format!(
            "model '{}' already exists in namespace '{}'",
            name, namespace
        )),
        other => other.into(),
    }
}

impl ModelRegistry {
    /// Create a registry
    pub fn new(
        client: Arc<dyn ResourceClient>,
        logs: Arc<dyn LogSource>,
        config: Arc<PlatformConfig>,
    ) -> Self {
        Self {
            client,
            logs,
            config,
        }
    }

    /// List models in one namespace or, for admins, all namespaces
    pub async fn list(&self, scope: &ListScope) -> Result<Vec<ModelDescriptor>> {
        let selection = Selection {
            namespace: scope.namespace().map(str::to_string),
            labels: None,
        };
        let mut models: Vec<ModelDescriptor> = self
            .client
            .list_inference_services(&selection)
            .await?
            .iter()
            .map(descriptor_from)
            .collect();
        models.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(models)
    }

    /// Get one model
    pub async fn get(&self, namespace: &str, name: &str) -> Result<ModelDescriptor> {
        let isvc = self
            .client
            .get_inference_service(namespace, name)
            .await
            .map_err(|e| model_error(namespace, name, e))?;
        Ok(descriptor_from(&isvc))
    }

    /// Validate and deploy a new model
    pub async fn create(
        &self,
        namespace: &str,
        request: &CreateModelRequest,
    ) -> Result<ModelDescriptor> {
        let isvc = build_inference_service(namespace, request, &self.config)?;

        match self.client.get_inference_service(namespace, &request.name).await {
            Ok(_) => {
                return Err(Error::Conflict(format!(
                    "model '{}' already exists in namespace '{}'",
                    request.name, namespace
                )))
            }
            Err(ResourceError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let created = self
            .client
            .create_inference_service(namespace, &isvc)
            .await
            .map_err(|e| model_error(namespace, &request.name, e))?;

        info!(
            model = %request.name,
            namespace = %namespace,
            framework = %request.framework,
            "model created"
        );
        Ok(descriptor_from(&created))
    }

    /// Merge a partial update into a model, re-fetching on concurrent edits
    pub async fn update(
        &self,
        namespace: &str,
        name: &str,
        request: &UpdateModelRequest,
    ) -> Result<ModelDescriptor> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut isvc = self
                .client
                .get_inference_service(namespace, name)
                .await
                .map_err(|e| model_error(namespace, name, e))?;
            apply_update(&mut isvc, request, &self.config)?;

            match self.client.update_inference_service(namespace, &isvc).await {
                Ok(updated) => {
                    info!(model = %name, namespace = %namespace, "model updated");
                    return Ok(descriptor_from(&updated));
                }
                Err(ResourceError::Conflict { .. }) if attempt < UPDATE_ATTEMPTS => {
                    debug!(model = %name, namespace = %namespace, attempt, "stale resourceVersion, re-fetching");
                }
                Err(ResourceError::Conflict { .. }) => {
                    warn!(model = %name, namespace = %namespace, "model kept changing during update");
                    return Err(Error::Conflict(format!(
                        "model '{}' was modified concurrently; retry the update",
                        name
                    )));
                }
                Err(e) => return Err(model_error(namespace, name, e)),
            }
        }
    }

    /// Delete a model; a missing model is reported as NotFound
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.client
            .delete_inference_service(namespace, name)
            .await
            .map_err(|e| model_error(namespace, name, e))?;
        info!(model = %name, namespace = %namespace, "model deleted");
        Ok(())
    }

    /// Frameworks tenants may deploy
    pub fn frameworks(&self) -> Vec<Framework> {
        self.config.supported_frameworks.clone()
    }

    /// Recent predictor logs of an existing model
    pub async fn logs(&self, namespace: &str, name: &str, lines: Option<u32>) -> Result<ModelLogs> {
        self.get(namespace, name).await?;
        let lines = clamp_lines(lines);
        let pods = self.logs.tail(namespace, name, lines).await?;
        Ok(ModelLogs {
            model_name: name.to_string(),
            namespace: namespace.to_string(),
            lines,
            pods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::MockLogSource;
    use meridian_common::resources::MockResourceClient;
    use meridian_common::testing::{Family, InMemoryResourceClient, Op};

    fn iris() -> CreateModelRequest {
        CreateModelRequest {
            name: "iris".into(),
            framework: "sklearn".into(),
            storage_uri: "s3://bucket/iris".into(),
            ..Default::default()
        }
    }

    fn registry(client: Arc<dyn ResourceClient>) -> ModelRegistry {
        ModelRegistry::new(
            client,
            Arc::new(MockLogSource::new()),
            Arc::new(PlatformConfig::default()),
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let cluster = Arc::new(InMemoryResourceClient::new());
        let registry = registry(cluster.clone());

        let request = CreateModelRequest {
            min_replicas: Some(1),
            max_replicas: Some(3),
            ..iris()
        };
        registry.create("tenant-a", &request).await.unwrap();
        let model = registry.get("tenant-a", "iris").await.unwrap();

        assert_eq!(model.framework, "sklearn");
        assert_eq!(model.storage_uri, "s3://bucket/iris");
        assert_eq!((model.min_replicas, model.max_replicas), (1, 3));
        assert!(!model.ready);
    }

    #[tokio::test]
    async fn ready_once_the_resource_reports_it() {
        let cluster = Arc::new(InMemoryResourceClient::new());
        let registry = registry(cluster.clone());
        registry.create("tenant-a", &iris()).await.unwrap();

        cluster.set_ready("tenant-a", "iris", "http://iris.tenant-a.example.com");
        let model = registry.get("tenant-a", "iris").await.unwrap();
        assert!(model.ready);
        assert_eq!(
            model.external_url.as_deref(),
            Some("http://iris.tenant-a.example.com")
        );
    }

    #[tokio::test]
    async fn invalid_bounds_never_reach_the_cluster() {
        // No expectations: any client call panics
        let registry = registry(Arc::new(MockResourceClient::new()));
        let err = registry
            .create(
                "tenant-a",
                &CreateModelRequest {
                    min_replicas: Some(4),
                    max_replicas: Some(1),
                    ..iris()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[tokio::test]
    async fn update_with_invalid_bounds_does_not_mutate() {
        let cluster = Arc::new(InMemoryResourceClient::new());
        let registry = registry(cluster.clone());
        registry.create("tenant-a", &iris()).await.unwrap();
        let mutations = cluster.mutations();

        let err = registry
            .update(
                "tenant-a",
                "iris",
                &UpdateModelRequest {
                    min_replicas: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(cluster.mutations(), mutations);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let cluster = Arc::new(InMemoryResourceClient::new());
        let registry = registry(cluster.clone());
        registry.create("tenant-a", &iris()).await.unwrap();

        let err = registry.create("tenant-a", &iris()).await.unwrap_err();
        assert_eq!(err.kind(), "Conflict");
        assert_eq!(cluster.calls(Op::Create, Family::InferenceService), 1);
    }

    #[tokio::test]
    async fn update_retries_on_stale_resource_version() {
        let cluster = Arc::new(InMemoryResourceClient::new());
        let registry = registry(cluster.clone());
        registry.create("tenant-a", &iris()).await.unwrap();
        cluster.fail_times(
            Op::Update,
            Family::InferenceService,
            ResourceError::Conflict {
                kind: "InferenceService",
                name: "iris".into(),
            },
            1,
        );

        let model = registry
            .update(
                "tenant-a",
                "iris",
                &UpdateModelRequest {
                    max_replicas: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(model.max_replicas, 5);
        assert_eq!(cluster.calls(Op::Update, Family::InferenceService), 2);
    }

    #[tokio::test]
    async fn update_keeps_metadata_and_foreign_frameworks() {
        let cluster = Arc::new(InMemoryResourceClient::new());
        let registry = registry(cluster.clone());

        let config = PlatformConfig::default();
        let mut isvc =
            crate::adapter::build_inference_service("tenant-a", &iris(), &config).unwrap();
        isvc.metadata.extra.insert(
            "finalizers".into(),
            serde_json::json!(["inferenceservice.finalizers"]),
        );
        isvc.metadata.extra.insert(
            "ownerReferences".into(),
            serde_json::json!([{"apiVersion": "v1", "kind": "ConfigMap", "name": "owner", "uid": "u-1"}]),
        );
        if let Some(model) = isvc.spec.predictor.model.as_mut() {
            model.model_format.name = "vllm".into();
        }
        cluster.insert_inference_service(isvc);

        let model = registry
            .update(
                "tenant-a",
                "iris",
                &UpdateModelRequest {
                    max_replicas: Some(4),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(model.max_replicas, 4);
        assert_eq!(model.framework, "vllm");

        let stored = &cluster.inference_services()[0];
        assert_eq!(
            stored.metadata.extra["finalizers"],
            serde_json::json!(["inferenceservice.finalizers"])
        );
        assert_eq!(stored.metadata.extra["ownerReferences"][0]["uid"], "u-1");
    }

    #[tokio::test]
    async fn update_gives_up_after_repeated_conflicts() {
        let cluster = Arc::new(InMemoryResourceClient::new());
        let registry = registry(cluster.clone());
        registry.create("tenant-a", &iris()).await.unwrap();
        cluster.fail(
            Op::Update,
            Family::InferenceService,
            ResourceError::Conflict {
                kind: "InferenceService",
                name: "iris".into(),
            },
        );

        let err = registry
            .update("tenant-a", "iris", &UpdateModelRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Conflict");
        assert_eq!(cluster.calls(Op::Update, Family::InferenceService), 3);
    }

    #[tokio::test]
    async fn delete_surfaces_not_found() {
        let registry = registry(Arc::new(InMemoryResourceClient::new()));
        let err = registry.delete("tenant-a", "ghost").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn list_is_scoped_and_sorted() {
        let cluster = Arc::new(InMemoryResourceClient::new());
        let registry = registry(cluster.clone());
        for (ns, name) in [("tenant-b", "wine"), ("tenant-a", "iris"), ("tenant-a", "digits")] {
            let request = CreateModelRequest {
                name: name.into(),
                ..iris()
            };
            registry.create(ns, &request).await.unwrap();
        }

        let tenant_a = registry
            .list(&ListScope::Namespace("tenant-a".into()))
            .await
            .unwrap();
        let names: Vec<_> = tenant_a.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["digits", "iris"]);

        let all = registry.list(&ListScope::All).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn logs_require_an_existing_model() {
        let cluster = Arc::new(InMemoryResourceClient::new());
        let mut logs = MockLogSource::new();
        logs.expect_tail()
            .withf(|ns, model, lines| ns == "tenant-a" && model == "iris" && *lines == 100)
            .times(1)
            .returning(|_, _, _| {
                Ok(vec![PodLogs {
                    pod: "iris-predictor-0".into(),
                    lines: vec!["started".into()],
                }])
            });
        let registry = ModelRegistry::new(
            cluster.clone(),
            Arc::new(logs),
            Arc::new(PlatformConfig::default()),
        );

        assert_eq!(
            registry.logs("tenant-a", "iris", None).await.unwrap_err().kind(),
            "NotFound"
        );

        registry.create("tenant-a", &iris()).await.unwrap();
        let result = registry.logs("tenant-a", "iris", None).await.unwrap();
        assert_eq!(result.pods[0].lines, ["started"]);
    }
}
