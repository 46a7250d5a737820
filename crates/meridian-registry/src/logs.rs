//! Predictor log retrieval
//!
//! Logs come from the pods KServe labels with the InferenceService name.
//! Each pod is read independently; a pod whose container has not started
//! yet contributes an empty entry instead of failing the whole request.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use meridian_common::{Error, ResourceError, Result, LABEL_KSERVE_ISVC};

/// Container KServe runs the model server in
pub const PREDICTOR_CONTAINER: &str = "kserve-container";

/// Lines returned when the caller does not ask for a count
pub const DEFAULT_LOG_LINES: u32 = 100;

/// Upper bound on lines per pod
pub const MAX_LOG_LINES: u32 = 5000;

/// Clamp a requested line count into `1..=MAX_LOG_LINES`
pub fn clamp_lines(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_LOG_LINES)
        .clamp(1, MAX_LOG_LINES)
}

/// Recent log lines of one predictor pod
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodLogs {
    /// Pod name
    pub pod: String,
    /// Log lines, oldest first
    pub lines: Vec<String>,
}

/// Source of predictor logs
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Tail `lines` lines from every predictor pod of a model
    async fn tail(&self, namespace: &str, model: &str, lines: u32) -> Result<Vec<PodLogs>>;
}

/// Reads logs through the cluster pod log API
pub struct PodLogSource {
    client: Client,
}

impl PodLogSource {
    /// Create a log source on the given cluster client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogSource for PodLogSource {
    async fn tail(&self, namespace: &str, model: &str, lines: u32) -> Result<Vec<PodLogs>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{}={}", LABEL_KSERVE_ISVC, model);
        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| Error::from(ResourceError::from_kube("Pod", model, e)))?;

        let params = LogParams {
            container: Some(PREDICTOR_CONTAINER.to_string()),
            tail_lines: Some(i64::from(lines)),
            ..Default::default()
        };

        let mut result = Vec::with_capacity(list.items.len());
        for pod in list.items {
            let Some(name) = pod.metadata.name else {
                continue;
            };
            let lines = match pods.logs(&name, &params).await {
                Ok(text) => text.lines().map(str::to_string).collect(),
                Err(e) => {
                    warn!(pod = %name, namespace = %namespace, error = %e, "failed to read pod logs");
                    Vec::new()
                }
            };
            result.push(PodLogs { pod: name, lines });
        }
        Ok(result)
    }
}
