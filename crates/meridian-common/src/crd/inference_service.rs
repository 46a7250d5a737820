//! KServe InferenceService types
//!
//! Only the predictor fields Meridian reads or writes are typed. Every other
//! key at each level lands in an `extra` map and is written back untouched,
//! so tenants' hand-edited fields survive an update through the API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kube_utils::{impl_resource_boilerplate, HasApiResource, ObjectMeta};

/// Condition type KServe sets once the service can take traffic
pub const CONDITION_READY: &str = "Ready";

/// KServe InferenceService resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceService {
    /// API version (serving.kserve.io/v1beta1)
    #[serde(default = "InferenceService::default_api_version")]
    pub api_version: String,
    /// Resource kind (InferenceService)
    #[serde(default = "InferenceService::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Desired state
    pub spec: InferenceServiceSpec,
    /// Observed state, owned by the KServe controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InferenceServiceStatus>,
}

impl HasApiResource for InferenceService {
    const API_VERSION: &'static str = "serving.kserve.io/v1beta1";
    const KIND: &'static str = "InferenceService";
}

impl_resource_boilerplate!(InferenceService);

impl InferenceService {
    /// Create a new InferenceService
    pub fn new(metadata: ObjectMeta, spec: InferenceServiceSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    /// True once the Ready condition reports "True"
    pub fn is_ready(&self) -> bool {
        self.ready_condition()
            .map(|c| c.status == "True")
            .unwrap_or(false)
    }

    /// The Ready condition, if the controller has reported one
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.type_ == CONDITION_READY)
    }

    /// External URL reported by KServe, falling back to the cluster address
    pub fn external_url(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        status
            .url
            .as_deref()
            .or_else(|| status.address.as_ref().and_then(|a| a.url.as_deref()))
            .filter(|u| !u.is_empty())
    }
}

/// InferenceService spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceSpec {
    /// Predictor component
    pub predictor: PredictorSpec,
    /// Transformer, explainer and any other component, passed through
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Predictor component spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictorSpec {
    /// Minimum replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<u32>,
    /// Maximum replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,
    /// Autoscaling target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_target: Option<u32>,
    /// Autoscaling metric (concurrency, rps, cpu, memory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_metric: Option<String>,
    /// Model to serve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSpec>,
    /// Containers, resources, tolerations, ...
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Predictor model spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Model format
    pub model_format: ModelFormat,
    /// Artifact location
    #[serde(default)]
    pub storage_uri: String,
    /// Inference protocol (v1, v2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    /// Runtime, resources, args, ...
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Model format descriptor
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelFormat {
    /// Framework name
    pub name: String,
    /// Framework version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// InferenceService status
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceStatus {
    /// Externally reachable URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Cluster-local address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Components, model status, ...
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Addressable endpoint
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Addressable {
    /// Endpoint URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Knative-style status condition
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
