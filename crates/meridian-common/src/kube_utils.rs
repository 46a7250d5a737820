//! Shared Kubernetes helpers using kube-rs
//!
//! Third-party resources (KServe, Gateway API, Envoy Gateway) are modelled as
//! plain serde structs implementing [`HasApiResource`] and sent through
//! `Api<DynamicObject>`. This keeps the typed fields we read and write
//! explicit while the extra-fields maps on each spec carry everything else.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::resources::ResourceError;

// =============================================================================
// ObjectMeta
// =============================================================================

/// Kubernetes metadata for resources Meridian reads and writes.
///
/// Only the fields this system inspects are typed. Everything else the API
/// server returns (finalizers, ownerReferences, generation, ...) is kept in
/// `extra` and written back unchanged on update.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    #[serde(default)]
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Server-assigned unique identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Optimistic concurrency token; sent back on update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Creation time as reported by the API server (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    /// Metadata fields Meridian does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ObjectMeta {
    /// Create new metadata carrying the Meridian management labels
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(
            crate::LABEL_MANAGED_BY.to_string(),
            crate::LABEL_MANAGED_BY_MERIDIAN.to_string(),
        );
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels,
            ..Default::default()
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Look up a label value
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Take over everything from `current` that desired metadata does not
    /// define: server-assigned fields, uninterpreted fields, and labels or
    /// annotations other writers added.
    pub fn carry_over(&mut self, current: &ObjectMeta) {
        self.uid = current.uid.clone();
        self.resource_version = current.resource_version.clone();
        self.creation_timestamp = current.creation_timestamp.clone();
        for (key, value) in &current.labels {
            self.labels
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for (key, value) in &current.annotations {
            self.annotations
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for (key, value) in &current.extra {
            self.extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

// =============================================================================
// HasApiResource
// =============================================================================

/// Types with a compile-time known API version and kind.
///
/// ```ignore
/// impl HasApiResource for HttpRoute {
///     const API_VERSION: &'static str = "gateway.networking.k8s.io/v1";
///     const KIND: &'static str = "HTTPRoute";
/// }
/// let ar = HttpRoute::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "gateway.networking.k8s.io/v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "HTTPRoute")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Access to the metadata of a typed resource
pub trait HasMetadata {
    /// Borrow the metadata
    fn meta(&self) -> &ObjectMeta;
    /// Mutably borrow the metadata
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

/// Implements `default_api_version()`, `default_kind()` and [`HasMetadata`]
/// for a resource struct with `metadata: ObjectMeta`.
macro_rules! impl_resource_boilerplate {
    ($type:ty) => {
        impl $type {
            fn default_api_version() -> String {
                <Self as $crate::kube_utils::HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as $crate::kube_utils::HasApiResource>::KIND.to_string()
            }
        }

        impl $crate::kube_utils::HasMetadata for $type {
            fn meta(&self) -> &$crate::kube_utils::ObjectMeta {
                &self.metadata
            }
            fn meta_mut(&mut self) -> &mut $crate::kube_utils::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}
pub(crate) use impl_resource_boilerplate;

/// Build an ApiResource from an apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split "group/version" into its parts; core resources have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural used in REST paths (HTTPRoute -> httproutes)
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with("policy") {
        format!("{}ies", lower.trim_end_matches('y'))
    } else if lower.ends_with('s') {
        format!("{}es", lower)
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// DynamicObject conversion
// =============================================================================

/// Convert a typed resource into a DynamicObject for the dynamic API
pub fn to_dynamic<T>(resource: &T) -> Result<DynamicObject, ResourceError>
where
    T: Serialize + HasApiResource,
{
    let value = serde_json::to_value(resource).map_err(|e| ResourceError::Invalid {
        kind: T::KIND,
        message: format!("failed to serialize: {}", e),
    })?;
    serde_json::from_value(value).map_err(|e| ResourceError::Invalid {
        kind: T::KIND,
        message: format!("failed to build dynamic object: {}", e),
    })
}

/// Convert a DynamicObject returned by the API server into a typed resource
pub fn from_dynamic<T>(object: DynamicObject) -> Result<T, ResourceError>
where
    T: DeserializeOwned + HasApiResource,
{
    let value = serde_json::to_value(&object).map_err(|e| ResourceError::Invalid {
        kind: T::KIND,
        message: format!("failed to serialize dynamic object: {}", e),
    })?;
    serde_json::from_value(value).map_err(|e| ResourceError::Invalid {
        kind: T::KIND,
        message: format!("unexpected resource shape: {}", e),
    })
}

// =============================================================================
// Label selectors
// =============================================================================

/// Evaluate an equality-based label selector (`a=b,c=d`) against labels.
///
/// An empty selector matches everything.
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralizes_resource_kinds() {
        assert_eq!(pluralize_kind("HTTPRoute"), "httproutes");
        assert_eq!(pluralize_kind("AIGatewayRoute"), "aigatewayroutes");
        assert_eq!(pluralize_kind("BackendTrafficPolicy"), "backendtrafficpolicies");
        assert_eq!(pluralize_kind("InferenceService"), "inferenceservices");
    }

    #[test]
    fn parses_grouped_and_core_api_versions() {
        assert_eq!(
            parse_api_version("serving.kserve.io/v1beta1"),
            ("serving.kserve.io".to_string(), "v1beta1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }

    #[test]
    fn new_metadata_carries_managed_by_label() {
        let meta = ObjectMeta::new("iris", "tenant-a").with_label("x", "y");
        assert_eq!(meta.label(crate::LABEL_MANAGED_BY), Some("meridian"));
        assert_eq!(meta.label("x"), Some("y"));
        assert!(meta.resource_version.is_none());
    }

    #[test]
    fn unknown_metadata_survives_a_round_trip() {
        let raw = serde_json::json!({
            "name": "iris",
            "namespace": "tenant-a",
            "resourceVersion": "7",
            "generation": 3,
            "finalizers": ["inferenceservice.finalizers"],
            "ownerReferences": [{"apiVersion": "v1", "kind": "ConfigMap", "name": "owner", "uid": "u-1"}]
        });
        let meta: ObjectMeta = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(meta.resource_version.as_deref(), Some("7"));
        assert_eq!(serde_json::to_value(&meta).unwrap(), raw);
    }

    #[test]
    fn carry_over_keeps_fields_desired_does_not_define() {
        let current: ObjectMeta = serde_json::from_value(serde_json::json!({
            "name": "iris-public",
            "namespace": "tenant-a",
            "uid": "u-1",
            "resourceVersion": "9",
            "labels": {"meridian.dev/tenant": "old", "team": "ml"},
            "finalizers": ["example.com/cleanup"]
        }))
        .unwrap();
        let mut desired =
            ObjectMeta::new("iris-public", "tenant-a").with_label("meridian.dev/tenant", "tenant-a");

        desired.carry_over(&current);

        assert_eq!(desired.uid.as_deref(), Some("u-1"));
        assert_eq!(desired.resource_version.as_deref(), Some("9"));
        assert_eq!(desired.label("meridian.dev/tenant"), Some("tenant-a"));
        assert_eq!(desired.label("team"), Some("ml"));
        assert_eq!(
            desired.extra["finalizers"],
            serde_json::json!(["example.com/cleanup"])
        );
    }

    #[test]
    fn equality_selectors() {
        let mut labels = BTreeMap::new();
        labels.insert("meridian.dev/published".to_string(), "true".to_string());
        labels.insert("meridian.dev/model".to_string(), "iris".to_string());

        assert!(selector_matches("", &labels));
        assert!(selector_matches("meridian.dev/published=true", &labels));
        assert!(selector_matches(
            "meridian.dev/published=true,meridian.dev/model=iris",
            &labels
        ));
        assert!(!selector_matches("meridian.dev/model=wine", &labels));
        assert!(selector_matches("meridian.dev/model", &labels));
    }
}
