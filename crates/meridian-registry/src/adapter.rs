//! Conversion between API model shapes and KServe InferenceServices
//!
//! Requests are validated here before a spec is generated, so nothing that
//! reaches the resource client can violate the descriptor invariants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meridian_common::crd::{
    InferenceService, InferenceServiceSpec, ModelFormat, ModelSpec, PredictorSpec,
};
use meridian_common::kube_utils::ObjectMeta;
use meridian_common::model::{
    validate_dns_label, validate_storage_uri, Framework, ModelType, ScaleMetric,
};
use meridian_common::{Error, PlatformConfig, Result, LABEL_MODEL, LABEL_MODEL_TYPE};

/// One deployed inference model as shown to API clients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    /// Model name, unique within the namespace
    pub name: String,
    /// Tenant namespace
    pub namespace: String,
    /// Serving framework
    pub framework: String,
    /// Artifact location
    pub storage_uri: String,
    /// Minimum predictor replicas
    pub min_replicas: u32,
    /// Maximum predictor replicas
    pub max_replicas: u32,
    /// Autoscaling target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_target: Option<u32>,
    /// Autoscaling metric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_metric: Option<ScaleMetric>,
    /// Interface the model exposes
    pub model_type: ModelType,
    /// Derived from the Ready condition
    pub ready: bool,
    /// Derived from the resource status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    /// Message of the Ready condition, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of a create-model request
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModelRequest {
    /// Model name
    #[serde(default)]
    pub name: String,
    /// Serving framework
    #[serde(default)]
    pub framework: String,
    /// Artifact location
    #[serde(default)]
    pub storage_uri: String,
    /// Minimum replicas (config default when omitted)
    pub min_replicas: Option<u32>,
    /// Maximum replicas (config default when omitted)
    pub max_replicas: Option<u32>,
    /// Autoscaling target
    pub scale_target: Option<u32>,
    /// Autoscaling metric
    pub scale_metric: Option<String>,
    /// Interface the model exposes (predictive when omitted)
    pub model_type: Option<ModelType>,
    /// Target namespace; admin only, resolved by the API layer
    pub namespace: Option<String>,
}

/// Body of a partial update; absent fields keep their current values
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateModelRequest {
    /// New framework
    pub framework: Option<String>,
    /// New artifact location
    pub storage_uri: Option<String>,
    /// New minimum replicas
    pub min_replicas: Option<u32>,
    /// New maximum replicas
    pub max_replicas: Option<u32>,
    /// New autoscaling target
    pub scale_target: Option<u32>,
    /// New autoscaling metric
    pub scale_metric: Option<String>,
}

/// Fully-validated predictor settings
#[derive(Clone, Debug, PartialEq)]
struct Predictor {
    framework: Framework,
    storage_uri: String,
    min_replicas: u32,
    max_replicas: u32,
    scale_target: Option<u32>,
    scale_metric: ScaleMetric,
}

impl Predictor {
    fn validate(&self) -> Result<()> {
        validate_storage_uri(&self.storage_uri)?;
        validate_scaling(self.min_replicas, self.max_replicas, self.scale_target)
    }

    fn write_into(&self, predictor: &mut PredictorSpec) {
        predictor.min_replicas = Some(self.min_replicas);
        predictor.max_replicas = Some(self.max_replicas);
        predictor.scale_target = self.scale_target;
        predictor.scale_metric = Some(self.scale_metric.as_str().to_string());

        let model = predictor.model.get_or_insert_with(ModelSpec::default);
        if model.model_format.name != self.framework.as_str() {
            model.model_format = ModelFormat {
                name: self.framework.as_str().to_string(),
                version: None,
            };
        }
        model.storage_uri = self.storage_uri.clone();
    }
}

fn validate_scaling(min_replicas: u32, max_replicas: u32, scale_target: Option<u32>) -> Result<()> {
    if min_replicas > max_replicas {
        return Err(Error::validation(format!(
            "minReplicas ({}) must not exceed maxReplicas ({})",
            min_replicas, max_replicas
        )));
    }
    if scale_target == Some(0) {
        return Err(Error::validation("scaleTarget must be greater than 0"));
    }
    Ok(())
}

fn parse_framework(value: &str, config: &PlatformConfig) -> Result<Framework> {
    if value.trim().is_empty() {
        return Err(Error::validation("framework is required"));
    }
    let framework: Framework = value.parse()?;
    if !config.supports(framework) {
        return Err(Error::validation(format!(
            "framework '{}' is not supported on this platform",
            framework
        )));
    }
    Ok(framework)
}

/// Validate a create request and generate the InferenceService for it
pub fn build_inference_service(
    namespace: &str,
    request: &CreateModelRequest,
    config: &PlatformConfig,
) -> Result<InferenceService> {
    validate_dns_label("name", &request.name)?;
    let framework = parse_framework(&request.framework, config)?;
    let scale_metric = match &request.scale_metric {
        Some(metric) => metric.parse()?,
        None => config.scaling.scale_metric,
    };

    let predictor = Predictor {
        framework,
        storage_uri: request.storage_uri.trim().to_string(),
        min_replicas: request.min_replicas.unwrap_or(config.scaling.min_replicas),
        max_replicas: request.max_replicas.unwrap_or(config.scaling.max_replicas),
        scale_target: request.scale_target.or(config.scaling.scale_target),
        scale_metric,
    };
    predictor.validate()?;

    let model_type = request.model_type.unwrap_or_default();
    let metadata = ObjectMeta::new(&request.name, namespace)
        .with_label(LABEL_MODEL, &request.name)
        .with_label(LABEL_MODEL_TYPE, model_type.as_str());

    let mut spec = InferenceServiceSpec::default();
    predictor.write_into(&mut spec.predictor);
    Ok(InferenceService::new(metadata, spec))
}

/// Merge a partial update into an existing InferenceService.
///
/// Only the predictor fields present in the request are validated and
/// changed; everything else in the spec, including a framework or storage
/// URI Meridian would not accept on create, is left as is.
pub fn apply_update(
    isvc: &mut InferenceService,
    request: &UpdateModelRequest,
    config: &PlatformConfig,
) -> Result<()> {
    let current = descriptor_from(isvc);

    let framework = request
        .framework
        .as_deref()
        .map(|f| parse_framework(f, config))
        .transpose()?;
    let storage_uri = match request.storage_uri.as_deref().map(str::trim) {
        Some(uri) => {
            validate_storage_uri(uri)?;
            Some(uri.to_string())
        }
        None => None,
    };
    let scale_metric = request
        .scale_metric
        .as_deref()
        .map(str::parse::<ScaleMetric>)
        .transpose()?;
    let min_replicas = request.min_replicas.unwrap_or(current.min_replicas);
    let max_replicas = request.max_replicas.unwrap_or(current.max_replicas);
    let scale_target = request.scale_target.or(current.scale_target);
    validate_scaling(min_replicas, max_replicas, scale_target)?;

    let predictor = &mut isvc.spec.predictor;
    predictor.min_replicas = Some(min_replicas);
    predictor.max_replicas = Some(max_replicas);
    predictor.scale_target = scale_target;
    if let Some(metric) = scale_metric {
        predictor.scale_metric = Some(metric.as_str().to_string());
    }

    if framework.is_some() || storage_uri.is_some() {
        let model = predictor.model.get_or_insert_with(ModelSpec::default);
        if let Some(framework) = framework {
            if model.model_format.name != framework.as_str() {
                model.model_format = ModelFormat {
                    name: framework.as_str().to_string(),
                    version: None,
                };
            }
        }
        if let Some(uri) = storage_uri {
            model.storage_uri = uri;
        }
    }
    Ok(())
}

/// Project an InferenceService into the descriptor clients see
pub fn descriptor_from(isvc: &InferenceService) -> ModelDescriptor {
    let predictor = &isvc.spec.predictor;
    let model = predictor.model.as_ref();
    let min_replicas = predictor.min_replicas.unwrap_or(1);
    let ready_condition = isvc.ready_condition();

    ModelDescriptor {
        name: isvc.metadata.name.clone(),
        namespace: isvc.metadata.namespace.clone(),
        framework: model
            .map(|m| m.model_format.name.clone())
            .unwrap_or_default(),
        storage_uri: model.map(|m| m.storage_uri.clone()).unwrap_or_default(),
        min_replicas,
        max_replicas: predictor.max_replicas.unwrap_or(min_replicas),
        scale_target: predictor.scale_target,
        scale_metric: predictor
            .scale_metric
            .as_deref()
            .and_then(|m| m.parse().ok()),
        model_type: ModelType::from_label(isvc.metadata.label(LABEL_MODEL_TYPE)),
        ready: isvc.is_ready(),
        external_url: isvc.external_url().map(str::to_string),
        message: ready_condition.and_then(|c| c.message.clone()),
        created_at: isvc
            .metadata
            .creation_timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_common::crd::{Condition, InferenceServiceStatus};

    fn request() -> CreateModelRequest {
        CreateModelRequest {
            name: "iris".into(),
            framework: "sklearn".into(),
            storage_uri: "s3://bucket/iris".into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_applies_config_defaults() {
        let config = PlatformConfig::default();
        let isvc = build_inference_service("tenant-a", &request(), &config).unwrap();
        let d = descriptor_from(&isvc);

        assert_eq!(d.name, "iris");
        assert_eq!(d.namespace, "tenant-a");
        assert_eq!(d.framework, "sklearn");
        assert_eq!(d.storage_uri, "s3://bucket/iris");
        assert_eq!((d.min_replicas, d.max_replicas), (1, 1));
        assert_eq!(d.scale_metric, Some(ScaleMetric::Concurrency));
        assert_eq!(d.scale_target, None);
        assert_eq!(d.model_type, ModelType::Predictive);
        assert!(!d.ready);
        assert_eq!(isvc.metadata.label(LABEL_MODEL), Some("iris"));
    }

    #[test]
    fn create_rejects_bad_input() {
        let config = PlatformConfig::default();
        let cases = [
            CreateModelRequest {
                name: String::new(),
                ..request()
            },
            CreateModelRequest {
                framework: String::new(),
                ..request()
            },
            CreateModelRequest {
                framework: "caffe".into(),
                ..request()
            },
            CreateModelRequest {
                storage_uri: String::new(),
                ..request()
            },
            CreateModelRequest {
                min_replicas: Some(3),
                max_replicas: Some(2),
                ..request()
            },
            CreateModelRequest {
                scale_metric: Some("latency".into()),
                ..request()
            },
        ];
        for case in cases {
            let err = build_inference_service("tenant-a", &case, &config).unwrap_err();
            assert_eq!(err.kind(), "ValidationError", "{:?}", case);
        }
    }

    #[test]
    fn unsupported_framework_is_rejected() {
        let config = PlatformConfig {
            supported_frameworks: vec![Framework::Onnx],
            ..Default::default()
        };
        let err = build_inference_service("tenant-a", &request(), &config).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn update_merges_only_present_fields() {
        let config = PlatformConfig::default();
        let mut isvc = build_inference_service(
            "tenant-a",
            &CreateModelRequest {
                max_replicas: Some(4),
                scale_target: Some(10),
                ..request()
            },
            &config,
        )
        .unwrap();

        apply_update(
            &mut isvc,
            &UpdateModelRequest {
                min_replicas: Some(2),
                ..Default::default()
            },
            &config,
        )
        .unwrap();

        let d = descriptor_from(&isvc);
        assert_eq!((d.min_replicas, d.max_replicas), (2, 4));
        assert_eq!(d.scale_target, Some(10));
        assert_eq!(d.storage_uri, "s3://bucket/iris");
    }

    #[test]
    fn update_checks_bounds_after_merge() {
        let config = PlatformConfig::default();
        let mut isvc = build_inference_service("tenant-a", &request(), &config).unwrap();
        let before = isvc.clone();

        let err = apply_update(
            &mut isvc,
            &UpdateModelRequest {
                min_replicas: Some(5),
                ..Default::default()
            },
            &config,
        )
        .unwrap_err();

        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(isvc, before);
    }

    #[test]
    fn scaling_a_model_leaves_an_unknown_framework_alone() {
        let config = PlatformConfig::default();
        let mut isvc = build_inference_service("tenant-a", &request(), &config).unwrap();
        if let Some(model) = isvc.spec.predictor.model.as_mut() {
            model.model_format.name = "custom-llm-runtime".into();
            model.storage_uri = "file:///mnt/models".into();
        }

        apply_update(
            &mut isvc,
            &UpdateModelRequest {
                max_replicas: Some(3),
                ..Default::default()
            },
            &config,
        )
        .unwrap();

        let d = descriptor_from(&isvc);
        assert_eq!(d.max_replicas, 3);
        assert_eq!(d.framework, "custom-llm-runtime");
        assert_eq!(d.storage_uri, "file:///mnt/models");
    }

    #[test]
    fn scaling_a_model_without_a_model_spec() {
        let config = PlatformConfig::default();
        let mut isvc = build_inference_service("tenant-a", &request(), &config).unwrap();
        isvc.spec.predictor.model = None;

        apply_update(
            &mut isvc,
            &UpdateModelRequest {
                min_replicas: Some(1),
                max_replicas: Some(2),
                ..Default::default()
            },
            &config,
        )
        .unwrap();

        assert!(isvc.spec.predictor.model.is_none());
        assert_eq!(isvc.spec.predictor.max_replicas, Some(2));
    }

    #[test]
    fn framework_change_preserves_other_model_fields() {
        let config = PlatformConfig::default();
        let mut isvc = build_inference_service("tenant-a", &request(), &config).unwrap();
        if let Some(model) = isvc.spec.predictor.model.as_mut() {
            model
                .extra
                .insert("runtime".into(), serde_json::json!("custom-runtime"));
        }

        apply_update(
            &mut isvc,
            &UpdateModelRequest {
                framework: Some("xgboost".into()),
                ..Default::default()
            },
            &config,
        )
        .unwrap();

        let model = isvc.spec.predictor.model.as_ref().unwrap();
        assert_eq!(model.model_format.name, "xgboost");
        assert_eq!(model.extra["runtime"], "custom-runtime");
    }

    #[test]
    fn status_projection() {
        let config = PlatformConfig::default();
        let mut isvc = build_inference_service("tenant-a", &request(), &config).unwrap();
        isvc.metadata.creation_timestamp = Some("2024-05-01T12:00:00Z".into());
        isvc.status = Some(InferenceServiceStatus {
            url: Some("http://iris.tenant-a.example.com".into()),
            conditions: vec![Condition {
                type_: "Ready".into(),
                status: "False".into(),
                reason: Some("RevisionMissing".into()),
                message: Some("waiting for revision".into()),
            }],
            ..Default::default()
        });

        let d = descriptor_from(&isvc);
        assert!(!d.ready);
        assert_eq!(d.message.as_deref(), Some("waiting for revision"));
        assert_eq!(
            d.external_url.as_deref(),
            Some("http://iris.tenant-a.example.com")
        );
        assert!(d.created_at.is_some());

        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["storageUri"], "s3://bucket/iris");
        assert_eq!(json["modelType"], "predictive");
    }
}
