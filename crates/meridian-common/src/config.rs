//! Platform configuration
//!
//! Built once at startup from CLI flags / environment and handed to every
//! component constructor behind an `Arc`. Nothing here is mutated at runtime.

use std::time::Duration;

use crate::model::{Framework, ScaleMetric};
use crate::retry::RetryPolicy;

/// Default scaling parameters applied when a create request omits them
#[derive(Clone, Debug, PartialEq)]
pub struct ScalingDefaults {
    /// Minimum predictor replicas
    pub min_replicas: u32,
    /// Maximum predictor replicas
    pub max_replicas: u32,
    /// Autoscaling target (unset lets the autoscaler pick)
    pub scale_target: Option<u32>,
    /// Autoscaling metric
    pub scale_metric: ScaleMetric,
}

impl Default for ScalingDefaults {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 1,
            scale_target: None,
            scale_metric: ScaleMetric::Concurrency,
        }
    }
}

/// Gateway that published routes attach to
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayRef {
    /// Gateway name
    pub name: String,
    /// Gateway namespace
    pub namespace: String,
    /// Optional listener section
    pub section_name: Option<String>,
}

impl Default for GatewayRef {
    fn default() -> Self {
        Self {
            name: "meridian-gateway".to_string(),
            namespace: "envoy-gateway-system".to_string(),
            section_name: None,
        }
    }
}

/// Immutable configuration shared by all components
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    /// Frameworks tenants may deploy
    pub supported_frameworks: Vec<Framework>,
    /// Defaults for omitted scaling fields
    pub scaling: ScalingDefaults,
    /// Gateway for published routes
    pub gateway: GatewayRef,
    /// Port of the KServe predictor service
    pub predictor_port: u16,
    /// Header carrying the API key on published endpoints
    pub api_key_header: String,
    /// Timeout for proxied prediction requests (connect + transfer)
    pub predict_timeout: Duration,
    /// Retry policy for transient cluster API failures
    pub cluster_retry: RetryPolicy,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            supported_frameworks: Framework::ALL.to_vec(),
            scaling: ScalingDefaults::default(),
            gateway: GatewayRef::default(),
            predictor_port: 80,
            api_key_header: "x-api-key".to_string(),
            predict_timeout: Duration::from_secs(30),
            cluster_retry: RetryPolicy::default(),
        }
    }
}

impl PlatformConfig {
    /// Whether tenants may deploy this framework
    pub fn supports(&self, framework: Framework) -> bool {
        self.supported_frameworks.contains(&framework)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_support_every_framework() {
        let config = PlatformConfig::default();
        assert!(Framework::ALL.iter().all(|f| config.supports(*f)));
        assert_eq!(config.predict_timeout, Duration::from_secs(30));
    }

    #[test]
    fn restricted_framework_list() {
        let config = PlatformConfig {
            supported_frameworks: vec![Framework::Sklearn],
            ..Default::default()
        };
        assert!(config.supports(Framework::Sklearn));
        assert!(!config.supports(Framework::Pytorch));
    }
}
