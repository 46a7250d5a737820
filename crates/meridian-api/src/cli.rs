//! Command line and environment configuration

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use meridian_common::config::{GatewayRef, ScalingDefaults};
use meridian_common::model::Framework;
use meridian_common::retry::RetryPolicy;
use meridian_common::PlatformConfig;

use crate::auth::AuthConfig;
use crate::server::ServerConfig;

/// Meridian - model publishing and prediction proxy API
#[derive(Parser, Debug, Clone)]
#[command(name = "meridian", version, about, long_about = None)]
pub struct Cli {
    /// Address the API listens on
    #[arg(long, env = "MERIDIAN_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Path prefix for every API route
    #[arg(long, env = "MERIDIAN_API_PREFIX", default_value = "/api/v1")]
    pub api_prefix: String,

    /// JWKS document of the token issuer
    #[arg(long, env = "MERIDIAN_JWKS_URL")]
    pub jwks_url: String,

    /// Required token issuer (`iss`)
    #[arg(long, env = "MERIDIAN_JWT_ISSUER")]
    pub jwt_issuer: Option<String>,

    /// Required token audience (`aud`)
    #[arg(long, env = "MERIDIAN_JWT_AUDIENCE")]
    pub jwt_audience: Option<String>,

    /// Claim carrying the caller's tenant
    #[arg(long, env = "MERIDIAN_TENANT_CLAIM", default_value = "tenant_id")]
    pub tenant_claim: String,

    /// Group whose members are platform admins
    #[arg(long, env = "MERIDIAN_ADMIN_GROUP", default_value = "meridian-admins")]
    pub admin_group: String,

    /// Seconds before the cached JWKS is refetched
    #[arg(long, env = "MERIDIAN_JWKS_REFRESH_SECS", default_value_t = 300)]
    pub jwks_refresh_secs: u64,

    /// Gateway published routes attach to
    #[arg(long, env = "MERIDIAN_GATEWAY_NAME", default_value = "meridian-gateway")]
    pub gateway_name: String,

    /// Namespace of the gateway
    #[arg(
        long,
        env = "MERIDIAN_GATEWAY_NAMESPACE",
        default_value = "envoy-gateway-system"
    )]
    pub gateway_namespace: String,

    /// Gateway listener published routes attach to
    #[arg(long, env = "MERIDIAN_GATEWAY_SECTION")]
    pub gateway_section: Option<String>,

    /// Frameworks tenants may deploy (comma separated; default all)
    #[arg(long, env = "MERIDIAN_FRAMEWORKS", value_delimiter = ',')]
    pub frameworks: Vec<Framework>,

    /// Default minimum predictor replicas
    #[arg(long, env = "MERIDIAN_DEFAULT_MIN_REPLICAS", default_value_t = 1)]
    pub default_min_replicas: u32,

    /// Default maximum predictor replicas
    #[arg(long, env = "MERIDIAN_DEFAULT_MAX_REPLICAS", default_value_t = 1)]
    pub default_max_replicas: u32,

    /// Header external clients send the API key in
    #[arg(long, env = "MERIDIAN_API_KEY_HEADER", default_value = "x-api-key")]
    pub api_key_header: String,

    /// Seconds before a proxied prediction times out
    #[arg(long, env = "MERIDIAN_PREDICT_TIMEOUT_SECS", default_value_t = 30)]
    pub predict_timeout_secs: u64,

    /// Attempts for cluster API calls that fail transiently
    #[arg(long, env = "MERIDIAN_CLUSTER_RETRY_ATTEMPTS", default_value_t = 3)]
    pub cluster_retry_attempts: u32,
}

impl Cli {
    /// Listener settings
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: self.listen_addr,
            api_prefix: self.api_prefix.clone(),
        }
    }

    /// Token verification settings
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwks_url: self.jwks_url.clone(),
            issuer: self.jwt_issuer.clone(),
            audience: self.jwt_audience.clone(),
            tenant_claim: self.tenant_claim.clone(),
            admin_group: self.admin_group.clone(),
            jwks_refresh_interval: Duration::from_secs(self.jwks_refresh_secs),
            ..Default::default()
        }
    }

    /// Platform settings shared by every component
    pub fn platform_config(&self) -> PlatformConfig {
        let defaults = PlatformConfig::default();
        PlatformConfig {
            supported_frameworks: if self.frameworks.is_empty() {
                defaults.supported_frameworks
            } else {
                self.frameworks.clone()
            },
            scaling: ScalingDefaults {
                min_replicas: self.default_min_replicas,
                max_replicas: self.default_max_replicas,
                ..Default::default()
            },
            gateway: GatewayRef {
                name: self.gateway_name.clone(),
                namespace: self.gateway_namespace.clone(),
                section_name: self.gateway_section.clone(),
            },
            api_key_header: self.api_key_header.clone(),
            predict_timeout: Duration::from_secs(self.predict_timeout_secs),
            cluster_retry: RetryPolicy::with_max_attempts(self.cluster_retry_attempts),
            ..defaults
        }
    }
}
