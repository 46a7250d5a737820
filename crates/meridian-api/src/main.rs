//! Meridian - model publishing and prediction proxy API server

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kube::Client;
use tracing::info;

use meridian_api::{start_server, AppState, Cli, JwksVerifier};
use meridian_common::telemetry::{init_telemetry, TelemetryConfig};
use meridian_common::{KubeResourceClient, ResourceClient};
use meridian_proxy::PredictionProxy;
use meridian_publish::PublishOrchestrator;
use meridian_registry::{LogSource, ModelRegistry, PodLogSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig::default()).context("failed to initialize logging")?;

    let platform = Arc::new(cli.platform_config());
    info!(
        frameworks = platform.supported_frameworks.len(),
        gateway = %platform.gateway.name,
        gateway_namespace = %platform.gateway.namespace,
        "platform configuration loaded"
    );

    let kube = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let resources: Arc<dyn ResourceClient> = Arc::new(KubeResourceClient::new(
        kube.clone(),
        platform.cluster_retry.clone(),
    ));
    let logs: Arc<dyn LogSource> = Arc::new(PodLogSource::new(kube));

    let registry = Arc::new(ModelRegistry::new(
        resources.clone(),
        logs,
        platform.clone(),
    ));
    let proxy = Arc::new(
        PredictionProxy::new(registry.clone(), &platform)
            .context("failed to create prediction proxy")?,
    );
    let publisher = Arc::new(PublishOrchestrator::new(
        resources,
        registry.clone(),
        platform.clone(),
    ));
    let auth = Arc::new(
        JwksVerifier::new(cli.auth_config()).context("failed to create token verifier")?,
    );

    let state = AppState {
        auth,
        registry,
        proxy,
        publisher,
    };

    start_server(cli.server_config(), state)
        .await
        .context("API server failed")?;

    info!("shutdown complete");
    Ok(())
}
