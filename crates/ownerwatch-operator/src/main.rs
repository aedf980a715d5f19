use std::sync::Arc;

use anyhow::{bail, Context, Result};
use kube::api::ListParams;
use kube::{Api, Client};
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ownerwatch_core::bind;
use ownerwatch_operator::config::{build_registry, OperatorSettings, OwnerWatchConfig, OwnerWatchConfigSpec};
use ownerwatch_operator::handlers::HandlerSet;
use ownerwatch_operator::health::{run_health_server, HealthState};
use ownerwatch_operator::leader::{LeaderElection, LeaderElectionConfig, LeadershipLost};
use ownerwatch_operator::manager::KubeManager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("ownerwatch-operator starting");

    let settings = OperatorSettings::from_env().context("Invalid operator settings")?;
    let leader_config =
        LeaderElectionConfig::from_env().context("Invalid leader election settings")?;

    let kube_config = kube::Config::infer()
        .await
        .context("Failed to infer Kubernetes config")?;
    let client =
        Client::try_from(kube_config.clone()).context("Failed to create Kubernetes client")?;

    info!(
        cluster_url = %kube_config.cluster_url,
        watch_namespace = settings.watch_namespace.as_deref().unwrap_or("*"),
        "Connected to Kubernetes cluster"
    );

    let spec = load_config(&client, &settings)
        .await
        .context("Failed to load controller configuration")?;
    let registry = build_registry(&spec).context("Invalid controller configuration")?;

    info!(controllers = registry.len(), "Loaded controller registry");

    // Liveness must answer on standby replicas too
    let health = Arc::new(HealthState::new(Arc::new(client.clone())));
    let health_server = tokio::spawn(run_health_server(health.clone(), settings.health_port));

    let leadership = match leader_config {
        Some(config) => {
            info!(
                lease = config.lease_name(),
                namespace = config.namespace(),
                holder = config.holder_id(),
                "Leader election enabled"
            );
            let election = LeaderElection::new(client.clone(), &config);
            election.acquire().await;
            Some(election)
        }
        None => None,
    };

    let mut manager = KubeManager::new(
        kube_config,
        settings.watch_namespace.clone(),
        HandlerSet::with_builtin(),
    );

    let summary = bind(&mut manager, &registry)
        .await
        .context("Failed to bind controllers")?;
    health.mark_bound();

    info!(
        controllers = summary.controllers,
        watches = summary.primary_watches + summary.secondary_watches,
        "Starting controllers"
    );

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    select! {
        result = manager.run() => {
            // Controller failure should trigger pod restart
            result.context("Controller failure")?;
        }
        lost = hold_leadership(leadership) => {
            bail!("Leadership lost: {lost}");
        }
        result = health_server => {
            match result {
                Ok(Ok(())) => bail!("Health server exited unexpectedly"),
                Ok(Err(e)) => bail!("Health server failed: {e}"),
                Err(e) => bail!("Health server task failed: {e}"),
            }
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Load controller configuration from file, or from the singleton
/// cluster-scoped OwnerWatchConfig
async fn load_config(client: &Client, settings: &OperatorSettings) -> Result<OwnerWatchConfigSpec> {
    if let Some(path) = &settings.config_file {
        info!(path = %path.display(), "Loading controllers from file");
        return OwnerWatchConfigSpec::from_file(path);
    }

    let api: Api<OwnerWatchConfig> = Api::all(client.clone());
    let configs = api.list(&ListParams::default()).await?;

    let Some(first) = configs.items.first() else {
        bail!("No OwnerWatchConfig found in cluster - please create one");
    };

    if configs.items.len() > 1 {
        warn!(
            count = configs.items.len(),
            using = first.metadata.name.as_deref().unwrap_or("unknown"),
            "Multiple OwnerWatchConfig resources found, using first one"
        );
    }

    Ok(first.spec.clone())
}

async fn hold_leadership(election: Option<LeaderElection>) -> LeadershipLost {
    match election {
        Some(election) => election.hold().await,
        None => futures::future::pending().await,
    }
}
