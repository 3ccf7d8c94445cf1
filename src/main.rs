//! Armada - fleet controller for independent Kubernetes clusters

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use armada::cluster::{ClusterId, ClusterPool, KubeClusterClient};
use armada::config::FleetConfig;
use armada::node::health::NodeHealthJob;
use armada::node::reconcile::{run_node_watch, NodeReconciler};
use armada::notify::LogNotifier;
use armada::probe::SystemProber;
use armada::reserve::InMemoryReservations;
use armada::store::InMemoryNodeStore;

/// Armada - operates a fleet of independent Kubernetes clusters
#[derive(Parser, Debug)]
#[command(name = "armada", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the fleet controller
    ///
    /// Watches the node inventory of every configured cluster and probes
    /// node health on a fixed interval.
    Controller(ControllerArgs),

    /// Print the default fleet configuration as YAML and exit
    Config,
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Path to the fleet configuration YAML file
    #[arg(short = 'f', long = "config", env = "ARMADA_CONFIG")]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&FleetConfig::default())?);
            Ok(())
        }
        Commands::Controller(args) => run_controller(args).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let config = FleetConfig::load(&args.config_file)?;
    anyhow::ensure!(
        !config.clusters.is_empty(),
        "fleet config lists no clusters"
    );

    let store = Arc::new(InMemoryNodeStore::new());
    let reservations = Arc::new(InMemoryReservations::new(config.task.token_ttl()));
    let reconciler = Arc::new(NodeReconciler::new(
        store.clone(),
        Arc::new(LogNotifier),
        reservations,
        config.labels.clone(),
        config.edge.clone(),
    ));

    let mut pool = ClusterPool::new();
    for entry in &config.clusters {
        let id = ClusterId::new(entry.id.clone());
        let client =
            KubeClusterClient::connect(id.clone(), &entry.kubeconfig, config.task.watch_timeout())
                .await?;
        let kube_client = client.kube_client();
        pool.insert(id.clone(), Arc::new(client) as _);

        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    run_node_watch(kube_client.clone(), id.clone(), reconciler.clone()).await
                {
                    warn!(cluster = %id, error = %e, "node watch ended, restarting");
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
    }

    let prober = Arc::new(SystemProber::new(config.health.http_timeout())?);
    let health = NodeHealthJob::new(
        store,
        prober,
        config.labels.clone(),
        config.health.clone(),
    );

    info!(
        clusters = pool.len(),
        interval_secs = config.health.sweep_interval_secs,
        "fleet controller running"
    );
    let mut ticker = tokio::time::interval(config.health.sweep_interval());
    loop {
        ticker.tick().await;
        health.sweep(&pool).await;
    }
}
