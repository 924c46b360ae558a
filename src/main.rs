//! `hekad`: the thin process-plumbing binary around the `heka` library.
//! Argument parsing, config loading, logging init and signal handling live
//! here; the actual routing engine lives in the library so it can be
//! embedded directly by whatever wires in concrete input/output plugins.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use heka::config::Config;
use heka::pack::PackPool;
use heka::report::{run_self_reporter, PluginReportHandle};
use heka::router::Router;
use heka::stats::{StatAccumulator, StatAccumulatorConfig};

#[derive(Parser, Debug)]
#[command(name = "hekad", about = "Heka core routing engine daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "hekad.toml")]
    config: PathBuf,

    /// Overrides the `RUST_LOG` filter, e.g. "debug" or "heka=trace,info".
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_filter {
        Some(f) => EnvFilter::new(f.clone()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("loading config {}: {e}", cli.config.display()))?;
    info!(path = %cli.config.display(), plugins = config.plugins.len(), "configuration loaded");

    let pool = PackPool::new(config.pool.capacity);
    let mut router = Router::new(pool.clone(), config.router.ingress_capacity);
    let router_handle = router.handle();
    let router_join = tokio::spawn(router.run());

    let (stats, stats_handle) = StatAccumulator::new(StatAccumulatorConfig::default(), pool.clone(), router_handle.clone());
    let stats_join = tokio::spawn(stats.run());
    drop(stats_handle); // no statsd input is wired up yet; dropped so the accumulator can shut down cleanly

    let report_join = tokio::spawn(run_self_reporter(
        pool.clone(),
        router_handle.clone(),
        Vec::<PluginReportHandle>::new(),
        Duration::from_secs(60),
    ));

    if config.plugins.is_empty() {
        warn!("no plugins configured; the router is running with nothing feeding it");
    }

    shutdown_signal().await;
    info!("shutdown signal received, stopping router");
    router_handle.shutdown();

    router_join.await?;
    stats_join.await?;
    let _ = report_join.await;

    info!("hekad stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
