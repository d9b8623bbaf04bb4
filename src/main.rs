use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ad_sync_agent::agent::SyncAgent;
use ad_sync_agent::config;
use ad_sync_agent::directory::LdapConnector;
use ad_sync_agent::platform::{PlatformClient, SyncReporter};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Periodically sync directory users to the platform"
)]
struct Args {
    /// Optional YAML config file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single sync cycle and exit
    #[arg(long, conflicts_with = "check")]
    once: bool,

    /// Only test the platform connection and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref()).context("configuration error")?;

    info!(
        platform = %cfg.platform.url,
        tenant_id = %cfg.platform.tenant_id,
        interval_secs = cfg.schedule.interval_secs,
        "starting directory sync agent"
    );

    let reporter = Arc::new(PlatformClient::from_config(&cfg)?);
    reporter
        .probe()
        .await
        .context("platform connection test failed, please check your configuration")?;
    if args.check {
        return Ok(());
    }

    let connector = Arc::new(LdapConnector::from_config(&cfg)?);
    let agent = SyncAgent::from_config(&cfg, connector, reporter);

    if args.once {
        let report = agent.run_cycle().await.context("sync cycle failed")?;
        info!(cycle_id = %report.cycle_id, fetched = report.fetched, "single cycle finished");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current cycle");
            signal_token.cancel();
        }
    });

    info!(interval_secs = cfg.schedule.interval_secs, "running in loop mode");
    agent.run(cancel).await;
    Ok(())
}
