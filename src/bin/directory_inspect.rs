use std::path::PathBuf;

use ad_sync_agent::config;
use ad_sync_agent::directory::{
    normalize_entries, DirectoryConnector, DirectoryReader, DirectorySession, LdapConnector,
};
use anyhow::{Context, Result};
use clap::Parser;

/// Fetch users from the directory and print them without contacting the platform.
#[derive(Parser, Debug)]
struct Args {
    /// Optional YAML config file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print raw directory entries instead of normalized users
    #[arg(long)]
    raw: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref()).context("configuration error")?;
    let reader = DirectoryReader::from_config(&cfg);
    let connector = LdapConnector::from_config(&cfg)?;

    let mut session = connector.connect().await?;
    let entries = session.search(reader.query()).await;
    session.close().await;
    let entries = entries?;

    if args.raw {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        let users = normalize_entries(&entries);
        eprintln!("{} entries, {} users", entries.len(), users.len());
        println!("{}", serde_json::to_string_pretty(&users)?);
    }
    Ok(())
}
