mod sst_client;
mod sst_models;
mod sst_realtime;
mod sst_spatial;
mod sst_static;
mod sst_status;

use anyhow::Context;
use clap::Parser;
use sst_client::Client;
use sst_realtime::Poller;
use std::path::PathBuf;
use std::time::Duration;

/// MTA subway station tracker: aggregates GTFS stops into stations and
/// keeps per-station arrival predictions fresh from the realtime feeds.
#[derive(Parser, Debug)]
#[command(name = "sst")]
struct Args {
    /// API key from http://datamine.mta.info/ (falls back to MTA_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Directory containing GTFS stops.txt and transfers.txt
    #[arg(long, default_value = "/etc/mta/gtfs")]
    gtfs_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let api_key = args
        .api_key
        .or_else(|| std::env::var("MTA_API_KEY").ok())
        .context("missing API key (--api-key or MTA_API_KEY)")?;

    let client = Client::load(&args.gtfs_path)
        .with_context(|| format!("loading GTFS data from {}", args.gtfs_path.display()))?;
    log::info!("loaded {} stations", client.stations().await.len());

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;
    match sst_status::fetch_service_status(&http).await {
        Ok(status) => log::info!(
            "service status as of {}: {} lines reporting",
            status.updated,
            status.lines.len()
        ),
        Err(e) => log::warn!("service status unavailable: {}", e),
    }

    let mut poller = Poller::new(&client, api_key)?;
    poller.start();
    log::info!(
        "polling feeds every {}s, ctrl-c to stop",
        sst_realtime::REFRESH_INTERVAL.as_secs()
    );

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    poller.stop().await;
    Ok(())
}
