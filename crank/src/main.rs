//! Adshares incoming transaction crank
//!
//! Syncs the ADS node and settles every NEW incoming payment. Meant to be run
//! periodically (`process-tx`, the default) or left running (`watch`).

use adpay_crank::{
    ads_client::AdsRpcClient,
    config::{self, Config},
    crank::{Crank, RunOutcome, EXIT_CODE_FAILURE},
    db,
    demand_client::HttpDemandClient,
    payment_details::DbPaymentDetailsProcessor,
    types::CLICKS_PER_ADS,
};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    // Parse configuration
    let config = Config::parse();

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("Crank failed: {}", e);
            ExitCode::from(EXIT_CODE_FAILURE)
        }
    }
}

async fn run(config: Config) -> Result<ExitCode, Box<dyn std::error::Error>> {
    info!("Adshares incoming tx crank");
    info!("RPC URL: {}", config.rpc_url);
    info!("Database: {}", config.db_path.display());

    // Initialize database
    let db_pool = db::init_db(&config.db_path).await?;

    match config.command {
        Some(config::Command::Stats) => {
            let stats = db::get_payment_stats(&db_pool).await?;
            info!("New: {}", stats.new_count);
            info!("User deposits: {}", stats.user_deposit_count);
            info!("Event payments: {}", stats.event_payment_count);
            info!("Reserved: {}", stats.reserved_count);
            info!("Invalid: {}", stats.invalid_count);
            info!(
                "Total deposited: {} clicks ({:.11} ADS)",
                stats.total_deposited,
                stats.total_deposited as f64 / CLICKS_PER_ADS as f64
            );
            return Ok(ExitCode::SUCCESS);
        }
        Some(config::Command::Pending) => {
            let payments = db::get_new_payments(&db_pool).await?;
            if payments.is_empty() {
                info!("No pending payments");
            } else {
                info!("{} pending payments:", payments.len());
                for p in &payments {
                    info!("  [{}] {} from {} ({} clicks)", p.id, p.txid, p.address, p.amount);
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let platform_address = config.platform_address()?;
    let node = Arc::new(AdsRpcClient::new(config.rpc_url.clone(), config.http_timeout())?);
    let demand_client = Arc::new(HttpDemandClient::new(
        platform_address.clone(),
        config.http_timeout(),
    )?);
    let details_processor = Arc::new(DbPaymentDetailsProcessor::new(db_pool.clone()));

    let crank = Crank::new(
        node,
        demand_client,
        details_processor,
        db_pool,
        platform_address,
        config.sync_policy(),
    );
    info!("Platform address: {}", crank.platform_address());

    if let Some(config::Command::Watch) = config.command {
        info!("Starting main loop (poll interval: {}s)", config.poll_interval_secs);
        loop {
            match crank.process_incoming_txs().await {
                Ok(RunOutcome::Success(_)) => {}
                Ok(RunOutcome::CannotSyncBlocks(e)) => {
                    warn!("Blocks not synced, will retry next round: {}", e);
                }
                Err(e) => error!("Processing error: {}", e),
            }

            tokio::time::sleep(config.poll_interval()).await;
        }
    }

    match crank.process_incoming_txs().await {
        Ok(outcome) => Ok(ExitCode::from(outcome.exit_code())),
        Err(e) => {
            error!("Processing error: {}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}
