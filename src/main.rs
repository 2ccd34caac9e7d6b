//! Numbers Table Server
//!
//! Runs every table of every game kind against the system clock, seeds a
//! handful of demo wallets and logs table events until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use numbers_table::{
    core::clock::SystemClock,
    external::wallet::InMemoryWallet,
    game::{events::TableEventData, state::BettorId},
    service::{EngineConfig, TableScheduler},
    VERSION,
};

/// Demo accounts opened at start-up.
const DEMO_ACCOUNTS: u32 = 6;

/// Balance of each demo account.
const DEMO_BALANCE: u64 = 10_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env();
    info!("Numbers Table Server v{}", VERSION);
    info!(
        tables_per_kind = config.tables_per_kind,
        lockout_minutes = config.override_lockout.num_minutes(),
        bias_bps = config.real_bettor_bias_bps,
        history = ?config.history_dir,
        "configuration loaded"
    );

    let wallet = Arc::new(InMemoryWallet::new());
    for i in 1..=DEMO_ACCOUNTS {
        wallet.open_account(BettorId::new(format!("demo{i}")), DEMO_BALANCE);
    }

    let mut scheduler = TableScheduler::with_history(config, Arc::new(SystemClock), wallet)
        .context("failed to open history storage")?;
    let mut events = scheduler.subscribe();
    scheduler.start().context("failed to start tables")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }

            event = events.recv() => match event {
                Ok(event) => match &event.data {
                    TableEventData::BetAdmitted { snapshot, number, synthetic } => debug!(
                        round = %event.round_id,
                        number,
                        synthetic,
                        players = snapshot.players,
                        "bet admitted"
                    ),
                    TableEventData::RoundFinished { outcome, winners } => info!(
                        round = %event.round_id,
                        outcome,
                        winners = winners.len(),
                        "round finished"
                    ),
                    TableEventData::NewRoundStarted { starts_at, ends_at } => info!(
                        round = %event.round_id,
                        %starts_at,
                        %ends_at,
                        "new round"
                    ),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.shutdown().await;
    info!("stopped");
    Ok(())
}
