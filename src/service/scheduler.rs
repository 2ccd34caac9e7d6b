//! Table Scheduler
//!
//! Builds every table of every configured kind, spawns one loop per table
//! and routes player requests to them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::admin::control::AdminControl;
use crate::admin::registry::OverrideRegistry;
use crate::core::clock::{Clock, RoundClock};
use crate::core::kind::GameKind;
use crate::core::rng::DrawRng;
use crate::core::round_id::TableNumber;
use crate::external::jsonl::JsonLinesPersistence;
use crate::external::persistence::{InMemoryPersistence, Persistence, PersistenceError, UserGames};
use crate::external::wallet::Wallet;
use crate::game::events::TableEvent;
use crate::game::ledger::{AdmissionRejected, BetReceipt, BetRequest};
use crate::game::outcome::OutcomeResolver;
use crate::game::settlement::SettlementEngine;
use crate::game::state::{BettorId, TableSnapshot, TableState};
use crate::service::config::EngineConfig;
use crate::service::table_loop::{spawn_table, TableHandle, TableServices};

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `start` was called twice.
    #[error("scheduler already started")]
    AlreadyStarted,

    /// No game kind configured.
    #[error("no game kinds configured")]
    NoKinds,

    /// History storage could not be opened.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Runs every table and exposes the player and admin entry points.
pub struct TableScheduler {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    round_clock: RoundClock,
    persistence: Arc<dyn Persistence>,
    overrides: Arc<OverrideRegistry>,
    services: Arc<TableServices>,
    tables: BTreeMap<(GameKind, TableNumber), TableHandle>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TableScheduler {
    /// Wire the scheduler. Tables are built by [`start`](Self::start).
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        wallet: Arc<dyn Wallet>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let round_clock = config.round_clock();
        let overrides = Arc::new(OverrideRegistry::new(
            round_clock.clone(),
            config.override_lockout,
            persistence.clone(),
        ));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);

        let services = Arc::new(TableServices {
            clock: clock.clone(),
            round_clock: round_clock.clone(),
            liquidity: config.liquidity,
            resolver: OutcomeResolver::new(overrides.clone(), config.real_bettor_bias_bps),
            settlement: SettlementEngine::new(wallet.clone(), persistence.clone(), overrides.clone()),
            wallet,
            persistence: persistence.clone(),
            events,
            tick_interval: config.tick_interval,
            failure_backoff: config.failure_backoff,
        });

        Self {
            config,
            clock,
            round_clock,
            persistence,
            overrides,
            services,
            tables: BTreeMap::new(),
            tasks: Vec::new(),
            shutdown_tx,
        }
    }

    /// Wire the scheduler with history storage picked from the configuration:
    /// JSON Lines under `history_dir` when set, in-memory otherwise.
    pub fn with_history(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        wallet: Arc<dyn Wallet>,
    ) -> Result<Self, SchedulerError> {
        let persistence: Arc<dyn Persistence> = match &config.history_dir {
            Some(dir) => Arc::new(JsonLinesPersistence::new(dir)?),
            None => Arc::new(InMemoryPersistence::new()),
        };
        Ok(Self::new(config, clock, wallet, persistence))
    }

    /// Create every table and spawn its loop. Must run inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if !self.tables.is_empty() {
            return Err(SchedulerError::AlreadyStarted);
        }
        if self.config.kinds.is_empty() {
            return Err(SchedulerError::NoKinds);
        }

        let entropy = self.config.draw_seed.unwrap_or_else(rand::random);
        let now = self.clock.now();

        for (kind, kind_config) in &self.config.kinds {
            for table_number in 1..=self.config.tables_per_kind {
                let table = TableState::new(
                    *kind,
                    table_number,
                    kind_config.clone(),
                    &self.round_clock,
                    now,
                    DrawRng::for_table(*kind, table_number, entropy),
                );
                let (handle, task) = spawn_table(
                    table,
                    self.services.clone(),
                    self.shutdown_tx.subscribe(),
                    self.config.command_buffer,
                );
                self.tables.insert((*kind, table_number), handle);
                self.tasks.push(task);
            }
        }

        info!(
            kinds = self.config.kinds.len(),
            tables = self.tables.len(),
            seeded = self.config.draw_seed.is_some(),
            "table scheduler started"
        );
        Ok(())
    }

    /// Place a bet on one table.
    pub async fn place_bet(
        &self,
        kind: GameKind,
        table_number: TableNumber,
        request: BetRequest,
    ) -> Result<BetReceipt, AdmissionRejected> {
        let handle = self
            .tables
            .get(&(kind, table_number))
            .ok_or(AdmissionRejected::UnknownTable)?;
        handle.place_bet(request).await
    }

    /// Place a bet on the first table of `kind` that is accepting bets and
    /// has a free slot.
    pub async fn place_bet_any(&self, kind: GameKind, request: BetRequest) -> Result<BetReceipt, AdmissionRejected> {
        for handle in self.handles(kind) {
            let snapshot = handle.snapshot();
            if !snapshot.accepting_bets || snapshot.slots_available == 0 {
                continue;
            }
            match handle.place_bet(request.clone()).await {
                // snapshot went stale between the check and the command
                Err(AdmissionRejected::TableFull) | Err(AdmissionRejected::BettingClosed) => continue,
                verdict => return verdict,
            }
        }
        Err(AdmissionRejected::NoOpenTable)
    }

    /// Snapshot of one table.
    pub fn get_table(&self, kind: GameKind, table_number: TableNumber) -> Option<TableSnapshot> {
        self.tables.get(&(kind, table_number)).map(TableHandle::snapshot)
    }

    /// Snapshots of every table of a kind, by table number.
    pub fn list_tables(&self, kind: GameKind) -> Vec<TableSnapshot> {
        self.handles(kind).map(TableHandle::snapshot).collect()
    }

    /// Receive every table event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TableEvent> {
        self.services.events.subscribe()
    }

    /// Admin control surface sharing this scheduler's registry.
    pub fn admin(&self) -> AdminControl {
        AdminControl::new(self.overrides.clone(), self.persistence.clone(), self.clock.clone())
    }

    /// Shared override registry.
    pub fn overrides(&self) -> Arc<OverrideRegistry> {
        self.overrides.clone()
    }

    /// History storage.
    pub fn persistence(&self) -> Arc<dyn Persistence> {
        self.persistence.clone()
    }

    /// A player's current and past games.
    pub fn user_games(&self, bettor: &BettorId) -> UserGames {
        self.persistence.user_games(bettor)
    }

    /// Number of running tables.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Stop every table loop and wait for them.
    pub async fn shutdown(self) {
        info!(tables = self.tasks.len(), "stopping table scheduler");
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "table loop ended abnormally");
            }
        }
    }

    fn handles(&self, kind: GameKind) -> impl Iterator<Item = &TableHandle> {
        self.tables
            .range((kind, TableNumber::MIN)..=(kind, TableNumber::MAX))
            .map(|(_, handle)| handle)
    }
}
