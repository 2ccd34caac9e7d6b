//! Table Loop
//!
//! One tokio task per table. The task owns its `TableState` outright; bets
//! arrive as commands on an mpsc channel and are admitted between ticks, so
//! admission and the close check never interleave. Readers get snapshots
//! through a `watch` channel and events through a shared `broadcast`.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::core::clock::{Clock, RoundClock};
use crate::core::kind::GameKind;
use crate::core::round_id::TableNumber;
use crate::external::persistence::Persistence;
use crate::external::wallet::Wallet;
use crate::game::events::TableEvent;
use crate::game::ledger::{place_player_bet, AdmissionRejected, BetReceipt, BetRequest};
use crate::game::liquidity::LiquidityConfig;
use crate::game::outcome::OutcomeResolver;
use crate::game::settlement::SettlementEngine;
use crate::game::state::{TableSnapshot, TableState};
use crate::game::tick::{tick, TickContext, TickResult};

/// A tick that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickFailure {
    /// The tick panicked; the payload message is kept.
    #[error("tick panicked: {0}")]
    Panicked(String),
}

/// Requests handled by a table loop.
#[derive(Debug)]
pub enum TableCommand {
    /// Admit a player's bet.
    PlaceBet {
        /// The bet.
        request: BetRequest,
        /// Where to send the verdict.
        reply: oneshot::Sender<Result<BetReceipt, AdmissionRejected>>,
    },
}

/// Collaborators shared by every table loop.
pub struct TableServices {
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
    /// Round grid.
    pub round_clock: RoundClock,
    /// Synthetic bet pacing.
    pub liquidity: LiquidityConfig,
    /// Outcome resolver.
    pub resolver: OutcomeResolver,
    /// Settlement engine.
    pub settlement: SettlementEngine,
    /// Wallet.
    pub wallet: Arc<dyn Wallet>,
    /// History storage.
    pub persistence: Arc<dyn Persistence>,
    /// Event fan-out.
    pub events: broadcast::Sender<TableEvent>,
    /// Tick cadence.
    pub tick_interval: StdDuration,
    /// Pause after a failed tick.
    pub failure_backoff: StdDuration,
}

impl TableServices {
    fn tick_context(&self) -> TickContext<'_> {
        TickContext {
            clock: &self.round_clock,
            liquidity: &self.liquidity,
            resolver: &self.resolver,
            settlement: &self.settlement,
        }
    }

    fn publish(&self, event: TableEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Client side of a running table loop.
#[derive(Debug, Clone)]
pub struct TableHandle {
    kind: GameKind,
    table_number: TableNumber,
    commands: mpsc::Sender<TableCommand>,
    snapshot: watch::Receiver<TableSnapshot>,
}

impl TableHandle {
    /// Game kind.
    pub fn kind(&self) -> GameKind {
        self.kind
    }

    /// Table number.
    pub fn table_number(&self) -> TableNumber {
        self.table_number
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> TableSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Submit a bet and wait for the verdict.
    pub async fn place_bet(&self, request: BetRequest) -> Result<BetReceipt, AdmissionRejected> {
        let (reply, verdict) = oneshot::channel();
        self.commands
            .send(TableCommand::PlaceBet { request, reply })
            .await
            .map_err(|_| AdmissionRejected::TableUnavailable)?;
        verdict.await.map_err(|_| AdmissionRejected::TableUnavailable)?
    }
}

/// Spawn the loop for `table`.
pub fn spawn_table(
    table: TableState,
    services: Arc<TableServices>,
    shutdown: broadcast::Receiver<()>,
    command_buffer: usize,
) -> (TableHandle, JoinHandle<()>) {
    let now = services.clock.now();
    let (commands_tx, commands_rx) = mpsc::channel(command_buffer.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(table.snapshot(now, services.liquidity.margin));

    let handle = TableHandle {
        kind: table.kind,
        table_number: table.table_number,
        commands: commands_tx,
        snapshot: snapshot_rx,
    };
    let task = tokio::spawn(run_table_loop(table, services, commands_rx, snapshot_tx, shutdown));
    (handle, task)
}

async fn run_table_loop(
    mut table: TableState,
    services: Arc<TableServices>,
    mut commands: mpsc::Receiver<TableCommand>,
    snapshot: watch::Sender<TableSnapshot>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(
        kind = %table.kind,
        table = table.table_number,
        round = %table.round_id,
        starts_at = %table.schedule.start,
        "table loop started"
    );

    let mut ticker = interval(services.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(kind = %table.kind, table = table.table_number, "table loop stopping");
                break;
            }

            _ = ticker.tick() => {
                let now = services.clock.now();
                match guarded_tick(&mut table, now, &services) {
                    Ok(result) => {
                        for event in result.events {
                            services.publish(event);
                        }
                    }
                    Err(failure) => {
                        error!(
                            kind = %table.kind,
                            table = table.table_number,
                            round = %table.round_id,
                            error = %failure,
                            "tick failed"
                        );
                        snapshot.send_replace(table.snapshot(now, services.liquidity.margin));
                        tokio::time::sleep(services.failure_backoff).await;
                        continue;
                    }
                }
                snapshot.send_replace(table.snapshot(now, services.liquidity.margin));
            }

            Some(command) = commands.recv() => {
                handle_command(&mut table, command, &services, &snapshot);
            }
        }
    }
}

fn guarded_tick(table: &mut TableState, now: DateTime<Utc>, services: &TableServices) -> Result<TickResult, TickFailure> {
    let ctx = services.tick_context();
    catch_unwind(AssertUnwindSafe(|| tick(table, now, &ctx)))
        .map_err(|payload| TickFailure::Panicked(panic_message(payload.as_ref())))
}

fn handle_command(
    table: &mut TableState,
    command: TableCommand,
    services: &TableServices,
    snapshot: &watch::Sender<TableSnapshot>,
) {
    match command {
        TableCommand::PlaceBet { request, reply } => {
            let now = services.clock.now();
            let number = request.number;
            let bettor = request.bettor.clone();

            let verdict = catch_unwind(AssertUnwindSafe(|| {
                place_player_bet(
                    table,
                    request,
                    now,
                    services.wallet.as_ref(),
                    services.persistence.as_ref(),
                )
            }))
            .unwrap_or_else(|payload| {
                error!(
                    round = %table.round_id,
                    bettor = %bettor,
                    error = %panic_message(payload.as_ref()),
                    "bet admission panicked"
                );
                Err(AdmissionRejected::TableUnavailable)
            });

            match &verdict {
                Ok(_) => {
                    let current = table.snapshot(now, services.liquidity.margin);
                    snapshot.send_replace(current.clone());
                    services.publish(TableEvent::bet_admitted(current, number, false, now));
                }
                Err(rejected) => {
                    debug!(round = %table.round_id, bettor = %bettor, number, reason = %rejected, "bet rejected");
                }
            }

            if reply.send(verdict).is_err() {
                warn!(round = %table.round_id, bettor = %bettor, "bet caller went away before the verdict");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::{Duration, TimeZone};
    use tokio::time::timeout;

    use crate::admin::registry::{OverrideHistoryEntry, OverrideRegistry, OverrideStatus};
    use crate::core::clock::ManualClock;
    use crate::core::kind::Number;
    use crate::core::rng::DrawRng;
    use crate::core::round_id::RoundId;
    use crate::external::persistence::{
        BetHistoryEntry, BetResult, InMemoryPersistence, PersistenceResult, TransactionEntry,
    };
    use crate::external::wallet::InMemoryWallet;
    use crate::game::events::TableEventData;
    use crate::game::outcome::REAL_BETTOR_BIAS_BPS;
    use crate::game::settlement::SettlementRecord;
    use crate::game::state::BettorId;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
    }

    /// Persistence that panics on the first settlement write.
    #[derive(Default)]
    struct FlakyPersistence {
        inner: InMemoryPersistence,
        tripped: AtomicBool,
    }

    impl Persistence for FlakyPersistence {
        fn save_settlement(&self, record: &SettlementRecord) -> PersistenceResult<()> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("disk on fire");
            }
            self.inner.save_settlement(record)
        }
        fn append_override_history(&self, entry: &OverrideHistoryEntry) -> PersistenceResult<()> {
            self.inner.append_override_history(entry)
        }
        fn append_bet_history(&self, entry: &BetHistoryEntry) -> PersistenceResult<()> {
            self.inner.append_bet_history(entry)
        }
        fn resolve_bet_history(
            &self,
            round_id: &RoundId,
            bettor: &BettorId,
            number: Number,
            result: &BetResult,
        ) -> PersistenceResult<()> {
            self.inner.resolve_bet_history(round_id, bettor, number, result)
        }
        fn append_transaction(&self, entry: &TransactionEntry) -> PersistenceResult<()> {
            self.inner.append_transaction(entry)
        }
        fn settlements(&self, limit: usize) -> Vec<SettlementRecord> {
            self.inner.settlements(limit)
        }
        fn settlement(&self, round_id: &RoundId) -> Option<SettlementRecord> {
            self.inner.settlement(round_id)
        }
        fn override_history(&self, limit: usize) -> Vec<OverrideHistoryEntry> {
            self.inner.override_history(limit)
        }
        fn bet_history(&self, bettor: &BettorId) -> Vec<BetHistoryEntry> {
            self.inner.bet_history(bettor)
        }
        fn transactions(&self, bettor: &BettorId) -> Vec<TransactionEntry> {
            self.inner.transactions(bettor)
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        wallet: Arc<InMemoryWallet>,
        registry: Arc<OverrideRegistry>,
        services: Arc<TableServices>,
        shutdown: broadcast::Sender<()>,
    }

    fn create_harness(persistence: Arc<dyn Persistence>) -> Harness {
        let clock = Arc::new(ManualClock::new(at(12, 0, 0)));
        let wallet = Arc::new(InMemoryWallet::new());
        let round_clock = RoundClock::default();
        let registry = Arc::new(OverrideRegistry::new(round_clock.clone(), Duration::minutes(60), persistence.clone()));
        let (events, _) = broadcast::channel(256);
        let (shutdown, _) = broadcast::channel(1);

        let services = Arc::new(TableServices {
            clock: clock.clone(),
            round_clock,
            liquidity: LiquidityConfig::default(),
            resolver: OutcomeResolver::new(registry.clone(), REAL_BETTOR_BIAS_BPS),
            settlement: SettlementEngine::new(wallet.clone(), persistence.clone(), registry.clone()),
            wallet: wallet.clone(),
            persistence,
            events,
            tick_interval: StdDuration::from_millis(5),
            failure_backoff: StdDuration::from_millis(5),
        });

        Harness {
            clock,
            wallet,
            registry,
            services,
            shutdown,
        }
    }

    fn spawn(harness: &Harness) -> (TableHandle, JoinHandle<()>) {
        let table = TableState::new(
            GameKind::Silver,
            1,
            GameKind::Silver.default_config(),
            &harness.services.round_clock,
            harness.clock.now(),
            DrawRng::new(5),
        );
        spawn_table(table, harness.services.clone(), harness.shutdown.subscribe(), 16)
    }

    /// Wait for the frozen-clock synthetic bet, then return a number nobody holds.
    async fn free_number(handle: &TableHandle) -> Number {
        timeout(StdDuration::from_secs(2), async {
            while handle.snapshot().players == 0 {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let snapshot = handle.snapshot();
        (0..=9).find(|n| snapshot.bets.iter().all(|b| b.number != *n)).unwrap()
    }

    async fn next_finished(events: &mut broadcast::Receiver<TableEvent>) -> TableEvent {
        loop {
            let event = events.recv().await.unwrap();
            if matches!(event.data, TableEventData::RoundFinished { .. }) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_bet_goes_through_loop() {
        let harness = create_harness(Arc::new(InMemoryPersistence::new()));
        harness.wallet.open_account(BettorId::new("alice"), 1_000);
        let (handle, task) = spawn(&harness);

        let number = free_number(&handle).await;
        let receipt = handle.place_bet(BetRequest::new(BettorId::new("alice"), number)).await.unwrap();
        assert_eq!(receipt.new_balance, 800);
        assert!(handle.snapshot().bets.iter().any(|b| b.number == number));

        let again = handle.place_bet(BetRequest::new(BettorId::new("alice"), number)).await;
        assert_eq!(again, Err(AdmissionRejected::NumberTaken { number }));

        harness.shutdown.send(()).unwrap();
        timeout(StdDuration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_round_finishes_on_clock() {
        let harness = create_harness(Arc::new(InMemoryPersistence::new()));
        let mut events = harness.services.events.subscribe();
        let (handle, _task) = spawn(&harness);
        let first_round = handle.snapshot().round_id;

        harness.clock.set(at(12, 5, 0));
        let finished = timeout(StdDuration::from_secs(2), next_finished(&mut events)).await.unwrap();
        assert_eq!(finished.round_id, first_round);

        harness.clock.set(at(12, 5, 3));
        timeout(StdDuration::from_secs(2), async {
            while handle.snapshot().round_id == first_round {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let number = free_number(&handle).await;
        let late = handle.place_bet(BetRequest::new(BettorId::new("nobody"), number)).await;
        assert_eq!(late, Err(AdmissionRejected::UnknownBettor));
    }

    #[tokio::test]
    async fn test_loop_recovers_from_panicking_settlement() {
        let harness = create_harness(Arc::new(FlakyPersistence::default()));
        harness.wallet.open_account(BettorId::new("bob"), 1_000);
        let mut events = harness.services.events.subscribe();
        let (handle, task) = spawn(&harness);
        let first_round = handle.snapshot().round_id;

        let number = free_number(&handle).await;
        harness.registry.set(first_round, number, "ops", at(10, 0, 0)).unwrap();
        handle.place_bet(BetRequest::new(BettorId::new("bob"), number)).await.unwrap();

        harness.clock.set(at(12, 5, 0));
        let finished = timeout(StdDuration::from_secs(2), next_finished(&mut events)).await.unwrap();
        assert_eq!(finished.round_id, first_round);
        match finished.data {
            TableEventData::RoundFinished { outcome, winners } => {
                assert_eq!(outcome, number);
                assert_eq!(winners.len(), 1);
                assert_eq!(winners[0].bettor, BettorId::new("bob"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let record = harness.services.persistence.settlement(&first_round).unwrap();
        assert_eq!(record.outcome, number);
        assert_eq!(harness.wallet.balance(&BettorId::new("bob")), Some(1_000 - 200 + 1_000));
        assert_eq!(harness.services.persistence.transactions(&BettorId::new("bob")).len(), 1);
        assert_eq!(
            harness.registry.get(&first_round).unwrap().status,
            OverrideStatus::Executed { outcome: number, honored: true }
        );

        harness.clock.set(at(12, 5, 3));
        timeout(StdDuration::from_secs(2), async {
            while handle.snapshot().round_id == first_round {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!task.is_finished());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_bets_on_one_number() {
        let harness = create_harness(Arc::new(InMemoryPersistence::new()));
        let players: Vec<BettorId> = (0..5).map(|i| BettorId::new(format!("p{i}"))).collect();
        for player in &players {
            harness.wallet.open_account(player.clone(), 1_000);
        }
        let (handle, task) = spawn(&harness);
        let number = free_number(&handle).await;

        let mut bets = tokio::task::JoinSet::new();
        for player in players.clone() {
            let handle = handle.clone();
            bets.spawn(async move {
                let verdict = handle.place_bet(BetRequest::new(player.clone(), number)).await;
                (player, verdict)
            });
        }

        let mut winners = Vec::new();
        while let Some(joined) = bets.join_next().await {
            let (player, verdict) = joined.unwrap();
            match verdict {
                Ok(receipt) => {
                    assert_eq!(receipt.number, number);
                    winners.push(player);
                }
                Err(rejected) => {
                    assert_eq!(rejected, AdmissionRejected::NumberTaken { number });
                    assert_eq!(harness.wallet.balance(&player), Some(1_000));
                }
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(harness.wallet.balance(&winners[0]), Some(800));
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.bets.iter().filter(|b| b.number == number).count(), 1);

        harness.shutdown.send(()).unwrap();
        timeout(StdDuration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bet_queued_across_close_is_rejected() {
        let harness = create_harness(Arc::new(InMemoryPersistence::new()));
        harness.wallet.open_account(BettorId::new("late"), 1_000);
        let (handle, task) = spawn(&harness);
        let number = free_number(&handle).await;

        // single-threaded runtime: the bet task does not run until we yield
        let queued = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.place_bet(BetRequest::new(BettorId::new("late"), number)).await })
        };
        harness.clock.set(at(12, 4, 45));

        let verdict = timeout(StdDuration::from_secs(2), queued).await.unwrap().unwrap();
        assert_eq!(verdict, Err(AdmissionRejected::BettingClosed));
        assert_eq!(harness.wallet.balance(&BettorId::new("late")), Some(1_000));
        assert!(handle.snapshot().bets.iter().all(|b| b.number != number));

        harness.shutdown.send(()).unwrap();
        timeout(StdDuration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stopped_table_is_unavailable() {
        let harness = create_harness(Arc::new(InMemoryPersistence::new()));
        let (handle, task) = spawn(&harness);
        harness.shutdown.send(()).unwrap();
        task.await.unwrap();

        let result = handle.place_bet(BetRequest::new(BettorId::new("alice"), 1)).await;
        assert_eq!(result, Err(AdmissionRejected::TableUnavailable));
    }
}
