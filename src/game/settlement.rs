//! Settlement Engine
//!
//! Turns a finished round into balance credits, resolved history entries and
//! one immutable settlement record. Settling a round identifier a second time
//! is a no-op.
//!
//! Progress is kept per round: every credit is remembered the moment the
//! wallet accepts it, and the round only counts as settled once its record is
//! saved. A settlement interrupted half way is finished by the next call
//! without paying anybody twice.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::admin::registry::OverrideRegistry;
use crate::core::hash::RecordHasher;
use crate::core::kind::{Coins, GameKind, Number};
use crate::core::round_id::{RoundId, TableNumber};
use crate::external::persistence::{BetResult, BetStatus, Persistence, TransactionEntry};
use crate::external::wallet::Wallet;
use crate::game::state::{BettorId, TableState};

/// How long settled round ids are remembered for re-entry checks.
pub const SETTLED_RETENTION_HOURS: i64 = 24;

/// Resolution of one real bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetResolution {
    /// Bettor.
    pub bettor: BettorId,
    /// Display name.
    pub display_name: String,
    /// Chosen number.
    pub number: Number,
    /// Stake debited at admission.
    pub stake: Coins,
    /// Win or lose.
    pub status: BetStatus,
    /// `+payout` or `-stake`.
    pub amount: i64,
    /// Balance after the credit, for winners whose credit went through.
    pub new_balance: Option<Coins>,
}

/// A paid winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    /// Bettor.
    pub bettor: BettorId,
    /// Display name.
    pub display_name: String,
    /// Winning number.
    pub number: Number,
    /// Amount credited.
    pub payout: Coins,
}

/// Immutable summary of a finished round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Round.
    pub round_id: RoundId,
    /// Game kind.
    pub kind: GameKind,
    /// Table number.
    pub table_number: TableNumber,
    /// Winning number.
    pub outcome: Number,
    /// Round start.
    pub started_at: DateTime<Utc>,
    /// Round end.
    pub ended_at: DateTime<Utc>,
    /// When settlement ran.
    pub settled_at: DateTime<Utc>,
    /// Real bets, in admission order.
    pub resolutions: Vec<BetResolution>,
    /// Distinct real bettors.
    pub player_count: usize,
    /// Sum of real stakes.
    pub total_staked: Coins,
    /// Sum of credited payouts.
    pub total_paid_out: Coins,
    /// Synthetic bets left out of settlement.
    pub synthetic_bet_count: usize,
    /// SHA-256 hex over every other field.
    pub digest: String,
}

impl SettlementRecord {
    /// Digest over the record's fields (excluding `digest`).
    pub fn compute_digest(&self) -> String {
        let mut hasher = RecordHasher::for_settlement();
        hasher.update_str(&self.round_id.to_string());
        hasher.update_u8(self.outcome);
        hasher.update_i64(self.started_at.timestamp());
        hasher.update_i64(self.ended_at.timestamp());
        hasher.update_i64(self.settled_at.timestamp_millis());
        hasher.update_u64(self.resolutions.len() as u64);
        for r in &self.resolutions {
            hasher.update_str(r.bettor.as_str());
            hasher.update_u8(r.number);
            hasher.update_u64(r.stake);
            hasher.update_bool(r.status == BetStatus::Win);
            hasher.update_i64(r.amount);
        }
        hasher.update_u64(self.player_count as u64);
        hasher.update_u64(self.total_staked);
        hasher.update_u64(self.total_paid_out);
        hasher.update_u64(self.synthetic_bet_count as u64);
        hasher.finalize_hex()
    }

    /// Whether the stored digest still matches.
    pub fn verify_digest(&self) -> bool {
        self.digest == self.compute_digest()
    }

    /// Winners whose credit went through.
    pub fn winners(&self) -> Vec<Winner> {
        self.resolutions
            .iter()
            .filter(|r| r.status == BetStatus::Win && r.new_balance.is_some())
            .map(|r| Winner {
                bettor: r.bettor.clone(),
                display_name: r.display_name.clone(),
                number: r.number,
                payout: r.amount.unsigned_abs(),
            })
            .collect()
    }
}

/// Payout already applied to one winning bet.
#[derive(Debug, Clone, Copy)]
struct Credit {
    new_balance: Coins,
    logged: bool,
}

/// What has been done for one round so far.
#[derive(Debug)]
struct RoundProgress {
    started_at: DateTime<Utc>,
    credits: HashMap<(BettorId, Number), Credit>,
    complete: bool,
}

impl RoundProgress {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            credits: HashMap::new(),
            complete: false,
        }
    }
}

/// Settles finished rounds exactly once.
pub struct SettlementEngine {
    wallet: Arc<dyn Wallet>,
    persistence: Arc<dyn Persistence>,
    overrides: Arc<OverrideRegistry>,
    rounds: DashMap<RoundId, RoundProgress>,
    retention: Duration,
}

impl SettlementEngine {
    /// Create an engine.
    pub fn new(wallet: Arc<dyn Wallet>, persistence: Arc<dyn Persistence>, overrides: Arc<OverrideRegistry>) -> Self {
        Self {
            wallet,
            persistence,
            overrides,
            rounds: DashMap::new(),
            retention: Duration::hours(SETTLED_RETENTION_HOURS),
        }
    }

    /// Whether a round was already settled.
    pub fn is_settled(&self, round_id: &RoundId) -> bool {
        self.rounds.get(round_id).is_some_and(|p| p.complete) || self.persistence.settlement(round_id).is_some()
    }

    /// Settle the table's current round.
    ///
    /// Returns `None` when the round has no outcome yet or was settled
    /// before; nothing is credited or written in either case. When an
    /// earlier call stopped part way, this call completes the round and
    /// skips the credits already applied.
    pub fn settle(&self, table: &TableState, now: DateTime<Utc>) -> Option<SettlementRecord> {
        let round_id = table.round_id;
        let Some(outcome) = table.outcome() else {
            warn!(round = %round_id, "settlement skipped: no outcome");
            return None;
        };

        if self.is_settled(&round_id) {
            debug!(round = %round_id, "round already settled");
            return None;
        }
        if self.rounds.contains_key(&round_id) {
            warn!(round = %round_id, "resuming interrupted settlement");
        } else {
            self.rounds.insert(round_id, RoundProgress::new(now));
        }

        let payout = table.config.payout;
        let mut resolutions = Vec::new();
        let mut bettors = BTreeSet::new();
        let mut total_staked: Coins = 0;
        let mut total_paid_out: Coins = 0;
        let mut synthetic_bet_count = 0;

        for bet in table.ledger.bets() {
            if bet.synthetic {
                synthetic_bet_count += 1;
                continue;
            }
            bettors.insert(bet.bettor.clone());
            total_staked += bet.stake;

            let won = bet.number == outcome;
            let (status, amount) = if won {
                (BetStatus::Win, payout as i64)
            } else {
                (BetStatus::Lose, -(bet.stake as i64))
            };

            let mut new_balance = None;
            if won {
                if let Some(credit) = self.apply_credit(&round_id, &bet.bettor, bet.number, payout) {
                    new_balance = Some(credit.new_balance);
                    total_paid_out += payout;
                    if !credit.logged {
                        let entry = TransactionEntry {
                            bettor: bet.bettor.clone(),
                            kind: table.kind,
                            round_id,
                            table_number: table.table_number,
                            number: bet.number,
                            stake: bet.stake,
                            amount: payout,
                            new_balance: credit.new_balance,
                            created_at: now,
                        };
                        if let Err(e) = self.persistence.append_transaction(&entry) {
                            warn!(round = %round_id, bettor = %bet.bettor, error = %e, "failed to record transaction");
                        }
                        self.mark_logged(&round_id, &bet.bettor, bet.number);
                    }
                }
            }

            let result = BetResult {
                winning_number: outcome,
                status,
                amount,
                resolved_at: now,
            };
            if let Err(e) = self
                .persistence
                .resolve_bet_history(&round_id, &bet.bettor, bet.number, &result)
            {
                warn!(round = %round_id, bettor = %bet.bettor, error = %e, "failed to resolve bet history");
            }

            resolutions.push(BetResolution {
                bettor: bet.bettor.clone(),
                display_name: bet.display_name.clone(),
                number: bet.number,
                stake: bet.stake,
                status,
                amount,
                new_balance,
            });
        }

        let mut record = SettlementRecord {
            round_id,
            kind: table.kind,
            table_number: table.table_number,
            outcome,
            started_at: table.schedule.start,
            ended_at: table.schedule.end,
            settled_at: now,
            resolutions,
            player_count: bettors.len(),
            total_staked,
            total_paid_out,
            synthetic_bet_count,
            digest: String::new(),
        };
        record.digest = record.compute_digest();

        if let Err(e) = self.persistence.save_settlement(&record) {
            warn!(round = %round_id, error = %e, "failed to save settlement record");
        }
        self.overrides.mark_executed(&round_id, outcome, now);
        if let Some(mut progress) = self.rounds.get_mut(&round_id) {
            progress.complete = true;
        }

        let cutoff = now - self.retention;
        self.rounds.retain(|_, progress| progress.started_at >= cutoff);
        self.overrides.prune(cutoff, now);

        info!(
            round = %round_id,
            outcome,
            players = record.player_count,
            staked = record.total_staked,
            paid = record.total_paid_out,
            "round settled"
        );
        Some(record)
    }
}

impl SettlementEngine {
    /// Credit a winning bet unless this round already paid it.
    fn apply_credit(&self, round_id: &RoundId, bettor: &BettorId, number: Number, payout: Coins) -> Option<Credit> {
        let key = (bettor.clone(), number);
        if let Some(credit) = self.rounds.get(round_id).and_then(|p| p.credits.get(&key).copied()) {
            debug!(round = %round_id, bettor = %bettor, "payout already applied");
            return Some(credit);
        }

        match self.wallet.credit(bettor, payout) {
            Ok(new_balance) => {
                let credit = Credit {
                    new_balance,
                    logged: false,
                };
                if let Some(mut progress) = self.rounds.get_mut(round_id) {
                    progress.credits.insert(key, credit);
                }
                Some(credit)
            }
            Err(e) => {
                error!(round = %round_id, bettor = %bettor, error = %e, "payout credit failed");
                None
            }
        }
    }

    fn mark_logged(&self, round_id: &RoundId, bettor: &BettorId, number: Number) {
        if let Some(mut progress) = self.rounds.get_mut(round_id) {
            if let Some(credit) = progress.credits.get_mut(&(bettor.clone(), number)) {
                credit.logged = true;
            }
        }
    }
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("rounds", &self.rounds.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::admin::registry::{OverrideHistoryEntry, OverrideStatus};
    use crate::core::clock::RoundClock;
    use crate::core::rng::DrawRng;
    use crate::external::persistence::{BetHistoryEntry, InMemoryPersistence, PersistenceResult};
    use crate::external::wallet::InMemoryWallet;
    use crate::game::state::Bet;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
    }

    struct Setup {
        engine: SettlementEngine,
        wallet: Arc<InMemoryWallet>,
        persistence: Arc<InMemoryPersistence>,
        table: TableState,
    }

    fn create_test_setup() -> Setup {
        let clock = RoundClock::default();
        let wallet = Arc::new(InMemoryWallet::new());
        let persistence = Arc::new(InMemoryPersistence::new());
        let registry = Arc::new(OverrideRegistry::new(clock.clone(), Duration::minutes(60), persistence.clone()));
        let engine = SettlementEngine::new(wallet.clone(), persistence.clone(), registry);
        let table = TableState::new(
            GameKind::Silver,
            1,
            GameKind::Silver.default_config(),
            &clock,
            at(12, 0, 0),
            DrawRng::new(1),
        );
        Setup {
            engine,
            wallet,
            persistence,
            table,
        }
    }

    fn add_bet(setup: &mut Setup, who: &str, number: Number, synthetic: bool) {
        let table = &mut setup.table;
        let bet = Bet {
            bettor: BettorId::new(who),
            display_name: who.to_string(),
            number,
            stake: table.config.stake,
            placed_at: at(12, 1, 0),
            synthetic,
        };
        if !synthetic {
            setup.wallet.open_account(BettorId::new(who), 0);
            setup
                .persistence
                .append_bet_history(&BetHistoryEntry::pending(
                    BettorId::new(who),
                    table.kind,
                    table.round_id,
                    table.table_number,
                    number,
                    table.config.stake,
                    at(12, 1, 0),
                ))
                .unwrap();
        }
        let config = table.config.clone();
        table.ledger.admit(table.kind, &config, bet, true).unwrap();
    }

    #[test]
    fn test_settle_pays_winner_once() {
        let mut setup = create_test_setup();
        add_bet(&mut setup, "alice", 2, false);
        add_bet(&mut setup, "bob", 5, false);
        setup.table.set_outcome(5);

        let record = setup.engine.settle(&setup.table, at(12, 5, 0)).unwrap();
        assert_eq!(record.total_paid_out, 1000);
        assert_eq!(record.total_staked, 400);
        assert_eq!(record.player_count, 2);
        assert!(record.verify_digest());
        assert_eq!(setup.wallet.balance(&BettorId::new("bob")), Some(1000));

        assert!(setup.engine.settle(&setup.table, at(12, 5, 1)).is_none());
        assert_eq!(setup.wallet.balance(&BettorId::new("bob")), Some(1000));
        assert_eq!(setup.persistence.transactions(&BettorId::new("bob")).len(), 1);
        assert!(setup.engine.is_settled(&setup.table.round_id));
    }

    #[test]
    fn test_settle_without_outcome_is_noop() {
        let mut setup = create_test_setup();
        add_bet(&mut setup, "alice", 2, false);
        assert!(setup.engine.settle(&setup.table, at(12, 5, 0)).is_none());
        assert!(!setup.engine.is_settled(&setup.table.round_id));
    }

    #[test]
    fn test_synthetic_bets_excluded() {
        let mut setup = create_test_setup();
        add_bet(&mut setup, "bot_Meera404", 3, true);
        setup.table.set_outcome(3);

        let record = setup.engine.settle(&setup.table, at(12, 5, 0)).unwrap();
        assert!(record.resolutions.is_empty());
        assert!(record.winners().is_empty());
        assert_eq!(record.synthetic_bet_count, 1);
        assert_eq!(record.total_paid_out, 0);
    }

    #[test]
    fn test_history_resolved() {
        let mut setup = create_test_setup();
        add_bet(&mut setup, "alice", 2, false);
        add_bet(&mut setup, "alice", 7, false);
        setup.table.set_outcome(7);
        setup.engine.settle(&setup.table, at(12, 5, 0)).unwrap();

        let history = setup.persistence.bet_history(&BettorId::new("alice"));
        let amounts: Vec<i64> = history.iter().map(|e| e.result.as_ref().unwrap().amount).collect();
        assert_eq!(amounts, vec![-200, 1000]);

        let games = setup.persistence.user_games(&BettorId::new("alice"));
        assert_eq!(games.game_history.len(), 1);
        assert_eq!(games.game_history[0].amount, 800);
    }

    /// Where [`FlakyPersistence`] panics, once.
    #[derive(Clone, Copy, PartialEq)]
    enum Trip {
        Transaction,
        Save,
    }

    struct FlakyPersistence {
        inner: InMemoryPersistence,
        trip: Trip,
        tripped: AtomicBool,
    }

    impl FlakyPersistence {
        fn new(trip: Trip) -> Self {
            Self {
                inner: InMemoryPersistence::new(),
                trip,
                tripped: AtomicBool::new(false),
            }
        }

        fn maybe_panic(&self, point: Trip) {
            if self.trip == point && !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("storage unavailable");
            }
        }
    }

    impl Persistence for FlakyPersistence {
        fn save_settlement(&self, record: &SettlementRecord) -> PersistenceResult<()> {
            self.maybe_panic(Trip::Save);
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
            self.maybe_panic(Trip::Transaction);
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

    /// Alice bets 2, Bob bets 5 with an override on 5; the first settlement
    /// attempt panics at `trip` and the second must finish the round.
    fn settle_after_panic(trip: Trip) -> (SettlementRecord, Arc<InMemoryWallet>, Arc<FlakyPersistence>, OverrideStatus) {
        let clock = RoundClock::default();
        let wallet = Arc::new(InMemoryWallet::new());
        let persistence = Arc::new(FlakyPersistence::new(trip));
        let registry = Arc::new(OverrideRegistry::new(clock.clone(), Duration::minutes(60), persistence.clone()));
        let engine = SettlementEngine::new(wallet.clone(), persistence.clone(), registry.clone());
        let mut table = TableState::new(
            GameKind::Silver,
            1,
            GameKind::Silver.default_config(),
            &clock,
            at(12, 0, 0),
            DrawRng::new(1),
        );
        registry.set(table.round_id, 5, "ops", at(10, 0, 0)).unwrap();

        for (who, number) in [("alice", 2), ("bob", 5)] {
            wallet.open_account(BettorId::new(who), 0);
            let bet = Bet {
                bettor: BettorId::new(who),
                display_name: who.to_string(),
                number,
                stake: table.config.stake,
                placed_at: at(12, 1, 0),
                synthetic: false,
            };
            let config = table.config.clone();
            table.ledger.admit(table.kind, &config, bet, true).unwrap();
        }
        assert_eq!(registry.consume(&table.round_id, at(12, 4, 58)), Some(5));
        table.set_outcome(5);

        let first = catch_unwind(AssertUnwindSafe(|| engine.settle(&table, at(12, 5, 0))));
        assert!(first.is_err());
        assert!(!engine.is_settled(&table.round_id));

        let record = engine.settle(&table, at(12, 5, 1)).unwrap();
        assert!(engine.settle(&table, at(12, 5, 2)).is_none());

        let status = registry.get(&table.round_id).unwrap().status;
        (record, wallet, persistence, status)
    }

    #[test]
    fn test_settlement_resumes_after_failed_save() {
        let (record, wallet, persistence, status) = settle_after_panic(Trip::Save);

        assert_eq!(persistence.settlement(&record.round_id), Some(record.clone()));
        assert_eq!(persistence.settlements(10).len(), 1);
        assert_eq!(wallet.balance(&BettorId::new("bob")), Some(1000));
        assert_eq!(record.winners().len(), 1);
        assert_eq!(record.winners()[0].bettor, BettorId::new("bob"));
        assert_eq!(record.total_paid_out, 1000);
        assert_eq!(persistence.transactions(&BettorId::new("bob")).len(), 1);
        assert_eq!(status, OverrideStatus::Executed { outcome: 5, honored: true });
    }

    #[test]
    fn test_settlement_resumes_after_failed_transaction_log() {
        let (record, wallet, persistence, status) = settle_after_panic(Trip::Transaction);

        // credited before the panic, not again on the retry
        assert_eq!(wallet.balance(&BettorId::new("bob")), Some(1000));
        assert_eq!(record.resolutions.iter().find(|r| r.number == 5).unwrap().new_balance, Some(1000));
        assert_eq!(persistence.transactions(&BettorId::new("bob")).len(), 1);
        assert!(persistence.settlement(&record.round_id).is_some());
        assert_eq!(status, OverrideStatus::Executed { outcome: 5, honored: true });
    }

    #[test]
    fn test_tampered_record_fails_digest() {
        let mut setup = create_test_setup();
        add_bet(&mut setup, "alice", 2, false);
        setup.table.set_outcome(2);
        let mut record = setup.engine.settle(&setup.table, at(12, 5, 0)).unwrap();

        record.total_paid_out += 1;
        assert!(!record.verify_digest());
    }
}
