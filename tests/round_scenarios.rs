//! End-to-end round scenarios through the public API: admission, override
//! handling, outcome resolution and settlement of a single table.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use numbers_table::admin::registry::{OverrideRegistry, OverrideStatus};
use numbers_table::core::kind::{GameKindConfig, Number};
use numbers_table::core::rng::DrawRng;
use numbers_table::external::persistence::{BetStatus, InMemoryPersistence, Persistence};
use numbers_table::external::wallet::{InMemoryWallet, Wallet};
use numbers_table::game::ledger::place_player_bet;
use numbers_table::game::outcome::OutcomeResolver;
use numbers_table::game::settlement::SettlementEngine;
use numbers_table::game::state::{Bet, TableState};
use numbers_table::{AdmissionRejected, BetRequest, BettorId, GameKind, RoundClock};

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
}

struct Round {
    table: TableState,
    wallet: Arc<InMemoryWallet>,
    persistence: Arc<InMemoryPersistence>,
    registry: Arc<OverrideRegistry>,
    resolver: OutcomeResolver,
    settlement: SettlementEngine,
}

impl Round {
    fn new(config: GameKindConfig, seed: u64) -> Self {
        let clock = RoundClock::default();
        let wallet = Arc::new(InMemoryWallet::new());
        let persistence = Arc::new(InMemoryPersistence::new());
        let registry = Arc::new(OverrideRegistry::new(
            clock.clone(),
            Duration::minutes(60),
            persistence.clone(),
        ));
        let table = TableState::new(GameKind::Silver, 1, config, &clock, at(12, 0, 0), DrawRng::new(seed));
        Self {
            resolver: OutcomeResolver::new(registry.clone(), 1_600),
            settlement: SettlementEngine::new(wallet.clone(), persistence.clone(), registry.clone()),
            table,
            wallet,
            persistence,
            registry,
        }
    }

    fn bet(&mut self, who: &str, number: Number) -> Result<(), AdmissionRejected> {
        let bettor = BettorId::new(who);
        self.wallet.open_account(bettor.clone(), 1_000);
        place_player_bet(
            &mut self.table,
            BetRequest::new(bettor, number),
            at(12, 1, 0),
            self.wallet.as_ref(),
            self.persistence.as_ref(),
        )
        .map(|_| ())
    }

    fn synthetic_bet(&mut self, name: &str, number: Number) {
        let bet = Bet {
            bettor: BettorId::synthetic(name),
            display_name: name.to_string(),
            number,
            stake: self.table.config.stake,
            placed_at: at(12, 1, 30),
            synthetic: true,
        };
        let config = self.table.config.clone();
        self.table.ledger.admit(self.table.kind, &config, bet, true).unwrap();
    }

    fn resolve(&mut self) -> Number {
        self.resolver.resolve(&mut self.table, at(12, 4, 58))
    }
}

#[test]
fn seventh_bet_is_rejected_as_table_full() {
    let mut round = Round::new(GameKind::Silver.default_config(), 1);
    for (i, number) in (0..6).enumerate() {
        round.bet(&format!("player{}", i / 3), number).unwrap();
    }

    assert_eq!(round.bet("player9", 6), Err(AdmissionRejected::TableFull));
    assert_eq!(round.table.ledger.len(), 6);
    assert_eq!(round.wallet.balance(&BettorId::new("player9")), Some(1_000));
}

#[test]
fn taken_number_is_rejected() {
    let mut round = Round::new(GameKind::Silver.default_config(), 1);
    round.bet("alice", 4).unwrap();

    assert_eq!(round.bet("bob", 4), Err(AdmissionRejected::NumberTaken { number: 4 }));
    assert_eq!(round.wallet.balance(&BettorId::new("bob")), Some(1_000));
}

#[test]
fn override_on_unbet_number_falls_back_to_draw() {
    let mut round = Round::new(GameKind::Silver.default_config(), 3);
    let round_id = round.table.round_id;
    round.registry.set(round_id, 7, "ops", at(10, 30, 0)).unwrap();

    round.bet("alice", 1).unwrap();
    round.bet("bob", 2).unwrap();
    let outcome = round.resolve();

    assert!(outcome == 1 || outcome == 2);
    assert_ne!(outcome, 7);

    let record = round.settlement.settle(&round.table, at(12, 5, 0)).unwrap();
    assert_eq!(record.outcome, outcome);
    assert!(matches!(
        round.registry.get(&round_id).unwrap().status,
        OverrideStatus::Executed { honored: false, .. }
    ));
}

#[test]
fn override_on_bet_number_is_honored() {
    let mut round = Round::new(GameKind::Silver.default_config(), 3);
    let round_id = round.table.round_id;
    round.registry.set(round_id, 3, "ops", at(10, 30, 0)).unwrap();

    round.bet("alice", 3).unwrap();
    round.bet("bob", 8).unwrap();
    assert_eq!(round.resolve(), 3);
    // a second resolution returns the same outcome
    assert_eq!(round.resolve(), 3);

    let record = round.settlement.settle(&round.table, at(12, 5, 0)).unwrap();
    assert_eq!(record.outcome, 3);
    assert!(matches!(
        round.registry.get(&round_id).unwrap().status,
        OverrideStatus::Executed { outcome: 3, honored: true }
    ));
    assert_eq!(round.wallet.balance(&BettorId::new("alice")), Some(1_000 - 200 + 1_000));
}

#[test]
fn settlement_pays_winner_and_skips_synthetic() {
    let config = GameKindConfig {
        stake: 10,
        payout: 50,
        ..GameKind::Silver.default_config()
    };
    let mut round = Round::new(config, 5);
    round.bet("a", 2).unwrap();
    round.bet("b", 5).unwrap();
    round.synthetic_bet("Meera404", 6);
    round.table.set_outcome(5);

    let record = round.settlement.settle(&round.table, at(12, 5, 0)).unwrap();

    assert_eq!(record.player_count, 2);
    assert_eq!(record.synthetic_bet_count, 1);
    assert_eq!(record.resolutions.len(), 2);
    assert_eq!(record.total_paid_out, 50);
    assert!(record.verify_digest());

    let winners = record.winners();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].bettor, BettorId::new("b"));
    assert_eq!(winners[0].payout, 50);

    assert_eq!(round.wallet.balance(&BettorId::new("a")), Some(990));
    assert_eq!(round.wallet.balance(&BettorId::new("b")), Some(1_040));
    assert_eq!(round.wallet.balance(&BettorId::synthetic("Meera404")), None);

    let b_history = round.persistence.bet_history(&BettorId::new("b"));
    let b_result = b_history[0].result.as_ref().unwrap();
    assert_eq!(b_result.status, BetStatus::Win);
    assert_eq!(b_result.amount, 50);
    assert_eq!(round.persistence.transactions(&BettorId::new("b")).len(), 1);

    let a_history = round.persistence.bet_history(&BettorId::new("a"));
    assert_eq!(a_history[0].result.as_ref().unwrap().amount, -10);
    assert!(round.persistence.transactions(&BettorId::new("a")).is_empty());

    // second settlement of the same round changes nothing
    assert!(round.settlement.settle(&round.table, at(12, 5, 1)).is_none());
    assert_eq!(round.wallet.balance(&BettorId::new("b")), Some(1_040));
    assert_eq!(round.persistence.settlements(10).len(), 1);
}
