//! Game Kinds
//!
//! Every table belongs to one game kind. The kind fixes the number range,
//! the stake and payout per bet, the table capacity and how many bets a
//! single player may hold in one round.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A chosen or winning number.
pub type Number = u8;

/// Coin amount (stakes, payouts, balances).
pub type Coins = u64;

/// Game kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Frog Leap, numbers 0-9.
    Silver,
    /// Football Goal, numbers 0-9.
    Gold,
    /// Archer Hit, numbers 0-9.
    Diamond,
    /// Parachute Drop, numbers 0-9.
    Platinum,
    /// Wheel, numbers 0-36.
    Roulette,
}

impl GameKind {
    /// All kinds, in table start-up order.
    pub const ALL: [GameKind; 5] = [
        GameKind::Silver,
        GameKind::Gold,
        GameKind::Diamond,
        GameKind::Platinum,
        GameKind::Roulette,
    ];

    /// Single-letter prefix used in round identifiers.
    pub const fn letter(self) -> char {
        match self {
            GameKind::Silver => 'S',
            GameKind::Gold => 'G',
            GameKind::Diamond => 'D',
            GameKind::Platinum => 'P',
            GameKind::Roulette => 'R',
        }
    }

    /// Inverse of [`GameKind::letter`].
    pub fn from_letter(letter: char) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.letter() == letter)
    }

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            GameKind::Silver => "silver",
            GameKind::Gold => "gold",
            GameKind::Diamond => "diamond",
            GameKind::Platinum => "platinum",
            GameKind::Roulette => "roulette",
        }
    }

    /// Highest number that can be picked (inclusive).
    pub const fn max_number(self) -> Number {
        match self {
            GameKind::Roulette => 36,
            _ => 9,
        }
    }

    /// Whether `number` is inside this kind's range.
    #[inline]
    pub fn is_valid_number(self, number: Number) -> bool {
        number <= self.max_number()
    }

    /// Every number of the range, ascending.
    pub fn numbers(self) -> impl Iterator<Item = Number> {
        0..=self.max_number()
    }

    /// Built-in table parameters for this kind.
    pub fn default_config(self) -> GameKindConfig {
        let (stake, payout, name, title) = match self {
            GameKind::Silver => (200, 1000, "Silver Game", "Frog Leap"),
            GameKind::Gold => (250, 1250, "Gold Game", "Football Goal"),
            GameKind::Diamond => (100, 500, "Diamond Game", "Archer Hit"),
            GameKind::Platinum => (1000, 5000, "Platinum Game", "Parachute Drop"),
            GameKind::Roulette => (200, 2000, "Roulette Game", "Roulette Spin"),
        };

        GameKindConfig {
            stake,
            payout,
            capacity: 6,
            max_bets_per_bettor: 4,
            name: name.to_string(),
            title: title.to_string(),
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown game kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown game kind: {0}")]
pub struct UnknownGameKind(pub String);

impl FromStr for GameKind {
    type Err = UnknownGameKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownGameKind(s.to_string()))
    }
}

/// Per-kind table parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameKindConfig {
    /// Stake debited for every bet.
    pub stake: Coins,
    /// Amount credited to a winning bet.
    pub payout: Coins,
    /// Maximum bets per round (real and synthetic together).
    pub capacity: usize,
    /// Maximum bets one real bettor may hold per round.
    pub max_bets_per_bettor: usize,
    /// Display name.
    pub name: String,
    /// Display title.
    pub title: String,
}
