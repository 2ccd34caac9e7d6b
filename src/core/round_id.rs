//! Round Identifiers
//!
//! A round identifier is derived purely from (kind, slot start, table number),
//! so every process computes the same identifier for the same round and an
//! administrator can name a round long before it exists.
//!
//! Wire format: `<LETTER><unix seconds>-<table number>`, e.g. `S1760875200-3`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::kind::GameKind;

/// Table number within a kind (1-based).
pub type TableNumber = u32;

/// Deterministic round identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoundId {
    kind: GameKind,
    slot_secs: i64,
    table_number: TableNumber,
}

impl RoundId {
    /// Build an identifier. Sub-second precision is dropped.
    pub fn new(kind: GameKind, slot_start: DateTime<Utc>, table_number: TableNumber) -> Self {
        Self {
            kind,
            slot_secs: slot_start.timestamp(),
            table_number,
        }
    }

    /// Game kind.
    pub fn kind(&self) -> GameKind {
        self.kind
    }

    /// Table number.
    pub fn table_number(&self) -> TableNumber {
        self.table_number
    }

    /// Period-aligned slot start encoded in the identifier.
    pub fn slot_start(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.slot_secs, 0).unwrap_or_default()
    }

    /// Slot start as unix seconds.
    pub fn slot_secs(&self) -> i64 {
        self.slot_secs
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-{}", self.kind.letter(), self.slot_secs, self.table_number)
    }
}

/// Round identifier parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundIdError {
    /// Empty input.
    #[error("empty round identifier")]
    Empty,

    /// First character is not a known kind letter.
    #[error("unknown game kind letter: {0}")]
    UnknownKind(char),

    /// Missing `-` separator.
    #[error("missing table separator in {0}")]
    MissingSeparator(String),

    /// Slot start is not an integer timestamp.
    #[error("invalid slot timestamp: {0}")]
    InvalidTimestamp(String),

    /// Table number is not a positive integer.
    #[error("invalid table number: {0}")]
    InvalidTable(String),
}

impl FromStr for RoundId {
    type Err = RoundIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let letter = chars.next().ok_or(RoundIdError::Empty)?;
        let kind = GameKind::from_letter(letter).ok_or(RoundIdError::UnknownKind(letter))?;

        let rest = chars.as_str();
        let (secs, table) = rest
            .rsplit_once('-')
            .ok_or_else(|| RoundIdError::MissingSeparator(s.to_string()))?;

        let slot_secs: i64 = secs
            .parse()
            .map_err(|_| RoundIdError::InvalidTimestamp(secs.to_string()))?;
        if DateTime::<Utc>::from_timestamp(slot_secs, 0).is_none() {
            return Err(RoundIdError::InvalidTimestamp(secs.to_string()));
        }

        let table_number: TableNumber = table
            .parse()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| RoundIdError::InvalidTable(table.to_string()))?;

        Ok(Self { kind, slot_secs, table_number })
    }
}

impl Serialize for RoundId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoundId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn slot(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_format() {
        let id = RoundId::new(GameKind::Silver, slot(1_760_875_200), 3);
        assert_eq!(id.to_string(), "S1760875200-3");
    }

    #[test]
    fn test_same_inputs_same_id() {
        let a = RoundId::new(GameKind::Gold, slot(1_760_875_200), 1);
        let b = RoundId::new(GameKind::Gold, slot(1_760_875_200), 1);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<RoundId>(), Err(RoundIdError::Empty));
        assert_eq!("X100-1".parse::<RoundId>(), Err(RoundIdError::UnknownKind('X')));
        assert!(matches!("S100".parse::<RoundId>(), Err(RoundIdError::MissingSeparator(_))));
        assert!(matches!("Sabc-1".parse::<RoundId>(), Err(RoundIdError::InvalidTimestamp(_))));
        assert!(matches!("S100-0".parse::<RoundId>(), Err(RoundIdError::InvalidTable(_))));
        assert!(matches!("S100-x".parse::<RoundId>(), Err(RoundIdError::InvalidTable(_))));
    }

    #[test]
    fn test_slot_before_epoch() {
        let id = RoundId::new(GameKind::Gold, slot(-300), 2);
        assert_eq!(id.to_string(), "G-300-2");
        assert_eq!("G-300-2".parse::<RoundId>(), Ok(id));
    }

    #[test]
    fn test_serde_as_string() {
        let id = RoundId::new(GameKind::Roulette, slot(1_760_875_500), 6);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"R1760875500-6\"");
        let back: RoundId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        #[test]
        fn prop_parse_inverts_format(
            kind_idx in 0usize..5,
            slot_index in -20_000_000i64..20_000_000,
            table in 1u32..1000,
        ) {
            let kind = GameKind::ALL[kind_idx];
            let start = slot(slot_index * 300);
            let id = RoundId::new(kind, start, table);
            let parsed: RoundId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed.kind(), kind);
            prop_assert_eq!(parsed.slot_start(), start);
            prop_assert_eq!(parsed.table_number(), table);
        }
    }
}
