//! JSON Lines history writer.
//!
//! Every record is appended as one JSON object per line to a per-stream file
//! under the history directory:
//!
//! - `settlements.jsonl`
//! - `override_history.jsonl`
//! - `bet_history.jsonl` (pending entries)
//! - `bet_results.jsonl` (resolutions, joined on round / bettor / number)
//! - `transactions.jsonl`
//!
//! Files are opened in append mode, so an interrupted write only damages its
//! own line. Reads are served from an in-memory mirror.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::admin::registry::OverrideHistoryEntry;
use crate::core::kind::Number;
use crate::core::round_id::RoundId;
use crate::external::persistence::{
    BetHistoryEntry, BetResult, InMemoryPersistence, Persistence, PersistenceResult,
    TransactionEntry,
};
use crate::game::settlement::SettlementRecord;
use crate::game::state::BettorId;

const SETTLEMENTS: &str = "settlements";
const OVERRIDE_HISTORY: &str = "override_history";
const BET_HISTORY: &str = "bet_history";
const BET_RESULTS: &str = "bet_results";
const TRANSACTIONS: &str = "transactions";

#[derive(Serialize)]
struct BetResultLine<'a> {
    round_id: &'a RoundId,
    bettor: &'a BettorId,
    number: Number,
    #[serde(flatten)]
    result: &'a BetResult,
}

/// Append-only JSON Lines persistence.
pub struct JsonLinesPersistence {
    base_dir: PathBuf,
    writers: Mutex<HashMap<&'static str, BufWriter<File>>>,
    mirror: InMemoryPersistence,
}

impl JsonLinesPersistence {
    /// Create the writer, creating `base_dir` if needed.
    pub fn new(base_dir: impl AsRef<Path>) -> PersistenceResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        info!(dir = %base_dir.display(), "JSON Lines history enabled");

        Ok(Self {
            base_dir,
            writers: Mutex::new(HashMap::new()),
            mirror: InMemoryPersistence::new(),
        })
    }

    /// Directory holding the stream files.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn append<T: Serialize>(&self, stream: &'static str, record: &T) -> PersistenceResult<()> {
        let json = serde_json::to_string(record)?;
        let mut writers = self.writers.lock().expect("writer lock poisoned");

        if !writers.contains_key(stream) {
            let path = self.base_dir.join(format!("{stream}.jsonl"));
            debug!(path = %path.display(), "opening history stream (append mode)");
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            writers.insert(stream, BufWriter::new(file));
        }

        if let Some(writer) = writers.get_mut(stream) {
            writeln!(writer, "{json}")?;
            writer.flush()?;
        }
        Ok(())
    }
}

impl Persistence for JsonLinesPersistence {
    fn save_settlement(&self, record: &SettlementRecord) -> PersistenceResult<()> {
        if self.mirror.settlement(&record.round_id).is_some() {
            return Ok(());
        }
        self.mirror.save_settlement(record)?;
        self.append(SETTLEMENTS, record)
    }

    fn append_override_history(&self, entry: &OverrideHistoryEntry) -> PersistenceResult<()> {
        self.mirror.append_override_history(entry)?;
        self.append(OVERRIDE_HISTORY, entry)
    }

    fn append_bet_history(&self, entry: &BetHistoryEntry) -> PersistenceResult<()> {
        self.mirror.append_bet_history(entry)?;
        self.append(BET_HISTORY, entry)
    }

    fn resolve_bet_history(
        &self,
        round_id: &RoundId,
        bettor: &BettorId,
        number: Number,
        result: &BetResult,
    ) -> PersistenceResult<()> {
        self.mirror.resolve_bet_history(round_id, bettor, number, result)?;
        self.append(
            BET_RESULTS,
            &BetResultLine {
                round_id,
                bettor,
                number,
                result,
            },
        )
    }

    fn append_transaction(&self, entry: &TransactionEntry) -> PersistenceResult<()> {
        self.mirror.append_transaction(entry)?;
        self.append(TRANSACTIONS, entry)
    }

    fn settlements(&self, limit: usize) -> Vec<SettlementRecord> {
        self.mirror.settlements(limit)
    }

    fn settlement(&self, round_id: &RoundId) -> Option<SettlementRecord> {
        self.mirror.settlement(round_id)
    }

    fn override_history(&self, limit: usize) -> Vec<OverrideHistoryEntry> {
        self.mirror.override_history(limit)
    }

    fn bet_history(&self, bettor: &BettorId) -> Vec<BetHistoryEntry> {
        self.mirror.bet_history(bettor)
    }

    fn transactions(&self, bettor: &BettorId) -> Vec<TransactionEntry> {
        self.mirror.transactions(bettor)
    }
}

impl Drop for JsonLinesPersistence {
    fn drop(&mut self) {
        if let Ok(mut writers) = self.writers.lock() {
            for (stream, writer) in writers.iter_mut() {
                if let Err(e) = writer.flush() {
                    warn!(stream, ?e, "failed to flush history stream on drop");
                }
            }
        }
    }
}
