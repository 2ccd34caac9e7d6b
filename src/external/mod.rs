//! Collaborators at the engine boundary: wallet and history storage.

pub mod wallet;
pub mod persistence;
pub mod jsonl;

pub use wallet::{InMemoryWallet, Wallet, WalletError};
pub use persistence::{
    BetHistoryEntry, BetResult, BetStatus, InMemoryPersistence, Persistence, PersistenceError,
    PersistenceResult, TransactionEntry, UserGame, UserGames,
};
pub use jsonl::JsonLinesPersistence;
