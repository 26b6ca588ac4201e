// Blockchain module
//
// The ledger core:
// - Transactions and their typed event payloads
// - Blocks and the proof of work search
// - The chain, pending pool, validation and replay queries
// - Snapshot persistence and autosave
// - The mining worker and the service facade used by callers

pub mod block;
pub mod chain;
pub mod crypto;
pub mod event;
pub mod hashing;
pub mod miner;
pub mod service;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, ErrorKind, Inclusion, LedgerConfig, LedgerEntry};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use event::{LedgerEvent, Metadata};
pub use service::{LedgerService, MineOutcome};
pub use storage::{JsonFileStore, Persistence, SledStore, SnapshotStore};
pub use transaction::{SignaturePolicy, Transaction};
