use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

use super::block::{Block, MiningError};
use super::crypto::Address;
use super::event::Metadata;
use super::miner::CancelToken;
use super::storage::{Snapshot, StorageError};
use super::transaction::{SignaturePolicy, Transaction, TransactionError};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Missing address: {0}")]
    MissingAddress(&'static str),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chain corrupted at block {index}: {fault}")]
    ChainCorrupted { index: u64, fault: ChainFault },

    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StorageError),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Broad classes of failure, for callers that map errors to responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A business rule rejected the request
    Rejected,
    NotFound,
    /// The request conflicts with the ledger's current state
    Conflict,
    Internal,
}

impl BlockchainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockchainError::MissingAddress(_) | BlockchainError::InvalidTransaction(_) => {
                ErrorKind::Rejected
            }
            BlockchainError::NotFound(_) => ErrorKind::NotFound,
            BlockchainError::ChainCorrupted { .. }
            | BlockchainError::Mining(MiningError::Cancelled { .. }) => ErrorKind::Conflict,
            BlockchainError::Mining(_)
            | BlockchainError::Persistence(_)
            | BlockchainError::SystemError(_) => ErrorKind::Internal,
        }
    }
}

/// Why a block failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum ChainFault {
    /// The stored hash does not match the block's contents
    HashMismatch { stored: String, computed: String },

    /// The block does not point at its predecessor's hash
    BrokenLink { expected: String, found: String },

    /// The chain has no genesis block
    Empty,
}

impl fmt::Display for ChainFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFault::HashMismatch { stored, computed } => {
                write!(f, "stored hash {} does not match computed hash {}", stored, computed)
            }
            ChainFault::BrokenLink { expected, found } => {
                write!(f, "previous hash {} does not match predecessor hash {}", found, expected)
            }
            ChainFault::Empty => write!(f, "chain has no genesis block"),
        }
    }
}

/// Which part of the ledger a history query covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Inclusion {
    SealedOnly,
    #[default]
    SealedAndPending,
}

/// A transaction together with where it sits in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub transaction: Transaction,

    /// True once the transaction is sealed in a block
    pub confirmed: bool,

    pub block_index: Option<u64>,

    pub block_hash: Option<String>,
}

impl LedgerEntry {
    fn sealed(block: &Block, transaction: &Transaction) -> Self {
        LedgerEntry {
            transaction: transaction.clone(),
            confirmed: true,
            block_index: Some(block.index),
            block_hash: Some(block.hash.clone()),
        }
    }

    fn pending(transaction: &Transaction) -> Self {
        LedgerEntry {
            transaction: transaction.clone(),
            confirmed: false,
            block_index: None,
            block_hash: None,
        }
    }
}

/// Settings a fresh ledger starts with
#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    /// Number of leading hex zeros a sealed block hash needs
    pub difficulty: u32,

    /// Amount credited to the reward address of every mined block
    pub mining_reward: f64,

    pub signature_policy: SignaturePolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: 2,
            mining_reward: 100.0,
            signature_policy: SignaturePolicy::Required,
        }
    }
}

/// Transactions accepted but not yet sealed
#[derive(Debug, Default)]
struct PendingPool {
    /// Drained by the mining pass in progress, still reported as pending
    sealing: Vec<Transaction>,

    /// Waiting for the next mining pass
    queued: Vec<Transaction>,
}

impl PendingPool {
    fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.sealing.iter().chain(self.queued.iter())
    }
}

/// The chain of sealed blocks plus the pending transaction pool.
///
/// Locks are always taken pool first, chain second.
#[derive(Debug)]
pub struct Blockchain {
    chain: RwLock<Vec<Block>>,

    pool: Mutex<PendingPool>,

    /// Held for the whole of a mining pass so passes never overlap
    mining: Mutex<()>,

    /// Bumped on every accepted transaction and appended block
    revision: AtomicU64,

    difficulty: u32,

    mining_reward: f64,

    signature_policy: SignaturePolicy,
}

impl Blockchain {
    /// Creates a new blockchain with a genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - Difficulty, mining reward and signature policy
    ///
    /// # Returns
    ///
    /// A blockchain holding only the genesis block and an empty pool
    pub fn new(config: LedgerConfig) -> Self {
        Blockchain {
            chain: RwLock::new(vec![Block::genesis()]),
            pool: Mutex::new(PendingPool::default()),
            mining: Mutex::new(()),
            revision: AtomicU64::new(0),
            difficulty: config.difficulty,
            mining_reward: config.mining_reward,
            signature_policy: config.signature_policy,
        }
    }

    /// Restores a blockchain exactly as it was snapshotted.
    ///
    /// Hashes and ids come from the snapshot. A chain that fails validation
    /// is still restored; callers decide how to report it. It is never
    /// repaired here.
    ///
    /// # Arguments
    ///
    /// * `snapshot` - The saved chain, pending pool and ledger settings
    /// * `policy` - Signature policy for transactions admitted from now on
    ///
    /// # Returns
    ///
    /// The restored blockchain, or `ChainCorrupted` if the snapshot holds no
    /// blocks
    pub fn from_snapshot(snapshot: Snapshot, policy: SignaturePolicy) -> Result<Self, BlockchainError> {
        if snapshot.chain.is_empty() {
            return Err(BlockchainError::ChainCorrupted {
                index: 0,
                fault: ChainFault::Empty,
            });
        }

        let blockchain = Blockchain {
            chain: RwLock::new(snapshot.chain),
            pool: Mutex::new(PendingPool {
                sealing: Vec::new(),
                queued: snapshot.pending_transactions,
            }),
            mining: Mutex::new(()),
            revision: AtomicU64::new(0),
            difficulty: snapshot.difficulty,
            mining_reward: snapshot.mining_reward,
            signature_policy: policy,
        };

        Ok(blockchain)
    }

    /// Admits a transaction to the pending pool.
    ///
    /// A rejected transaction never touches the pool.
    pub fn add_transaction(&self, transaction: Transaction) -> Result<(), BlockchainError> {
        match &transaction.to_address {
            Some(to) if !to.is_empty() => {}
            _ => return Err(BlockchainError::MissingAddress("toAddress")),
        }

        if matches!(&transaction.from_address, Some(from) if from.is_empty()) {
            return Err(BlockchainError::MissingAddress("fromAddress"));
        }

        if !transaction.amount.is_finite() {
            return Err(TransactionError::InvalidAmount(transaction.amount).into());
        }

        transaction.validate(self.signature_policy)?;

        let mut pool = self.pool.lock();
        let seen = pool.iter().any(|pending| pending.id == transaction.id)
            || self
                .chain
                .read()
                .iter()
                .flat_map(|block| block.transactions.iter())
                .any(|sealed| sealed.id == transaction.id);
        if seen {
            return Err(TransactionError::DuplicateId(transaction.id).into());
        }

        pool.queued.push(transaction);
        self.revision.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    /// Mines every pending transaction plus a reward into a new block
    pub fn mine_pending_transactions(
        &self,
        reward_address: &Address,
        metadata: Map<String, Value>,
    ) -> Result<Block, BlockchainError> {
        self.mine_pending_transactions_with(reward_address, metadata, &CancelToken::new())
    }

    /// Mines every pending transaction plus a reward into a new block,
    /// giving up when `cancel` is tripped.
    ///
    /// The pool is drained in one step so transactions added while the
    /// search runs wait for the next block. A cancelled pass puts the
    /// drained transactions back in front of them.
    pub fn mine_pending_transactions_with(
        &self,
        reward_address: &Address,
        metadata: Map<String, Value>,
        cancel: &CancelToken,
    ) -> Result<Block, BlockchainError> {
        if reward_address.is_empty() {
            return Err(BlockchainError::MissingAddress("rewardAddress"));
        }

        let _pass = self.mining.lock();
        cancel.start();

        let mut transactions = {
            let mut pool = self.pool.lock();
            let drained = std::mem::take(&mut pool.queued);
            pool.sealing = drained.clone();
            drained
        };

        transactions.push(Transaction::network_issued(
            reward_address.clone(),
            self.mining_reward,
            Metadata::Other(metadata.clone()),
        ));

        let (index, previous_hash) = {
            let chain = self.chain.read();
            let previous_hash = chain.last().map(|b| b.hash.clone()).unwrap_or_else(|| "0".to_string());
            (chain.len() as u64, previous_hash)
        };

        let mut block = Block::new(
            index,
            Utc::now().timestamp_millis(),
            transactions,
            previous_hash,
            metadata,
        );

        match block.mine_until(self.difficulty, cancel) {
            Ok(hash) => {
                let mut pool = self.pool.lock();
                self.chain.write().push(block.clone());
                pool.sealing.clear();
                self.revision.fetch_add(1, Ordering::SeqCst);

                info!(
                    "Mined block {} with {} transactions (nonce {}, hash {})",
                    block.index,
                    block.transactions.len(),
                    block.nonce,
                    hash
                );
                Ok(block)
            }
            Err(err) => {
                let mut pool = self.pool.lock();
                let mut restored = std::mem::take(&mut pool.sealing);
                restored.append(&mut pool.queued);
                pool.queued = restored;

                warn!("Mining block {} stopped: {}", index, err);
                Err(err.into())
            }
        }
    }

    /// Gets the entire blockchain
    pub fn get_chain(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    /// Gets every transaction not yet sealed, oldest first
    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.pool.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    pub fn signature_policy(&self) -> SignaturePolicy {
        self.signature_policy
    }

    /// Changes whenever the ledger's persisted state changes
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Checks every block's hash and its link to the predecessor
    pub fn validate_chain(&self) -> Result<(), BlockchainError> {
        let chain = self.chain.read();

        if chain.is_empty() {
            return Err(BlockchainError::ChainCorrupted {
                index: 0,
                fault: ChainFault::Empty,
            });
        }

        for pair in chain.windows(2) {
            let (previous_block, current_block) = (&pair[0], &pair[1]);

            let computed = current_block.calculate_hash();
            if current_block.hash != computed {
                return Err(BlockchainError::ChainCorrupted {
                    index: current_block.index,
                    fault: ChainFault::HashMismatch {
                        stored: current_block.hash.clone(),
                        computed,
                    },
                });
            }

            if current_block.previous_hash != previous_block.hash {
                return Err(BlockchainError::ChainCorrupted {
                    index: current_block.index,
                    fault: ChainFault::BrokenLink {
                        expected: previous_block.hash.clone(),
                        found: current_block.previous_hash.clone(),
                    },
                });
            }
        }

        Ok(())
    }

    pub fn is_chain_valid(&self) -> bool {
        self.validate_chain().is_ok()
    }

    /// Replays every sealed transaction to derive the balance of `address`.
    ///
    /// Pending transactions never count.
    pub fn get_address_balance(&self, address: &Address) -> f64 {
        let chain = self.chain.read();

        chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .fold(0.0, |mut balance, transaction| {
                if transaction.from_address.as_ref() == Some(address) {
                    balance -= transaction.amount;
                }
                if transaction.to_address.as_ref() == Some(address) {
                    balance += transaction.amount;
                }
                balance
            })
    }

    pub fn get_block_by_index(&self, index: u64) -> Result<Block, BlockchainError> {
        self.chain
            .read()
            .iter()
            .find(|block| block.index == index)
            .cloned()
            .ok_or_else(|| BlockchainError::NotFound(format!("Block with index {}", index)))
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Result<Block, BlockchainError> {
        self.chain
            .read()
            .iter()
            .find(|block| block.hash == hash)
            .cloned()
            .ok_or_else(|| BlockchainError::NotFound(format!("Block with hash {}", hash)))
    }

    /// Finds a transaction by id, sealed or pending
    pub fn get_transaction(&self, id: &str) -> Result<LedgerEntry, BlockchainError> {
        self.find_entries(Inclusion::SealedAndPending, |transaction| transaction.id == id)
            .into_iter()
            .next()
            .ok_or_else(|| BlockchainError::NotFound(format!("Transaction with ID {}", id)))
    }

    /// Every transaction whose metadata field `field` equals `value`.
    ///
    /// This is the history of an entity: sealed entries first in chain
    /// order, then pending ones in admission order.
    pub fn get_transactions_by_tag(
        &self,
        field: &str,
        value: &Value,
        inclusion: Inclusion,
    ) -> Vec<LedgerEntry> {
        self.find_entries(inclusion, |transaction| {
            transaction.metadata.field(field).as_ref() == Some(value)
        })
    }

    fn find_entries<F>(&self, inclusion: Inclusion, matches: F) -> Vec<LedgerEntry>
    where
        F: Fn(&Transaction) -> bool,
    {
        let matches = &matches;
        let pool = match inclusion {
            Inclusion::SealedAndPending => Some(self.pool.lock()),
            Inclusion::SealedOnly => None,
        };
        let chain = self.chain.read();

        let sealed = chain.iter().flat_map(move |block| {
            block
                .transactions
                .iter()
                .filter(move |transaction| matches(*transaction))
                .map(move |transaction| LedgerEntry::sealed(block, transaction))
        });

        let pending = pool
            .iter()
            .flat_map(|guard| guard.iter())
            .filter(|transaction| matches(*transaction))
            .map(LedgerEntry::pending);

        let entries = sealed.chain(pending).collect();
        entries
    }

    /// A consistent copy of everything that gets persisted
    pub fn snapshot(&self) -> Snapshot {
        let pool = self.pool.lock();
        let chain = self.chain.read();

        Snapshot {
            chain: chain.clone(),
            difficulty: self.difficulty,
            pending_transactions: pool.iter().cloned().collect(),
            mining_reward: self.mining_reward,
        }
    }

    #[cfg(test)]
    pub(crate) fn chain_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Vec<Block>> {
        self.chain.write()
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Blockchain::new(LedgerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::event::LedgerEvent;
    use serde_json::json;

    fn addr(s: &str) -> Address {
        Address(s.to_string())
    }

    fn dev_ledger() -> Blockchain {
        Blockchain::new(LedgerConfig {
            signature_policy: SignaturePolicy::Optional,
            ..LedgerConfig::default()
        })
    }

    fn transfer(from: &str, to: &str, amount: f64) -> Transaction {
        Transaction::new(Some(addr(from)), Some(addr(to)), amount, Metadata::empty())
    }

    fn student_event(student_id: &str) -> Metadata {
        LedgerEvent::StudentRegistration {
            student_id: student_id.to_string(),
            institution_id: "INST-1".to_string(),
            details: Map::new(),
        }
        .into()
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = Blockchain::default();
        let chain = blockchain.get_chain();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].index, 0);
        assert_eq!(chain[0].previous_hash, "0");
        assert!(blockchain.is_chain_valid());
    }

    #[test]
    fn test_mining_scenario() {
        let blockchain = dev_ledger();

        blockchain.add_transaction(transfer("A", "B", 40.0)).unwrap();
        blockchain
            .mine_pending_transactions(&addr("MINER"), Map::new())
            .unwrap();

        let chain = blockchain.get_chain();
        assert_eq!(chain.len(), 2);
        assert!(chain[1].hash.starts_with("00"));
        assert_eq!(chain[1].previous_hash, chain[0].hash);
        assert_eq!(blockchain.get_address_balance(&addr("A")), -40.0);
        assert_eq!(blockchain.get_address_balance(&addr("B")), 40.0);
        assert_eq!(blockchain.get_address_balance(&addr("MINER")), 100.0);
        assert!(blockchain.get_pending_transactions().is_empty());
    }

    #[test]
    fn test_network_issued_transaction_is_admitted() {
        let blockchain = Blockchain::default();
        let transaction = Transaction::new(None, Some(addr("X")), 5.0, Metadata::empty());

        blockchain.add_transaction(transaction).unwrap();
        assert_eq!(blockchain.get_pending_transactions().len(), 1);
    }

    #[test]
    fn test_missing_recipient_is_rejected() {
        let blockchain = dev_ledger();
        let transaction = Transaction::new(Some(addr("A")), None, 5.0, Metadata::empty());

        let result = blockchain.add_transaction(transaction);
        assert!(matches!(result, Err(BlockchainError::MissingAddress("toAddress"))));
        assert!(blockchain.get_pending_transactions().is_empty());
    }

    #[test]
    fn test_empty_sender_is_rejected() {
        let blockchain = dev_ledger();
        let result = blockchain.add_transaction(transfer("", "B", 1.0));

        assert!(matches!(result, Err(BlockchainError::MissingAddress("fromAddress"))));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Rejected);
    }

    #[test]
    fn test_unsigned_transaction_is_rejected_when_signatures_are_required() {
        let blockchain = Blockchain::default();
        let result = blockchain.add_transaction(transfer("A", "B", 1.0));

        assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));
        assert!(blockchain.get_pending_transactions().is_empty());
    }

    #[test]
    fn test_signed_transaction_is_admitted() {
        let blockchain = Blockchain::default();
        let wallet = Wallet::new();
        let mut transaction = Transaction::new(
            Some(wallet.address().clone()),
            Some(addr("B")),
            3.0,
            Metadata::empty(),
        );
        transaction.sign(&wallet).unwrap();

        blockchain.add_transaction(transaction).unwrap();
        assert_eq!(blockchain.get_pending_transactions().len(), 1);
    }

    #[test]
    fn test_non_finite_amount_is_rejected() {
        let blockchain = dev_ledger();
        let result = blockchain.add_transaction(transfer("A", "B", f64::NAN));

        assert!(matches!(
            result,
            Err(BlockchainError::InvalidTransaction(TransactionError::InvalidAmount(_)))
        ));
    }

    #[test]
    fn test_tampered_amount_breaks_validation() {
        let blockchain = dev_ledger();
        blockchain.add_transaction(transfer("A", "B", 40.0)).unwrap();
        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        blockchain.add_transaction(transfer("B", "C", 10.0)).unwrap();
        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        assert!(blockchain.is_chain_valid());

        blockchain.chain_mut()[1].transactions[0].amount = 4000.0;

        assert!(!blockchain.is_chain_valid());
        match blockchain.validate_chain() {
            Err(BlockchainError::ChainCorrupted { index, fault }) => {
                assert_eq!(index, 1);
                assert!(matches!(fault, ChainFault::HashMismatch { .. }));
            }
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[test]
    fn test_broken_link_is_reported() {
        let blockchain = dev_ledger();
        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();

        {
            let mut chain = blockchain.chain_mut();
            chain[2].previous_hash = "00ff".to_string();
            let rehashed = chain[2].calculate_hash();
            chain[2].hash = rehashed;
        }

        match blockchain.validate_chain() {
            Err(BlockchainError::ChainCorrupted { index, fault }) => {
                assert_eq!(index, 2);
                assert!(matches!(fault, ChainFault::BrokenLink { .. }));
            }
            other => panic!("expected broken link, got {:?}", other),
        }
    }

    #[test]
    fn test_balance_ignores_pending_transactions() {
        let blockchain = dev_ledger();
        blockchain.add_transaction(transfer("A", "B", 40.0)).unwrap();

        assert_eq!(blockchain.get_address_balance(&addr("B")), 0.0);

        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        let first = blockchain.get_address_balance(&addr("B"));
        let second = blockchain.get_address_balance(&addr("B"));
        assert_eq!(first, 40.0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_transactions_are_sealed_in_admission_order() {
        let blockchain = dev_ledger();
        let ids: Vec<String> = (0..5)
            .map(|i| {
                let transaction = transfer("A", "B", i as f64);
                let id = transaction.id.clone();
                blockchain.add_transaction(transaction).unwrap();
                id
            })
            .collect();

        let block = blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        let sealed: Vec<String> = block.transactions.iter().map(|t| t.id.clone()).collect();

        assert_eq!(&sealed[..5], &ids[..]);
        assert!(block.transactions[5].is_network_issued());
        assert_eq!(block.transactions[5].amount, 100.0);
    }

    #[test]
    fn test_reward_carries_block_metadata() {
        let blockchain = dev_ledger();
        let mut metadata = Map::new();
        metadata.insert("note".to_string(), json!("nightly sweep"));

        let block = blockchain
            .mine_pending_transactions(&addr("MINER"), metadata.clone())
            .unwrap();

        assert_eq!(block.metadata, metadata);
        assert_eq!(block.transactions[0].metadata, Metadata::Other(metadata));
    }

    #[test]
    fn test_cancelled_mining_restores_pool() {
        let blockchain = Blockchain::new(LedgerConfig {
            difficulty: 64,
            signature_policy: SignaturePolicy::Optional,
            ..LedgerConfig::default()
        });
        let first = transfer("A", "B", 1.0);
        let second = transfer("A", "C", 2.0);
        blockchain.add_transaction(first.clone()).unwrap();
        blockchain.add_transaction(second.clone()).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = blockchain.mine_pending_transactions_with(&addr("MINER"), Map::new(), &cancel);

        assert!(matches!(result, Err(BlockchainError::Mining(MiningError::Cancelled { .. }))));
        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.get_pending_transactions(), vec![first, second]);
    }

    #[test]
    fn test_block_lookups() {
        let blockchain = dev_ledger();
        let block = blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();

        assert_eq!(blockchain.get_block_by_index(1).unwrap(), block);
        assert_eq!(blockchain.get_block_by_hash(&block.hash).unwrap(), block);
        assert!(matches!(blockchain.get_block_by_index(9), Err(BlockchainError::NotFound(_))));
        assert!(matches!(blockchain.get_block_by_hash("nope"), Err(BlockchainError::NotFound(_))));
    }

    #[test]
    fn test_history_by_tag() {
        let blockchain = dev_ledger();
        let registered = Transaction::new(Some(addr("INST-1")), Some(addr("S-1")), 0.0, student_event("S-1"));
        blockchain.add_transaction(registered.clone()).unwrap();
        blockchain
            .add_transaction(Transaction::new(Some(addr("INST-1")), Some(addr("S-2")), 0.0, student_event("S-2")))
            .unwrap();
        let block = blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();

        let update = Transaction::new(
            Some(addr("INST-1")),
            Some(addr("S-1")),
            0.0,
            LedgerEvent::StudentUpdate {
                student_id: "S-1".to_string(),
                previous_state: json!({ "name": "Ada" }),
                current_state: json!({ "name": "Ada L." }),
            }
            .into(),
        );
        blockchain.add_transaction(update.clone()).unwrap();

        let history = blockchain.get_transactions_by_tag("studentId", &json!("S-1"), Inclusion::SealedAndPending);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].transaction, registered);
        assert!(history[0].confirmed);
        assert_eq!(history[0].block_index, Some(1));
        assert_eq!(history[0].block_hash, Some(block.hash.clone()));
        assert_eq!(history[1].transaction, update);
        assert!(!history[1].confirmed);
        assert_eq!(history[1].block_index, None);

        let sealed = blockchain.get_transactions_by_tag("studentId", &json!("S-1"), Inclusion::SealedOnly);
        assert_eq!(sealed.len(), 1);
        assert!(sealed[0].confirmed);
    }

    #[test]
    fn test_transaction_lookup() {
        let blockchain = dev_ledger();
        let sealed = transfer("A", "B", 1.0);
        blockchain.add_transaction(sealed.clone()).unwrap();
        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        let pending = transfer("B", "C", 1.0);
        blockchain.add_transaction(pending.clone()).unwrap();

        assert!(blockchain.get_transaction(&sealed.id).unwrap().confirmed);
        assert!(!blockchain.get_transaction(&pending.id).unwrap().confirmed);
        assert!(matches!(blockchain.get_transaction("missing"), Err(BlockchainError::NotFound(_))));
    }

    #[test]
    fn test_snapshot_restores_exactly() {
        let blockchain = dev_ledger();
        blockchain.add_transaction(transfer("A", "B", 40.0)).unwrap();
        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        blockchain.add_transaction(transfer("B", "C", 5.0)).unwrap();

        let restored = Blockchain::from_snapshot(blockchain.snapshot(), SignaturePolicy::Optional).unwrap();

        assert_eq!(restored.get_chain(), blockchain.get_chain());
        assert_eq!(restored.get_pending_transactions(), blockchain.get_pending_transactions());
        assert_eq!(restored.difficulty(), 2);
        assert_eq!(restored.mining_reward(), 100.0);
        assert!(restored.is_chain_valid());
    }

    #[test]
    fn test_corrupted_snapshot_is_restored_unrepaired() {
        let blockchain = dev_ledger();
        blockchain.add_transaction(transfer("A", "B", 40.0)).unwrap();
        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();

        let mut snapshot = blockchain.snapshot();
        snapshot.chain[1].transactions[0].amount = 4000.0;

        let restored = Blockchain::from_snapshot(snapshot.clone(), SignaturePolicy::Optional).unwrap();

        assert_eq!(restored.get_chain(), snapshot.chain);
        assert!(matches!(
            restored.validate_chain(),
            Err(BlockchainError::ChainCorrupted { index: 1, fault: ChainFault::HashMismatch { .. } })
        ));
    }

    #[test]
    fn test_empty_snapshot_is_rejected() {
        let snapshot = Snapshot {
            chain: Vec::new(),
            difficulty: 2,
            pending_transactions: Vec::new(),
            mining_reward: 100.0,
        };

        assert!(matches!(
            Blockchain::from_snapshot(snapshot, SignaturePolicy::Required),
            Err(BlockchainError::ChainCorrupted { fault: ChainFault::Empty, .. })
        ));
    }

    #[test]
    fn test_revision_tracks_changes() {
        let blockchain = dev_ledger();
        let start = blockchain.revision();

        blockchain.add_transaction(transfer("A", "B", 1.0)).unwrap();
        assert_eq!(blockchain.revision(), start + 1);

        let _ = blockchain.add_transaction(transfer("A", "", 1.0));
        assert_eq!(blockchain.revision(), start + 1);

        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        assert_eq!(blockchain.revision(), start + 2);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let blockchain = dev_ledger();
        let transaction = transfer("A", "B", 5.0);

        blockchain.add_transaction(transaction.clone()).unwrap();
        assert!(matches!(
            blockchain.add_transaction(transaction.clone()),
            Err(BlockchainError::InvalidTransaction(TransactionError::DuplicateId(_)))
        ));

        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        let replayed = blockchain.add_transaction(transaction);

        assert!(matches!(replayed, Err(ref err) if err.kind() == ErrorKind::Rejected));
        assert!(blockchain.get_pending_transactions().is_empty());
        assert_eq!(blockchain.get_address_balance(&addr("B")), 5.0);
    }

    #[test]
    fn test_adds_during_mining_are_sealed_exactly_once_in_order() {
        use std::sync::atomic::AtomicBool;

        let blockchain = dev_ledger();
        let adding = AtomicBool::new(true);
        let mut passes = 0;

        let admitted: Vec<String> = std::thread::scope(|scope| {
            let adder = scope.spawn(|| {
                let mut ids = Vec::new();
                for i in 0..500 {
                    let transaction = transfer("A", "B", i as f64);
                    ids.push(transaction.id.clone());
                    blockchain.add_transaction(transaction).unwrap();
                }
                adding.store(false, Ordering::SeqCst);
                ids
            });

            while adding.load(Ordering::SeqCst) {
                blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
                passes += 1;
            }

            adder.join().unwrap()
        });

        // Whatever arrived after the last pass.
        blockchain.mine_pending_transactions(&addr("MINER"), Map::new()).unwrap();
        passes += 1;

        let chain = blockchain.get_chain();
        let sealed: Vec<String> = chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(|transaction| !transaction.is_network_issued())
            .map(|transaction| transaction.id.clone())
            .collect();

        assert_eq!(sealed, admitted);
        assert_eq!(chain.len(), passes + 1);
        assert!(blockchain.get_pending_transactions().is_empty());
        assert!(blockchain.is_chain_valid());
        assert_eq!(blockchain.get_address_balance(&addr("B")), (0..500).sum::<i32>() as f64);
    }
}
