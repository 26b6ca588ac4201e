use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::hashing::canonical_json;
use super::miner::CancelToken;
use super::transaction::Transaction;

/// A SHA-256 hex digest has 64 characters, so no hash can satisfy more.
pub const MAX_DIFFICULTY: u32 = 64;

/// Nonce attempts between two checks of the cancellation token
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Errors that can occur while searching for a proof of work
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("Difficulty {0} exceeds the maximum of {max}", max = MAX_DIFFICULTY)]
    DifficultyTooHigh(u32),
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Transactions sealed in this block, in admission order
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block, "0" for genesis
    pub previous_hash: String,

    /// Free-form annotation, e.g. why the block was mined
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,

    /// Proof of work search variable
    pub nonce: u64,

    /// Hash of the sealed fields
    pub hash: String,
}

impl Block {
    /// Creates a new block with nonce 0 and its hash computed
    pub fn new(
        index: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        metadata: Map<String, Value>,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            metadata,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The first block of every chain
    pub fn genesis() -> Self {
        Block::new(
            0,
            Utc::now().timestamp_millis(),
            Vec::new(),
            "0".to_string(),
            Map::new(),
        )
    }

    /// SHA-256 over index, previous hash, transactions, timestamp, metadata
    /// and nonce, in that order
    pub fn calculate_hash(&self) -> String {
        hash_with_nonce(&self.sealed_prefix(), self.nonce)
    }

    /// Searches for a nonce whose hash has `difficulty` leading zeros.
    ///
    /// Runs until a proof is found; use [`Block::mine_until`] when the
    /// search must be abortable.
    pub fn mine(&mut self, difficulty: u32) -> Result<String, MiningError> {
        self.mine_until(difficulty, &CancelToken::new())
    }

    /// Same search as [`Block::mine`], giving up once `cancel` is tripped.
    ///
    /// On cancellation the block keeps the last nonce tried and is not
    /// sealed.
    pub fn mine_until(&mut self, difficulty: u32, cancel: &CancelToken) -> Result<String, MiningError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(MiningError::DifficultyTooHigh(difficulty));
        }

        // Everything before the nonce is fixed for the whole search.
        let prefix = self.sealed_prefix();
        let mut attempts: u64 = 0;

        loop {
            let hash = hash_with_nonce(&prefix, self.nonce);
            if meets_difficulty(&hash, difficulty) {
                self.hash = hash.clone();
                return Ok(hash);
            }

            attempts += 1;
            if attempts % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(MiningError::Cancelled { attempts });
            }

            self.nonce += 1;
        }
    }

    fn sealed_prefix(&self) -> Sha256 {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_string());
        hasher.update(&self.previous_hash);
        hasher.update(canonical_json(&self.transactions));
        hasher.update(self.timestamp.to_string());
        hasher.update(canonical_json(&self.metadata));
        hasher
    }
}

fn hash_with_nonce(prefix: &Sha256, nonce: u64) -> String {
    let mut hasher = prefix.clone();
    hasher.update(nonce.to_string());
    hex::encode(hasher.finalize())
}

/// Returns true if `hash` starts with `difficulty` hex zeros
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}
