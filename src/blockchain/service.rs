use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use utoipa::ToSchema;
use uuid::Uuid;

use super::block::Block;
use super::chain::{Blockchain, BlockchainError, Inclusion, LedgerEntry};
use super::crypto::{Address, Wallet};
use super::event::{LedgerEvent, Metadata};
use super::miner::Miner;
use super::storage::{spawn_autosave, Persistence};
use super::transaction::Transaction;

/// Result of a mining request
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MineOutcome {
    /// The newly sealed block
    pub block: Block,

    /// False when the block was appended but the snapshot write failed
    pub persisted: bool,
}

/// The operations domain services and the HTTP layer use to reach the
/// ledger.
///
/// Built once by the composition root and shared; nothing here is global.
pub struct LedgerService {
    ledger: Arc<Blockchain>,
    persistence: Option<Arc<Persistence>>,
    miner: Miner,
    /// Signs event transactions recorded by this node
    node_wallet: Option<Wallet>,
}

impl LedgerService {
    /// Creates the facade over a ledger
    ///
    /// # Arguments
    ///
    /// * `ledger` - The blockchain to operate on
    /// * `persistence` - Where snapshots go, `None` to keep the ledger in memory
    /// * `mining_timeout` - Time limit of each mining pass, `None` for no limit
    /// * `node_wallet` - Wallet that signs recorded events
    pub fn new(
        ledger: Arc<Blockchain>,
        persistence: Option<Arc<Persistence>>,
        mining_timeout: Option<Duration>,
        node_wallet: Option<Wallet>,
    ) -> Self {
        let miner = Miner::new(ledger.clone(), mining_timeout);
        LedgerService {
            ledger,
            persistence,
            miner,
            node_wallet,
        }
    }

    pub fn ledger(&self) -> &Arc<Blockchain> {
        &self.ledger
    }

    pub fn node_address(&self) -> Option<&Address> {
        self.node_wallet.as_ref().map(Wallet::address)
    }

    /// Builds an unsigned transaction; nothing is validated or enqueued
    pub fn create_transaction(
        &self,
        from: Option<Address>,
        to: Option<Address>,
        amount: f64,
        metadata: Metadata,
    ) -> Transaction {
        Transaction::new(from, to, amount, metadata)
    }

    /// Validates `transaction` and adds it to the pending pool
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<Transaction, BlockchainError> {
        match self.ledger.add_transaction(transaction.clone()) {
            Ok(()) => {
                info!("Accepted transaction {}", transaction.id);
                Ok(transaction)
            }
            Err(err) => {
                warn!("Rejected transaction {}: {}", transaction.id, err);
                Err(err)
            }
        }
    }

    /// Records a domain event about `subject` as a zero-amount transaction.
    ///
    /// The transaction is sent from the node wallet and signed with it; a
    /// node without a wallet records network issued events.
    pub fn record_event(&self, subject: Address, event: LedgerEvent) -> Result<Transaction, BlockchainError> {
        let kind = event.kind();
        let sender = self.node_address().cloned();
        let mut transaction = Transaction::new(sender, Some(subject), 0.0, event.into());

        if let Some(wallet) = &self.node_wallet {
            transaction.sign(wallet)?;
        }

        let transaction = self.submit_transaction(transaction)?;
        info!("Recorded {} event in transaction {}", kind, transaction.id);
        Ok(transaction)
    }

    /// Mines the pending pool and persists the result.
    ///
    /// A failed save does not undo the new block; it is reported through
    /// [`MineOutcome::persisted`].
    pub async fn mine(
        &self,
        reward_address: Address,
        metadata: Map<String, Value>,
    ) -> Result<MineOutcome, BlockchainError> {
        let block = self.miner.mine(reward_address, metadata).await?;
        let persisted = self.persist().await;

        Ok(MineOutcome { block, persisted })
    }

    async fn persist(&self) -> bool {
        let persistence = match &self.persistence {
            Some(persistence) => persistence.clone(),
            None => return false,
        };

        let ledger = self.ledger.clone();
        match tokio::task::spawn_blocking(move || persistence.save(&ledger)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!("Failed to persist ledger: {}", err);
                false
            }
            Err(err) => {
                error!("Persistence task failed: {}", err);
                false
            }
        }
    }

    pub fn cancel_mining(&self) -> usize {
        self.miner.cancel_all()
    }

    pub fn cancel_mining_job(&self, job_id: &Uuid) -> bool {
        self.miner.cancel(job_id)
    }

    pub fn mining_jobs(&self) -> Vec<Uuid> {
        self.miner.active_jobs()
    }

    pub fn chain(&self) -> Vec<Block> {
        self.ledger.get_chain()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.ledger.get_pending_transactions()
    }

    pub fn block_by_index(&self, index: u64) -> Result<Block, BlockchainError> {
        self.ledger.get_block_by_index(index)
    }

    pub fn block_by_hash(&self, hash: &str) -> Result<Block, BlockchainError> {
        self.ledger.get_block_by_hash(hash)
    }

    pub fn transaction(&self, id: &str) -> Result<LedgerEntry, BlockchainError> {
        self.ledger.get_transaction(id)
    }

    pub fn balance(&self, address: &Address) -> f64 {
        self.ledger.get_address_balance(address)
    }

    /// Every transaction tagged with `field == value`
    pub fn history(&self, field: &str, value: &Value, inclusion: Inclusion) -> Vec<LedgerEntry> {
        self.ledger.get_transactions_by_tag(field, value, inclusion)
    }

    pub fn validate_chain(&self) -> Result<(), BlockchainError> {
        self.ledger.validate_chain()
    }

    pub fn is_chain_valid(&self) -> bool {
        self.ledger.is_chain_valid()
    }

    /// Writes a snapshot now
    pub fn save(&self) -> Result<(), BlockchainError> {
        match &self.persistence {
            Some(persistence) => Ok(persistence.save(&self.ledger)?),
            None => Err(BlockchainError::SystemError("No storage configured".to_string())),
        }
    }

    /// Starts periodic snapshots, if storage is configured
    pub fn autosave(&self, interval: Duration) -> Option<JoinHandle<()>> {
        let persistence = self.persistence.clone()?;
        info!("Autosaving to {} every {:?}", persistence.describe(), interval);
        Some(spawn_autosave(persistence, self.ledger.clone(), interval))
    }

    /// Starts a background sweep that mines whenever transactions are waiting
    pub fn spawn_sweep(self: Arc<Self>, interval: Duration, reward_address: Address) -> JoinHandle<()> {
        info!("Sweeping pending transactions every {:?}", interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if self.ledger.get_pending_transactions().is_empty() {
                    continue;
                }

                let mut metadata = Map::new();
                metadata.insert("trigger".to_string(), Value::String("sweep".to_string()));

                match self.mine(reward_address.clone(), metadata).await {
                    Ok(outcome) => info!(
                        "Sweep sealed block {} (persisted: {})",
                        outcome.block.index, outcome.persisted
                    ),
                    Err(err) => warn!("Sweep mining failed: {}", err),
                }
            }
        })
    }
}
