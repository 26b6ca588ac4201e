use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{info, warn};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::block::{Block, MiningError};
use super::chain::{Blockchain, BlockchainError};
use super::crypto::Address;

/// A shared flag that asks a running proof of work search to stop.
///
/// A token may also carry a time limit. The clock starts when the search
/// begins ([`CancelToken::start`]), not when the token is created, so a job
/// waiting behind another mining pass keeps its full budget.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    timeout: Option<Duration>,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// A token that also trips `timeout` after [`CancelToken::start`]
    pub fn with_timeout(timeout: Duration) -> Self {
        CancelToken {
            timeout: Some(timeout),
            ..CancelToken::default()
        }
    }

    /// Starts the time limit, if any. Later calls keep the first deadline.
    pub fn start(&self) {
        if let Some(timeout) = self.timeout {
            self.deadline.lock().get_or_insert_with(|| Instant::now() + timeout);
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.timed_out()
    }

    /// True once a started time limit has run out
    pub fn timed_out(&self) -> bool {
        matches!(*self.deadline.lock(), Some(deadline) if Instant::now() >= deadline)
    }
}

/// Runs mining passes off the async executor.
///
/// Every pass gets a job id and a [`CancelToken`] so an operator can abort
/// a runaway search without stopping the process. An optional timeout
/// trips the token once the pass has started searching.
#[derive(Debug, Clone)]
pub struct Miner {
    ledger: Arc<Blockchain>,
    jobs: Arc<DashMap<Uuid, CancelToken>>,
    timeout: Option<Duration>,
}

impl Miner {
    pub fn new(ledger: Arc<Blockchain>, timeout: Option<Duration>) -> Self {
        Miner {
            ledger,
            jobs: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Mines the pending pool into a new block on a blocking worker thread
    pub async fn mine(
        &self,
        reward_address: Address,
        metadata: Map<String, Value>,
    ) -> Result<Block, BlockchainError> {
        let job_id = Uuid::new_v4();
        let token = match self.timeout {
            Some(timeout) => CancelToken::with_timeout(timeout),
            None => CancelToken::new(),
        };
        self.jobs.insert(job_id, token.clone());

        let ledger = self.ledger.clone();
        let worker_token = token.clone();
        let result = tokio::task::spawn_blocking(move || {
            ledger.mine_pending_transactions_with(&reward_address, metadata, &worker_token)
        })
        .await;

        self.jobs.remove(&job_id);

        let result = result.map_err(|e| BlockchainError::SystemError(format!("Mining worker failed: {}", e)))?;
        if let Err(BlockchainError::Mining(MiningError::Cancelled { .. })) = &result {
            if token.timed_out() {
                warn!("Mining job {} timed out after {:?}", job_id, self.timeout.unwrap_or_default());
            }
        }
        result
    }

    /// Cancels one running job, returning false if it is unknown
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        match self.jobs.get(job_id) {
            Some(token) => {
                token.cancel();
                info!("Cancelled mining job {}", job_id);
                true
            }
            None => false,
        }
    }

    /// Cancels every running job and returns how many there were
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.jobs.iter() {
            entry.value().cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            info!("Cancelled {} mining jobs", cancelled);
        }
        cancelled
    }

    pub fn active_jobs(&self) -> Vec<Uuid> {
        self.jobs.iter().map(|entry| *entry.key()).collect()
    }
}
