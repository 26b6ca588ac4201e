use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use thiserror::Error;
use tokio::task::JoinHandle;

use super::block::Block;
use super::chain::Blockchain;
use super::transaction::Transaction;

/// Key the snapshot is stored under in the sled tree
const SNAPSHOT_KEY: &[u8] = b"ledger";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Everything needed to restore a ledger exactly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub chain: Vec<Block>,
    pub difficulty: u32,
    pub pending_transactions: Vec<Transaction>,
    pub mining_reward: f64,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec_pretty(self).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::DeserializationError(e.to_string()))
    }
}

/// A place a single ledger snapshot can be written to and read back from.
///
/// Each write replaces the previous snapshot.
pub trait SnapshotStore: Send + Sync {
    fn write(&self, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// Returns `None` when nothing has been saved yet
    fn read(&self) -> Result<Option<Snapshot>, StorageError>;

    fn describe(&self) -> String;
}

/// Stores the snapshot as one JSON document on disk
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        JsonFileStore {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn write(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = snapshot.to_json()?;

        // Write beside the target and rename over it so a crash mid-write
        // never leaves a truncated snapshot behind.
        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn read(&self) -> Result<Option<Snapshot>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => Snapshot::from_json(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("json file {}", self.path.display())
    }
}

/// Stores the snapshot's JSON bytes under a single key of a sled tree
pub struct SledStore {
    db: Db,
    snapshots: Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let snapshots = db.open_tree("snapshots")?;

        Ok(SledStore { db, snapshots })
    }
}

impl SnapshotStore for SledStore {
    fn write(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.snapshots.insert(SNAPSHOT_KEY, snapshot.to_json()?)?;
        self.db.flush()?;
        Ok(())
    }

    fn read(&self) -> Result<Option<Snapshot>, StorageError> {
        match self.snapshots.get(SNAPSHOT_KEY)? {
            Some(value) => Snapshot::from_json(&value).map(Some),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        "sled tree snapshots".to_string()
    }
}

/// Saves and restores ledger snapshots through one store.
///
/// Saves are serialized: the snapshot is taken and written while holding
/// the writer lock, so an older snapshot can never overwrite a newer one.
pub struct Persistence {
    store: Box<dyn SnapshotStore>,
    writer: Mutex<()>,
    /// Ledger revision + 1 of the last successful save, 0 before any save
    saved_revision: AtomicU64,
}

impl Persistence {
    /// Creates a persistence layer writing through `store`
    ///
    /// # Arguments
    ///
    /// * `store` - The backend snapshots are written to and read from
    pub fn new(store: Box<dyn SnapshotStore>) -> Self {
        Persistence {
            store,
            writer: Mutex::new(()),
            saved_revision: AtomicU64::new(0),
        }
    }

    /// Writes a snapshot of `ledger`, replacing the previous one
    pub fn save(&self, ledger: &Blockchain) -> Result<(), StorageError> {
        let _writer = self.writer.lock();

        let revision = ledger.revision();
        let snapshot = ledger.snapshot();
        self.store.write(&snapshot)?;
        self.saved_revision.store(revision + 1, Ordering::SeqCst);

        info!(
            "Saved snapshot of {} blocks and {} pending transactions to {}",
            snapshot.chain.len(),
            snapshot.pending_transactions.len(),
            self.store.describe()
        );
        Ok(())
    }

    /// Saves only if the ledger changed since the last save.
    ///
    /// Returns whether a snapshot was written.
    pub fn save_if_changed(&self, ledger: &Blockchain) -> Result<bool, StorageError> {
        if self.saved_revision.load(Ordering::SeqCst) == ledger.revision() + 1 {
            debug!("Ledger unchanged since last save, skipping snapshot");
            return Ok(false);
        }

        self.save(ledger)?;
        Ok(true)
    }

    /// Reads the last snapshot, `None` on first run
    pub fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        let snapshot = self.store.read()?;

        match &snapshot {
            Some(snapshot) => info!(
                "Loaded snapshot of {} blocks from {}",
                snapshot.chain.len(),
                self.store.describe()
            ),
            None => info!("No snapshot found in {}", self.store.describe()),
        }

        Ok(snapshot)
    }

    /// Marks the current state of `ledger` as already saved, e.g. right
    /// after restoring it from this store
    pub fn mark_saved(&self, ledger: &Blockchain) {
        self.saved_revision.store(ledger.revision() + 1, Ordering::SeqCst);
    }

    pub fn describe(&self) -> String {
        self.store.describe()
    }
}

/// Periodically saves `ledger` whenever it changed.
///
/// Each save runs on the blocking pool; failures are logged and the next
/// tick tries again.
pub fn spawn_autosave(
    persistence: Arc<Persistence>,
    ledger: Arc<Blockchain>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let persistence = persistence.clone();
            let ledger = ledger.clone();
            let result =
                tokio::task::spawn_blocking(move || persistence.save_if_changed(&ledger)).await;

            match result {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => error!("Autosave failed: {}", err),
                Err(err) => error!("Autosave task panicked: {}", err),
            }
        }
    })
}
