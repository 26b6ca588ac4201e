use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::blockchain::block::MAX_DIFFICULTY;
use crate::blockchain::{Address, LedgerConfig, SignaturePolicy};

/// Above this, a single block can take seconds or more to mine
pub const RECOMMENDED_MAX_DIFFICULTY: u32 = 6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Difficulty {0} exceeds the maximum of {max}", max = MAX_DIFFICULTY)]
    DifficultyTooHigh(u32),

    #[error("Mining reward must be a finite, non-negative number, got {0}")]
    InvalidReward(f64),

    #[error("A sweep interval requires --sweep-reward-address")]
    MissingSweepAddress,
}

/// Where snapshots are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// A single JSON document, `ledger.json` in the data directory
    Json,
    /// A sled database in `db/` under the data directory
    Sled,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "credential-ledger", about = "Append-only credential ledger node", version)]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, default_value = "127.0.0.1:8080", env = "LEDGER_BIND")]
    pub bind: String,

    /// Directory snapshots are stored in
    #[arg(long, default_value = "data/ledger", env = "LEDGER_DATA_DIR", value_name = "PATH")]
    pub data_dir: PathBuf,

    /// Snapshot backend
    #[arg(long, value_enum, default_value_t = StoreBackend::Json, env = "LEDGER_STORE")]
    pub store: StoreBackend,

    /// Leading hex zeros required in a block hash (new ledgers only)
    #[arg(long, default_value_t = 2, env = "LEDGER_DIFFICULTY")]
    pub difficulty: u32,

    /// Amount paid to the reward address of each block (new ledgers only)
    #[arg(long, default_value_t = 100.0, env = "LEDGER_MINING_REWARD")]
    pub mining_reward: f64,

    /// Seconds between autosaves, 0 disables autosave
    #[arg(long, default_value_t = 30, env = "LEDGER_AUTOSAVE_SECS")]
    pub autosave_secs: u64,

    /// Seconds between automatic mining sweeps, 0 disables sweeping
    #[arg(long, default_value_t = 0, env = "LEDGER_SWEEP_SECS")]
    pub sweep_secs: u64,

    /// Address credited by sweep-mined blocks
    #[arg(long, env = "LEDGER_SWEEP_REWARD_ADDRESS")]
    pub sweep_reward_address: Option<String>,

    /// Seconds before a mining pass is cancelled, 0 disables the limit
    #[arg(long, default_value_t = 60, env = "LEDGER_MINING_TIMEOUT_SECS")]
    pub mining_timeout_secs: u64,

    /// Admit unsigned transactions from named senders (development only)
    #[arg(long, env = "LEDGER_ALLOW_UNSIGNED")]
    pub allow_unsigned: bool,

    /// Hex secret key of the wallet that signs recorded events
    #[arg(long, env = "LEDGER_NODE_KEY", hide_env_values = true)]
    pub node_key: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh(self.difficulty));
        }

        if !self.mining_reward.is_finite() || self.mining_reward < 0.0 {
            return Err(ConfigError::InvalidReward(self.mining_reward));
        }

        if self.sweep_secs > 0 && self.sweep_reward_address().is_none() {
            return Err(ConfigError::MissingSweepAddress);
        }

        Ok(())
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            difficulty: self.difficulty,
            mining_reward: self.mining_reward,
            signature_policy: self.signature_policy(),
        }
    }

    pub fn signature_policy(&self) -> SignaturePolicy {
        if self.allow_unsigned {
            SignaturePolicy::Optional
        } else {
            SignaturePolicy::Required
        }
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        non_zero_secs(self.autosave_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        non_zero_secs(self.sweep_secs)
    }

    pub fn mining_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.mining_timeout_secs)
    }

    pub fn sweep_reward_address(&self) -> Option<Address> {
        self.sweep_reward_address
            .as_deref()
            .and_then(|address| address.parse().ok())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        match self.store {
            StoreBackend::Json => self.data_dir.join("ledger.json"),
            StoreBackend::Sled => self.data_dir.join("db"),
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["credential-ledger"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);

        assert_eq!(config.difficulty, 2);
        assert_eq!(config.mining_reward, 100.0);
        assert_eq!(config.store, StoreBackend::Json);
        assert_eq!(config.signature_policy(), SignaturePolicy::Required);
        assert_eq!(config.autosave_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.sweep_interval(), None);
        assert_eq!(config.snapshot_path(), PathBuf::from("data/ledger/ledger.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--store",
            "sled",
            "--difficulty",
            "3",
            "--allow-unsigned",
            "--mining-timeout-secs",
            "0",
            "--sweep-secs",
            "10",
            "--sweep-reward-address",
            "MINER",
        ]);

        assert_eq!(config.store, StoreBackend::Sled);
        assert_eq!(config.ledger_config().difficulty, 3);
        assert_eq!(config.signature_policy(), SignaturePolicy::Optional);
        assert_eq!(config.mining_timeout(), None);
        assert_eq!(config.sweep_reward_address(), Some(Address("MINER".to_string())));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        assert!(matches!(
            parse(&["--difficulty", "65"]).validate(),
            Err(ConfigError::DifficultyTooHigh(65))
        ));
        assert!(matches!(
            parse(&["--mining-reward=-1"]).validate(),
            Err(ConfigError::InvalidReward(_))
        ));
        assert!(matches!(
            parse(&["--sweep-secs", "5"]).validate(),
            Err(ConfigError::MissingSweepAddress)
        ));
    }
}
