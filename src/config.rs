//! Service configuration sourced from environment variables.

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{Result, SpaceWeaveError};

/// Default logical capacity: 1 TiB.
pub const DEFAULT_TOTAL_SIZE: u64 = 1 << 40;

/// Runtime configuration for the allocator service.
///
/// Every field except `small_block_limit` is read from the environment by
/// [`Config::from_env`]; unset variables fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the RPC adapter (`SPACE_WEAVE_ADDR`).
    pub listen_addr: String,
    /// Seconds a connection may sit idle before it is closed (`GRPC_MAX_IDLE_SEC`).
    pub max_idle_sec: u64,
    /// Allocation granularity in bytes (`UNIT_SIZE`).
    pub unit_size: u64,
    /// Logical capacity in bytes (`TOTAL_SIZE`).
    pub total_size: u64,
    /// Fraction of units reserved for the bitmap tier (`SMALL_BLOCK_RATIO`).
    pub small_block_ratio: f64,
    /// Number of bitmap shards (`NUM_SHARDS`).
    pub num_shards: u64,
    /// Snapshot file path; empty disables persistence (`STATE_PERSISTENCE_PATH`).
    pub state_persistence_path: String,
    /// Time trigger for background snapshots, in seconds (`BACKUP_INTERVAL_SEC`).
    pub backup_interval_sec: u64,
    /// Operation-count trigger for background snapshots (`BACKUP_OPERATION_THRESHOLD`).
    pub backup_operation_threshold: u64,
    /// Units reserved for the bitmap tier. Derived, never read from the
    /// environment; always a multiple of `num_shards * 64`.
    pub small_block_limit: u64,
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|err| SpaceWeaveError::Config(format!("{name}={raw} is not valid: {err}"))),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(SpaceWeaveError::Config(format!(
            "{name} is not readable: {err}"
        ))),
    }
}

impl Config {
    /// Load configuration from the environment, validate it, and compute the
    /// derived capacity split.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config {
            listen_addr: env_or("SPACE_WEAVE_ADDR", "0.0.0.0:22500".to_string())?,
            max_idle_sec: env_or("GRPC_MAX_IDLE_SEC", 3600)?,
            unit_size: env_or("UNIT_SIZE", 4096)?,
            total_size: env_or("TOTAL_SIZE", DEFAULT_TOTAL_SIZE)?,
            small_block_ratio: env_or("SMALL_BLOCK_RATIO", 0.1)?,
            num_shards: env_or("NUM_SHARDS", 64)?,
            state_persistence_path: env_or("STATE_PERSISTENCE_PATH", String::new())?,
            backup_interval_sec: env_or("BACKUP_INTERVAL_SEC", 300)?,
            backup_operation_threshold: env_or("BACKUP_OPERATION_THRESHOLD", 10_000)?,
            small_block_limit: 0,
        };
        cfg.validate()?;
        cfg.small_block_limit = cfg.derive_small_block_limit();
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.unit_size == 0 {
            return Err(SpaceWeaveError::Config(
                "UNIT_SIZE must be positive".to_string(),
            ));
        }
        if self.total_size < self.unit_size {
            return Err(SpaceWeaveError::Config(
                "TOTAL_SIZE must be at least UNIT_SIZE".to_string(),
            ));
        }
        if self.num_shards == 0 {
            return Err(SpaceWeaveError::Config(
                "NUM_SHARDS must be positive".to_string(),
            ));
        }
        if !(self.small_block_ratio > 0.0 && self.small_block_ratio < 1.0) {
            return Err(SpaceWeaveError::Config(
                "SMALL_BLOCK_RATIO must be strictly between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Units reserved for the bitmap tier, rounded down so every shard owns a
    /// whole number of 64-bit words and the bitmap covers its domain exactly.
    fn derive_small_block_limit(&self) -> u64 {
        let raw = (self.total_size as f64 * self.small_block_ratio / self.unit_size as f64) as u64;
        let granularity = self.num_shards * 64;
        raw / granularity * granularity
    }

    /// Total number of allocation units in the managed space.
    pub fn total_units(&self) -> u64 {
        self.total_size / self.unit_size
    }

    /// Units managed by the free-list tier.
    pub fn large_region_units(&self) -> u64 {
        self.total_units() - self.small_block_limit
    }
}
