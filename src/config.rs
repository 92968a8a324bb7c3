use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_PROGRESS_INTERVAL_MS, DEFAULT_WORKERS};
use crate::pipeline::TransferOptions;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub run_id: String,
    pub block_size: usize,
    pub workers: usize,
    pub progress_interval_ms: u64,
    pub sync_on_finish: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            workers: DEFAULT_WORKERS,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            sync_on_finish: true,
        }
    }
}

impl Config {
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            block_size: self.block_size,
            workers: self.workers,
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            sync_on_finish: self.sync_on_finish,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p).with_context(|| format!("reading config {}", p.display()))?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes).context("parsing config")?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", now.format("%Y%m%dT%H%M%SZ"), rand_suffix())
}

fn rand_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos ^ std::process::id())
}
