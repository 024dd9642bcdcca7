//! State Manager
//!
//! Per-address sweep state: the block of the last trigger (rate limiting),
//! sweep statistics, and the per-account locks that keep at most one sweep
//! in flight per account. Statistics optionally persist to a JSON file.

use chrono::Utc;
use dashmap::DashMap;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::error::{Result, SweepError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepState {
    pub last_triggered_block: Option<u64>,
    pub total_sweeps: u64,
    pub failed_sweeps: u64,
    pub last_sweep_timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceState {
    pub accounts: BTreeMap<Address, SweepState>,
    pub last_update: Option<String>,
}

pub struct StateManager {
    state: RwLock<ServiceState>,
    sweep_locks: DashMap<Address, Arc<Mutex<()>>>,
    state_file_path: Option<PathBuf>,
}

impl StateManager {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(ServiceState::default()),
            sweep_locks: DashMap::new(),
            state_file_path: None,
        }
    }

    /// Load persisted state, or start empty if the file does not exist yet.
    pub async fn load(state_file_path: PathBuf) -> Result<Self> {
        let state = if state_file_path.exists() {
            info!("Loading state from {}", state_file_path.display());
            let content = fs::read_to_string(&state_file_path)
                .await
                .map_err(|e| SweepError::State(format!("failed to read state file: {}", e)))?;
            serde_json::from_str::<ServiceState>(&content)
                .map_err(|e| SweepError::State(format!("failed to parse state file: {}", e)))?
        } else {
            info!("No state found, creating new state.");
            ServiceState::default()
        };

        for (addr, account) in &state.accounts {
            debug!(
                account = ?addr,
                last_block = ?account.last_triggered_block,
                total_sweeps = account.total_sweeps,
                "Loaded sweep state"
            );
        }

        Ok(Self {
            state: RwLock::new(state),
            sweep_locks: DashMap::new(),
            state_file_path: Some(state_file_path),
        })
    }

    /// Exclusive sweep guard for `address`; held for the whole sweep.
    pub async fn sweep_lock(&self, address: Address) -> OwnedMutexGuard<()> {
        let lock = self
            .sweep_locks
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub async fn last_triggered(&self, address: &Address) -> Option<u64> {
        self.state
            .read()
            .await
            .accounts
            .get(address)
            .and_then(|s| s.last_triggered_block)
    }

    /// Check the rate limit and record a trigger at `block` in one step.
    /// Returns the previous trigger block when the address is still cooling down.
    pub async fn try_trigger(
        &self,
        address: Address,
        block: u64,
        min_gap: u64,
    ) -> std::result::Result<(), u64> {
        let mut state = self.state.write().await;
        let entry = state.accounts.entry(address).or_default();
        if let Some(last) = entry.last_triggered_block {
            if block.saturating_sub(last) <= min_gap {
                return Err(last);
            }
        }
        entry.last_triggered_block = Some(block);
        Ok(())
    }

    pub async fn record_outcome(&self, address: Address, success: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.accounts.entry(address).or_default();
        if success {
            entry.total_sweeps += 1;
        } else {
            entry.failed_sweeps += 1;
        }
        entry.last_sweep_timestamp = Some(Utc::now().to_rfc3339());
        state.last_update = Some(Utc::now().to_rfc3339());

        self.persist_locked(&state).await
    }

    /// Write state atomically: temp file, fsync, rename.
    async fn persist_locked(&self, state: &ServiceState) -> Result<()> {
        let Some(path) = &self.state_file_path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| SweepError::State(format!("failed to serialize state: {}", e)))?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &json)
            .await
            .map_err(|e| SweepError::State(format!("failed to write temp state file: {}", e)))?;

        let file = fs::File::open(&temp_path)
            .await
            .map_err(|e| SweepError::State(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| SweepError::State(format!("failed to fsync state file: {}", e)))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| SweepError::State(format!("failed to rename state file: {}", e)))?;

        debug!("State persisted to {}", path.display());
        Ok(())
    }

    pub async fn fetch_snapshot(&self) -> ServiceState {
        self.state.read().await.clone()
    }
}
