//! Sweeper configuration, loaded from a JSON file.

use ethers::types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SweepError};
use crate::retry::RetryPolicy;
use crate::types::parse_address;

/// Largest token precision the sweeper accepts; keeps `10^decimals` well inside `U256`.
pub const MAX_TOKEN_DECIMALS: u8 = 36;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Hex private key of the admin account. `SWEEPER_ADMIN_KEY` takes precedence.
    #[serde(default)]
    pub admin_private_key: Option<String>,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
    /// Where sweep statistics are persisted. In-memory only when unset.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default)]
    pub sweep: SweepSettings,
    #[serde(default)]
    pub rpc: RpcSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    pub user_id: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Blocks after which every account should be swept. Parsed but not acted on.
    #[serde(default = "default_max_block")]
    pub max_block: u64,
    #[serde(default = "default_minimum_amount_usd")]
    pub minimum_amount_usd: Decimal,
    #[serde(default = "default_max_gas_price_wei")]
    pub max_gas_price_wei: u128,
    /// Gas float each account is topped up to before a token withdrawal.
    #[serde(default = "default_gas_amount_wei")]
    pub gas_amount_wei: u128,
    #[serde(default = "default_min_block_gap")]
    pub min_block_gap: u64,
    #[serde(default = "default_settlement_delay_ms")]
    pub settlement_delay_ms: u64,
    #[serde(default = "default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,
}

fn default_max_block() -> u64 {
    1_000
}
fn default_minimum_amount_usd() -> Decimal {
    Decimal::from(50)
}
fn default_max_gas_price_wei() -> u128 {
    30_000_000_000 // 30 gwei
}
fn default_gas_amount_wei() -> u128 {
    500_000_000_000_000_000 // 0.5 ETH
}
fn default_min_block_gap() -> u64 {
    5
}
fn default_settlement_delay_ms() -> u64 {
    2_000
}
fn default_reconcile_interval_seconds() -> u64 {
    300
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            max_block: default_max_block(),
            minimum_amount_usd: default_minimum_amount_usd(),
            max_gas_price_wei: default_max_gas_price_wei(),
            gas_amount_wei: default_gas_amount_wei(),
            min_block_gap: default_min_block_gap(),
            settlement_delay_ms: default_settlement_delay_ms(),
            reconcile_interval_seconds: default_reconcile_interval_seconds(),
        }
    }
}

impl SweepSettings {
    pub fn max_gas_price(&self) -> U256 {
        U256::from(self.max_gas_price_wei)
    }

    pub fn gas_amount(&self) -> U256 {
        U256::from(self.gas_amount_wei)
    }

    pub fn settlement_delay(&self) -> Duration {
        Duration::from_millis(self.settlement_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_receipt_timeout_ms() -> u64 {
    60_000
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_retry_attempts() -> usize {
    3
}
fn default_retry_initial_delay_ms() -> u64 {
    200
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            receipt_timeout_ms: default_receipt_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
        }
    }
}

impl RpcSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_initial_delay_ms),
        )
    }
}

impl SweeperConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SweepError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: SweeperConfig = serde_json::from_str(&content)
            .map_err(|e| SweepError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(SweepError::Config("rpc_url must not be empty".into()));
        }
        if self.chain_id == 0 {
            return Err(SweepError::Config("chain_id must be non-zero".into()));
        }
        if self.rpc.retry_attempts == 0 {
            return Err(SweepError::Config("rpc.retry_attempts must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        for token in &self.tokens {
            let address = parse_address(&token.address)?;
            if !seen.insert(address) {
                return Err(SweepError::Config(format!(
                    "token {} at {} is configured twice",
                    token.symbol, token.address
                )));
            }
            if token.decimals > MAX_TOKEN_DECIMALS {
                return Err(SweepError::Config(format!(
                    "token {} has unsupported decimals {}",
                    token.symbol, token.decimals
                )));
            }
        }
        Ok(())
    }
}
