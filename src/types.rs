//! Core data types for the custodial sweeper

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{format_units, to_checksum};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SweepError};

/// Asset label used for the chain's native currency in balance snapshots.
pub const NATIVE_ASSET: &str = "ETH";
pub const NATIVE_DECIMALS: u8 = 18;

/// Signing key handle. Never printed: `Debug` only shows the derived address.
#[derive(Clone)]
pub struct Credential(LocalWallet);

impl Credential {
    pub fn from_hex(key: &str) -> Result<Self> {
        let trimmed = key.trim();
        let stripped = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let wallet = stripped
            .parse::<LocalWallet>()
            .map_err(|e| SweepError::Config(format!("invalid private key: {}", e)))?;
        Ok(Self(wallet))
    }

    pub fn random() -> Self {
        Self(LocalWallet::new(&mut rand::thread_rng()))
    }

    pub fn address(&self) -> Address {
        self.0.address()
    }

    pub fn wallet(&self) -> &LocalWallet {
        &self.0
    }

    /// Hex-encoded secret key, only for writing generated config files.
    pub fn expose_secret_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.signer().to_bytes()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", truncate_address(&self.address()))
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub address: Address,
    pub credential: Credential,
}

impl Account {
    pub fn new(credential: Credential) -> Self {
        Self {
            address: credential.address(),
            credential,
        }
    }

    pub fn generate() -> Self {
        Self::new(Credential::random())
    }

    pub fn short(&self) -> String {
        truncate_address(&self.address)
    }
}

pub fn truncate_address(address: &Address) -> String {
    let checksummed = to_checksum(address, None);
    format!(
        "{}...{}",
        &checksummed[..6],
        &checksummed[checksummed.len() - 4..]
    )
}

pub fn short_hash(hash: &H256) -> String {
    let full = format!("{:?}", hash);
    full[..10].to_string()
}

pub fn parse_address(value: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|_| SweepError::InvalidAddress(value.to_string()))
}

/// Render base units in display units (`amount / 10^decimals`).
pub fn display_amount(amount: U256, decimals: u8) -> String {
    format_units(amount, decimals as u32).unwrap_or_else(|_| amount.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEntry {
    pub asset: String,
    /// Token contract; `None` for the native currency.
    pub contract: Option<Address>,
    pub amount: U256,
    pub decimals: u8,
}

/// Balances of one account at one instant, native first then whitelist order.
#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub address: Address,
    pub entries: Vec<BalanceEntry>,
}

impl BalanceSnapshot {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            entries: Vec::new(),
        }
    }

    pub fn push_native(&mut self, amount: U256) {
        self.entries.push(BalanceEntry {
            asset: NATIVE_ASSET.to_string(),
            contract: None,
            amount,
            decimals: NATIVE_DECIMALS,
        });
    }

    pub fn push_token(
        &mut self,
        symbol: impl Into<String>,
        contract: Address,
        amount: U256,
        decimals: u8,
    ) {
        self.entries.push(BalanceEntry {
            asset: symbol.into(),
            contract: Some(contract),
            amount,
            decimals,
        });
    }

    pub fn native(&self) -> U256 {
        self.entries
            .iter()
            .find(|e| e.contract.is_none())
            .map(|e| e.amount)
            .unwrap_or_default()
    }

    /// Balance held in the token at `contract`. Symbols are not unique, so
    /// lookups that drive transfers go through the contract address.
    pub fn token_balance(&self, contract: Address) -> Option<U256> {
        self.entries
            .iter()
            .find(|e| e.contract == Some(contract))
            .map(|e| e.amount)
    }

    /// First entry labelled `asset`.
    pub fn get(&self, asset: &str) -> Option<U256> {
        self.entries
            .iter()
            .find(|e| e.asset == asset)
            .map(|e| e.amount)
    }

    /// Human-readable balance table used for before/after audit logs.
    pub fn format_table(&self) -> String {
        let mut out = format!("{:<14} {}\n", "address", truncate_address(&self.address));
        for entry in &self.entries {
            out.push_str(&format!(
                "{:<14} {}\n",
                entry.asset,
                display_amount(entry.amount, entry.decimals)
            ));
        }
        out
    }
}

/// A confirmed transaction as seen by the monitor and the gas estimator.
#[derive(Debug, Clone, Default)]
pub struct ChainTransaction {
    pub hash: H256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub block_number: Option<u64>,
    pub gas_price: Option<U256>,
}

#[derive(Debug, Clone, Default)]
pub struct TxReceipt {
    pub transaction_hash: H256,
    pub block_number: Option<u64>,
    pub contract_address: Option<Address>,
    pub success: bool,
}

/// A signed transaction ready for broadcast. `raw` is what goes on the wire.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub request: TypedTransaction,
    pub from: Address,
    pub hash: H256,
    pub raw: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepDecision {
    Sweep,
    SkipTooExpensive { gas_price: U256, max_gas_price: U256 },
    SkipBelowMinimum { total_value: String, minimum: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepTxKind {
    GasTopUp,
    TokenWithdrawal,
    GasReclaim,
}

#[derive(Debug, Clone)]
pub struct SweepTx {
    pub kind: SweepTxKind,
    pub asset: String,
    pub amount: U256,
    pub hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclaimOutcome {
    Reclaimed { amount: U256, fee: U256 },
    /// Remaining native balance does not cover the reclaim fee.
    Dust { balance: U256, fee: U256 },
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub address: Address,
    pub gas_price: U256,
    pub before: BalanceSnapshot,
    pub after: BalanceSnapshot,
    pub transactions: Vec<SweepTx>,
    pub reclaim: ReclaimOutcome,
}

impl SweepReport {
    pub fn count(&self, kind: SweepTxKind) -> usize {
        self.transactions.iter().filter(|t| t.kind == kind).count()
    }
}

#[derive(Debug, Clone)]
pub enum SweepResult {
    Swept(Box<SweepReport>),
    SkippedNotFound,
    SkippedByPolicy(SweepDecision),
}

impl SweepResult {
    pub fn is_swept(&self) -> bool {
        matches!(self, SweepResult::Swept(_))
    }
}
