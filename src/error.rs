//! Error taxonomy shared by every sweeper component.

use ethers::types::Address;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SweepError>;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Chain query failed: {0}")]
    ChainQuery(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("RPC call timed out after {0}ms")]
    Timeout(u64),

    #[error("Insufficient funds on {address:?}: required {required}, available {available}")]
    InsufficientFunds {
        address: Address,
        required: String,
        available: String,
    },

    #[error("Insufficient gas on {address:?}: fee {fee}, available {available}")]
    InsufficientGas {
        address: Address,
        fee: String,
        available: String,
    },

    #[error("Account {0:?} is already registered")]
    DuplicateAccount(Address),

    #[error("Account {0:?} not found")]
    AccountNotFound(Address),

    #[error("Address {0} is invalid")]
    InvalidAddress(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Token deployment failed: {0}")]
    DeployFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),
}

impl SweepError {
    /// Errors worth another attempt with a fresh read or nonce.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SweepError::ChainQuery(_) | SweepError::Broadcast(_) | SweepError::Timeout(_)
        )
    }

    /// Short label used as the `kind` field of failure logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SweepError::ChainQuery(_) => "chain_query",
            SweepError::Broadcast(_) => "broadcast",
            SweepError::Timeout(_) => "timeout",
            SweepError::InsufficientFunds { .. } => "insufficient_funds",
            SweepError::InsufficientGas { .. } => "insufficient_gas",
            SweepError::DuplicateAccount(_) => "duplicate_account",
            SweepError::AccountNotFound(_) => "account_not_found",
            SweepError::InvalidAddress(_) => "invalid_address",
            SweepError::Signing(_) => "signing",
            SweepError::DeployFailed(_) => "deploy_failed",
            SweepError::Config(_) => "config",
            SweepError::State(_) => "state",
        }
    }
}
