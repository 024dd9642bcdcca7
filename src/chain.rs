//! Chain access seams.
//!
//! `ChainClient` and `TxSigner` are the only ways the sweeper touches the
//! network or key material. The ethers-backed implementations below are what
//! the binary wires up; tests substitute an in-memory chain.

use async_trait::async_trait;
use ethers::prelude::{Http, Middleware, Provider};
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Transaction, TransactionReceipt, H256, U256, U64,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::error::{Result, SweepError};
use crate::types::{ChainTransaction, Credential, SignedTransaction, TxReceipt};

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance(&self, address: Address) -> Result<U256>;
    /// Pending nonce of `address`.
    async fn get_transaction_count(&self, address: Address) -> Result<U256>;
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256>;
    async fn gas_price(&self) -> Result<U256>;
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes>;
    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> Result<H256>;
    async fn get_block_number(&self) -> Result<u64>;
    async fn get_block_transaction_count(&self, block: u64) -> Result<usize>;
    async fn get_transaction_by_block_and_index(
        &self,
        block: u64,
        index: usize,
    ) -> Result<Option<ChainTransaction>>;
    async fn get_transaction(&self, hash: H256) -> Result<Option<ChainTransaction>>;
    async fn wait_for_receipt(&self, hash: H256) -> Result<TxReceipt>;
}

pub trait TxSigner: Send + Sync {
    fn sign(&self, tx: &TypedTransaction, credential: &Credential) -> Result<SignedTransaction>;
}

/// EIP-155 signer over local private keys.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    chain_id: u64,
}

impl LocalSigner {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }
}

impl TxSigner for LocalSigner {
    fn sign(&self, tx: &TypedTransaction, credential: &Credential) -> Result<SignedTransaction> {
        let wallet = credential.wallet().clone().with_chain_id(self.chain_id);
        let mut request = tx.clone();
        request.set_chain_id(self.chain_id);
        request.set_from(wallet.address());

        let signature = wallet
            .sign_transaction_sync(&request)
            .map_err(|e| SweepError::Signing(e.to_string()))?;

        Ok(SignedTransaction {
            hash: request.hash(&signature),
            raw: request.rlp_signed(&signature),
            from: wallet.address(),
            request,
        })
    }
}

/// `ChainClient` over a JSON-RPC HTTP endpoint. Every call is bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct EthersChainClient {
    provider: Arc<Provider<Http>>,
    timeout: Duration,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl EthersChainClient {
    pub fn connect(
        rpc_url: &str,
        timeout: Duration,
        receipt_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| SweepError::Config(format!("invalid RPC URL {}: {}", rpc_url, e)))?;
        Ok(Self {
            provider: Arc::new(provider),
            timeout,
            receipt_timeout,
            poll_interval,
        })
    }

    async fn bounded<T, E, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        match timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(SweepError::ChainQuery(e.to_string())),
            Err(_) => Err(SweepError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

fn to_chain_transaction(tx: Transaction) -> ChainTransaction {
    ChainTransaction {
        hash: tx.hash,
        from: tx.from,
        to: tx.to,
        value: tx.value,
        input: tx.input,
        block_number: tx.block_number.map(|b| b.as_u64()),
        gas_price: tx.gas_price,
    }
}

fn to_receipt(receipt: TransactionReceipt) -> TxReceipt {
    TxReceipt {
        transaction_hash: receipt.transaction_hash,
        block_number: receipt.block_number.map(|b| b.as_u64()),
        contract_address: receipt.contract_address,
        success: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(true),
    }
}

fn classify_send_error(address: Address, message: String) -> SweepError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") {
        SweepError::InsufficientFunds {
            address,
            required: "unknown".into(),
            available: "unknown".into(),
        }
    } else {
        SweepError::Broadcast(message)
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.bounded(self.provider.get_balance(address, None)).await
    }

    async fn get_transaction_count(&self, address: Address) -> Result<U256> {
        self.bounded(
            self.provider
                .get_transaction_count(address, Some(BlockNumber::Pending.into())),
        )
        .await
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256> {
        self.bounded(self.provider.estimate_gas(tx, None)).await
    }

    async fn gas_price(&self) -> Result<U256> {
        self.bounded(self.provider.get_gas_price()).await
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
        self.bounded(self.provider.call(tx, None)).await
    }

    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> Result<H256> {
        match timeout(self.timeout, self.provider.send_raw_transaction(tx.raw.clone())).await {
            Ok(Ok(pending)) => Ok(pending.tx_hash()),
            Ok(Err(e)) => Err(classify_send_error(tx.from, e.to_string())),
            Err(_) => Err(SweepError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn get_block_number(&self) -> Result<u64> {
        let block: U64 = self.bounded(self.provider.get_block_number()).await?;
        Ok(block.as_u64())
    }

    async fn get_block_transaction_count(&self, block: u64) -> Result<usize> {
        let count: U64 = self
            .bounded(self.provider.request(
                "eth_getBlockTransactionCountByNumber",
                [BlockNumber::Number(U64::from(block))],
            ))
            .await?;
        Ok(count.as_usize())
    }

    async fn get_transaction_by_block_and_index(
        &self,
        block: u64,
        index: usize,
    ) -> Result<Option<ChainTransaction>> {
        let tx: Option<Transaction> = self
            .bounded(self.provider.request(
                "eth_getTransactionByBlockNumberAndIndex",
                (BlockNumber::Number(U64::from(block)), U64::from(index)),
            ))
            .await?;
        Ok(tx.map(to_chain_transaction))
    }

    async fn get_transaction(&self, hash: H256) -> Result<Option<ChainTransaction>> {
        let tx = self.bounded(self.provider.get_transaction(hash)).await?;
        Ok(tx.map(to_chain_transaction))
    }

    async fn wait_for_receipt(&self, hash: H256) -> Result<TxReceipt> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            if let Some(receipt) = self
                .bounded(self.provider.get_transaction_receipt(hash))
                .await?
            {
                return Ok(to_receipt(receipt));
            }
            if Instant::now() >= deadline {
                return Err(SweepError::Timeout(self.receipt_timeout.as_millis() as u64));
            }
            debug!(tx = ?hash, "receipt not yet available");
            sleep(self.poll_interval).await;
        }
    }
}
