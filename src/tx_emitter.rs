//! Transaction Emitter
//!
//! Builds, fee-checks, signs, broadcasts and awaits every transaction the
//! sweeper sends. Nonces are read fresh from the chain while a per-sender lock
//! is held, so concurrent sweeps sharing the admin account never collide.

use dashmap::DashMap;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, TxSigner};
use crate::error::{Result, SweepError};
use crate::retry::{retry_async, RetryPolicy};
use crate::types::{short_hash, truncate_address, Account, SignedTransaction, TxReceipt};

/// What to send. Gas limit and price are filled in from the chain when unset.
#[derive(Debug, Clone, Default)]
pub struct TxParams {
    pub to: Option<Address>,
    pub value: U256,
    pub data: Option<Bytes>,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
}

impl TxParams {
    pub fn native(to: Address, value: U256) -> Self {
        Self {
            to: Some(to),
            value,
            ..Default::default()
        }
    }

    pub fn contract_call(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            data: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn deploy(code: Bytes, gas: U256) -> Self {
        Self {
            data: Some(code),
            gas: Some(gas),
            ..Default::default()
        }
    }

    pub fn with_gas(mut self, gas: U256, gas_price: U256) -> Self {
        self.gas = Some(gas);
        self.gas_price = Some(gas_price);
        self
    }

    /// Unsigned request used for `eth_call` and gas estimation.
    pub fn to_request(&self, from: Address) -> TypedTransaction {
        let mut request = TransactionRequest::new().from(from).value(self.value);
        if let Some(to) = self.to {
            request = request.to(to);
        }
        if let Some(data) = &self.data {
            request = request.data(data.clone());
        }
        request.into()
    }
}

pub struct TxEmitter {
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn TxSigner>,
    retry: RetryPolicy,
    sender_locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl TxEmitter {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn TxSigner>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            signer,
            retry,
            sender_locks: DashMap::new(),
        }
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Send a transaction from `from` and wait for its receipt.
    pub async fn emit(&self, from: &Account, params: TxParams) -> Result<TxReceipt> {
        let hash = {
            let lock = self
                .sender_locks
                .entry(from.address)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let _guard = lock.lock().await;
            self.send_locked(from, &params).await?
        };

        info!(
            from = %from.short(),
            to = %params.to.map(|a| truncate_address(&a)).unwrap_or_else(|| "<create>".into()),
            value = %params.value,
            tx = %short_hash(&hash),
            "Transaction broadcast"
        );

        let receipt = self.client.wait_for_receipt(hash).await?;
        if !receipt.success {
            return Err(SweepError::Broadcast(format!(
                "transaction {:?} reverted",
                hash
            )));
        }
        Ok(receipt)
    }

    /// Sign once per nonce. A new signature is only produced when another
    /// transaction consumed the nonce first.
    async fn send_locked(&self, from: &Account, params: &TxParams) -> Result<H256> {
        for attempt in 1..=self.retry.attempts {
            let signed = retry_async(self.retry, "prepare", |_| self.prepare(from, params)).await?;
            if let Some(hash) = self.broadcast(&signed).await? {
                return Ok(hash);
            }
            warn!(
                from = %from.short(),
                attempt,
                tx = %short_hash(&signed.hash),
                "Nonce taken by another transaction, re-signing"
            );
        }
        Err(SweepError::Broadcast(format!(
            "nonce of {} kept going stale",
            from.short()
        )))
    }

    /// Broadcast `signed`, resending the same bytes on transient failures.
    /// Returns `None` when its nonce was used by a different transaction.
    async fn broadcast(&self, signed: &SignedTransaction) -> Result<Option<H256>> {
        let client = &self.client;
        retry_async(self.retry, "broadcast", |attempt| async move {
            // an earlier attempt may have reached the node before failing
            if attempt > 1 && client.get_transaction(signed.hash).await?.is_some() {
                return Ok(Some(signed.hash));
            }
            match client.send_raw_transaction(signed).await {
                Ok(hash) => Ok(Some(hash)),
                Err(SweepError::Broadcast(message)) if is_already_known(&message) => {
                    Ok(Some(signed.hash))
                }
                Err(SweepError::Broadcast(message)) if is_nonce_too_low(&message) => {
                    let known = client.get_transaction(signed.hash).await?.is_some();
                    Ok(known.then_some(signed.hash))
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn prepare(&self, from: &Account, params: &TxParams) -> Result<SignedTransaction> {
        let nonce = self.client.get_transaction_count(from.address).await?;
        let gas_price = match params.gas_price {
            Some(price) => price,
            None => self.client.gas_price().await?,
        };

        let mut tx = params.to_request(from.address);
        tx.set_nonce(nonce);
        tx.set_gas_price(gas_price);
        let gas = match params.gas {
            Some(gas) => gas,
            None => self.client.estimate_gas(&tx).await?,
        };
        tx.set_gas(gas);

        let balance = self.client.get_balance(from.address).await?;
        if balance < params.value {
            return Err(SweepError::InsufficientFunds {
                address: from.address,
                required: params.value.to_string(),
                available: balance.to_string(),
            });
        }
        let fee = gas.saturating_mul(gas_price);
        if balance - params.value < fee {
            return Err(SweepError::InsufficientGas {
                address: from.address,
                fee: fee.to_string(),
                available: (balance - params.value).to_string(),
            });
        }

        debug!(from = %from.short(), %nonce, %gas, %gas_price, "Signing transaction");
        self.signer.sign(&tx, &from.credential)
    }
}

fn is_already_known(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already known") || lower.contains("already imported")
}

fn is_nonce_too_low(message: &str) -> bool {
    message.to_lowercase().contains("nonce too low")
}
