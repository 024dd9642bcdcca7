//! Balance Checker
//!
//! Takes a fresh snapshot of an account's native balance and every
//! whitelisted token balance. Snapshots are never cached.

use ethers::types::{Address, U256};
use std::sync::Arc;

use crate::chain::ChainClient;
use crate::error::Result;
use crate::retry::{retry_async, RetryPolicy};
use crate::token::TokenWhitelist;
use crate::types::BalanceSnapshot;

pub struct BalanceChecker {
    client: Arc<dyn ChainClient>,
    whitelist: Arc<TokenWhitelist>,
    retry: RetryPolicy,
}

impl BalanceChecker {
    pub fn new(
        client: Arc<dyn ChainClient>,
        whitelist: Arc<TokenWhitelist>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            whitelist,
            retry,
        }
    }

    pub async fn native_balance(&self, address: Address) -> Result<U256> {
        let client = self.client.clone();
        retry_async(self.retry, "getBalance", |_| {
            let client = client.clone();
            async move { client.get_balance(address).await }
        })
        .await
    }

    pub async fn snapshot(&self, address: Address) -> Result<BalanceSnapshot> {
        let mut snapshot = BalanceSnapshot::new(address);
        snapshot.push_native(self.native_balance(address).await?);
        for token in self.whitelist.tokens().await {
            let balance = token.balance_of(address).await?;
            snapshot.push_token(
                token.symbol(),
                token.contract_address(),
                balance,
                token.decimals(),
            );
        }
        Ok(snapshot)
    }
}
