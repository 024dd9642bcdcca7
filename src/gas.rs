//! Gas Price Estimator
//!
//! Median gas price over the first transactions of the latest block. The
//! median resists a single under- or over-priced transaction in the sample.

use ethers::types::U256;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::chain::ChainClient;
use crate::error::Result;
use crate::retry::{retry_async, RetryPolicy};

pub const SAMPLE_SIZE: usize = 10;

pub struct GasPriceEstimator {
    client: Arc<dyn ChainClient>,
    retry: RetryPolicy,
    last_good: Mutex<Option<U256>>,
}

impl GasPriceEstimator {
    pub fn new(client: Arc<dyn ChainClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            last_good: Mutex::new(None),
        }
    }

    /// Estimate a representative gas price in wei.
    ///
    /// When the latest block carries no priced transactions, falls back to the
    /// previous estimate, then to the node's `eth_gasPrice`.
    pub async fn estimate(&self) -> Result<U256> {
        let samples = self.sample().await?;
        if let Some(price) = median(&samples) {
            if let Ok(mut guard) = self.last_good.lock() {
                *guard = Some(price);
            }
            debug!(samples = samples.len(), gas_price = %price, "Gas price estimated");
            return Ok(price);
        }

        let previous = self.last_good.lock().ok().and_then(|g| *g);
        if let Some(price) = previous {
            warn!(gas_price = %price, "Empty gas sample, reusing previous estimate");
            return Ok(price);
        }

        let client = self.client.clone();
        let price = retry_async(self.retry, "gasPrice", |_| {
            let client = client.clone();
            async move { client.gas_price().await }
        })
        .await?;
        warn!(gas_price = %price, "Empty gas sample, using node gas price");
        Ok(price)
    }

    async fn sample(&self) -> Result<Vec<U256>> {
        let client = self.client.clone();
        let block = retry_async(self.retry, "blockNumber", |_| {
            let client = client.clone();
            async move { client.get_block_number().await }
        })
        .await?;
        let count = retry_async(self.retry, "blockTransactionCount", |_| {
            let client = client.clone();
            async move { client.get_block_transaction_count(block).await }
        })
        .await?;

        let mut prices = Vec::with_capacity(count.min(SAMPLE_SIZE));
        for index in 0..count.min(SAMPLE_SIZE) {
            let tx = retry_async(self.retry, "transactionByBlockAndIndex", |_| {
                let client = client.clone();
                async move { client.get_transaction_by_block_and_index(block, index).await }
            })
            .await?;
            if let Some(price) = tx.and_then(|t| t.gas_price) {
                prices.push(price);
            }
        }
        Ok(prices)
    }
}

/// Median of `values`; for an even count, the floor of the mean of the middle pair.
pub fn median(values: &[U256]) -> Option<U256> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wei(values: &[u64]) -> Vec<U256> {
        values.iter().map(|v| U256::from(*v)).collect()
    }

    #[test]
    fn median_of_even_sample_averages_middle_pair() {
        let prices = wei(&[100, 20, 90, 40, 60, 50, 30, 80, 70, 10]);
        assert_eq!(median(&prices), Some(U256::from(55)));
    }

    #[test]
    fn median_of_odd_sample_is_middle_value() {
        assert_eq!(median(&wei(&[7, 1, 1_000_000])), Some(U256::from(7)));
    }

    #[test]
    fn median_of_empty_sample_is_none() {
        assert_eq!(median(&[]), None);
    }
}
