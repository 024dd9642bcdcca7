//! Block Feed
//!
//! Polls the chain for new blocks and forwards every transaction in them to
//! the chain monitor's channel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::error::Result;
use crate::types::ChainTransaction;

pub struct BlockFeed {
    client: Arc<dyn ChainClient>,
    poll_interval: Duration,
}

impl BlockFeed {
    pub fn new(client: Arc<dyn ChainClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Forward every transaction of `block`. `None` once the receiver is gone.
    pub async fn forward_block(
        &self,
        block: u64,
        sink: &mpsc::Sender<ChainTransaction>,
    ) -> Result<Option<usize>> {
        let count = self.client.get_block_transaction_count(block).await?;
        let mut forwarded = 0;
        for index in 0..count {
            if let Some(mut tx) = self
                .client
                .get_transaction_by_block_and_index(block, index)
                .await?
            {
                tx.block_number.get_or_insert(block);
                if sink.send(tx).await.is_err() {
                    return Ok(None);
                }
                forwarded += 1;
            }
        }
        Ok(Some(forwarded))
    }

    /// Poll until the receiving side of `sink` is dropped. Starts at the
    /// current head; blocks mined before startup are not replayed.
    pub async fn run(&self, sink: mpsc::Sender<ChainTransaction>) {
        let mut ticker = interval(self.poll_interval);
        let mut next_block: Option<u64> = None;
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Block feed started");

        loop {
            ticker.tick().await;
            if sink.is_closed() {
                break;
            }
            let head = match self.client.get_block_number().await {
                Ok(head) => head,
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "Failed to fetch block number");
                    continue;
                }
            };
            let mut block = next_block.unwrap_or(head);

            while block <= head {
                match self.forward_block(block, &sink).await {
                    Ok(Some(forwarded)) => {
                        debug!(block, forwarded, "Block forwarded");
                        block += 1;
                    }
                    Ok(None) => {
                        info!("Transaction feed receiver dropped, block feed stopping");
                        return;
                    }
                    Err(e) => {
                        warn!(
                            block,
                            kind = e.kind(),
                            error = %e,
                            "Failed to read block, retrying next tick"
                        );
                        break;
                    }
                }
            }
            next_block = Some(block);
        }
        info!("Block feed stopped");
    }
}
