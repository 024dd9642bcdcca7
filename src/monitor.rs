//! Chain Monitor
//!
//! Consumes confirmed transactions, picks out deposits to managed wallets and
//! dispatches sweeps. Each address cools down for `min_block_gap` blocks after
//! a trigger, whatever the sweep outcome.

use ethers::abi::AbiDecode;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::erc20::IERC20Calls;
use crate::registry::AccountRegistry;
use crate::state_manager::StateManager;
use crate::sweeper::SweepExecutor;
use crate::types::{truncate_address, ChainTransaction, SweepResult};

/// Recipient of a transfer: first recipient argument of an ERC-20
/// `transfer`/`transferFrom`, or `to` for a plain native transfer.
pub fn extract_destination(tx: &ChainTransaction) -> Option<Address> {
    if tx.input.is_empty() {
        return tx.to;
    }
    match IERC20Calls::decode(tx.input.as_ref()) {
        Ok(IERC20Calls::Transfer(call)) => Some(call.to),
        Ok(IERC20Calls::TransferFrom(call)) => Some(call.to),
        _ => None,
    }
}

#[derive(Debug)]
pub enum MonitorOutcome {
    /// Not a deposit to a tracked, non-admin address.
    Ignored,
    /// Address triggered too recently.
    CoolingDown { address: Address, last_triggered_block: u64 },
    Dispatched { address: Address, handle: JoinHandle<()> },
}

pub struct ChainMonitor {
    registry: Arc<AccountRegistry>,
    executor: Arc<SweepExecutor>,
    state: Arc<StateManager>,
    min_block_gap: u64,
}

impl ChainMonitor {
    pub fn new(
        registry: Arc<AccountRegistry>,
        executor: Arc<SweepExecutor>,
        state: Arc<StateManager>,
        min_block_gap: u64,
    ) -> Self {
        Self {
            registry,
            executor,
            state,
            min_block_gap,
        }
    }

    /// Evaluate one confirmed transaction and spawn a sweep if it qualifies.
    pub async fn observe(&self, tx: &ChainTransaction) -> MonitorOutcome {
        let Some(address) = extract_destination(tx) else {
            return MonitorOutcome::Ignored;
        };
        if self.registry.is_admin(&address) || !self.registry.contains(&address) {
            return MonitorOutcome::Ignored;
        }
        let Some(block) = tx.block_number else {
            debug!(tx = ?tx.hash, "Unconfirmed transaction, ignoring");
            return MonitorOutcome::Ignored;
        };

        if let Err(last) = self.state.try_trigger(address, block, self.min_block_gap).await {
            debug!(
                account = %truncate_address(&address),
                block,
                last_triggered_block = last,
                "Cooling down"
            );
            return MonitorOutcome::CoolingDown {
                address,
                last_triggered_block: last,
            };
        }

        info!(account = %truncate_address(&address), block, "Deposit detected, dispatching sweep");
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move {
            match executor.sweep(address).await {
                Ok(SweepResult::Swept(report)) => info!(
                    account = %truncate_address(&address),
                    transactions = report.transactions.len(),
                    "Sweep complete"
                ),
                Ok(SweepResult::SkippedByPolicy(decision)) => info!(
                    account = %truncate_address(&address),
                    decision = ?decision,
                    "Sweep skipped by policy"
                ),
                Ok(SweepResult::SkippedNotFound) => {
                    warn!(account = %truncate_address(&address), "Sweep target vanished")
                }
                Err(e) => error!(
                    account = %truncate_address(&address),
                    kind = e.kind(),
                    error = %e,
                    "Sweep failed"
                ),
            }
        });

        MonitorOutcome::Dispatched { address, handle }
    }

    /// Drain the transaction feed until every sender is dropped.
    pub async fn run(&self, mut feed: mpsc::Receiver<ChainTransaction>) {
        info!(min_block_gap = self.min_block_gap, "Chain monitor started");
        while let Some(tx) = feed.recv().await {
            self.observe(&tx).await;
        }
        info!("Transaction feed closed, chain monitor stopping");
    }
}
