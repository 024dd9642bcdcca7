//! Sweep Executor
//!
//! Sweeps one account: gas top-up, per-token withdrawal to the admin account,
//! then reclaim of leftover gas. Steps run strictly in sequence; the first
//! failing step aborts the sweep and is reported, never retried here.

use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::balance_checker::BalanceChecker;
use crate::config::SweepSettings;
use crate::error::{Result, SweepError};
use crate::gas::GasPriceEstimator;
use crate::registry::AccountRegistry;
use crate::retry::retry_async;
use crate::rules_engine::SweepPolicy;
use crate::state_manager::StateManager;
use crate::token::TokenWhitelist;
use crate::tx_emitter::{TxEmitter, TxParams};
use crate::types::{
    short_hash, Account, ReclaimOutcome, SweepDecision, SweepReport, SweepResult, SweepTx,
    SweepTxKind, NATIVE_ASSET,
};

/// Fee for the reclaim transaction with a 10% buffer, rounded up.
pub fn reclaim_fee(gas: U256, gas_price: U256) -> U256 {
    let raw = gas.saturating_mul(gas_price).saturating_mul(U256::from(11));
    (raw + U256::from(9)) / U256::from(10)
}

pub struct SweepExecutor {
    registry: Arc<AccountRegistry>,
    whitelist: Arc<TokenWhitelist>,
    balances: BalanceChecker,
    estimator: Arc<GasPriceEstimator>,
    policy: SweepPolicy,
    emitter: Arc<TxEmitter>,
    state: Arc<StateManager>,
    gas_amount: U256,
    settlement_delay: Duration,
}

impl SweepExecutor {
    pub fn new(
        registry: Arc<AccountRegistry>,
        whitelist: Arc<TokenWhitelist>,
        estimator: Arc<GasPriceEstimator>,
        emitter: Arc<TxEmitter>,
        state: Arc<StateManager>,
        settings: &SweepSettings,
    ) -> Self {
        let balances = BalanceChecker::new(
            emitter.client().clone(),
            whitelist.clone(),
            emitter.retry_policy(),
        );
        Self {
            registry,
            whitelist,
            balances,
            estimator,
            policy: SweepPolicy::from_settings(settings),
            emitter,
            state,
            gas_amount: settings.gas_amount(),
            settlement_delay: settings.settlement_delay(),
        }
    }

    pub fn registry(&self) -> &Arc<AccountRegistry> {
        &self.registry
    }

    pub fn balances(&self) -> &BalanceChecker {
        &self.balances
    }

    /// Sweep `address` while holding its sweep lock.
    pub async fn sweep(&self, address: Address) -> Result<SweepResult> {
        let account = match self.registry.resolve(&address) {
            Ok(account) => account,
            Err(SweepError::AccountNotFound(_)) => {
                info!(account = ?address, "Not a managed account, skipping");
                return Ok(SweepResult::SkippedNotFound);
            }
            Err(e) => return Err(e),
        };

        let _guard = self.state.sweep_lock(address).await;
        let result = self.sweep_locked(&account).await;

        let outcome = match &result {
            Ok(SweepResult::Swept(_)) => Some(true),
            Err(_) => Some(false),
            Ok(_) => None,
        };
        if let Some(success) = outcome {
            if let Err(e) = self.state.record_outcome(address, success).await {
                warn!(account = %account.short(), error = %e, "Failed to record sweep outcome");
            }
        }
        result
    }

    async fn sweep_locked(&self, account: &Account) -> Result<SweepResult> {
        let before = self
            .step(account, "snapshot", self.balances.snapshot(account.address).await)?;
        let gas_price = self.step(account, "gas_price", self.estimator.estimate().await)?;

        let decision = self.policy.should_sweep(&before, gas_price);
        if decision != SweepDecision::Sweep {
            return Ok(SweepResult::SkippedByPolicy(decision));
        }

        info!(account = %account.short(), "Balances before sweep\n{}", before.format_table());

        let admin = self.registry.admin().address;
        let mut transactions = Vec::new();

        for token in self.whitelist.tokens().await {
            let held = before.token_balance(token.contract_address());
            if held.unwrap_or_default().is_zero() {
                continue;
            }
            let top_up = self.step(account, "gas_top_up", self.top_up_gas(account).await)?;
            if let Some(top_up) = top_up {
                transactions.push(top_up);
            }
            let withdrawn = self.step(
                account,
                "token_withdrawal",
                token.withdraw_all(account, admin).await,
            )?;
            if let Some((amount, hash)) = withdrawn {
                transactions.push(SweepTx {
                    kind: SweepTxKind::TokenWithdrawal,
                    asset: token.symbol().to_string(),
                    amount,
                    hash,
                });
            }
        }

        if !self.settlement_delay.is_zero() {
            sleep(self.settlement_delay).await;
        }

        let reclaim = self.step(
            account,
            "gas_reclaim",
            self.reclaim_gas(account, &mut transactions).await,
        )?;
        let after = self.step(account, "snapshot", self.balances.snapshot(account.address).await)?;
        info!(account = %account.short(), "Balances after sweep\n{}", after.format_table());

        Ok(SweepResult::Swept(Box::new(SweepReport {
            address: account.address,
            gas_price,
            before,
            after,
            transactions,
            reclaim,
        })))
    }

    /// Top the account up to the gas float when below it.
    async fn top_up_gas(&self, account: &Account) -> Result<Option<SweepTx>> {
        let native = self.balances.native_balance(account.address).await?;
        if native >= self.gas_amount {
            return Ok(None);
        }
        let shortfall = self.gas_amount - native;
        let receipt = self
            .emitter
            .emit(self.registry.admin(), TxParams::native(account.address, shortfall))
            .await?;
        info!(
            account = %account.short(),
            amount = %shortfall,
            tx = %short_hash(&receipt.transaction_hash),
            "Gas topped up"
        );
        Ok(Some(SweepTx {
            kind: SweepTxKind::GasTopUp,
            asset: NATIVE_ASSET.to_string(),
            amount: shortfall,
            hash: receipt.transaction_hash,
        }))
    }

    /// Send the native balance minus the buffered reclaim fee back to admin.
    async fn reclaim_gas(
        &self,
        account: &Account,
        transactions: &mut Vec<SweepTx>,
    ) -> Result<ReclaimOutcome> {
        let admin = self.registry.admin().address;
        let balance = self.balances.native_balance(account.address).await?;
        let gas_price = self.estimator.estimate().await?;

        let reclaim_tx = TxParams::native(admin, U256::zero()).to_request(account.address);
        let client = self.emitter.client().clone();
        let gas = retry_async(self.emitter.retry_policy(), "estimateGas", |_| {
            let client = client.clone();
            let reclaim_tx = reclaim_tx.clone();
            async move { client.estimate_gas(&reclaim_tx).await }
        })
        .await?;

        let fee = reclaim_fee(gas, gas_price);
        if balance <= fee {
            warn!(
                account = %account.short(),
                balance = %balance,
                fee = %fee,
                "Leftover gas is dust, not reclaiming"
            );
            return Ok(ReclaimOutcome::Dust { balance, fee });
        }

        let amount = balance - fee;
        let receipt = self
            .emitter
            .emit(account, TxParams::native(admin, amount).with_gas(gas, gas_price))
            .await?;
        info!(
            account = %account.short(),
            amount = %amount,
            tx = %short_hash(&receipt.transaction_hash),
            "Gas reclaimed"
        );
        transactions.push(SweepTx {
            kind: SweepTxKind::GasReclaim,
            asset: NATIVE_ASSET.to_string(),
            amount,
            hash: receipt.transaction_hash,
        });
        Ok(ReclaimOutcome::Reclaimed { amount, fee })
    }

    fn step<T>(&self, account: &Account, step: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!(
                account = %account.short(),
                step,
                kind = e.kind(),
                error = %e,
                "Sweep step failed"
            );
        }
        result
    }
}
