//! Wiring of the shared components around one chain connection.

use std::sync::Arc;
use std::time::Duration;

use crate::block_feed::BlockFeed;
use crate::chain::{ChainClient, TxSigner};
use crate::config::SweeperConfig;
use crate::error::Result;
use crate::gas::GasPriceEstimator;
use crate::monitor::ChainMonitor;
use crate::registry::AccountRegistry;
use crate::scheduler::Scheduler;
use crate::state_manager::StateManager;
use crate::sweeper::SweepExecutor;
use crate::token::{TokenLedger, TokenWhitelist};
use crate::tx_emitter::TxEmitter;
use crate::types::{parse_address, Account, Credential};

pub struct SweeperContext {
    pub config: SweeperConfig,
    pub client: Arc<dyn ChainClient>,
    pub registry: Arc<AccountRegistry>,
    pub whitelist: Arc<TokenWhitelist>,
    pub emitter: Arc<TxEmitter>,
    pub estimator: Arc<GasPriceEstimator>,
    pub state: Arc<StateManager>,
    pub executor: Arc<SweepExecutor>,
}

impl SweeperContext {
    /// Build every component on top of `client`, registering the configured
    /// wallets and tokens.
    pub async fn build(
        config: SweeperConfig,
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn TxSigner>,
        admin: Account,
        state: Arc<StateManager>,
    ) -> Result<Self> {
        let retry = config.rpc.retry_policy();
        let registry = Arc::new(AccountRegistry::new(admin));
        for wallet in &config.wallets {
            let account = Account::new(Credential::from_hex(&wallet.private_key)?);
            registry.register_for_user(&wallet.user_id, account)?;
        }

        let emitter = Arc::new(TxEmitter::new(client.clone(), signer, retry));
        let whitelist = Arc::new(TokenWhitelist::new());
        for token in &config.tokens {
            let ledger = TokenLedger::attach(
                emitter.clone(),
                parse_address(&token.address)?,
                token.symbol.clone(),
                token.decimals,
                registry.admin().address,
            );
            whitelist.add(Arc::new(ledger)).await;
        }

        let estimator = Arc::new(GasPriceEstimator::new(client.clone(), retry));
        let executor = Arc::new(SweepExecutor::new(
            registry.clone(),
            whitelist.clone(),
            estimator.clone(),
            emitter.clone(),
            state.clone(),
            &config.sweep,
        ));

        Ok(Self {
            config,
            client,
            registry,
            whitelist,
            emitter,
            estimator,
            state,
            executor,
        })
    }

    pub fn monitor(&self) -> ChainMonitor {
        ChainMonitor::new(
            self.registry.clone(),
            self.executor.clone(),
            self.state.clone(),
            self.config.sweep.min_block_gap,
        )
    }

    pub fn block_feed(&self) -> BlockFeed {
        BlockFeed::new(
            self.client.clone(),
            Duration::from_millis(self.config.rpc.poll_interval_ms),
        )
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.executor.clone(),
            Duration::from_secs(self.config.sweep.reconcile_interval_seconds),
        )
    }
}
