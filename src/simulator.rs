//! Traffic Simulator
//!
//! Demo driver: sends random amounts of random whitelisted tokens from the
//! admin account to random managed wallets, so the monitor has deposits to
//! react to. Runs as its own task, independent of the monitor loop.

use ethers::types::{Address, U256};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::MAX_TOKEN_DECIMALS;
use crate::registry::AccountRegistry;
use crate::token::TokenWhitelist;

pub struct TrafficSimulator {
    registry: Arc<AccountRegistry>,
    whitelist: Arc<TokenWhitelist>,
    interval: Duration,
    iterations: usize,
}

/// `whole` display units plus `fraction` thousandths, in base units.
/// `None` when the token's precision does not fit in `U256`.
fn to_base_units(whole: u64, fraction: u64, decimals: u8) -> Option<U256> {
    if decimals > MAX_TOKEN_DECIMALS {
        return None;
    }
    let scale = U256::exp10(decimals as usize);
    let whole = U256::from(whole).checked_mul(scale)?;
    let fraction = U256::from(fraction).checked_mul(scale)? / U256::from(1_000);
    whole.checked_add(fraction)
}

impl TrafficSimulator {
    pub fn new(
        registry: Arc<AccountRegistry>,
        whitelist: Arc<TokenWhitelist>,
        interval: Duration,
        iterations: usize,
    ) -> Self {
        Self {
            registry,
            whitelist,
            interval,
            iterations,
        }
    }

    pub async fn run(&self) -> usize {
        let tokens = self.whitelist.tokens().await;
        let accounts: Vec<Address> = self.registry.addresses();
        if tokens.is_empty() || accounts.is_empty() {
            warn!("Nothing to simulate: no tokens or no accounts");
            return 0;
        }

        let admin = self.registry.admin();
        let mut sent = 0;
        for round in 0..self.iterations {
            let (token, to, amount) = {
                let mut rng = rand::thread_rng();
                let token = tokens[rng.gen_range(0..tokens.len())].clone();
                let to = accounts[rng.gen_range(0..accounts.len())];
                let amount = to_base_units(
                    rng.gen_range(10..500),
                    rng.gen_range(0..1_000),
                    token.decimals(),
                );
                (token, to, amount)
            };

            let Some(amount) = amount else {
                warn!(
                    round,
                    token = %token.symbol(),
                    decimals = token.decimals(),
                    "Unsupported precision"
                );
                continue;
            };

            match token.transfer(admin, to, amount).await {
                Ok(_) => {
                    sent += 1;
                    info!(
                        round,
                        token = %token.symbol(),
                        amount = %token.format_amount(amount),
                        "Simulated deposit"
                    );
                }
                Err(e) => warn!(round, kind = e.kind(), error = %e, "Simulated deposit failed"),
            }
            sleep(self.interval).await;
        }
        sent
    }
}
