//! Custodial Sweeper
//!
//! Watches an EVM chain for deposits to managed wallets, tops those wallets up
//! with gas, withdraws whitelisted tokens to the admin account and reclaims
//! the leftover gas.

pub mod balance_checker;
pub mod block_feed;
pub mod chain;
pub mod config;
pub mod context;
pub mod erc20;
pub mod error;
pub mod gas;
pub mod logging;
pub mod monitor;
pub mod registry;
pub mod retry;
pub mod rules_engine;
pub mod scheduler;
pub mod simulator;
pub mod state_manager;
pub mod sweeper;
pub mod token;
pub mod tx_emitter;
pub mod types;
