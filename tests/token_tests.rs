mod common;

use common::{eth, harness, test_settings, units};
use custodial_sweeper::erc20::IERC20Calls;
use custodial_sweeper::error::SweepError;
use custodial_sweeper::token::{TokenLedger, TokenWhitelist};
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;

#[tokio::test]
async fn test_balance_of_zero_is_zero() {
    let h = harness(1, test_settings()).await;
    let tokens = h.ctx.whitelist.tokens().await;

    let balance = tokens[0].balance_of(h.wallets[0]).await.unwrap();
    assert_eq!(balance, U256::zero());
}

#[tokio::test]
async fn test_balance_of_reads_base_units() {
    let h = harness(1, test_settings()).await;
    h.chain.set_token_balance(h.usdt(), h.wallets[0], units(42, 6));
    let tokens = h.ctx.whitelist.tokens().await;

    let balance = tokens[0].balance_of(h.wallets[0]).await.unwrap();
    assert_eq!(balance, U256::from(42_000_000u64));
    assert_eq!(tokens[0].format_amount(balance), "42.000000");
}

#[tokio::test]
async fn test_balance_of_non_contract_is_an_error() {
    let h = harness(0, test_settings()).await;
    let ledger = TokenLedger::attach(
        h.ctx.emitter.clone(),
        Address::from_low_u64_be(0x9999),
        "NOPE",
        18,
        h.admin,
    );

    let err = ledger.balance_of(h.admin).await.unwrap_err();
    assert!(matches!(err, SweepError::ChainQuery(_)));
}

#[tokio::test]
async fn test_withdraw_all_is_idempotent() {
    let h = harness(1, test_settings()).await;
    let wallet = h.wallets[0];
    h.chain.set_native(wallet, eth(1));
    h.chain.set_token_balance(h.usdt(), wallet, units(5, 6));
    let account = h.ctx.registry.resolve(&wallet).unwrap();
    let usdt = h.ctx.whitelist.tokens().await[0].clone();

    let first = usdt.withdraw_all(&account, h.admin).await.unwrap();
    assert_eq!(first.map(|(amount, _)| amount), Some(units(5, 6)));
    assert_eq!(h.chain.sent().len(), 1);

    let second = usdt.withdraw_all(&account, h.admin).await.unwrap();
    assert!(second.is_none());
    assert_eq!(h.chain.sent().len(), 1);
}

#[tokio::test]
async fn test_transfer_without_gas_fails_before_broadcast() {
    let h = harness(1, test_settings()).await;
    let wallet = h.wallets[0];
    h.chain.set_token_balance(h.usdt(), wallet, units(5, 6));
    let account = h.ctx.registry.resolve(&wallet).unwrap();
    let usdt = h.ctx.whitelist.tokens().await[0].clone();

    let err = usdt.transfer(&account, h.admin, units(5, 6)).await.unwrap_err();
    assert!(matches!(err, SweepError::InsufficientGas { .. }));
    assert!(h.chain.sent().is_empty());
}

#[tokio::test]
async fn test_transfer_from_approves_missing_allowance_only() {
    let h = harness(1, test_settings()).await;
    let wallet = h.wallets[0];
    h.chain.set_native(wallet, eth(1));
    h.chain.set_token_balance(h.usdt(), wallet, units(100, 6));
    h.chain.set_allowance(h.usdt(), wallet, h.admin, units(30, 6));
    let owner = h.ctx.registry.resolve(&wallet).unwrap();
    let usdt = h.ctx.whitelist.tokens().await[0].clone();
    let receiver = Address::from_low_u64_be(0xcafe);

    usdt.transfer_from(&owner, h.ctx.registry.admin(), receiver, units(100, 6))
        .await
        .unwrap();

    let sent = h.chain.sent();
    assert_eq!(sent.len(), 2);
    match &sent[0].call {
        Some(IERC20Calls::Approve(call)) => {
            assert_eq!(call.spender, h.admin);
            assert_eq!(call.amount, units(100, 6));
        }
        other => panic!("expected approve, got {:?}", other),
    }
    assert_eq!(sent[0].from, wallet);
    assert!(matches!(sent[1].call, Some(IERC20Calls::TransferFrom(_))));
    assert_eq!(sent[1].from, h.admin);

    assert_eq!(h.chain.token_balance(h.usdt(), receiver), units(100, 6));
    assert_eq!(h.chain.allowance(h.usdt(), wallet, h.admin), U256::zero());
}

#[tokio::test]
async fn test_sufficient_allowance_skips_approval() {
    let h = harness(1, test_settings()).await;
    let wallet = h.wallets[0];
    h.chain.set_allowance(h.usdt(), wallet, h.admin, units(50, 6));
    let owner = h.ctx.registry.resolve(&wallet).unwrap();
    let usdt = h.ctx.whitelist.tokens().await[0].clone();

    let approval = usdt
        .approve_if_necessary(&owner, h.admin, units(50, 6))
        .await
        .unwrap();
    assert!(approval.is_none());
    assert!(h.chain.sent().is_empty());
}

#[tokio::test]
async fn test_deploy_reads_contract_address_from_receipt() {
    let h = harness(0, test_settings()).await;

    let token = TokenLedger::deploy(
        h.ctx.emitter.clone(),
        h.ctx.registry.admin(),
        Bytes::from(vec![0x60, 0x80, 0x60, 0x40]),
        "Mock Tether USD",
        "MockUSDT2",
        6,
        units(1_000_000, 6),
    )
    .await
    .unwrap();

    let sent = h.chain.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].to.is_none());
    assert_eq!(token.owner(), h.admin);
    assert_eq!(token.decimals(), 6);
    assert_ne!(token.contract_address(), Address::zero());
}

#[tokio::test]
async fn test_whitelist_keeps_registration_order_and_rejects_duplicates() {
    let h = harness(0, test_settings()).await;
    let whitelist = TokenWhitelist::new();
    let make = |n: u64, symbol: &str| {
        Arc::new(TokenLedger::attach(
            h.ctx.emitter.clone(),
            Address::from_low_u64_be(n),
            symbol,
            18,
            h.admin,
        ))
    };

    assert!(whitelist.add(make(3, "C")).await);
    assert!(whitelist.add(make(1, "A")).await);
    assert!(!whitelist.add(make(3, "C again")).await);

    let symbols: Vec<String> = whitelist
        .tokens()
        .await
        .iter()
        .map(|t| t.symbol().to_string())
        .collect();
    assert_eq!(symbols, vec!["C", "A"]);
}

#[test]
fn test_whole_to_base_units_bounds_precision() {
    use custodial_sweeper::token::whole_to_base_units;

    assert_eq!(
        whole_to_base_units(1_000_000_000, 18).unwrap(),
        U256::from(1_000_000_000u64) * U256::exp10(18)
    );
    assert!(matches!(whole_to_base_units(1, 77), Err(SweepError::Config(_))));
    assert!(matches!(whole_to_base_units(1, u8::MAX), Err(SweepError::Config(_))));
}
