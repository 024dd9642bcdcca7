//! Token Ledger
//!
//! One ERC-20 contract and the operations the sweeper needs on it. Amounts are
//! always base units here; display units only appear through `format_amount`.

use ethers::abi::{self, AbiEncode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::MAX_TOKEN_DECIMALS;
use crate::erc20::{AllowanceCall, ApproveCall, BalanceOfCall, TransferCall, TransferFromCall};
use crate::error::{Result, SweepError};
use crate::retry::retry_async;
use crate::tx_emitter::{TxEmitter, TxParams};
use crate::types::{display_amount, short_hash, Account};

const DEPLOY_GAS: u64 = 10_000_000;

/// `whole` tokens in base units of a token with `decimals` precision.
pub fn whole_to_base_units(whole: u64, decimals: u8) -> Result<U256> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(SweepError::Config(format!(
            "decimals {} exceed the supported {}",
            decimals, MAX_TOKEN_DECIMALS
        )));
    }
    U256::from(whole)
        .checked_mul(U256::exp10(decimals as usize))
        .ok_or_else(|| SweepError::Config(format!("{} tokens overflow uint256", whole)))
}

pub struct TokenLedger {
    contract_address: Address,
    symbol: String,
    decimals: u8,
    owner: Address,
    emitter: Arc<TxEmitter>,
}

impl std::fmt::Debug for TokenLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLedger")
            .field("contract_address", &self.contract_address)
            .field("symbol", &self.symbol)
            .field("decimals", &self.decimals)
            .field("owner", &self.owner)
            .finish()
    }
}

impl TokenLedger {
    /// Wrap an already deployed contract.
    pub fn attach(
        emitter: Arc<TxEmitter>,
        contract_address: Address,
        symbol: impl Into<String>,
        decimals: u8,
        owner: Address,
    ) -> Self {
        Self {
            contract_address,
            symbol: symbol.into(),
            decimals,
            owner,
            emitter,
        }
    }

    /// Deploy a new ERC-20 from `bytecode` with constructor
    /// `(name, symbol, decimals, supply)` and wait for its address.
    pub async fn deploy(
        emitter: Arc<TxEmitter>,
        deployer: &Account,
        bytecode: Bytes,
        name: &str,
        symbol: &str,
        decimals: u8,
        supply: U256,
    ) -> Result<Self> {
        let mut code = bytecode.to_vec();
        code.extend(abi::encode(&[
            Token::String(name.to_string()),
            Token::String(symbol.to_string()),
            Token::Uint(U256::from(decimals)),
            Token::Uint(supply),
        ]));

        let receipt = emitter
            .emit(deployer, TxParams::deploy(code.into(), U256::from(DEPLOY_GAS)))
            .await?;
        let contract_address = receipt.contract_address.ok_or_else(|| {
            SweepError::DeployFailed(format!(
                "receipt {:?} has no contract address",
                receipt.transaction_hash
            ))
        })?;

        info!(
            token = symbol,
            address = ?contract_address,
            owner = %deployer.short(),
            "Token deployed"
        );
        Ok(Self::attach(
            emitter,
            contract_address,
            symbol,
            decimals,
            deployer.address,
        ))
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn format_amount(&self, amount: U256) -> String {
        display_amount(amount, self.decimals)
    }

    async fn read_uint(&self, data: Vec<u8>, what: &str) -> Result<U256> {
        let params = TxParams::contract_call(self.contract_address, data);
        let request = params.to_request(Address::zero());
        let client = self.emitter.client().clone();
        let output = retry_async(self.emitter.retry_policy(), what, |_| {
            let client = client.clone();
            let request = request.clone();
            async move { client.call(&request).await }
        })
        .await?;

        if output.len() < 32 {
            return Err(SweepError::ChainQuery(format!(
                "{} on {} returned {} bytes",
                what,
                self.symbol,
                output.len()
            )));
        }
        Ok(U256::from_big_endian(&output[..32]))
    }

    pub async fn balance_of(&self, address: Address) -> Result<U256> {
        self.read_uint(BalanceOfCall { account: address }.encode(), "balanceOf")
            .await
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        self.read_uint(AllowanceCall { owner, spender }.encode(), "allowance")
            .await
    }

    /// Transfer `amount` from `from` to `to`. The sender must already hold enough gas.
    pub async fn transfer(&self, from: &Account, to: Address, amount: U256) -> Result<H256> {
        let data = TransferCall { to, amount }.encode();
        let receipt = self
            .emitter
            .emit(from, TxParams::contract_call(self.contract_address, data))
            .await?;
        info!(
            token = %self.symbol,
            from = %from.short(),
            amount = %self.format_amount(amount),
            tx = %short_hash(&receipt.transaction_hash),
            "Token transfer"
        );
        Ok(receipt.transaction_hash)
    }

    pub async fn approve(&self, owner: &Account, spender: Address, amount: U256) -> Result<H256> {
        let data = ApproveCall { spender, amount }.encode();
        let receipt = self
            .emitter
            .emit(owner, TxParams::contract_call(self.contract_address, data))
            .await?;
        Ok(receipt.transaction_hash)
    }

    /// Raise `spender`'s allowance to exactly `amount` when it falls short.
    /// Returns `None` when the current allowance already suffices.
    pub async fn approve_if_necessary(
        &self,
        owner: &Account,
        spender: Address,
        amount: U256,
    ) -> Result<Option<H256>> {
        let current = self.allowance(owner.address, spender).await?;
        if current >= amount {
            return Ok(None);
        }
        let missing = amount - current;
        debug!(
            token = %self.symbol,
            owner = %owner.short(),
            missing = %self.format_amount(missing),
            "Allowance short"
        );
        self.approve(owner, spender, current + missing).await.map(Some)
    }

    /// Move `amount` of `owner`'s tokens to `to`, signed by `spender`.
    pub async fn transfer_from(
        &self,
        owner: &Account,
        spender: &Account,
        to: Address,
        amount: U256,
    ) -> Result<H256> {
        self.approve_if_necessary(owner, spender.address, amount)
            .await?;
        let data = TransferFromCall {
            from: owner.address,
            to,
            amount,
        }
        .encode();
        let receipt = self
            .emitter
            .emit(spender, TxParams::contract_call(self.contract_address, data))
            .await?;
        Ok(receipt.transaction_hash)
    }

    /// Send the whole balance of `account` to `admin`. No transaction on zero balance.
    pub async fn withdraw_all(
        &self,
        account: &Account,
        admin: Address,
    ) -> Result<Option<(U256, H256)>> {
        let balance = self.balance_of(account.address).await?;
        if balance.is_zero() {
            debug!(token = %self.symbol, account = %account.short(), "Nothing to withdraw");
            return Ok(None);
        }
        let hash = self.transfer(account, admin, balance).await?;
        Ok(Some((balance, hash)))
    }
}

/// The ordered set of tokens the sweeper collects.
#[derive(Default)]
pub struct TokenWhitelist {
    tokens: RwLock<Vec<Arc<TokenLedger>>>,
}

impl TokenWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token; a contract already on the list is ignored.
    pub async fn add(&self, token: Arc<TokenLedger>) -> bool {
        let mut tokens = self.tokens.write().await;
        if tokens
            .iter()
            .any(|t| t.contract_address() == token.contract_address())
        {
            return false;
        }
        info!(token = %token.symbol(), address = ?token.contract_address(), "Token whitelisted");
        tokens.push(token);
        true
    }

    pub async fn tokens(&self) -> Vec<Arc<TokenLedger>> {
        self.tokens.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}
