#![allow(dead_code)]

use async_trait::async_trait;
use custodial_sweeper::chain::{ChainClient, LocalSigner};
use custodial_sweeper::config::{
    RpcSettings, SweepSettings, SweeperConfig, TokenConfig, WalletConfig,
};
use custodial_sweeper::context::SweeperContext;
use custodial_sweeper::erc20::IERC20Calls;
use custodial_sweeper::error::{Result, SweepError};
use custodial_sweeper::state_manager::StateManager;
use custodial_sweeper::types::{Account, ChainTransaction, Credential, SignedTransaction, TxReceipt};
use ethers::abi::{self, AbiDecode, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, NameOrAddress, H256, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const NATIVE_TRANSFER_GAS: u64 = 21_000;
pub const CONTRACT_CALL_GAS: u64 = 50_000;
pub const GWEI: u64 = 1_000_000_000;

pub fn eth(whole: u64) -> U256 {
    U256::from(whole) * U256::exp10(18)
}

pub fn units(whole: u64, decimals: u8) -> U256 {
    U256::from(whole) * U256::exp10(decimals as usize)
}

#[derive(Debug, Clone)]
pub struct SentTx {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas: U256,
    pub gas_price: U256,
    pub hash: H256,
    pub call: Option<IERC20Calls>,
}

impl SentTx {
    pub fn is_native(&self) -> bool {
        self.call.is_none() && self.to.is_some()
    }
}

#[derive(Default)]
struct MockToken {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

#[derive(Default)]
struct MockState {
    native: HashMap<Address, U256>,
    tokens: HashMap<Address, MockToken>,
    nonces: HashMap<Address, U256>,
    node_gas_price: U256,
    block_number: u64,
    blocks: HashMap<u64, Vec<ChainTransaction>>,
    sent: Vec<SentTx>,
    receipts: HashMap<H256, TxReceipt>,
    failing_sends: usize,
    timeouts_after_accept: usize,
    failing_queries: bool,
    next_contract: u64,
}

/// In-memory chain: executes native and ERC-20 transfers instantly and
/// charges `gas * gas_price` per transaction.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

fn request_to(tx: &TypedTransaction) -> Option<Address> {
    match tx.to() {
        Some(NameOrAddress::Address(a)) => Some(*a),
        _ => None,
    }
}

fn uint_output(value: U256) -> Bytes {
    Bytes::from(abi::encode(&[Token::Uint(value)]))
}

impl MockChain {
    pub fn new() -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().node_gas_price = U256::from(10 * GWEI);
        chain
    }

    pub fn set_native(&self, address: Address, amount: U256) {
        self.state.lock().unwrap().native.insert(address, amount);
    }

    pub fn native(&self, address: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .native
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    pub fn add_token(&self, contract: Address) {
        self.state.lock().unwrap().tokens.entry(contract).or_default();
    }

    pub fn set_token_balance(&self, contract: Address, holder: Address, amount: U256) {
        self.state
            .lock()
            .unwrap()
            .tokens
            .entry(contract)
            .or_default()
            .balances
            .insert(holder, amount);
    }

    pub fn token_balance(&self, contract: Address, holder: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(&contract)
            .and_then(|t| t.balances.get(&holder).copied())
            .unwrap_or_default()
    }

    pub fn allowance(&self, contract: Address, owner: Address, spender: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(&contract)
            .and_then(|t| t.allowances.get(&(owner, spender)).copied())
            .unwrap_or_default()
    }

    pub fn set_allowance(&self, contract: Address, owner: Address, spender: Address, amount: U256) {
        self.state
            .lock()
            .unwrap()
            .tokens
            .entry(contract)
            .or_default()
            .allowances
            .insert((owner, spender), amount);
    }

    pub fn set_node_gas_price(&self, price: U256) {
        self.state.lock().unwrap().node_gas_price = price;
    }

    /// Make `block` the chain head, holding transactions priced at `gas_prices`.
    pub fn set_block(&self, block: u64, gas_prices: &[u64]) {
        let txs = gas_prices
            .iter()
            .enumerate()
            .map(|(i, price)| ChainTransaction {
                hash: H256::from_low_u64_be(block * 1_000 + i as u64),
                block_number: Some(block),
                gas_price: Some(U256::from(*price)),
                ..Default::default()
            })
            .collect();
        self.set_block_transactions(block, txs);
    }

    pub fn set_block_transactions(&self, block: u64, txs: Vec<ChainTransaction>) {
        let mut state = self.state.lock().unwrap();
        state.blocks.insert(block, txs);
        state.block_number = block;
    }

    pub fn fail_next_sends(&self, count: usize) {
        self.state.lock().unwrap().failing_sends = count;
    }

    /// The next `count` sends are executed but answered with a timeout.
    pub fn timeout_after_accepting(&self, count: usize) {
        self.state.lock().unwrap().timeouts_after_accept = count;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state.lock().unwrap().failing_queries = fail;
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent.clear();
    }

    fn query_guard(&self) -> Result<()> {
        if self.state.lock().unwrap().failing_queries {
            return Err(SweepError::ChainQuery("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.query_guard()?;
        Ok(self.native(address))
    }

    async fn get_transaction_count(&self, address: Address) -> Result<U256> {
        self.query_guard()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256> {
        self.query_guard()?;
        let has_data = tx.data().map(|d| !d.is_empty()).unwrap_or(false);
        Ok(U256::from(if has_data {
            CONTRACT_CALL_GAS
        } else {
            NATIVE_TRANSFER_GAS
        }))
    }

    async fn gas_price(&self) -> Result<U256> {
        self.query_guard()?;
        Ok(self.state.lock().unwrap().node_gas_price)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
        self.query_guard()?;
        let contract =
            request_to(tx).ok_or_else(|| SweepError::ChainQuery("call without to".into()))?;
        let data = tx.data().cloned().unwrap_or_default();
        let state = self.state.lock().unwrap();
        let Some(token) = state.tokens.get(&contract) else {
            return Ok(Bytes::default());
        };
        match IERC20Calls::decode(data.as_ref()) {
            Ok(IERC20Calls::BalanceOf(c)) => Ok(uint_output(
                token.balances.get(&c.account).copied().unwrap_or_default(),
            )),
            Ok(IERC20Calls::Allowance(c)) => Ok(uint_output(
                token
                    .allowances
                    .get(&(c.owner, c.spender))
                    .copied()
                    .unwrap_or_default(),
            )),
            _ => Err(SweepError::ChainQuery("unsupported call".into())),
        }
    }

    async fn send_raw_transaction(&self, signed: &SignedTransaction) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(SweepError::Broadcast("nonce too low".into()));
        }
        if state.receipts.contains_key(&signed.hash) {
            return Err(SweepError::Broadcast("already known".into()));
        }

        let tx = &signed.request;
        let from = signed.from;
        let to = request_to(tx);
        let value = tx.value().copied().unwrap_or_default();
        let gas = tx.gas().copied().unwrap_or_default();
        let gas_price = tx.gas_price().unwrap_or_default();
        let data = tx.data().cloned().unwrap_or_default();
        let fee = gas * gas_price;

        let balance = state.native.get(&from).copied().unwrap_or_default();
        if balance < value + fee {
            return Err(SweepError::InsufficientFunds {
                address: from,
                required: (value + fee).to_string(),
                available: balance.to_string(),
            });
        }
        state.native.insert(from, balance - value - fee);
        *state.nonces.entry(from).or_default() += U256::one();

        let mut success = true;
        let mut call = None;
        let mut contract_address = None;
        match to {
            Some(target) if state.tokens.contains_key(&target) => {
                let decoded = IERC20Calls::decode(data.as_ref()).ok();
                let token = state.tokens.get_mut(&target).unwrap();
                match &decoded {
                    Some(IERC20Calls::Transfer(c)) => {
                        let held = token.balances.get(&from).copied().unwrap_or_default();
                        if held < c.amount {
                            success = false;
                        } else {
                            token.balances.insert(from, held - c.amount);
                            *token.balances.entry(c.to).or_default() += c.amount;
                        }
                    }
                    Some(IERC20Calls::TransferFrom(c)) => {
                        let allowed = token
                            .allowances
                            .get(&(c.from, from))
                            .copied()
                            .unwrap_or_default();
                        let held = token.balances.get(&c.from).copied().unwrap_or_default();
                        if allowed < c.amount || held < c.amount {
                            success = false;
                        } else {
                            token.allowances.insert((c.from, from), allowed - c.amount);
                            token.balances.insert(c.from, held - c.amount);
                            *token.balances.entry(c.to).or_default() += c.amount;
                        }
                    }
                    Some(IERC20Calls::Approve(c)) => {
                        token.allowances.insert((from, c.spender), c.amount);
                    }
                    _ => success = false,
                }
                call = decoded;
            }
            Some(target) => {
                *state.native.entry(target).or_default() += value;
            }
            None => {
                state.next_contract += 1;
                let address = Address::from_low_u64_be(0xC0_0000 + state.next_contract);
                state.tokens.insert(address, MockToken::default());
                contract_address = Some(address);
            }
        }

        state.sent.push(SentTx {
            from,
            to,
            value,
            gas,
            gas_price,
            hash: signed.hash,
            call,
        });
        let block_number = Some(state.block_number);
        state.receipts.insert(
            signed.hash,
            TxReceipt {
                transaction_hash: signed.hash,
                block_number,
                contract_address,
                success,
            },
        );
        if state.timeouts_after_accept > 0 {
            state.timeouts_after_accept -= 1;
            return Err(SweepError::Timeout(10_000));
        }
        Ok(signed.hash)
    }

    async fn get_block_number(&self) -> Result<u64> {
        self.query_guard()?;
        Ok(self.state.lock().unwrap().block_number)
    }

    async fn get_block_transaction_count(&self, block: u64) -> Result<usize> {
        self.query_guard()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .blocks
            .get(&block)
            .map(|b| b.len())
            .unwrap_or(0))
    }

    async fn get_transaction_by_block_and_index(
        &self,
        block: u64,
        index: usize,
    ) -> Result<Option<ChainTransaction>> {
        self.query_guard()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .blocks
            .get(&block)
            .and_then(|b| b.get(index).cloned()))
    }

    async fn get_transaction(&self, hash: H256) -> Result<Option<ChainTransaction>> {
        self.query_guard()?;
        let state = self.state.lock().unwrap();
        let mined = state.blocks.values().flatten().find(|t| t.hash == hash).cloned();
        let broadcast = state.sent.iter().find(|t| t.hash == hash).map(|t| ChainTransaction {
            hash: t.hash,
            from: t.from,
            to: t.to,
            value: t.value,
            gas_price: Some(t.gas_price),
            block_number: state.receipts.get(&hash).and_then(|r| r.block_number),
            ..Default::default()
        });
        Ok(mined.or(broadcast))
    }

    async fn wait_for_receipt(&self, hash: H256) -> Result<TxReceipt> {
        self.state
            .lock()
            .unwrap()
            .receipts
            .get(&hash)
            .cloned()
            .ok_or_else(|| SweepError::ChainQuery(format!("unknown transaction {:?}", hash)))
    }
}

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub ctx: SweeperContext,
    pub admin: Address,
    pub wallets: Vec<Address>,
    pub tokens: Vec<(Address, String, u8)>,
}

impl Harness {
    pub fn usdt(&self) -> Address {
        self.tokens[0].0
    }

    pub fn uni(&self) -> Address {
        self.tokens[1].0
    }
}

pub fn test_settings() -> SweepSettings {
    SweepSettings {
        settlement_delay_ms: 0,
        ..SweepSettings::default()
    }
}

/// Sweeper over a `MockChain` with `wallet_count` user wallets and two
/// whitelisted tokens: MockUSDT (6 decimals) then MockUNI (18 decimals).
/// The chain head carries transactions priced at 10 gwei.
pub async fn harness(wallet_count: usize, settings: SweepSettings) -> Harness {
    harness_with_state(wallet_count, settings, StateManager::in_memory()).await
}

pub async fn harness_with_state(
    wallet_count: usize,
    settings: SweepSettings,
    state: StateManager,
) -> Harness {
    let chain = Arc::new(MockChain::new());
    let admin = Credential::random();
    chain.set_native(admin.address(), eth(1_000));
    chain.set_block(100, &[10 * GWEI; 3]);

    let tokens = vec![
        (Address::from_low_u64_be(0x1001), "MockUSDT".to_string(), 6u8),
        (Address::from_low_u64_be(0x1002), "MockUNI".to_string(), 18u8),
    ];
    for (address, _, _) in &tokens {
        chain.add_token(*address);
    }

    let credentials: Vec<Credential> = (0..wallet_count).map(|_| Credential::random()).collect();
    let wallets = credentials.iter().map(|c| c.address()).collect();

    let config = SweeperConfig {
        rpc_url: "http://127.0.0.1:8888".into(),
        chain_id: 1337,
        admin_private_key: None,
        tokens: tokens
            .iter()
            .map(|(address, symbol, decimals)| TokenConfig {
                address: format!("{:?}", address),
                symbol: symbol.clone(),
                decimals: *decimals,
            })
            .collect(),
        wallets: credentials
            .iter()
            .map(|c| WalletConfig {
                user_id: "peter2020".into(),
                private_key: c.expose_secret_hex(),
            })
            .collect(),
        state_path: None,
        sweep: settings,
        rpc: RpcSettings {
            retry_initial_delay_ms: 1,
            ..RpcSettings::default()
        },
    };

    let ctx = SweeperContext::build(
        config,
        chain.clone(),
        Arc::new(LocalSigner::new(1337)),
        Account::new(admin.clone()),
        Arc::new(state),
    )
    .await
    .expect("context builds");

    Harness {
        chain,
        ctx,
        admin: admin.address(),
        wallets,
        tokens,
    }
}
