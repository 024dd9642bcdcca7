//! Account Registry
//!
//! Holds the managed user accounts and the admin account. In-memory only:
//! accounts are reloaded from configuration or regenerated on startup.

use dashmap::DashMap;
use ethers::types::Address;
use tracing::{debug, info};

use crate::error::{Result, SweepError};
use crate::types::{parse_address, Account};

pub struct AccountRegistry {
    admin: Account,
    accounts: DashMap<Address, Account>,
    /// Wallet addresses per user id, in creation order.
    users: DashMap<String, Vec<Address>>,
}

impl AccountRegistry {
    pub fn new(admin: Account) -> Self {
        info!(admin = %admin.short(), "Account registry created");
        Self {
            admin,
            accounts: DashMap::new(),
            users: DashMap::new(),
        }
    }

    pub fn admin(&self) -> &Account {
        &self.admin
    }

    pub fn is_admin(&self, address: &Address) -> bool {
        self.admin.address == *address
    }

    pub fn register(&self, account: Account) -> Result<()> {
        if self.is_admin(&account.address) {
            return Err(SweepError::DuplicateAccount(account.address));
        }
        match self.accounts.entry(account.address) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SweepError::DuplicateAccount(account.address))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(account = %account.short(), "Registered account");
                slot.insert(account);
                Ok(())
            }
        }
    }

    /// Register an existing account under `user_id`.
    pub fn register_for_user(&self, user_id: &str, account: Account) -> Result<()> {
        let address = account.address;
        self.register(account)?;
        self.users
            .entry(user_id.to_string())
            .or_default()
            .push(address);
        Ok(())
    }

    /// Generate `count` fresh wallets for `user_id` and register them.
    pub fn create_wallets(&self, user_id: &str, count: usize) -> Result<Vec<Address>> {
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let account = Account::generate();
            created.push(account.address);
            self.register_for_user(user_id, account)?;
        }
        info!(user = user_id, count, "Generated wallets");
        Ok(created)
    }

    pub fn wallets_of(&self, user_id: &str) -> Vec<Address> {
        self.users
            .get(user_id)
            .map(|w| w.value().clone())
            .unwrap_or_default()
    }

    pub fn resolve(&self, address: &Address) -> Result<Account> {
        self.accounts
            .get(address)
            .map(|a| a.value().clone())
            .ok_or(SweepError::AccountNotFound(*address))
    }

    /// Resolve a hex address string; casing is irrelevant.
    pub fn resolve_str(&self, address: &str) -> Result<Account> {
        self.resolve(&parse_address(address)?)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn addresses(&self) -> Vec<Address> {
        let mut all: Vec<Address> = self.accounts.iter().map(|e| *e.key()).collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
