//! Credit ledger boundary. Real bookkeeping (plans, payments) lives outside
//! this service; batches only read a balance and debit once per batch.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Balance value for accounts on an unlimited plan.
pub const UNLIMITED: i64 = -1;

#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn balance(&self, account_id: &str) -> Result<i64>;

    /// Debits `amount` credits and returns the remaining balance.
    /// Unlimited accounts are never decremented; balances never go below zero.
    async fn debit(&self, account_id: &str, amount: u64) -> Result<i64>;
}

/// Whether `balance` covers `required` credits.
pub fn can_afford(balance: i64, required: usize) -> bool {
    balance == UNLIMITED || balance >= required as i64
}

/// Process-local ledger. Accounts it has not seen open with `opening_balance`.
pub struct InMemoryCreditLedger {
    opening_balance: i64,
    balances: Mutex<HashMap<String, i64>>,
}

impl InMemoryCreditLedger {
    pub fn new(opening_balance: i64) -> Self {
        Self {
            opening_balance,
            balances: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set_balance(&self, account_id: &str, balance: i64) {
        self.balances
            .lock()
            .await
            .insert(account_id.to_string(), balance);
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn balance(&self, account_id: &str) -> Result<i64> {
        let balances = self.balances.lock().await;
        Ok(balances
            .get(account_id)
            .copied()
            .unwrap_or(self.opening_balance))
    }

    async fn debit(&self, account_id: &str, amount: u64) -> Result<i64> {
        let mut balances = self.balances.lock().await;
        let balance = balances
            .entry(account_id.to_string())
            .or_insert(self.opening_balance);
        if *balance != UNLIMITED {
            let amount = i64::try_from(amount)?;
            *balance = balance.saturating_sub(amount).max(0);
        }
        Ok(*balance)
    }
}
