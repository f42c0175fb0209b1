//! Settlement primitive boundary
//!
//! The host platform provides atomic, fail-closed value movement for native
//! currency and fungible tokens. This module defines that interface and an
//! in-memory ledger implementation used for tests and local runs; wire a real
//! host adapter in production.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::EscrowResult;
use crate::error::EscrowError;

/// Host-provided value-transfer primitive
///
/// Transfers are atomic and fail-closed: an `Err` means no balance moved.
/// Native transfers debit the custody account holding escrowed funds.
#[async_trait]
pub trait Settlement: Send + Sync {
    /// Move native currency from custody to `to`
    async fn transfer_native(&self, to: &str, amount: u64) -> EscrowResult<()>;

    /// Move token balance from custody to `to`
    async fn transfer_token(&self, token: &str, to: &str, amount: u64) -> EscrowResult<()>;

    /// Pull token balance from `from` into `to` against a prior allowance
    async fn transfer_token_from(
        &self,
        token: &str,
        from: &str,
        to: &str,
        amount: u64,
    ) -> EscrowResult<()>;

    /// Remaining allowance granted by `owner` to `spender`
    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> EscrowResult<u64>;
}

/// In-memory settlement ledger
///
/// Tracks native balances, per-token balances, and token allowances. The
/// ledger knows the custody account so outgoing transfers debit it, matching
/// the host-program model where escrowed funds sit in the program's account.
pub struct MemoryLedger {
    custody: String,
    native: RwLock<HashMap<String, u64>>,
    tokens: RwLock<HashMap<(String, String), u64>>,
    allowances: RwLock<HashMap<(String, String, String), u64>>,
}

impl MemoryLedger {
    /// Create a ledger with the given custody account
    pub fn new(custody: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            custody: custody.into(),
            native: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            allowances: RwLock::new(HashMap::new()),
        })
    }

    /// Credit native currency to an account (models an attached deposit)
    pub async fn credit_native(&self, account: &str, amount: u64) {
        let mut native = self.native.write().await;
        *native.entry(account.to_string()).or_insert(0) += amount;
    }

    /// Credit token balance to an account
    pub async fn credit_token(&self, token: &str, account: &str, amount: u64) {
        let mut tokens = self.tokens.write().await;
        *tokens
            .entry((token.to_string(), account.to_string()))
            .or_insert(0) += amount;
    }

    /// Record an allowance from `owner` to `spender`
    pub async fn approve(&self, token: &str, owner: &str, spender: &str, amount: u64) {
        self.allowances.write().await.insert(
            (token.to_string(), owner.to_string(), spender.to_string()),
            amount,
        );
    }

    /// Native balance of an account
    pub async fn native_balance(&self, account: &str) -> u64 {
        self.native.read().await.get(account).copied().unwrap_or(0)
    }

    /// Token balance of an account
    pub async fn token_balance(&self, token: &str, account: &str) -> u64 {
        self.tokens
            .read()
            .await
            .get(&(token.to_string(), account.to_string()))
            .copied()
            .unwrap_or(0)
    }

    async fn debit_native(&self, account: &str, amount: u64) -> EscrowResult<()> {
        let mut native = self.native.write().await;
        let balance = native.entry(account.to_string()).or_insert(0);
        if *balance < amount {
            return Err(EscrowError::settlement(format!(
                "Insufficient native balance for {account}: have {balance}, need {amount}"
            )));
        }
        *balance -= amount;
        Ok(())
    }

    async fn move_token(&self, token: &str, from: &str, to: &str, amount: u64) -> EscrowResult<()> {
        let mut tokens = self.tokens.write().await;
        let from_key = (token.to_string(), from.to_string());
        let balance = tokens.entry(from_key).or_insert(0);
        if *balance < amount {
            return Err(EscrowError::settlement(format!(
                "Insufficient {token} balance for {from}: have {balance}, need {amount}"
            )));
        }
        *balance -= amount;
        *tokens
            .entry((token.to_string(), to.to_string()))
            .or_insert(0) += amount;
        Ok(())
    }
}

#[async_trait]
impl Settlement for MemoryLedger {
    async fn transfer_native(&self, to: &str, amount: u64) -> EscrowResult<()> {
        self.debit_native(&self.custody, amount).await?;
        let mut native = self.native.write().await;
        *native.entry(to.to_string()).or_insert(0) += amount;

        info!("Settled {} native units to {}", amount, to);
        Ok(())
    }

    async fn transfer_token(&self, token: &str, to: &str, amount: u64) -> EscrowResult<()> {
        self.move_token(token, &self.custody, to, amount).await?;

        info!("Settled {} {} units to {}", amount, token, to);
        Ok(())
    }

    async fn transfer_token_from(
        &self,
        token: &str,
        from: &str,
        to: &str,
        amount: u64,
    ) -> EscrowResult<()> {
        {
            let mut allowances = self.allowances.write().await;
            let key = (token.to_string(), from.to_string(), self.custody.clone());
            let allowed = allowances.get(&key).copied().unwrap_or(0);
            if allowed < amount {
                return Err(EscrowError::settlement(format!(
                    "Allowance exceeded for {from}: allowed {allowed}, need {amount}"
                )));
            }
            allowances.insert(key, allowed - amount);
        }

        self.move_token(token, from, to, amount).await?;

        info!("Pulled {} {} units from {} to {}", amount, token, from, to);
        Ok(())
    }

    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> EscrowResult<u64> {
        Ok(self
            .allowances
            .read()
            .await
            .get(&(token.to_string(), owner.to_string(), spender.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn native_transfer_debits_custody() {
        let ledger = MemoryLedger::new("custody");
        ledger.credit_native("custody", 1000).await;

        ledger.transfer_native("freelancer", 800).await.unwrap();
        assert_eq!(ledger.native_balance("freelancer").await, 800);
        assert_eq!(ledger.native_balance("custody").await, 200);
    }

    #[tokio::test]
    async fn native_transfer_fails_closed() {
        let ledger = MemoryLedger::new("custody");
        ledger.credit_native("custody", 100).await;

        let result = ledger.transfer_native("freelancer", 200).await;
        assert!(matches!(result, Err(EscrowError::Settlement(_))));
        // No partial movement
        assert_eq!(ledger.native_balance("custody").await, 100);
        assert_eq!(ledger.native_balance("freelancer").await, 0);
    }

    #[tokio::test]
    async fn token_pull_consumes_allowance() {
        let ledger = MemoryLedger::new("custody");
        ledger.credit_token("usd", "client", 1000).await;
        ledger.approve("usd", "client", "custody", 600).await;

        ledger
            .transfer_token_from("usd", "client", "custody", 600)
            .await
            .unwrap();
        assert_eq!(ledger.token_balance("usd", "custody").await, 600);
        assert_eq!(ledger.allowance("usd", "client", "custody").await.unwrap(), 0);

        // Second pull exceeds the spent allowance
        let result = ledger
            .transfer_token_from("usd", "client", "custody", 1)
            .await;
        assert!(matches!(result, Err(EscrowError::Settlement(_))));
    }
}
