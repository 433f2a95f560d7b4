//! インメモリ実装
//!
//! 各操作はロックを保持したまま判定と更新を行うため、
//! PostgreSQL 実装の条件付き更新と同じ原子性を持つ。

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccountStore, QuotaStore, ResetTokenStore};
use crate::models::{Account, QuotaCost, QuotaRecord, ResetToken};

#[derive(Default)]
pub struct MemoryQuotaStore {
    records: Mutex<HashMap<Uuid, QuotaRecord>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, account_id: Uuid) -> Option<QuotaRecord> {
        self.records.lock().await.get(&account_id).cloned()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn find_or_create(&self, seed: &QuotaRecord) -> Result<QuotaRecord, sqlx::Error> {
        let mut records = self.records.lock().await;
        Ok(records
            .entry(seed.account_id)
            .or_insert_with(|| seed.clone())
            .clone())
    }

    async fn replace_if_version(
        &self,
        expected_version: i64,
        next: &QuotaRecord,
    ) -> Result<Option<QuotaRecord>, sqlx::Error> {
        let mut records = self.records.lock().await;
        match records.get_mut(&next.account_id) {
            Some(current) if current.version == expected_version => {
                *current = next.clone();
                Ok(Some(current.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn consume_if_available(
        &self,
        account_id: Uuid,
        window_started_at: OffsetDateTime,
        cost: QuotaCost,
        now: OffsetDateTime,
    ) -> Result<Option<QuotaRecord>, sqlx::Error> {
        let mut records = self.records.lock().await;
        match records.get_mut(&account_id) {
            Some(current)
                if current.window_started_at == window_started_at && current.can_afford(cost) =>
            {
                *current = current.consumed(cost, now);
                Ok(Some(current.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryResetTokenStore {
    tokens: Mutex<HashMap<Uuid, ResetToken>>,
}

impl MemoryResetTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find_for_account(&self, account_id: Uuid) -> Option<ResetToken> {
        self.tokens.lock().await.get(&account_id).cloned()
    }
}

#[async_trait]
impl ResetTokenStore for MemoryResetTokenStore {
    async fn upsert(
        &self,
        account_id: Uuid,
        token_digest: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<ResetToken, sqlx::Error> {
        let token = ResetToken {
            account_id,
            token_digest: token_digest.to_string(),
            expires_at,
            created_at: now,
        };
        self.tokens.lock().await.insert(account_id, token.clone());
        Ok(token)
    }

    async fn take_live(
        &self,
        token_digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<ResetToken>, sqlx::Error> {
        let mut tokens = self.tokens.lock().await;
        let account_id = tokens
            .values()
            .find(|t| t.token_digest == token_digest && t.is_live(now))
            .map(|t| t.account_id);
        Ok(account_id.and_then(|id| tokens.remove(&id)))
    }

    async fn delete_for_account(&self, account_id: Uuid) -> Result<u64, sqlx::Error> {
        let removed = self.tokens.lock().await.remove(&account_id);
        Ok(u64::from(removed.is_some()))
    }
}

#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<Uuid, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: Account) {
        self.accounts.lock().await.insert(account.id, account);
    }

    pub async fn find_by_id(&self, account_id: Uuid) -> Option<Account> {
        self.accounts.lock().await.get(&account_id).cloned()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, sqlx::Error> {
        Ok(self
            .accounts
            .lock()
            .await
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn update_password(
        &self,
        account_id: Uuid,
        new_password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        if let Some(account) = self.accounts.lock().await.get_mut(&account_id) {
            account.password_hash = Some(new_password_hash.to_string());
            account.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }
}
