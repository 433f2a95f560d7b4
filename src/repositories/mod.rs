//! 永続化層
//!
//! サービス層が依存するストレージ操作はトレイトで定義し、
//! PostgreSQL 実装（本番）とインメモリ実装（テスト・ローカル検証）を持つ。
//! 同一アカウントに対する read-check-write はすべて単一の条件付き更新で表現する。

pub mod account;
pub mod memory;
pub mod quota_record;
pub mod reset_token;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{Account, QuotaCost, QuotaRecord, ResetToken};

pub use account::PgAccountStore;
pub use memory::{MemoryAccountStore, MemoryQuotaStore, MemoryResetTokenStore};
pub use quota_record::PgQuotaStore;
pub use reset_token::PgResetTokenStore;

/// サービス層が使うストア一式
#[derive(Clone)]
pub struct Stores {
    pub quotas: Arc<dyn QuotaStore>,
    pub reset_tokens: Arc<dyn ResetTokenStore>,
    pub accounts: Arc<dyn AccountStore>,
}

impl Stores {
    /// PostgreSQL 実装
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            quotas: Arc::new(PgQuotaStore::new(pool.clone())),
            reset_tokens: Arc::new(PgResetTokenStore::new(pool.clone())),
            accounts: Arc::new(PgAccountStore::new(pool)),
        }
    }

    /// インメモリ実装
    pub fn in_memory() -> Self {
        Self {
            quotas: Arc::new(MemoryQuotaStore::new()),
            reset_tokens: Arc::new(MemoryResetTokenStore::new()),
            accounts: Arc::new(MemoryAccountStore::new()),
        }
    }
}

/// 利用枠レコードのストア
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// レコードを取得し、存在しなければ `seed` で作成する
    async fn find_or_create(&self, seed: &QuotaRecord) -> Result<QuotaRecord, sqlx::Error>;

    /// `version` が一致する場合のみ `next` で置き換える（CAS）
    ///
    /// 一致しなければ None
    async fn replace_if_version(
        &self,
        expected_version: i64,
        next: &QuotaRecord,
    ) -> Result<Option<QuotaRecord>, sqlx::Error>;

    /// 同じウィンドウ内で残量が足りる場合のみ減算する
    ///
    /// 条件を満たさなければ None（状態は変更しない）
    async fn consume_if_available(
        &self,
        account_id: Uuid,
        window_started_at: OffsetDateTime,
        cost: QuotaCost,
        now: OffsetDateTime,
    ) -> Result<Option<QuotaRecord>, sqlx::Error>;

    /// 疎通確認
    async fn ping(&self) -> Result<(), sqlx::Error>;
}

/// リセットトークンのストア（アカウントごとに最大1件）
#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    /// アカウントのトークンを作成、既存があれば置き換える
    async fn upsert(
        &self,
        account_id: Uuid,
        token_digest: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<ResetToken, sqlx::Error>;

    /// 有効期限内のトークンを取り出して削除する（単一操作）
    ///
    /// 期限切れのレコードは削除しない
    async fn take_live(
        &self,
        token_digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<ResetToken>, sqlx::Error>;

    /// アカウントのトークンを削除
    ///
    /// # Returns
    /// 削除された件数
    async fn delete_for_account(&self, account_id: Uuid) -> Result<u64, sqlx::Error>;
}

/// アカウントのストア
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, sqlx::Error>;

    /// # Note
    /// password_hash はログに出力しないこと
    async fn update_password(
        &self,
        account_id: Uuid,
        new_password_hash: &str,
    ) -> Result<(), sqlx::Error>;
}
