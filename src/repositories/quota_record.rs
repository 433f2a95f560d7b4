use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::QuotaStore;
use crate::models::{QuotaCost, QuotaRecord};

#[derive(Clone)]
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    /// # Note
    /// 競合時も RETURNING で既存行を返すため、ON CONFLICT で同値更新する
    async fn find_or_create(&self, seed: &QuotaRecord) -> Result<QuotaRecord, sqlx::Error> {
        sqlx::query_as::<_, QuotaRecord>(
            r#"
            INSERT INTO quota_records (
                account_id, request_limit, token_limit,
                requests_remaining, tokens_remaining,
                total_requests, total_tokens,
                window_started_at, version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (account_id) DO UPDATE SET account_id = EXCLUDED.account_id
            RETURNING account_id, request_limit, token_limit,
                      requests_remaining, tokens_remaining,
                      total_requests, total_tokens,
                      window_started_at, version, updated_at
            "#,
        )
        .bind(seed.account_id)
        .bind(seed.request_limit)
        .bind(seed.token_limit)
        .bind(seed.requests_remaining)
        .bind(seed.tokens_remaining)
        .bind(seed.total_requests)
        .bind(seed.total_tokens)
        .bind(seed.window_started_at)
        .bind(seed.version)
        .bind(seed.updated_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn replace_if_version(
        &self,
        expected_version: i64,
        next: &QuotaRecord,
    ) -> Result<Option<QuotaRecord>, sqlx::Error> {
        sqlx::query_as::<_, QuotaRecord>(
            r#"
            UPDATE quota_records
            SET request_limit = $3,
                token_limit = $4,
                requests_remaining = $5,
                tokens_remaining = $6,
                total_requests = $7,
                total_tokens = $8,
                window_started_at = $9,
                version = $10,
                updated_at = $11
            WHERE account_id = $1 AND version = $2
            RETURNING account_id, request_limit, token_limit,
                      requests_remaining, tokens_remaining,
                      total_requests, total_tokens,
                      window_started_at, version, updated_at
            "#,
        )
        .bind(next.account_id)
        .bind(expected_version)
        .bind(next.request_limit)
        .bind(next.token_limit)
        .bind(next.requests_remaining)
        .bind(next.tokens_remaining)
        .bind(next.total_requests)
        .bind(next.total_tokens)
        .bind(next.window_started_at)
        .bind(next.version)
        .bind(next.updated_at)
        .fetch_optional(&self.pool)
        .await
    }

    async fn consume_if_available(
        &self,
        account_id: Uuid,
        window_started_at: OffsetDateTime,
        cost: QuotaCost,
        now: OffsetDateTime,
    ) -> Result<Option<QuotaRecord>, sqlx::Error> {
        sqlx::query_as::<_, QuotaRecord>(
            r#"
            UPDATE quota_records
            SET requests_remaining = requests_remaining - $3,
                tokens_remaining = tokens_remaining - $4,
                total_requests = total_requests + $3,
                total_tokens = total_tokens + $4,
                version = version + 1,
                updated_at = $5
            WHERE account_id = $1
              AND window_started_at = $2
              AND requests_remaining >= $3
              AND tokens_remaining >= $4
            RETURNING account_id, request_limit, token_limit,
                      requests_remaining, tokens_remaining,
                      total_requests, total_tokens,
                      window_started_at, version, updated_at
            "#,
        )
        .bind(account_id)
        .bind(window_started_at)
        .bind(cost.requests())
        .bind(cost.tokens())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
