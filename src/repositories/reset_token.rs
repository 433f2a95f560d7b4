use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::ResetTokenStore;
use crate::models::ResetToken;

#[derive(Clone)]
pub struct PgResetTokenStore {
    pool: PgPool,
}

impl PgResetTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResetTokenStore for PgResetTokenStore {
    /// # Arguments
    /// * `account_id` - 対象アカウントのID
    /// * `token_digest` - トークンのSHA256ハッシュ
    /// * `expires_at` - 有効期限
    async fn upsert(
        &self,
        account_id: Uuid,
        token_digest: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<ResetToken, sqlx::Error> {
        sqlx::query_as::<_, ResetToken>(
            r#"
            INSERT INTO reset_tokens (account_id, token_digest, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id) DO UPDATE
            SET token_digest = EXCLUDED.token_digest,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
            RETURNING account_id, token_digest, expires_at, created_at
            "#,
        )
        .bind(account_id)
        .bind(token_digest)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    async fn take_live(
        &self,
        token_digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<ResetToken>, sqlx::Error> {
        sqlx::query_as::<_, ResetToken>(
            r#"
            DELETE FROM reset_tokens
            WHERE token_digest = $1 AND expires_at > $2
            RETURNING account_id, token_digest, expires_at, created_at
            "#,
        )
        .bind(token_digest)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_for_account(&self, account_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM reset_tokens
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
