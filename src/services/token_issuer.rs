use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::AppError;
use crate::repositories::ResetTokenStore;

/// シークレットのSHA256ハッシュ（16進小文字）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDigest(String);

impl TokenDigest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// シークレットをSHA256でハッシュ化
pub fn digest(secret: &str) -> TokenDigest {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    TokenDigest(format!("{:x}", hasher.finalize()))
}

/// 32バイトのランダムシークレットを生成
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 発行されたトークン
///
/// `secret` は配送経路（URL等）に埋め込むためだけに返され、保存されない
#[derive(Debug)]
pub struct IssuedToken {
    pub secret: SecretString,
    pub expires_at: OffsetDateTime,
}

/// 一回限り・期限付きトークンの発行と引き換え
///
/// # Security
/// - DBにはハッシュのみ保存する
/// - 不在・期限切れ・使用済みは区別せず `InvalidOrExpiredToken` を返す
#[derive(Clone)]
pub struct TokenIssuer {
    store: Arc<dyn ResetTokenStore>,
}

impl TokenIssuer {
    /// 新しい TokenIssuer を作成
    pub fn new(store: Arc<dyn ResetTokenStore>) -> Self {
        Self { store }
    }

    /// トークンを発行（既存のトークンは置き換えられる）
    pub async fn issue(&self, account_id: Uuid, ttl: Duration) -> Result<IssuedToken, AppError> {
        self.issue_at(account_id, ttl, OffsetDateTime::now_utc())
            .await
    }

    pub async fn issue_at(
        &self,
        account_id: Uuid,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<IssuedToken, AppError> {
        let secret = generate_secret();
        let token_digest = digest(&secret);
        let expires_at = now + ttl;

        self.store
            .upsert(account_id, token_digest.as_str(), expires_at, now)
            .await?;

        tracing::debug!(account_id = %account_id, expires_at = %expires_at, "リセットトークン発行");

        Ok(IssuedToken {
            secret: SecretString::from(secret),
            expires_at,
        })
    }

    /// トークンを引き換え、所有アカウントを返す（使用後は削除）
    pub async fn redeem(&self, secret: &str) -> Result<Uuid, AppError> {
        self.redeem_at(secret, OffsetDateTime::now_utc()).await
    }

    pub async fn redeem_at(&self, secret: &str, now: OffsetDateTime) -> Result<Uuid, AppError> {
        let token_digest = digest(secret);

        let token = self
            .store
            .take_live(token_digest.as_str(), now)
            .await?
            .ok_or(AppError::InvalidOrExpiredToken)?;

        tracing::debug!(account_id = %token.account_id, "リセットトークン使用");

        Ok(token.account_id)
    }

    /// アカウントのトークンを失効させる
    pub async fn revoke(&self, account_id: Uuid) -> Result<(), AppError> {
        let removed = self.store.delete_for_account(account_id).await?;
        tracing::debug!(account_id = %account_id, removed, "リセットトークン失効");
        Ok(())
    }
}
