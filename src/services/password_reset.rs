use std::sync::Arc;

use secrecy::ExposeSecret;
use time::Duration;

use crate::error::AppError;
use crate::repositories::AccountStore;
use crate::services::{Mailer, TokenIssuer, auth::hash_password};

const DEFAULT_RESET_URL_BASE: &str = "http://localhost:3000/password-reset";

/// パスワードリセットサービス
#[derive(Clone)]
pub struct PasswordResetService {
    accounts: Arc<dyn AccountStore>,
    issuer: TokenIssuer,
    mailer: Arc<dyn Mailer>,
    token_ttl: Duration,
    reset_url_base: Option<String>,
    hash_password: fn(&str) -> Result<String, AppError>,
}

impl PasswordResetService {
    /// 新しい PasswordResetService を作成
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        issuer: TokenIssuer,
        mailer: Arc<dyn Mailer>,
        token_ttl: Duration,
        reset_url_base: Option<String>,
    ) -> Self {
        Self {
            accounts,
            issuer,
            mailer,
            token_ttl,
            reset_url_base,
            hash_password,
        }
    }

    /// パスワードリセットをリクエスト
    ///
    /// # Security
    /// - アカウントが存在しない場合も常に成功を返す（情報漏洩防止）
    /// - トークン（平文）はログに出力しない
    /// - メール送信に失敗した場合はトークンを失効させる
    pub async fn request_reset(&self, email: &str) -> Result<(), AppError> {
        tracing::info!(email = %email, "パスワードリセットリクエスト");

        let Some(account) = self.accounts.find_by_email(email).await? else {
            tracing::info!(email = %email, "パスワードリセット: アカウント不在（成功レスポンス返却）");
            return Ok(());
        };

        let issued = self.issuer.issue(account.id, self.token_ttl).await?;
        let reset_url = self.build_reset_url(issued.secret.expose_secret());

        if let Err(e) = self
            .mailer
            .send_password_reset(&account.email, &reset_url)
            .await
        {
            tracing::warn!(account_id = %account.id, "メール送信失敗のためトークンを失効");
            self.issuer.revoke(account.id).await?;
            return Err(e);
        }

        tracing::info!(account_id = %account.id, "パスワードリセットメール送信完了");

        Ok(())
    }

    /// パスワードをリセット
    ///
    /// ハッシュ化に失敗してもリンクが無駄にならないよう、トークンの消費より先にハッシュを作る。
    ///
    /// # Security
    /// - トークン・新パスワードはログに出力しない
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        let password_hash = (self.hash_password)(new_password)?;
        let account_id = self.issuer.redeem(token).await?;

        self.accounts
            .update_password(account_id, &password_hash)
            .await?;

        tracing::info!(account_id = %account_id, "パスワードリセット完了");

        Ok(())
    }

    /// リセットURLを構築
    fn build_reset_url(&self, token: &str) -> String {
        let base = self
            .reset_url_base
            .as_deref()
            .unwrap_or(DEFAULT_RESET_URL_BASE);
        format!("{}?token={}", base, urlencoding::encode(token))
    }
}
