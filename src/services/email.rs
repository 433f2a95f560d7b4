use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::AppError;

/// リセットURLの配送経路
#[async_trait]
pub trait Mailer: Send + Sync {
    /// パスワードリセットメールを送信
    ///
    /// 失敗時は `AppError::Delivery` を返す
    async fn send_password_reset(&self, to: &str, reset_url: &str) -> Result<(), AppError>;
}

/// 開発環境用: 送信せずログ出力のみ
///
/// URL にはシークレットが含まれるため出力しない
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(&self, to: &str, _reset_url: &str) -> Result<(), AppError> {
        tracing::info!(to = %to, "パスワードリセットメール送信（開発モード）");
        Ok(())
    }
}

#[cfg(feature = "email")]
pub use smtp::SmtpMailer;

#[cfg(feature = "email")]
mod smtp {
    use async_trait::async_trait;
    use lettre::message::{Mailbox, header::ContentType};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    use super::Mailer;
    use crate::error::AppError;

    /// SMTP 経由のメール送信
    #[derive(Clone)]
    pub struct SmtpMailer {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
    }

    impl SmtpMailer {
        pub fn new(
            host: &str,
            port: u16,
            username: String,
            password: String,
            from_address: &str,
        ) -> Result<Self, AppError> {
            let from = from_address.parse::<Mailbox>().map_err(|e| {
                tracing::error!(error = ?e, "送信元アドレスが不正");
                AppError::Internal(anyhow::anyhow!("invalid smtp from address"))
            })?;

            let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| {
                    tracing::error!(error = ?e, host = %host, "SMTPトランスポートの初期化に失敗");
                    AppError::Internal(anyhow::anyhow!("smtp transport error"))
                })?
                .port(port)
                .credentials(Credentials::new(username, password))
                .build();

            Ok(Self { transport, from })
        }
    }

    #[async_trait]
    impl Mailer for SmtpMailer {
        async fn send_password_reset(&self, to: &str, reset_url: &str) -> Result<(), AppError> {
            let to = to
                .parse::<Mailbox>()
                .map_err(|e| AppError::Delivery(e.to_string()))?;

            let message = Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject("パスワード再設定のご案内")
                .header(ContentType::TEXT_PLAIN)
                .body(format!(
                    "以下のリンクからパスワードを再設定してください。\n\n{reset_url}\n\n\
                     心当たりがない場合はこのメールを破棄してください。"
                ))
                .map_err(|e| AppError::Delivery(e.to_string()))?;

            self.transport
                .send(message)
                .await
                .map_err(|e| AppError::Delivery(e.to_string()))?;

            Ok(())
        }
    }
}

/// 設定に応じた Mailer を構築
///
/// email 機能が有効かつ SMTP 設定が揃っている場合のみ SMTP を使う
pub fn build_mailer(config: &Config) -> Result<Arc<dyn Mailer>, AppError> {
    #[cfg(feature = "email")]
    if let (Some(host), Some(username), Some(password), Some(from)) = (
        &config.smtp_host,
        &config.smtp_username,
        &config.smtp_password,
        &config.smtp_from_address,
    ) {
        use secrecy::ExposeSecret;

        tracing::info!(host = %host, port = config.smtp_port, "SMTP メール送信を使用");
        return Ok(Arc::new(SmtpMailer::new(
            host,
            config.smtp_port,
            username.expose_secret().clone(),
            password.expose_secret().clone(),
            from,
        )?));
    }

    if config.smtp_configured() {
        tracing::warn!("SMTP 設定がありますが email 機能が無効です（ログ出力のみ）");
    } else {
        tracing::info!("SMTP 未設定（ログ出力のみ）");
    }
    Ok(Arc::new(LogMailer))
}
