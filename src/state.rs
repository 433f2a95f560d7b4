use std::sync::Arc;

use crate::config::Config;
use crate::repositories::Stores;
use crate::services::{Mailer, PasswordResetService, QuotaLedger, TokenIssuer};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// 利用枠台帳
    pub quota_ledger: QuotaLedger,
    /// パスワードリセットサービス
    pub password_reset: PasswordResetService,
}

impl AppState {
    /// 新しい AppState を作成
    ///
    /// 設定値は各サービスへ取り込み済みで、State には保持しない。
    pub fn new(config: &Config, stores: Stores, mailer: Arc<dyn Mailer>) -> Self {
        let quota_ledger = QuotaLedger::new(
            stores.quotas.clone(),
            config.tier_limits(),
            config.quota_window(),
        );
        let token_issuer = TokenIssuer::new(stores.reset_tokens.clone());
        let password_reset = PasswordResetService::new(
            stores.accounts.clone(),
            token_issuer,
            mailer,
            config.password_reset_token_ttl(),
            config.password_reset_url_base.clone(),
        );

        Self {
            quota_ledger,
            password_reset,
        }
    }
}
