use garde::Validate;
use secrecy::SecretBox;
use serde::Deserialize;
use time::Duration;

use crate::models::{TierLimitTable, TierLimits};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("環境変数の読み込みに失敗: {0}")]
    Env(#[from] envy::Error),

    #[error("設定値が不正: {0}")]
    Invalid(#[from] garde::Report),
}

#[derive(Debug, Deserialize, Validate)]
pub struct Config {
    #[garde(skip)]
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    #[garde(length(min = 1))]
    pub host: String,
    #[serde(default = "default_port")]
    #[garde(skip)]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    #[garde(range(min = 1))]
    pub database_max_connections: u32,

    // SMTP設定（オプション - email機能有効時のみ使用）
    #[serde(default)]
    #[garde(skip)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    #[garde(skip)]
    pub smtp_port: u16,
    #[garde(skip)]
    pub smtp_username: Option<SecretBox<String>>,
    #[garde(skip)]
    pub smtp_password: Option<SecretBox<String>>,
    #[serde(default)]
    #[garde(skip)]
    pub smtp_from_address: Option<String>,

    // パスワードリセット設定
    #[serde(default)]
    #[garde(skip)]
    pub password_reset_url_base: Option<String>,
    #[serde(default = "default_password_reset_token_ttl_secs")]
    #[garde(range(min = 1))]
    pub password_reset_token_ttl_secs: i64,

    // 利用枠設定
    // 上限が負だと残量が負になり、ウィンドウが0以下だと毎回リセットされて上限が効かない
    /// 利用枠ウィンドウの長さ（秒）
    #[serde(default = "default_quota_window_secs")]
    #[garde(range(min = 1))]
    pub quota_window_secs: i64,
    #[serde(default = "default_free_requests")]
    #[garde(range(min = 0))]
    pub quota_free_requests: i64,
    #[serde(default = "default_free_tokens")]
    #[garde(range(min = 0))]
    pub quota_free_tokens: i64,
    #[serde(default = "default_premium_requests")]
    #[garde(range(min = 0))]
    pub quota_premium_requests: i64,
    #[serde(default = "default_premium_tokens")]
    #[garde(range(min = 0))]
    pub quota_premium_tokens: i64,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS: i64 = 3600;
const DEFAULT_QUOTA_WINDOW_SECS: i64 = 3600;
const DEFAULT_FREE_REQUESTS: i64 = 10;
const DEFAULT_FREE_TOKENS: i64 = 100_000;
const DEFAULT_PREMIUM_REQUESTS: i64 = 100;
const DEFAULT_PREMIUM_TOKENS: i64 = 1_000_000;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_password_reset_token_ttl_secs() -> i64 {
    DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS
}

fn default_quota_window_secs() -> i64 {
    DEFAULT_QUOTA_WINDOW_SECS
}

fn default_free_requests() -> i64 {
    DEFAULT_FREE_REQUESTS
}

fn default_free_tokens() -> i64 {
    DEFAULT_FREE_TOKENS
}

fn default_premium_requests() -> i64 {
    DEFAULT_PREMIUM_REQUESTS
}

fn default_premium_tokens() -> i64 {
    DEFAULT_PREMIUM_TOKENS
}

impl Config {
    /// 環境変数から読み込み、値を検証する
    pub fn load() -> Result<Self, ConfigError> {
        Self::checked(envy::from_env()?)
    }

    /// 任意のキー・値の組から読み込む（キーは大文字小文字を区別しない）
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::checked(envy::from_iter(vars)?)
    }

    fn checked(config: Self) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(config)
    }

    /// プラン別の利用枠テーブル
    pub fn tier_limits(&self) -> TierLimitTable {
        TierLimitTable {
            free: TierLimits {
                requests: self.quota_free_requests,
                tokens: self.quota_free_tokens,
            },
            premium: TierLimits {
                requests: self.quota_premium_requests,
                tokens: self.quota_premium_tokens,
            },
        }
    }

    pub fn quota_window(&self) -> Duration {
        Duration::seconds(self.quota_window_secs)
    }

    pub fn password_reset_token_ttl(&self) -> Duration {
        Duration::seconds(self.password_reset_token_ttl_secs)
    }

    /// SMTP設定がすべて揃っているか
    pub fn smtp_configured(&self) -> bool {
        self.smtp_host.is_some()
            && self.smtp_username.is_some()
            && self.smtp_password.is_some()
            && self.smtp_from_address.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATABASE_URL: (&str, &str) = ("DATABASE_URL", "postgres://localhost/postdeck");

    fn load_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        Config::from_vars(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn test_defaults_applied() {
        let config = load_from(&[DATABASE_URL]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.quota_window(), Duration::hours(1));
        assert_eq!(config.password_reset_token_ttl(), Duration::hours(1));

        let limits = config.tier_limits();
        assert_eq!(limits.free.requests, 10);
        assert_eq!(limits.free.tokens, 100_000);
        assert_eq!(limits.premium.requests, 100);
        assert!(!config.smtp_configured());
    }

    #[test]
    fn test_quota_limits_overridden() {
        let config = load_from(&[
            DATABASE_URL,
            ("QUOTA_FREE_REQUESTS", "3"),
            ("QUOTA_PREMIUM_TOKENS", "42"),
            ("QUOTA_WINDOW_SECS", "60"),
        ])
        .unwrap();
        let limits = config.tier_limits();
        assert_eq!(limits.free.requests, 3);
        assert_eq!(limits.premium.tokens, 42);
        assert_eq!(config.quota_window(), Duration::minutes(1));
    }

    #[test]
    fn test_zero_limit_is_allowed() {
        let config = load_from(&[DATABASE_URL, ("QUOTA_FREE_TOKENS", "0")]).unwrap();
        assert_eq!(config.tier_limits().free.tokens, 0);
    }

    #[test]
    fn test_negative_limit_rejected() {
        for key in [
            "QUOTA_FREE_REQUESTS",
            "QUOTA_FREE_TOKENS",
            "QUOTA_PREMIUM_REQUESTS",
            "QUOTA_PREMIUM_TOKENS",
        ] {
            let result = load_from(&[DATABASE_URL, (key, "-5")]);
            assert!(
                matches!(result, Err(ConfigError::Invalid(_))),
                "{key} should be rejected"
            );
        }
    }

    #[test]
    fn test_non_positive_window_rejected() {
        for value in ["0", "-60"] {
            let result = load_from(&[DATABASE_URL, ("QUOTA_WINDOW_SECS", value)]);
            assert!(matches!(result, Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_non_positive_token_ttl_rejected() {
        let result = load_from(&[DATABASE_URL, ("PASSWORD_RESET_TOKEN_TTL_SECS", "0")]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_database_url_is_error() {
        let result = load_from(&[]);
        assert!(matches!(result, Err(ConfigError::Env(_))));
    }
}
