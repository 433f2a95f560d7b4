use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::AppError;

/// 契約プラン
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Premium,
}

impl SubscriptionTier {
    pub fn is_premium(self) -> bool {
        matches!(self, Self::Premium)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown subscription tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for SubscriptionTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// 1ウィンドウあたりの上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub requests: i64,
    pub tokens: i64,
}

/// プラン別の上限テーブル（設定から構築）
#[derive(Debug, Clone, Copy)]
pub struct TierLimitTable {
    pub free: TierLimits,
    pub premium: TierLimits,
}

impl TierLimitTable {
    pub fn limits_for(&self, tier: SubscriptionTier) -> TierLimits {
        match tier {
            SubscriptionTier::Free => self.free,
            SubscriptionTier::Premium => self.premium,
        }
    }
}

/// 1回の利用で消費するリクエスト数・トークン数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCost {
    requests: i64,
    tokens: i64,
}

impl QuotaCost {
    /// 負のコストは拒否
    pub fn new(requests: i64, tokens: i64) -> Result<Self, AppError> {
        if requests < 0 || tokens < 0 {
            return Err(AppError::Validation(
                "消費量は0以上で指定してください".to_string(),
            ));
        }
        Ok(Self { requests, tokens })
    }

    pub fn requests(&self) -> i64 {
        self.requests
    }

    pub fn tokens(&self) -> i64 {
        self.tokens
    }
}

/// 利用枠ウィンドウの状態
///
/// `Active(window) -> Expired -> Active(newWindow)` の遷移のみ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Active,
    Expired,
}

/// アカウントごとの利用枠レコード
///
/// 不変条件: `total_requests = request_limit - requests_remaining`（トークンも同様）
/// `version` は楽観的排他制御用で、更新のたびに加算される
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct QuotaRecord {
    pub account_id: Uuid,
    pub request_limit: i64,
    pub token_limit: i64,
    pub requests_remaining: i64,
    pub tokens_remaining: i64,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub window_started_at: OffsetDateTime,
    pub version: i64,
    pub updated_at: OffsetDateTime,
}

impl QuotaRecord {
    /// 初回利用時に作成されるレコード
    pub fn opened(account_id: Uuid, limits: TierLimits, now: OffsetDateTime) -> Self {
        Self {
            account_id,
            request_limit: limits.requests,
            token_limit: limits.tokens,
            requests_remaining: limits.requests,
            tokens_remaining: limits.tokens,
            total_requests: 0,
            total_tokens: 0,
            window_started_at: now,
            version: 0,
            updated_at: now,
        }
    }

    pub fn limits(&self) -> TierLimits {
        TierLimits {
            requests: self.request_limit,
            tokens: self.token_limit,
        }
    }

    /// `now - window_started_at >= window` で期限切れ
    pub fn window_state(&self, now: OffsetDateTime, window: Duration) -> WindowState {
        if now - self.window_started_at >= window {
            WindowState::Expired
        } else {
            WindowState::Active
        }
    }

    /// Expired -> Active(newWindow)
    pub fn rolled_over(&self, limits: TierLimits, now: OffsetDateTime) -> Self {
        Self {
            version: self.version + 1,
            ..Self::opened(self.account_id, limits, now)
        }
    }

    /// ウィンドウ途中でプランが変わった場合、消費済み分を維持したまま上限を差し替える
    pub fn rebased(&self, limits: TierLimits, now: OffsetDateTime) -> Self {
        Self {
            request_limit: limits.requests,
            token_limit: limits.tokens,
            requests_remaining: (limits.requests - self.total_requests).max(0),
            tokens_remaining: (limits.tokens - self.total_tokens).max(0),
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        }
    }

    /// 読み取り・消費の前に適用すべき遷移（なければ None）
    pub fn next_state(
        &self,
        limits: TierLimits,
        now: OffsetDateTime,
        window: Duration,
    ) -> Option<Self> {
        match self.window_state(now, window) {
            WindowState::Expired => Some(self.rolled_over(limits, now)),
            WindowState::Active if self.limits() != limits => Some(self.rebased(limits, now)),
            WindowState::Active => None,
        }
    }

    /// リクエスト数・トークン数の両方が足りるか
    pub fn can_afford(&self, cost: QuotaCost) -> bool {
        self.requests_remaining >= cost.requests() && self.tokens_remaining >= cost.tokens()
    }

    pub fn consumed(&self, cost: QuotaCost, now: OffsetDateTime) -> Self {
        Self {
            requests_remaining: self.requests_remaining - cost.requests(),
            tokens_remaining: self.tokens_remaining - cost.tokens(),
            total_requests: self.total_requests + cost.requests(),
            total_tokens: self.total_tokens + cost.tokens(),
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn status(&self, tier: SubscriptionTier) -> QuotaStatus {
        QuotaStatus {
            requests_remaining: self.requests_remaining,
            tokens_remaining: self.tokens_remaining,
            total_requests: self.total_requests,
            total_tokens: self.total_tokens,
            tokens_used: self.token_limit - self.tokens_remaining,
            last_reset: self.window_started_at,
            is_premium: tier.is_premium(),
        }
    }
}

/// 利用状況レスポンス
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub requests_remaining: i64,
    pub tokens_remaining: i64,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub tokens_used: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_reset: OffsetDateTime,
    pub is_premium: bool,
}
