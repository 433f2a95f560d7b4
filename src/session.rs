//! 上流の認証ゲートウェイから渡されるアカウント情報
//!
//! このサービス自体は認証を行わず、ゲートウェイが付与したヘッダーを信頼する。

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::SubscriptionTier;

pub const ACCOUNT_ID_HEADER: &str = "x-account-id";
pub const SUBSCRIPTION_TIER_HEADER: &str = "x-subscription-tier";

/// リクエスト元アカウントと契約プラン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountContext {
    pub account_id: Uuid,
    pub tier: SubscriptionTier,
}

impl<S> FromRequestParts<S> for AccountContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    /// プランヘッダーが無い場合は free として扱う
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let account_id = header_value(parts, ACCOUNT_ID_HEADER)
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                tracing::warn!("アカウントIDヘッダーが無いか不正");
                AppError::Unauthenticated
            })?;

        let tier = match header_value(parts, SUBSCRIPTION_TIER_HEADER) {
            Some(value) => value.parse::<SubscriptionTier>().map_err(|e| {
                tracing::warn!(error = %e, "契約プランヘッダーが不正");
                AppError::Unauthenticated
            })?,
            None => SubscriptionTier::Free,
        };

        Ok(Self { account_id, tier })
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<AccountContext, AppError> {
        let mut builder = Request::builder().uri("/api/usage");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        AccountContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_extracts_account_and_tier() {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let context = extract(&[
            (ACCOUNT_ID_HEADER, id_str.as_str()),
            (SUBSCRIPTION_TIER_HEADER, "premium"),
        ])
        .await
        .unwrap();
        assert_eq!(context.account_id, id);
        assert_eq!(context.tier, SubscriptionTier::Premium);
    }

    #[tokio::test]
    async fn test_missing_tier_defaults_to_free() {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let context = extract(&[(ACCOUNT_ID_HEADER, id_str.as_str())])
            .await
            .unwrap();
        assert_eq!(context.tier, SubscriptionTier::Free);
    }

    #[tokio::test]
    async fn test_missing_or_malformed_account_rejected() {
        assert!(matches!(extract(&[]).await, Err(AppError::Unauthenticated)));
        assert!(matches!(
            extract(&[(ACCOUNT_ID_HEADER, "not-a-uuid")]).await,
            Err(AppError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_unknown_tier_rejected() {
        let id_str = Uuid::new_v4().to_string();
        let result = extract(&[
            (ACCOUNT_ID_HEADER, id_str.as_str()),
            (SUBSCRIPTION_TIER_HEADER, "platinum"),
        ])
        .await;
        assert!(matches!(result, Err(AppError::Unauthenticated)));
    }
}
