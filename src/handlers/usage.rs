use axum::{Json, extract::State};
use garde::Validate;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{QuotaCost, QuotaStatus};
use crate::session::AccountContext;
use crate::state::AppState;

/// 1回で消費できるリクエスト数の上限
const MAX_REQUEST_COST: i64 = 100;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    #[garde(range(min = 0, max = MAX_REQUEST_COST))]
    #[serde(default = "default_request_cost")]
    pub request_cost: i64,
    #[garde(range(min = 0))]
    pub token_cost: i64,
}

fn default_request_cost() -> i64 {
    1
}

/// GET /api/usage
///
/// 期限切れのウィンドウはここでリセットされる
pub async fn get_usage(
    State(state): State<AppState>,
    account: AccountContext,
) -> Result<Json<QuotaStatus>, AppError> {
    let status = state
        .quota_ledger
        .status(account.account_id, account.tier)
        .await?;

    Ok(Json(status))
}

/// POST /api/usage/consume
///
/// AI ツール呼び出しの前に利用枠を確保する。
/// 上限超過時は 429 と現在の利用状況を返す。
pub async fn consume_usage(
    State(state): State<AppState>,
    account: AccountContext,
    Json(request): Json<ConsumeRequest>,
) -> Result<Json<QuotaStatus>, AppError> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let cost = QuotaCost::new(request.request_cost, request.token_cost)?;

    let status = state
        .quota_ledger
        .try_consume(account.account_id, account.tier, cost)
        .await
        .inspect_err(|e| {
            if let AppError::QuotaExceeded(_) = e {
                tracing::info!(account_id = %account.account_id, "利用上限超過");
            }
        })?;

    tracing::info!(
        account_id = %account.account_id,
        request_cost = request.request_cost,
        token_cost = request.token_cost,
        requests_remaining = status.requests_remaining,
        "利用枠消費"
    );

    Ok(Json(status))
}
