use axum::{Json, extract::State};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

// === リセットリクエスト ===

#[derive(Debug, Deserialize, Validate)]
pub struct ResetRequestRequest {
    #[garde(email)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/password/reset-request
///
/// # Security
/// アカウントの有無に関わらず200を返す（存在有無を漏洩しない）
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<ResetRequestRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    state.password_reset.request_reset(&request.email).await?;

    Ok(Json(MessageResponse {
        message: "パスワードリセット手順をメールで送信しました".to_string(),
    }))
}

// === パスワードリセット実行 ===

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[garde(custom(not_blank))]
    pub token: String,
    #[garde(length(chars, min = 8))]
    pub new_password: String,
}

fn not_blank(value: &str, _context: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("トークンは必須です"));
    }
    Ok(())
}

/// POST /api/password/reset
///
/// # Security
/// - token, new_password はログに出力しない
/// - 失敗理由（不在・期限切れ・使用済み）は区別しない
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    state
        .password_reset
        .reset_password(&request.token, &request.new_password)
        .await?;

    Ok(Json(MessageResponse {
        message: "パスワードが更新されました".to_string(),
    }))
}
