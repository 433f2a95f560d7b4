use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::models::QuotaStatus;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("アカウント情報がありません")]
    Unauthenticated,

    #[error("バリデーションエラー: {0}")]
    Validation(String),

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),

    #[error("利用上限に達しました")]
    QuotaExceeded(QuotaStatus),

    /// 不在・期限切れ・使用済みを区別しない
    #[error("無効または期限切れのリンクです")]
    InvalidOrExpiredToken,

    #[error("メール送信エラー: {0}")]
    Delivery(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    quota: Option<QuotaStatus>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, quota) = match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "認証が必要です".to_string(),
                None,
            ),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                    None,
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                    None,
                )
            }
            Self::QuotaExceeded(status) => (
                StatusCode::TOO_MANY_REQUESTS,
                "利用上限に達しました。しばらくしてから再度お試しください".to_string(),
                Some(status),
            ),
            Self::InvalidOrExpiredToken => (
                StatusCode::BAD_REQUEST,
                "無効または期限切れのリンクです".to_string(),
                None,
            ),
            Self::Delivery(e) => {
                tracing::error!(error = %e, "メール送信エラー");
                (
                    StatusCode::BAD_GATEWAY,
                    "メールの送信に失敗しました".to_string(),
                    None,
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                quota,
            }),
        )
            .into_response()
    }
}
