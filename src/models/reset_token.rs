use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// パスワードリセットトークン
///
/// トークン自体はハッシュ化してDBに保存（token_digest）
/// 平文トークンはユーザーにメールで送信し、DBには保存しない
/// アカウントごとに最大1件
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ResetToken {
    pub account_id: Uuid,
    #[serde(skip)]
    pub token_digest: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl ResetToken {
    /// 有効期限内か
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}
