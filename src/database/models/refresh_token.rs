use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Server-side record of an opaque refresh token. Exactly one of
/// `user_id` / `mobile_user_id` is populated; rotated tokens of one login
/// lineage share a `family_id`.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub mobile_user_id: Option<Uuid>,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub family_id: Uuid,
    pub created_at: DateTime<Utc>,
}
