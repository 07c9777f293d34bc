use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Mobile-app actor identity. Unique by (company_id, username).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MobileUser {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    /// Ordered permission strings, granted at registration.
    pub permissions: Vec<String>,
    pub is_blocked: bool,
    pub is_super_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
