use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single-use ticket binding a new mobile user to a driver, company and
/// branch. `code` is globally unique; at most one un-used invite exists
/// per driver.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DriverInvite {
    pub id: Uuid,
    pub code: String,
    pub company_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub driver_id: Uuid,
    pub role_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by_mobile_user_id: Option<Uuid>,
    pub created_by_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
