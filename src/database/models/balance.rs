use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Billing mode of a company's quota: a running mission total, or a
/// monthly vehicle allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceType {
    PerMissions,
    PerVehiclesPerMonth,
}

impl BalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceType::PerMissions => "per_missions",
            BalanceType::PerVehiclesPerMonth => "per_vehicles_per_month",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "per_missions" => Some(BalanceType::PerMissions),
            "per_vehicles_per_month" => Some(BalanceType::PerVehiclesPerMonth),
            _ => None,
        }
    }
}

/// Consumable actions gated by the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceAction {
    MissionCreate,
    VehicleCreate,
}

/// At most one row per company. NULL numeric fields mean "unlimited".
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CompanyBalance {
    pub company_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub balance_type: String,
    pub total: Option<i32>,
    pub remaining: Option<i32>,
    pub monthly_limit: Option<i32>,
    pub period_start: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit of balance mutations, with the post-state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CompanyBalancePurchase {
    pub id: Uuid,
    pub company_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub balance_type: String,
    pub quantity: i32,
    pub created_by_id: Option<Uuid>,
    pub total_after: Option<i32>,
    pub remaining_after: Option<i32>,
    pub monthly_limit_after: Option<i32>,
    pub period_start_after: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_type_roundtrips_through_text() {
        for ty in [BalanceType::PerMissions, BalanceType::PerVehiclesPerMonth] {
            assert_eq!(BalanceType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(BalanceType::parse("per_everything"), None);
    }
}
