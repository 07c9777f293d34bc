//! Per-tenant consumption gate. All mutations are single conditional
//! UPDATE statements inside the request transaction, so two concurrent
//! consumers can never both take the last unit.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::database::models::balance::{
    BalanceAction, BalanceType, CompanyBalance, CompanyBalancePurchase,
};
use crate::error::ApiError;

/// Lazily create the company's balance row. Defaults: `per_missions`
/// with every numeric field NULL, meaning unlimited.
pub async fn ensure_balance_row(
    conn: &mut PgConnection,
    company_id: Uuid,
) -> Result<CompanyBalance, ApiError> {
    sqlx::query("INSERT INTO company_balances (company_id) VALUES ($1) ON CONFLICT (company_id) DO NOTHING")
        .bind(company_id)
        .execute(&mut *conn)
        .await?;

    let balance: CompanyBalance =
        sqlx::query_as("SELECT * FROM company_balances WHERE company_id = $1")
            .bind(company_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(balance)
}

/// Consume one unit for the action, if the company's balance type gates
/// it. An action that does not match the current type is a no-op.
pub async fn consume(
    conn: &mut PgConnection,
    ctx: &RequestContext,
    action: BalanceAction,
) -> Result<(), ApiError> {
    if ctx.is_super_admin {
        return Ok(());
    }
    let company_id = ctx.require_company_id()?;

    let balance = ensure_balance_row(conn, company_id).await?;
    let balance_type = BalanceType::parse(&balance.balance_type)
        .ok_or_else(|| ApiError::internal("Unknown balance type"))?;

    match (action, balance_type) {
        (BalanceAction::MissionCreate, BalanceType::PerMissions) => {
            let result = sqlx::query(
                "UPDATE company_balances
                 SET remaining = CASE WHEN remaining IS NULL THEN NULL ELSE remaining - 1 END,
                     updated_at = now()
                 WHERE company_id = $1 AND type = 'per_missions'
                   AND (remaining IS NULL OR remaining > 0)",
            )
            .bind(company_id)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(ApiError::BalanceExceeded {
                    balance_type: BalanceType::PerMissions,
                });
            }
            Ok(())
        }
        (BalanceAction::VehicleCreate, BalanceType::PerVehiclesPerMonth) => {
            // Roll the period forward and reset the allowance in the same
            // statement that decrements, so rollover and consumption are
            // one atomic step.
            let result = sqlx::query(
                "UPDATE company_balances
                 SET period_start = CASE
                         WHEN monthly_limit IS NULL THEN period_start
                         WHEN period_start IS NULL OR period_start < date_trunc('month', now())::date
                             THEN date_trunc('month', now())::date
                         ELSE period_start
                     END,
                     remaining = CASE
                         WHEN monthly_limit IS NULL THEN remaining
                         WHEN period_start IS NULL OR period_start < date_trunc('month', now())::date
                             THEN monthly_limit - 1
                         ELSE remaining - 1
                     END,
                     updated_at = now()
                 WHERE company_id = $1 AND type = 'per_vehicles_per_month'
                   AND (
                     monthly_limit IS NULL
                     OR ((period_start IS NULL OR period_start < date_trunc('month', now())::date)
                         AND monthly_limit > 0)
                     OR (period_start >= date_trunc('month', now())::date AND remaining > 0)
                   )",
            )
            .bind(company_id)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(ApiError::BalanceExceeded {
                    balance_type: BalanceType::PerVehiclesPerMonth,
                });
            }
            Ok(())
        }
        // Action is not gated by the current balance type.
        _ => Ok(()),
    }
}

/// Admin top-up / plan switch. Always appends an audit row with the
/// post-state snapshot.
pub async fn purchase(
    conn: &mut PgConnection,
    ctx: &RequestContext,
    balance_type: BalanceType,
    quantity: i32,
) -> Result<(CompanyBalance, CompanyBalancePurchase), ApiError> {
    let company_id = ctx.require_company_id()?;
    if quantity <= 0 {
        return Err(ApiError::bad_request("Quantity must be positive"));
    }

    ensure_balance_row(conn, company_id).await?;

    match balance_type {
        BalanceType::PerMissions => {
            sqlx::query(
                "UPDATE company_balances
                 SET type = 'per_missions',
                     total = COALESCE(total, 0) + $2,
                     remaining = COALESCE(remaining, 0) + $2,
                     monthly_limit = NULL,
                     period_start = NULL,
                     updated_at = now()
                 WHERE company_id = $1",
            )
            .bind(company_id)
            .bind(quantity)
            .execute(&mut *conn)
            .await?;
        }
        BalanceType::PerVehiclesPerMonth => {
            sqlx::query(
                "UPDATE company_balances
                 SET type = 'per_vehicles_per_month',
                     monthly_limit = $2,
                     total = $2,
                     remaining = $2,
                     period_start = date_trunc('month', now())::date,
                     updated_at = now()
                 WHERE company_id = $1",
            )
            .bind(company_id)
            .bind(quantity)
            .execute(&mut *conn)
            .await?;
        }
    }

    let after: CompanyBalance =
        sqlx::query_as("SELECT * FROM company_balances WHERE company_id = $1")
            .bind(company_id)
            .fetch_one(&mut *conn)
            .await?;

    let audit: CompanyBalancePurchase = sqlx::query_as(
        "INSERT INTO company_balance_purchases
             (company_id, type, quantity, created_by_id,
              total_after, remaining_after, monthly_limit_after, period_start_after)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(company_id)
    .bind(balance_type.as_str())
    .bind(quantity)
    .bind(ctx.user_id)
    .bind(after.total)
    .bind(after.remaining)
    .bind(after.monthly_limit)
    .bind(after.period_start)
    .fetch_one(&mut *conn)
    .await?;

    Ok((after, audit))
}
