use axum::{extract::Extension, response::Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::guard;
use crate::constants::permissions;
use crate::context::TenantSession;
use crate::database::models::balance::BalanceType;
use crate::error::ApiError;
use crate::services::balance;

pub async fn get_balance(
    Extension(session): Extension<TenantSession>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::BALANCE_READ])?;
    let company_id = ctx.require_company_id()?;

    let mut conn = session.db()?.lock().await;
    let current = balance::ensure_balance_row(&mut conn, company_id).await?;

    Ok(Json(json!({ "success": true, "data": current })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    #[serde(rename = "type")]
    pub balance_type: BalanceType,
    pub quantity: i32,
}

pub async fn purchase(
    Extension(session): Extension<TenantSession>,
    Json(body): Json<PurchaseRequest>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::BALANCE_PURCHASE])?;

    let mut conn = session.db()?.lock().await;
    let (after, audit) =
        balance::purchase(&mut conn, ctx, body.balance_type, body.quantity).await?;

    Ok(Json(
        json!({ "success": true, "data": { "balance": after, "purchase": audit } }),
    ))
}
