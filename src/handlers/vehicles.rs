use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::guard;
use crate::constants::permissions;
use crate::context::TenantSession;
use crate::database::models::balance::BalanceAction;
use crate::database::models::vehicle::Vehicle;
use crate::error::ApiError;
use crate::services::balance;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVehiclesQuery {
    #[serde(default)]
    pub branch_id: Option<Uuid>,
}

pub async fn list_vehicles(
    Extension(session): Extension<TenantSession>,
    Query(query): Query<ListVehiclesQuery>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::VEHICLES_READ])?;
    let branch_id = ctx.effective_branch_id(query.branch_id);

    let mut conn = session.db()?.lock().await;
    let vehicles: Vec<Vehicle> = sqlx::query_as(
        "SELECT * FROM vehicles
         WHERE deleted_at IS NULL
           AND ($1::uuid IS NULL OR branch_id = $1)
         ORDER BY created_at",
    )
    .bind(branch_id)
    .fetch_all(&mut **conn)
    .await?;

    Ok(Json(json!({ "success": true, "data": vehicles })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVehicleRequest {
    pub name: String,
    #[serde(default)]
    pub plate: Option<String>,
    #[serde(default)]
    pub branch_id: Option<Uuid>,
    #[serde(default)]
    pub driver_id: Option<Uuid>,
    /// Superadmin only: the tenant to create in.
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

pub async fn create_vehicle(
    Extension(session): Extension<TenantSession>,
    Json(body): Json<CreateVehicleRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::VEHICLES_CREATE])?;

    let company_id = match ctx.company_id {
        Some(company_id) => company_id,
        None if ctx.is_super_admin => body
            .company_id
            .ok_or_else(|| ApiError::bad_request("companyId is required for superadmins"))?,
        None => return Err(ApiError::unauthenticated("No tenant scope for this request")),
    };
    let branch_id = ctx.effective_branch_id(body.branch_id);

    let mut conn = session.db()?.lock().await;
    balance::consume(&mut conn, ctx, BalanceAction::VehicleCreate).await?;

    let vehicle: Vehicle = sqlx::query_as(
        "INSERT INTO vehicles (name, plate, company_id, branch_id, driver_id)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(&body.name)
    .bind(&body.plate)
    .bind(company_id)
    .bind(branch_id)
    .bind(body.driver_id)
    .fetch_one(&mut **conn)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": vehicle })),
    ))
}
