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
use crate::database::models::driver::Driver;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDriversQuery {
    #[serde(default)]
    pub branch_id: Option<Uuid>,
}

pub async fn list_drivers(
    Extension(session): Extension<TenantSession>,
    Query(query): Query<ListDriversQuery>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::DRIVERS_MANAGE])?;
    let branch_id = ctx.effective_branch_id(query.branch_id);

    let mut conn = session.db()?.lock().await;
    let drivers: Vec<Driver> = sqlx::query_as(
        "SELECT * FROM drivers
         WHERE deleted_at IS NULL
           AND ($1::uuid IS NULL OR branch_id = $1)
         ORDER BY created_at",
    )
    .bind(branch_id)
    .fetch_all(&mut **conn)
    .await?;

    Ok(Json(json!({ "success": true, "data": drivers })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDriverRequest {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub branch_id: Option<Uuid>,
    /// Superadmin only: the tenant to create in.
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

pub async fn create_driver(
    Extension(session): Extension<TenantSession>,
    Json(body): Json<CreateDriverRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::DRIVERS_MANAGE])?;

    let company_id = match ctx.company_id {
        Some(company_id) => company_id,
        None if ctx.is_super_admin => body
            .company_id
            .ok_or_else(|| ApiError::bad_request("companyId is required for superadmins"))?,
        None => return Err(ApiError::unauthenticated("No tenant scope for this request")),
    };
    let branch_id = ctx.effective_branch_id(body.branch_id);

    let mut conn = session.db()?.lock().await;
    let driver: Driver = sqlx::query_as(
        "INSERT INTO drivers (name, phone, company_id, branch_id)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(&body.name)
    .bind(&body.phone)
    .bind(company_id)
    .bind(branch_id)
    .fetch_one(&mut **conn)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": driver })),
    ))
}
