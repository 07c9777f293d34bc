//! Branch management. Every company owns a `main` branch created at
//! registration; it cannot be deleted or renamed except by a superadmin.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::guard;
use crate::constants::{self, permissions};
use crate::context::TenantSession;
use crate::database::models::branch::Branch;
use crate::error::ApiError;

pub async fn list_branches(
    Extension(session): Extension<TenantSession>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::BRANCHES_MANAGE])?;

    let mut conn = session.db()?.lock().await;
    let branches: Vec<Branch> = sqlx::query_as(
        "SELECT * FROM branches WHERE deleted_at IS NULL ORDER BY created_at",
    )
    .fetch_all(&mut **conn)
    .await?;

    Ok(Json(json!({ "success": true, "data": branches })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBranchRequest {
    pub name: String,
    /// Superadmin only: the tenant to create in.
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

pub async fn create_branch(
    Extension(session): Extension<TenantSession>,
    Json(body): Json<CreateBranchRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::BRANCHES_MANAGE])?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Branch name is required"));
    }
    if constants::is_main_branch_name(name) && !ctx.is_super_admin {
        return Err(ApiError::bad_request("Branch name 'main' is reserved"));
    }

    let company_id = match ctx.company_id {
        Some(company_id) => company_id,
        None if ctx.is_super_admin => body
            .company_id
            .ok_or_else(|| ApiError::bad_request("companyId is required for superadmins"))?,
        None => return Err(ApiError::unauthenticated("No tenant scope for this request")),
    };

    let mut conn = session.db()?.lock().await;
    let branch: Branch = sqlx::query_as(
        "INSERT INTO branches (name, company_id) VALUES ($1, $2) RETURNING *",
    )
    .bind(name)
    .bind(company_id)
    .fetch_one(&mut **conn)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": branch })),
    ))
}

pub async fn delete_branch(
    Extension(session): Extension<TenantSession>,
    Path(branch_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::BRANCHES_MANAGE])?;

    let mut conn = session.db()?.lock().await;
    let branch: Option<Branch> =
        sqlx::query_as("SELECT * FROM branches WHERE id = $1 AND deleted_at IS NULL")
            .bind(branch_id)
            .fetch_optional(&mut **conn)
            .await?;
    let branch = branch.ok_or_else(|| ApiError::not_found("Branch not found"))?;

    if constants::is_main_branch_name(&branch.name) && !ctx.is_super_admin {
        return Err(ApiError::forbidden("The main branch cannot be deleted"));
    }

    sqlx::query("UPDATE branches SET deleted_at = now(), updated_at = now() WHERE id = $1")
        .bind(branch.id)
        .execute(&mut **conn)
        .await?;

    Ok(Json(json!({ "success": true })))
}
