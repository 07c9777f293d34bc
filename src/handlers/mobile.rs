//! Mobile self endpoints. These exercise the guard's self rule: a mobile
//! actor may read and update its own record whatever its permission set.

use axum::{extract::Extension, response::Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::guard::{self, SelfOperation};
use crate::constants::permissions;
use crate::context::TenantSession;
use crate::database::models::mobile_user::MobileUser;
use crate::error::ApiError;

pub async fn get_me(
    Extension(session): Extension<TenantSession>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    let user_id = ctx
        .user_id
        .ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;
    guard::require_or_self(
        ctx,
        &[permissions::DRIVERS_MANAGE],
        user_id,
        SelfOperation::ReadSelf,
    )?;

    let mut conn = session.db()?.lock().await;
    let user: Option<MobileUser> =
        sqlx::query_as("SELECT * FROM mobile_users WHERE id = $1 AND deleted_at IS NULL")
            .bind(user_id)
            .fetch_optional(&mut **conn)
            .await?;
    let user = user.ok_or_else(|| ApiError::not_found("Account not found"))?;

    Ok(Json(json!({ "success": true, "data": user })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

pub async fn update_me(
    Extension(session): Extension<TenantSession>,
    Json(body): Json<UpdateMeRequest>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    let user_id = ctx
        .user_id
        .ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;
    guard::require_or_self(
        ctx,
        &[permissions::DRIVERS_MANAGE],
        user_id,
        SelfOperation::UpdateSelf,
    )?;

    let mut conn = session.db()?.lock().await;
    let user: Option<MobileUser> = sqlx::query_as(
        "UPDATE mobile_users
         SET email = COALESCE($2, email),
             phone = COALESCE($3, phone),
             address = COALESCE($4, address),
             updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL
         RETURNING *",
    )
    .bind(user_id)
    .bind(&body.email)
    .bind(&body.phone)
    .bind(&body.address)
    .fetch_optional(&mut **conn)
    .await?;
    let user = user.ok_or_else(|| ApiError::not_found("Account not found"))?;

    Ok(Json(json!({ "success": true, "data": user })))
}
