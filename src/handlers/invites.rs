use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::guard;
use crate::constants::permissions;
use crate::context::TenantSession;
use crate::error::ApiError;
use crate::services::invites;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInviteRequest {
    pub driver_id: Uuid,
    #[serde(default)]
    pub branch_id: Option<Uuid>,
    #[serde(default)]
    pub role_id: Option<Uuid>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn create_invite(
    Extension(session): Extension<TenantSession>,
    Json(body): Json<CreateInviteRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::INVITES_CREATE])?;

    let mut conn = session.db()?.lock().await;
    let invite = invites::create_invite(
        &mut conn,
        ctx,
        body.driver_id,
        body.branch_id,
        body.role_id,
        body.expires_at,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": invite })),
    ))
}

pub async fn revoke_invite(
    Extension(session): Extension<TenantSession>,
    Path(invite_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::INVITES_REVOKE])?;

    let mut conn = session.db()?.lock().await;
    invites::revoke_invite(&mut conn, ctx, invite_id).await?;

    Ok(Json(json!({ "success": true })))
}
