//! Public auth endpoints: credential login, refresh rotation, logout,
//! company registration and invite-based mobile registration.
//!
//! Web clients get both tokens as HttpOnly cookies; mobile clients get
//! them in the JSON body. These routes run outside the request context
//! pipeline and drive their own short transactions through the services.

use axum::{
    extract::State,
    http::header::SET_COOKIE,
    http::StatusCode,
    response::{AppendHeaders, IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::ActorType;
use crate::cookies;
use crate::error::ApiError;
use crate::services::{companies, invites, login};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub actor_type: Option<ActorType>,
    /// Mobile only: disambiguates usernames that exist in more than one
    /// company.
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCompanyRequest {
    pub company_name: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileRegisterRequest {
    pub username: String,
    pub password: String,
    pub invite_code: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let actor_type = body.actor_type.unwrap_or(ActorType::Web);
    let tokens = login::login(
        &state.pool,
        &body.username,
        &body.password,
        actor_type,
        body.company_id,
    )
    .await?;

    Ok(session_response(StatusCode::OK, tokens))
}

pub async fn refresh(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, ApiError> {
    let from_body = body.and_then(|Json(b)| b.refresh_token);
    let raw_token = from_body
        .or_else(|| cookies::read_cookie(&headers, cookies::REFRESH_TOKEN_COOKIE))
        .ok_or_else(|| ApiError::unauthenticated("No refresh token presented"))?;

    let tokens = login::refresh_session(&state.pool, &raw_token).await?;
    Ok(session_response(StatusCode::OK, tokens))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, ApiError> {
    let from_body = body.and_then(|Json(b)| b.refresh_token);
    if let Some(raw_token) =
        from_body.or_else(|| cookies::read_cookie(&headers, cookies::REFRESH_TOKEN_COOKIE))
    {
        login::logout(&state.pool, &raw_token).await?;
    }

    let [clear_access, clear_refresh] = cookies::clear_auth_cookies();
    Ok((
        StatusCode::OK,
        AppendHeaders([(SET_COOKIE, clear_access), (SET_COOKIE, clear_refresh)]),
        Json(json!({ "success": true })),
    )
        .into_response())
}

pub async fn register_company(
    State(state): State<AppState>,
    Json(body): Json<RegisterCompanyRequest>,
) -> Result<Response, ApiError> {
    let registration = companies::register_company(
        &state.pool,
        &body.company_name,
        &body.username,
        &body.password,
        body.email.as_deref(),
    )
    .await?;

    // Follow-up transaction: the fresh admin logs in like anyone else.
    let tokens = login::login(
        &state.pool,
        &registration.admin_username,
        &body.password,
        ActorType::Web,
        None,
    )
    .await?;

    Ok(session_response_with(
        StatusCode::CREATED,
        tokens,
        json!({ "company": registration.company }),
    ))
}

pub async fn mobile_register(
    State(state): State<AppState>,
    Json(body): Json<MobileRegisterRequest>,
) -> Result<Response, ApiError> {
    let registered =
        invites::register(&state.pool, &body.username, &body.password, &body.invite_code).await?;

    // Tokens are issued by the login path in a follow-up transaction.
    let tokens = login::login(
        &state.pool,
        &registered.username,
        &body.password,
        ActorType::Mobile,
        Some(registered.company_id),
    )
    .await?;

    Ok(session_response(StatusCode::CREATED, tokens))
}

fn session_response(status: StatusCode, tokens: login::SessionTokens) -> Response {
    session_response_with(status, tokens, json!({}))
}

/// Channel-dependent token delivery: cookies for web actors, body for
/// mobile actors.
fn session_response_with(
    status: StatusCode,
    tokens: login::SessionTokens,
    extra: serde_json::Value,
) -> Response {
    let is_web = tokens.actor.actor_type == ActorType::Web;

    let mut data = json!({
        "accessToken": tokens.access_token,
        "expiresIn": tokens.access_expires_in_ms,
        "user": tokens.actor,
    });
    if let (Some(data_map), Some(extra_map)) = (data.as_object_mut(), extra.as_object()) {
        for (key, value) in extra_map {
            data_map.insert(key.clone(), value.clone());
        }
    }
    if !is_web {
        data["refreshToken"] = json!(tokens.refresh_token);
    }

    let body = Json(json!({ "success": true, "data": data }));

    if is_web {
        let cfg = &crate::config::config().security;
        let access_cookie = cookies::auth_cookie(
            cookies::ACCESS_TOKEN_COOKIE,
            &tokens.access_token,
            cfg.jwt_expiration_ms,
        );
        let refresh_cookie = cookies::auth_cookie(
            cookies::REFRESH_TOKEN_COOKIE,
            &tokens.refresh_token,
            cfg.refresh_token_expiration_days * 86_400_000,
        );
        (
            status,
            AppendHeaders([(SET_COOKIE, access_cookie), (SET_COOKIE, refresh_cookie)]),
            body,
        )
            .into_response()
    } else {
        (status, body).into_response()
    }
}
