//! Credential login and session lifecycle (refresh rotation, logout).
//!
//! All lookups here run in short dedicated transactions under the
//! superadmin session bindings: the actor's home tenant is not known
//! until the row is found, so tenant-scoped bindings cannot apply yet.

use bcrypt::verify;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::auth::{generate_jwt, normalize_authorizations, ActorType, Claims, RoleClaim};
use crate::config;
use crate::constants;
use crate::database::models::{mobile_user::MobileUser, role::Role, web_user::WebUser};
use crate::database::rls;
use crate::error::ApiError;
use crate::services::refresh_tokens::{self, RefreshTokenError, UserRef};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorSummary {
    pub id: Uuid,
    pub username: String,
    pub actor_type: ActorType,
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub is_super_admin: bool,
    pub role_name: Option<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_in_ms: i64,
    pub refresh_expires_at: DateTime<Utc>,
    pub actor: ActorSummary,
}

/// Authenticate a username+password pair and mint a fresh session.
/// `company_id` is only meaningful for mobile actors, whose usernames are
/// unique per company rather than globally.
pub async fn login(
    pool: &PgPool,
    username: &str,
    password: &str,
    actor_type: ActorType,
    company_id: Option<Uuid>,
) -> Result<SessionTokens, ApiError> {
    let username = constants::normalize_username(username);

    let mut conn = pool.acquire().await?;
    rls::begin(&mut conn).await?;

    let result = match actor_type {
        ActorType::Web => login_web(&mut conn, &username, password).await,
        ActorType::Mobile => login_mobile(&mut conn, &username, password, company_id).await,
    };

    match result {
        Ok(tokens) => {
            rls::commit(&mut conn).await?;
            Ok(tokens)
        }
        Err(err) => {
            if let Err(rb) = rls::rollback(&mut conn).await {
                tracing::error!("rollback after failed login: {}", rb);
            }
            Err(err)
        }
    }
}

async fn login_web(
    conn: &mut PgConnection,
    username: &str,
    password: &str,
) -> Result<SessionTokens, ApiError> {
    rls::bind_superadmin(conn).await?;

    let user: Option<WebUser> =
        sqlx::query_as("SELECT * FROM web_users WHERE username = $1 AND deleted_at IS NULL")
            .bind(username)
            .fetch_optional(&mut *conn)
            .await?;
    let user = user.ok_or_else(|| ApiError::unauthenticated("Invalid credentials"))?;

    if !verify(password, &user.password_hash).unwrap_or(false) {
        return Err(ApiError::unauthenticated("Invalid credentials"));
    }

    let role = load_role(conn, user.role_id).await?;
    let claims = build_web_claims(&user, role.as_ref());
    mint_session(conn, claims, UserRef::Web(user.id)).await
}

async fn login_mobile(
    conn: &mut PgConnection,
    username: &str,
    password: &str,
    company_id: Option<Uuid>,
) -> Result<SessionTokens, ApiError> {
    rls::bind_superadmin(conn).await?;

    let mut users: Vec<MobileUser> = match company_id {
        Some(company_id) => {
            sqlx::query_as(
                "SELECT * FROM mobile_users
                 WHERE username = $1 AND company_id = $2 AND deleted_at IS NULL",
            )
            .bind(username)
            .bind(company_id)
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query_as("SELECT * FROM mobile_users WHERE username = $1 AND deleted_at IS NULL")
                .bind(username)
                .fetch_all(&mut *conn)
                .await?
        }
    };

    if users.len() > 1 {
        return Err(ApiError::bad_request(
            "Username exists in multiple companies; companyId is required",
        ));
    }
    let user = users
        .pop()
        .ok_or_else(|| ApiError::unauthenticated("Invalid credentials"))?;

    if !verify(password, &user.password_hash).unwrap_or(false) {
        return Err(ApiError::unauthenticated("Invalid credentials"));
    }
    if user.is_blocked {
        return Err(ApiError::unauthenticated("Account is blocked"));
    }

    let role = load_role(conn, user.role_id).await?;
    let claims = build_mobile_claims(&user, role.as_ref());
    mint_session(conn, claims, UserRef::Mobile(user.id)).await
}

/// Rotate a refresh token and mint a new access token for its owner.
///
/// A replayed token revokes its family; that revocation must survive the
/// failed request, so this is the one error path that COMMITs.
pub async fn refresh_session(pool: &PgPool, raw_token: &str) -> Result<SessionTokens, ApiError> {
    let mut conn = pool.acquire().await?;
    rls::begin(&mut conn).await?;
    if let Err(err) = rls::bind_superadmin(&mut conn).await {
        let _ = rls::rollback(&mut conn).await;
        return Err(err.into());
    }

    match refresh_tokens::rotate(&mut conn, raw_token).await {
        Err(RefreshTokenError::ReuseDetected) => {
            rls::commit(&mut conn).await?;
            Err(ApiError::unauthenticated(
                "Refresh token replayed; session family revoked",
            ))
        }
        Err(err) => {
            let _ = rls::rollback(&mut conn).await;
            Err(map_refresh_error(err))
        }
        Ok(rotated) => {
            let minted = async {
                let claims = claims_for_user(&mut conn, rotated.user).await?;
                let access_token =
                    generate_jwt(&claims).map_err(|e| ApiError::internal(e.to_string()))?;
                Ok::<_, ApiError>(SessionTokens {
                    access_token,
                    refresh_token: rotated.token,
                    access_expires_in_ms: config::config().security.jwt_expiration_ms,
                    refresh_expires_at: rotated.expires_at,
                    actor: summary_from_claims(&claims),
                })
            }
            .await;

            match minted {
                Ok(tokens) => {
                    rls::commit(&mut conn).await?;
                    Ok(tokens)
                }
                Err(err) => {
                    let _ = rls::rollback(&mut conn).await;
                    Err(err)
                }
            }
        }
    }
}

/// Best-effort logout: revoke the presented refresh token if it parses.
pub async fn logout(pool: &PgPool, raw_token: &str) -> Result<(), ApiError> {
    let mut conn = pool.acquire().await?;
    rls::begin(&mut conn).await?;
    match refresh_tokens::revoke(&mut conn, raw_token).await {
        Ok(()) => {
            rls::commit(&mut conn).await?;
            Ok(())
        }
        Err(err) => {
            let _ = rls::rollback(&mut conn).await;
            Err(map_refresh_error(err))
        }
    }
}

/// Reload the authoritative user row after a rotation and rebuild claims.
async fn claims_for_user(conn: &mut PgConnection, user: UserRef) -> Result<Claims, ApiError> {
    match user {
        UserRef::Web(id) => {
            let user: Option<WebUser> =
                sqlx::query_as("SELECT * FROM web_users WHERE id = $1 AND deleted_at IS NULL")
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;
            let user =
                user.ok_or_else(|| ApiError::unauthenticated("Account no longer exists"))?;
            let role = load_role(conn, user.role_id).await?;
            Ok(build_web_claims(&user, role.as_ref()))
        }
        UserRef::Mobile(id) => {
            let user: Option<MobileUser> =
                sqlx::query_as("SELECT * FROM mobile_users WHERE id = $1 AND deleted_at IS NULL")
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;
            let user =
                user.ok_or_else(|| ApiError::unauthenticated("Account no longer exists"))?;
            if user.is_blocked {
                return Err(ApiError::unauthenticated("Account is blocked"));
            }
            let role = load_role(conn, user.role_id).await?;
            Ok(build_mobile_claims(&user, role.as_ref()))
        }
    }
}

async fn load_role(
    conn: &mut PgConnection,
    role_id: Option<Uuid>,
) -> Result<Option<Role>, ApiError> {
    let Some(role_id) = role_id else {
        return Ok(None);
    };
    let role: Option<Role> =
        sqlx::query_as("SELECT * FROM roles WHERE id = $1 AND deleted_at IS NULL")
            .bind(role_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(role)
}

fn build_web_claims(user: &WebUser, role: Option<&Role>) -> Claims {
    let role_claim = role.map(|r| RoleClaim {
        name: r.name.clone(),
        authorizations: normalize_authorizations(r.authorizations.clone()),
    });
    Claims::new(
        user.id,
        user.username.clone(),
        ActorType::Web,
        user.company_id,
        user.branch_id,
        None,
        role_claim,
        user.is_super_admin,
    )
}

/// Mobile claims carry the user's own permission list; the role, when
/// present, only contributes its name.
fn build_mobile_claims(user: &MobileUser, role: Option<&Role>) -> Claims {
    let role_claim = Some(RoleClaim {
        name: role
            .map(|r| r.name.clone())
            .unwrap_or_else(|| "mobile".to_string()),
        authorizations: normalize_authorizations(user.permissions.clone()),
    });
    Claims::new(
        user.id,
        user.username.clone(),
        ActorType::Mobile,
        Some(user.company_id),
        user.branch_id,
        user.driver_id,
        role_claim,
        user.is_super_admin,
    )
}

async fn mint_session(
    conn: &mut PgConnection,
    claims: Claims,
    user: UserRef,
) -> Result<SessionTokens, ApiError> {
    let access_token = generate_jwt(&claims).map_err(|e| ApiError::internal(e.to_string()))?;
    let issued = refresh_tokens::issue(conn, user, None)
        .await
        .map_err(map_refresh_error)?;

    Ok(SessionTokens {
        access_token,
        refresh_token: issued.token,
        access_expires_in_ms: config::config().security.jwt_expiration_ms,
        refresh_expires_at: issued.expires_at,
        actor: summary_from_claims(&claims),
    })
}

fn summary_from_claims(claims: &Claims) -> ActorSummary {
    ActorSummary {
        id: claims.sub,
        username: claims.username.clone(),
        actor_type: claims.actor_type,
        company_id: claims.company_id,
        branch_id: claims.branch_id,
        is_super_admin: claims.is_super_admin,
        role_name: claims.role_name().map(str::to_string),
        permissions: claims.permissions(),
    }
}

fn map_refresh_error(err: RefreshTokenError) -> ApiError {
    match err {
        RefreshTokenError::ReuseDetected | RefreshTokenError::Invalid => {
            ApiError::unauthenticated("Invalid refresh token")
        }
        RefreshTokenError::Db(e) => e.into(),
        RefreshTokenError::Hash(e) => {
            tracing::error!("bcrypt failure: {}", e);
            ApiError::internal("An error occurred while processing your request")
        }
    }
}
