//! Driver invites: admin-side create/revoke inside the tenant
//! transaction, and the public single-transaction mobile registration.

use bcrypt::{hash, DEFAULT_COST};
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::constants::{self, permissions};
use crate::context::RequestContext;
use crate::database::models::driver_invite::DriverInvite;
use crate::database::rls;
use crate::error::ApiError;

// No 0/O/1/I to keep codes readable over the phone.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;
const CODE_INSERT_ATTEMPTS: usize = 3;

const MIN_PASSWORD_LEN: usize = 8;

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Create a single-use invite binding a future mobile user to a driver.
/// Runs inside the caller's tenant transaction; RLS scopes the driver
/// lookup, so a foreign driver id simply reads as not found.
pub async fn create_invite(
    conn: &mut PgConnection,
    ctx: &RequestContext,
    driver_id: Uuid,
    branch_id: Option<Uuid>,
    role_id: Option<Uuid>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<DriverInvite, ApiError> {
    let company_id = ctx.require_company_id()?;
    let branch_id = ctx.effective_branch_id(branch_id);

    let driver: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM drivers WHERE id = $1 AND deleted_at IS NULL")
            .bind(driver_id)
            .fetch_optional(&mut *conn)
            .await?;
    if driver.is_none() {
        return Err(ApiError::not_found("Driver not found"));
    }

    let active: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM driver_invites WHERE driver_id = $1 AND used_at IS NULL")
            .bind(driver_id)
            .fetch_optional(&mut *conn)
            .await?;
    if active.is_some() {
        return Err(ApiError::conflict(
            "An active invite already exists for this driver",
        ));
    }

    // Retry on the (astronomically unlikely) global code collision.
    for attempt in 0..CODE_INSERT_ATTEMPTS {
        let code = generate_code();
        let inserted: Result<DriverInvite, sqlx::Error> = sqlx::query_as(
            "INSERT INTO driver_invites
                 (code, company_id, branch_id, driver_id, role_id, expires_at, created_by_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(&code)
        .bind(company_id)
        .bind(branch_id)
        .bind(driver_id)
        .bind(role_id)
        .bind(expires_at)
        .bind(ctx.user_id)
        .fetch_one(&mut *conn)
        .await;

        match inserted {
            Ok(invite) => return Ok(invite),
            Err(err) if is_unique_violation(&err) && attempt + 1 < CODE_INSERT_ATTEMPTS => {
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ApiError::internal("Could not allocate an invite code"))
}

/// Hard-delete an un-used invite.
pub async fn revoke_invite(
    conn: &mut PgConnection,
    _ctx: &RequestContext,
    invite_id: Uuid,
) -> Result<(), ApiError> {
    let result = sqlx::query("DELETE FROM driver_invites WHERE id = $1 AND used_at IS NULL")
        .bind(invite_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Invite not found"));
    }
    Ok(())
}

#[derive(Debug)]
pub struct RegisteredMobileUser {
    pub id: Uuid,
    pub username: String,
    pub company_id: Uuid,
}

/// Mobile self-registration through an invite code. One transaction, no
/// restricted role: there is no authenticated actor yet, so the bypass
/// session bindings stand in for it. All-or-nothing.
pub async fn register(
    pool: &PgPool,
    username: &str,
    password: &str,
    invite_code: &str,
) -> Result<RegisteredMobileUser, ApiError> {
    let username = constants::normalize_username(username);
    if username.is_empty() || constants::is_forbidden_username(&username) {
        return Err(ApiError::bad_request("Username is not allowed"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 8 characters"));
    }

    let mut conn = pool.acquire().await?;
    rls::begin(&mut conn).await?;

    match register_inner(&mut conn, &username, password, invite_code.trim()).await {
        Ok(user) => {
            rls::commit(&mut conn).await?;
            Ok(user)
        }
        Err(err) => {
            if let Err(rb) = rls::rollback(&mut conn).await {
                tracing::error!("rollback after failed registration: {}", rb);
            }
            Err(err)
        }
    }
}

async fn register_inner(
    conn: &mut PgConnection,
    username: &str,
    password: &str,
    invite_code: &str,
) -> Result<RegisteredMobileUser, ApiError> {
    rls::bind_superadmin(conn).await?;

    let invite: Option<DriverInvite> =
        sqlx::query_as("SELECT * FROM driver_invites WHERE code = $1 AND used_at IS NULL")
            .bind(invite_code)
            .fetch_optional(&mut *conn)
            .await?;
    let invite =
        invite.ok_or_else(|| ApiError::bad_request("Invite code is invalid or already used"))?;

    if let Some(expires_at) = invite.expires_at {
        if expires_at < Utc::now() {
            return Err(ApiError::bad_request("Invite code has expired"));
        }
    }

    let taken: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM mobile_users
         WHERE company_id = $1 AND username = $2 AND deleted_at IS NULL",
    )
    .bind(invite.company_id)
    .bind(username)
    .fetch_optional(&mut *conn)
    .await?;
    if taken.is_some() {
        return Err(ApiError::bad_request("Username is already taken"));
    }

    let password_hash = hash(password, DEFAULT_COST).map_err(|e| {
        tracing::error!("bcrypt failure: {}", e);
        ApiError::internal("An error occurred while processing your request")
    })?;

    let default_permissions: Vec<String> = permissions::DEFAULT_MOBILE
        .iter()
        .map(|p| p.to_string())
        .collect();

    let (user_id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO mobile_users
             (username, password_hash, company_id, branch_id, role_id, driver_id, permissions)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id",
    )
    .bind(username)
    .bind(&password_hash)
    .bind(invite.company_id)
    .bind(invite.branch_id)
    .bind(invite.role_id)
    .bind(invite.driver_id)
    .bind(&default_permissions)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query("UPDATE driver_invites SET used_at = now(), used_by_mobile_user_id = $1 WHERE id = $2")
        .bind(user_id)
        .bind(invite.id)
        .execute(&mut *conn)
        .await?;

    Ok(RegisteredMobileUser {
        id: user_id,
        username: username.to_string(),
        company_id: invite.company_id,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_the_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }
}
