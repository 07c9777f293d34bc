//! Refresh-token service. The client-facing token is `<id>.<secret>`
//! where `id` is the row's UUID and `secret` is 128 random bits in hex;
//! only the bcrypt hash of the secret is stored. Tokens rotated within
//! one login lineage share a `family_id`, and presenting an
//! already-revoked token revokes the entire family.

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::config;
use crate::database::models::refresh_token::RefreshToken;

/// Which store the token's owner lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRef {
    Web(Uuid),
    Mobile(Uuid),
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshTokenError {
    /// A revoked token was presented again. The caller must COMMIT the
    /// family revocation even though the request itself fails.
    #[error("refresh token reuse detected")]
    ReuseDetected,
    #[error("invalid refresh token")]
    Invalid,
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug)]
pub struct IssuedToken {
    pub token: String,
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RotatedToken {
    pub token: String,
    pub user: UserRef,
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Create a new refresh token for the user, optionally continuing an
/// existing family.
pub async fn issue(
    conn: &mut PgConnection,
    user: UserRef,
    family_id: Option<Uuid>,
) -> Result<IssuedToken, RefreshTokenError> {
    let id = Uuid::new_v4();
    let secret = generate_secret();
    let token_hash = hash(&secret, DEFAULT_COST)?;
    let family_id = family_id.unwrap_or_else(Uuid::new_v4);
    let expires_at =
        Utc::now() + Duration::days(config::config().security.refresh_token_expiration_days);

    let (user_id, mobile_user_id) = match user {
        UserRef::Web(id) => (Some(id), None),
        UserRef::Mobile(id) => (None, Some(id)),
    };

    sqlx::query(
        "INSERT INTO refresh_tokens (id, user_id, mobile_user_id, token_hash, expires_at, family_id)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id)
    .bind(user_id)
    .bind(mobile_user_id)
    .bind(&token_hash)
    .bind(expires_at)
    .bind(family_id)
    .execute(&mut *conn)
    .await?;

    Ok(IssuedToken {
        token: format!("{}.{}", id, secret),
        family_id,
        expires_at,
    })
}

/// Exchange a valid refresh token for a fresh one in the same family,
/// revoking the presented token. A replayed (already revoked) token
/// revokes the whole family before failing.
pub async fn rotate(
    conn: &mut PgConnection,
    raw_token: &str,
) -> Result<RotatedToken, RefreshTokenError> {
    let (id, secret) = parse_token(raw_token).ok_or(RefreshTokenError::Invalid)?;

    let row: Option<RefreshToken> =
        sqlx::query_as("SELECT * FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    let row = row.ok_or(RefreshTokenError::Invalid)?;

    if row.is_revoked {
        revoke_family(conn, row.family_id).await?;
        return Err(RefreshTokenError::ReuseDetected);
    }
    if !verify(&secret, &row.token_hash).unwrap_or(false) {
        return Err(RefreshTokenError::Invalid);
    }
    if row.expires_at < Utc::now() {
        return Err(RefreshTokenError::Invalid);
    }

    sqlx::query("UPDATE refresh_tokens SET is_revoked = true WHERE id = $1")
        .bind(row.id)
        .execute(&mut *conn)
        .await?;

    let user = match (row.user_id, row.mobile_user_id) {
        (Some(id), None) => UserRef::Web(id),
        (None, Some(id)) => UserRef::Mobile(id),
        _ => return Err(RefreshTokenError::Invalid),
    };

    let issued = issue(conn, user, Some(row.family_id)).await?;
    Ok(RotatedToken {
        token: issued.token,
        user,
        family_id: row.family_id,
        expires_at: issued.expires_at,
    })
}

/// Best-effort revocation of a single token. Unparseable input and
/// unknown ids are ignored; calling twice is a no-op.
pub async fn revoke(conn: &mut PgConnection, raw_token: &str) -> Result<(), RefreshTokenError> {
    let Some((id, _)) = parse_token(raw_token) else {
        return Ok(());
    };
    sqlx::query("UPDATE refresh_tokens SET is_revoked = true WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Revoke every token in a family.
pub async fn revoke_family(
    conn: &mut PgConnection,
    family_id: Uuid,
) -> Result<(), RefreshTokenError> {
    sqlx::query("UPDATE refresh_tokens SET is_revoked = true WHERE family_id = $1")
        .bind(family_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// 128 random bits as lowercase hex.
fn generate_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Split `<uuid>.<secret>`; the secret must be at least 32 hex chars.
fn parse_token(raw: &str) -> Option<(Uuid, String)> {
    let (id_part, secret_part) = raw.split_once('.')?;
    let id = Uuid::parse_str(id_part).ok()?;
    let secret = secret_part.trim();
    if secret.len() < 32 || !secret.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some((id, secret.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_32_hex_chars() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn parses_well_formed_tokens() {
        let id = Uuid::new_v4();
        let secret = generate_secret();
        let (parsed_id, parsed_secret) = parse_token(&format!("{}.{}", id, secret)).unwrap();
        assert_eq!(parsed_id, id);
        assert_eq!(parsed_secret, secret);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(parse_token("no-separator").is_none());
        assert!(parse_token("not-a-uuid.deadbeefdeadbeefdeadbeefdeadbeef").is_none());
        let id = Uuid::new_v4();
        // Too short
        assert!(parse_token(&format!("{}.abcdef", id)).is_none());
        // Not hex
        assert!(parse_token(&format!("{}.{}", id, "zz".repeat(16))).is_none());
    }
}
