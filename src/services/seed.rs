//! Startup superadmin seeding, gated by SEED_SUPER_ADMIN.

use bcrypt::{hash, DEFAULT_COST};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config;
use crate::constants;
use crate::database::rls;
use crate::error::ApiError;

/// Idempotent: an existing live user with the configured username is
/// left untouched.
pub async fn seed_super_admin(pool: &PgPool) -> Result<(), ApiError> {
    let cfg = &config::config().seed;
    if !cfg.seed_super_admin {
        return Ok(());
    }
    if cfg.password.is_empty() {
        tracing::warn!("SEED_SUPER_ADMIN is set but SUPER_ADMIN_PASSWORD is empty; skipping");
        return Ok(());
    }

    let username = constants::normalize_username(&cfg.username);
    let mut conn = pool.acquire().await?;
    rls::begin(&mut conn).await?;

    let result = async {
        rls::bind_superadmin(&mut conn).await?;

        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM web_users WHERE username = $1 AND deleted_at IS NULL")
                .bind(&username)
                .fetch_optional(&mut *conn)
                .await?;
        if existing.is_some() {
            return Ok::<bool, ApiError>(false);
        }

        let password_hash = hash(&cfg.password, DEFAULT_COST).map_err(|e| {
            tracing::error!("bcrypt failure: {}", e);
            ApiError::internal("Could not hash the superadmin password")
        })?;

        sqlx::query(
            "INSERT INTO web_users (username, password_hash, email, is_super_admin)
             VALUES ($1, $2, $3, true)",
        )
        .bind(&username)
        .bind(&password_hash)
        .bind(cfg.email.as_deref())
        .execute(&mut *conn)
        .await?;
        Ok(true)
    }
    .await;

    match result {
        Ok(created) => {
            rls::commit(&mut conn).await?;
            if created {
                tracing::info!("superadmin '{}' seeded", username);
            }
            Ok(())
        }
        Err(err) => {
            let _ = rls::rollback(&mut conn).await;
            Err(err)
        }
    }
}
