//! Row-level-security plumbing: the restricted role bootstrap and the
//! transaction-scoped session variables the policies key on.
//!
//! Two variables drive the policies (see migrations/0002_rls.sql):
//! `app.is_superadmin` ('true'/'false', missing reads as 'false') and
//! `app.current_company_id` (uuid text, empty means no tenant). Both are
//! set with `set_config(..., true)` / `SET LOCAL`, so they die with the
//! transaction and a pooled connection can never leak them across
//! requests.

use sqlx::{Executor, PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

/// The non-privileged role every tenant transaction runs under. It has
/// plain DML on all tables and nothing that would bypass row policies.
pub const RESTRICTED_ROLE: &str = "app_rls";

const ENSURE_ROLE_SQL: &str = r#"
DO $$
BEGIN
    IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = 'app_rls') THEN
        CREATE ROLE app_rls NOLOGIN NOINHERIT;
    END IF;
    EXECUTE format('GRANT app_rls TO %I', current_user);
END
$$;
GRANT USAGE ON SCHEMA public TO app_rls;
GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA public TO app_rls;
GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA public TO app_rls;
ALTER DEFAULT PRIVILEGES IN SCHEMA public
    GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO app_rls;
ALTER DEFAULT PRIVILEGES IN SCHEMA public
    GRANT USAGE, SELECT ON SEQUENCES TO app_rls;
"#;

/// Idempotently ensure the restricted role exists with the right grants.
/// Runs at every startup, after migrations; fails loud if the connecting
/// user cannot grant.
pub async fn ensure_rls_role(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(ENSURE_ROLE_SQL).await?;
    info!("restricted role '{}' ensured", RESTRICTED_ROLE);
    Ok(())
}

pub async fn begin(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    conn.execute("BEGIN").await?;
    Ok(())
}

pub async fn commit(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    conn.execute("COMMIT").await?;
    Ok(())
}

pub async fn rollback(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    conn.execute("ROLLBACK").await?;
    Ok(())
}

/// Switch the current transaction to the restricted role. `SET LOCAL`
/// keeps the connection's original role once the transaction ends.
pub async fn assume_restricted_role(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    conn.execute("SET LOCAL ROLE app_rls").await?;
    Ok(())
}

/// Bind the transaction as superadmin: policies open up, no tenant scope.
pub async fn bind_superadmin(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        "SELECT set_config('app.is_superadmin', 'true', true),
                set_config('app.current_company_id', '', true)",
    )
    .execute(conn)
    .await?;
    Ok(())
}

/// Bind the transaction to one tenant: policies restrict every read and
/// write to this company.
pub async fn bind_company(conn: &mut PgConnection, company_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "SELECT set_config('app.is_superadmin', 'false', true),
                set_config('app.current_company_id', $1, true)",
    )
    .bind(company_id.to_string())
    .execute(conn)
    .await?;
    Ok(())
}
