//! The request context pipeline. Every request passes through here:
//!
//! verify token → decide txn/no-txn → acquire one pooled connection →
//! BEGIN → SET LOCAL ROLE → refresh the actor from the database → bind
//! the RLS session variables → install the session → run the handler →
//! COMMIT on a success response, ROLLBACK otherwise.
//!
//! The refresh phase is what stops stale-claim escalation: a user whose
//! superadmin bit was dropped, whose company changed, whose role lost a
//! permission, or who was soft-deleted loses that power on the very next
//! request, whatever the token still says.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sqlx::PgConnection;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{normalize_authorizations, ActorType, Claims};
use crate::context::{RequestContext, SharedConn, TenantSession};
use crate::database::rls;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn context_pipeline(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let claims = match super::auth::authenticate(request.headers()) {
        Ok(claims) => claims,
        Err(err) => return err.into_response(),
    };

    let claims = match claims {
        Some(claims) => claims,
        None => {
            // Anonymous: no transaction, guards reject later if needed.
            request.extensions_mut().insert(TenantSession::anonymous());
            return next.run(request).await;
        }
    };

    if !claims.is_super_admin && claims.company_id.is_none() {
        // Claims carry no tenant scope: run without a transaction.
        let session = TenantSession::detached(context_from_claims(&claims));
        request.extensions_mut().insert(session);
        return next.run(request).await;
    }

    let mut conn = match state.pool.acquire().await {
        Ok(conn) => conn,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let context = match open_tenant_transaction(&mut conn, &claims).await {
        Ok(context) => context,
        Err(err) => {
            if let Err(rb) = rls::rollback(&mut conn).await {
                tracing::error!("rollback after failed context setup: {}", rb);
            }
            return err.into_response();
        }
    };

    let shared: SharedConn = Arc::new(Mutex::new(conn));
    request
        .extensions_mut()
        .insert(TenantSession::new(context, shared.clone()));

    let response = next.run(request).await;

    // Exactly one of COMMIT/ROLLBACK before the connection goes back to
    // the pool, keyed off the response outcome.
    let failed = response.status().is_client_error() || response.status().is_server_error();
    {
        let mut conn = shared.lock().await;
        let finish = if failed {
            rls::rollback(&mut conn).await
        } else {
            rls::commit(&mut conn).await
        };
        if let Err(err) = finish {
            tracing::error!(
                "transaction teardown failed ({}): {}",
                if failed { "rollback" } else { "commit" },
                err
            );
        }
    }

    response
}

/// Context for requests that never open a transaction; attributes come
/// straight from the verified claims.
fn context_from_claims(claims: &Claims) -> RequestContext {
    RequestContext {
        user_id: Some(claims.sub),
        actor_type: claims.actor_type,
        company_id: claims.company_id,
        branch_id: claims.branch_id,
        is_super_admin: claims.is_super_admin,
        role_name: claims.role_name().map(str::to_string),
        permissions: claims.permissions(),
    }
}

struct ActorRefresh {
    company_id: Option<Uuid>,
    branch_id: Option<Uuid>,
    is_super_admin: bool,
    role_name: Option<String>,
    permissions: Vec<String>,
}

async fn open_tenant_transaction(
    conn: &mut PgConnection,
    claims: &Claims,
) -> Result<RequestContext, ApiError> {
    rls::begin(conn).await?;
    rls::assume_restricted_role(conn).await?;

    // Refresh phase: read the authoritative actor row under superadmin
    // bindings, since the actor's home tenant is not trusted yet.
    rls::bind_superadmin(conn).await?;
    let refreshed = refresh_actor(conn, claims).await?;

    // Bind phase: scope the rest of the transaction to the effective
    // tenant, or open it up for an effective superadmin.
    if refreshed.is_super_admin {
        rls::bind_superadmin(conn).await?;
    } else {
        let company_id = refreshed
            .company_id
            .ok_or_else(|| ApiError::unauthenticated("Account has no tenant scope"))?;
        rls::bind_company(conn, company_id).await?;
    }

    Ok(RequestContext {
        user_id: Some(claims.sub),
        actor_type: claims.actor_type,
        company_id: if refreshed.is_super_admin {
            None
        } else {
            refreshed.company_id
        },
        branch_id: refreshed.branch_id,
        is_super_admin: refreshed.is_super_admin,
        role_name: refreshed.role_name,
        permissions: refreshed.permissions,
    })
}

/// Load the actor's effective attributes from the database, including
/// the current role name and permission set. The token's copies are
/// ignored from here on, so a permission edit takes effect on the next
/// request rather than at token expiry.
async fn refresh_actor(
    conn: &mut PgConnection,
    claims: &Claims,
) -> Result<ActorRefresh, ApiError> {
    match claims.actor_type {
        ActorType::Web => {
            let row: Option<(Option<Uuid>, Option<Uuid>, bool, Option<String>, Option<Vec<String>>)> =
                sqlx::query_as(
                    "SELECT u.company_id, u.branch_id, u.is_super_admin, r.name, r.authorizations
                     FROM web_users u
                     LEFT JOIN roles r ON r.id = u.role_id AND r.deleted_at IS NULL
                     WHERE u.id = $1 AND u.deleted_at IS NULL",
                )
                .bind(claims.sub)
                .fetch_optional(&mut *conn)
                .await?;

            let (company_id, branch_id, is_super_admin, role_name, authorizations) =
                row.ok_or_else(|| ApiError::unauthenticated("Account no longer exists"))?;
            Ok(ActorRefresh {
                company_id,
                branch_id,
                is_super_admin,
                role_name,
                permissions: normalize_authorizations(authorizations.unwrap_or_default()),
            })
        }
        ActorType::Mobile => {
            let row: Option<(Uuid, Option<Uuid>, bool, bool, Vec<String>, Option<String>)> =
                sqlx::query_as(
                    "SELECT u.company_id, u.branch_id, u.is_super_admin, u.is_blocked,
                            u.permissions, r.name
                     FROM mobile_users u
                     LEFT JOIN roles r ON r.id = u.role_id AND r.deleted_at IS NULL
                     WHERE u.id = $1 AND u.deleted_at IS NULL",
                )
                .bind(claims.sub)
                .fetch_optional(&mut *conn)
                .await?;

            let (company_id, branch_id, is_super_admin, is_blocked, permissions, role_name) =
                row.ok_or_else(|| ApiError::unauthenticated("Account no longer exists"))?;
            if is_blocked {
                return Err(ApiError::unauthenticated("Account is blocked"));
            }
            Ok(ActorRefresh {
                company_id: Some(company_id),
                branch_id,
                is_super_admin,
                role_name: role_name.or_else(|| Some("mobile".to_string())),
                permissions: normalize_authorizations(permissions),
            })
        }
    }
}
