//! Queue context bridge.
//!
//! Publishers serialize the ambient context (claims only, never the DB
//! handle) into the message envelope. Consumers re-establish an
//! equivalent transactional context before running the message handler:
//! fresh connection, BEGIN, restricted role, the same bind rules as the
//! HTTP pipeline. The envelope is trusted because the transport is
//! internal and authenticated.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::context::{ContextSnapshot, SharedConn, TenantSession};
use crate::database::rls;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEnvelope {
    pub context: ContextSnapshot,
    pub payload: Value,
}

impl ContextEnvelope {
    /// Publish-side: capture the session's context alongside the payload.
    pub fn wrap(session: &TenantSession, payload: Value) -> Self {
        Self {
            context: session.snapshot(),
            payload,
        }
    }
}

/// Consume-side: run `handler` inside a tenant transaction equivalent to
/// the one the publisher held. Commits when the handler succeeds, rolls
/// back when it fails.
pub async fn run_with_context<F, Fut, T>(
    pool: &PgPool,
    snapshot: ContextSnapshot,
    handler: F,
) -> Result<T, ApiError>
where
    F: FnOnce(TenantSession) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut conn = pool.acquire().await?;
    rls::begin(&mut conn).await?;

    let bound = async {
        rls::assume_restricted_role(&mut conn).await?;
        if snapshot.is_super_admin {
            rls::bind_superadmin(&mut conn).await?;
        } else {
            let company_id = snapshot
                .company_id
                .ok_or_else(|| ApiError::unauthenticated("Envelope carries no tenant scope"))?;
            rls::bind_company(&mut conn, company_id).await?;
        }
        Ok::<(), ApiError>(())
    }
    .await;

    if let Err(err) = bound {
        if let Err(rb) = rls::rollback(&mut conn).await {
            tracing::error!("rollback after failed consume bind: {}", rb);
        }
        return Err(err);
    }

    let shared: SharedConn = Arc::new(Mutex::new(conn));
    let session = TenantSession::new(snapshot.into_context(), shared.clone());

    let result = handler(session).await;

    {
        let mut conn = shared.lock().await;
        let finish = if result.is_ok() {
            rls::commit(&mut conn).await
        } else {
            rls::rollback(&mut conn).await
        };
        if let Err(err) = finish {
            tracing::error!("consume transaction teardown failed: {}", err);
            return Err(err.into());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ActorType;
    use crate::context::RequestContext;
    use uuid::Uuid;

    #[test]
    fn envelope_roundtrips_context_and_payload() {
        let context = RequestContext {
            user_id: Some(Uuid::new_v4()),
            actor_type: ActorType::Mobile,
            company_id: Some(Uuid::new_v4()),
            branch_id: None,
            is_super_admin: false,
            role_name: Some("mobile".to_string()),
            permissions: vec!["missions:read".to_string()],
        };
        let company_id = context.company_id;
        let session = TenantSession::detached(context);
        let envelope = ContextEnvelope::wrap(&session, serde_json::json!({"missionId": "abc"}));

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: ContextEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.context.company_id, company_id);
        assert_eq!(decoded.context.permissions, vec!["missions:read"]);
        assert_eq!(decoded.payload["missionId"], "abc");
    }
}
