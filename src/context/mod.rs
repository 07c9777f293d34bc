//! Per-request tenant context.
//!
//! The pipeline middleware builds a [`TenantSession`] per request and
//! injects it as an axum extension; handlers and services receive it as an
//! explicit value. It carries the resolved actor attributes (taken from
//! the database at request start, not from the token) and the
//! transaction-bound connection for the request.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::ActorType;
use crate::constants::COMPANY_ADMIN_ROLE;
use crate::error::ApiError;

/// The request's single pooled connection. All SQL in one request is
/// serialized through this handle, inside one transaction.
pub type SharedConn = Arc<Mutex<PoolConnection<Postgres>>>;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: Option<Uuid>,
    pub actor_type: ActorType,
    /// Tenant scope. Present iff the actor is not a superadmin.
    pub company_id: Option<Uuid>,
    /// Actor's branch, resolved from the database, never from the token.
    pub branch_id: Option<Uuid>,
    pub is_super_admin: bool,
    pub role_name: Option<String>,
    pub permissions: Vec<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            actor_type: ActorType::Web,
            company_id: None,
            branch_id: None,
            is_super_admin: false,
            role_name: None,
            permissions: Vec::new(),
        }
    }

    pub fn is_company_admin(&self) -> bool {
        self.role_name.as_deref() == Some(COMPANY_ADMIN_ROLE)
    }

    pub fn require_company_id(&self) -> Result<Uuid, ApiError> {
        self.company_id
            .ok_or_else(|| ApiError::unauthenticated("No tenant scope for this request"))
    }

    /// Branch narrowing on top of company-level RLS: company admins and
    /// superadmins may select any branch via the query, everyone else is
    /// pinned to their own branch no matter what the query says.
    pub fn effective_branch_id(&self, query_branch_id: Option<Uuid>) -> Option<Uuid> {
        if self.is_super_admin || self.is_company_admin() {
            query_branch_id
        } else {
            self.branch_id
        }
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            user_id: self.user_id,
            actor_type: self.actor_type,
            company_id: self.company_id,
            branch_id: self.branch_id,
            is_super_admin: self.is_super_admin,
            role_name: self.role_name.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// Serializable form of the context, without the DB handle. This is what
/// crosses queue boundaries; the consumer re-establishes an equivalent
/// transactional context from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub user_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub is_super_admin: bool,
    pub role_name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl ContextSnapshot {
    pub fn into_context(self) -> RequestContext {
        RequestContext {
            user_id: self.user_id,
            actor_type: self.actor_type,
            company_id: self.company_id,
            branch_id: self.branch_id,
            is_super_admin: self.is_super_admin,
            role_name: self.role_name,
            permissions: self.permissions,
        }
    }
}

#[derive(Clone)]
pub struct TenantSession {
    context: Arc<RequestContext>,
    db: Option<SharedConn>,
}

impl TenantSession {
    pub fn new(context: RequestContext, db: SharedConn) -> Self {
        Self {
            context: Arc::new(context),
            db: Some(db),
        }
    }

    /// A session without a transaction (anonymous requests and claims that
    /// carry no tenant scope).
    pub fn detached(context: RequestContext) -> Self {
        Self {
            context: Arc::new(context),
            db: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::detached(RequestContext::anonymous())
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// The transaction-bound connection for this request.
    pub fn db(&self) -> Result<&SharedConn, ApiError> {
        self.db
            .as_ref()
            .ok_or_else(|| ApiError::unauthenticated("No tenant transaction for this request"))
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        self.context.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role_name: Option<&str>, is_super_admin: bool, branch: Option<Uuid>) -> RequestContext {
        RequestContext {
            user_id: Some(Uuid::new_v4()),
            actor_type: ActorType::Web,
            company_id: Some(Uuid::new_v4()),
            branch_id: branch,
            is_super_admin,
            role_name: role_name.map(str::to_string),
            permissions: Vec::new(),
        }
    }

    #[test]
    fn non_admin_is_pinned_to_own_branch() {
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();
        let context = ctx(Some("dispatcher"), false, Some(own));
        assert_eq!(context.effective_branch_id(Some(other)), Some(own));
        assert_eq!(context.effective_branch_id(None), Some(own));
    }

    #[test]
    fn company_admin_and_superadmin_may_pick_a_branch() {
        let other = Uuid::new_v4();
        let admin = ctx(Some(COMPANY_ADMIN_ROLE), false, Some(Uuid::new_v4()));
        assert_eq!(admin.effective_branch_id(Some(other)), Some(other));

        let superadmin = ctx(None, true, None);
        assert_eq!(superadmin.effective_branch_id(Some(other)), Some(other));
        assert_eq!(superadmin.effective_branch_id(None), None);
    }

    #[test]
    fn require_company_id_fails_without_tenant() {
        let anonymous = RequestContext::anonymous();
        assert!(anonymous.require_company_id().is_err());
    }

    #[test]
    fn snapshot_survives_serialization() {
        let context = ctx(Some("dispatcher"), false, Some(Uuid::new_v4()));
        let json = serde_json::to_string(&context.snapshot()).unwrap();
        let restored: ContextSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.company_id, context.company_id);
        assert_eq!(restored.branch_id, context.branch_id);
        assert_eq!(restored.role_name.as_deref(), Some("dispatcher"));
    }
}
