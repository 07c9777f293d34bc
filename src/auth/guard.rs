//! Authorization guard. Each handler declares the permission set it
//! requires and calls [`require`] (or [`require_or_self`]) against the
//! request context before touching any data.

use uuid::Uuid;

use crate::auth::ActorType;
use crate::context::RequestContext;
use crate::error::ApiError;

/// Operations covered by the mobile self rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfOperation {
    ReadSelf,
    UpdateSelf,
}

/// Allow when the requirement is empty, the actor is a superadmin, or
/// every required permission is present. An unauthenticated context is
/// rejected as such rather than as forbidden.
pub fn require(ctx: &RequestContext, required: &[&str]) -> Result<(), ApiError> {
    if required.is_empty() || ctx.is_super_admin {
        return Ok(());
    }
    if ctx.user_id.is_none() {
        return Err(ApiError::unauthenticated("Authentication required"));
    }
    match required
        .iter()
        .find(|p| !ctx.permissions.iter().any(|have| have == *p))
    {
        None => Ok(()),
        Some(missing) => Err(ApiError::forbidden(format!(
            "Missing permission: {}",
            missing
        ))),
    }
}

/// Mobile actors operating on their own record ("read self" / "update
/// self") are allowed regardless of the declared permission set.
pub fn require_or_self(
    ctx: &RequestContext,
    required: &[&str],
    target_mobile_user_id: Uuid,
    _operation: SelfOperation,
) -> Result<(), ApiError> {
    if ctx.actor_type == ActorType::Mobile && ctx.user_id == Some(target_mobile_user_id) {
        return Ok(());
    }
    require(ctx, required)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(permissions: &[&str], is_super_admin: bool, actor_type: ActorType) -> RequestContext {
        RequestContext {
            user_id: Some(Uuid::new_v4()),
            actor_type,
            company_id: Some(Uuid::new_v4()),
            branch_id: None,
            is_super_admin,
            role_name: None,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn empty_requirement_allows_anyone() {
        assert!(require(&RequestContext::anonymous(), &[]).is_ok());
    }

    #[test]
    fn superadmin_bypasses_permission_check() {
        let context = ctx(&[], true, ActorType::Web);
        assert!(require(&context, &["missions:create"]).is_ok());
    }

    #[test]
    fn all_required_permissions_must_be_present() {
        let context = ctx(&["missions:read", "missions:create"], false, ActorType::Web);
        assert!(require(&context, &["missions:create"]).is_ok());
        let denied = require(&context, &["missions:create", "vehicles:create"]).unwrap_err();
        assert_eq!(denied.status_code(), 403);
    }

    #[test]
    fn anonymous_gets_unauthenticated_not_forbidden() {
        let err = require(&RequestContext::anonymous(), &["missions:read"]).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn mobile_self_access_skips_permissions() {
        let context = ctx(&[], false, ActorType::Mobile);
        let own_id = context.user_id.unwrap();
        assert!(require_or_self(&context, &["mobile:manage"], own_id, SelfOperation::ReadSelf).is_ok());

        let other = Uuid::new_v4();
        let denied =
            require_or_self(&context, &["mobile:manage"], other, SelfOperation::UpdateSelf);
        assert_eq!(denied.unwrap_err().status_code(), 403);
    }

    #[test]
    fn web_actor_cannot_use_self_rule() {
        let context = ctx(&[], false, ActorType::Web);
        let own_id = context.user_id.unwrap();
        let denied =
            require_or_self(&context, &["mobile:manage"], own_id, SelfOperation::ReadSelf);
        assert_eq!(denied.unwrap_err().status_code(), 403);
    }
}
