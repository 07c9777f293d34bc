//! Unauthenticated company registration: the only flow that creates a
//! tenant root. One bypass transaction creates the company, its `main`
//! branch, the `companyAdmin` role with the full permission catalogue,
//! and the first admin web user.

use bcrypt::{hash, DEFAULT_COST};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::constants::{self, permissions, COMPANY_ADMIN_ROLE, MAIN_BRANCH_NAME};
use crate::database::models::company::Company;
use crate::database::rls;
use crate::error::ApiError;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug)]
pub struct CompanyRegistration {
    pub company: Company,
    pub admin_user_id: Uuid,
    pub admin_username: String,
}

pub async fn register_company(
    pool: &PgPool,
    company_name: &str,
    admin_username: &str,
    admin_password: &str,
    admin_email: Option<&str>,
) -> Result<CompanyRegistration, ApiError> {
    let company_name = company_name.trim();
    if company_name.is_empty() {
        return Err(ApiError::bad_request("Company name is required"));
    }

    let admin_username = constants::normalize_username(admin_username);
    if admin_username.is_empty() || constants::is_forbidden_username(&admin_username) {
        return Err(ApiError::bad_request("Username is not allowed"));
    }
    if admin_password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 8 characters"));
    }

    let mut conn = pool.acquire().await?;
    rls::begin(&mut conn).await?;

    match register_inner(&mut conn, company_name, &admin_username, admin_password, admin_email)
        .await
    {
        Ok(registration) => {
            rls::commit(&mut conn).await?;
            tracing::info!(
                "company '{}' registered (id {})",
                registration.company.name,
                registration.company.id
            );
            Ok(registration)
        }
        Err(err) => {
            if let Err(rb) = rls::rollback(&mut conn).await {
                tracing::error!("rollback after failed company registration: {}", rb);
            }
            Err(err)
        }
    }
}

async fn register_inner(
    conn: &mut PgConnection,
    company_name: &str,
    admin_username: &str,
    admin_password: &str,
    admin_email: Option<&str>,
) -> Result<CompanyRegistration, ApiError> {
    rls::bind_superadmin(conn).await?;

    let taken: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM web_users WHERE username = $1 AND deleted_at IS NULL")
            .bind(admin_username)
            .fetch_optional(&mut *conn)
            .await?;
    if taken.is_some() {
        return Err(ApiError::bad_request("Username is already taken"));
    }

    let company: Company =
        sqlx::query_as("INSERT INTO companies (name) VALUES ($1) RETURNING *")
            .bind(company_name)
            .fetch_one(&mut *conn)
            .await?;

    let (branch_id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO branches (name, company_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(MAIN_BRANCH_NAME)
    .bind(company.id)
    .fetch_one(&mut *conn)
    .await?;

    let authorizations: Vec<String> = permissions::ALL.iter().map(|p| p.to_string()).collect();
    let (role_id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO roles (name, description, authorizations, company_id)
         VALUES ($1, $2, $3, $4)
         RETURNING id",
    )
    .bind(COMPANY_ADMIN_ROLE)
    .bind("Company administrator")
    .bind(&authorizations)
    .bind(company.id)
    .fetch_one(&mut *conn)
    .await?;

    let password_hash = hash(admin_password, DEFAULT_COST).map_err(|e| {
        tracing::error!("bcrypt failure: {}", e);
        ApiError::internal("An error occurred while processing your request")
    })?;

    let (admin_user_id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO web_users (username, password_hash, email, company_id, branch_id, role_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id",
    )
    .bind(admin_username)
    .bind(&password_hash)
    .bind(admin_email)
    .bind(company.id)
    .bind(branch_id)
    .bind(role_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(CompanyRegistration {
        company,
        admin_user_id,
        admin_username: admin_username.to_string(),
    })
}
