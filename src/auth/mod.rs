use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::config;

pub mod guard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Web,
    Mobile,
}

/// Role snapshot embedded in access tokens. `authorizations` may arrive
/// as an array or a comma-joined string; it is normalized to a trimmed,
/// order-preserving list at decode time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleClaim {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_authorizations")]
    pub authorizations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Authenticated actor id.
    pub sub: Uuid,
    pub username: String,
    pub actor_type: ActorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleClaim>,
    #[serde(default)]
    pub is_super_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sub: Uuid,
        username: String,
        actor_type: ActorType,
        company_id: Option<Uuid>,
        branch_id: Option<Uuid>,
        driver_id: Option<Uuid>,
        role: Option<RoleClaim>,
        is_super_admin: bool,
    ) -> Self {
        let now = Utc::now();
        let expiry_ms = config::config().security.jwt_expiration_ms;
        Self {
            sub,
            username,
            actor_type,
            company_id,
            branch_id,
            driver_id,
            role,
            is_super_admin,
            exp: now.timestamp() + expiry_ms / 1000,
            iat: now.timestamp(),
        }
    }

    pub fn role_name(&self) -> Option<&str> {
        self.role.as_ref().map(|r| r.name.as_str())
    }

    pub fn permissions(&self) -> Vec<String> {
        self.role
            .as_ref()
            .map(|r| r.authorizations.clone())
            .unwrap_or_default()
    }
}

fn deserialize_authorizations<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Many(Vec<String>),
        Joined(String),
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Repr::Many(items)) => normalize_authorizations(items),
        Some(Repr::Joined(joined)) => {
            normalize_authorizations(joined.split(',').map(str::to_string))
        }
    })
}

/// Trim entries, drop empties, keep original order.
pub fn normalize_authorizations<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Invalid JWT secret")]
    InvalidSecret,
}

pub fn generate_jwt(claims: &Claims) -> Result<String, JwtError> {
    generate_jwt_with_secret(claims, &config::config().security.jwt_secret)
}

pub fn verify_jwt(token: &str) -> Result<Claims, JwtError> {
    verify_jwt_with_secret(token, &config::config().security.jwt_secret)
}

fn generate_jwt_with_secret(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }
    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key)
        .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

fn verify_jwt_with_secret(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let token_data = decode::<Claims>(token, &decoding_key, &Validation::default())
        .map_err(|_| JwtError::InvalidToken)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn sample_claims() -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: Uuid::new_v4(),
            username: "dispatcher".to_string(),
            actor_type: ActorType::Web,
            company_id: Some(Uuid::new_v4()),
            branch_id: None,
            driver_id: None,
            role: Some(RoleClaim {
                name: "dispatcher".to_string(),
                authorizations: vec!["missions:read".to_string()],
            }),
            is_super_admin: false,
            exp: now + 3600,
            iat: now,
        }
    }

    #[test]
    fn jwt_roundtrip_preserves_claims() {
        let claims = sample_claims();
        let token = generate_jwt_with_secret(&claims, SECRET).unwrap();
        let decoded = verify_jwt_with_secret(&token, SECRET).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.company_id, claims.company_id);
        assert_eq!(decoded.permissions(), vec!["missions:read"]);
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let mut claims = sample_claims();
        let token = generate_jwt_with_secret(&claims, SECRET).unwrap();
        assert!(verify_jwt_with_secret(&token, "other-secret").is_err());

        claims.exp = Utc::now().timestamp() - 120;
        let expired = generate_jwt_with_secret(&claims, SECRET).unwrap();
        assert!(verify_jwt_with_secret(&expired, SECRET).is_err());
    }

    #[test]
    fn authorizations_accept_array_form() {
        let role: RoleClaim =
            serde_json::from_value(serde_json::json!({
                "name": "dispatcher",
                "authorizations": [" missions:read ", "", "vehicles:read"]
            }))
            .unwrap();
        assert_eq!(role.authorizations, vec!["missions:read", "vehicles:read"]);
    }

    #[test]
    fn authorizations_accept_comma_joined_form() {
        let role: RoleClaim =
            serde_json::from_value(serde_json::json!({
                "name": "dispatcher",
                "authorizations": "missions:read, vehicles:read,, routes:plan "
            }))
            .unwrap();
        assert_eq!(
            role.authorizations,
            vec!["missions:read", "vehicles:read", "routes:plan"]
        );
    }

    #[test]
    fn missing_authorizations_mean_empty() {
        let role: RoleClaim =
            serde_json::from_value(serde_json::json!({ "name": "dispatcher" })).unwrap();
        assert!(role.authorizations.is_empty());
    }
}
