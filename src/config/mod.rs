use once_cell::sync::Lazy;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub cookies: CookieConfig,
    pub optimizer: OptimizerConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max: u32,
    pub idle_timeout_ms: u64,
    pub connection_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    /// Access-token lifetime in milliseconds.
    pub jwt_expiration_ms: i64,
    pub refresh_token_expiration_days: i64,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub domain: Option<String>,
    pub same_site: String,
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub vroom_url: Option<String>,
    pub osrm_url: Option<String>,
    pub vroom_timeout_secs: u64,
    pub osrm_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SeedConfig {
    pub seed_super_admin: bool,
    pub username: String,
    pub password: String,
    pub email: Option<String>,
}

impl AppConfig {
    /// Build config from the process environment. Required variables are
    /// validated here so a misconfigured deployment dies at startup rather
    /// than at first request.
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        let database = DatabaseConfig {
            url: database_url_from_env(),
            pool_max: env_parse("DB_POOL_MAX", 10),
            idle_timeout_ms: env_parse("DB_POOL_IDLE_TIMEOUT_MS", 30_000),
            connection_timeout_ms: env_parse("DB_POOL_CONNECTION_TIMEOUT_MS", 2_000),
        };

        let security = SecurityConfig {
            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            jwt_expiration_ms: env_parse("JWT_EXPIRATION", 3_600_000),
            refresh_token_expiration_days: env_parse("REFRESH_TOKEN_EXPIRATION_DAYS", 30),
        };

        let cookies = CookieConfig {
            domain: env::var("COOKIE_DOMAIN").ok().filter(|d| !d.is_empty()),
            same_site: env::var("COOKIE_SAME_SITE").unwrap_or_else(|_| "Lax".to_string()),
            secure: environment == Environment::Production,
        };

        let optimizer = OptimizerConfig {
            vroom_url: env::var("VROOM_URL").ok().filter(|u| !u.is_empty()),
            osrm_url: env::var("OSRM_URL").ok().filter(|u| !u.is_empty()),
            vroom_timeout_secs: 30,
            osrm_timeout_secs: 15,
        };

        let seed = SeedConfig {
            seed_super_admin: env::var("SEED_SUPER_ADMIN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            username: env::var("SUPER_ADMIN_USERNAME").unwrap_or_else(|_| "superadmin".to_string()),
            password: env::var("SUPER_ADMIN_PASSWORD").unwrap_or_default(),
            email: env::var("SUPER_ADMIN_EMAIL").ok(),
        };

        Self {
            environment,
            database,
            security,
            cookies,
            optimizer,
            seed,
        }
    }
}

/// DATABASE_URL wins; otherwise the URL is assembled from DB_* parts.
fn database_url_from_env() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.is_empty() {
            return url;
        }
    }

    let host = env::var("DB_HOST").expect("DATABASE_URL or DB_HOST must be set");
    let port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
    let user = env::var("DB_USERNAME").expect("DB_USERNAME must be set");
    let password = env::var("DB_PASSWORD").unwrap_or_default();
    let database = env::var("DB_DATABASE").expect("DB_DATABASE must be set");

    if password.is_empty() {
        format!("postgres://{}@{}:{}/{}", user, host, port, database)
    } else {
        format!("postgres://{}:{}@{}:{}/{}", user, password, host, port, database)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("TEST_ENV_PARSE_KEY", "not-a-number");
        let v: u32 = env_parse("TEST_ENV_PARSE_KEY", 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn database_url_prefers_full_url() {
        std::env::set_var("DATABASE_URL", "postgres://u:p@localhost:5432/dispatch");
        assert_eq!(
            database_url_from_env(),
            "postgres://u:p@localhost:5432/dispatch"
        );
    }
}
