use sqlx::PgPool;

use crate::services::optimizer::OptimizerClient;

/// Shared application state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub optimizer: OptimizerClient,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            optimizer: OptimizerClient::from_config(),
        }
    }
}
