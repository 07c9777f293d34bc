use axum::{
    extract::State,
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use dispatch_api_rust::{database, handlers, middleware, services, state::AppState};

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let cfg = dispatch_api_rust::config::config();
    tracing::info!("Starting Dispatch API in {:?} mode", cfg.environment);

    let pool = database::init_pool()
        .await
        .expect("failed to initialize database pool");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("failed to run database migrations");

    database::rls::ensure_rls_role(&pool)
        .await
        .expect("failed to bootstrap the restricted database role");

    services::seed::seed_super_admin(&pool)
        .await
        .expect("failed to seed superadmin");

    let state = AppState::new(pool);
    let app = app(state);

    // Allow tests or deployments to override port via env
    let port = std::env::var("DISPATCH_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("Dispatch API listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

fn app(state: AppState) -> Router {
    // Every route in here runs inside the request context pipeline:
    // token verification, tenant transaction, RLS bindings, commit/rollback.
    let protected = Router::new()
        .route(
            "/api/missions",
            get(handlers::missions::list_missions).post(handlers::missions::create_mission),
        )
        .route("/api/missions/plan", post(handlers::missions::plan_routes))
        .route(
            "/api/vehicles",
            get(handlers::vehicles::list_vehicles).post(handlers::vehicles::create_vehicle),
        )
        .route(
            "/api/branches",
            get(handlers::branches::list_branches).post(handlers::branches::create_branch),
        )
        .route("/api/branches/:id", delete(handlers::branches::delete_branch))
        .route(
            "/api/drivers",
            get(handlers::drivers::list_drivers).post(handlers::drivers::create_driver),
        )
        .route("/api/invites", post(handlers::invites::create_invite))
        .route("/api/invites/:id", delete(handlers::invites::revoke_invite))
        .route("/api/balance", get(handlers::balance::get_balance))
        .route("/api/balance/purchase", post(handlers::balance::purchase))
        .route(
            "/api/mobile/me",
            get(handlers::mobile::get_me).patch(handlers::mobile::update_me),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::context::context_pipeline,
        ));

    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/register-company", post(handlers::auth::register_company))
        .route("/auth/mobile/register", post(handlers::auth::mobile_register))
        .merge(protected)
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> axum::response::Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": "Dispatch API",
            "version": version,
            "description": "Multi-tenant delivery routing backend",
            "endpoints": {
                "home": "/ (public)",
                "auth": "/auth/* (public - token acquisition)",
                "missions": "/api/missions (protected)",
                "vehicles": "/api/vehicles (protected)",
                "invites": "/api/invites (protected)",
                "balance": "/api/balance (protected)",
                "mobile": "/api/mobile/me (protected)",
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match database::health_check(&state.pool).await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
