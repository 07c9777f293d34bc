//! Mission handlers. Reads rely on the row policies for company scoping;
//! the only narrowing applied here is date and the branch rule.

use axum::{
    extract::{Extension, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::guard;
use crate::constants::permissions;
use crate::context::TenantSession;
use crate::database::models::balance::BalanceAction;
use crate::database::models::mission::Mission;
use crate::database::models::vehicle::Vehicle;
use crate::error::ApiError;
use crate::services::balance;
use crate::services::optimizer::{OptimizerJob, OptimizerVehicle};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMissionsQuery {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub branch_id: Option<Uuid>,
}

pub async fn list_missions(
    Extension(session): Extension<TenantSession>,
    Query(query): Query<ListMissionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::MISSIONS_READ])?;
    let branch_id = ctx.effective_branch_id(query.branch_id);

    let mut conn = session.db()?.lock().await;
    let missions: Vec<Mission> = sqlx::query_as(
        "SELECT * FROM missions
         WHERE deleted_at IS NULL
           AND ($1::date IS NULL OR scheduled_date = $1)
           AND ($2::uuid IS NULL OR branch_id = $2)
         ORDER BY created_at",
    )
    .bind(query.date)
    .bind(branch_id)
    .fetch_all(&mut **conn)
    .await?;

    Ok(Json(json!({ "success": true, "data": missions })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMissionRequest {
    pub address: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub scheduled_date: NaiveDate,
    #[serde(default)]
    pub branch_id: Option<Uuid>,
    #[serde(default)]
    pub driver_id: Option<Uuid>,
    #[serde(default)]
    pub vehicle_id: Option<Uuid>,
    /// Superadmin only: the tenant to create in.
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

pub async fn create_mission(
    Extension(session): Extension<TenantSession>,
    Json(body): Json<CreateMissionRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::MISSIONS_CREATE])?;

    let company_id = match ctx.company_id {
        Some(company_id) => company_id,
        None if ctx.is_super_admin => body
            .company_id
            .ok_or_else(|| ApiError::bad_request("companyId is required for superadmins"))?,
        None => return Err(ApiError::unauthenticated("No tenant scope for this request")),
    };
    let branch_id = ctx.effective_branch_id(body.branch_id);

    let mut conn = session.db()?.lock().await;
    balance::consume(&mut conn, ctx, BalanceAction::MissionCreate).await?;

    let mission: Mission = sqlx::query_as(
        "INSERT INTO missions
             (address, latitude, longitude, scheduled_date, company_id, branch_id, driver_id, vehicle_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(&body.address)
    .bind(body.latitude)
    .bind(body.longitude)
    .bind(body.scheduled_date)
    .bind(company_id)
    .bind(branch_id)
    .bind(body.driver_id)
    .bind(body.vehicle_id)
    .fetch_one(&mut **conn)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": mission })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRoutesRequest {
    pub date: NaiveDate,
    #[serde(default)]
    pub branch_id: Option<Uuid>,
}

/// Plan tours for one day's missions. The optimizer call happens outside
/// the connection lock; its failure degrades to the greedy plan and the
/// request still succeeds.
pub async fn plan_routes(
    State(state): State<AppState>,
    Extension(session): Extension<TenantSession>,
    Json(body): Json<PlanRoutesRequest>,
) -> Result<Json<Value>, ApiError> {
    let ctx = session.context();
    guard::require(ctx, &[permissions::ROUTES_PLAN])?;
    let company_id = ctx.require_company_id()?;
    let branch_id = ctx.effective_branch_id(body.branch_id);

    let (missions, vehicles) = {
        let mut conn = session.db()?.lock().await;
        let missions: Vec<Mission> = sqlx::query_as(
            "SELECT * FROM missions
             WHERE deleted_at IS NULL
               AND scheduled_date = $1
               AND latitude IS NOT NULL AND longitude IS NOT NULL
               AND ($2::uuid IS NULL OR branch_id = $2)
             ORDER BY created_at",
        )
        .bind(body.date)
        .bind(branch_id)
        .fetch_all(&mut **conn)
        .await?;

        let vehicles: Vec<Vehicle> = sqlx::query_as(
            "SELECT * FROM vehicles
             WHERE deleted_at IS NULL
               AND ($1::uuid IS NULL OR branch_id = $1)
             ORDER BY created_at",
        )
        .bind(branch_id)
        .fetch_all(&mut **conn)
        .await?;

        (missions, vehicles)
    };

    if missions.is_empty() || vehicles.is_empty() {
        return Ok(Json(
            json!({ "success": true, "data": { "tours": [], "routes": [] } }),
        ));
    }

    let jobs: Vec<OptimizerJob> = missions
        .iter()
        .enumerate()
        .map(|(i, m)| OptimizerJob {
            id: i as i64,
            location: [m.longitude.unwrap_or_default(), m.latitude.unwrap_or_default()],
        })
        .collect();
    // No depot coordinates in the schema; tours start at the day's first stop.
    let start = jobs[0].location;
    let vehicle_payload: Vec<OptimizerVehicle> = vehicles
        .iter()
        .enumerate()
        .map(|(i, _)| OptimizerVehicle { id: i as i64, start })
        .collect();

    let tours = state.optimizer.plan(&jobs, &vehicle_payload).await;

    let mut planned = Vec::with_capacity(tours.len());
    let mut routes = Vec::new();
    for tour in tours {
        let vehicle = match vehicles.get(tour.vehicle_id as usize) {
            Some(vehicle) => vehicle,
            None => continue,
        };
        let ordered_missions: Vec<&Mission> = tour
            .job_order
            .iter()
            .filter_map(|job_id| missions.get(*job_id as usize))
            .collect();
        let coordinates: Vec<[f64; 2]> = ordered_missions
            .iter()
            .map(|m| [m.longitude.unwrap_or_default(), m.latitude.unwrap_or_default()])
            .collect();

        let geometry = state.optimizer.route_geometry(&coordinates).await;

        let mut conn = session.db()?.lock().await;
        let route: crate::database::models::route::Route = sqlx::query_as(
            "INSERT INTO routes (company_id, branch_id, vehicle_id, geometry, distance, duration)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(company_id)
        .bind(branch_id)
        .bind(vehicle.id)
        .bind(geometry.as_ref().map(|g| g.geometry.clone()))
        .bind(geometry.as_ref().map(|g| g.distance))
        .bind(geometry.as_ref().map(|g| g.duration))
        .fetch_one(&mut **conn)
        .await?;
        routes.push(route);

        planned.push(json!({
            "vehicleId": vehicle.id,
            "missionIds": ordered_missions.iter().map(|m| m.id).collect::<Vec<_>>(),
            "source": tour.source,
        }));
    }

    Ok(Json(
        json!({ "success": true, "data": { "tours": planned, "routes": routes } }),
    ))
}
