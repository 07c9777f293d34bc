//! Outbound route-optimizer client. VROOM plans tours (30 s deadline),
//! OSRM fetches driving geometry (15 s deadline). Either failing is
//! non-fatal to the request: planning falls back to a greedy
//! nearest-neighbour tour, geometry is simply omitted.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::config;

#[derive(Clone)]
pub struct OptimizerClient {
    http: Client,
    vroom_url: Option<String>,
    osrm_url: Option<String>,
    vroom_timeout: Duration,
    osrm_timeout: Duration,
}

/// A stop to visit; `location` is `[lon, lat]` as VROOM expects.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerJob {
    pub id: i64,
    pub location: [f64; 2],
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizerVehicle {
    pub id: i64,
    pub start: [f64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Optimizer,
    GreedyFallback,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTour {
    pub vehicle_id: i64,
    pub job_order: Vec<i64>,
    pub source: PlanSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteGeometry {
    pub geometry: String,
    pub distance: f64,
    pub duration: f64,
}

#[derive(Debug, thiserror::Error)]
enum OptimizerError {
    #[error("VROOM_URL not configured")]
    NotConfigured,
    #[error("optimizer returned status {0}")]
    Status(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct VroomResponse {
    #[serde(default)]
    routes: Vec<VroomRoute>,
}

#[derive(Deserialize)]
struct VroomRoute {
    vehicle: i64,
    #[serde(default)]
    steps: Vec<VroomStep>,
}

#[derive(Deserialize)]
struct VroomStep {
    #[serde(rename = "type")]
    kind: String,
    id: Option<i64>,
}

#[derive(Deserialize)]
struct OsrmResponse {
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    geometry: String,
    distance: f64,
    duration: f64,
}

impl OptimizerClient {
    pub fn from_config() -> Self {
        let cfg = &config::config().optimizer;
        Self {
            http: Client::new(),
            vroom_url: cfg.vroom_url.clone(),
            osrm_url: cfg.osrm_url.clone(),
            vroom_timeout: Duration::from_secs(cfg.vroom_timeout_secs),
            osrm_timeout: Duration::from_secs(cfg.osrm_timeout_secs),
        }
    }

    /// Plan tours for the given jobs and vehicles. Never fails: any
    /// optimizer problem degrades to the greedy plan.
    pub async fn plan(
        &self,
        jobs: &[OptimizerJob],
        vehicles: &[OptimizerVehicle],
    ) -> Vec<PlannedTour> {
        if jobs.is_empty() || vehicles.is_empty() {
            return Vec::new();
        }
        match self.try_vroom(jobs, vehicles).await {
            Ok(tours) => tours,
            Err(err) => {
                warn!("optimizer unavailable, using greedy plan: {}", err);
                greedy_plan(jobs, vehicles)
            }
        }
    }

    async fn try_vroom(
        &self,
        jobs: &[OptimizerJob],
        vehicles: &[OptimizerVehicle],
    ) -> Result<Vec<PlannedTour>, OptimizerError> {
        let url = self.vroom_url.as_ref().ok_or(OptimizerError::NotConfigured)?;

        let body = json!({
            "jobs": jobs,
            "vehicles": vehicles,
            "options": { "g": true },
        });

        let response = self
            .http
            .post(url)
            .timeout(self.vroom_timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OptimizerError::Status(response.status()));
        }

        let parsed: VroomResponse = response.json().await?;
        Ok(parsed
            .routes
            .into_iter()
            .map(|route| PlannedTour {
                vehicle_id: route.vehicle,
                job_order: route
                    .steps
                    .into_iter()
                    .filter(|s| s.kind == "job")
                    .filter_map(|s| s.id)
                    .collect(),
                source: PlanSource::Optimizer,
            })
            .collect())
    }

    /// Driving geometry between ordered coordinates. `None` on any
    /// failure; callers log nothing extra and carry on without geometry.
    pub async fn route_geometry(&self, coordinates: &[[f64; 2]]) -> Option<RouteGeometry> {
        let base = self.osrm_url.as_ref()?;
        if coordinates.len() < 2 {
            return None;
        }

        let path: Vec<String> = coordinates
            .iter()
            .map(|c| format!("{},{}", c[0], c[1]))
            .collect();
        let url = format!(
            "{}/route/v1/driving/{}?overview=full",
            base.trim_end_matches('/'),
            path.join(";")
        );

        let result = async {
            let response = self
                .http
                .get(&url)
                .timeout(self.osrm_timeout)
                .send()
                .await?;
            response.json::<OsrmResponse>().await
        }
        .await;

        match result {
            Ok(parsed) => parsed.routes.into_iter().next().map(|r| RouteGeometry {
                geometry: r.geometry,
                distance: r.distance,
                duration: r.duration,
            }),
            Err(err) => {
                warn!("OSRM lookup failed: {}", err);
                None
            }
        }
    }
}

/// Fallback plan: contiguous chunks of jobs per vehicle, each chunk
/// visited nearest-neighbour from the vehicle's start.
fn greedy_plan(jobs: &[OptimizerJob], vehicles: &[OptimizerVehicle]) -> Vec<PlannedTour> {
    let chunk_size = jobs.len().div_ceil(vehicles.len());
    vehicles
        .iter()
        .zip(jobs.chunks(chunk_size))
        .map(|(vehicle, chunk)| PlannedTour {
            vehicle_id: vehicle.id,
            job_order: nearest_neighbour_order(vehicle.start, chunk),
            source: PlanSource::GreedyFallback,
        })
        .collect()
}

fn nearest_neighbour_order(start: [f64; 2], jobs: &[OptimizerJob]) -> Vec<i64> {
    let mut remaining: Vec<&OptimizerJob> = jobs.iter().collect();
    let mut order = Vec::with_capacity(jobs.len());
    let mut position = start;

    while !remaining.is_empty() {
        let (idx, _) = remaining
            .iter()
            .enumerate()
            .map(|(i, job)| (i, squared_distance(position, job.location)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .expect("remaining is non-empty");
        let job = remaining.swap_remove(idx);
        position = job.location;
        order.push(job.id);
    }
    order
}

fn squared_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: i64, lon: f64, lat: f64) -> OptimizerJob {
        OptimizerJob {
            id,
            location: [lon, lat],
        }
    }

    #[test]
    fn nearest_neighbour_visits_closest_first() {
        let jobs = vec![job(1, 10.0, 0.0), job(2, 1.0, 0.0), job(3, 5.0, 0.0)];
        let order = nearest_neighbour_order([0.0, 0.0], &jobs);
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn greedy_plan_covers_every_job_once() {
        let jobs: Vec<OptimizerJob> = (0..5).map(|i| job(i, i as f64, 0.0)).collect();
        let vehicles = vec![
            OptimizerVehicle { id: 100, start: [0.0, 0.0] },
            OptimizerVehicle { id: 200, start: [4.0, 0.0] },
        ];

        let tours = greedy_plan(&jobs, &vehicles);
        let mut seen: Vec<i64> = tours.iter().flat_map(|t| t.job_order.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(tours.iter().all(|t| t.source == PlanSource::GreedyFallback));
    }
}
