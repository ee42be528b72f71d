use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::geo::GeoPoint;
use crate::incident::IncidentRequest;
use crate::incidents::{Assignment, Incident, IncidentStatus, NewIncident, WorkflowError};
use crate::ranker::queue::PersistenceQueue;
use crate::ranker::Recommender;
use crate::recommendations::StoredBatch;
use crate::scoring::ScoredCandidate;
use crate::storage::SqliteStore;
use crate::units::{nearest_available, NearbyUnit, NewUnit, Unit, UnitStatus};

const DEFAULT_NEAREST_RADIUS_M: f64 = 20_000.0;
const DEFAULT_NEAREST_LIMIT: usize = 5;

#[derive(Clone)]
pub struct ApiState {
    recommender: Recommender,
    store: SqliteStore,
}

impl ApiState {
    pub fn new(recommender: Recommender, store: SqliteStore) -> Self {
        Self { recommender, store }
    }
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    detail: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        let status = match &err {
            WorkflowError::IncidentNotFound(_)
            | WorkflowError::UnitNotFound(_)
            | WorkflowError::RecommendationNotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::AlreadyAssigned { .. }
            | WorkflowError::UnitUnavailable { .. }
            | WorkflowError::NotAssigned(_) => StatusCode::BAD_REQUEST,
            WorkflowError::BatchNotPending { .. } => StatusCode::CONFLICT,
            WorkflowError::Sqlite(_) | WorkflowError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            detail: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Serialize)]
struct BannerResponse {
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct UnitStatusUpdate {
    status: UnitStatus,
}

#[derive(Debug, Deserialize)]
struct IncidentStatusUpdate {
    status: IncidentStatus,
}

#[derive(Debug, Deserialize)]
struct LocationUpdate {
    #[serde(alias = "location")]
    coordinates: GeoPoint,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DispatchBody {
    #[serde(alias = "unit_id")]
    unit_id: String,
    #[serde(default, alias = "recommendation_id")]
    recommendation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignBody {
    #[serde(alias = "incident_id")]
    incident_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptBody {
    #[serde(alias = "unit_id")]
    unit_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NearestQuery {
    longitude: f64,
    latitude: f64,
    /// Search radius in metres.
    #[serde(default = "default_nearest_radius")]
    max_distance: f64,
    #[serde(default = "default_nearest_limit")]
    limit: usize,
}

fn default_nearest_radius() -> f64 {
    DEFAULT_NEAREST_RADIUS_M
}

fn default_nearest_limit() -> usize {
    DEFAULT_NEAREST_LIMIT
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/units", get(list_units).post(create_unit))
        .route("/units/available", get(list_available_units))
        .route("/units/available/nearest", get(nearest_units))
        .route("/units/:id", get(get_unit))
        .route("/units/:id/status", patch(update_unit_status))
        .route("/units/:id/location", patch(update_unit_location))
        .route("/units/:id/assign", post(assign_unit))
        .route("/units/:id/en-route", post(unit_en_route))
        .route("/incidents", get(list_incidents).post(create_incident))
        .route("/incidents/:id", get(get_incident))
        .route("/incidents/:id/status", patch(update_incident_status))
        .route("/incidents/:id/recommend-units", post(recommend_for_incident))
        .route("/incidents/:id/recommendations", get(incident_recommendations))
        .route("/incidents/:id/dispatch", post(dispatch_unit))
        .route("/recommendations", get(list_recommendations))
        .route("/recommendations/:id", get(get_recommendation))
        .route("/recommendations/:id/accept", post(accept_recommendation))
        .route("/recommendations/:id/reject", post(reject_recommendation))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(config: Config, bind: SocketAddr) -> Result<()> {
    let store = SqliteStore::open(&config.resolved_db_path())?;
    let (queue, worker) = PersistenceQueue::spawn(
        Arc::new(store.clone()),
        config.dispatch.persist_queue_capacity,
        config.store_timeout(),
    );
    let recommender = Recommender::new(
        Arc::new(config.scoring_tables()),
        Arc::new(store.clone()),
        queue,
        config.ranker_settings(),
    );
    let app = router(ApiState::new(recommender, store));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("dispatch API listening on http://{bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let drain = config.store_timeout().saturating_mul(2).max(Duration::from_secs(1));
    if tokio::time::timeout(drain, worker).await.is_err() {
        warn!("persistence worker still busy at shutdown, abandoning pending batches");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed listening for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn index() -> Json<BannerResponse> {
    Json(BannerResponse {
        message: "Rapid Dispatch recommendation service",
    })
}

async fn health() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn predict(
    State(state): State<ApiState>,
    body: std::result::Result<Json<IncidentRequest>, JsonRejection>,
) -> std::result::Result<Json<Vec<ScoredCandidate>>, ApiError> {
    let Json(request) = body?;
    if !request.location.is_finite() {
        return Err(ApiError::bad_request("location must be two finite numbers"));
    }
    let ranked = state
        .recommender
        .recommend(&request)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(ranked))
}

async fn list_units(State(state): State<ApiState>) -> ApiResult<Vec<Unit>> {
    let units = blocking(&state.store, |store| store.list_units(None)).await?;
    Ok(ok(units))
}

async fn list_available_units(State(state): State<ApiState>) -> ApiResult<Vec<Unit>> {
    let units = blocking(&state.store, |store| {
        store.list_units(Some(UnitStatus::Available))
    })
    .await?;
    Ok(ok(units))
}

async fn nearest_units(
    State(state): State<ApiState>,
    query: std::result::Result<Query<NearestQuery>, QueryRejection>,
) -> ApiResult<Vec<NearbyUnit>> {
    let Query(query) = query?;
    let point = GeoPoint::new(query.longitude, query.latitude);
    if !point.is_finite() || !query.max_distance.is_finite() {
        return Err(ApiError::bad_request(
            "longitude, latitude and maxDistance must be finite numbers",
        ));
    }
    let units = blocking(&state.store, |store| {
        store.list_units(Some(UnitStatus::Available))
    })
    .await?;
    Ok(ok(nearest_available(
        &units,
        point,
        query.max_distance / 1000.0,
        query.limit,
    )))
}

async fn get_unit(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Unit> {
    let lookup = id.clone();
    let unit = blocking(&state.store, move |store| store.unit_by_id(&lookup))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("unit not found: {id}")))?;
    Ok(ok(unit))
}

async fn create_unit(
    State(state): State<ApiState>,
    body: std::result::Result<Json<NewUnit>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<ApiResponse<Unit>>), ApiError> {
    let Json(new_unit) = body?;
    if new_unit.call_sign.trim().is_empty() {
        return Err(ApiError::bad_request("callSign is required"));
    }
    if !new_unit.location.is_finite() {
        return Err(ApiError::bad_request("location must be two finite numbers"));
    }
    let store = state.store.clone();
    let unit = tokio::task::spawn_blocking(move || store.insert_unit(&new_unit))
        .await
        .map_err(ApiError::internal)?
        .map_err(|err| ApiError::bad_request(format!("{err:#}")))?;
    info!(unit_id = %unit.id, call_sign = %unit.call_sign, "registered unit");
    Ok((StatusCode::CREATED, ok(unit)))
}

async fn update_unit_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<UnitStatusUpdate>, JsonRejection>,
) -> ApiResult<Unit> {
    let Json(update) = body?;
    let lookup = id.clone();
    let unit = blocking(&state.store, move |store| {
        store.update_unit_status(&lookup, update.status)
    })
    .await?
    .ok_or_else(|| ApiError::not_found(format!("unit not found: {id}")))?;
    Ok(ok(unit))
}

async fn update_unit_location(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<LocationUpdate>, JsonRejection>,
) -> ApiResult<Unit> {
    let Json(update) = body?;
    if !update.coordinates.is_finite() {
        return Err(ApiError::bad_request("coordinates must be two finite numbers"));
    }
    let lookup = id.clone();
    let unit = blocking(&state.store, move |store| {
        store.update_unit_location(&lookup, update.coordinates)
    })
    .await?
    .ok_or_else(|| ApiError::not_found(format!("unit not found: {id}")))?;
    Ok(ok(unit))
}

async fn assign_unit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<AssignBody>, JsonRejection>,
) -> ApiResult<Assignment> {
    let Json(body) = body?;
    let assignment = workflow(&state.store, move |store| {
        store.assign_unit(&id, &body.incident_id)
    })
    .await?;
    info!(
        unit_id = %assignment.unit.id,
        incident_id = %assignment.incident.id,
        "unit assigned"
    );
    Ok(ok(assignment))
}

async fn unit_en_route(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Unit> {
    let unit = workflow(&state.store, move |store| store.mark_en_route(&id)).await?;
    Ok(ok(unit))
}

async fn list_incidents(State(state): State<ApiState>) -> ApiResult<Vec<Incident>> {
    let incidents = blocking(&state.store, |store| store.list_incidents()).await?;
    Ok(ok(incidents))
}

async fn create_incident(
    State(state): State<ApiState>,
    body: std::result::Result<Json<NewIncident>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<ApiResponse<Incident>>), ApiError> {
    let Json(new_incident) = body?;
    new_incident
        .validate()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let incident = blocking(&state.store, move |store| store.insert_incident(&new_incident)).await?;
    info!(
        incident_id = %incident.id,
        incident_type = %incident.incident_type,
        priority = incident.priority,
        "registered incident"
    );
    Ok((StatusCode::CREATED, ok(incident)))
}

async fn get_incident(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Incident> {
    let lookup = id.clone();
    let incident = blocking(&state.store, move |store| store.incident_by_id(&lookup))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("incident not found: {id}")))?;
    Ok(ok(incident))
}

async fn update_incident_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<IncidentStatusUpdate>, JsonRejection>,
) -> ApiResult<Incident> {
    let Json(update) = body?;
    let lookup = id.clone();
    let incident = blocking(&state.store, move |store| {
        store.update_incident_status(&lookup, update.status)
    })
    .await?
    .ok_or_else(|| ApiError::not_found(format!("incident not found: {id}")))?;
    Ok(ok(incident))
}

/// Ranks units for a registered incident. Its dispatched units are excluded
/// and the shortlist is stored under the incident id.
async fn recommend_for_incident(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<Vec<ScoredCandidate>>, ApiError> {
    let lookup = id.clone();
    let incident = blocking(&state.store, move |store| store.incident_by_id(&lookup))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("incident not found: {id}")))?;
    let ranked = state
        .recommender
        .recommend(&incident.recommendation_request())
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(ranked))
}

async fn incident_recommendations(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<StoredBatch>> {
    let batches = blocking(&state.store, move |store| store.batches_for_incident(&id)).await?;
    Ok(ok(batches))
}

async fn dispatch_unit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<DispatchBody>, JsonRejection>,
) -> ApiResult<Assignment> {
    let Json(body) = body?;
    let assignment = workflow(&state.store, move |store| {
        store.dispatch_unit(&id, &body.unit_id, body.recommendation_id.as_deref())
    })
    .await?;
    info!(
        unit_id = %assignment.unit.id,
        incident_id = %assignment.incident.id,
        "unit dispatched"
    );
    Ok(ok(assignment))
}

async fn list_recommendations(State(state): State<ApiState>) -> ApiResult<Vec<StoredBatch>> {
    let batches = blocking(&state.store, |store| store.list_batches()).await?;
    Ok(ok(batches))
}

async fn get_recommendation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StoredBatch> {
    let lookup = id.clone();
    let batch = blocking(&state.store, move |store| store.batch_by_id(&lookup))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("recommendation not found: {id}")))?;
    Ok(ok(batch))
}

async fn accept_recommendation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<AcceptBody>, JsonRejection>,
) -> ApiResult<Assignment> {
    let Json(body) = body?;
    let assignment = workflow(&state.store, move |store| {
        store.accept_recommendation(&id, &body.unit_id)
    })
    .await?;
    info!(
        unit_id = %assignment.unit.id,
        incident_id = %assignment.incident.id,
        "recommendation accepted"
    );
    Ok(ok(assignment))
}

async fn reject_recommendation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StoredBatch> {
    let batch = workflow(&state.store, move |store| store.reject_recommendation(&id)).await?;
    info!(batch_id = %batch.id, incident_id = %batch.batch.incident_id, "recommendation rejected");
    Ok(ok(batch))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

async fn blocking<T, F>(store: &SqliteStore, work: F) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || work(&store))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)
}

async fn workflow<T, F>(store: &SqliteStore, work: F) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&SqliteStore) -> std::result::Result<T, WorkflowError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || work(&store))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, ApiState};
    use crate::geo::GeoPoint;
    use crate::incidents::demo_incidents;
    use crate::ranker::queue::PersistenceQueue;
    use crate::ranker::{RankerSettings, Recommender};
    use crate::scoring::ScoringTables;
    use crate::storage::SqliteStore;
    use crate::units::memory::InMemoryUnitRepository;
    use crate::units::{demo_fleet, Unit, UnitRepository, UnitType};

    fn app_with(store: SqliteStore, units: Arc<dyn UnitRepository>) -> Router {
        let (queue, _worker) =
            PersistenceQueue::spawn(Arc::new(store.clone()), 16, Duration::from_secs(1));
        let recommender = Recommender::new(
            Arc::new(ScoringTables::default()),
            units,
            queue,
            RankerSettings::default(),
        );
        router(ApiState::new(recommender, store))
    }

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("in-memory db");
        for unit in demo_fleet() {
            store.insert_unit(&unit).expect("insert unit");
        }
        for incident in demo_incidents() {
            store.insert_incident(&incident).expect("insert incident");
        }
        store
    }

    fn app() -> Router {
        let store = seeded_store();
        app_with(store.clone(), Arc::new(store))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn stored_batches(app: &Router, incident_id: &str) -> Vec<Value> {
        let uri = format!("/incidents/{incident_id}/recommendations");
        for _ in 0..50 {
            let (_, body) = send(app, "GET", &uri, None).await;
            let stored = body["data"].as_array().cloned().unwrap_or_default();
            if !stored.is_empty() {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn predict_returns_ranked_array() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/predict",
            Some(json!({
                "incidentType": "MEDICAL",
                "priority": 5,
                "location": [-122.420679, 37.772537]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().expect("array");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["type"], "AMBULANCE");
        assert!(items[0]["score"].as_f64().expect("score") > 0.0);
        assert!(items[0].get("call_sign").is_some());
        assert!(items[0].get("unit_id").is_some());
        assert!(items[0].get("distance").is_some());
    }

    #[tokio::test]
    async fn predict_rejects_malformed_body() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/predict",
            Some(json!({ "incidentType": "FIRE", "priority": "high", "location": [1.0] })),
        )
        .await;
        assert!(status.is_client_error());
        assert_eq!(body["ok"], false);
        assert!(body["detail"].as_str().is_some());
    }

    #[tokio::test]
    async fn ranking_failure_is_internal_error_with_detail() {
        let broken = InMemoryUnitRepository::new(vec![Unit::new(
            "bad-7",
            "B7",
            UnitType::Ambulance,
            GeoPoint::new(f64::NAN, 37.77),
        )]);
        let store = SqliteStore::open_in_memory().expect("in-memory db");
        let app = app_with(store, Arc::new(broken));

        let (status, body) = send(
            &app,
            "POST",
            "/predict",
            Some(json!({
                "incidentType": "MEDICAL",
                "priority": 5,
                "location": [-122.42, 37.77],
                "incidentId": "inc-nan"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.is_array());
        let detail = body["detail"].as_str().expect("detail message");
        assert!(detail.contains("bad-7"));
    }

    #[tokio::test]
    async fn predict_persists_batch_for_incident() {
        let app = app();
        let (status, _) = send(
            &app,
            "POST",
            "/predict",
            Some(json!({
                "incidentType": "FIRE",
                "priority": 4,
                "location": [-122.435097, 37.764853],
                "incidentId": "inc-7"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let stored = stored_batches(&app, "inc-7").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["status"], "PENDING");
        assert!(stored[0]["acceptedUnitId"].is_null());
        assert_eq!(stored[0]["recommendations"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn dispatched_unit_leaves_available_pool() {
        let app = app();
        let (_, body) = send(&app, "GET", "/units/available", None).await;
        let first_id = body["data"][0]["id"].as_str().expect("id").to_string();

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/units/{first_id}/status"),
            Some(json!({ "status": "DISPATCHED" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "DISPATCHED");

        let (_, body) = send(&app, "GET", "/units/available", None).await;
        let ids = body["data"]
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|u| u["id"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains(&first_id.as_str()));
    }

    #[tokio::test]
    async fn registers_and_moves_units() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/units",
            Some(json!({
                "callSign": "X900",
                "type": "OTHER",
                "location": [-122.4, 37.7],
                "capabilities": ["RESCUE", "TACTICAL"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["data"]["id"].as_str().expect("id").to_string();

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/units/{id}/location"),
            Some(json!({ "coordinates": [-122.5, 37.8] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["location"], json!([-122.5, 37.8]));

        let (status, body) = send(&app, "GET", &format!("/units/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["capabilities"], json!(["RESCUE", "TACTICAL"]));

        let (status, _) = send(
            &app,
            "POST",
            "/units",
            Some(json!({ "callSign": "X900", "type": "OTHER", "location": [0.0, 0.0] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_unit_is_not_found() {
        let app = app();
        let (status, body) = send(
            &app,
            "PATCH",
            "/units/4242/status",
            Some(json!({ "status": "ON_SCENE" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);

        let (status, _) = send(&app, "GET", "/units/4242", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn nearest_units_are_sorted_and_bounded() {
        let app = app();
        let (status, body) = send(
            &app,
            "GET",
            "/units/available/nearest?longitude=-122.4194&latitude=37.7749&maxDistance=1500&limit=2",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let items = body["data"].as_array().expect("array");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["callSign"], "A101");
        assert!(items[0]["distanceKm"].as_f64() <= items[1]["distanceKm"].as_f64());
        assert!(items[1]["distanceKm"].as_f64().expect("distance") <= 1.5);

        let (status, _) = send(&app, "GET", "/units/available/nearest?longitude=abc", None).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn incident_lifecycle() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/incidents",
            Some(json!({
                "type": "FIRE",
                "priority": 4,
                "location": [-122.43, 37.77],
                "address": "1 Ferry Building",
                "description": "Kitchen fire"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "PENDING");
        let id = body["data"]["id"].as_str().expect("id").to_string();

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/incidents/{id}/status"),
            Some(json!({ "status": "ON_SCENE" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ON_SCENE");

        let (_, body) = send(&app, "GET", "/incidents", None).await;
        assert_eq!(body["data"].as_array().map(Vec::len), Some(6));

        let (status, body) = send(
            &app,
            "POST",
            "/incidents",
            Some(json!({
                "type": "FLOOD",
                "priority": 3,
                "location": [-122.43, 37.77],
                "description": "Water main"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().expect("detail").contains("FLOOD"));

        let (status, _) = send(&app, "GET", "/incidents/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recommend_units_excludes_dispatched_and_stores_batch() {
        let app = app();
        let (_, body) = send(&app, "GET", "/incidents", None).await;
        let fire = body["data"]
            .as_array()
            .expect("array")
            .iter()
            .find(|i| i["type"] == "FIRE")
            .cloned()
            .expect("fire incident");
        let incident_id = fire["id"].as_str().expect("id").to_string();

        let (status, first) = send(
            &app,
            "POST",
            &format!("/incidents/{incident_id}/recommend-units"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let best = first[0]["unit_id"].as_str().expect("unit id").to_string();
        assert_eq!(first[0]["type"], "FIRE_ENGINE");

        // Dispatch the best engine, then return it to service so only the
        // incident's own assignment keeps it out of the shortlist.
        let (status, _) = send(
            &app,
            "POST",
            &format!("/incidents/{incident_id}/dispatch"),
            Some(json!({ "unitId": best })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        send(
            &app,
            "PATCH",
            &format!("/units/{best}/status"),
            Some(json!({ "status": "AVAILABLE" })),
        )
        .await;

        let (_, second) = send(
            &app,
            "POST",
            &format!("/incidents/{incident_id}/recommend-units"),
            None,
        )
        .await;
        let ids = second
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|c| c["unit_id"].as_str())
            .collect::<Vec<_>>();
        assert!(!ids.contains(&best.as_str()));
        assert!(!stored_batches(&app, &incident_id).await.is_empty());

        let (status, _) = send(&app, "POST", "/incidents/999/recommend-units", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dispatch_with_recommendation_accepts_it() {
        let app = app();
        let (status, ranked) = send(&app, "POST", "/incidents/1/recommend-units", None).await;
        assert_eq!(status, StatusCode::OK);
        let unit_id = ranked[0]["unit_id"].as_str().expect("unit id").to_string();
        let batch_id = stored_batches(&app, "1").await[0]["id"]
            .as_str()
            .expect("batch id")
            .to_string();

        let (status, body) = send(
            &app,
            "POST",
            "/incidents/1/dispatch",
            Some(json!({ "unitId": unit_id, "recommendationId": batch_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["incident"]["status"], "DISPATCHED");
        assert_eq!(body["data"]["unit"]["status"], "DISPATCHED");
        assert_eq!(body["data"]["unit"]["currentIncident"], "1");

        let (_, body) = send(&app, "GET", &format!("/recommendations/{batch_id}"), None).await;
        assert_eq!(body["data"]["status"], "ACCEPTED");
        assert_eq!(body["data"]["acceptedUnitId"], unit_id);

        let (status, _) = send(
            &app,
            "POST",
            "/incidents/1/dispatch",
            Some(json!({ "unitId": unit_id })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn accept_and_reject_recommendations() {
        let app = app();
        send(&app, "POST", "/incidents/2/recommend-units", None).await;
        send(&app, "POST", "/incidents/3/recommend-units", None).await;
        let fire_batch = stored_batches(&app, "2").await[0].clone();
        let police_batch = stored_batches(&app, "3").await[0].clone();
        let fire_batch_id = fire_batch["id"].as_str().expect("id").to_string();
        let police_batch_id = police_batch["id"].as_str().expect("id").to_string();
        let engine = fire_batch["recommendations"][0]["unit_id"]
            .as_str()
            .expect("unit id")
            .to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/recommendations/{fire_batch_id}/accept"),
            Some(json!({ "unitId": engine })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["incident"]["dispatchedUnits"], json!([engine]));

        let (status, body) = send(
            &app,
            "POST",
            &format!("/recommendations/{police_batch_id}/reject"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "REJECTED");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/recommendations/{police_batch_id}/reject"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&app, "GET", "/recommendations", None).await;
        let statuses = body["data"]
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|b| b["status"].as_str())
            .collect::<Vec<_>>();
        assert!(statuses.contains(&"ACCEPTED"));
        assert!(statuses.contains(&"REJECTED"));

        let (status, _) = send(&app, "POST", "/recommendations/999/reject", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn assign_then_en_route() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/units/3/assign",
            Some(json!({ "incidentId": "3" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["unit"]["status"], "EN_ROUTE");
        assert_eq!(body["data"]["incident"]["status"], "DISPATCHED");

        let (status, body) = send(
            &app,
            "POST",
            "/units/3/assign",
            Some(json!({ "incidentId": "4" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().expect("detail").contains("EN_ROUTE"));

        let (status, _) = send(&app, "POST", "/units/1/en-route", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(&app, "POST", "/units/3/en-route", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "EN_ROUTE");
    }

    #[tokio::test]
    async fn health_reports_version() {
        let app = app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
    }
}
