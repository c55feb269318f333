//! REST API
//!
//! A small subset of the Home Assistant REST API using axum: entity states,
//! config entries and config flows.
//! Based on: https://developers.home-assistant.io/docs/api/rest

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use ha_config_entries::{
    ConfigEntries, ConfigEntriesError, ConfigEntry, ConfigEntrySource, ConfigEntryState,
    FlowError, FlowManager, FlowResult,
};
use ha_state_store::StateStore;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub state_store: Arc<StateStore>,
    pub config_entries: Arc<ConfigEntries>,
    pub flows: Arc<FlowManager>,
}

/// API status response
#[derive(Serialize)]
struct ApiStatus {
    message: &'static str,
}

/// Plain `{"message": ...}` body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

type ApiError = (StatusCode, Json<MessageResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
}

/// Config entry as listed by `GET /api/config/config_entries/entry`
#[derive(Debug, Serialize)]
pub struct ConfigEntryResponse {
    pub entry_id: String,
    pub domain: String,
    pub title: String,
    pub source: ConfigEntrySource,
    pub state: ConfigEntryState,
    pub reason: Option<String>,
    pub pref_disable_polling: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ConfigEntry> for ConfigEntryResponse {
    fn from(entry: ConfigEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            domain: entry.domain,
            title: entry.title,
            source: entry.source,
            state: entry.state,
            reason: entry.reason,
            pref_disable_polling: entry.pref_disable_polling,
            created_at: entry.created_at,
        }
    }
}

#[derive(Serialize)]
struct RemoveEntryResponse {
    require_restart: bool,
}

/// Request to start a config flow
#[derive(Deserialize)]
pub struct StartFlowRequest {
    pub handler: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/", get(api_status))
        .route("/api/states", get(get_states))
        .route("/api/states/:entity_id", get(get_state))
        .route("/api/config/config_entries/entry", get(list_config_entries))
        .route(
            "/api/config/config_entries/entry/:entry_id",
            delete(delete_config_entry),
        )
        .route(
            "/api/config/config_entries/flow_handlers",
            get(get_config_flow_handlers),
        )
        .route("/api/config/config_entries/flow", post(start_config_flow))
        .route(
            "/api/config/config_entries/flow/:flow_id",
            get(get_config_flow)
                .post(progress_config_flow)
                .delete(cancel_config_flow),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server
pub async fn start_server(
    state: AppState,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

// ==================== Handlers ====================

/// GET /api/
async fn api_status() -> Json<ApiStatus> {
    Json(ApiStatus {
        message: "API running.",
    })
}

/// GET /api/states
async fn get_states(State(state): State<AppState>) -> Json<Vec<ha_core::State>> {
    Json(state.state_store.all())
}

/// GET /api/states/{entity_id}
async fn get_state(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<ha_core::State>, ApiError> {
    state
        .state_store
        .get(&entity_id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Entity not found: {}", entity_id)))
}

/// GET /api/config/config_entries/entry
async fn list_config_entries(State(state): State<AppState>) -> Json<Vec<ConfigEntryResponse>> {
    Json(
        state
            .config_entries
            .entries()
            .into_iter()
            .map(ConfigEntryResponse::from)
            .collect(),
    )
}

/// DELETE /api/config/config_entries/entry/{entry_id}
async fn delete_config_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> Result<Json<RemoveEntryResponse>, ApiError> {
    info!("HTTP DELETE config entry: {}", entry_id);

    match state.config_entries.remove(&entry_id).await {
        Ok(_) => Ok(Json(RemoveEntryResponse {
            require_restart: false,
        })),
        Err(ConfigEntriesError::NotFound(_)) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Invalid entry specified: {}", entry_id),
        )),
        Err(e) => {
            warn!("Failed to delete config entry {}: {}", entry_id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// GET /api/config/config_entries/flow_handlers
async fn get_config_flow_handlers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.flows.handlers())
}

/// POST /api/config/config_entries/flow
async fn start_config_flow(
    State(state): State<AppState>,
    Json(request): Json<StartFlowRequest>,
) -> Result<Json<FlowResult>, ApiError> {
    info!("HTTP POST start config flow for handler: {}", request.handler);

    state
        .flows
        .start(&request.handler)
        .await
        .map(Json)
        .map_err(flow_error)
}

/// GET /api/config/config_entries/flow/{flow_id}
async fn get_config_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<FlowResult>, ApiError> {
    state
        .flows
        .get(&flow_id)
        .map(Json)
        .ok_or_else(|| flow_error(FlowError::UnknownFlow(flow_id)))
}

/// POST /api/config/config_entries/flow/{flow_id}
///
/// A step that creates an entry also sets the entry up.
async fn progress_config_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(user_input): Json<serde_json::Value>,
) -> Result<Json<FlowResult>, ApiError> {
    info!("HTTP POST progress config flow: {}", flow_id);

    state
        .flows
        .progress(&flow_id, user_input)
        .await
        .map(Json)
        .map_err(flow_error)
}

/// DELETE /api/config/config_entries/flow/{flow_id}
async fn cancel_config_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    info!("HTTP DELETE (cancel) config flow: {}", flow_id);

    state.flows.abort(&flow_id).map_err(flow_error)?;
    Ok(Json(MessageResponse {
        message: "Flow aborted".to_string(),
    }))
}

fn flow_error(err: FlowError) -> ApiError {
    let status = match &err {
        FlowError::UnknownHandler(_) | FlowError::UnknownFlow(_) => StatusCode::NOT_FOUND,
        FlowError::NotAnObject | FlowError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        FlowError::ConfigEntries(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("Config flow failed: {}", err);
    }
    api_error(status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use ha_config_entries::{ConfigFlow, FieldType, FlowStep, FormField, Storage};
    use ha_core::{Context, EntityId};
    use ha_event_bus::EventBus;
    use serde_json::{json, Map, Value};
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct DemoFlow;

    #[async_trait]
    impl ConfigFlow for DemoFlow {
        fn domain(&self) -> &str {
            "demo"
        }

        async fn step(&self, _step_id: &str, user_input: Option<&Map<String, Value>>) -> FlowStep {
            match user_input {
                None => FlowStep::Form {
                    step_id: "user".to_string(),
                    data_schema: vec![FormField::required("name", FieldType::String)],
                    errors: HashMap::new(),
                },
                Some(input) => FlowStep::CreateEntry {
                    title: input["name"].as_str().unwrap_or_default().to_string(),
                    data: input.clone().into_iter().collect(),
                },
            }
        }
    }

    fn create_test_state(dir: &TempDir) -> AppState {
        let event_bus = Arc::new(EventBus::new());
        let state_store = Arc::new(StateStore::new(event_bus));
        let config_entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let flows = Arc::new(FlowManager::new(config_entries.clone()));
        flows.register(Arc::new(DemoFlow));
        AppState {
            state_store,
            config_entries,
            flows,
        }
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_api_status() {
        let dir = TempDir::new().unwrap();
        let app = create_router(create_test_state(&dir));

        let (status, body) = send(&app, Method::GET, "/api/", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"message": "API running."}));
    }

    #[tokio::test]
    async fn test_get_states() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);
        state.state_store.set(
            EntityId::new("sensor", "seoul_station_140").unwrap(),
            "3분 후 도착",
            HashMap::from([("bus_number".to_string(), json!("140"))]),
            Context::new(),
        );
        let app = create_router(state);

        let (status, body) = send(&app, Method::GET, "/api/states", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&app, Method::GET, "/api/states/sensor.seoul_station_140", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "3분 후 도착");
        assert_eq!(body["attributes"]["bus_number"], "140");
    }

    #[tokio::test]
    async fn test_get_state_not_found() {
        let dir = TempDir::new().unwrap();
        let app = create_router(create_test_state(&dir));

        let (status, _) = send(&app, Method::GET, "/api/states/sensor.nonexistent", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_config_flow_creates_and_loads_entry() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);
        let app = create_router(state.clone());

        let (status, form) = send(
            &app,
            Method::POST,
            "/api/config/config_entries/flow",
            Some(json!({"handler": "demo"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(form["type"], "form");
        assert_eq!(form["step_id"], "user");
        let flow_id = form["flow_id"].as_str().unwrap().to_string();

        let uri = format!("/api/config/config_entries/flow/{}", flow_id);
        let (status, current) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(current["flow_id"], flow_id.as_str());

        let (status, done) = send(&app, Method::POST, &uri, Some(json!({"name": "Home"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["type"], "create_entry");
        assert_eq!(done["title"], "Home");

        let (_, entries) = send(&app, Method::GET, "/api/config/config_entries/entry", None).await;
        let entries = entries.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["domain"], "demo");
        assert_eq!(entries[0]["state"], "loaded");
        assert_eq!(entries[0]["entry_id"], done["entry_id"]);

        // Finished flows are gone
        let (status, _) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_config_flow_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let app = create_router(create_test_state(&dir));

        let (_, form) = send(
            &app,
            Method::POST,
            "/api/config/config_entries/flow",
            Some(json!({"handler": "demo"})),
        )
        .await;
        let uri = format!("/api/config/config_entries/flow/{}", form["flow_id"].as_str().unwrap());

        let (status, body) = send(&app, Method::POST, &uri, Some(json!({"name": 5}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("name"));

        let (status, _) = send(&app, Method::POST, &uri, Some(json!({"name": "a", "extra": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_handler() {
        let dir = TempDir::new().unwrap();
        let app = create_router(create_test_state(&dir));

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/config/config_entries/flow",
            Some(json!({"handler": "nope"})),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_config_flow() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);
        let app = create_router(state.clone());

        let (_, form) = send(
            &app,
            Method::POST,
            "/api/config/config_entries/flow",
            Some(json!({"handler": "demo"})),
        )
        .await;
        let uri = format!("/api/config/config_entries/flow/{}", form["flow_id"].as_str().unwrap());

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.flows.in_progress().is_empty());

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_config_entry() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);
        let entry = state
            .config_entries
            .add(ConfigEntry::new("demo", "Home"))
            .await
            .unwrap();
        let app = create_router(state.clone());

        let uri = format!("/api/config/config_entries/entry/{}", entry.entry_id);
        let (status, body) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"require_restart": false}));
        assert!(state.config_entries.is_empty());

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_flow_handlers() {
        let dir = TempDir::new().unwrap();
        let app = create_router(create_test_state(&dir));

        let (status, body) = send(&app, Method::GET, "/api/config/config_entries/flow_handlers", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["demo"]));
    }
}
