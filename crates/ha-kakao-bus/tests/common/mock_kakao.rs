//! Mock of `GET /actions/busesInBusStopJson`

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the mock answers with
#[derive(Debug, Clone)]
pub enum MockResponse {
    Json(Value),
    Status(u16),
    /// 200 with this body as-is
    Raw(String),
    /// Never answers
    Hang,
}

#[derive(Clone)]
struct MockState {
    response: Arc<Mutex<MockResponse>>,
    /// busStopId -> response, checked before `response`
    stop_responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    hits: Arc<AtomicUsize>,
    bus_stop_ids: Arc<Mutex<Vec<String>>>,
}

pub struct MockKakao {
    pub base_url: String,
    state: MockState,
    server: JoinHandle<()>,
}

impl MockKakao {
    pub async fn start(response: MockResponse) -> Self {
        let state = MockState {
            response: Arc::new(Mutex::new(response)),
            stop_responses: Arc::new(Mutex::new(HashMap::new())),
            hits: Arc::new(AtomicUsize::new(0)),
            bus_stop_ids: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/actions/busesInBusStopJson", get(buses_in_bus_stop))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            server,
        }
    }

    pub fn set_response(&self, response: MockResponse) {
        *self.state.response.lock().unwrap() = response;
    }

    /// Answer requests for one stop differently
    pub fn set_stop_response(&self, bus_stop_id: &str, response: MockResponse) {
        self.state
            .stop_responses
            .lock()
            .unwrap()
            .insert(bus_stop_id.to_string(), response);
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// `busStopId` of every request so far
    pub fn requested_stops(&self) -> Vec<String> {
        self.state.bus_stop_ids.lock().unwrap().clone()
    }
}

impl Drop for MockKakao {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn buses_in_bus_stop(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let stop_response = query.get("busStopId").and_then(|id| {
        state.bus_stop_ids.lock().unwrap().push(id.clone());
        state.stop_responses.lock().unwrap().get(id).cloned()
    });

    let response = stop_response.unwrap_or_else(|| state.response.lock().unwrap().clone());
    match response {
        MockResponse::Json(body) => Json(body).into_response(),
        MockResponse::Status(code) => (
            StatusCode::from_u16(code).unwrap(),
            "upstream error",
        )
            .into_response(),
        MockResponse::Raw(body) => {
            ([(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        MockResponse::Hang => std::future::pending().await,
    }
}

/// An address nothing listens on
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
