//! HTTP API
//!
//! Thin axum layer over [`ControlService`] plus read-only views of the stored
//! values and the last cycle.

pub mod handlers;

use axum::{routing::get, Router};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::control::ControlService;
use crate::core::poller::CycleReport;
use crate::storage::AcquisitionStore;

/// Latest finished cycle, shared between the poll task and the API
pub type LastCycle = Arc<RwLock<Option<CycleReport>>>;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlService>,
    pub store: Arc<dyn AcquisitionStore>,
    pub last_cycle: LastCycle,
    pub service_name: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        control: Arc<ControlService>,
        store: Arc<dyn AcquisitionStore>,
        last_cycle: LastCycle,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            control,
            store,
            last_cycle,
            service_name: service_name.into(),
            started_at: Instant::now(),
        }
    }
}

/// Build the service router
pub fn create_api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/units", get(handlers::list_units))
        .route("/api/params", get(handlers::list_params))
        .route("/api/cycle", get(handlers::last_cycle))
        .route(
            "/api/devices/{device}/{function}",
            get(handlers::read_function).post(handlers::write_function),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
