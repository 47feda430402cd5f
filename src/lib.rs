//! Domain-abuse report tracking service.
pub mod config;
mod endpoints;
pub mod error;
pub mod fetch;
pub mod ingest;
mod metrics;
pub mod risk;
mod serve;
pub mod store;

pub use error::Error;
pub use serve::{app, run, AppState, Result};

/// The index (/) route.
async fn index() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "message": "API is running." }))
}
