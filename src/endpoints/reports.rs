use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::{
    ingest::{self, RawRow, Rejection},
    metrics::{REPORTS_CREATED, REPORTS_UPDATED},
    store::{Report, ReportStore},
    AppState, Error, Result,
};

#[derive(Serialize)]
struct Created {
    message: &'static str,
    id: i64,
}

#[derive(Serialize)]
struct Message {
    message: String,
}

#[derive(Deserialize)]
struct UpdateInput {
    status: Option<String>,
    reviewer_id: Option<String>,
}

/// The body is taken as raw JSON so that missing, null and mistyped fields
/// all go through the same row validation as bulk imports. Only the wording of
/// a missing-field error differs.
async fn create_report(
    State(store): State<ReportStore>,
    Json(input): Json<Value>,
) -> Result<(StatusCode, Json<Created>)> {
    let report = ingest::validate_row(&RawRow::from(input)).map_err(|e| match e {
        Rejection::MissingColumns => Error::bad_request("Missing required fields."),
        e => Error::with_status(StatusCode::BAD_REQUEST, e),
    })?;

    let id = store.insert(&report).await?;
    counter!(REPORTS_CREATED).increment(1);
    info!(id, domain = %report.domain_name, risk = report.risk.score(), "report created");

    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Report created successfully.",
            id,
        }),
    ))
}

async fn list_reports(State(store): State<ReportStore>) -> Result<Json<Vec<Report>>> {
    Ok(Json(store.list_all().await?))
}

async fn reports_for_domain(
    State(store): State<ReportStore>,
    Path(domain_name): Path<String>,
) -> Result<Json<Vec<Report>>> {
    let reports = store.list_by_domain(&domain_name).await?;
    if reports.is_empty() {
        return Err(Error::not_found("No reports found for this domain."));
    }

    Ok(Json(reports))
}

/// Both fields are required, so a reviewer can be reassigned but never cleared
/// through this route.
async fn update_report(
    State(store): State<ReportStore>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateInput>,
) -> Result<Json<Message>> {
    let (Some(status), Some(reviewer_id)) = (
        input.status.filter(|s| !s.is_empty()),
        input.reviewer_id.filter(|s| !s.is_empty()),
    ) else {
        return Err(Error::bad_request(
            "Status and reviewer_id are required fields.",
        ));
    };

    if !store.update_status(id, &status, &reviewer_id).await? {
        return Err(Error::not_found("Report not found."));
    }

    counter!(REPORTS_UPDATED).increment(1);
    info!(id, %status, %reviewer_id, "report updated");

    Ok(Json(Message {
        message: format!("Report {id} updated successfully."),
    }))
}

pub fn routes() -> Router<AppState> {
    // POST /reports
    // GET  /reports
    // GET  /reports/{domain_name}
    // PUT  /reports/{id}
    Router::new()
        .route("/reports", get(list_reports).post(create_report))
        .route(
            "/reports/{key}",
            get(reports_for_domain).put(update_report),
        )
}
