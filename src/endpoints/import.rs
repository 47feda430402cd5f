use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    fetch::{ExternalFetcher, FetchError},
    ingest::{self, Ingestor, RowError},
    metrics::UPSTREAM_FAILURES,
    store::ReportStore,
    AppState, Error, Result,
};

#[derive(Serialize)]
struct ImportOutput {
    message: String,
    errors: Vec<RowError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchInput {
    api_endpoint: Option<String>,
    api_key: Option<String>,
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        let status = match err {
            FetchError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            FetchError::InvalidFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::with_status(status, err)
    }
}

/// Import reports from an uploaded CSV file (multipart field `file`).
async fn batch_import(
    State(store): State<ReportStore>,
    State(config): State<AppConfig>,
    mut multipart: Multipart,
) -> Result<Json<ImportOutput>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::with_status(e.status(), e))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_owned();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::with_status(e.status(), e))?;
        upload = Some((file_name, bytes));
        break;
    }

    let Some((file_name, bytes)) = upload else {
        return Err(Error::bad_request("No file part in the request"));
    };
    if file_name.is_empty() {
        return Err(Error::bad_request("No selected file"));
    }
    if !file_name.ends_with(".csv") {
        return Err(Error::bad_request(
            "Invalid file type. Please upload a CSV file.",
        ));
    }

    let rows = ingest::parse_csv(&bytes)
        .map_err(|e| Error::with_status(StatusCode::BAD_REQUEST, e))?;
    info!(%file_name, rows = rows.len(), "importing csv upload");

    let summary = Ingestor::new(&store, config.ingest.commit)
        .ingest(rows)
        .await?;

    Ok(Json(ImportOutput {
        message: format!("Successfully imported {} reports.", summary.imported),
        errors: summary.errors,
    }))
}

/// Pull reports from an external API and import them.
async fn fetch_external(
    State(store): State<ReportStore>,
    State(config): State<AppConfig>,
    State(fetcher): State<ExternalFetcher>,
    Json(input): Json<FetchInput>,
) -> Result<Json<ImportOutput>> {
    let (Some(endpoint), Some(key)) = (
        input.api_endpoint.filter(|s| !s.is_empty()),
        input.api_key.filter(|s| !s.is_empty()),
    ) else {
        return Err(Error::bad_request("Missing API endpoint or key in request"));
    };

    let rows = fetcher.fetch(&endpoint, &key).await.map_err(|e| {
        warn!(%endpoint, "external fetch failed: {e}");
        counter!(UPSTREAM_FAILURES).increment(1);
        Error::from(e)
    })?;

    let summary = Ingestor::new(&store, config.ingest.commit)
        .ingest(rows)
        .await?;

    Ok(Json(ImportOutput {
        message: format!(
            "Successfully fetched and imported {} reports from external API.",
            summary.imported
        ),
        errors: summary.errors,
    }))
}

pub fn routes() -> Router<AppState> {
    // POST /reports/batch-import
    // POST /reports/fetch-external
    Router::new()
        .route("/reports/batch-import", post(batch_import))
        .route("/reports/fetch-external", post(fetch_external))
}
