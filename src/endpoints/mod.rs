use axum::Router;

use crate::AppState;

mod import;
mod reports;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(reports::routes())
        .merge(import::routes())
}
