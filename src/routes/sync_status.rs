use crate::error::MirrorError;
use crate::metrics;
use crate::store::{issue, queue};
use crate::sync::SyncService;

use actix_web::{web, HttpResponse};
use serde_json::json;

/// Mirror health: per-project coverage plus the current queue contents.
pub(crate) async fn sync_status(service: web::Data<SyncService>) -> Result<HttpResponse, MirrorError> {
    let projects = issue::sync_stats(&service.db_pool).await?;
    let entries = queue::overview(&service.db_pool).await?;

    Ok(HttpResponse::Ok().json(json!({
        "projects": projects,
        "queue_size": entries.len(),
        "queue": entries
    })))
}

pub(crate) async fn metrics_exposition() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::gather())
}
