use crate::die;
use crate::error::MirrorError;
use crate::model::issue::parse_key;
use crate::store::queue;
use crate::sync::service::ReadOutcome;
use crate::sync::SyncService;

use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::instrument;

#[instrument(skip_all, fields(key = path.as_str()))]
pub(crate) async fn get_issue(path: web::Path<String>, service: web::Data<SyncService>) -> Result<HttpResponse, MirrorError> {
    let key = path.into_inner();

    if parse_key(key.as_str()).is_none() {
        die!(NOT_FOUND, "No such issue");
    }

    match service.get_issue(key.as_str()).await {
        Ok(ReadOutcome::Found(issue)) => {
            // Partial records are display-only; the client shows them as
            // still syncing together with the last sync timestamp
            let sync_pending = issue.partial;
            let last_synced = issue.synced_date;

            Ok(HttpResponse::Ok().json(json!({
                "issue": issue,
                "sync_pending": sync_pending,
                "last_synced": last_synced
            })))
        }
        Ok(ReadOutcome::Removed) => Ok(HttpResponse::Gone().json(json!({
            "key": key,
            "error": "Issue was removed upstream"
        }))),
        Ok(ReadOutcome::NotFound) => die!(NOT_FOUND, "No such issue"),
        Err(_) => die!(BAD_GATEWAY, "Upstream trackers are unavailable")
    }
}

pub(crate) async fn refresh_issue(path: web::Path<String>, service: web::Data<SyncService>) -> Result<HttpResponse, MirrorError> {
    let key = path.into_inner();

    if parse_key(key.as_str()).is_none() {
        die!(NOT_FOUND, "No such issue");
    }

    let queued = queue::enqueue(&service.db_pool, &[key.clone()], queue::PROTECTED_PRIORITY, "user-refresh").await?;

    Ok(HttpResponse::Accepted().json(json!({
        "key": key,
        "queued": !queued.is_empty()
    })))
}
