use crate::die;
use crate::error::MirrorError;
use crate::store::issue;
use crate::sync::SyncService;

use actix_web::{web, HttpResponse};
use serde_json::json;

const VIEW_LIMIT: i64 = 20;

/// Per-user view: what they reported, what they are assigned to and where
/// they commented. Users only exist through the issues that mention them.
pub(crate) async fn user_view(path: web::Path<String>, service: web::Data<SyncService>) -> Result<HttpResponse, MirrorError> {
    let name = path.into_inner();

    let reported = issue::by_reporter(&service.db_pool, name.as_str(), VIEW_LIMIT).await?;
    let assigned = issue::by_assignee(&service.db_pool, name.as_str(), VIEW_LIMIT).await?;
    let comments = issue::comments_by_user(&service.db_pool, name.as_str(), VIEW_LIMIT).await?;

    if reported.is_empty() && assigned.is_empty() && comments.is_empty() {
        die!(NOT_FOUND, "No such user");
    }

    Ok(HttpResponse::Ok().json(json!({
        "name": name,
        "reported": reported,
        "assigned": assigned,
        "comments": comments
    })))
}
