use crate::error::MirrorError;
use crate::model::adf;
use crate::store::issue;
use crate::sync::SyncService;

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

const RESULT_LIMIT: i64 = 10;
const PREVIEW_CHARS: usize = 200;

#[derive(Deserialize, Default)]
#[serde(default)]
pub(crate) struct SearchQuery {
    query: String
}

pub(crate) async fn search_issues(query: web::Query<SearchQuery>, service: web::Data<SyncService>) -> Result<HttpResponse, MirrorError> {
    let search = query.into_inner().query;

    if search.is_empty() {
        return Ok(HttpResponse::Ok().json(json!({ "issues": [] })));
    }

    let matches = issue::search(&service.db_pool, search.as_str(), RESULT_LIMIT).await?;

    let issues = matches.iter()
        .map(|issue| json!({
            "key": issue.key,
            "summary": issue.summary,
            "status": issue.status,
            "resolution": issue.resolution,
            "preview": adf::preview(issue.description.as_str(), PREVIEW_CHARS)
        }))
        .collect::<Vec<_>>();

    Ok(HttpResponse::Ok().json(json!({ "issues": issues })))
}
