use crate::error::MirrorError;
use crate::store::issue::{self, IssueFilter};
use crate::sync::SyncService;

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

const PAGE_SIZE: i64 = 50;

#[derive(Deserialize)]
#[serde(default)]
pub(crate) struct FilterQuery {
    project: String,
    status: String,
    confirmation: String,
    resolution: String,
    priority: String,
    reporter: String,
    assignee: String,
    affected_version: String,
    fix_version: String,
    category: String,
    label: String,
    component: String,
    platform: String,
    area: String,
    sort: String,
    page: i64
}

impl Default for FilterQuery {
    fn default() -> Self {
        FilterQuery {
            project: String::new(),
            status: String::new(),
            confirmation: String::new(),
            resolution: String::new(),
            priority: String::new(),
            reporter: String::new(),
            assignee: String::new(),
            affected_version: String::new(),
            fix_version: String::new(),
            category: String::new(),
            label: String::new(),
            component: String::new(),
            platform: String::new(),
            area: String::new(),
            sort: String::new(),
            page: 1
        }
    }
}

pub(crate) async fn filter_issues(query: web::Query<FilterQuery>, service: web::Data<SyncService>) -> Result<HttpResponse, MirrorError> {
    let query = query.into_inner();
    let page = query.page.max(1);

    let filter = IssueFilter {
        project: query.project,
        status: query.status,
        confirmation: query.confirmation,
        resolution: query.resolution,
        priority: query.priority,
        reporter: query.reporter,
        assignee: query.assignee,
        affected_version: query.affected_version,
        fix_version: query.fix_version,
        category: query.category,
        label: query.label,
        component: query.component,
        platform: query.platform,
        area: query.area,
        sort: query.sort,
        offset: (page - 1) * PAGE_SIZE,
        limit: PAGE_SIZE
    };

    let (issues, count) = issue::filter(&service.db_pool, &filter).await?;

    Ok(HttpResponse::Ok().json(json!({
        "issues": issues,
        "count": count,
        "page": page
    })))
}
