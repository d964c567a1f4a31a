use actix_web::web::{self, ServiceConfig};

pub(crate) mod issue;
pub(crate) mod issues;
pub(crate) mod search;
pub(crate) mod sync_status;
pub(crate) mod user;

pub(crate) fn init(config: &mut ServiceConfig) {
    config.route("/api/issues", web::get().to(issues::filter_issues));
    config.route("/api/search", web::get().to(search::search_issues));
    config.route("/api/issue/{key}", web::get().to(issue::get_issue));
    config.route("/api/issue/{key}/refresh", web::post().to(issue::refresh_issue));
    config.route("/api/user/{name}", web::get().to(user::user_view));
    config.route("/api/sync", web::get().to(sync_status::sync_status));
    config.route("/metrics", web::get().to(sync_status::metrics_exposition));
}
