//! handlers/job_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::models::job_model::CleanupQuery;
use crate::services::job_manager::JobManager;

const DEFAULT_RETENTION_DAYS: u32 = 7;

/// GET /api/jobs/running
pub async fn running_jobs_endpoint(manager: web::Data<JobManager>) -> HttpResponse {
    HttpResponse::Ok().json(manager.get_running_campaigns().await)
}

/// DELETE /api/jobs/completed?older_than_days=N
pub async fn cleanup_jobs_endpoint(
    manager: web::Data<JobManager>,
    query: web::Query<CleanupQuery>,
) -> HttpResponse {
    let days = query.older_than_days.unwrap_or(DEFAULT_RETENTION_DAYS);
    let deleted = manager.cleanup_completed_jobs(days).await;
    HttpResponse::Ok().json(json!({
        "success": true,
        "deleted": deleted,
        "older_than_days": days,
    }))
}
