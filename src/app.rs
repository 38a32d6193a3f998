//! app.rs
use crate::handlers::{campaign_handler, job_handler};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/campaigns/{type}/{id}")
                    .route("/start", web::post().to(campaign_handler::start_campaign_endpoint))
                    .route("/stop", web::post().to(campaign_handler::stop_campaign_endpoint))
                    .route("/reset", web::post().to(campaign_handler::reset_campaign_endpoint))
                    .route(
                        "/status",
                        web::get().to(campaign_handler::campaign_status_endpoint),
                    )
                    .route(
                        "/history",
                        web::get().to(campaign_handler::campaign_history_endpoint),
                    ),
            )
            .service(
                web::scope("/jobs")
                    .route("/running", web::get().to(job_handler::running_jobs_endpoint))
                    .route(
                        "/completed",
                        web::delete().to(job_handler::cleanup_jobs_endpoint),
                    ),
            ),
    );
}
