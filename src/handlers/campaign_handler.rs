//! handlers/campaign_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::models::campaign_model::Channel;
use crate::models::job_model::JobActionResponse;
use crate::services::campaign_service::CampaignService;
use crate::services::job_manager::JobManager;
use crate::services::transaction_helper::Store;

fn parse_path(path: web::Path<(String, i64)>) -> Result<(Channel, i64), HttpResponse> {
    let (raw_type, campaign_id) = path.into_inner();
    match raw_type.parse::<Channel>() {
        Ok(channel) => Ok((channel, campaign_id)),
        Err(e) => Err(HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": e,
        }))),
    }
}

/// POST /api/campaigns/{type}/{id}/start
pub async fn start_campaign_endpoint(
    manager: web::Data<JobManager>,
    path: web::Path<(String, i64)>,
) -> HttpResponse {
    let (channel, campaign_id) = match parse_path(path) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    let started = manager.start_campaign_background(campaign_id, channel).await;
    let response = JobActionResponse {
        success: started,
        campaign_id,
        channel,
        message: if started {
            "Campaign started in background".to_string()
        } else {
            "Campaign is already running or could not be started".to_string()
        },
    };
    if started {
        HttpResponse::Accepted().json(response)
    } else {
        HttpResponse::Conflict().json(response)
    }
}

/// POST /api/campaigns/{type}/{id}/stop
pub async fn stop_campaign_endpoint(
    manager: web::Data<JobManager>,
    path: web::Path<(String, i64)>,
) -> HttpResponse {
    let (channel, campaign_id) = match parse_path(path) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    let stopped = manager.stop_campaign(campaign_id, channel).await;
    HttpResponse::Ok().json(JobActionResponse {
        success: stopped,
        campaign_id,
        channel,
        message: if stopped {
            "Campaign stopped".to_string()
        } else {
            "Campaign is not running".to_string()
        },
    })
}

/// GET /api/campaigns/{type}/{id}/status
pub async fn campaign_status_endpoint(
    manager: web::Data<JobManager>,
    path: web::Path<(String, i64)>,
) -> HttpResponse {
    let (channel, campaign_id) = match parse_path(path) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    let view = manager.get_campaign_status(campaign_id, channel).await;
    if view.campaign_status.is_none() && view.job_status.is_none() {
        return HttpResponse::NotFound().json(json!({
            "success": false,
            "error": "Campaign not found",
        }));
    }
    HttpResponse::Ok().json(view)
}

/// POST /api/campaigns/{type}/{id}/reset
/// Vuelve la campaña a `draft` para poder relanzarla. El único guard es que
/// no haya un worker vivo; un `running` que quedó tras un SIGKILL se resetea.
pub async fn reset_campaign_endpoint(
    manager: web::Data<JobManager>,
    store: web::Data<Store>,
    path: web::Path<(String, i64)>,
) -> HttpResponse {
    let (channel, campaign_id) = match parse_path(path) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    if manager.is_campaign_running(campaign_id, channel).await {
        return HttpResponse::Conflict().json(json!({
            "success": false,
            "error": "Campaign is running; stop it first",
        }));
    }

    let campaigns = CampaignService::new(store.get_ref().clone());
    match campaigns.reset_to_draft(campaign_id, channel).await {
        Ok(0) => HttpResponse::NotFound().json(json!({
            "success": false,
            "error": "Campaign not found",
        })),
        Ok(_) => HttpResponse::Ok().json(json!({
            "success": true,
            "campaign_id": campaign_id,
            "channel": channel,
            "status": "draft",
        })),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Internal server error",
            "details": e.to_string(),
        })),
    }
}

/// GET /api/campaigns/{type}/{id}/history
pub async fn campaign_history_endpoint(
    store: web::Data<Store>,
    path: web::Path<(String, i64)>,
) -> HttpResponse {
    let (channel, campaign_id) = match parse_path(path) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    let campaigns = CampaignService::new(store.get_ref().clone());
    match campaigns.list_history(campaign_id, channel).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Internal server error",
            "details": e.to_string(),
        })),
    }
}
