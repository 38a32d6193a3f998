//! tests/job_manager_tests.rs
//! Ciclo de vida de procesos: lanzar, reconciliar, detener y limpiar.
//! El worker es un script que sólo duerme.

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};
    use chrono::{SecondsFormat, Utc};

    use crate::app::init_app;
    use crate::config::app_config::AppConfig;
    use crate::models::campaign_model::{CampaignStatus, Channel};
    use crate::models::job_model::JobStatus;
    use crate::services::job_manager::{
        JobManager, REASON_PROCESS_NOT_FOUND, REASON_SPAWN_INCOMPLETE, REASON_STOPPED_BY_USER,
    };
    use crate::services::campaign_service::CampaignService;
    use crate::services::job_service::JobService;
    use crate::services::process;
    use crate::services::transaction_helper::Statement;
    use crate::tests::common::*;

    fn manager(env: &TestEnv) -> JobManager {
        JobManager::new(env.store.clone(), env.config.clone()).unwrap()
    }

    #[actix_rt::test]
    async fn second_start_is_rejected_while_running() {
        let env = test_env().await;
        let campaign_id = seed_email_campaign(&env.store).await;
        let manager = manager(&env);

        assert!(manager.start_campaign_background(campaign_id, Channel::Email).await);
        assert!(!manager.start_campaign_background(campaign_id, Channel::Email).await);
        assert!(manager.is_campaign_running(campaign_id, Channel::Email).await);

        // El otro canal es independiente
        assert!(!manager.is_campaign_running(campaign_id, Channel::Sms).await);

        assert!(manager.stop_campaign(campaign_id, Channel::Email).await);
    }

    #[actix_rt::test]
    async fn concurrent_starts_claim_once() {
        let env = test_env().await;
        let campaign_id = seed_email_campaign(&env.store).await;
        let manager = manager(&env);

        let (a, b) = tokio::join!(
            manager.start_campaign_background(campaign_id, Channel::Email),
            manager.start_campaign_background(campaign_id, Channel::Email),
        );
        assert!(a ^ b, "exactly one start must win (got {a}, {b})");

        let running = manager.get_running_campaigns().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].campaign_id, campaign_id);

        assert!(manager.stop_campaign(campaign_id, Channel::Email).await);
    }

    #[actix_rt::test]
    async fn stop_terminates_the_worker() {
        let env = test_env().await;
        let campaign_id = seed_email_campaign(&env.store).await;
        let manager = manager(&env);

        assert!(manager.start_campaign_background(campaign_id, Channel::Email).await);
        let pid = manager
            .get_campaign_status(campaign_id, Channel::Email)
            .await
            .pid
            .unwrap();
        assert!(process::is_alive(pid));

        assert!(manager.stop_campaign(campaign_id, Channel::Email).await);
        assert!(!process::is_alive(pid));

        let view = manager.get_campaign_status(campaign_id, Channel::Email).await;
        assert!(!view.is_running);
        assert_eq!(view.job_status, Some(JobStatus::Stopped));
        assert_eq!(view.error_message.as_deref(), Some(REASON_STOPPED_BY_USER));
        assert!(view.completed_at.is_some());

        // Nada que detener la segunda vez
        assert!(!manager.stop_campaign(campaign_id, Channel::Email).await);
    }

    #[actix_rt::test]
    async fn dead_worker_is_reconciled_on_read() {
        let env = test_env().await;
        let campaign_id = seed_email_campaign(&env.store).await;
        let jobs = JobService::new(env.store.clone());
        let job_id = jobs.claim(campaign_id, Channel::Email).await.unwrap();
        jobs.mark_spawned(job_id, dead_pid()).await.unwrap();

        let manager = manager(&env);
        let view = manager.get_campaign_status(campaign_id, Channel::Email).await;
        assert!(!view.is_running);
        assert_eq!(view.job_status, Some(JobStatus::Stopped));
        assert_eq!(view.error_message.as_deref(), Some(REASON_PROCESS_NOT_FOUND));
        // La campaña no se toca
        assert_eq!(view.campaign_status, Some(CampaignStatus::Draft));

        // El arreglo persiste y no requiere un proceso nuevo
        assert!(!manager.is_campaign_running(campaign_id, Channel::Email).await);
        let job = jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Stopped);
        assert!(manager.get_running_campaigns().await.is_empty());
    }

    #[actix_rt::test]
    async fn running_list_drops_dead_entries() {
        let env = test_env().await;
        let jobs = JobService::new(env.store.clone());
        let dead = jobs.claim(10, Channel::Sms).await.unwrap();
        jobs.mark_spawned(dead, dead_pid()).await.unwrap();
        let alive = jobs.claim(11, Channel::Sms).await.unwrap();
        jobs.mark_spawned(alive, std::process::id()).await.unwrap();

        let manager = manager(&env);
        let running = manager.get_running_campaigns().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].job_id, alive);
        assert_eq!(running[0].pid, std::process::id());
        assert_eq!(jobs.get(dead).await.unwrap().unwrap().status, JobStatus::Stopped);
    }

    #[actix_rt::test]
    async fn stale_pending_claim_is_released() {
        let env = test_env().await;
        let jobs = JobService::new(env.store.clone());
        let job_id = jobs.claim(3, Channel::Email).await.unwrap();

        // Dentro de la ventana de gracia cuenta como en curso
        let patient = manager(&env);
        assert!(patient.is_campaign_running(3, Channel::Email).await);
        assert!(!patient.start_campaign_background(3, Channel::Email).await);

        let impatient = JobManager::new(
            env.store.clone(),
            AppConfig {
                pending_claim_grace: Duration::ZERO,
                ..env.config.clone()
            },
        )
        .unwrap();
        assert!(!impatient.is_campaign_running(3, Channel::Email).await);
        let job = jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(REASON_SPAWN_INCOMPLETE));
    }

    #[actix_rt::test]
    async fn spawn_failure_is_reported_as_false() {
        let env = test_env().await;
        let manager = JobManager::new(
            env.store.clone(),
            AppConfig {
                worker_bin: Some(PathBuf::from("/nonexistent/campaign_worker")),
                ..env.config.clone()
            },
        )
        .unwrap();

        assert!(!manager.start_campaign_background(4, Channel::Sms).await);
        let view = manager.get_campaign_status(4, Channel::Sms).await;
        assert_eq!(view.job_status, Some(JobStatus::Failed));
        assert!(view
            .error_message
            .as_deref()
            .unwrap_or_default()
            .starts_with("spawn failed"));
        assert!(!view.is_running);
    }

    #[actix_rt::test]
    async fn cleanup_only_removes_old_terminal_jobs() {
        let env = test_env().await;
        let days_ago = |days: i64| {
            (Utc::now() - chrono::Duration::days(days)).to_rfc3339_opts(SecondsFormat::Millis, true)
        };
        for (campaign_id, status, completed_at) in [
            (1i64, "completed", Some(days_ago(10))),
            (2, "failed", Some(days_ago(30))),
            (3, "stopped", Some(days_ago(1))),
            (4, "running", None),
        ] {
            env.store
                .execute(
                    &Statement::new(
                        "INSERT INTO background_jobs (campaign_id, campaign_type, status, pid, started_at, completed_at)
                         VALUES (?1, 'email', ?2, ?3, ?4, ?5)",
                    )
                    .bind(campaign_id)
                    .bind(status)
                    .bind(std::process::id())
                    .bind(days_ago(40))
                    .bind(completed_at),
                )
                .await
                .unwrap();
        }

        let manager = manager(&env);
        assert_eq!(manager.cleanup_completed_jobs(7).await, 2);
        assert_eq!(manager.cleanup_completed_jobs(7).await, 0);

        let jobs = JobService::new(env.store.clone());
        assert!(jobs.latest(1, Channel::Email).await.unwrap().is_none());
        assert!(jobs.latest(3, Channel::Email).await.unwrap().is_some());
        assert!(jobs.latest(4, Channel::Email).await.unwrap().is_some());
    }

    #[actix_rt::test]
    async fn reset_after_a_killed_worker_returns_to_draft() {
        let env = test_env().await;
        let campaign_id = seed_email_campaign(&env.store).await;
        let campaigns = CampaignService::new(env.store.clone());
        let manager = web::Data::new(manager(&env));
        let app = test::init_service(
            App::new()
                .app_data(manager.clone())
                .app_data(web::Data::new(env.store.clone()))
                .configure(init_app),
        )
        .await;
        let reset_uri = format!("/api/campaigns/email/{campaign_id}/reset");

        assert!(manager.start_campaign_background(campaign_id, Channel::Email).await);
        campaigns
            .update_status(campaign_id, Channel::Email, CampaignStatus::Running, Some("33% - sent"))
            .await
            .unwrap();

        // Con el worker vivo el reset se rechaza
        let resp = test::call_service(&app, test::TestRequest::post().uri(&reset_uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // SIGKILL: el worker no llega a escribir su estado final
        let pid = manager
            .get_campaign_status(campaign_id, Channel::Email)
            .await
            .pid
            .unwrap();
        assert!(process::force_kill(pid));
        for _ in 0..50 {
            if !manager.is_campaign_running(campaign_id, Channel::Email).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let view = manager.get_campaign_status(campaign_id, Channel::Email).await;
        assert!(!view.is_running);
        assert_eq!(view.campaign_status, Some(CampaignStatus::Running));

        let resp = test::call_service(&app, test::TestRequest::post().uri(&reset_uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let campaign = campaigns
            .load_campaign(campaign_id, Channel::Email)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);

        // Campaña inexistente
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/campaigns/email/9999/reset")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
