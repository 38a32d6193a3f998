//! services/job_manager.rs
//! Lanza, vigila y detiene un proceso worker por campaña. El estado vive en
//! `background_jobs`; las lecturas reconcilian ese registro contra los
//! procesos reales del SO.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::process::{Child, Command};
use tokio::time::sleep;

use crate::config::app_config::AppConfig;
use crate::models::campaign_model::Channel;
use crate::models::job_model::{CampaignStatusView, JobRecord, JobStatus, RunningCampaign};
use crate::services::campaign_service::CampaignService;
use crate::services::job_service::JobService;
use crate::services::process;
use crate::services::transaction_helper::Store;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_GRACE: Duration = Duration::from_secs(2);

pub const REASON_PROCESS_NOT_FOUND: &str = "process not found";
pub const REASON_SPAWN_INCOMPLETE: &str = "worker spawn did not complete";
pub const REASON_STOPPED_BY_USER: &str = "Stopped by user";

type JobKey = (i64, Channel);

pub struct JobManager {
    jobs: JobService,
    campaigns: CampaignService,
    config: AppConfig,
    worker_bin: PathBuf,
    /// Hijos lanzados por este proceso; permite reaparlos con `try_wait`.
    children: Mutex<HashMap<JobKey, Child>>,
}

impl JobManager {
    pub fn new(store: Store, config: AppConfig) -> Result<Self> {
        let worker_bin = config
            .resolve_worker_bin()
            .context("No se pudo resolver el binario del worker")?;
        std::fs::create_dir_all(&config.pids_dir)
            .with_context(|| format!("No se pudo crear {:?}", config.pids_dir))?;

        log::info!("(JobManager::new) Worker: {:?}", worker_bin);
        Ok(JobManager {
            jobs: JobService::new(store.clone()),
            campaigns: CampaignService::new(store),
            config,
            worker_bin,
            children: Mutex::new(HashMap::new()),
        })
    }

    /// `false` sin efectos si ya hay un job activo; nunca devuelve error.
    pub async fn start_campaign_background(&self, campaign_id: i64, channel: Channel) -> bool {
        if self.is_campaign_running(campaign_id, channel).await {
            log::info!(
                "(start_campaign_background) {} {} ya está en ejecución",
                channel,
                campaign_id
            );
            return false;
        }

        let job_id = match self.jobs.claim(campaign_id, channel).await {
            Ok(id) => id,
            Err(e) if e.is_unique_violation() => {
                log::info!(
                    "(start_campaign_background) {} {} ya reclamada por otro llamador",
                    channel,
                    campaign_id
                );
                return false;
            }
            Err(e) => {
                log::error!("(start_campaign_background) No se pudo registrar el job: {}", e);
                return false;
            }
        };

        let mut child = match self.spawn_worker(campaign_id, channel) {
            Ok(child) => child,
            Err(e) => {
                log::error!("(start_campaign_background) {:#}", e);
                let message = format!("spawn failed: {e:#}");
                if let Err(e) = self.jobs.finish(job_id, JobStatus::Failed, Some(&message)).await {
                    log::error!("(start_campaign_background) No se pudo cerrar el job {}: {}", job_id, e);
                }
                return false;
            }
        };

        let Some(pid) = child.id() else {
            // Ya terminó y fue reapado: su escritura final cierra el job.
            log::warn!("(start_campaign_background) El worker salió antes de registrar su pid");
            return true;
        };

        if let Err(e) = self.jobs.mark_spawned(job_id, pid).await {
            log::error!(
                "(start_campaign_background) No se pudo registrar pid {}: {}. Abortando worker",
                pid,
                e
            );
            if let Err(e) = child.start_kill() {
                log::error!("(start_campaign_background) No se pudo abortar pid {}: {}", pid, e);
            }
            let message = format!("could not record pid: {e}");
            if let Err(e) = self.jobs.finish(job_id, JobStatus::Failed, Some(&message)).await {
                log::error!("(start_campaign_background) No se pudo cerrar el job {}: {}", job_id, e);
            }
            return false;
        }

        self.children().insert((campaign_id, channel), child);
        log::info!(
            "(start_campaign_background) Campaña {} {} lanzada (job {}, pid {})",
            channel,
            campaign_id,
            job_id,
            pid
        );
        true
    }

    fn spawn_worker(&self, campaign_id: i64, channel: Channel) -> Result<Child> {
        let pid_file = self.config.pid_file_path(campaign_id, channel);
        let mut cmd = Command::new(&self.worker_bin);
        cmd.arg(campaign_id.to_string())
            .arg("--type")
            .arg(channel.as_str())
            .arg("--pid-file")
            .arg(&pid_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // Grupo propio: Ctrl-C en la terminal del servidor no llega al worker
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn()
            .with_context(|| format!("No se pudo lanzar {:?}", self.worker_bin))
    }

    /// Lectura con auto-reparación: un job `running` cuyo pid ya no existe
    /// pasa a `stopped` antes de responder.
    pub async fn is_campaign_running(&self, campaign_id: i64, channel: Channel) -> bool {
        match self.reconcile(campaign_id, channel).await {
            Ok(Some(job)) => job.status.is_active(),
            Ok(None) => false,
            Err(e) => {
                log::error!("(is_campaign_running) {:#}", e);
                false
            }
        }
    }

    async fn reconcile(&self, campaign_id: i64, channel: Channel) -> Result<Option<JobRecord>> {
        let latest = self
            .jobs
            .latest(campaign_id, channel)
            .await
            .context("Fallo al leer el último job")?;
        match latest {
            Some(job) => self.reconcile_record(job).await.map(Some),
            None => Ok(None),
        }
    }

    async fn reconcile_record(&self, job: JobRecord) -> Result<JobRecord> {
        let (status, reason) = match (job.status, job.pid) {
            (JobStatus::Running, Some(pid)) | (JobStatus::Pending, Some(pid)) => {
                if self.probe(job.campaign_id, job.channel, pid) {
                    return Ok(job);
                }
                (JobStatus::Stopped, REASON_PROCESS_NOT_FOUND)
            }
            (JobStatus::Running, None) | (JobStatus::Pending, None) => {
                if !self.is_stale_claim(&job) {
                    return Ok(job);
                }
                (JobStatus::Failed, REASON_SPAWN_INCOMPLETE)
            }
            _ => return Ok(job),
        };

        log::warn!(
            "(reconcile) Job {} ({} {}, pid {:?}): {}",
            job.id,
            job.channel,
            job.campaign_id,
            job.pid,
            reason
        );
        self.jobs
            .finish(job.id, status, Some(reason))
            .await
            .context("Fallo al reconciliar el job")?;

        // Re-lectura: si el worker cerró el job justo antes, gana su estado.
        let refreshed = self
            .jobs
            .get(job.id)
            .await
            .context("Fallo al releer el job")?;
        Ok(refreshed.unwrap_or(job))
    }

    fn is_stale_claim(&self, job: &JobRecord) -> bool {
        let Ok(started) = DateTime::parse_from_rfc3339(&job.started_at) else {
            return true;
        };
        let age = Utc::now().signed_duration_since(started.with_timezone(&Utc));
        age.to_std()
            .map(|age| age >= self.config.pending_claim_grace)
            .unwrap_or(false)
    }

    /// Liveness del pid. Los hijos propios se reapan con `try_wait`; para
    /// el resto (p. ej. lanzados antes de reiniciar el servidor) se usa
    /// la sonda del SO.
    fn probe(&self, campaign_id: i64, channel: Channel, pid: u32) -> bool {
        let key = (campaign_id, channel);
        let mut children = self.children();
        if let Some(child) = children.get_mut(&key) {
            if child.id() == Some(pid) {
                match child.try_wait() {
                    Ok(None) => return true,
                    Ok(Some(status)) => {
                        log::info!("(probe) Worker pid {} terminó: {}", pid, status);
                        children.remove(&key);
                        return false;
                    }
                    Err(e) => log::warn!("(probe) try_wait({}) falló: {}", pid, e),
                }
            } else if child.id().is_none() {
                children.remove(&key);
            }
        }
        drop(children);
        process::is_alive(pid)
    }

    /// SIGTERM, espera acotada y SIGKILL si sigue vivo. `true` si había un
    /// job activo.
    pub async fn stop_campaign(&self, campaign_id: i64, channel: Channel) -> bool {
        let job = match self.reconcile(campaign_id, channel).await {
            Ok(Some(job)) if job.status.is_active() => job,
            Ok(_) => {
                log::info!("(stop_campaign) {} {} no está en ejecución", channel, campaign_id);
                return false;
            }
            Err(e) => {
                log::error!("(stop_campaign) {:#}", e);
                return false;
            }
        };

        if let Some(pid) = job.pid {
            log::info!("(stop_campaign) SIGTERM a pid {} ({} {})", pid, channel, campaign_id);
            process::terminate(pid);
            if !self
                .wait_for_exit(campaign_id, channel, pid, self.config.stop_timeout)
                .await
            {
                log::warn!(
                    "(stop_campaign) pid {} sigue vivo tras {:?}, enviando SIGKILL",
                    pid,
                    self.config.stop_timeout
                );
                process::force_kill(pid);
                self.wait_for_exit(campaign_id, channel, pid, KILL_GRACE).await;
            }
        }
        self.children().remove(&(campaign_id, channel));

        // El worker que salió ordenadamente ya escribió "processed X/N".
        match self
            .jobs
            .finish(job.id, JobStatus::Stopped, Some(REASON_STOPPED_BY_USER))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                log::error!("(stop_campaign) No se pudo marcar el job {}: {}", job.id, e);
                true
            }
        }
    }

    async fn wait_for_exit(
        &self,
        campaign_id: i64,
        channel: Channel,
        pid: u32,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.probe(campaign_id, channel, pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(STOP_POLL_INTERVAL).await;
        }
    }

    /// Vista combinada para polling; nunca modifica la campaña.
    pub async fn get_campaign_status(&self, campaign_id: i64, channel: Channel) -> CampaignStatusView {
        let mut view = CampaignStatusView::default();

        match self.campaigns.load_campaign(campaign_id, channel).await {
            Ok(Some(campaign)) => {
                view.campaign_status = Some(campaign.status);
                view.last_updated = campaign.last_updated;
                view.processing_details = campaign.processing_details;
            }
            Ok(None) => {}
            Err(e) => log::error!("(get_campaign_status) Fallo al leer la campaña: {}", e),
        }

        match self.reconcile(campaign_id, channel).await {
            Ok(Some(job)) => {
                view.is_running = job.status.is_active();
                view.job_status = Some(job.status);
                view.pid = job.pid;
                view.started_at = Some(job.started_at);
                view.completed_at = job.completed_at;
                view.error_message = job.error_message;
            }
            Ok(None) => {}
            Err(e) => log::error!("(get_campaign_status) {:#}", e),
        }
        view
    }

    /// Jobs `running`, reconciliando los que tienen el proceso muerto.
    pub async fn get_running_campaigns(&self) -> Vec<RunningCampaign> {
        let rows = match self.jobs.list_by_status(JobStatus::Running).await {
            Ok(rows) => rows,
            Err(e) => {
                log::error!("(get_running_campaigns) {}", e);
                return Vec::new();
            }
        };

        let mut running = Vec::with_capacity(rows.len());
        for job in rows {
            match self.reconcile_record(job).await {
                Ok(JobRecord {
                    id,
                    campaign_id,
                    channel,
                    status: JobStatus::Running,
                    pid: Some(pid),
                    started_at,
                    ..
                }) => running.push(RunningCampaign {
                    job_id: id,
                    campaign_id,
                    channel,
                    pid,
                    started_at,
                }),
                Ok(_) => {}
                Err(e) => log::error!("(get_running_campaigns) {:#}", e),
            }
        }
        running
    }

    /// Borra jobs terminales más viejos que `older_than_days`. Devuelve las
    /// filas borradas (0 si falló). Historial y campañas no se tocan.
    pub async fn cleanup_completed_jobs(&self, older_than_days: u32) -> u64 {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(older_than_days)))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        match self.jobs.delete_finished_before(&cutoff).await {
            Ok(deleted) => {
                log::info!(
                    "(cleanup_completed_jobs) {} jobs borrados (anteriores a {})",
                    deleted,
                    cutoff
                );
                deleted
            }
            Err(e) => {
                log::error!("(cleanup_completed_jobs) {}", e);
                0
            }
        }
    }

    fn children(&self) -> MutexGuard<'_, HashMap<JobKey, Child>> {
        self.children.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
