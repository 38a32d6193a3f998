//! models/job_model.rs
//! Registro de procesos de fondo y vistas de estado.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::campaign_model::{CampaignStatus, Channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    /// `pending` (claim sin pid todavía) o `running`.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "stopped" => Ok(JobStatus::Stopped),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Fila de `background_jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: i64,
    pub campaign_id: i64,
    pub channel: Channel,
    pub status: JobStatus,
    pub pid: Option<u32>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningCampaign {
    pub job_id: i64,
    pub campaign_id: i64,
    pub channel: Channel,
    pub pid: u32,
    pub started_at: String,
}

/// Vista de sólo lectura para polling: campaña + job + liveness.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignStatusView {
    /// `None` cuando la campaña no existe.
    pub campaign_status: Option<CampaignStatus>,
    pub last_updated: Option<String>,
    pub processing_details: Option<String>,
    pub job_status: Option<JobStatus>,
    pub pid: Option<u32>,
    pub is_running: bool,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

/// Respuesta genérica de las acciones sobre jobs
#[derive(Debug, Clone, Serialize)]
pub struct JobActionResponse {
    pub success: bool,
    pub campaign_id: i64,
    pub channel: Channel,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupQuery {
    pub older_than_days: Option<u32>,
}
