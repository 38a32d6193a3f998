//! services/job_service.rs
//! Acceso a `background_jobs`: claim, transiciones y limpieza.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::models::campaign_model::Channel;
use crate::models::job_model::{JobRecord, JobStatus};
use crate::models::now_rfc3339;
use crate::services::transaction_helper::{Statement, Store, StoreError};

const JOB_COLUMNS: &str =
    "id, campaign_id, campaign_type, status, pid, started_at, completed_at, error_message";

#[derive(Debug, Clone)]
pub struct JobService {
    store: Store,
}

impl JobService {
    pub fn new(store: Store) -> Self {
        JobService { store }
    }

    /// Inserta una fila `pending`. Si ya hay un job activo para el par, el
    /// índice único parcial lo rechaza (`StoreError::is_unique_violation`).
    pub async fn claim(&self, campaign_id: i64, channel: Channel) -> Result<i64, StoreError> {
        self.store
            .insert(
                &Statement::new(
                    r#"
                    INSERT INTO background_jobs (campaign_id, campaign_type, status, started_at)
                    VALUES (?1, ?2, 'pending', ?3)
                    "#,
                )
                .bind(campaign_id)
                .bind(channel.as_str())
                .bind(now_rfc3339()),
            )
            .await
    }

    /// Guarda el pid y pasa a `running`, salvo que el worker ya haya cerrado el job.
    pub async fn mark_spawned(&self, job_id: i64, pid: u32) -> Result<u64, StoreError> {
        self.store
            .execute(
                &Statement::new(
                    r#"
                    UPDATE background_jobs
                    SET pid = ?1,
                        status = CASE WHEN status = 'pending' THEN 'running' ELSE status END
                    WHERE id = ?2
                    "#,
                )
                .bind(pid)
                .bind(job_id),
            )
            .await
    }

    pub async fn latest(
        &self,
        campaign_id: i64,
        channel: Channel,
    ) -> Result<Option<JobRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM background_jobs
            WHERE campaign_id = ?1 AND campaign_type = ?2
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#
        );
        self.store
            .fetch_optional(
                &Statement::new(sql).bind(campaign_id).bind(channel.as_str()),
                job_from_row,
            )
            .await
    }

    pub async fn get(&self, job_id: i64) -> Result<Option<JobRecord>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM background_jobs WHERE id = ?1");
        self.store
            .fetch_optional(&Statement::new(sql).bind(job_id), job_from_row)
            .await
    }

    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM background_jobs
            WHERE status = ?1
            ORDER BY started_at, id
            "#
        );
        self.store
            .fetch_all(&Statement::new(sql).bind(status.as_str()), job_from_row)
            .await
    }

    /// Cierra un job concreto. Sólo afecta filas todavía activas, así que
    /// nunca pisa el estado final que escribió el worker.
    pub async fn finish(
        &self,
        job_id: i64,
        status: JobStatus,
        message: Option<&str>,
    ) -> Result<u64, StoreError> {
        self.store
            .execute(
                &Statement::new(
                    r#"
                    UPDATE background_jobs
                    SET status = ?1, completed_at = ?2, error_message = ?3
                    WHERE id = ?4 AND status IN ('pending', 'running')
                    "#,
                )
                .bind(status.as_str())
                .bind(now_rfc3339())
                .bind(message)
                .bind(job_id),
            )
            .await
    }

    /// Escritura final del worker: cierra el job activo de su (campaña, canal).
    pub async fn finish_for_campaign(
        &self,
        campaign_id: i64,
        channel: Channel,
        pid: u32,
        status: JobStatus,
        message: Option<&str>,
    ) -> Result<u64, StoreError> {
        self.store
            .execute(
                &Statement::new(
                    r#"
                    UPDATE background_jobs
                    SET status = ?1, completed_at = ?2, error_message = ?3,
                        pid = COALESCE(pid, ?4)
                    WHERE campaign_id = ?5 AND campaign_type = ?6
                      AND status IN ('pending', 'running')
                    "#,
                )
                .bind(status.as_str())
                .bind(now_rfc3339())
                .bind(message)
                .bind(pid)
                .bind(campaign_id)
                .bind(channel.as_str()),
            )
            .await
    }

    /// Borra jobs terminales cuyo `completed_at` es anterior a `cutoff` (RFC 3339).
    pub async fn delete_finished_before(&self, cutoff: &str) -> Result<u64, StoreError> {
        self.store
            .execute(
                &Statement::new(
                    r#"
                    DELETE FROM background_jobs
                    WHERE status IN ('completed', 'failed', 'stopped')
                      AND completed_at IS NOT NULL
                      AND completed_at < ?1
                    "#,
                )
                .bind(cutoff),
            )
            .await
    }
}

fn job_from_row(row: &SqliteRow) -> Result<JobRecord, sqlx::Error> {
    let decode = |column: &str, e: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    };
    let channel: Channel = row
        .try_get::<String, _>("campaign_type")?
        .parse()
        .map_err(|e| decode("campaign_type", e))?;
    let status: JobStatus = row
        .try_get::<String, _>("status")?
        .parse()
        .map_err(|e| decode("status", e))?;
    let pid = row
        .try_get::<Option<i64>, _>("pid")?
        .and_then(|p| u32::try_from(p).ok());

    Ok(JobRecord {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        channel,
        status,
        pid,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
    })
}
