//! services/campaign_worker.rs
//! Bucle de envío de una campaña (un proceso por campaña). Cada destinatario
//! se procesa de forma aislada: un fallo de entrega queda en el historial y
//! el bucle sigue con el siguiente.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;

use crate::config::app_config::AppConfig;
use crate::config::settings::Settings;
use crate::models::campaign_model::{
    Campaign, CampaignContent, CampaignStatus, Channel, DeliveryOutcome, NewHistoryRecord,
    OutboundMessage, Recipient,
};
use crate::models::job_model::JobStatus;
use crate::services::campaign_service::CampaignService;
use crate::services::delivery::{transport_from_settings, ProviderSetup};
use crate::services::job_service::JobService;
use crate::services::retry::{retry_with_backoff, Reachability, RetryPolicy};
use crate::services::transaction_helper::{Store, StoreError};

pub const MSG_CAMPAIGN_NOT_FOUND: &str = "campaign not found";
pub const MSG_NO_RECIPIENTS: &str = "no valid recipients";

/// Bandera de cancelación cooperativa. El bucle la consulta entre
/// destinatarios; las esperas entre envíos se despiertan al activarla.
#[derive(Debug)]
pub struct StopSignal {
    running: AtomicBool,
    interrupted: AtomicBool,
    notify: Notify,
}

impl Default for StopSignal {
    fn default() -> Self {
        StopSignal {
            running: AtomicBool::new(true),
            interrupted: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }
}

impl StopSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// SIGTERM / petición del Job Manager.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// SIGINT: igual que un stop, pero el proceso sale con 130.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.request_stop();
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Duerme `duration` o hasta que se pida parar. `true` si completó la espera.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = notified => false,
        }
    }
}

/// SIGTERM → stop; SIGINT (Ctrl-C) → interrupt.
pub fn install_signal_handlers(stop: Arc<StopSignal>) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        let on_term = stop.clone();
        tokio::spawn(async move {
            while term.recv().await.is_some() {
                log::info!("(signal) SIGTERM recibido, se detendrá tras el envío en curso");
                on_term.request_stop();
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("(signal) Interrumpido por el usuario");
            stop.interrupt();
        }
    });
    Ok(())
}

/// Sustituye `{{name}}`, `{{email}}` y `{{mobile}}`; los campos ausentes quedan vacíos.
/// Una sola pasada: lo insertado no se vuelve a examinar.
pub fn personalize(template: &str, recipient: &Recipient) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let token = tail
            .find("}}")
            .map(|end| (&tail[2..end], end + 2))
            .and_then(|(key, len)| {
                let value = match key {
                    "name" => recipient.name.as_str(),
                    "email" => recipient.email.as_deref().unwrap_or(""),
                    "mobile" => recipient.mobile.as_deref().unwrap_or(""),
                    _ => return None,
                };
                Some((value, len))
            });
        match token {
            Some((value, len)) => {
                out.push_str(value);
                rest = &tail[len..];
            }
            None => {
                out.push_str("{{");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn personalize_content(content: &CampaignContent, recipient: &Recipient) -> OutboundMessage {
    match content {
        CampaignContent::Email { subject, body } => OutboundMessage::Email {
            subject: personalize(subject, recipient),
            body: personalize(body, recipient),
        },
        CampaignContent::Sms { message } => OutboundMessage::Sms {
            text: personalize(message, recipient),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed { sent: usize, failed: usize },
    NoRecipients,
    Stopped { processed: usize, total: usize },
    Failed { reason: String },
}

impl WorkerOutcome {
    /// 0 éxito, 1 fallo, 130 interrumpido por el usuario.
    pub fn exit_code(&self, interrupted: bool) -> u8 {
        match self {
            WorkerOutcome::Failed { .. } => 1,
            WorkerOutcome::Stopped { .. } if interrupted => 130,
            _ => 0,
        }
    }
}

pub struct CampaignWorker {
    campaign_id: i64,
    channel: Channel,
    campaigns: CampaignService,
    jobs: JobService,
    settings: Settings,
    provider: Option<ProviderSetup>,
    retry: RetryPolicy,
    interval: Duration,
    reachability: Option<Reachability>,
    stop: Arc<StopSignal>,
}

impl CampaignWorker {
    pub fn new(
        store: Store,
        campaign_id: i64,
        channel: Channel,
        settings: Settings,
        config: &AppConfig,
        stop: Arc<StopSignal>,
    ) -> Self {
        CampaignWorker {
            campaign_id,
            channel,
            campaigns: CampaignService::new(store.clone()),
            jobs: JobService::new(store),
            settings,
            provider: None,
            retry: config.delivery_retry_policy(),
            interval: config.send_interval(channel),
            reachability: config.reachability(),
            stop,
        }
    }

    /// Fija el transporte en lugar de resolverlo desde los settings.
    pub fn with_transport(mut self, provider: ProviderSetup) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_reachability(mut self, reachability: Option<Reachability>) -> Self {
        self.reachability = reachability;
        self
    }

    pub async fn run(&self) -> WorkerOutcome {
        log::info!(
            "(run) Iniciando campaña {} {} (pid {})",
            self.channel,
            self.campaign_id,
            std::process::id()
        );

        // 1) Campaña
        let campaign = match self.campaigns.load_campaign(self.campaign_id, self.channel).await {
            Ok(Some(campaign)) => campaign,
            Ok(None) => {
                log::error!("(run) Campaña {} no encontrada", self.campaign_id);
                return self.fail(MSG_CAMPAIGN_NOT_FOUND.to_string()).await;
            }
            Err(e) => {
                log::error!("(run) No se pudo leer la campaña: {}", e);
                return self.fail(format!("could not load campaign: {e}")).await;
            }
        };

        if campaign.status.is_terminal() {
            let reason = format!("campaign is {}; reset to draft to rerun", campaign.status);
            log::warn!("(run) {}", reason);
            self.close_job(JobStatus::Failed, &reason).await;
            return WorkerOutcome::Failed { reason };
        }
        log::info!("(run) Procesando campaña '{}'", campaign.name);

        // 2) Destinatarios
        let recipients = match self.valid_recipients().await {
            Ok(recipients) => recipients,
            Err(e) => return self.fail(format!("could not load recipients: {e}")).await,
        };
        if recipients.is_empty() {
            log::warn!("(run) Sin destinatarios válidos");
            self.finish(CampaignStatus::Completed, MSG_NO_RECIPIENTS).await;
            return WorkerOutcome::NoRecipients;
        }

        // 3) Proveedor
        let resolved;
        let provider = match &self.provider {
            Some(provider) => provider,
            None => match transport_from_settings(self.channel, &self.settings) {
                Ok(provider) => {
                    resolved = provider;
                    &resolved
                }
                Err(e) => {
                    log::error!("(run) Configuración de proveedor inválida: {}", e);
                    return self.fail(format!("invalid provider configuration: {e}")).await;
                }
            },
        };
        log::info!(
            "(run) {} destinatarios vía {}",
            recipients.len(),
            provider.transport.name()
        );

        self.send_all(&campaign, &recipients, provider).await
    }

    async fn valid_recipients(&self) -> Result<Vec<Recipient>, StoreError> {
        let loaded = self
            .campaigns
            .load_recipients(self.campaign_id, self.channel)
            .await?;
        let total = loaded.len();
        let valid: Vec<Recipient> = loaded
            .into_iter()
            .filter(|r| {
                self.channel
                    .destination(r)
                    .map(|d| self.channel.is_valid_destination(d))
                    .unwrap_or(false)
            })
            .collect();
        if valid.len() < total {
            log::warn!(
                "(valid_recipients) {} destinatarios con destino inválido omitidos",
                total - valid.len()
            );
        }
        Ok(valid)
    }

    async fn send_all(
        &self,
        campaign: &Campaign,
        recipients: &[Recipient],
        provider: &ProviderSetup,
    ) -> WorkerOutcome {
        let total = recipients.len();
        let (mut sent, mut failed) = (0usize, 0usize);
        self.write_status(CampaignStatus::Running, &format!("0% - starting ({total} recipients)"))
            .await;

        for (index, recipient) in recipients.iter().enumerate() {
            if !self.stop.is_running() {
                let message = format!("processed {index}/{total}");
                log::info!("(send_all) Campaña detenida: {}", message);
                self.finish(CampaignStatus::Stopped, &message).await;
                return WorkerOutcome::Stopped {
                    processed: index,
                    total,
                };
            }

            let Some(destination) = self.channel.destination(recipient) else {
                continue;
            };
            let content = personalize_content(&campaign.content, recipient);
            let result = self.deliver(provider, destination, &content).await;

            let position = index + 1;
            let percent = position * 100 / total;
            let (outcome, error, progress) = match result {
                Ok(()) => {
                    sent += 1;
                    log::info!(
                        "(send_all) {}% - enviado a {} ({}) - {}/{}",
                        percent,
                        recipient.name,
                        destination,
                        position,
                        total
                    );
                    (
                        DeliveryOutcome::Sent,
                        None,
                        format!(
                            "{percent}% - sent to {} <{destination}> ({position}/{total})",
                            recipient.name
                        ),
                    )
                }
                Err(e) => {
                    failed += 1;
                    log::error!(
                        "(send_all) Fallo al enviar a {} ({}): {}",
                        recipient.name,
                        destination,
                        e
                    );
                    (
                        DeliveryOutcome::Failed,
                        Some(e),
                        format!(
                            "{percent}% - failed for {} <{destination}> ({position}/{total})",
                            recipient.name
                        ),
                    )
                }
            };

            let record = NewHistoryRecord {
                campaign_id: self.campaign_id,
                contact_id: recipient.id,
                outcome,
                error,
                content,
            };
            if let Err(e) = self.campaigns.append_history(&record).await {
                log::error!("(send_all) No se pudo registrar el historial de {}: {}", recipient.id, e);
            }
            self.write_status(CampaignStatus::Running, &progress).await;

            if position < total {
                self.stop.sleep(self.interval).await;
            }
        }

        let summary = format!("sent={sent}, failed={failed}");
        log::info!("(send_all) Campaña completada: {}", summary);
        self.finish(CampaignStatus::Completed, &summary).await;
        WorkerOutcome::Completed { sent, failed }
    }

    /// Un envío con reintentos. Los pánicos del transporte cuentan como fallo
    /// de este destinatario.
    async fn deliver(
        &self,
        provider: &ProviderSetup,
        destination: &str,
        content: &OutboundMessage,
    ) -> Result<(), String> {
        if let Some(reachability) = &self.reachability {
            if !reachability.wait_until_online().await {
                return Err("network unreachable".to_string());
            }
        }

        let attempt = retry_with_backoff(&self.retry, || {
            provider
                .transport
                .send(destination, content, &provider.sender)
        });
        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("unexpected error: {}", panic_message(panic.as_ref()))),
        }
    }

    async fn write_status(&self, status: CampaignStatus, details: &str) {
        if let Err(e) = self
            .campaigns
            .update_status(self.campaign_id, self.channel, status, Some(details))
            .await
        {
            log::error!("(write_status) No se pudo escribir '{}': {}", status, e);
        }
    }

    async fn close_job(&self, status: JobStatus, message: &str) {
        if let Err(e) = self
            .jobs
            .finish_for_campaign(
                self.campaign_id,
                self.channel,
                std::process::id(),
                status,
                Some(message),
            )
            .await
        {
            log::error!("(close_job) No se pudo cerrar el job: {}", e);
        }
    }

    /// Escritura final: campaña + su entrada en el registro de jobs.
    async fn finish(&self, status: CampaignStatus, message: &str) {
        self.write_status(status, message).await;
        let job_status = match status {
            CampaignStatus::Completed => JobStatus::Completed,
            CampaignStatus::Stopped => JobStatus::Stopped,
            _ => JobStatus::Failed,
        };
        self.close_job(job_status, message).await;
    }

    async fn fail(&self, reason: String) -> WorkerOutcome {
        self.finish(CampaignStatus::Failed, &reason).await;
        WorkerOutcome::Failed { reason }
    }
}

/// Error fatal fuera del bucle (settings ilegibles, pid file, señales):
/// marca campaña y job como `failed` con el motivo. Best-effort.
pub async fn record_fatal_error(store: &Store, campaign_id: i64, channel: Channel, reason: &str) {
    let campaigns = CampaignService::new(store.clone());
    if let Err(e) = campaigns
        .update_status(campaign_id, channel, CampaignStatus::Failed, Some(reason))
        .await
    {
        log::error!("(record_fatal_error) No se pudo marcar la campaña: {}", e);
    }

    let jobs = JobService::new(store.clone());
    if let Err(e) = jobs
        .finish_for_campaign(
            campaign_id,
            channel,
            std::process::id(),
            JobStatus::Failed,
            Some(reason),
        )
        .await
    {
        log::error!("(record_fatal_error) No se pudo cerrar el job: {}", e);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ana() -> Recipient {
        Recipient {
            id: 1,
            name: "Ana".into(),
            email: Some("ana@example.com".into()),
            mobile: None,
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        assert_eq!(
            personalize("Hola {{name}} ({{email}}) {{mobile}}!", &ana()),
            "Hola Ana (ana@example.com) !"
        );
        assert_eq!(personalize("sin marcas", &ana()), "sin marcas");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let tricky = Recipient {
            id: 2,
            name: "{{email}} {{mobile}}".into(),
            email: Some("x@example.com".into()),
            mobile: Some("+15550100200".into()),
        };
        assert_eq!(
            personalize("Hola {{name}} <{{email}}>", &tricky),
            "Hola {{email}} {{mobile}} <x@example.com>"
        );
        assert_eq!(
            personalize("{{desconocido}} y {{ abierto", &ana()),
            "{{desconocido}} y {{ abierto"
        );
    }

    #[test]
    fn email_content_is_personalized_in_subject_and_body() {
        let content = CampaignContent::Email {
            subject: "Para {{name}}".into(),
            body: "Escríbenos a {{email}}".into(),
        };
        assert_eq!(
            personalize_content(&content, &ana()),
            OutboundMessage::Email {
                subject: "Para Ana".into(),
                body: "Escríbenos a ana@example.com".into(),
            }
        );
    }

    #[test]
    fn exit_codes() {
        assert_eq!(WorkerOutcome::Completed { sent: 1, failed: 0 }.exit_code(false), 0);
        assert_eq!(WorkerOutcome::Failed { reason: "x".into() }.exit_code(false), 1);
        assert_eq!(WorkerOutcome::Failed { reason: "x".into() }.exit_code(true), 1);
        assert_eq!(WorkerOutcome::Stopped { processed: 1, total: 3 }.exit_code(false), 0);
        assert_eq!(WorkerOutcome::Stopped { processed: 1, total: 3 }.exit_code(true), 130);
    }

    #[tokio::test]
    async fn stop_wakes_a_sleeping_worker() {
        let stop = StopSignal::new();
        let waker = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.request_stop();
        });
        let start = std::time::Instant::now();
        assert!(!stop.sleep(Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!stop.is_running());
    }

    #[tokio::test]
    async fn sleep_completes_without_stop() {
        let stop = StopSignal::new();
        assert!(stop.sleep(Duration::from_millis(5)).await);
        assert!(!stop.was_interrupted());
    }
}
