//! config/app_config.rs
//! Configuración del proceso (servidor y worker), leída de variables de entorno.
//! `.env` se carga con dotenv antes de llamar a `AppConfig::from_env`.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::models::campaign_model::Channel;
use crate::services::retry::{Reachability, RetryPolicy};

const WORKER_BIN_NAME: &str = "campaign_worker";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub settings_path: PathBuf,
    pub logs_dir: PathBuf,
    pub pids_dir: PathBuf,
    pub worker_bin: Option<PathBuf>,
    pub server_host: String,
    pub server_port: u16,
    pub stop_timeout: Duration,
    pub db_busy_timeout: Duration,
    pub email_interval: Duration,
    pub sms_interval: Duration,
    pub delivery_max_retries: u32,
    pub delivery_base_delay: Duration,
    pub delivery_max_delay: Duration,
    pub connectivity_check: bool,
    pub connectivity_probe_addr: String,
    pub connectivity_poll: Duration,
    pub connectivity_max_wait: Duration,
    pub pending_claim_grace: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("private").join("contacts.db"),
            settings_path: PathBuf::from("private").join("settings.json"),
            logs_dir: PathBuf::from("logs"),
            pids_dir: PathBuf::from("pids"),
            worker_bin: None,
            server_host: "0.0.0.0".to_string(),
            server_port: 5022,
            stop_timeout: Duration::from_secs(10),
            db_busy_timeout: Duration::from_millis(10_000),
            email_interval: Duration::from_millis(2_000),
            sms_interval: Duration::from_millis(3_000),
            delivery_max_retries: 3,
            delivery_base_delay: Duration::from_millis(1_000),
            delivery_max_delay: Duration::from_millis(30_000),
            connectivity_check: true,
            connectivity_probe_addr: "8.8.8.8:53".to_string(),
            connectivity_poll: Duration::from_secs(5),
            connectivity_max_wait: Duration::from_secs(60),
            pending_claim_grace: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let d = AppConfig::default();
        AppConfig {
            database_path: env_path("CAMPAIGN_DB_PATH", d.database_path),
            settings_path: env_path("SETTINGS_FILE", d.settings_path),
            logs_dir: env_path("LOGS_DIR", d.logs_dir),
            pids_dir: env_path("PIDS_DIR", d.pids_dir),
            worker_bin: env::var("CAMPAIGN_WORKER_BIN").ok().map(PathBuf::from),
            server_host: env::var("SERVER_HOST").unwrap_or(d.server_host),
            server_port: env_parse("SERVER_PORT", d.server_port),
            stop_timeout: Duration::from_secs(env_parse("STOP_TIMEOUT_SECS", 10)),
            db_busy_timeout: Duration::from_millis(env_parse("DB_BUSY_TIMEOUT_MS", 10_000)),
            email_interval: Duration::from_millis(env_parse("EMAIL_INTERVAL_MS", 2_000)),
            sms_interval: Duration::from_millis(env_parse("SMS_INTERVAL_MS", 3_000)),
            delivery_max_retries: env_parse("DELIVERY_MAX_RETRIES", d.delivery_max_retries),
            delivery_base_delay: Duration::from_millis(env_parse("DELIVERY_BASE_DELAY_MS", 1_000)),
            delivery_max_delay: Duration::from_millis(env_parse("DELIVERY_MAX_DELAY_MS", 30_000)),
            connectivity_check: env_bool("CONNECTIVITY_CHECK", d.connectivity_check),
            connectivity_probe_addr: env::var("CONNECTIVITY_PROBE_ADDR")
                .unwrap_or(d.connectivity_probe_addr),
            connectivity_poll: Duration::from_secs(env_parse("CONNECTIVITY_POLL_SECS", 5)),
            connectivity_max_wait: Duration::from_secs(env_parse("CONNECTIVITY_MAX_WAIT_SECS", 60)),
            pending_claim_grace: Duration::from_secs(env_parse("PENDING_CLAIM_GRACE_SECS", 30)),
        }
    }

    /// Pausa entre destinatarios para respetar los límites del proveedor.
    pub fn send_interval(&self, channel: Channel) -> Duration {
        match channel {
            Channel::Email => self.email_interval,
            Channel::Sms => self.sms_interval,
        }
    }

    pub fn delivery_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.delivery_max_retries,
            self.delivery_base_delay,
            self.delivery_max_delay,
        )
    }

    pub fn reachability(&self) -> Option<Reachability> {
        self.connectivity_check.then(|| {
            Reachability::new(
                self.connectivity_probe_addr.clone(),
                self.connectivity_poll,
                self.connectivity_max_wait,
            )
        })
    }

    pub fn worker_log_path(&self, campaign_id: i64, channel: Channel) -> PathBuf {
        self.logs_dir
            .join(format!("campaign_processor_{}_{}.log", channel, campaign_id))
    }

    pub fn pid_file_path(&self, campaign_id: i64, channel: Channel) -> PathBuf {
        self.pids_dir.join(format!("{}_{}.pid", channel, campaign_id))
    }

    /// Binario del worker: `CAMPAIGN_WORKER_BIN`, el que está junto al
    /// ejecutable actual, o el que encuentre `which` en el PATH.
    pub fn resolve_worker_bin(&self) -> Result<PathBuf> {
        if let Some(path) = &self.worker_bin {
            return Ok(path.clone());
        }

        let file_name = format!("{}{}", WORKER_BIN_NAME, env::consts::EXE_SUFFIX);
        if let Some(dir) = env::current_exe().ok().as_deref().and_then(Path::parent) {
            let sibling = dir.join(&file_name);
            if sibling.is_file() {
                return Ok(sibling);
            }
        }

        which::which(WORKER_BIN_NAME)
            .map_err(|e| anyhow!("No se encontró el binario {WORKER_BIN_NAME}: {e}"))
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Valor inválido para {}='{}', usando el default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_per_channel() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.send_interval(Channel::Email), Duration::from_secs(2));
        assert_eq!(cfg.send_interval(Channel::Sms), Duration::from_secs(3));
    }

    #[test]
    fn per_run_paths() {
        let cfg = AppConfig {
            logs_dir: PathBuf::from("/var/log/hub"),
            pids_dir: PathBuf::from("/run/hub"),
            ..AppConfig::default()
        };
        assert_eq!(
            cfg.worker_log_path(7, Channel::Sms),
            PathBuf::from("/var/log/hub/campaign_processor_sms_7.log")
        );
        assert_eq!(
            cfg.pid_file_path(7, Channel::Email),
            PathBuf::from("/run/hub/email_7.pid")
        );
    }

    #[test]
    fn explicit_worker_bin_wins() {
        let cfg = AppConfig {
            worker_bin: Some(PathBuf::from("/opt/hub/campaign_worker")),
            ..AppConfig::default()
        };
        assert_eq!(
            cfg.resolve_worker_bin().unwrap(),
            PathBuf::from("/opt/hub/campaign_worker")
        );
    }

    #[test]
    fn reachability_disabled() {
        let cfg = AppConfig {
            connectivity_check: false,
            ..AppConfig::default()
        };
        assert!(cfg.reachability().is_none());
    }
}
