//! tests/common.rs
//! Helpers compartidos: base temporal con migraciones, datos de prueba y
//! un worker falso para el Job Manager.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use crate::config::app_config::AppConfig;
use crate::models::campaign_model::Channel;
use crate::services::transaction_helper::{Statement, Store};

pub struct TestEnv {
    pub dir: TempDir,
    pub store: Store,
    pub config: AppConfig,
}

pub async fn test_env() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let database_path = dir.path().join("contacts.db");
    let store = Store::open(&database_path, Duration::from_secs(5));
    store.run_migrations().await.unwrap();

    let config = AppConfig {
        database_path,
        settings_path: dir.path().join("settings.json"),
        logs_dir: dir.path().join("logs"),
        pids_dir: dir.path().join("pids"),
        worker_bin: Some(fake_worker(dir.path())),
        stop_timeout: Duration::from_secs(3),
        email_interval: Duration::ZERO,
        sms_interval: Duration::ZERO,
        connectivity_check: false,
        ..AppConfig::default()
    };
    TestEnv { dir, store, config }
}

/// Script que ignora sus argumentos y duerme; `exec` deja su pid en `sleep`.
#[cfg(unix)]
fn fake_worker(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake_worker.sh");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(not(unix))]
fn fake_worker(dir: &Path) -> PathBuf {
    dir.join("fake_worker")
}

/// Pid de un proceso que ya terminó y fue reapado.
pub fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

pub async fn insert_contact(store: &Store, name: &str, email: Option<&str>, mobile: Option<&str>) -> i64 {
    store
        .insert(
            &Statement::new("INSERT INTO contacts (name, email, mobile) VALUES (?1, ?2, ?3)")
                .bind(name)
                .bind(email)
                .bind(mobile),
        )
        .await
        .unwrap()
}

pub async fn insert_email_campaign(store: &Store, name: &str, subject: &str, body: &str, status: &str) -> i64 {
    store
        .insert(
            &Statement::new(
                "INSERT INTO email_campaigns (name, subject, body, status) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(name)
            .bind(subject)
            .bind(body)
            .bind(status),
        )
        .await
        .unwrap()
}

pub async fn insert_sms_campaign(store: &Store, name: &str, message: &str) -> i64 {
    store
        .insert(
            &Statement::new("INSERT INTO sms_campaigns (name, message) VALUES (?1, ?2)")
                .bind(name)
                .bind(message),
        )
        .await
        .unwrap()
}

pub async fn link(store: &Store, channel: Channel, campaign_id: i64, contact_id: i64) {
    let sql = format!(
        "INSERT INTO {} (campaign_id, contact_id) VALUES (?1, ?2)",
        channel.contacts_table()
    );
    store
        .execute(&Statement::new(sql).bind(campaign_id).bind(contact_id))
        .await
        .unwrap();
}

/// Campaña de email en draft con Ana, Bruno y Carla.
pub async fn seed_email_campaign(store: &Store) -> i64 {
    let campaign_id =
        insert_email_campaign(store, "Lanzamiento", "Hola {{name}}", "Tu correo: {{email}}", "draft").await;
    for (name, email) in [
        ("Carla", "carla@example.com"),
        ("Ana", "ana@example.com"),
        ("Bruno", "bruno@example.com"),
    ] {
        let contact_id = insert_contact(store, name, Some(email), None).await;
        link(store, Channel::Email, campaign_id, contact_id).await;
    }
    campaign_id
}
