//! bin/campaign_worker.rs
//! Proceso independiente que ejecuta una campaña de principio a fin.
//! Salida: 0 éxito, 1 fallo, 130 interrumpido por el usuario.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;

use campaign_service::config::app_config::AppConfig;
use campaign_service::config::settings::Settings;
use campaign_service::logger::init_worker_logger;
use campaign_service::models::campaign_model::Channel;
use campaign_service::services::campaign_worker::{
    install_signal_handlers, record_fatal_error, CampaignWorker, StopSignal, WorkerOutcome,
};
use campaign_service::services::pid_file::PidFileGuard;
use campaign_service::services::transaction_helper::Store;

#[derive(Debug, Parser)]
#[command(name = "campaign_worker", about = "Procesa una campaña de email o SMS en segundo plano")]
struct Args {
    /// Id de la campaña
    campaign_id: i64,

    /// Tipo de campaña
    #[arg(long = "type", value_enum, default_value_t = Channel::Email)]
    channel: Channel,

    /// Archivo donde escribir el pid del proceso
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let args = Args::parse();
    let config = AppConfig::from_env();

    let log_path = config.worker_log_path(args.campaign_id, args.channel);
    if let Err(e) = init_worker_logger(&log_path) {
        eprintln!("No se pudo inicializar el log en {:?}: {:#}", log_path, e);
    }

    let stop = StopSignal::new();
    match run(&args, &config, stop.clone()).await {
        Ok(outcome) => {
            let code = outcome.exit_code(stop.was_interrupted());
            log::info!("(main) Resultado: {:?} (exit {})", outcome, code);
            ExitCode::from(code)
        }
        Err(e) => {
            log::error!("(main) Error fatal: {:#}", e);
            let store = Store::open(&config.database_path, config.db_busy_timeout);
            let reason = format!("unexpected error: {e:#}");
            record_fatal_error(&store, args.campaign_id, args.channel, &reason).await;
            ExitCode::from(1)
        }
    }
}

async fn run(args: &Args, config: &AppConfig, stop: std::sync::Arc<StopSignal>) -> Result<WorkerOutcome> {
    // Se borra en cualquier camino de salida de esta función
    let _pid_guard = args
        .pid_file
        .as_deref()
        .map(PidFileGuard::create)
        .transpose()?;

    install_signal_handlers(stop.clone()).context("No se pudieron instalar los manejadores de señales")?;

    let store = Store::open(&config.database_path, config.db_busy_timeout);
    let settings = Settings::load(&config.settings_path)?;

    let worker = CampaignWorker::new(store, args.campaign_id, args.channel, settings, config, stop);
    Ok(worker.run().await)
}
