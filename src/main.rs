use actix_web::{web, App, HttpServer};
use dotenv::dotenv;

use campaign_service::app;
use campaign_service::config::app_config::AppConfig;
use campaign_service::logger::init_logger;
use campaign_service::services::job_manager::JobManager;
use campaign_service::services::transaction_helper::Store;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = AppConfig::from_env();

    // Carpeta de la base (p. ej. ./private)
    if let Some(dir) = config.database_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    log::info!("Usando SQLite en {:?}", config.database_path);

    let store = Store::open(&config.database_path, config.db_busy_timeout);
    if let Err(e) = store.run_migrations().await {
        log::error!("Fallo en migraciones: {:#}", e);
        return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
    }

    // Una única instancia compartida por todos los handlers
    let job_manager = match JobManager::new(store.clone(), config.clone()) {
        Ok(manager) => web::Data::new(manager),
        Err(e) => {
            log::error!("No se pudo inicializar JobManager: {:#}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };
    let store = web::Data::new(store);

    let bind = (config.server_host.clone(), config.server_port);
    log::info!("Levantando servidor en {}:{}", bind.0, bind.1);
    HttpServer::new(move || {
        App::new()
            .app_data(job_manager.clone())
            .app_data(store.clone())
            .configure(app::init_app)
    })
    .workers(1)
    .bind(bind)?
    .run()
    .await
}
