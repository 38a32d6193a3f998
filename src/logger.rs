//! logger.rs
//! Configuración del logger usando env_logger.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};

fn filter() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

pub fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter()))
        .format_timestamp_secs()
        .init();
}

/// Logger del worker: cada línea va a consola y al log de la corrida (append).
pub fn init_worker_logger(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("No se pudo crear {:?}", dir))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("No se pudo abrir el log {:?}", path))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter()))
        .format_timestamp_secs()
        .target(env_logger::Target::Pipe(Box::new(Tee { file })))
        .try_init()
        .context("Logger ya inicializado")?;
    Ok(())
}

/// Escribe en el archivo y en stderr.
struct Tee {
    file: fs::File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}
