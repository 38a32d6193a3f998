//! services/pid_file.rs
//! Archivo con el pid del worker. Se escribe al arrancar y se borra al
//! salir de scope, por cualquier camino de salida.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("No se pudo crear {:?}", dir))?;
        }
        fs::write(path, std::process::id().to_string())
            .with_context(|| format!("No se pudo escribir el pid en {:?}", path))?;
        Ok(PidFileGuard {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Borra el archivo de pid al salir de scope
impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
