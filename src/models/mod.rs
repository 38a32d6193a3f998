//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod campaign_model;
pub mod job_model;

use chrono::{SecondsFormat, Utc};

/// Timestamp RFC 3339 en UTC con milisegundos; comparable como texto.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
