//! config/settings.rs
//! Settings de proveedores (credenciales, remitente). Archivo JSON plano de
//! sólo lectura; el worker lo resuelve una vez al arrancar.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    /// Si el archivo no existe se devuelven settings vacíos; la validación
    /// del proveedor reporta luego qué falta.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::warn!("(Settings::load) No existe {:?}, usando settings vacíos", path);
            return Ok(Settings::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("No se pudo leer settings en {:?}", path))?;
        Self::from_json(&raw).with_context(|| format!("Settings inválidos en {:?}", path))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, Value> = serde_json::from_str(raw)?;
        let values = parsed
            .into_iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((key, text))
            })
            .collect();
        Ok(Settings { values })
    }

    /// Valor no vacío (recortado) para `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn email_method(&self) -> &str {
        self.get("email_method").unwrap_or("SMTP")
    }

    pub fn sms_method(&self) -> &str {
        self.get("sms_method").unwrap_or("Twilio")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Settings {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_read_as_text_and_blanks_ignored() {
        let settings = Settings::from_json(
            r#"{"smtp_server": "smtp.example.com", "smtp_port": 587, "sender_name": "  ", "tags": []}"#,
        )
        .unwrap();
        assert_eq!(settings.get("smtp_server"), Some("smtp.example.com"));
        assert_eq!(settings.get("smtp_port"), Some("587"));
        assert_eq!(settings.get("sender_name"), None);
        assert_eq!(settings.get("tags"), None);
    }

    #[test]
    fn provider_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.email_method(), "SMTP");
        assert_eq!(settings.sms_method(), "Twilio");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.get("sender_email"), None);
    }
}
