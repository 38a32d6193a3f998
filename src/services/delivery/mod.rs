//! services/delivery/mod.rs
//! Transportes de entrega por canal/proveedor. Cada variante hace un único
//! intento; los reintentos los decide el worker con `retry_with_backoff`.

pub mod aws_sigv4;
pub mod sendgrid;
pub mod ses;
pub mod smtp;
pub mod sns;
pub mod twilio;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::settings::Settings;
use crate::models::campaign_model::{Channel, OutboundMessage};

pub use sendgrid::SendGridTransport;
pub use ses::SesTransport;
pub use smtp::SmtpTransport;
pub use sns::SnsTransport;
pub use twilio::TwilioTransport;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Remitente: email (+ nombre visible) o número origen para SMS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderIdentity {
    pub address: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Red, timeouts, 408/429/5xx: vale la pena reintentar.
    #[error("{0}")]
    Transient(String),
    /// Destino inválido, credenciales rechazadas, otros 4xx.
    #[error("{0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => classify_status(status, &err.to_string()),
            None => DeliveryError::Transient(format!("request failed: {err}")),
        }
    }
}

/// Configuración de proveedor ausente o inválida: aborta la corrida antes de enviar.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{provider} is not configured: missing '{key}'")]
    MissingSetting {
        provider: &'static str,
        key: &'static str,
    },
    #[error("unknown {channel} provider '{method}'")]
    UnknownProvider { channel: Channel, method: String },
    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        destination: &str,
        content: &OutboundMessage,
        sender: &SenderIdentity,
    ) -> Result<(), DeliveryError>;
}

/// Transporte + remitente elegidos una vez por campaña.
pub struct ProviderSetup {
    pub transport: Box<dyn DeliveryTransport>,
    pub sender: SenderIdentity,
}

impl std::fmt::Debug for ProviderSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSetup")
            .field("transport", &self.transport.name())
            .field("sender", &self.sender)
            .finish()
    }
}

/// Elige el proveedor según `email_method` / `sms_method` y valida sus credenciales.
pub fn transport_from_settings(
    channel: Channel,
    settings: &Settings,
) -> Result<ProviderSetup, ValidationError> {
    match channel {
        Channel::Email => email_transport(settings),
        Channel::Sms => sms_transport(settings),
    }
}

fn email_transport(settings: &Settings) -> Result<ProviderSetup, ValidationError> {
    let method = settings.email_method();
    let (provider, transport): (&'static str, Box<dyn DeliveryTransport>) = match method {
        "SMTP" => {
            let host = required(settings, "SMTP", "smtp_server")?;
            let port = required(settings, "SMTP", "smtp_port")?;
            let port: u16 = port.parse().map_err(|_| ValidationError::InvalidSetting {
                key: "smtp_port",
                reason: format!("'{port}' is not a port number"),
            })?;
            let user = required(settings, "SMTP", "sender_email")?;
            let password = required(settings, "SMTP", "sender_pwd")?;
            (
                "SMTP",
                Box::new(SmtpTransport::new(host, port, user, password)?),
            )
        }
        "SendGrid" => {
            let api_key = required(settings, "SendGrid", "sendgrid_api_key")?;
            ("SendGrid", Box::new(SendGridTransport::new(api_key)))
        }
        "Amazon SES" => {
            let credentials = aws_sigv4::AwsCredentials::new(
                required(settings, "Amazon SES", "ses_access_key")?,
                required(settings, "Amazon SES", "ses_secret_key")?,
                required(settings, "Amazon SES", "ses_region")?,
            );
            ("Amazon SES", Box::new(SesTransport::new(credentials)))
        }
        other => {
            return Err(ValidationError::UnknownProvider {
                channel: Channel::Email,
                method: other.to_string(),
            })
        }
    };

    let address = required(settings, provider, "sender_email")?;
    if address.parse::<lettre::Address>().is_err() {
        return Err(ValidationError::InvalidSetting {
            key: "sender_email",
            reason: format!("'{address}' is not an email address"),
        });
    }
    Ok(ProviderSetup {
        transport,
        sender: SenderIdentity {
            address: address.to_string(),
            display_name: settings.get("sender_name").map(str::to_string),
        },
    })
}

fn sms_transport(settings: &Settings) -> Result<ProviderSetup, ValidationError> {
    match settings.sms_method() {
        "Twilio" => {
            let sid = required(settings, "Twilio", "twilio_account_sid")?;
            let token = required(settings, "Twilio", "twilio_auth_token")?;
            let from = required(settings, "Twilio", "twilio_phone_number")?;
            Ok(ProviderSetup {
                transport: Box::new(TwilioTransport::new(sid, token)),
                sender: SenderIdentity {
                    address: from.to_string(),
                    display_name: None,
                },
            })
        }
        "AWS SNS" => {
            let credentials = aws_sigv4::AwsCredentials::new(
                required(settings, "AWS SNS", "aws_access_key")?,
                required(settings, "AWS SNS", "aws_secret_key")?,
                required(settings, "AWS SNS", "aws_region")?,
            );
            Ok(ProviderSetup {
                transport: Box::new(SnsTransport::new(credentials)),
                sender: SenderIdentity::default(),
            })
        }
        other => Err(ValidationError::UnknownProvider {
            channel: Channel::Sms,
            method: other.to_string(),
        }),
    }
}

fn required<'a>(
    settings: &'a Settings,
    provider: &'static str,
    key: &'static str,
) -> Result<&'a str, ValidationError> {
    settings
        .get(key)
        .ok_or(ValidationError::MissingSetting { provider, key })
}

/// 408/429/5xx → transitorio; el resto de 4xx → permanente.
pub fn classify_status(status: StatusCode, detail: &str) -> DeliveryError {
    let message = format!("HTTP {}: {}", status.as_u16(), detail);
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        DeliveryError::Transient(message)
    } else {
        DeliveryError::Permanent(message)
    }
}

/// Éxito con 2xx; si no, el cuerpo (recortado) va en el error.
pub(crate) async fn check_response(
    provider: &str,
    response: reqwest::Response,
) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    let detail: String = body.chars().take(300).collect();
    Err(classify_status(status, &format!("{provider} error {detail}")))
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("(http_client) Cliente por defecto ({})", e);
            reqwest::Client::new()
        })
}

pub(crate) fn unsupported(provider: &str, content: &OutboundMessage) -> DeliveryError {
    let kind = match content {
        OutboundMessage::Email { .. } => "email",
        OutboundMessage::Sms { .. } => "sms",
    };
    DeliveryError::Permanent(format!("{provider} cannot deliver {kind} content"))
}
