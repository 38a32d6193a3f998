//! models/campaign_model.rs
//! Campañas, destinatarios e historial de envíos.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canal de la campaña. Cada canal tiene sus propias tablas
/// (`email_campaigns`, `sms_campaigns`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }

    pub fn campaigns_table(&self) -> &'static str {
        match self {
            Channel::Email => "email_campaigns",
            Channel::Sms => "sms_campaigns",
        }
    }

    pub fn contacts_table(&self) -> &'static str {
        match self {
            Channel::Email => "email_campaign_contacts",
            Channel::Sms => "sms_campaign_contacts",
        }
    }

    pub fn history_table(&self) -> &'static str {
        match self {
            Channel::Email => "email_campaign_history",
            Channel::Sms => "sms_campaign_history",
        }
    }

    /// Columna de `contacts` que contiene el destino del canal.
    pub fn destination_column(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "mobile",
        }
    }

    pub fn destination<'a>(&self, recipient: &'a Recipient) -> Option<&'a str> {
        let value = match self {
            Channel::Email => recipient.email.as_deref(),
            Channel::Sms => recipient.mobile.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn is_valid_destination(&self, destination: &str) -> bool {
        match self {
            Channel::Email => destination.trim().parse::<lettre::Address>().is_ok(),
            Channel::Sms => is_valid_phone_number(destination),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            other => Err(format!("unknown campaign type: {other}")),
        }
    }
}

/// 7 a 15 dígitos (E.164), `+` opcional al inicio y separadores comunes.
fn is_valid_phone_number(raw: &str) -> bool {
    let trimmed = raw.trim();
    let rest = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if rest.is_empty() {
        return false;
    }
    let mut digits = 0;
    for ch in rest.chars() {
        match ch {
            '0'..='9' => digits += 1,
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return false,
        }
    }
    (7..=15).contains(&digits)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Running => "running",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Stopped => "stopped",
        }
    }

    /// Los estados terminales sólo vuelven a `draft` por acción del operador.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Stopped
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "running" => Ok(CampaignStatus::Running),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            "stopped" => Ok(CampaignStatus::Stopped),
            other => Err(format!("unknown campaign status: {other}")),
        }
    }
}

/// Contenido con plantillas, según el canal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CampaignContent {
    Email { subject: String, body: String },
    Sms { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub channel: Channel,
    pub content: CampaignContent,
    pub status: CampaignStatus,
    pub last_updated: Option<String>,
    pub processing_details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub mobile: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryOutcome::Sent),
            "failed" => Ok(DeliveryOutcome::Failed),
            other => Err(format!("unknown delivery outcome: {other}")),
        }
    }
}

/// Contenido final (ya personalizado) de un envío.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Email { subject: String, body: String },
    Sms { text: String },
}

/// Fila del historial: append-only.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub campaign_id: i64,
    pub contact_id: i64,
    pub timestamp: String,
    pub status: DeliveryOutcome,
    pub error: Option<String>,
    pub content: OutboundMessage,
}

#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub campaign_id: i64,
    pub contact_id: i64,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
    pub content: OutboundMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(email: Option<&str>, mobile: Option<&str>) -> Recipient {
        Recipient {
            id: 1,
            name: "Ana".to_string(),
            email: email.map(str::to_string),
            mobile: mobile.map(str::to_string),
        }
    }

    #[test]
    fn destination_depends_on_channel() {
        let r = recipient(Some(" ana@example.com "), Some("+1 555 0100 200"));
        assert_eq!(Channel::Email.destination(&r), Some("ana@example.com"));
        assert_eq!(Channel::Sms.destination(&r), Some("+1 555 0100 200"));

        let blank = recipient(Some("   "), None);
        assert_eq!(Channel::Email.destination(&blank), None);
        assert_eq!(Channel::Sms.destination(&blank), None);
    }

    #[test]
    fn email_destinations_are_parsed() {
        assert!(Channel::Email.is_valid_destination("ana@example.com"));
        assert!(!Channel::Email.is_valid_destination("ana.example.com"));
        assert!(!Channel::Email.is_valid_destination("@example.com"));
    }

    #[test]
    fn phone_numbers_need_seven_to_fifteen_digits() {
        assert!(Channel::Sms.is_valid_destination("+15550100200"));
        assert!(Channel::Sms.is_valid_destination("(555) 010-0200"));
        assert!(!Channel::Sms.is_valid_destination("12345"));
        assert!(!Channel::Sms.is_valid_destination("+1234567890123456"));
        assert!(!Channel::Sms.is_valid_destination("555-CALL-NOW"));
        assert!(!Channel::Sms.is_valid_destination("+"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!CampaignStatus::Draft.is_terminal());
        assert!(!CampaignStatus::Running.is_terminal());
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(CampaignStatus::Stopped.is_terminal());
        assert_eq!("stopped".parse::<CampaignStatus>(), Ok(CampaignStatus::Stopped));
    }
}
