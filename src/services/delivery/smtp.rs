//! services/delivery/smtp.rs
//! Envío directo por SMTP con lettre (STARTTLS; TLS implícito en el 465).

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{unsupported, DeliveryError, DeliveryTransport, SenderIdentity, ValidationError};
use crate::models::campaign_model::OutboundMessage;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
const IMPLICIT_TLS_PORT: u16 = 465;

pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Result<Self, ValidationError> {
        let builder = if port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| ValidationError::InvalidSetting {
            key: "smtp_server",
            reason: e.to_string(),
        })?;

        let mailer = builder
            .port(port)
            .credentials(Credentials::new(user.to_string(), password.to_string()))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(SmtpTransport { mailer })
    }
}

fn mailbox(address: &str, name: Option<&str>, what: &str) -> Result<Mailbox, DeliveryError> {
    let address: Address = address
        .trim()
        .parse()
        .map_err(|e| DeliveryError::Permanent(format!("invalid {what} address '{address}': {e}")))?;
    Ok(Mailbox::new(name.map(str::to_string), address))
}

#[async_trait]
impl DeliveryTransport for SmtpTransport {
    fn name(&self) -> &'static str {
        "SMTP"
    }

    async fn send(
        &self,
        destination: &str,
        content: &OutboundMessage,
        sender: &SenderIdentity,
    ) -> Result<(), DeliveryError> {
        let OutboundMessage::Email { subject, body } = content else {
            return Err(unsupported(self.name(), content));
        };

        let from = mailbox(&sender.address, sender.display_name.as_deref(), "sender")?;
        let to = mailbox(destination, None, "recipient")?;
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(body.clone())
            .map_err(|e| DeliveryError::Permanent(format!("could not build message: {e}")))?;

        match self.mailer.send(message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_permanent() => Err(DeliveryError::Permanent(format!("SMTP error: {e}"))),
            Err(e) => Err(DeliveryError::Transient(format!("SMTP error: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_recipient_is_permanent() {
        let err = mailbox("not-an-address", None, "recipient").unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
    }

    #[tokio::test]
    async fn unreachable_relay_is_transient() {
        // Puerto local sin servidor
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = SmtpTransport {
            mailer: AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous("127.0.0.1")
                .port(port)
                .build(),
        };
        let err = transport
            .send(
                "ana@example.com",
                &OutboundMessage::Email {
                    subject: "Hola".into(),
                    body: "Hola Ana".into(),
                },
                &SenderIdentity {
                    address: "news@example.com".into(),
                    display_name: Some("News".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
