//! services/delivery/ses.rs
//! Amazon SES v2 (`SendEmail`) sobre REST firmado con SigV4.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use reqwest::Url;
use serde_json::json;

use super::aws_sigv4::{self, AwsCredentials};
use super::{check_response, http_client, unsupported, DeliveryError, DeliveryTransport, SenderIdentity};
use crate::models::campaign_model::OutboundMessage;

const CONTENT_TYPE_JSON: &str = "application/json";

pub struct SesTransport {
    client: reqwest::Client,
    credentials: AwsCredentials,
    endpoint: String,
}

impl SesTransport {
    pub fn new(credentials: AwsCredentials) -> Self {
        let endpoint = format!(
            "https://email.{}.amazonaws.com/v2/email/outbound-emails",
            credentials.region
        );
        SesTransport {
            client: http_client(),
            credentials,
            endpoint,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// `"Nombre" <email>` si hay nombre visible.
pub(crate) fn format_source(sender: &SenderIdentity) -> String {
    match &sender.display_name {
        Some(name) => format!("\"{}\" <{}>", name.replace('"', ""), sender.address),
        None => sender.address.clone(),
    }
}

#[async_trait]
impl DeliveryTransport for SesTransport {
    fn name(&self) -> &'static str {
        "Amazon SES"
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

        let payload = json!({
            "FromEmailAddress": format_source(sender),
            "Destination": { "ToAddresses": [destination] },
            "Content": {
                "Simple": {
                    "Subject": { "Data": subject },
                    "Body": { "Text": { "Data": body } },
                }
            },
        });
        let body = serde_json::to_vec(&payload)
            .map_err(|e| DeliveryError::Permanent(format!("could not encode request: {e}")))?;
        let url = Url::parse(&self.endpoint)
            .map_err(|e| DeliveryError::Permanent(format!("invalid SES endpoint: {e}")))?;

        let signed = aws_sigv4::sign(
            &self.credentials,
            "ses",
            "POST",
            &url,
            &[("content-type", CONTENT_TYPE_JSON)],
            &body,
            Utc::now(),
        );

        let response = self
            .client
            .post(url)
            .header(HOST, signed.host)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header("x-amz-date", signed.amz_date)
            .header(AUTHORIZATION, signed.authorization)
            .body(body)
            .send()
            .await?;
        check_response(self.name(), response).await
    }
}
