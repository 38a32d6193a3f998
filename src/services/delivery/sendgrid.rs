//! services/delivery/sendgrid.rs

use async_trait::async_trait;
use serde_json::json;

use super::{check_response, http_client, unsupported, DeliveryError, DeliveryTransport, SenderIdentity};
use crate::models::campaign_model::OutboundMessage;

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

pub struct SendGridTransport {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SendGridTransport {
    pub fn new(api_key: &str) -> Self {
        SendGridTransport {
            client: http_client(),
            api_key: api_key.to_string(),
            endpoint: SENDGRID_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl DeliveryTransport for SendGridTransport {
    fn name(&self) -> &'static str {
        "SendGrid"
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

        let mut from = json!({ "email": sender.address });
        if let Some(name) = &sender.display_name {
            from["name"] = json!(name);
        }
        let payload = json!({
            "personalizations": [{ "to": [{ "email": destination }] }],
            "from": from,
            "subject": subject,
            "content": [{ "type": "text/plain", "value": body }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        check_response(self.name(), response).await
    }
}
