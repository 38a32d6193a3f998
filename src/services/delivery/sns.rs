//! services/delivery/sns.rs
//! SMS directo vía Amazon SNS `Publish` (API Query, form-urlencoded + SigV4).

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use reqwest::Url;

use super::aws_sigv4::{self, AwsCredentials};
use super::{check_response, http_client, unsupported, DeliveryError, DeliveryTransport, SenderIdentity};
use crate::models::campaign_model::OutboundMessage;

const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded; charset=utf-8";
const API_VERSION: &str = "2010-03-31";

pub struct SnsTransport {
    client: reqwest::Client,
    credentials: AwsCredentials,
    endpoint: String,
}

impl SnsTransport {
    pub fn new(credentials: AwsCredentials) -> Self {
        let endpoint = format!("https://sns.{}.amazonaws.com/", credentials.region);
        SnsTransport {
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

pub(crate) fn publish_body(phone_number: &str, message: &str) -> String {
    [
        ("Action", "Publish"),
        ("Message", message),
        ("PhoneNumber", phone_number),
        ("Version", API_VERSION),
    ]
    .iter()
    .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
    .collect::<Vec<_>>()
    .join("&")
}

#[async_trait]
impl DeliveryTransport for SnsTransport {
    fn name(&self) -> &'static str {
        "AWS SNS"
    }

    async fn send(
        &self,
        destination: &str,
        content: &OutboundMessage,
        _sender: &SenderIdentity,
    ) -> Result<(), DeliveryError> {
        let OutboundMessage::Sms { text } = content else {
            return Err(unsupported(self.name(), content));
        };

        let body = publish_body(destination, text);
        let url = Url::parse(&self.endpoint)
            .map_err(|e| DeliveryError::Permanent(format!("invalid SNS endpoint: {e}")))?;
        let signed = aws_sigv4::sign(
            &self.credentials,
            "sns",
            "POST",
            &url,
            &[("content-type", CONTENT_TYPE_FORM)],
            body.as_bytes(),
            Utc::now(),
        );

        let response = self
            .client
            .post(url)
            .header(HOST, signed.host)
            .header(CONTENT_TYPE, CONTENT_TYPE_FORM)
            .header("x-amz-date", signed.amz_date)
            .header(AUTHORIZATION, signed.authorization)
            .body(body)
            .send()
            .await?;
        check_response(self.name(), response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_body_is_form_encoded() {
        assert_eq!(
            publish_body("+15550100200", "Hola Ana & co"),
            "Action=Publish&Message=Hola%20Ana%20%26%20co&PhoneNumber=%2B15550100200&Version=2010-03-31"
        );
    }
}
