//! services/delivery/twilio.rs

use async_trait::async_trait;

use super::{check_response, http_client, unsupported, DeliveryError, DeliveryTransport, SenderIdentity};
use crate::models::campaign_model::OutboundMessage;

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";

pub struct TwilioTransport {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    base_url: String,
}

impl TwilioTransport {
    pub fn new(account_sid: &str, auth_token: &str) -> Self {
        TwilioTransport {
            client: http_client(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            base_url: TWILIO_API.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.account_sid)
        )
    }
}

#[async_trait]
impl DeliveryTransport for TwilioTransport {
    fn name(&self) -> &'static str {
        "Twilio"
    }

    async fn send(
        &self,
        destination: &str,
        content: &OutboundMessage,
        sender: &SenderIdentity,
    ) -> Result<(), DeliveryError> {
        let OutboundMessage::Sms { text } = content else {
            return Err(unsupported(self.name(), content));
        };

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", destination),
                ("From", sender.address.as_str()),
                ("Body", text.as_str()),
            ])
            .send()
            .await?;
        check_response(self.name(), response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use std::collections::HashMap;

    #[test]
    fn messages_url_per_account() {
        let transport = TwilioTransport::new("AC123", "token");
        assert_eq!(
            transport.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[actix_rt::test]
    async fn posts_form_and_maps_rate_limit_to_transient() {
        let server = HttpServer::new(|| {
            App::new().route(
                "/Accounts/AC123/Messages.json",
                web::post().to(|form: web::Form<HashMap<String, String>>| async move {
                    if form.get("Body").map(String::as_str) == Some("limit") {
                        return HttpResponse::TooManyRequests().finish();
                    }
                    if form.get("To").map(String::as_str) == Some("+15550100200")
                        && form.get("From").map(String::as_str) == Some("+15550100999")
                    {
                        HttpResponse::Created().finish()
                    } else {
                        HttpResponse::BadRequest().finish()
                    }
                }),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_rt::spawn(server.run());

        let transport = TwilioTransport::new("AC123", "token").with_base_url(format!("http://{addr}"));
        let sender = SenderIdentity {
            address: "+15550100999".into(),
            display_name: None,
        };

        transport
            .send("+15550100200", &OutboundMessage::Sms { text: "Hola".into() }, &sender)
            .await
            .unwrap();

        let err = transport
            .send("+15550100200", &OutboundMessage::Sms { text: "limit".into() }, &sender)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
