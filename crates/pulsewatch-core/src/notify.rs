//! Outbound notification channel. Implementations are interchangeable behind
//! one contract; failures never reach the ingest path.

use crate::error::ChannelError;
use async_trait::async_trait;
use pulsewatch_config::GraphConfig;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), ChannelError>;
}

/// Logs the alert instead of delivering it; the default for dry runs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        info!("alert for {recipient}: {subject} — {body}");
        Ok(())
    }
}

/// Sends mail through the Microsoft Graph `sendMail` endpoint with a bearer
/// token read from the environment at send time, so a rotated token is picked
/// up without a restart.
pub struct GraphMailer {
    cfg: GraphConfig,
    http: reqwest::Client,
}

impl GraphMailer {
    pub fn new(cfg: GraphConfig) -> Result<Self, ChannelError> {
        let timeout = Duration::from_secs_f64(cfg.timeout_seconds.max(1.0));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|exc| ChannelError::Http(exc.to_string()))?;

        Ok(Self { cfg, http })
    }

    fn token(&self) -> Result<String, ChannelError> {
        match std::env::var(&self.cfg.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(ChannelError::Auth(format!(
                "no bearer token in ${}",
                self.cfg.token_env
            ))),
        }
    }

    fn send_mail_url(&self) -> String {
        format!(
            "{}/users/{}/sendMail",
            self.cfg.endpoint.trim_end_matches('/'),
            self.cfg.user_id
        )
    }
}

fn send_mail_payload(recipient: &str, subject: &str, body: &str, sender: &str) -> Value {
    json!({
        "message": {
            "subject": subject,
            "body": {
                "contentType": "Text",
                "content": body,
            },
            "toRecipients": [
                { "emailAddress": { "address": recipient } }
            ],
            "from": {
                "emailAddress": { "address": sender }
            },
        },
        "saveToSentItems": "true",
    })
}

#[async_trait]
impl Notifier for GraphMailer {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        let token = self.token()?;
        let payload = send_mail_payload(recipient, subject, body, &self.cfg.sender);

        let response = self
            .http
            .post(self.send_mail_url())
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|exc| ChannelError::Http(exc.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_recipient_subject_and_sender() {
        let payload = send_mail_payload(
            "ward@example.org",
            "Oximeter Drop Detected",
            "Please check the patient",
            "monitor@example.org",
        );

        assert_eq!(
            payload["message"]["subject"],
            "Oximeter Drop Detected"
        );
        assert_eq!(
            payload["message"]["toRecipients"][0]["emailAddress"]["address"],
            "ward@example.org"
        );
        assert_eq!(
            payload["message"]["from"]["emailAddress"]["address"],
            "monitor@example.org"
        );
        assert_eq!(payload["message"]["body"]["contentType"], "Text");
    }

    #[test]
    fn send_mail_url_joins_endpoint_and_user() {
        let mut cfg = GraphConfig::default();
        cfg.endpoint = "https://graph.microsoft.com/v1.0/".to_string();
        cfg.user_id = "alerts@clinic.org".to_string();
        let mailer = GraphMailer::new(cfg).expect("client builds");

        assert_eq!(
            mailer.send_mail_url(),
            "https://graph.microsoft.com/v1.0/users/alerts@clinic.org/sendMail"
        );
    }

    #[test]
    fn missing_token_is_an_auth_error() {
        let mut cfg = GraphConfig::default();
        cfg.token_env = "PULSEWATCH_TEST_TOKEN_DOES_NOT_EXIST".to_string();
        let mailer = GraphMailer::new(cfg).expect("client builds");

        assert!(matches!(mailer.token(), Err(ChannelError::Auth(_))));
    }
}
