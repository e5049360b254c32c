use super::{DeliveryReceipt, MailError, Mailer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sd_inv_core::notification::OutgoingEmail;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.resend.com";
/// Receipt id used when Resend accepted the email but its reply carried no id.
pub const UNKNOWN_MESSAGE_ID: &str = "unknown";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ResendMailer {
    pub base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

impl<'a> SendRequest<'a> {
    fn from_email(email: &'a OutgoingEmail) -> Self {
        Self {
            from: &email.from,
            to: [&email.to],
            subject: &email.subject,
            html: &email.html,
        }
    }
}

/// Only called for 2xx replies: the email is accepted whatever the body says.
fn accepted_receipt(body: &str) -> DeliveryReceipt {
    match serde_json::from_str::<SendResponse>(body) {
        Ok(resp) => DeliveryReceipt {
            message_id: resp.id,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Resend accepted the email but the reply has no message id");
            DeliveryReceipt {
                message_id: UNKNOWN_MESSAGE_ID.to_string(),
            }
        }
    }
}

impl ResendMailer {
    pub fn new(base_url: String, api_key: String) -> Result<Arc<Self>> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Resend HTTP client")?;
        Ok(Arc::new(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http_client,
        }))
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, MailError> {
        let url = format!("{}/emails", self.base_url);

        let resp = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&SendRequest::from_email(email))
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, to = %email.to, "failed to read accepted send response");
                String::new()
            }
        };
        let receipt = accepted_receipt(&body);
        tracing::info!(message_id = %receipt.message_id, to = %email.to, "email accepted by Resend");
        Ok(receipt)
    }
}
