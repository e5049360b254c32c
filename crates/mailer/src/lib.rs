use async_trait::async_trait;
use sd_inv_core::notification::OutgoingEmail;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    #[error("provider rejected email: {status} - {body}")]
    Rejected { status: u16, body: String },
    #[error("email transport failed: {0}")]
    Transport(String),
}

/// Best-effort single delivery attempt; implementations never retry.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, MailError>;
}

pub mod mock;
pub mod resend;
