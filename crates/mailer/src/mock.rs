use super::{DeliveryReceipt, MailError, Mailer};
use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use sd_inv_core::notification::OutgoingEmail;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

/// Records sent mail in memory. Recipients added with [`MockMailer::fail_for`]
/// are rejected.
#[derive(Default)]
pub struct MockMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: Mutex<HashSet<String>>,
    latency: Duration,
}

impl MockMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn fail_for(&self, recipient: &str) {
        lock(&self.failing).insert(recipient.to_string());
    }

    pub fn recover(&self, recipient: &str) {
        lock(&self.failing).remove(recipient);
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        lock(&self.sent).clone()
    }

    pub fn sent_to(&self, recipient: &str) -> usize {
        lock(&self.sent).iter().filter(|e| e.to == recipient).count()
    }
}

// A poisoned lock only means another test thread panicked mid-push.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, MailError> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        if lock(&self.failing).contains(&email.to) {
            return Err(MailError::Rejected {
                status: 422,
                body: format!("mock rejection for {}", email.to),
            });
        }

        let message_id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        lock(&self.sent).push(email.clone());
        tracing::debug!(to = %email.to, %message_id, "mock email accepted");
        Ok(DeliveryReceipt { message_id })
    }
}
