//! Periodic pass over expired invoices that sends the follow-up email.
//!
//! The ledger flag is flipped only after the provider accepted the email, so a
//! failed send stays eligible for the next run. A crash (or a failed write)
//! between a successful send and the flag update can produce one duplicate
//! email on the next run; that window is logged, not closed.

use crate::audit::{AuditEvent, AuditLog};
use crate::InvoiceStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mailer::Mailer;
use sd_inv_core::models::Invoice;
use sd_inv_core::notification::render_expiry_notice;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub selected: usize,
    pub sent: usize,
    pub failed: usize,
    /// Sent, but the notified flag could not be written.
    pub unrecorded: usize,
}

enum Outcome {
    Sent,
    Failed,
    Unrecorded,
}

#[derive(Clone)]
pub struct ExpirySweep {
    store: Arc<dyn InvoiceStore>,
    mailer: Arc<dyn Mailer>,
    from_email: String,
    audit: AuditLog,
}

impl ExpirySweep {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        mailer: Arc<dyn Mailer>,
        from_email: impl Into<String>,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            mailer,
            from_email: from_email.into(),
            audit,
        }
    }

    /// Only a failing query aborts the run; per-invoice failures are counted.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let sweep_id = uuid::Uuid::new_v4().to_string();
        let due = self
            .store
            .select_expired_unnotified(now.timestamp_millis())
            .context("Failed to query expired invoices")?;

        let mut report = SweepReport {
            selected: due.len(),
            ..SweepReport::default()
        };
        for invoice in &due {
            match self.notify(&sweep_id, invoice).await {
                Outcome::Sent => report.sent += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Unrecorded => report.unrecorded += 1,
            }
        }

        tracing::info!(
            %sweep_id,
            sent = report.sent,
            failed = report.failed,
            unrecorded = report.unrecorded,
            "processed {} expired invoices",
            report.selected
        );
        Ok(report)
    }

    async fn notify(&self, sweep_id: &str, invoice: &Invoice) -> Outcome {
        let email = render_expiry_notice(invoice, &self.from_email);
        let digest = email.digest();
        let event = |kind: &str| {
            AuditEvent::new(kind, sweep_id, &invoice.id)
                .with_recipient(&invoice.client_email)
                .with_digest(digest.clone())
        };

        let receipt = match self.mailer.send(&email).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::error!(invoice_id = %invoice.id, error = %e, "failed to send email for invoice");
                self.record(event("notification_failed").with_error(e.to_string()));
                return Outcome::Failed;
            }
        };

        match self.store.mark_notified(&invoice.id, Utc::now()) {
            Ok(()) => {
                tracing::info!(invoice_id = %invoice.id, "email sent for invoice");
                self.record(event("notification_sent").with_message_id(receipt.message_id));
                Outcome::Sent
            }
            Err(e) => {
                tracing::error!(
                    invoice_id = %invoice.id,
                    error = %e,
                    "email sent but notified flag not recorded; next sweep may send a duplicate"
                );
                self.record(
                    event("notification_unrecorded")
                        .with_message_id(receipt.message_id)
                        .with_error(format!("{e:#}")),
                );
                Outcome::Unrecorded
            }
        }
    }

    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.write(&event) {
            tracing::debug!(error = %e, invoice_id = %event.invoice_id, "audit write failed");
        }
    }
}
