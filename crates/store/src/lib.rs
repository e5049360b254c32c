mod audit;
mod sweep;

pub use audit::{AuditEvent, AuditLog};
pub use sweep::{ExpirySweep, SweepReport};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use sd_inv_core::models::{Invoice, NewInvoice};
use sd_inv_core::validation::validate_registration;
use sled::Db;
use std::path::Path;

/// What the expiry sweep needs from persistence.
pub trait InvoiceStore: Send + Sync {
    /// Every invoice with `expiry_timestamp < now_ms` and `email_sent = false`.
    fn select_expired_unnotified(&self, now_ms: i64) -> Result<Vec<Invoice>>;
    /// Flips the ledger flag. A row that is already notified keeps its
    /// original timestamp.
    fn mark_notified(&self, id: &str, sent_at: DateTime<Utc>) -> Result<()>;
}

#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("Failed to open invoice store at {}", path.display()))?;
        Ok(Self { db })
    }

    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("Failed to open temporary invoice store")?;
        Ok(Self { db })
    }

    fn invoices_tree(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree("invoices")?)
    }

    pub fn register(&self, payload: NewInvoice) -> Result<Invoice> {
        self.register_at(payload, Utc::now())
    }

    /// Validates and writes a new row. Ids are write-once.
    pub fn register_at(&self, payload: NewInvoice, created_at: DateTime<Utc>) -> Result<Invoice> {
        validate_registration(&payload)?;
        let invoice = payload
            .into_invoice(created_at)
            .ok_or_else(|| anyhow!("invoice payload incomplete after validation"))?;

        let invoices = self.invoices_tree()?;
        let swapped = invoices.compare_and_swap(
            invoice.id.as_bytes(),
            None as Option<&[u8]>,
            Some(serde_json::to_vec(&invoice)?),
        )?;
        if swapped.is_err() {
            bail!("invoice {} already registered", invoice.id);
        }
        invoices.flush()?;

        tracing::info!(invoice_id = %invoice.id, expiry = invoice.expiry_timestamp, "invoice registered");
        Ok(invoice)
    }

    pub fn get(&self, id: &str) -> Result<Option<Invoice>> {
        let invoices = self.invoices_tree()?;
        match invoices.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All rows, newest first.
    pub fn list(&self) -> Result<Vec<Invoice>> {
        let invoices = self.invoices_tree()?;
        let mut out = Vec::new();
        for item in invoices.iter() {
            let (_k, v) = item?;
            let rec: Invoice = serde_json::from_slice(&v)?;
            out.push(rec);
        }
        out.sort_by_key(|r| r.created_at);
        out.reverse();
        Ok(out)
    }
}

impl InvoiceStore for SledStore {
    fn select_expired_unnotified(&self, now_ms: i64) -> Result<Vec<Invoice>> {
        let invoices = self.invoices_tree()?;
        let mut out = Vec::new();
        for item in invoices.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<Invoice>(&value) {
                Ok(rec) if rec.awaiting_notification(now_ms) => out.push(rec),
                Ok(_) => {}
                Err(e) => tracing::error!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "skipping unreadable invoice row"
                ),
            }
        }
        out.sort_by_key(|r| r.expiry_timestamp);
        Ok(out)
    }

    fn mark_notified(&self, id: &str, sent_at: DateTime<Utc>) -> Result<()> {
        let invoices = self.invoices_tree()?;
        let key = id.as_bytes();
        loop {
            let existing = invoices
                .get(key)?
                .ok_or_else(|| anyhow!("invoice not found: {id}"))?;
            let mut rec: Invoice = serde_json::from_slice(&existing)?;
            if rec.email_sent {
                tracing::debug!(invoice_id = %id, "invoice already marked notified");
                return Ok(());
            }
            rec.email_sent = true;
            rec.email_sent_at = Some(sent_at);

            let updated = serde_json::to_vec(&rec)?;
            // Retry if another writer touched the row between read and swap.
            if invoices
                .compare_and_swap(key, Some(&existing), Some(updated))?
                .is_ok()
            {
                invoices.flush()?;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use sd_inv_core::models::NewInvoice;
    use serde_json::json;

    pub fn payload(id: &str, email: &str, expiry_ms: i64) -> NewInvoice {
        serde_json::from_value(json!({
            "id": id,
            "clientName": format!("Client {id}"),
            "clientEmail": email,
            "amount": 1500.0,
            "currency": "USD",
            "expiryTimestamp": expiry_ms,
            "pageUrl": format!("https://inv.example.com/{id}"),
            "calendlyLink": "https://calendly.com/acme/30min"
        }))
        .unwrap()
    }

    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}
