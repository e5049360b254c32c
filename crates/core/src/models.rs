use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CURRENCY: &str = "USD";

/// Persisted invoice row. Everything except the notification ledger
/// (`email_sent`, `email_sent_at`) is written once at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub client_name: String,
    pub client_email: String,
    pub amount: f64,
    pub currency: String,
    /// UTC milliseconds.
    pub expiry_timestamp: i64,
    pub page_url: String,
    pub calendly_link: String,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// True while the invoice sits in the unnotified window
    /// `expiry_timestamp < now AND email_sent = false`.
    pub fn awaiting_notification(&self, now_ms: i64) -> bool {
        self.expiry_timestamp < now_ms && !self.email_sent
    }
}

/// Registration payload as produced by the site build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub expiry_timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub calendly_link: Option<String>,
}

impl NewInvoice {
    /// Builds the stored row. Callers validate first; see
    /// [`crate::validation::validate_registration`].
    pub fn into_invoice(self, created_at: DateTime<Utc>) -> Option<Invoice> {
        Some(Invoice {
            id: self.id?,
            client_name: self.client_name?,
            client_email: self.client_email?,
            amount: self.amount?.as_f64()?,
            currency: self
                .currency
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            expiry_timestamp: json_millis(&self.expiry_timestamp?)?,
            page_url: self.page_url?,
            calendly_link: self.calendly_link.unwrap_or_default(),
            email_sent: false,
            email_sent_at: None,
            created_at,
        })
    }
}

/// Accepts integral JSON numbers as well as floats with a fractional part.
pub(crate) fn json_millis(value: &serde_json::Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_defaults_currency_and_clears_ledger() {
        let payload: NewInvoice = serde_json::from_value(json!({
            "id": "inv-1",
            "clientName": "Ada",
            "clientEmail": "ada@example.com",
            "amount": 1200.0,
            "expiryTimestamp": 1_700_000_000_000i64,
            "pageUrl": "https://inv.example.com/inv-1"
        }))
        .unwrap();

        let inv = payload.into_invoice(Utc::now()).unwrap();
        assert_eq!(inv.currency, "USD");
        assert_eq!(inv.calendly_link, "");
        assert!(!inv.email_sent);
        assert!(inv.email_sent_at.is_none());
    }

    #[test]
    fn unnotified_window_is_strictly_after_expiry() {
        let inv = NewInvoice {
            id: Some("a".into()),
            client_name: Some("A".into()),
            client_email: Some("a@example.com".into()),
            amount: Some(json!(10)),
            currency: None,
            expiry_timestamp: Some(json!(1000)),
            page_url: Some("https://x".into()),
            calendly_link: None,
        }
        .into_invoice(Utc::now())
        .unwrap();

        assert!(!inv.awaiting_notification(1000));
        assert!(inv.awaiting_notification(1001));

        let sent = Invoice {
            email_sent: true,
            ..inv
        };
        assert!(!sent.awaiting_notification(5000));
    }
}
