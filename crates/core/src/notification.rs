use crate::models::Invoice;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const EXPIRY_SUBJECT: &str = "Your invoice has expired — book a call for updated pricing";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl OutgoingEmail {
    pub fn digest(&self) -> String {
        compute_sha256_hex(&self.html)
    }
}

pub fn compute_sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// en-US grouping with at least two and at most three decimals:
/// `1234.5` -> `1,234.50`, `1234.567` -> `1,234.567`.
pub fn format_amount(amount: f64) -> String {
    let fixed = format!("{:.3}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "000"));
    let frac_part = match frac_part.strip_suffix('0') {
        Some(two) => two,
        None => frac_part,
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && fixed != "0.000" {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped}.{frac_part}")
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Follow-up sent once an invoice page has self-destructed.
pub fn render_expiry_notice(invoice: &Invoice, from: &str) -> OutgoingEmail {
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: system-ui, -apple-system, sans-serif; color: #1f2937; max-width: 600px; margin: 0 auto; padding: 2rem;">
  <h1 style="color: #991b1b;">Invoice Expired</h1>
  <p>Hi {name},</p>
  <p>The invoice we sent you ({currency} {amount}) has passed its expiry window. Pricing and availability may have changed.</p>
  <p>Ready to move forward? Book a quick call to get an updated proposal:</p>
  <p style="text-align: center; margin: 2rem 0;">
    <a href="{link}" style="display: inline-block; padding: 0.75rem 2rem; background: #2563eb; color: white; text-decoration: none; border-radius: 0.5rem; font-weight: 600;">Book a Call</a>
  </p>
</body>
</html>"#,
        name = escape_html(&invoice.client_name),
        currency = escape_html(&invoice.currency),
        amount = format_amount(invoice.amount),
        link = escape_html(&invoice.calendly_link),
    );

    OutgoingEmail {
        from: from.to_string(),
        to: invoice.client_email.clone(),
        subject: EXPIRY_SUBJECT.to_string(),
        html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn invoice() -> Invoice {
        Invoice {
            id: "inv-7".into(),
            client_name: "Grace <Ops>".into(),
            client_email: "grace@example.com".into(),
            amount: 1234567.5,
            currency: "EUR".into(),
            expiry_timestamp: 0,
            page_url: "https://inv.example.com/inv-7".into(),
            calendly_link: "https://calendly.com/acme/30min".into(),
            email_sent: false,
            email_sent_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn amounts_use_thousands_separators() {
        assert_eq!(format_amount(0.0), "0.00");
        assert_eq!(format_amount(999.9999), "1,000.00");
        assert_eq!(format_amount(1234.5), "1,234.50");
        assert_eq!(format_amount(1234.567), "1,234.567");
        assert_eq!(format_amount(1234.5678), "1,234.568");
        assert_eq!(format_amount(12.34), "12.34");
        assert_eq!(format_amount(1234567.5), "1,234,567.50");
        assert_eq!(format_amount(-42.1), "-42.10");
        assert_eq!(format_amount(-0.0001), "0.00");
    }

    #[test]
    fn notice_addresses_recipient_with_amount_and_booking_link() {
        let email = render_expiry_notice(&invoice(), "billing@acme.test");
        assert_eq!(email.from, "billing@acme.test");
        assert_eq!(email.to, "grace@example.com");
        assert_eq!(email.subject, EXPIRY_SUBJECT);
        assert!(email.html.contains("Hi Grace &lt;Ops&gt;,"));
        assert!(email.html.contains("(EUR 1,234,567.50)"));
        assert!(email
            .html
            .contains(r#"<a href="https://calendly.com/acme/30min""#));
    }

    #[test]
    fn digest_tracks_rendered_body() {
        let a = render_expiry_notice(&invoice(), "x@acme.test");
        let mut other = invoice();
        other.amount = 1.0;
        let b = render_expiry_notice(&other, "x@acme.test");
        assert_eq!(a.digest().len(), 64);
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), compute_sha256_hex(&a.html));
    }
}
