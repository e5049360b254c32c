use super::RegistrationError;
use crate::models::{json_millis, NewInvoice};
use serde_json::Value;

fn blank_str(v: &Option<String>) -> bool {
    v.as_deref().map_or(true, str::is_empty)
}

// Mirrors JS truthiness: null, false, 0, NaN and "" all count as absent.
fn blank_value(v: &Option<Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64().map_or(true, |f| f == 0.0 || f.is_nan()),
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

pub fn missing_required(p: &NewInvoice) -> Vec<&'static str> {
    let checks = [
        ("id", blank_str(&p.id)),
        ("clientName", blank_str(&p.client_name)),
        ("clientEmail", blank_str(&p.client_email)),
        ("amount", blank_value(&p.amount)),
        ("expiryTimestamp", blank_value(&p.expiry_timestamp)),
        ("pageUrl", blank_str(&p.page_url)),
    ];
    checks
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect()
}

pub fn check_amount(p: &NewInvoice) -> Result<(), RegistrationError> {
    match p.amount.as_ref().and_then(Value::as_f64) {
        Some(a) if a > 0.0 => Ok(()),
        _ => Err(RegistrationError::InvalidAmount),
    }
}

pub fn check_expiry(p: &NewInvoice) -> Result<(), RegistrationError> {
    p.expiry_timestamp
        .as_ref()
        .and_then(json_millis)
        .map(|_| ())
        .ok_or(RegistrationError::InvalidExpiry)
}
