mod rules;

use crate::models::NewInvoice;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("amount must be a positive number")]
    InvalidAmount,
    #[error("expiryTimestamp must be a number (UTC milliseconds)")]
    InvalidExpiry,
}

/// Checks a registration payload before it becomes a stored row.
/// Missing fields are reported together; type checks run only once every
/// required field is present.
pub fn validate_registration(payload: &NewInvoice) -> Result<(), RegistrationError> {
    let missing = rules::missing_required(payload);
    if !missing.is_empty() {
        return Err(RegistrationError::MissingFields(missing));
    }
    rules::check_amount(payload)?;
    rules::check_expiry(payload)?;
    Ok(())
}

/// Compares an `Authorization` header against the shared registration secret.
pub fn authorize(header: Option<&str>, secret: &str) -> Result<(), RegistrationError> {
    match header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if !secret.is_empty() && token == secret => Ok(()),
        _ => Err(RegistrationError::Unauthorized),
    }
}
