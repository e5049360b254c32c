use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "sd-invoice";
const KEYCHAIN_SERVICE: &str = "sd.invoice.credentials";

pub const RESEND_API_KEY: &str = "resend_api_key";
pub const REGISTER_SECRET: &str = "register_secret";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mailer: MailerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailerConfig {
    #[serde(default = "default_mailer_kind")]
    pub kind: String, // "mock" | "resend"
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            kind: default_mailer_kind(),
            from_email: default_from_email(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Empty disables the audit trail.
    #[serde(default = "default_audit_log")]
    pub audit_log: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            audit_log: default_audit_log(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            initial_delay_secs: default_initial_delay_secs(),
        }
    }
}

fn default_mailer_kind() -> String {
    "mock".to_string()
}

fn default_from_email() -> String {
    "invoices@yourdomain.com".to_string()
}

fn default_base_url() -> String {
    "https://api.resend.com".to_string()
}

fn default_store_path() -> String {
    ".sd_invoice_store".to_string()
}

fn default_audit_log() -> String {
    "audit.jsonl".to_string()
}

fn default_interval_secs() -> u64 {
    300
}

fn default_initial_delay_secs() -> u64 {
    5
}

impl AppConfig {
    /// Applies `FROM_EMAIL`, `SD_INVOICE_STORE` and `SWEEP_INTERVAL_SECS`
    /// on top of the stored values.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(from) = lookup("FROM_EMAIL").filter(|v| !v.is_empty()) {
            self.mailer.from_email = from;
        }
        if let Some(path) = lookup("SD_INVOICE_STORE").filter(|v| !v.is_empty()) {
            self.store.path = path;
        }
        match lookup("SWEEP_INTERVAL_SECS").map(|v| v.parse::<u64>()) {
            Some(Ok(secs)) if secs > 0 => self.sweep.interval_secs = secs,
            Some(_) => tracing::warn!("ignoring invalid SWEEP_INTERVAL_SECS"),
            None => {}
        }
        self
    }
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg.with_env_overrides(|key| std::env::var(key).ok()))
}

fn keychain_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    Ok(entry.get_password()?)
}

/// Environment variable `env_key` first, then the keychain entry `key`
/// under the `sd.invoice.credentials` service.
pub fn resolve_secret(env_key: &str, key: &str) -> Result<String> {
    match std::env::var(env_key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => keychain_secret(key).with_context(|| format!("{env_key} not set in env or keychain")),
    }
}
