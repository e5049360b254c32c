use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sd_inv_core::models::{Invoice, NewInvoice};
use sd_inv_core::validation::authorize;
use std::path::{Path, PathBuf};
use store::SledStore;

#[derive(Debug, Parser)]
#[command(name = "sd_inv_server")]
#[command(about = "Self-destructing invoice expiry service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the periodic expiry sweep until interrupted.
    Serve,
    /// Run one expiry sweep and print its report.
    #[command(name = "sweep")]
    SweepOnce,
    /// Register an invoice from its metadata file. Requires `REGISTER_TOKEN`.
    Register { path: PathBuf },
    List,
}

impl Cli {
    pub fn command(self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

/// Deploy hook: the caller's `token` must match the configured registration secret.
pub fn register_from_file(
    store: &SledStore,
    path: &Path,
    token: Option<&str>,
    secret: &str,
) -> Result<Invoice> {
    let header = token.map(|t| format!("Bearer {t}"));
    authorize(header.as_deref(), secret)?;
    register_payload(store, path)
}

fn register_payload(store: &SledStore, path: &Path) -> Result<Invoice> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Invoice metadata not found at {}", path.display()))?;
    let payload: NewInvoice =
        serde_json::from_str(&raw).context("Invoice metadata is not valid JSON")?;
    let invoice = store.register(payload)?;
    tracing::info!(invoice_id = %invoice.id, path = %path.display(), "invoice registered from file");
    Ok(invoice)
}
