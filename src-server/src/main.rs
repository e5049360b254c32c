mod commands;
mod scheduler;

use clap::Parser;
use commands::{Cli, Command};
use config::AppConfig;
use mailer::{mock::MockMailer, resend::ResendMailer, Mailer};
use std::sync::Arc;
use store::{AuditLog, ExpirySweep, SledStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn create_mailer(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match cfg.mailer.kind.as_str() {
        "resend" => {
            let api_key = config::resolve_secret("RESEND_API_KEY", config::RESEND_API_KEY)?;
            tracing::info!(base_url = %cfg.mailer.base_url, "Using Resend mailer");
            Ok(ResendMailer::new(cfg.mailer.base_url.clone(), api_key)?)
        }
        other => {
            if other != "mock" {
                tracing::warn!(kind = %other, "unknown mailer kind, falling back to mock");
            }
            tracing::info!("Using mock mailer");
            Ok(MockMailer::new())
        }
    }
}

fn build_sweep(cfg: &AppConfig, store: Arc<SledStore>) -> anyhow::Result<ExpirySweep> {
    let audit = if cfg.store.audit_log.is_empty() {
        AuditLog::disabled()
    } else {
        AuditLog::new(&cfg.store.audit_log)
    };
    Ok(ExpirySweep::new(
        store,
        create_mailer(cfg)?,
        cfg.mailer.from_email.clone(),
        audit,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let command = Cli::parse().command();
    let cfg = config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config unreadable, using defaults");
        AppConfig::default().with_env_overrides(|key| std::env::var(key).ok())
    });
    let store = Arc::new(SledStore::open(&cfg.store.path)?);

    match command {
        Command::Serve => {
            let sweep = build_sweep(&cfg, Arc::clone(&store))?;
            let handle = scheduler::start_sweep_scheduler(sweep, &cfg.sweep);
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            handle.abort();
        }
        Command::SweepOnce => {
            let sweep = build_sweep(&cfg, Arc::clone(&store))?;
            let report = sweep.run(chrono::Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Register { path } => {
            let secret = config::resolve_secret("REGISTER_SECRET", config::REGISTER_SECRET)?;
            let token = std::env::var("REGISTER_TOKEN").ok();
            let invoice = commands::register_from_file(&store, &path, token.as_deref(), &secret)?;
            println!("{}", serde_json::to_string_pretty(&invoice)?);
        }
        Command::List => {
            println!("{}", serde_json::to_string_pretty(&store.list()?)?);
        }
    }
    Ok(())
}
