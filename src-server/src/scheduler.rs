//! Background trigger for the expiry sweep.

use chrono::Utc;
use config::SweepConfig;
use store::ExpirySweep;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Sweeps run one after another; a slow sweep delays the next tick instead of overlapping it.
pub fn start_sweep_scheduler(sweep: ExpirySweep, cfg: &SweepConfig) -> JoinHandle<()> {
    let initial_delay = Duration::from_secs(cfg.initial_delay_secs);
    let period = Duration::from_secs(cfg.interval_secs.max(1));

    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Expiry sweep scheduler started");
        sleep(initial_delay).await;

        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            if let Err(e) = sweep.run(Utc::now()).await {
                error!(error = %format!("{e:#}"), "Scheduled expiry sweep failed");
            }
        }
    })
}
