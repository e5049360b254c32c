//! Countdown controller for the invoice page.
//!
//! Remaining time is re-derived from the wall clock on every frame and mapped
//! to an [`UrgencyState`]. When it reaches zero the controller renders the
//! terminal message, fires its injected trigger once and stops scheduling
//! frames.

use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub const ONE_HOUR_MS: i64 = 60 * 60 * 1000;
pub const ONE_DAY_MS: i64 = 24 * ONE_HOUR_MS;
pub const THREE_DAYS_MS: i64 = 3 * ONE_DAY_MS;

/// Roughly one display refresh at 60 Hz.
pub const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

const BASE_CLASS: &str = "countdown-display";
const URGENT_CLASS: &str = "countdown-display urgent";
const CRITICAL_CLASS: &str = "countdown-display critical";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrgencyState {
    Calm,
    Warning,
    Critical,
    Detonated,
}

impl UrgencyState {
    pub fn classify(remaining_ms: i64) -> Self {
        if remaining_ms <= 0 {
            Self::Detonated
        } else if remaining_ms <= ONE_HOUR_MS {
            Self::Critical
        } else if remaining_ms <= THREE_DAYS_MS {
            Self::Warning
        } else {
            Self::Calm
        }
    }

    pub fn class_name(self) -> &'static str {
        match self {
            Self::Calm => BASE_CLASS,
            Self::Warning => URGENT_CLASS,
            Self::Critical | Self::Detonated => CRITICAL_CLASS,
        }
    }
}

/// `Dd HHh MMm SSs`, dropping leading units that are zero.
pub fn format_remaining(remaining_ms: i64) -> String {
    let total_seconds = remaining_ms.max(0) / 1000;
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{days}d {hours:02}h {minutes:02}m {seconds:02}s")
    } else if hours > 0 {
        format!("{hours:02}h {minutes:02}m {seconds:02}s")
    } else {
        format!("{minutes:02}m {seconds:02}s")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownDisplay {
    pub state: UrgencyState,
    pub text: String,
}

impl CountdownDisplay {
    pub fn for_remaining(remaining_ms: i64) -> Self {
        let state = UrgencyState::classify(remaining_ms);
        let text = match state {
            UrgencyState::Detonated => "Self-destructing...".to_string(),
            UrgencyState::Critical => {
                format!("Final countdown! {}", format_remaining(remaining_ms))
            }
            UrgencyState::Warning if remaining_ms <= ONE_DAY_MS => format!(
                "Self-destruct sequence initiated \u{2014} {}",
                format_remaining(remaining_ms)
            ),
            UrgencyState::Warning | UrgencyState::Calm => format!(
                "This invoice will self-destruct in {}",
                format_remaining(remaining_ms)
            ),
        };
        Self { state, text }
    }

    pub fn class_name(&self) -> &'static str {
        self.state.class_name()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CountdownError {
    #[error("missing data-expiry attribute")]
    MissingExpiry,
    #[error("invalid data-expiry attribute: {0:?}")]
    InvalidExpiry(String),
}

/// Parses the page's `data-expiry` value (UTC milliseconds). Zero is
/// rejected along with anything non-numeric.
pub fn parse_expiry_attribute(raw: Option<&str>) -> Result<i64, CountdownError> {
    let raw = raw.ok_or(CountdownError::MissingExpiry)?;
    match raw.trim().parse::<i64>() {
        Ok(ms) if ms != 0 => Ok(ms),
        _ => Err(CountdownError::InvalidExpiry(raw.to_string())),
    }
}

pub trait Clock: Send {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Whatever shows the countdown text (a DOM node, a terminal line, a test recorder).
pub trait CountdownSurface: Send {
    fn render(&mut self, display: &CountdownDisplay);
}

/// Invoked once on detonation.
pub type Trigger = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running(UrgencyState),
    Halted,
}

pub struct CountdownController<C, S> {
    expiry_ms: i64,
    clock: C,
    surface: S,
    trigger: Option<Trigger>,
    halted: bool,
}

impl<C: Clock, S: CountdownSurface> CountdownController<C, S> {
    pub fn new(expiry_ms: i64, clock: C, surface: S, trigger: Option<Trigger>) -> Self {
        Self {
            expiry_ms,
            clock,
            surface,
            trigger,
            halted: false,
        }
    }

    pub fn from_attribute(
        raw: Option<&str>,
        clock: C,
        surface: S,
        trigger: Option<Trigger>,
    ) -> Result<Self, CountdownError> {
        let expiry_ms = parse_expiry_attribute(raw)?;
        Ok(Self::new(expiry_ms, clock, surface, trigger))
    }

    pub fn expiry_ms(&self) -> i64 {
        self.expiry_ms
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// One frame of work. After the first `Halted` every later call is a no-op.
    pub fn tick(&mut self) -> Tick {
        if self.halted {
            return Tick::Halted;
        }

        let remaining = self.expiry_ms - self.clock.now_ms();
        let display = CountdownDisplay::for_remaining(remaining);
        self.surface.render(&display);

        if display.state == UrgencyState::Detonated {
            self.halted = true;
            if let Some(trigger) = self.trigger.take() {
                trigger();
            }
            return Tick::Halted;
        }
        Tick::Running(display.state)
    }
}

/// Owned handle on a running frame loop. Dropping it cancels the loop.
pub struct FrameLoop {
    task: Option<JoinHandle<()>>,
}

impl FrameLoop {
    pub fn spawn<C, S>(mut controller: CountdownController<C, S>, frame: Duration) -> Self
    where
        C: Clock + 'static,
        S: CountdownSurface + 'static,
    {
        let task = tokio::spawn(async move {
            let mut frames = interval(frame);
            frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                frames.tick().await;
                if controller.tick() == Tick::Halted {
                    tracing::debug!(expiry_ms = controller.expiry_ms(), "countdown halted");
                    break;
                }
            }
        });
        Self { task: Some(task) }
    }

    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits until the loop has halted or been cancelled.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            // A cancelled task reports a JoinError; either way it is gone.
            let _ = task.await;
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Page-load entry point. A missing or unusable expiry attribute is logged
/// and leaves the page without a countdown.
pub fn start_countdown<C, S>(
    raw_expiry: Option<&str>,
    clock: C,
    surface: S,
    trigger: Option<Trigger>,
) -> Option<FrameLoop>
where
    C: Clock + 'static,
    S: CountdownSurface + 'static,
{
    match CountdownController::from_attribute(raw_expiry, clock, surface, trigger) {
        Ok(controller) => Some(FrameLoop::spawn(controller, FRAME_INTERVAL)),
        Err(e) => {
            tracing::error!(error = %e, "countdown not started");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicI64>);

    impl ManualClock {
        fn set(&self, ms: i64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Wall clock pinned to tokio's (pausable) time source.
    struct TokioClock {
        origin_ms: i64,
        start: tokio::time::Instant,
    }

    impl Clock for TokioClock {
        fn now_ms(&self) -> i64 {
            self.origin_ms + self.start.elapsed().as_millis() as i64
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<CountdownDisplay>>>);

    impl Recorder {
        fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        fn last(&self) -> Option<CountdownDisplay> {
            self.0.lock().unwrap().last().cloned()
        }
    }

    impl CountdownSurface for Recorder {
        fn render(&mut self, display: &CountdownDisplay) {
            self.0.lock().unwrap().push(display.clone());
        }
    }

    fn counting_trigger(count: &Arc<AtomicUsize>) -> Trigger {
        let count = Arc::clone(count);
        Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn classifies_by_remaining_time() {
        assert_eq!(UrgencyState::classify(THREE_DAYS_MS + 1), UrgencyState::Calm);
        assert_eq!(UrgencyState::classify(30 * ONE_DAY_MS), UrgencyState::Calm);
        assert_eq!(UrgencyState::classify(THREE_DAYS_MS), UrgencyState::Warning);
        assert_eq!(UrgencyState::classify(ONE_HOUR_MS + 1), UrgencyState::Warning);
        assert_eq!(UrgencyState::classify(ONE_HOUR_MS), UrgencyState::Critical);
        assert_eq!(UrgencyState::classify(1), UrgencyState::Critical);
        assert_eq!(UrgencyState::classify(0), UrgencyState::Detonated);
        assert_eq!(UrgencyState::classify(-5_000), UrgencyState::Detonated);
    }

    #[test]
    fn formats_to_the_second() {
        assert_eq!(format_remaining(90_061_000), "1d 01h 01m 01s");
        assert_eq!(format_remaining(3_661_000), "01h 01m 01s");
        assert_eq!(format_remaining(61_000), "01m 01s");
        assert_eq!(format_remaining(61_999), "01m 01s");
        assert_eq!(format_remaining(999), "00m 00s");
        assert_eq!(format_remaining(12 * ONE_DAY_MS), "12d 00h 00m 00s");
    }

    #[test]
    fn warning_switches_phrasing_inside_last_day() {
        let two_days = CountdownDisplay::for_remaining(2 * ONE_DAY_MS);
        assert_eq!(two_days.state, UrgencyState::Warning);
        assert_eq!(two_days.class_name(), "countdown-display urgent");
        assert_eq!(
            two_days.text,
            "This invoice will self-destruct in 2d 00h 00m 00s"
        );

        let one_day = CountdownDisplay::for_remaining(ONE_DAY_MS);
        assert_eq!(
            one_day.text,
            "Self-destruct sequence initiated \u{2014} 1d 00h 00m 00s"
        );

        let calm = CountdownDisplay::for_remaining(4 * ONE_DAY_MS);
        assert_eq!(calm.class_name(), "countdown-display");
        assert!(calm.text.starts_with("This invoice will self-destruct in 4d"));

        let critical = CountdownDisplay::for_remaining(61_000);
        assert_eq!(critical.class_name(), "countdown-display critical");
        assert_eq!(critical.text, "Final countdown! 01m 01s");
    }

    #[test]
    fn rejects_unusable_expiry_attribute() {
        assert_eq!(parse_expiry_attribute(None), Err(CountdownError::MissingExpiry));
        assert!(matches!(
            parse_expiry_attribute(Some("soon")),
            Err(CountdownError::InvalidExpiry(_))
        ));
        assert!(matches!(
            parse_expiry_attribute(Some("0")),
            Err(CountdownError::InvalidExpiry(_))
        ));
        assert_eq!(parse_expiry_attribute(Some(" 1700000000000 ")), Ok(1_700_000_000_000));
    }

    #[test]
    fn detonation_fires_trigger_once_then_goes_quiet() {
        let clock = ManualClock::default();
        let surface = Recorder::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut ctl = CountdownController::new(
            10_000,
            clock.clone(),
            surface.clone(),
            Some(counting_trigger(&fired)),
        );

        clock.set(9_000);
        assert_eq!(ctl.tick(), Tick::Running(UrgencyState::Critical));

        clock.set(10_000);
        assert_eq!(ctl.tick(), Tick::Halted);
        let last = surface.last().unwrap();
        assert_eq!(last.text, "Self-destructing...");
        assert_eq!(last.class_name(), "countdown-display critical");

        let renders = surface.len();
        clock.set(20_000);
        assert_eq!(ctl.tick(), Tick::Halted);
        assert_eq!(ctl.tick(), Tick::Halted);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(surface.len(), renders);
        assert!(ctl.is_halted());
    }

    #[test]
    fn missing_trigger_only_updates_display() {
        let clock = ManualClock::default();
        clock.set(5);
        let surface = Recorder::default();
        let mut ctl = CountdownController::new(1, clock, surface.clone(), None);
        assert_eq!(ctl.tick(), Tick::Halted);
        assert_eq!(surface.last().unwrap().state, UrgencyState::Detonated);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_loop_stops_scheduling_after_detonation() {
        let origin_ms = 1_700_000_000_000;
        let clock = TokioClock {
            origin_ms,
            start: tokio::time::Instant::now(),
        };
        let surface = Recorder::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let ctl = CountdownController::new(
            origin_ms + 250,
            clock,
            surface.clone(),
            Some(counting_trigger(&fired)),
        );

        let frames = FrameLoop::spawn(ctl, FRAME_INTERVAL);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(frames.is_finished());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let renders = surface.len();
        assert!(renders > 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(surface.len(), renders);
        frames.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_loop_never_detonates() {
        let clock = TokioClock {
            origin_ms: 0,
            start: tokio::time::Instant::now(),
        };
        let surface = Recorder::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let ctl = CountdownController::new(
            10_000,
            clock,
            surface.clone(),
            Some(counting_trigger(&fired)),
        );

        let frames = FrameLoop::spawn(ctl, FRAME_INTERVAL);
        tokio::time::sleep(Duration::from_millis(100)).await;
        frames.cancel();
        frames.join().await;

        let renders = surface.len();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(surface.len(), renders);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_countdown_refuses_bad_attribute() {
        let frames = start_countdown(Some("NaN"), SystemClock, Recorder::default(), None);
        assert!(frames.is_none());
    }
}
