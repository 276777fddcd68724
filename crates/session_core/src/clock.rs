//! Countdown clock. A [`Clock`] reports each elapsed second as a
//! [`ClockSignal::Tick`] carrying the new remaining value, then a single
//! [`ClockSignal::Expired`] when the countdown reaches zero, and stops.

use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot},
    time::{interval_at, Instant},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSignal {
    Tick { remaining_seconds: u64 },
    Expired,
}

pub trait Clock: Send + Sync {
    /// Starts a countdown from `total_seconds`, delivering signals on
    /// `signals` until expiry or until the returned handle is stopped.
    fn start(&self, total_seconds: u64, signals: mpsc::UnboundedSender<ClockSignal>)
        -> ClockHandle;
}

/// Cancel handle for a running countdown. Dropping the handle stops the
/// countdown as well.
#[derive(Debug)]
pub struct ClockHandle {
    cancel: Option<oneshot::Sender<()>>,
}

impl ClockHandle {
    pub fn new(cancel: oneshot::Sender<()>) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    /// Idempotent; safe after expiry.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// True once stopped or once the countdown has finished on its own.
    pub fn is_stopped(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(true, |cancel| cancel.is_closed())
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tokio interval backed clock.
#[derive(Debug, Clone)]
pub struct IntervalClock {
    period: Duration,
}

impl IntervalClock {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

    /// `period` is the wall-clock length of one countdown second; anything
    /// but the default is only useful for demos and tests.
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Default for IntervalClock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERIOD)
    }
}

impl Clock for IntervalClock {
    fn start(
        &self,
        total_seconds: u64,
        signals: mpsc::UnboundedSender<ClockSignal>,
    ) -> ClockHandle {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let period = self.period;

        tokio::spawn(async move {
            let mut remaining = total_seconds;
            if remaining == 0 {
                let _ = signals.send(ClockSignal::Expired);
                return;
            }

            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => {
                        debug!(remaining_seconds = remaining, "clock: stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        remaining -= 1;
                        if signals.send(ClockSignal::Tick { remaining_seconds: remaining }).is_err() {
                            return;
                        }
                        if remaining == 0 {
                            let _ = signals.send(ClockSignal::Expired);
                            debug!("clock: expired");
                            return;
                        }
                    }
                }
            }
        });

        ClockHandle::new(cancel_tx)
    }
}

#[cfg(test)]
#[path = "tests/clock_tests.rs"]
mod tests;
