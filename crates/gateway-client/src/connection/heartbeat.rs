//! Heartbeat scheduler
//!
//! A single-shot timer re-armed after every beat. The first beat waits
//! `interval × jitter`; later beats wait between half an interval and a full
//! one, so reconnecting clients do not fall into the same phase. The driver
//! awaits [`Heartbeater::tick`] alongside inbound frames and writes the
//! heartbeat itself; the scheduler only tracks timing and acknowledgment.

use std::fmt;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Source of jitter factors in `[0, 1)`
pub type Jitter = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Uniform jitter from the thread-local RNG
#[must_use]
pub fn random_jitter() -> Jitter {
    Arc::new(rand::random::<f64>)
}

/// Heartbeat timing for one physical connection
pub struct Heartbeater {
    interval: Duration,
    jitter: Jitter,
    /// Next scheduled beat; `None` once closed
    deadline: Option<Instant>,
    last_beat: Option<Instant>,
    awaiting_ack: bool,
}

impl Heartbeater {
    /// Start with the interval announced by Hello and arm the jittered first beat
    #[must_use]
    pub fn start(interval: Duration, jitter: Jitter) -> Self {
        let first = scale(interval, jitter());
        tracing::debug!(
            interval_ms = interval.as_millis() as u64,
            first_beat_ms = first.as_millis() as u64,
            "Heartbeat started"
        );

        Self {
            interval,
            jitter,
            deadline: Some(Instant::now() + first),
            last_beat: None,
            awaiting_ack: false,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time until the next scheduled beat, `None` once closed
    #[must_use]
    pub fn time_until_beat(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resolves when the next beat is due; never resolves once closed.
    ///
    /// Cancel-safe: dropping the future leaves the schedule untouched.
    pub async fn tick(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => future::pending().await,
        }
    }

    /// Record a heartbeat that was just written, scheduled or requested by the
    /// server, and re-arm the timer from now. No-op once closed.
    pub fn ping(&mut self) {
        if self.deadline.is_none() {
            return;
        }

        let now = Instant::now();
        let delay = self.next_delay();
        self.deadline = Some(now + delay);
        self.last_beat = Some(now);
        self.awaiting_ack = true;

        tracing::trace!(next_beat_ms = delay.as_millis() as u64, "Heartbeat sent");
    }

    /// Record an acknowledgment; returns the round-trip latency of the last beat
    pub fn ack(&mut self) -> Option<Duration> {
        self.awaiting_ack = false;
        self.last_beat.map(|sent| sent.elapsed())
    }

    /// Whether the last beat is still waiting for its acknowledgment
    #[must_use]
    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    /// Cancel the timer; later `ping`/`close` calls do nothing
    pub fn close(&mut self) {
        if self.deadline.take().is_some() {
            tracing::debug!("Heartbeat stopped");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.deadline.is_none()
    }

    fn next_delay(&self) -> Duration {
        let half = self.interval / 2;
        half + scale(self.interval - half, (self.jitter)())
    }
}

impl fmt::Debug for Heartbeater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heartbeater")
            .field("interval", &self.interval)
            .field("deadline", &self.deadline)
            .field("awaiting_ack", &self.awaiting_ack)
            .finish()
    }
}

/// `duration × factor`, with the factor clamped into `[0, 1)`
fn scale(duration: Duration, factor: f64) -> Duration {
    let factor = if factor.is_finite() { factor.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = duration.mul_f64(factor);
    if scaled >= duration && !duration.is_zero() {
        duration - Duration::from_millis(1).min(duration)
    } else {
        scaled
    }
}
