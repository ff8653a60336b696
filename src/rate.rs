//! Frame-interval bookkeeping for one streaming session.
//!
//! Diagnostic only: the numbers feed log lines, never response content.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of intervals in the running average.
pub const RATE_WINDOW: usize = 20;

/// Timing of one sent frame relative to the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTiming {
    pub interval: Duration,
    pub average: Duration,
}

impl FrameTiming {
    pub fn fps(&self) -> f64 {
        per_second(self.interval)
    }

    pub fn average_fps(&self) -> f64 {
        per_second(self.average)
    }
}

fn per_second(interval: Duration) -> f64 {
    let secs = interval.as_secs_f64();
    if secs > 0.0 {
        1.0 / secs
    } else {
        0.0
    }
}

/// Sliding-window average of inter-frame intervals.
#[derive(Debug, Default)]
pub struct RateStats {
    last_frame: Option<Instant>,
    window: VecDeque<Duration>,
    sum: Duration,
    frames: u64,
}

impl RateStats {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(RATE_WINDOW),
            ..Self::default()
        }
    }

    /// Record a successfully sent frame at `now`.
    ///
    /// The first frame of a session only starts the clock and yields `None`.
    pub fn record(&mut self, now: Instant) -> Option<FrameTiming> {
        self.frames += 1;
        let previous = self.last_frame.replace(now)?;
        let interval = now.saturating_duration_since(previous);

        self.window.push_back(interval);
        self.sum += interval;
        if self.window.len() > RATE_WINDOW {
            if let Some(evicted) = self.window.pop_front() {
                self.sum -= evicted;
            }
        }

        Some(FrameTiming {
            interval,
            average: self.sum / self.window.len() as u32,
        })
    }

    pub fn average(&self) -> Option<Duration> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.sum / self.window.len() as u32)
        }
    }

    /// Frames recorded so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_frame(&self) -> Option<Instant> {
        self.last_frame
    }
}
