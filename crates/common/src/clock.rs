//! Clock and timing utilities for recording sessions.
//!
//! Every session is anchored to a monotonic epoch captured at start. This
//! module provides:
//! - The session clock (monotonic elapsed time plus wall-clock anchor)
//! - The frame throttle that thins a display-refresh clock down to a target fps

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Fraction of the nominal frame interval that must pass before a refresh
/// tick is accepted.
pub const FRAME_ACCEPT_RATIO: f64 = 0.85;

/// A recording clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment recording started).
///
/// Built on `tokio::time::Instant` so paused-time tests observe the same
/// elapsed values the auto-stop timer does.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    /// The instant recording started.
    epoch: Instant,

    /// Wall-clock time at epoch.
    epoch_wall: DateTime<Utc>,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: Utc::now(),
        }
    }

    /// Time elapsed since recording start.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Milliseconds elapsed since recording start.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Wall-clock time at recording start.
    pub fn epoch_wall(&self) -> DateTime<Utc> {
        self.epoch_wall
    }

    /// The underlying epoch instant.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

/// Accepts display-refresh ticks at roughly the target frame rate.
///
/// A tick is accepted when at least [`FRAME_ACCEPT_RATIO`] of the nominal
/// frame interval has elapsed since the last accepted tick. The first tick
/// is always accepted.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    min_interval_ms: f64,
    last_accepted_ms: Option<f64>,
}

impl FrameThrottle {
    /// Create a throttle targeting `fps` frames per second.
    pub fn new(fps: u32) -> Self {
        let interval_ms = 1000.0 / f64::from(fps.max(1));
        Self {
            min_interval_ms: interval_ms * FRAME_ACCEPT_RATIO,
            last_accepted_ms: None,
        }
    }

    /// Offer a refresh timestamp (milliseconds on the refresh clock).
    /// Returns true and records the tick if it should be rendered.
    pub fn accept(&mut self, now_ms: f64) -> bool {
        match self.last_accepted_ms {
            Some(last) if now_ms - last < self.min_interval_ms => false,
            _ => {
                self.last_accepted_ms = Some(now_ms);
                true
            }
        }
    }

    /// Smallest accepted gap between two frames, in milliseconds.
    pub fn min_interval_ms(&self) -> f64 {
        self.min_interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_elapsed_follows_tokio_time() {
        let clock = RecordingClock::start();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.elapsed(), Duration::from_millis(1500));
        assert!((clock.elapsed_ms() - 1500.0).abs() < 1e-6);
    }

    #[test]
    fn test_throttle_first_tick_always_fires() {
        let mut throttle = FrameThrottle::new(45);
        assert!(throttle.accept(0.0));
    }

    #[test]
    fn test_throttle_uses_85_percent_of_interval() {
        // 30fps -> 33.33ms interval -> 28.33ms acceptance threshold
        let mut throttle = FrameThrottle::new(30);
        assert!(throttle.accept(100.0));
        assert!(!throttle.accept(116.7)); // one 60Hz refresh later
        assert!(!throttle.accept(128.0));
        assert!(throttle.accept(128.5));
    }

    #[test]
    fn test_throttle_at_60hz_refresh_for_45fps() {
        // 45fps threshold is ~18.9ms, so a 60Hz display alternates accept/skip.
        let mut throttle = FrameThrottle::new(45);
        let accepted: Vec<bool> = (0..6)
            .map(|i| throttle.accept(i as f64 * 1000.0 / 60.0))
            .collect();
        assert_eq!(accepted, vec![true, false, true, false, true, false]);
    }
}
