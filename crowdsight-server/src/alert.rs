// Crowd alert state: runtime threshold plus a cooldown between firings

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct AlertState {
    threshold: u32,
    cooldown: Duration,
    last_alert_at: Option<Instant>,
}

impl AlertState {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            last_alert_at: None,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold;
    }

    /// Check-and-set for one completed frame. Returns true when an alert fires;
    /// firing restarts the cooldown window.
    pub fn observe(&mut self, count: u32, now: Instant) -> bool {
        if count < self.threshold {
            return false;
        }
        let cooled_down = match self.last_alert_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.cooldown,
        };
        if cooled_down {
            self.last_alert_at = Some(now);
        }
        cooled_down
    }
}
