//! Rate-limited logging.
//!
//! A poll loop that is rejected every few seconds would otherwise emit one
//! warning per rejection. `LogThrottle` lets the first message through,
//! counts the ones suppressed inside the interval, and reports that count
//! with the next message it allows.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last_emitted: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: None,
            suppressed: 0,
        }
    }

    /// Returns `Some(suppressed_since_last)` when a message may be emitted.
    pub fn permit(&mut self) -> Option<u64> {
        let now = Instant::now();
        let due = self
            .last_emitted
            .map_or(true, |last| now.duration_since(last) >= self.interval);

        if due {
            self.last_emitted = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }

    /// Messages swallowed since the last permitted one.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_permits_once_per_interval() {
        let mut throttle = LogThrottle::new(Duration::from_secs(10));

        assert_eq!(throttle.permit(), Some(0));
        assert_eq!(throttle.permit(), None);
        assert_eq!(throttle.permit(), None);
        assert_eq!(throttle.suppressed(), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(throttle.permit(), Some(2));
        assert_eq!(throttle.suppressed(), 0);
    }
}
