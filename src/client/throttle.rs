//! Outbound rate limiting.

/// Default minimum spacing between state sends (~30 per second).
pub const SEND_INTERVAL_MS: u64 = 33;

/// Allows at most one send per interval.
#[derive(Clone, Copy, Debug)]
pub struct SendThrottle {
    interval_ms: u64,
    last_sent: Option<u64>,
}

impl Default for SendThrottle {
    fn default() -> Self {
        Self::new(SEND_INTERVAL_MS)
    }
}

impl SendThrottle {
    /// Throttle with a custom interval.
    pub fn new(interval_ms: u64) -> Self {
        Self { interval_ms, last_sent: None }
    }

    /// Returns true (and records the send) if a send is allowed at `now_ms`.
    pub fn ready(&mut self, now_ms: u64) -> bool {
        let due = match self.last_sent {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        };
        if due {
            self.last_sent = Some(now_ms);
        }
        due
    }

    /// Forget the last send so the next check passes.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing() {
        let mut throttle = SendThrottle::default();
        let sent: Vec<u64> = (0..10u64).map(|i| i * 16).filter(|&t| throttle.ready(t)).collect();
        assert_eq!(sent, vec![0, 48, 96, 144]);
    }

    #[test]
    fn test_reset_allows_immediate_send() {
        let mut throttle = SendThrottle::new(100);
        assert!(throttle.ready(5));
        assert!(!throttle.ready(6));
        throttle.reset();
        assert!(throttle.ready(7));
    }
}
