// src/rate_limit.rs
use std::time::Duration;
use tokio::time::Instant;

/// Enforces a minimum gap between successive outbound calls.
///
/// Call [`wait_until_expired`](Self::wait_until_expired) right before the
/// request and [`restart`](Self::restart) once the response is in.
#[derive(Debug)]
pub struct MinIntervalTimer {
    interval: Duration,
    last: Option<Instant>,
}

impl MinIntervalTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn remaining(&self) -> Duration {
        match self.last {
            Some(t) => self.interval.saturating_sub(t.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub async fn wait_until_expired(&self) {
        let left = self.remaining();
        if !left.is_zero() {
            tokio::time::sleep(left).await;
        }
    }

    pub fn restart(&mut self) {
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_does_not_wait_then_gap_is_enforced() {
        let mut t = MinIntervalTimer::new(Duration::from_millis(200));
        let start = Instant::now();
        t.wait_until_expired().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        t.restart();
        t.wait_until_expired().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
