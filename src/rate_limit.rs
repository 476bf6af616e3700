use std::time::Duration;
use tokio::time::Instant;

/// Fixed-quota limiter over a window that starts with its first call.
///
/// Once `max_calls` have been made inside the current window, the next
/// caller is told to wait for the rest of that window only.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: u32,
    window: Duration,
    window_start: Option<Instant>,
    calls_in_window: u32,
}

impl RateLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            window_start: None,
            calls_in_window: 0,
        }
    }

    /// Registers a call made at `now`. Returns how long to sleep before
    /// issuing it, if the window's quota is already used up.
    pub fn acquire(&mut self, now: Instant) -> Option<Duration> {
        let start = match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.window => start,
            _ => {
                self.start_window(now);
                return None;
            }
        };

        if self.calls_in_window < self.max_calls {
            self.calls_in_window += 1;
            return None;
        }

        let residual = self.window - now.saturating_duration_since(start);
        self.start_window(now + residual);
        Some(residual)
    }

    fn start_window(&mut self, at: Instant) {
        self.window_start = Some(at);
        self.calls_in_window = 1;
    }

    /// Waits as long as [`acquire`](Self::acquire) demands.
    pub async fn wait(&mut self) {
        if let Some(residual) = self.acquire(Instant::now()) {
            log::info!(
                "Rate limit of {} calls per {:?} reached, sleeping {:.1}s",
                self.max_calls,
                self.window,
                residual.as_secs_f64()
            );
            tokio::time::sleep(residual).await;
        }
    }
}
