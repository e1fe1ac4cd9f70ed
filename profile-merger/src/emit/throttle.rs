use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;
use tracing::info;

/// Keeps the job under the CRM's rate limit. Once `max_calls` calls have been made within
/// `window`, the next call first sleeps for `cooldown` and the window starts over.
#[derive(Debug)]
pub struct CallThrottle {
    max_calls: usize,
    window: Duration,
    cooldown: Duration,
    calls: VecDeque<Instant>,
}

impl CallThrottle {
    pub fn new(max_calls: usize, window: Duration, cooldown: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            cooldown,
            calls: VecDeque::new(),
        }
    }

    /// Waits, if needed, until another call may be made, then records the call.
    pub async fn acquire(&mut self) {
        let now = Instant::now();
        self.evict_before(now);

        if self.calls.len() >= self.max_calls {
            info!(
                "made {} calls in {:?}, cooling down for {:?}",
                self.calls.len(),
                self.window,
                self.cooldown
            );
            tokio::time::sleep(self.cooldown).await;
            self.calls.clear();
        }

        self.calls.push_back(Instant::now());
    }

    pub fn calls_in_window(&self) -> usize {
        self.calls.len()
    }

    fn evict_before(&mut self, now: Instant) {
        while let Some(first) = self.calls.front() {
            if now.duration_since(*first) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}
