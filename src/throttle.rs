use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Gate every outbound request passes before it is sent.
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Suspends until the caller may issue its request.
    async fn acquire(&self);
}

/// Process-wide minimum spacing between requests, independent of source.
///
/// Waiters queue on the inner mutex, so concurrent fetchers are released one
/// interval apart in arrival order.
pub struct RateThrottle {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Throttle for RateThrottle {
    async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = match *next {
            Some(at) if at > now => {
                tokio::time::sleep_until(at).await;
                at
            }
            _ => now,
        };
        *next = Some(slot + self.min_interval);
    }
}
