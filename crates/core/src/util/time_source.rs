use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Wall clock used by the experiment loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// System time, sleeping on the tokio timer.
#[derive(Clone, Copy, Default)]
pub struct SystemClock(());

impl SystemClock {
    pub fn new() -> Self {
        SystemClock(())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// A clock that only moves when slept on, so a whole experiment can be driven
/// in a test without waiting.
#[derive(Clone)]
pub struct VirtualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        VirtualClock {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock();
        let advanced = chrono::TimeDelta::from_std(duration)
            .ok()
            .and_then(|delta| current.checked_add_signed(delta));
        if let Some(advanced) = advanced {
            *current = advanced;
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.advance(duration);
        futures::future::ready(()).boxed()
    }
}

/// Time left until the next whole second. A time exactly on a boundary waits a
/// full second.
pub fn until_next_tick(now: DateTime<Utc>) -> Duration {
    // leap seconds report more than a second of nanos
    let subsec = now.timestamp_subsec_nanos() % NANOS_PER_SEC;
    Duration::from_nanos(u64::from(NANOS_PER_SEC - subsec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tick_aligns_to_second_boundary() {
        let now = Utc.timestamp_opt(1_589_371_980, 250_000_000).unwrap();
        assert_eq!(until_next_tick(now), Duration::from_millis(750));
    }

    #[test]
    fn boundary_waits_full_second() {
        let now = Utc.timestamp_opt(1_589_371_980, 0).unwrap();
        assert_eq!(until_next_tick(now), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn virtual_clock_advances_on_sleep() {
        let start = Utc.timestamp_opt(1_589_371_980, 0).unwrap();
        let clock = VirtualClock::new(start);
        clock.sleep(Duration::from_millis(1_500)).await;
        assert_eq!(
            clock.now(),
            Utc.timestamp_opt(1_589_371_981, 500_000_000).unwrap()
        );
    }
}
