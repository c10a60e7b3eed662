// Time Source Module
// Every wait in the recovery path goes through TimeSource so scenarios can run on a manual clock

// Import Embassy time utilities
use embassy_time::{Duration, Instant, Timer};

/// Clock and sleep provider shared by the controller, watchdog runner and health monitor
#[allow(async_fn_in_trait)]
pub trait TimeSource {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);

    async fn sleep_until(&self, deadline: Instant);
}

/// Embassy timer backed clock used on the device
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyTime;

impl TimeSource for EmbassyTime {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        Timer::after(duration).await
    }

    async fn sleep_until(&self, deadline: Instant) {
        Timer::at(deadline).await
    }
}

impl<T: TimeSource> TimeSource for &T {
    fn now(&self) -> Instant {
        (**self).now()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }

    async fn sleep_until(&self, deadline: Instant) {
        (**self).sleep_until(deadline).await
    }
}

/// True once more than `window` has passed since `last`, or nothing has happened yet
pub fn window_elapsed(last: Option<Instant>, now: Instant, window: Duration) -> bool {
    match last {
        None => true,
        Some(at) => now
            .checked_duration_since(at)
            .map_or(false, |elapsed| elapsed > window),
    }
}
