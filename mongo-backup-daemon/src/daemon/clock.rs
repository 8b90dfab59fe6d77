//! Time source for the control loop.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Wall clock and sleep, injectable so the loop can be driven without
/// waiting in real time.
pub trait Clock {
    fn now(&self) -> SystemTime;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

/// The real clock, sleeping on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> SystemTime {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        (**self).sleep(duration)
    }
}
