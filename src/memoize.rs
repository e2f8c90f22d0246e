//! Single-value memoization with a fixed validity window

use crate::clock::{system_clock, SharedClock};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

type Supplier<T, E> = Box<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Returned when a refresh fails. Carries the last good value, if any.
#[derive(Debug)]
pub struct RefreshError<T, E> {
    pub stale: Option<T>,
    pub error: E,
}

impl<T, E: fmt::Display> fmt::Display for RefreshError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "refreshing memoized value failed: {}", self.error)
    }
}

impl<T: fmt::Debug, E: fmt::Debug + fmt::Display> std::error::Error for RefreshError<T, E> {}

struct Slot<T> {
    value: T,
    valid_until: Instant,
}

/// Caches the result of `supplier` for `window`.
///
/// Refreshes are serialized: callers arriving while a refresh runs wait for
/// it instead of starting their own.
pub struct Memoized<T, E> {
    slot: Mutex<Option<Slot<T>>>,
    supplier: Supplier<T, E>,
    window: Duration,
    clock: SharedClock,
}

impl<T, E> Memoized<T, E>
where
    T: Clone + Send + 'static,
    E: Send + 'static,
{
    pub fn new<F, Fut>(window: Duration, supplier: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::with_clock(window, system_clock(), supplier)
    }

    pub fn with_clock<F, Fut>(window: Duration, clock: SharedClock, supplier: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            slot: Mutex::new(None),
            supplier: Box::new(move || supplier().boxed()),
            window,
            clock,
        }
    }

    pub async fn get(&self) -> Result<T, RefreshError<T, E>> {
        let mut slot = self.slot.lock().await;

        if let Some(current) = slot.as_ref() {
            if current.valid_until > self.clock.now() {
                return Ok(current.value.clone());
            }
        }

        match (self.supplier)().await {
            Ok(value) => {
                *slot = Some(Slot {
                    value: value.clone(),
                    valid_until: self.clock.now() + self.window,
                });
                Ok(value)
            }
            Err(error) => Err(RefreshError {
                stale: slot.as_ref().map(|current| current.value.clone()),
                error,
            }),
        }
    }
}
