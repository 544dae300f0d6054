use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;

/// Millisecond clock behind nonce generation, injectable for tests
pub trait NonceClock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Real system clock for production use
pub struct SystemClock;

impl NonceClock for SystemClock {
    fn now_millis(&self) -> u64 {
        Utc::now().timestamp_millis() as u64
    }
}

/// Strictly monotone nonce source.
///
/// Issues `max(now_ms, last + 1)`: wall-clock milliseconds while calls
/// are sparse, last + 1 under bursts or a stalled clock. A value is
/// never issued twice.
pub struct NonceCursor {
    last: AtomicU64,
    clock: Arc<dyn NonceClock>,
}

impl NonceCursor {
    pub fn new(clock: Arc<dyn NonceClock>) -> Self {
        NonceCursor {
            last: AtomicU64::new(0),
            clock,
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Issue the next nonce, strictly greater than every one before it
    pub fn next(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                // Lost the race, retry against the published value
                Err(observed) => last = observed,
            }
        }
    }
}

/// Single-flight gate for private exchange calls.
///
/// Exchanges reject nonces that arrive out of order, so one request
/// runs at a time per credential set. tokio's Mutex queues waiters
/// fairly: callers cannot leapfrog each other, and nonces reach the
/// wire in issue order because the nonce is drawn only once the slot
/// is held.
pub struct RequestSerializer {
    slot: Mutex<()>,
    nonces: NonceCursor,
}

impl RequestSerializer {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn NonceClock>) -> Self {
        RequestSerializer {
            slot: Mutex::new(()),
            nonces: NonceCursor::new(clock),
        }
    }

    /// Run one request under the gate with a fresh nonce.
    ///
    /// Failures release the slot like any success and never block the
    /// queue; the failed nonce is simply abandoned.
    pub async fn enqueue<F, Fut, T, E>(&self, request: F) -> Result<T, E>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _slot = self.slot.lock().await;
        let nonce = self.nonces.next();
        request(nonce).await
    }

    /// Issue (and consume) a nonce without running a request
    pub fn next_nonce(&self) -> u64 {
        self.nonces.next()
    }
}

impl Default for RequestSerializer {
    fn default() -> Self {
        Self::new()
    }
}
