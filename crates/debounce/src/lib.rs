//! Debouncer
//!
//! Collapses bursts of trigger events into a single background execution of a
//! bound function. The execution sleeps for the debounce interval, runs the
//! function and retries it (after another interval) until it succeeds.
//!
//! At most one execution loop exists per [`Debouncer`] at any time. Triggers
//! that arrive while the loop is sleeping are absorbed; triggers that arrive
//! while the function is running cause exactly one extra run after the
//! in-flight run succeeds. Cancelling the token stops the loop, including any
//! pending retries.

use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type DebouncedFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

struct Inner {
    name: String,
    interval: Duration,
    cancel: CancellationToken,
    scheduled: AtomicBool,
    called_during_execution: AtomicBool,
    func: Box<DebouncedFn>,
}

/// Single-flight, retry-until-success scheduler
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("name", &self.inner.name)
            .field("interval", &self.inner.interval)
            .field("scheduled", &self.is_scheduled())
            .finish_non_exhaustive()
    }
}

impl Debouncer {
    /// Create a debouncer for `func`.
    ///
    /// `name` is only used in log output.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        interval: Duration,
        cancel: CancellationToken,
        func: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                interval,
                cancel,
                scheduled: AtomicBool::new(false),
                called_during_execution: AtomicBool::new(false),
                func: Box::new(move || Box::pin(func())),
            }),
        }
    }

    /// Schedule an execution unless one is already pending.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn debounce(&self) {
        if self
            .inner
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("{}: scheduling debounced run", self.inner.name);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run().await });
        } else {
            self.inner
                .called_during_execution
                .store(true, Ordering::Release);
        }
    }

    /// Whether an execution loop is currently pending or running.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.inner.scheduled.load(Ordering::Acquire)
    }
}

impl Inner {
    async fn run(&self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("{}: debouncer cancelled", self.name);
                    self.scheduled.store(false, Ordering::Release);
                    return;
                }
                () = tokio::time::sleep(self.interval) => {}
            }

            // Triggers seen so far are covered by the run below.
            self.called_during_execution.store(false, Ordering::Release);

            match (self.func)().await {
                Ok(()) => {
                    self.scheduled.store(false, Ordering::Release);
                    if self.called_during_execution.swap(false, Ordering::AcqRel)
                        && self
                            .scheduled
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                    {
                        debug!("{}: triggered during execution, running again", self.name);
                        continue;
                    }
                    return;
                }
                Err(e) => {
                    warn!("{}: debounced run failed, retrying: {:#}", self.name, e);
                }
            }
        }
    }
}
