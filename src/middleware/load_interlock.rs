//! Tracking in-flight exchanges so code reloading can wait for them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::stack::Interceptor;

/// Counts running exchanges and wakes waiters when the count drops to zero.
#[derive(Debug, Default)]
pub struct Interlock {
    running: AtomicUsize,
    idle: Notify,
}

impl Interlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_running(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub fn done_running(&self) {
        let previous = self
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.idle.notify_waiters();
        }
    }

    /// Number of exchanges between start and finish.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves once no exchange is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.running() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Registers every exchange with a shared [`Interlock`].
#[derive(Clone, Debug, Default)]
pub struct LoadInterlock {
    interlock: Arc<Interlock>,
}

impl LoadInterlock {
    pub fn new(interlock: Arc<Interlock>) -> Self {
        Self { interlock }
    }

    pub fn interlock(&self) -> &Arc<Interlock> {
        &self.interlock
    }
}

impl Interceptor for LoadInterlock {
    fn on_start(&self, _req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        self.interlock.start_running();
        Ok(())
    }

    fn on_finish(&self, _req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        self.interlock.done_running();
        Ok(())
    }
}
