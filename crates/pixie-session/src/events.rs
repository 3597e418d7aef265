//! Observer lists and the notification dispatcher.
//!
//! Publishing never runs callbacks on the caller's thread: each publish
//! enqueues one job on an unbounded channel drained by a dedicated thread,
//! so a slow subscriber delays later notifications of the same owner but
//! never the pump or caller that raised them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;

use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Registered callbacks of one kind.
pub(crate) struct Listeners<F: ?Sized> {
    entries: RwLock<Vec<Arc<F>>>,
}

impl<F: ?Sized> Listeners<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<F>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Listeners registered at this instant.
    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Runs notification jobs on a dedicated thread in publish order.
///
/// The thread exits once the dispatcher is dropped and the queue is empty.
pub(crate) struct Dispatcher {
    tx: Sender<Job>,
}

impl Dispatcher {
    pub(crate) fn spawn(name: String) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new().name(name).spawn(move || {
            for job in rx {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("notification listener panicked");
                }
            }
        })?;
        Ok(Self { tx })
    }

    pub(crate) fn publish(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            debug!("dispatcher thread gone; notification dropped");
        }
    }
}
