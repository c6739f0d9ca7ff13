//! Queue of synchronous render callbacks.
//!
//! Sync-lane work does not go through the scheduler heap. It is pushed here
//! and drained either from a scheduler microtask or explicitly at the end of
//! a commit or a [`Root::flush_sync`](crate::Root::flush_sync) call.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

use tracing::trace;

use crate::error::Result;

type SyncCallback = Box<dyn FnOnce() -> Result<()>>;

#[derive(Default)]
pub(crate) struct SyncQueue {
    callbacks: RefCell<VecDeque<SyncCallback>>,
    flushing: Cell<bool>,
}

impl SyncQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, callback: impl FnOnce() -> Result<()> + 'static) {
        self.callbacks.borrow_mut().push_back(Box::new(callback));
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    #[cfg(test)]
    pub(crate) fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    /// Run queued callbacks, including ones queued while draining, until the
    /// queue is empty or one fails. A flush started from inside a callback
    /// returns immediately; the outer flush picks up whatever it queued.
    ///
    /// Callbacks left behind by a failure stay queued for the next flush.
    pub(crate) fn flush(&self) -> Result<usize> {
        if self.flushing.replace(true) {
            return Ok(0);
        }
        let mut ran = 0;
        let outcome = loop {
            let next = self.callbacks.borrow_mut().pop_front();
            let Some(callback) = next else {
                break Ok(ran);
            };
            ran += 1;
            if let Err(err) = callback() {
                break Err(err);
            }
        };
        self.flushing.set(false);
        if ran > 0 {
            trace!(target: "fibra.reconciler", ran, "sync queue flushed");
        }
        outcome
    }
}

impl fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncQueue")
            .field("len", &self.len())
            .field("flushing", &self.flushing.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use std::rc::Rc;

    #[test]
    fn drains_callbacks_queued_while_flushing() {
        let queue = Rc::new(SyncQueue::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let (inner, log) = (Rc::clone(&queue), Rc::clone(&log));
            queue.push(move || {
                log.borrow_mut().push(1);
                let log = Rc::clone(&log);
                inner.push(move || {
                    log.borrow_mut().push(2);
                    Ok(())
                });
                Ok(())
            });
        }
        assert_eq!(queue.flush().unwrap(), 2);
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn nested_flush_is_ignored() {
        let queue = Rc::new(SyncQueue::new());
        let inner = Rc::clone(&queue);
        let nested = Rc::new(Cell::new(None));
        let seen = Rc::clone(&nested);
        queue.push(move || {
            assert!(inner.is_flushing());
            seen.set(Some(inner.flush()?));
            Ok(())
        });
        queue.flush().unwrap();
        assert_eq!(nested.get(), Some(0));
        assert!(!queue.is_flushing());
    }

    #[test]
    fn failure_stops_the_flush_and_keeps_the_rest() {
        let queue = SyncQueue::new();
        queue.push(|| Err(ReconcileError::NestedUpdateLimit { limit: 1 }));
        queue.push(|| Ok(()));
        assert!(matches!(queue.flush(), Err(ReconcileError::NestedUpdateLimit { limit: 1 })));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.flush().unwrap(), 1);
    }
}
