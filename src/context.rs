//! Request-scoped cancellation.
//!
//! A [`Context`] carries an optional deadline and any number of cancel
//! signals inherited from its parents. Every engine operation takes one and
//! checks it before touching the driver; drivers also watch it while a
//! statement is in flight.

use crossbeam_channel::{bounded, Receiver, Select, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

struct Signal {
    flag: Arc<AtomicBool>,
    done: Receiver<()>,
}

/// Deadline and cancellation scope for one request.
#[derive(Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    signals: Vec<Arc<Signal>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("signals", &self.signals.len())
            .finish()
    }
}

/// Cancels the [`Context`] returned alongside it by [`Context::with_cancel`].
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    tx: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    /// Cancel the context and every context derived from it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Dropping the sender disconnects every receiver parked in `wait`.
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context with a deadline; an earlier parent deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            signals: self.signals.clone(),
        }
    }

    /// Derive a cancellable context.
    ///
    /// The returned handle cancels on [`CancelHandle::cancel`] or when dropped.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = bounded::<()>(0);
        let flag = Arc::new(AtomicBool::new(false));
        let mut signals = self.signals.clone();
        signals.push(Arc::new(Signal {
            flag: Arc::clone(&flag),
            done: rx,
        }));
        let ctx = Self {
            deadline: self.deadline,
            signals,
        };
        let handle = CancelHandle {
            flag,
            tx: Mutex::new(Some(tx)),
        };
        (ctx, handle)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The context can ever become done.
    pub fn is_cancellable(&self) -> bool {
        self.deadline.is_some() || !self.signals.is_empty()
    }

    /// Why the context is done, if it is.
    ///
    /// Cancellation takes precedence over an expired deadline.
    pub fn err(&self) -> Option<Error> {
        if self.signals.iter().any(|s| s.flag.load(Ordering::SeqCst)) {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// `Err` when the context is done.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Lock-free snapshot suitable for polling from driver callbacks.
    pub fn probe(&self) -> Probe {
        Probe {
            flags: self.signals.iter().map(|s| Arc::clone(&s.flag)).collect(),
            deadline: self.deadline,
        }
    }

    /// Block until the context is done or `stop` fires.
    ///
    /// Returns the context error, or `None` when `stop` received a message
    /// or was disconnected first.
    pub fn wait(&self, stop: &Receiver<()>) -> Option<Error> {
        let mut sel = Select::new();
        let stop_index = sel.recv(stop);
        for signal in &self.signals {
            sel.recv(&signal.done);
        }
        let oper = match self.deadline {
            Some(deadline) => match sel.select_deadline(deadline) {
                Ok(oper) => oper,
                Err(_) => return Some(Error::DeadlineExceeded),
            },
            None => sel.select(),
        };
        let index = oper.index();
        if index == stop_index {
            let _ = oper.recv(stop);
            return None;
        }
        let _ = oper.recv(&self.signals[index - 1].done);
        Some(Error::Cancelled)
    }
}

/// Polling view of a [`Context`].
#[derive(Clone)]
pub struct Probe {
    flags: Vec<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl Probe {
    pub fn err(&self) -> Option<Error> {
        if self.flags.iter().any(|f| f.load(Ordering::SeqCst)) {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }
}
