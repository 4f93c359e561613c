//! Connection ownership for single-connection drivers.
//!
//! While a transaction is open it owns the driver's connection. Root calls
//! from other threads wait for it to finish; root calls from the thread that
//! opened it fail, because they could neither join the transaction safely
//! nor wait for it.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::context::Context;
use crate::error::{Error, Result};

/// How often a root call blocked on an open transaction rechecks its context.
const POLL: Duration = Duration::from_millis(10);

/// Held by root calls for the duration of one statement.
pub(crate) type GateGuard<'a> = MutexGuard<'a, Option<ThreadId>>;

#[derive(Default)]
pub(crate) struct TxGate {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl TxGate {
    /// Wait until no transaction owns the connection. The guard keeps new
    /// transactions out while the caller runs its statement.
    pub(crate) fn acquire(&self, ctx: &Context) -> Result<GateGuard<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().map_err(|_| poisoned())?;
        loop {
            match *owner {
                None => return Ok(owner),
                Some(id) if id == me => {
                    return Err(Error::driver_msg(
                        "connection is held by a transaction opened on this thread",
                    ));
                }
                Some(_) => {}
            }
            ctx.check()?;
            owner = self.released.wait_timeout(owner, POLL).map_err(|_| poisoned())?.0;
        }
    }

    /// Hand the connection to a transaction begun on the current thread.
    pub(crate) fn claim(mut guard: GateGuard<'_>) {
        *guard = Some(thread::current().id());
    }

    /// The transaction is over; wake waiting root calls.
    pub(crate) fn release(&self) {
        match self.owner.lock() {
            Ok(mut owner) => *owner = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        self.released.notify_all();
    }
}

fn poisoned() -> Error {
    Error::driver_msg("transaction gate poisoned")
}
