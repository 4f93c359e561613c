//! Transactions.
//!
//! [`Client::tx`] opens a transaction and returns a [`Tx`]: a handle that
//! derefs to a [`Client`] bound to the transaction driver, so every builder
//! obtained from it runs inside the transaction with the same hooks and
//! interceptors. After [`Tx::commit`] or [`Tx::rollback`] that client
//! refuses work with [`Error::TxClosed`]; it never falls back to the
//! parent driver.
//!
//! A `Tx` dropped without being finished is rolled back.
//!
//! ```no_run
//! # use entgraph::{Client, Context, Result};
//! # fn run(client: &Client) -> Result<()> {
//! let ctx = Context::background();
//! client.with_tx(&ctx, |tx| {
//!     tx.driver(); // statements issued through `tx` share one transaction
//!     Ok(())
//! })
//! # }
//! ```

use std::ops::Deref;
use std::sync::Arc;

use crate::client::Client;
use crate::context::Context;
use crate::driver::{Driver, TxDriver};
use crate::error::{Error, Result};

/// An open transaction.
pub struct Tx {
    client: Client,
    tx: Arc<dyn TxDriver>,
    finished: bool,
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("dialect", &self.tx.dialect())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Tx {
    pub(crate) fn new(client: Client, tx: Arc<dyn TxDriver>) -> Self {
        Self {
            client,
            tx,
            finished: false,
        }
    }

    /// Client bound to this transaction.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.tx.commit()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.tx.rollback()
    }
}

impl Deref for Tx {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::warn!(
            target: "entgraph::tx",
            "transaction dropped without commit or rollback, rolling back"
        );
        if let Err(err) = self.tx.rollback() {
            log::warn!(target: "entgraph::tx", "rollback of dropped transaction failed: {err}");
        }
    }
}

/// Run `f` in a transaction unless `driver` already is one.
///
/// Commits when `f` succeeds and rolls back when it fails; the error of
/// `f` is returned even if the rollback fails too.
pub(crate) fn atomically<T>(
    driver: &Arc<dyn Driver>,
    ctx: &Context,
    f: impl FnOnce(&Arc<dyn Driver>) -> Result<T>,
) -> Result<T> {
    if driver.in_tx() {
        return f(driver);
    }
    let tx = driver.begin(ctx)?;
    let scoped = Arc::clone(&tx).as_driver();
    match f(&scoped) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            rollback_after(&*tx, &err);
            Err(err)
        }
    }
}

pub(crate) fn rollback_after(tx: &dyn TxDriver, cause: &Error) {
    if let Err(rollback) = tx.rollback() {
        log::warn!(
            target: "entgraph::tx",
            "rollback after \"{cause}\" failed: {rollback}"
        );
    }
}
