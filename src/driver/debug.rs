use std::sync::Arc;

use super::{Dialect, Driver, ExecResult, Statement, TxDriver};
use crate::context::Context;
use crate::error::Result;
use crate::value::Row;

/// Driver wrapper logging every statement under `entgraph::sql`.
///
/// Installed by the client in debug mode. Transactions opened through it
/// keep logging.
pub struct DebugDriver {
    inner: Arc<dyn Driver>,
}

impl DebugDriver {
    pub fn new(inner: Arc<dyn Driver>) -> Self {
        Self { inner }
    }
}

impl Driver for DebugDriver {
    fn query(&self, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
        log::debug!(target: "entgraph::sql", "{stmt}");
        self.inner.query(ctx, stmt)
    }

    fn exec(&self, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
        log::debug!(target: "entgraph::sql", "{stmt}");
        self.inner.exec(ctx, stmt)
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn begin(&self, ctx: &Context) -> Result<Arc<dyn TxDriver>> {
        let tx = self.inner.begin(ctx)?;
        log::debug!(target: "entgraph::sql", "BEGIN");
        Ok(Arc::new(DebugTx { inner: tx }))
    }

    fn in_tx(&self) -> bool {
        self.inner.in_tx()
    }
}

struct DebugTx {
    inner: Arc<dyn TxDriver>,
}

impl Driver for DebugTx {
    fn query(&self, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
        log::debug!(target: "entgraph::sql", "tx: {stmt}");
        self.inner.query(ctx, stmt)
    }

    fn exec(&self, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
        log::debug!(target: "entgraph::sql", "tx: {stmt}");
        self.inner.exec(ctx, stmt)
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn begin(&self, ctx: &Context) -> Result<Arc<dyn TxDriver>> {
        self.inner.begin(ctx)
    }

    fn in_tx(&self) -> bool {
        true
    }
}

impl TxDriver for DebugTx {
    fn commit(&self) -> Result<()> {
        log::debug!(target: "entgraph::sql", "COMMIT");
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        log::debug!(target: "entgraph::sql", "ROLLBACK");
        self.inner.rollback()
    }

    fn as_driver(self: Arc<Self>) -> Arc<dyn Driver> {
        self
    }
}
