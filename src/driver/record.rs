use std::sync::{Arc, Mutex};

use super::{Dialect, Driver, ExecResult, Statement, TxDriver};
use crate::context::Context;
use crate::error::Result;
use crate::value::Row;

type Log = Arc<Mutex<Vec<Statement>>>;

/// Driver wrapper that remembers every statement it forwards.
///
/// Statements issued inside transactions opened through the recorder land
/// in the same log. Useful for asserting round-trip counts.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<dyn Driver>,
    log: Log,
}

impl Recorder {
    pub fn new(inner: impl Driver + 'static) -> Self {
        Self::wrap(Arc::new(inner))
    }

    pub fn wrap(inner: Arc<dyn Driver>) -> Self {
        Self {
            inner,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every statement forwarded so far.
    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    /// Number of SELECT statements.
    pub fn queries(&self) -> usize {
        self.statements().iter().filter(|s| s.is_select()).count()
    }

    pub fn len(&self) -> usize {
        self.log.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }
}

fn push(log: &Log, stmt: &Statement) {
    if let Ok(mut log) = log.lock() {
        log.push(stmt.clone());
    }
}

impl Driver for Recorder {
    fn query(&self, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
        push(&self.log, stmt);
        self.inner.query(ctx, stmt)
    }

    fn exec(&self, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
        push(&self.log, stmt);
        self.inner.exec(ctx, stmt)
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn begin(&self, ctx: &Context) -> Result<Arc<dyn TxDriver>> {
        let tx = self.inner.begin(ctx)?;
        Ok(Arc::new(RecorderTx {
            inner: tx,
            log: Arc::clone(&self.log),
        }))
    }

    fn in_tx(&self) -> bool {
        self.inner.in_tx()
    }
}

struct RecorderTx {
    inner: Arc<dyn TxDriver>,
    log: Log,
}

impl Driver for RecorderTx {
    fn query(&self, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
        push(&self.log, stmt);
        self.inner.query(ctx, stmt)
    }

    fn exec(&self, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
        push(&self.log, stmt);
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

impl TxDriver for RecorderTx {
    fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }

    fn as_driver(self: Arc<Self>) -> Arc<dyn Driver> {
        self
    }
}
