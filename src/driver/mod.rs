//! Driver abstraction.
//!
//! A [`Driver`] executes parameterized statements, reports its [`Dialect`]
//! and opens transactions. The engine builds statements with `sea_query`,
//! hands them to the driver and never looks at connections itself, so any
//! backend (direct connection, transaction, recording wrapper) can be used
//! interchangeably.

mod debug;
mod dialect;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod gate;
mod record;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use debug::DebugDriver;
pub use dialect::Dialect;
pub use record::Recorder;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::context::Context;
use crate::error::Result;
use crate::value::{Row, Value};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// A SQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    /// Statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    pub fn is_select(&self) -> bool {
        self.sql.trim_start().get(..6).is_some_and(|head| head.eq_ignore_ascii_case("select"))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.values.is_empty() {
            let args: Vec<String> = self.values.iter().map(ToString::to_string).collect();
            write!(f, " args=[{}]", args.join(", "))?;
        }
        Ok(())
    }
}

/// Outcome of a non-query statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Backend-generated id of the last inserted row, when the backend reports one
    pub last_insert_id: Option<i64>,
}

/// Executes statements for the engine.
pub trait Driver: Send + Sync {
    /// Run a statement that returns rows.
    ///
    /// # Errors
    ///
    /// Context errors when `ctx` is done before or during execution,
    /// [`crate::Error::Constraint`] for constraint violations and
    /// [`crate::Error::Driver`] for anything else.
    fn query(&self, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>>;

    /// Run a statement for its side effects.
    fn exec(&self, ctx: &Context, stmt: &Statement) -> Result<ExecResult>;

    fn dialect(&self) -> Dialect;

    /// Open a transaction.
    ///
    /// Drivers that are already a transaction return an error; nested
    /// transactions are not supported.
    fn begin(&self, ctx: &Context) -> Result<Arc<dyn TxDriver>>;

    /// This driver is an open transaction.
    fn in_tx(&self) -> bool {
        false
    }
}

/// A driver bound to one open transaction.
///
/// After `commit` or `rollback` every call fails with
/// [`crate::Error::TxClosed`].
pub trait TxDriver: Driver {
    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn as_driver(self: Arc<Self>) -> Arc<dyn Driver>;
}

/// Wrap one driver call with the statement span and metrics.
pub(crate) fn instrumented<T>(stmt: &Statement, run: impl FnOnce() -> Result<T>) -> Result<T> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::execute_statement_span(&stmt.sql).entered();

    let start = Instant::now();
    let result = run();
    let elapsed = start.elapsed();

    #[cfg(feature = "metrics")]
    {
        METRICS.record_statement(elapsed);
        if result.is_err() {
            METRICS.record_statement_error();
        }
    }

    match &result {
        Ok(_) => log::trace!(target: "entgraph::driver", "{} ({elapsed:?})", stmt.sql),
        Err(err) => log::debug!(target: "entgraph::driver", "{} failed after {elapsed:?}: {err}", stmt.sql),
    }
    result
}
