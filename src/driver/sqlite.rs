//! Bundled SQLite driver.
//!
//! One `rusqlite::Connection` behind a mutex. Context cancellation is
//! enforced with SQLite's progress handler, which interrupts a running
//! statement as soon as the context is done.
//!
//! An open [`SqliteTx`] owns the connection until it commits, rolls back or
//! is dropped. Root calls from other threads wait for it; root calls from
//! the thread that opened it fail.

use chrono::SecondsFormat;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::gate::TxGate;
use super::{instrumented, Dialect, Driver, ExecResult, Statement, TxDriver};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::value::{Row, Value};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Virtual machine steps between cancellation checks.
const PROGRESS_STEPS: i32 = 1_000;

struct Shared {
    conn: Mutex<Connection>,
    gate: TxGate,
}

/// SQLite-backed [`Driver`].
#[derive(Clone)]
pub struct SqliteDriver {
    shared: Arc<Shared>,
}

impl SqliteDriver {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::driver)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::driver)?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection; foreign keys are switched on.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(Error::driver)?;
        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                gate: TxGate::default(),
            }),
        })
    }

    /// Run a script of `;`-separated statements, e.g. table setup.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let _gate = self.shared.gate.acquire(&Context::background())?;
        let conn = lock(&self.shared.conn)?;
        conn.execute_batch(sql).map_err(|e| translate(e, None))
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| Error::driver_msg("sqlite connection mutex poisoned"))
}

/// Run `f` on the locked connection with cancellation wired in.
fn with_conn<T>(
    conn: &Mutex<Connection>,
    ctx: &Context,
    f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> Result<T> {
    ctx.check()?;
    let conn = lock(conn)?;
    let probe = ctx.probe();
    conn.progress_handler(PROGRESS_STEPS, Some(move || probe.is_done()));
    let result = f(&conn);
    conn.progress_handler(0, None::<fn() -> bool>);
    result.map_err(|e| translate(e, Some(ctx)))
}

fn translate(err: rusqlite::Error, ctx: Option<&Context>) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        match failure.code {
            ErrorCode::OperationInterrupted => {
                return ctx.and_then(Context::err).unwrap_or(Error::Cancelled);
            }
            ErrorCode::ConstraintViolation => {
                let message = message.clone().unwrap_or_else(|| failure.to_string());
                return Error::constraint(message, err);
            }
            _ => {}
        }
    }
    Error::driver(err)
}

fn run_query(conn: &Mutex<Connection>, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
    instrumented(stmt, || {
        with_conn(conn, ctx, |conn| {
            let mut prepared = conn.prepare_cached(&stmt.sql)?;
            let columns: Arc<[String]> = prepared
                .column_names()
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
                .into();
            let width = columns.len();
            let mut rows = prepared.query(params_from_iter(stmt.values.iter().map(Param)))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(from_sql(row.get_ref(i)?));
                }
                out.push(Row::new(Arc::clone(&columns), values));
            }
            Ok(out)
        })
    })
}

fn run_exec(conn: &Mutex<Connection>, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
    instrumented(stmt, || {
        with_conn(conn, ctx, |conn| {
            let affected = conn.execute(&stmt.sql, params_from_iter(stmt.values.iter().map(Param)))?;
            Ok(ExecResult {
                rows_affected: affected as u64,
                last_insert_id: Some(conn.last_insert_rowid()),
            })
        })
    })
}

struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::String(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(&v[..])),
            // Fixed-width UTC text keeps lexical order chronological.
            Value::Time(v) => {
                ToSqlOutput::Owned(SqlValue::Text(v.to_rfc3339_opts(SecondsFormat::Micros, true)))
            }
            Value::Uuid(v) => ToSqlOutput::Owned(SqlValue::Text(v.to_string())),
            Value::Json(v) => ToSqlOutput::Owned(SqlValue::Text(v.to_string())),
        })
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(v) => Value::String(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
    }
}

impl Driver for SqliteDriver {
    fn query(&self, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
        let _gate = self.shared.gate.acquire(ctx)?;
        run_query(&self.shared.conn, ctx, stmt)
    }

    fn exec(&self, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
        let _gate = self.shared.gate.acquire(ctx)?;
        run_exec(&self.shared.conn, ctx, stmt)
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn begin(&self, ctx: &Context) -> Result<Arc<dyn TxDriver>> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        let gate = self.shared.gate.acquire(ctx)?;
        with_conn(&self.shared.conn, ctx, |conn| conn.execute_batch("BEGIN"))?;
        TxGate::claim(gate);
        Ok(Arc::new(SqliteTx {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Open SQLite transaction; owns the connection until it is finished.
pub struct SqliteTx {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl SqliteTx {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TxClosed);
        }
        Ok(())
    }

    /// End the transaction and hand the connection back to the root driver.
    fn finish(&self, sql: &str) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::TxClosed);
        }
        let result = lock(&self.shared.conn).and_then(|conn| {
            let result = conn.execute_batch(sql).map_err(|e| translate(e, None));
            // A failed COMMIT can leave the transaction open.
            if !conn.is_autocommit() {
                if let Err(err) = conn.execute_batch("ROLLBACK") {
                    log::warn!(target: "entgraph::tx", "sqlite rollback after failed {sql} failed: {err}");
                }
            }
            result
        });
        self.shared.gate.release();
        result
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.finish("ROLLBACK") {
            log::warn!(target: "entgraph::tx", "rollback of abandoned sqlite transaction failed: {err}");
        }
    }
}

impl Driver for SqliteTx {
    fn query(&self, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
        self.ensure_open()?;
        run_query(&self.shared.conn, ctx, stmt)
    }

    fn exec(&self, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
        self.ensure_open()?;
        run_exec(&self.shared.conn, ctx, stmt)
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn begin(&self, _ctx: &Context) -> Result<Arc<dyn TxDriver>> {
        self.ensure_open()?;
        Err(Error::driver_msg("nested transactions are not supported"))
    }

    fn in_tx(&self) -> bool {
        true
    }
}

impl TxDriver for SqliteTx {
    fn commit(&self) -> Result<()> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();
        self.finish("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();
        self.finish("ROLLBACK")
    }

    fn as_driver(self: Arc<Self>) -> Arc<dyn Driver> {
        self
    }
}
