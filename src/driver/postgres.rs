//! Blocking PostgreSQL driver.
//!
//! While a statement runs under a cancellable context a short-lived watcher
//! thread waits on the context and fires the connection's cancel token when
//! it is done.
//!
//! An open [`PostgresTx`] owns the client until it commits, rolls back or is
//! dropped; root calls meanwhile follow the same rules as the SQLite driver.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use crossbeam_channel::bounded;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{CancelToken, Client, NoTls};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use uuid::Uuid;

use super::gate::TxGate;
use super::{instrumented, Dialect, Driver, ExecResult, Statement, TxDriver};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::value::{Row, Value};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// PostgreSQL-backed [`Driver`].
#[derive(Clone)]
pub struct PostgresDriver {
    shared: Arc<Shared>,
}

struct Shared {
    client: Mutex<Client>,
    gate: TxGate,
}

impl PostgresDriver {
    /// Connect with a libpq-style URL or key/value string.
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::connect(url, NoTls).map_err(|e| translate(e, None))?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            shared: Arc::new(Shared {
                client: Mutex::new(client),
                gate: TxGate::default(),
            }),
        }
    }

    /// Run a script of `;`-separated statements, e.g. table setup.
    pub fn batch_execute(&self, sql: &str) -> Result<()> {
        let _gate = self.shared.gate.acquire(&Context::background())?;
        let mut client = lock(&self.shared.client)?;
        client.batch_execute(sql).map_err(|e| translate(e, None))
    }
}

fn lock(client: &Mutex<Client>) -> Result<MutexGuard<'_, Client>> {
    client
        .lock()
        .map_err(|_| Error::driver_msg("postgres client mutex poisoned"))
}

/// Run `f` on the locked client, cancelling the backend query if `ctx`
/// finishes first.
fn with_client<T>(
    client: &Mutex<Client>,
    ctx: &Context,
    f: impl FnOnce(&mut Client) -> std::result::Result<T, postgres::Error>,
) -> Result<T> {
    ctx.check()?;
    let mut client = lock(client)?;
    if !ctx.is_cancellable() {
        return f(&mut client).map_err(|e| translate(e, Some(ctx)));
    }

    let token: CancelToken = client.cancel_token();
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let watched = ctx.clone();
    let watcher = thread::spawn(move || {
        if watched.wait(&stop_rx).is_some() {
            if let Err(err) = token.cancel_query(NoTls) {
                log::warn!(target: "entgraph::driver", "failed to cancel postgres query: {err}");
            }
        }
    });

    let result = f(&mut client);
    drop(stop_tx);
    let _ = watcher.join();
    result.map_err(|e| translate(e, Some(ctx)))
}

fn translate(err: postgres::Error, ctx: Option<&Context>) -> Error {
    if let Some(code) = err.code() {
        if *code == postgres::error::SqlState::QUERY_CANCELED {
            return ctx.and_then(Context::err).unwrap_or(Error::Cancelled);
        }
        // Class 23: integrity constraint violation
        if code.code().starts_with("23") {
            let message = err
                .as_db_error()
                .map(|db| db.message().to_owned())
                .unwrap_or_else(|| err.to_string());
            return Error::constraint(message, err);
        }
    }
    Error::driver(err)
}

#[derive(Debug)]
struct PgParam<'a>(&'a Value);

type BoxError = Box<dyn StdError + Sync + Send>;

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::String(v) => {
                if *ty == Type::UUID {
                    Uuid::parse_str(v)?.to_sql(ty, out)
                } else if *ty == Type::JSON || *ty == Type::JSONB {
                    serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out)
                } else {
                    v.as_str().to_sql(ty, out)
                }
            }
            Value::Bytes(v) => v.as_slice().to_sql(ty, out),
            Value::Time(v) => {
                if *ty == Type::TIMESTAMP {
                    v.naive_utc().to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Uuid(v) => {
                if *ty == Type::UUID {
                    v.to_sql(ty, out)
                } else {
                    v.to_string().as_str().to_sql(ty, out)
                }
            }
            Value::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn decode(row: &postgres::Row, index: usize) -> Result<Value> {
    macro_rules! get {
        ($t:ty) => {
            row.try_get::<_, Option<$t>>(index).map_err(Error::driver)?
        };
    }
    let ty = row.columns()[index].type_();
    let value = if *ty == Type::BOOL {
        get!(bool).map_or(Value::Null, Value::Bool)
    } else if *ty == Type::INT2 {
        get!(i16).map_or(Value::Null, |v| Value::Int(v.into()))
    } else if *ty == Type::INT4 {
        get!(i32).map_or(Value::Null, |v| Value::Int(v.into()))
    } else if *ty == Type::INT8 {
        get!(i64).map_or(Value::Null, Value::Int)
    } else if *ty == Type::FLOAT4 {
        get!(f32).map_or(Value::Null, |v| Value::Float(v.into()))
    } else if *ty == Type::FLOAT8 {
        get!(f64).map_or(Value::Null, Value::Float)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME {
        get!(String).map_or(Value::Null, Value::String)
    } else if *ty == Type::BYTEA {
        get!(Vec<u8>).map_or(Value::Null, Value::Bytes)
    } else if *ty == Type::TIMESTAMPTZ {
        get!(DateTime<Utc>).map_or(Value::Null, Value::Time)
    } else if *ty == Type::TIMESTAMP {
        get!(NaiveDateTime).map_or(Value::Null, |v| Value::Time(v.and_utc()))
    } else if *ty == Type::UUID {
        get!(Uuid).map_or(Value::Null, Value::Uuid)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        get!(serde_json::Value).map_or(Value::Null, Value::Json)
    } else {
        return Err(Error::Scan(format!("unsupported postgres column type {ty}")));
    };
    Ok(value)
}

fn run_query(client: &Mutex<Client>, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
    instrumented(stmt, || {
        let params: Vec<PgParam<'_>> = stmt.values.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = with_client(client, ctx, |c| c.query(stmt.sql.as_str(), &refs))?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns: Arc<[String]> = first
            .columns()
            .iter()
            .map(|c| c.name().to_owned())
            .collect::<Vec<_>>()
            .into();
        rows.iter()
            .map(|row| {
                let values = (0..columns.len())
                    .map(|i| decode(row, i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Row::new(Arc::clone(&columns), values))
            })
            .collect()
    })
}

fn run_exec(client: &Mutex<Client>, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
    instrumented(stmt, || {
        let params: Vec<PgParam<'_>> = stmt.values.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let affected = with_client(client, ctx, |c| c.execute(stmt.sql.as_str(), &refs))?;
        Ok(ExecResult {
            rows_affected: affected,
            last_insert_id: None,
        })
    })
}

impl Driver for PostgresDriver {
    fn query(&self, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
        let _gate = self.shared.gate.acquire(ctx)?;
        run_query(&self.shared.client, ctx, stmt)
    }

    fn exec(&self, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
        let _gate = self.shared.gate.acquire(ctx)?;
        run_exec(&self.shared.client, ctx, stmt)
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn begin(&self, ctx: &Context) -> Result<Arc<dyn TxDriver>> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        let gate = self.shared.gate.acquire(ctx)?;
        with_client(&self.shared.client, ctx, |c| c.batch_execute("BEGIN"))?;
        TxGate::claim(gate);
        Ok(Arc::new(PostgresTx {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Open PostgreSQL transaction; owns the client until it is finished.
pub struct PostgresTx {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl PostgresTx {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TxClosed);
        }
        Ok(())
    }

    fn finish(&self, sql: &str) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::TxClosed);
        }
        let result = lock(&self.shared.client)
            .and_then(|mut client| client.batch_execute(sql).map_err(|e| translate(e, None)));
        self.shared.gate.release();
        result
    }
}

impl Drop for PostgresTx {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.finish("ROLLBACK") {
            log::warn!(target: "entgraph::tx", "rollback of abandoned postgres transaction failed: {err}");
        }
    }
}

impl Driver for PostgresTx {
    fn query(&self, ctx: &Context, stmt: &Statement) -> Result<Vec<Row>> {
        self.ensure_open()?;
        run_query(&self.shared.client, ctx, stmt)
    }

    fn exec(&self, ctx: &Context, stmt: &Statement) -> Result<ExecResult> {
        self.ensure_open()?;
        run_exec(&self.shared.client, ctx, stmt)
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn begin(&self, _ctx: &Context) -> Result<Arc<dyn TxDriver>> {
        self.ensure_open()?;
        Err(Error::driver_msg("nested transactions are not supported"))
    }

    fn in_tx(&self) -> bool {
        true
    }
}

impl TxDriver for PostgresTx {
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
