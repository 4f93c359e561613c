//! `sea_query` glue: identifiers, column references and per-dialect
//! statement building.

use sea_query::{DynIden, Expr};

use crate::driver::Statement;
use crate::error::Result;
use crate::value::Value;

/// Owned identifier for a table, column or alias.
pub fn ident(name: &str) -> DynIden {
    DynIden::from(name.to_owned())
}

/// Table-qualified column reference.
pub fn col(table: &str, column: &str) -> Expr {
    Expr::col((ident(table), ident(column)))
}

/// Bindable value expression.
pub fn val(value: &Value) -> Expr {
    Expr::val(value.to_sea())
}

/// Render any `sea_query` statement for a dialect and collect its
/// parameters.
macro_rules! build_statement {
    ($stmt:expr, $dialect:expr) => {{
        let (sql, values) = match $dialect {
            $crate::driver::Dialect::Postgres => $stmt.build(sea_query::PostgresQueryBuilder),
            $crate::driver::Dialect::Sqlite => $stmt.build(sea_query::SqliteQueryBuilder),
            $crate::driver::Dialect::MySql => $stmt.build(sea_query::MysqlQueryBuilder),
        };
        $crate::sql::finish(sql, values)
    }};
}

pub(crate) use build_statement;

pub(crate) fn finish(sql: String, values: sea_query::Values) -> Result<Statement> {
    let values = values
        .0
        .iter()
        .map(Value::from_sea)
        .collect::<Result<Vec<_>>>()?;
    Ok(Statement::new(sql, values))
}
