//! Untyped query specification and SELECT building.

use sea_query::{Expr, ExprTrait, Func, Order, Query, SelectStatement};
use std::fmt;
use std::sync::Arc;

use crate::driver::{Dialect, Statement};
use crate::error::{Error, Result};
use crate::predicate::{resolve, PredFn, Selector};
use crate::schema::{EdgeDef, EntitySchema};
use crate::sql::{build_statement, col, ident};

/// Raw statement modifier, applied after everything else.
pub type Modifier = Arc<dyn Fn(&mut SelectStatement) + Send + Sync>;

/// Traversal from another query along one of its edges.
///
/// Rendered as a sub-select when the target query runs, so the source
/// table is never queried on its own.
#[derive(Clone)]
pub(crate) struct Path {
    pub(crate) source: Box<QuerySpec>,
    pub(crate) edge: &'static EdgeDef,
}

impl Path {
    fn condition(&self, target: &EntitySchema, dialect: Dialect) -> Result<Expr> {
        let source = &self.source;
        let edge = self.edge;
        if let Some(link) = &edge.link {
            let ids = source.column_subquery(source.schema.id.column, dialect)?;
            let mut sub = Query::select();
            sub.column((ident(link.table), ident(link.target_column)))
                .from(ident(link.table))
                .and_where(col(link.table, link.source_column).in_subquery(ids));
            return Ok(col(target.table, target.id.column).in_subquery(sub));
        }
        if edge.fk_on_self() {
            let fks = source.column_subquery(edge.column, dialect)?;
            return Ok(col(target.table, target.id.column).in_subquery(fks));
        }
        let ids = source.column_subquery(source.schema.id.column, dialect)?;
        Ok(col(target.table, edge.column).in_subquery(ids))
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: String,
    pub desc: bool,
}

/// Ascending order on a column.
pub fn asc(column: impl Into<String>) -> OrderTerm {
    OrderTerm {
        column: column.into(),
        desc: false,
    }
}

/// Descending order on a column.
pub fn desc(column: impl Into<String>) -> OrderTerm {
    OrderTerm {
        column: column.into(),
        desc: true,
    }
}

/// Row-locking clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lock {
    /// `FOR UPDATE`
    Update,
    /// `FOR SHARE`
    Share,
}

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
    Mean,
}

/// Aggregate column in a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub func: AggregateFn,
    /// `None` counts rows
    pub field: Option<String>,
    /// Result column name
    pub alias: String,
}

impl Aggregate {
    fn new(func: AggregateFn, field: Option<&str>, alias: &str) -> Self {
        Self {
            func,
            field: field.map(str::to_owned),
            alias: alias.to_owned(),
        }
    }

    /// Row count, returned as `count`.
    pub fn count() -> Self {
        Self::new(AggregateFn::Count, None, "count")
    }

    pub fn sum(field: &str) -> Self {
        Self::new(AggregateFn::Sum, Some(field), "sum")
    }

    pub fn min(field: &str) -> Self {
        Self::new(AggregateFn::Min, Some(field), "min")
    }

    pub fn max(field: &str) -> Self {
        Self::new(AggregateFn::Max, Some(field), "max")
    }

    pub fn mean(field: &str) -> Self {
        Self::new(AggregateFn::Mean, Some(field), "mean")
    }

    /// Rename the result column.
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = alias.to_owned();
        self
    }

    fn expr(&self, schema: &EntitySchema) -> Result<Expr> {
        let table = schema.table;
        let column = match &self.field {
            Some(field) => {
                check_column(schema, field)?;
                col(table, field)
            }
            None => col(table, schema.id.column),
        };
        Ok(match self.func {
            AggregateFn::Count => Func::count(column).into(),
            AggregateFn::Sum => Func::sum(column).into(),
            AggregateFn::Min => Func::min(column).into(),
            AggregateFn::Max => Func::max(column).into(),
            AggregateFn::Mean => Func::avg(column).into(),
        })
    }
}

/// What a query returns
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Every schema column of each row
    Entities,
    /// The id column
    Ids,
    /// A single `count` row
    Count,
    /// Projected fields and aggregates, grouped by the fields when `grouped`
    Values {
        fields: Vec<String>,
        aggregates: Vec<Aggregate>,
        grouped: bool,
    },
}

/// Everything needed to render one SELECT against one entity table.
///
/// Interceptors receive a `&mut QuerySpec` and may add predicates, adjust
/// paging or fail the query.
#[derive(Clone)]
pub struct QuerySpec {
    pub(crate) schema: &'static EntitySchema,
    pub(crate) predicates: Vec<PredFn>,
    pub(crate) order: Vec<OrderTerm>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) unique: Option<bool>,
    pub(crate) shape: Shape,
    pub(crate) lock: Option<Lock>,
    pub(crate) modifiers: Vec<Modifier>,
    pub(crate) path: Option<Path>,
    pub(crate) extra_columns: Vec<String>,
    pub(crate) errors: Vec<Error>,
}

impl fmt::Debug for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySpec")
            .field("table", &self.schema.table)
            .field("predicates", &self.predicates.len())
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("unique", &self.unique)
            .field("shape", &self.shape)
            .field("lock", &self.lock)
            .field("path", &self.path.as_ref().map(|p| p.edge.name))
            .finish()
    }
}

fn check_column(schema: &EntitySchema, name: &str) -> Result<()> {
    if schema.valid_column(name) {
        Ok(())
    } else {
        Err(Error::validation(
            name,
            format!("invalid field for query on {}", schema.table),
        ))
    }
}

impl QuerySpec {
    pub fn new(schema: &'static EntitySchema) -> Self {
        Self {
            schema,
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            unique: None,
            shape: Shape::Entities,
            lock: None,
            modifiers: Vec::new(),
            path: None,
            extra_columns: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    pub fn table(&self) -> &'static str {
        self.schema.table
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Append a predicate.
    pub fn where_<F>(&mut self, f: F)
    where
        F: Fn(&mut Selector) + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(f));
    }

    pub(crate) fn push_predicate(&mut self, f: PredFn) {
        self.predicates.push(f);
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    pub fn order(&self) -> &[OrderTerm] {
        &self.order
    }

    pub fn clear_order(&mut self) {
        self.order.clear();
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Option<u64>) {
        self.offset = offset;
    }

    pub fn set_unique(&mut self, unique: Option<bool>) {
        self.unique = unique;
    }

    /// Fail the query with `err` when it executes.
    pub fn fail(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// Make sure a column of the table is part of entity rows.
    pub(crate) fn require_column(&mut self, column: &str) {
        if !self.schema.valid_column(column) && !self.extra_columns.iter().any(|c| c == column) {
            self.extra_columns.push(column.to_owned());
        }
    }

    /// Build the SELECT for the current shape (count is rendered by
    /// [`QuerySpec::statement`]).
    pub(crate) fn select_statement(&self, dialect: Dialect) -> Result<SelectStatement> {
        if let Some(err) = self.errors.first() {
            return Err(err.clone());
        }
        let schema = self.schema;
        let table = schema.table;

        let mut q = Query::select();
        q.from(ident(table));

        match &self.shape {
            Shape::Entities => {
                for column in schema.columns() {
                    q.column((ident(table), ident(column)));
                }
                for column in &self.extra_columns {
                    q.column((ident(table), ident(column)));
                }
            }
            Shape::Ids | Shape::Count => {
                q.column((ident(table), ident(schema.id.column)));
            }
            Shape::Values {
                fields,
                aggregates,
                grouped,
            } => {
                if fields.is_empty() && aggregates.is_empty() {
                    return Err(Error::validation(table, "projection selects no columns"));
                }
                for field in fields {
                    check_column(schema, field)?;
                    q.column((ident(table), ident(field)));
                }
                for agg in aggregates {
                    q.expr_as(agg.expr(schema)?, ident(&agg.alias));
                }
                if *grouped {
                    for field in fields {
                        q.group_by_col((ident(table), ident(field)));
                    }
                }
            }
        }

        if let Some(path) = &self.path {
            q.and_where(path.condition(schema, dialect)?);
        }

        let (cond, mut errors) = resolve(schema, &self.predicates);
        if !errors.is_empty() {
            return Err(errors.remove(0));
        }
        if let Some(cond) = cond {
            q.cond_where(cond);
        }

        for term in &self.order {
            check_column(schema, &term.column)?;
            let order = if term.desc { Order::Desc } else { Order::Asc };
            q.order_by((ident(table), ident(&term.column)), order);
        }

        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                q.limit(limit);
                if let Some(offset) = offset {
                    q.offset(offset);
                }
            }
            (None, Some(offset)) => {
                q.limit(dialect.max_limit());
                q.offset(offset);
            }
            (None, None) => {}
        }

        if self.unique == Some(true) {
            q.distinct();
        }

        if let Some(lock) = self.lock {
            if dialect.supports_row_locking() {
                match lock {
                    Lock::Update => q.lock_exclusive(),
                    Lock::Share => q.lock_shared(),
                };
            } else {
                log::debug!(
                    target: "entgraph::query",
                    "{dialect} does not support row locking, ignoring {lock:?} on {table}"
                );
            }
        }

        for modify in &self.modifiers {
            modify(&mut q);
        }
        Ok(q)
    }

    /// Render the statement a driver executes.
    pub(crate) fn statement(&self, dialect: Dialect) -> Result<Statement> {
        if self.shape == Shape::Count {
            let mut inner = self.clone();
            inner.order.clear();
            inner.lock = None;
            let sub = inner.select_statement(dialect)?;
            let mut q = Query::select();
            q.expr_as(Expr::cust("COUNT(*)"), ident("count"))
                .from_subquery(sub, ident("__count"));
            return build_statement!(q, dialect);
        }
        let q = self.select_statement(dialect)?;
        build_statement!(q, dialect)
    }

    /// Apply `f` to every query this one traverses from, nearest first.
    pub(crate) fn for_each_source(
        &mut self,
        f: &mut dyn FnMut(&mut QuerySpec) -> Result<()>,
    ) -> Result<()> {
        if let Some(path) = &mut self.path {
            f(&mut path.source)?;
            path.source.for_each_source(f)?;
        }
        Ok(())
    }

    /// Sub-select of one column of this query, for traversals.
    pub(crate) fn column_subquery(&self, column: &str, dialect: Dialect) -> Result<SelectStatement> {
        let mut inner = self.clone();
        inner.shape = Shape::Values {
            fields: vec![column.to_owned()],
            aggregates: Vec::new(),
            grouped: false,
        };
        inner.lock = None;
        inner.select_statement(dialect)
    }
}
