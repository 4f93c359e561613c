//! Query building and execution.
//!
//! [`Query<E>`] collects predicates, ordering, paging, row locks, edge
//! traversals and eager-load directives into a [`QuerySpec`]. Nothing runs
//! until a terminal operation (`all`, `first`, `only`, `count`, `ids`,
//! `exist`, `paginate`) is called; the spec then passes through the
//! client's interceptors and the driver, rows are scanned into entities and
//! every requested edge is loaded with one batched query.
//!
//! # Architecture
//!
//! - **spec**: the untyped [`QuerySpec`] and its SELECT rendering
//! - **execution**: terminal operations
//! - **eager**: the batched edge resolver
//! - **select**: projections and aggregates ([`Select`], [`GroupBy`])
//! - **paginate**: offset pagination with totals ([`Page`], [`PageResult`])
//!
//! # Examples
//!
//! ```no_run
//! # use entgraph::{Client, Context, Entity, Result};
//! # use entgraph::predicate as p;
//! # fn run<Customer: Entity, Invoice: Entity>(client: &Client) -> Result<()> {
//! let ctx = Context::background();
//! let customers = client
//!     .query::<Customer>()
//!     .filter(p::eq("tier", "gold"))
//!     .order_desc("created_at")
//!     .with::<Invoice, _>("invoices", |q| q.filter(p::gt("amount_cents", 0)))
//!     .limit(20)
//!     .all(&ctx)?;
//! # let _ = customers;
//! # Ok(())
//! # }
//! ```

mod eager;
mod execution;
mod paginate;
mod select;
mod spec;

pub use paginate::{Page, PageResult};
pub use select::{GroupBy, Select};
pub use spec::{asc, desc, Aggregate, AggregateFn, Lock, Modifier, OrderTerm, QuerySpec, Shape};

pub(crate) use spec::Path;

use sea_query::SelectStatement;
use std::sync::Arc;

use crate::client::Client;
use crate::entity::Entity;
use crate::error::Error;
use crate::predicate::{unknown_edge, Predicate};
use eager::EagerLoad;

/// Typed query over entity `E`.
pub struct Query<E: Entity> {
    pub(crate) client: Client,
    pub(crate) spec: QuerySpec,
    withs: Vec<EagerLoad<E>>,
}

impl<E: Entity> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            spec: self.spec.clone(),
            withs: self.withs.clone(),
        }
    }
}

impl<E: Entity> std::fmt::Debug for Query<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let withs: Vec<&str> = self.withs.iter().map(|w| w.edge.name).collect();
        f.debug_struct("Query")
            .field("spec", &self.spec)
            .field("with", &withs)
            .finish()
    }
}

impl<E: Entity> Query<E> {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            spec: QuerySpec::new(E::schema()),
            withs: Vec::new(),
        }
    }

    /// The untyped spec, as interceptors will see it.
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Add a predicate; all predicates are AND-ed.
    pub fn filter(mut self, pred: Predicate<E>) -> Self {
        self.spec.push_predicate(pred.into_fn());
        self
    }

    pub fn order_by(mut self, term: OrderTerm) -> Self {
        self.spec.order.push(term);
        self
    }

    pub fn order_asc(self, column: &str) -> Self {
        self.order_by(asc(column))
    }

    pub fn order_desc(self, column: &str) -> Self {
        self.order_by(desc(column))
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.spec.offset = Some(offset);
        self
    }

    /// `SELECT DISTINCT` when true.
    pub fn unique(mut self, unique: bool) -> Self {
        self.spec.unique = Some(unique);
        self
    }

    /// `FOR UPDATE`; ignored by dialects without row locks.
    pub fn for_update(mut self) -> Self {
        self.spec.lock = Some(Lock::Update);
        self
    }

    /// `FOR SHARE`; ignored by dialects without row locks.
    pub fn for_share(mut self) -> Self {
        self.spec.lock = Some(Lock::Share);
        self
    }

    /// Raw statement modifier, applied last.
    pub fn modify<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut SelectStatement) + Send + Sync + 'static,
    {
        self.spec.modifiers.push(Arc::new(f));
        self
    }

    /// Eager-load `edge`, configuring the target query with `configure`.
    ///
    /// Edges load in the order they were requested, one query each.
    pub fn with<T, F>(mut self, edge: &'static str, configure: F) -> Self
    where
        T: Entity,
        F: FnOnce(Query<T>) -> Query<T>,
    {
        let schema = E::schema();
        let Some((index, def)) = schema.edge(edge) else {
            self.spec.fail(unknown_edge(schema, edge));
            return self;
        };
        if def.target != T::schema().table {
            self.spec.fail(Error::validation(
                edge,
                format!("edge targets {}, not {}", def.target, T::schema().table),
            ));
            return self;
        }
        let child = configure(Query::<T>::new(self.client.clone()));
        self.withs.push(EagerLoad::new(index, def, child));
        self
    }

    /// Eager-load `edge` without configuring the target query.
    pub fn with_edge<T: Entity>(self, edge: &'static str) -> Self {
        self.with::<T, _>(edge, |q| q)
    }

    /// Query the targets of `edge` for every row this query matches.
    ///
    /// The current query becomes a sub-select of the returned one; it is
    /// never executed on its own.
    pub fn query_edge<T: Entity>(self, edge: &'static str) -> Query<T> {
        let schema = E::schema();
        let mut next = Query::<T>::new(self.client.clone());
        match schema.edge(edge) {
            Some((_, def)) if def.target == T::schema().table => {
                next.spec.path = Some(Path {
                    source: Box::new(self.spec),
                    edge: def,
                });
            }
            Some((_, def)) => next.spec.fail(Error::validation(
                edge,
                format!("edge targets {}, not {}", def.target, T::schema().table),
            )),
            None => next.spec.fail(unknown_edge(schema, edge)),
        }
        next
    }

    /// Project `fields` instead of whole entities.
    pub fn select(mut self, fields: &[&str]) -> Select<E> {
        self.spec.shape = Shape::Values {
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            aggregates: Vec::new(),
            grouped: false,
        };
        Select::new(self)
    }

    /// Aggregate over every matched row.
    pub fn aggregate(self, aggregate: Aggregate) -> Select<E> {
        self.select(&[]).aggregate(aggregate)
    }

    /// Group by `fields`; add aggregates on the returned builder.
    pub fn group_by(mut self, fields: &[&str]) -> GroupBy<E> {
        self.spec.shape = Shape::Values {
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            aggregates: Vec::new(),
            grouped: true,
        };
        GroupBy::new(self)
    }
}
