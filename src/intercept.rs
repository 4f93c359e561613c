//! Query interceptors.
//!
//! An interceptor wraps the [`Querier`] that executes a [`QuerySpec`]. It
//! can rewrite the spec before calling the next querier, skip it entirely,
//! or post-process the returned rows. Interceptors are registered on the
//! client; the first registered one runs outermost.
//!
//! ```
//! use entgraph::intercept::{self, Interceptor};
//! use sea_query::ExprTrait;
//!
//! // Hide soft-deleted rows of every table that has a `deleted_at` column.
//! let soft_delete: Interceptor = intercept::traverse(|_ctx, spec| {
//!     if spec.schema().field("deleted_at").is_some() {
//!         spec.where_(|s| {
//!             let c = s.column("deleted_at");
//!             s.where_(c.is_null());
//!         });
//!     }
//!     Ok(())
//! });
//! # let _ = soft_delete;
//! ```

use std::sync::Arc;

use crate::context::Context;
use crate::driver::Driver;
use crate::error::Result;
use crate::query::QuerySpec;
use crate::value::Row;

/// Executes an untyped query.
pub trait Querier: Send + Sync {
    fn query(&self, ctx: &Context, spec: &mut QuerySpec) -> Result<Vec<Row>>;
}

struct FnQuerier<F>(F);

impl<F> Querier for FnQuerier<F>
where
    F: Fn(&Context, &mut QuerySpec) -> Result<Vec<Row>> + Send + Sync,
{
    fn query(&self, ctx: &Context, spec: &mut QuerySpec) -> Result<Vec<Row>> {
        (self.0)(ctx, spec)
    }
}

/// Turn a closure into a [`Querier`].
pub fn querier<F>(f: F) -> Arc<dyn Querier>
where
    F: Fn(&Context, &mut QuerySpec) -> Result<Vec<Row>> + Send + Sync + 'static,
{
    Arc::new(FnQuerier(f))
}

type WrapFn = Arc<dyn Fn(Arc<dyn Querier>) -> Arc<dyn Querier> + Send + Sync>;
type TraverseFn = Arc<dyn Fn(&Context, &mut QuerySpec) -> Result<()> + Send + Sync>;

#[derive(Clone)]
enum Kind {
    Wrap(WrapFn),
    /// Runs on the executed query and on every query it traverses from.
    Traverse(TraverseFn),
}

/// Query middleware registered on a client.
#[derive(Clone)]
pub struct Interceptor {
    kind: Kind,
    table: Option<&'static str>,
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            Kind::Wrap(_) => "wrap",
            Kind::Traverse(_) => "traverse",
        };
        f.debug_struct("Interceptor")
            .field("kind", &kind)
            .field("table", &self.table)
            .finish()
    }
}

impl Interceptor {
    /// Interceptor from a querier transformer.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Arc<dyn Querier>) -> Arc<dyn Querier> + Send + Sync + 'static,
    {
        Self {
            kind: Kind::Wrap(Arc::new(f)),
            table: None,
        }
    }

    fn applies(&self, table: &str) -> bool {
        self.table.map_or(true, |t| t == table)
    }
}

/// Interceptor that sees the spec and the next querier on each call.
pub fn func<F>(f: F) -> Interceptor
where
    F: Fn(&Context, &mut QuerySpec, &dyn Querier) -> Result<Vec<Row>> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Interceptor::new(move |next| {
        let f = Arc::clone(&f);
        querier(move |ctx, spec| f(ctx, spec, next.as_ref()))
    })
}

/// Interceptor that only rewrites specs.
///
/// Unlike [`func`], it also runs on the source queries of a traversal
/// (`query_edge`), so filters it adds hold along the whole path.
pub fn traverse<F>(f: F) -> Interceptor
where
    F: Fn(&Context, &mut QuerySpec) -> Result<()> + Send + Sync + 'static,
{
    Interceptor {
        kind: Kind::Traverse(Arc::new(f)),
        table: None,
    }
}

/// Restrict an interceptor to queries on one table.
pub fn for_table(table: &'static str, mut interceptor: Interceptor) -> Interceptor {
    interceptor.table = Some(table);
    interceptor
}

/// Querier at the bottom of every chain: renders the spec and runs it.
struct DriverQuerier {
    driver: Arc<dyn Driver>,
}

impl Querier for DriverQuerier {
    fn query(&self, ctx: &Context, spec: &mut QuerySpec) -> Result<Vec<Row>> {
        ctx.check()?;
        let stmt = spec.statement(self.driver.dialect())?;
        self.driver.query(ctx, &stmt)
    }
}

/// Run `spec` through the interceptors matching its table, then the driver.
pub(crate) fn run(
    interceptors: &[Interceptor],
    driver: &Arc<dyn Driver>,
    ctx: &Context,
    spec: &mut QuerySpec,
) -> Result<Vec<Row>> {
    for interceptor in interceptors {
        if let Kind::Traverse(f) = &interceptor.kind {
            spec.for_each_source(&mut |source| {
                if interceptor.applies(source.table()) {
                    f(ctx, source)?;
                }
                Ok(())
            })?;
        }
    }

    let mut chain: Arc<dyn Querier> = Arc::new(DriverQuerier {
        driver: Arc::clone(driver),
    });
    for interceptor in interceptors.iter().rev() {
        if !interceptor.applies(spec.table()) {
            continue;
        }
        chain = match &interceptor.kind {
            Kind::Wrap(wrap) => wrap(chain),
            Kind::Traverse(f) => {
                let f = Arc::clone(f);
                let next = chain;
                querier(move |ctx, spec| {
                    f(ctx, spec)?;
                    next.query(ctx, spec)
                })
            }
        };
    }
    chain.query(ctx, spec)
}
