//! Batched edge loading.
//!
//! Each requested edge costs exactly one query, however many parents were
//! returned:
//!
//! - key on the child (`O2M`, `O2O`): `child.fk IN (parent ids)`
//! - key on the parent (`M2O`, inverse `O2O`): `child.id IN (parent fks)`,
//!   skipped when no parent has a key
//! - `M2M`: the child query joins the link table and also selects the
//!   link's source column
//!
//! Results are indexed back to their parents in memory. A child that points
//! at a parent outside the batch fails the whole load with
//! [`Error::Inconsistent`]; nothing is hydrated partially.

use indexmap::IndexMap;
use sea_query::{ExprTrait, SelectStatement};
use std::collections::HashSet;
use std::sync::Arc;

use super::Query;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::predicate::Selector;
use crate::schema::{EdgeDef, FieldType, LinkTable};
use crate::sql::{col, ident};
use crate::value::Value;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Alias of the link-table source column in many-to-many loads.
const EDGE_SOURCE: &str = "__edge_source";

type LoadFn<E> = Arc<dyn Fn(&Context, &mut [E]) -> Result<()> + Send + Sync>;

/// One `with` directive: the edge and its configured target query.
pub(super) struct EagerLoad<E> {
    pub(super) index: usize,
    pub(super) edge: &'static EdgeDef,
    load: LoadFn<E>,
}

impl<E> Clone for EagerLoad<E> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            edge: self.edge,
            load: Arc::clone(&self.load),
        }
    }
}

impl<E: Entity> EagerLoad<E> {
    pub(super) fn new<T: Entity>(index: usize, edge: &'static EdgeDef, child: Query<T>) -> Self {
        let load: LoadFn<E> = Arc::new(move |ctx, parents| {
            load_edge(ctx, index, edge, child.clone(), parents)
        });
        Self { index, edge, load }
    }

    pub(super) fn run(&self, ctx: &Context, parents: &mut [E]) -> Result<()> {
        (self.load)(ctx, parents)
    }
}

fn load_edge<P: Entity, T: Entity>(
    ctx: &Context,
    index: usize,
    edge: &'static EdgeDef,
    child: Query<T>,
    parents: &mut [P],
) -> Result<()> {
    if parents.is_empty() {
        return Ok(());
    }
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::eager_load_span(edge.name, parents.len()).entered();

    let buckets = if let Some(link) = edge.link {
        through_link(ctx, edge, link, child, parents)?
    } else if edge.fk_on_self() {
        by_parent_key(ctx, edge, child, parents)?
    } else {
        by_child_key(ctx, edge, child, parents)?
    };
    for (parent, targets) in parents.iter_mut().zip(buckets) {
        parent.edges_mut().set(index, targets);
    }
    Ok(())
}

fn record_batch(edge: &'static EdgeDef, keys: usize) {
    #[cfg(feature = "metrics")]
    METRICS.record_eager_batch(edge.name);
    log::trace!(target: "entgraph::eager", "loading {} for {keys} keys", edge.name);
}

/// Parent positions by parent id, in first-seen order.
fn parent_index<P: Entity>(parents: &[P]) -> Result<IndexMap<Value, Vec<usize>>> {
    let ty = P::schema().id.ty.field_type();
    let mut index: IndexMap<Value, Vec<usize>> = IndexMap::new();
    for (i, parent) in parents.iter().enumerate() {
        index.entry(parent.id().coerce(ty)?).or_default().push(i);
    }
    Ok(index)
}

fn key_of(value: Option<&Value>, ty: FieldType) -> Result<Value> {
    value.cloned().unwrap_or(Value::Null).coerce(ty)
}

fn unexpected(edge: &EdgeDef, key: &Value, column: &str) -> Error {
    Error::inconsistent(
        edge.name,
        format!("{column} = {key} does not match any requested row"),
    )
}

/// `O2M` and `O2O`: the foreign key lives on the child table.
fn by_child_key<P: Entity, T: Entity>(
    ctx: &Context,
    edge: &'static EdgeDef,
    mut child: Query<T>,
    parents: &[P],
) -> Result<Vec<Vec<T>>> {
    let index = parent_index(parents)?;
    let column = edge.column;
    let table = T::schema().table;
    let ids: Vec<sea_query::Value> = index.keys().map(Value::to_sea).collect();

    child.spec.require_column(column);
    child.spec.push_predicate(Arc::new(move |s: &mut Selector| {
        s.where_(col(table, column).is_in(ids.clone()));
    }));
    record_batch(edge, index.len());
    let (rows, targets) = child.fetch(ctx)?;

    let ty = P::schema().id.ty.field_type();
    let mut buckets: Vec<Vec<T>> = vec![Vec::new(); parents.len()];
    for (row, target) in rows.iter().zip(targets) {
        let key = key_of(row.value(column), ty)?;
        let slots = index
            .get(&key)
            .ok_or_else(|| unexpected(edge, &key, column))?;
        for &slot in slots {
            buckets[slot].push(target.clone());
        }
    }
    Ok(buckets)
}

/// `M2O` and inverse `O2O`: the foreign key lives on the parent table.
fn by_parent_key<P: Entity, T: Entity>(
    ctx: &Context,
    edge: &'static EdgeDef,
    mut child: Query<T>,
    parents: &[P],
) -> Result<Vec<Vec<T>>> {
    let target = T::schema();
    let ty = target.id.ty.field_type();
    let mut keys: IndexMap<Value, Vec<usize>> = IndexMap::new();
    for (i, parent) in parents.iter().enumerate() {
        let key = parent.value(edge.column).ok_or_else(|| {
            Error::inconsistent(
                edge.name,
                format!("{} does not expose {}", P::schema().label, edge.column),
            )
        })?;
        if key.is_null() {
            continue;
        }
        keys.entry(key.coerce(ty)?).or_default().push(i);
    }

    let mut buckets: Vec<Vec<T>> = vec![Vec::new(); parents.len()];
    if keys.is_empty() {
        return Ok(buckets);
    }

    let values: Vec<sea_query::Value> = keys.keys().map(Value::to_sea).collect();
    child.spec.push_predicate(Arc::new(move |s: &mut Selector| {
        s.where_(col(target.table, target.id.column).is_in(values.clone()));
    }));
    record_batch(edge, keys.len());
    let (_, targets) = child.fetch(ctx)?;

    for t in targets {
        let key = t.id().coerce(ty)?;
        let slots = keys
            .get(&key)
            .ok_or_else(|| unexpected(edge, &key, target.id.column))?;
        for &slot in slots {
            buckets[slot].push(t.clone());
        }
    }
    Ok(buckets)
}

/// `M2M`: join the link table and fan out by its source column.
fn through_link<P: Entity, T: Entity>(
    ctx: &Context,
    edge: &'static EdgeDef,
    link: LinkTable,
    mut child: Query<T>,
    parents: &[P],
) -> Result<Vec<Vec<T>>> {
    let index = parent_index(parents)?;
    let target = T::schema();
    let ids: Vec<sea_query::Value> = index.keys().map(Value::to_sea).collect();

    child.spec.modifiers.push(Arc::new(move |q: &mut SelectStatement| {
        q.expr_as(col(link.table, link.source_column), ident(EDGE_SOURCE))
            .inner_join(
                ident(link.table),
                col(link.table, link.target_column)
                    .equals((ident(target.table), ident(target.id.column))),
            )
            .and_where(col(link.table, link.source_column).is_in(ids.clone()));
    }));
    record_batch(edge, index.len());
    let (rows, targets) = child.fetch(ctx)?;

    let parent_ty = P::schema().id.ty.field_type();
    let target_ty = target.id.ty.field_type();
    let mut seen: HashSet<(Value, Value)> = HashSet::new();
    let mut buckets: Vec<Vec<T>> = vec![Vec::new(); parents.len()];
    for (row, t) in rows.iter().zip(targets) {
        let source = key_of(row.value(EDGE_SOURCE), parent_ty)?;
        let slots = index
            .get(&source)
            .ok_or_else(|| unexpected(edge, &source, link.source_column))?;
        // Link tables without a primary key may hold the same pair twice.
        if !seen.insert((source, t.id().coerce(target_ty)?)) {
            continue;
        }
        for &slot in slots {
            buckets[slot].push(t.clone());
        }
    }
    Ok(buckets)
}
