//! Predicate composition.
//!
//! A predicate is a closure over a [`Selector`], the table handle of the
//! entity being queried. Predicates append conditions; the selector AND-s
//! them together. Edge predicates are ordinary predicates that close over a
//! nested sub-select on the target table, so traversals never need joins in
//! the outer statement.
//!
//! ```
//! use entgraph::predicate::{self as p, Predicate};
//! # use entgraph::schema::{EntitySchema, FieldDef, IdDef};
//! # use entgraph::{Edges, Entity, Result, Row, Value};
//! # use once_cell::sync::Lazy;
//! # static S: Lazy<EntitySchema> = Lazy::new(|| EntitySchema::new("customers", "customer", IdDef::int("id"))
//! #     .with_field(FieldDef::string("name")).with_field(FieldDef::string("tier")));
//! # #[derive(Clone)] struct Customer { edges: Edges }
//! # impl Entity for Customer {
//! #     fn schema() -> &'static EntitySchema { &S }
//! #     fn from_row(_: &Row) -> Result<Self> { unimplemented!() }
//! #     fn id(&self) -> Value { Value::Null }
//! #     fn value(&self, _: &str) -> Option<Value> { None }
//! #     fn edges(&self) -> &Edges { &self.edges }
//! #     fn edges_mut(&mut self) -> &mut Edges { &mut self.edges }
//! # }
//! let gold_or_acme: Predicate<Customer> = p::or(vec![
//!     p::eq("tier", "gold"),
//!     p::has_prefix("name", "Acme"),
//! ]);
//! ```

use sea_query::{Condition, Expr, ExprTrait, IntoCondition, Query, SelectStatement};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::entity::Entity;
use crate::error::Error;
use crate::schema::{EdgeDef, EntitySchema};
use crate::sql::{col, ident};
use crate::value::Value;

/// Untyped predicate closure.
pub type PredFn = Arc<dyn Fn(&mut Selector) + Send + Sync>;

/// Table handle predicates write into.
pub struct Selector {
    schema: &'static EntitySchema,
    cond: Condition,
    added: usize,
    errors: Vec<Error>,
}

impl Selector {
    pub fn new(schema: &'static EntitySchema) -> Self {
        Self {
            schema,
            cond: Condition::all(),
            added: 0,
            errors: Vec::new(),
        }
    }

    pub fn table(&self) -> &'static str {
        self.schema.table
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    /// Qualified column reference.
    ///
    /// Unknown columns are recorded as a validation error that fails the
    /// statement at execution time.
    pub fn column(&mut self, name: &str) -> Expr {
        if !self.schema.valid_column(name) {
            self.fail(Error::validation(
                name,
                format!("unknown column for table {}", self.schema.table),
            ));
        }
        col(self.schema.table, name)
    }

    /// AND a condition into the selection.
    pub fn where_<C: IntoCondition>(&mut self, cond: C) {
        let current = std::mem::replace(&mut self.cond, Condition::all());
        self.cond = current.add(cond.into_condition());
        self.added += 1;
    }

    pub fn fail(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// Empty selector on the same table for grouping sub-conditions.
    fn child(&self) -> Selector {
        Selector::new(self.schema)
    }

    /// Move a child's condition out, keeping its errors.
    fn absorb(&mut self, child: Selector) -> Option<Condition> {
        let (cond, errors) = child.into_parts();
        self.errors.extend(errors);
        cond
    }

    /// The accumulated condition, `None` when nothing was added.
    pub(crate) fn into_parts(self) -> (Option<Condition>, Vec<Error>) {
        let cond = (self.added > 0).then_some(self.cond);
        (cond, self.errors)
    }
}

/// Apply predicates to a fresh selector and return the combined condition.
pub(crate) fn resolve(
    schema: &'static EntitySchema,
    preds: &[PredFn],
) -> (Option<Condition>, Vec<Error>) {
    let mut selector = Selector::new(schema);
    for pred in preds {
        pred(&mut selector);
    }
    selector.into_parts()
}

/// Typed predicate on entity `E`.
pub struct Predicate<E> {
    f: PredFn,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Predicate<E> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Predicate<E> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Selector) + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            _entity: PhantomData,
        }
    }

    pub fn apply(&self, selector: &mut Selector) {
        (self.f)(selector)
    }

    pub fn and(self, other: Predicate<E>) -> Self {
        and(vec![self, other])
    }

    pub fn or(self, other: Predicate<E>) -> Self {
        or(vec![self, other])
    }

    pub fn not(self) -> Self {
        not(self)
    }

    pub(crate) fn into_fn(self) -> PredFn {
        self.f
    }
}

fn field<E: Entity, F>(name: &'static str, build: F) -> Predicate<E>
where
    F: Fn(Expr) -> Expr + Send + Sync + 'static,
{
    Predicate::new(move |s| {
        let column = s.column(name);
        s.where_(build(column));
    })
}

/// `field = value`; a NULL value compares with `IS NULL`.
pub fn eq<E: Entity>(name: &'static str, value: impl Into<Value>) -> Predicate<E> {
    let value = value.into();
    if value.is_null() {
        return is_null(name);
    }
    field(name, move |c| c.eq(value.to_sea()))
}

/// `field <> value`; a NULL value compares with `IS NOT NULL`.
pub fn ne<E: Entity>(name: &'static str, value: impl Into<Value>) -> Predicate<E> {
    let value = value.into();
    if value.is_null() {
        return not_null(name);
    }
    field(name, move |c| c.ne(value.to_sea()))
}

pub fn gt<E: Entity>(name: &'static str, value: impl Into<Value>) -> Predicate<E> {
    let value = value.into();
    field(name, move |c| c.gt(value.to_sea()))
}

pub fn gte<E: Entity>(name: &'static str, value: impl Into<Value>) -> Predicate<E> {
    let value = value.into();
    field(name, move |c| c.gte(value.to_sea()))
}

pub fn lt<E: Entity>(name: &'static str, value: impl Into<Value>) -> Predicate<E> {
    let value = value.into();
    field(name, move |c| c.lt(value.to_sea()))
}

pub fn lte<E: Entity>(name: &'static str, value: impl Into<Value>) -> Predicate<E> {
    let value = value.into();
    field(name, move |c| c.lte(value.to_sea()))
}

pub fn is_in<E, I, V>(name: &'static str, values: I) -> Predicate<E>
where
    E: Entity,
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let values: Vec<Value> = values.into_iter().map(Into::into).collect();
    field(name, move |c| c.is_in(values.iter().map(Value::to_sea)))
}

pub fn not_in<E, I, V>(name: &'static str, values: I) -> Predicate<E>
where
    E: Entity,
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let values: Vec<Value> = values.into_iter().map(Into::into).collect();
    field(name, move |c| c.is_not_in(values.iter().map(Value::to_sea)))
}

pub fn is_null<E: Entity>(name: &'static str) -> Predicate<E> {
    field(name, |c| c.is_null())
}

pub fn not_null<E: Entity>(name: &'static str) -> Predicate<E> {
    field(name, |c| c.is_not_null())
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Substring match.
pub fn contains<E: Entity>(name: &'static str, needle: &str) -> Predicate<E> {
    let pattern = format!("%{}%", escape_like(needle));
    field(name, move |c| c.like(sea_query::LikeExpr::new(pattern.clone()).escape('\\')))
}

/// Prefix match.
pub fn has_prefix<E: Entity>(name: &'static str, prefix: &str) -> Predicate<E> {
    let pattern = format!("{}%", escape_like(prefix));
    field(name, move |c| c.like(sea_query::LikeExpr::new(pattern.clone()).escape('\\')))
}

pub fn has_suffix<E: Entity>(name: &'static str, suffix: &str) -> Predicate<E> {
    let pattern = format!("%{}", escape_like(suffix));
    field(name, move |c| c.like(sea_query::LikeExpr::new(pattern.clone()).escape('\\')))
}

pub fn id_eq<E: Entity>(id: impl Into<Value>) -> Predicate<E> {
    eq(E::schema().id.column, id)
}

pub fn id_in<E, I, V>(ids: I) -> Predicate<E>
where
    E: Entity,
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    is_in(E::schema().id.column, ids)
}

/// Every predicate holds.
pub fn and<E: Entity>(preds: Vec<Predicate<E>>) -> Predicate<E> {
    Predicate::new(move |s| {
        let mut child = s.child();
        for p in &preds {
            p.apply(&mut child);
        }
        if let Some(cond) = s.absorb(child) {
            s.where_(cond);
        }
    })
}

/// At least one predicate holds.
pub fn or<E: Entity>(preds: Vec<Predicate<E>>) -> Predicate<E> {
    Predicate::new(move |s| {
        let mut any = Condition::any();
        let mut branches = 0;
        for p in &preds {
            let mut child = s.child();
            p.apply(&mut child);
            if let Some(cond) = s.absorb(child) {
                any = any.add(cond);
                branches += 1;
            }
        }
        if branches > 0 {
            s.where_(any);
        }
    })
}

/// Negation.
pub fn not<E: Entity>(pred: Predicate<E>) -> Predicate<E> {
    Predicate::new(move |s| {
        let mut child = s.child();
        pred.apply(&mut child);
        if let Some(cond) = s.absorb(child) {
            s.where_(cond.not());
        }
    })
}

/// The entity has at least one target on `edge`.
pub fn has_edge<E: Entity>(edge: &'static str) -> Predicate<E> {
    Predicate::new(move |s| {
        let Some((_, def)) = s.schema().edge(edge) else {
            s.fail(unknown_edge(s.schema(), edge));
            return;
        };
        let expr = edge_membership(s.schema(), def, None);
        s.where_(expr);
    })
}

/// The entity has at least one target on `edge` matching `preds`.
pub fn has_edge_with<E: Entity, T: Entity>(
    edge: &'static str,
    preds: Vec<Predicate<T>>,
) -> Predicate<E> {
    Predicate::new(move |s| {
        let Some((_, def)) = s.schema().edge(edge) else {
            s.fail(unknown_edge(s.schema(), edge));
            return;
        };
        let target = T::schema();
        if def.target != target.table {
            s.fail(Error::validation(
                edge,
                format!("edge targets {}, not {}", def.target, target.table),
            ));
            return;
        }
        let mut inner = Selector::new(target);
        for p in &preds {
            p.apply(&mut inner);
        }
        let (cond, errors) = inner.into_parts();
        s.errors.extend(errors);
        let expr = edge_membership(s.schema(), def, Some((target, cond)));
        s.where_(expr);
    })
}

pub(crate) fn unknown_edge(schema: &EntitySchema, edge: &str) -> Error {
    Error::validation(edge, format!("unknown edge for table {}", schema.table))
}

/// Condition on `schema` rows that have a target on `edge`, optionally
/// restricted to targets matching `target_cond`.
fn edge_membership(
    schema: &'static EntitySchema,
    edge: &EdgeDef,
    target: Option<(&'static EntitySchema, Option<Condition>)>,
) -> Expr {
    if let Some(link) = &edge.link {
        let mut sub = Query::select();
        sub.column((ident(link.table), ident(link.source_column)))
            .from(ident(link.table));
        if let Some((target, cond)) = target {
            sub.inner_join(
                ident(target.table),
                col(target.table, target.id.column).equals((ident(link.table), ident(link.target_column))),
            );
            if let Some(cond) = cond {
                sub.cond_where(cond);
            }
        }
        return col(schema.table, schema.id.column).in_subquery(sub);
    }

    if edge.fk_on_self() {
        return match target {
            Some((target, cond)) => {
                let mut sub = target_select(target, target.id.column);
                if let Some(cond) = cond {
                    sub.cond_where(cond);
                }
                col(schema.table, edge.column).in_subquery(sub)
            }
            None => col(schema.table, edge.column).is_not_null(),
        };
    }

    let mut sub = Query::select();
    sub.column((ident(edge.target), ident(edge.column)))
        .from(ident(edge.target))
        .and_where(col(edge.target, edge.column).is_not_null());
    if let Some((_, Some(cond))) = target {
        sub.cond_where(cond);
    }
    col(schema.table, schema.id.column).in_subquery(sub)
}

fn target_select(target: &EntitySchema, column: &str) -> SelectStatement {
    let mut sub = Query::select();
    sub.column((ident(target.table), ident(column)))
        .from(ident(target.table));
    sub
}
