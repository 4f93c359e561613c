//! Projections and aggregates.
//!
//! [`Select`] returns raw [`Row`]s of selected fields and aggregates instead
//! of entities; [`GroupBy`] does the same with `GROUP BY` over its fields.
//! Rows of both are normalized against the schema, so projected fields come
//! back with their declared types while aggregates keep whatever the driver
//! returned.

use super::{Aggregate, Query, Shape};
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::value::{FromValue, Row, ValueMap};

fn push_aggregate(shape: &mut Shape, aggregate: Aggregate) {
    if let Shape::Values { aggregates, .. } = shape {
        aggregates.push(aggregate);
    }
}

fn run_rows<E: Entity>(query: Query<E>, ctx: &Context) -> Result<Vec<Row>> {
    let Query { client, mut spec, .. } = query;
    let ctx = client.context(ctx);
    client
        .run_query(&ctx, &mut spec)?
        .into_iter()
        .map(|row| row.normalize(E::schema()))
        .collect()
}

/// Projection builder returned by [`Query::select`] and
/// [`Query::aggregate`].
pub struct Select<E: Entity> {
    query: Query<E>,
}

impl<E: Entity> Select<E> {
    pub(super) fn new(query: Query<E>) -> Self {
        Self { query }
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        push_aggregate(&mut self.query.spec.shape, aggregate);
        self
    }

    pub fn rows(self, ctx: &Context) -> Result<Vec<Row>> {
        run_rows(self.query, ctx)
    }

    pub fn rows_x(self, ctx: &Context) -> Vec<Row> {
        self.rows(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn maps(self, ctx: &Context) -> Result<Vec<ValueMap>> {
        Ok(self.rows(ctx)?.iter().map(Row::to_map).collect())
    }

    /// First column of every row.
    pub fn values<T: FromValue>(self, ctx: &Context) -> Result<Vec<T>> {
        self.rows(ctx)?.iter().map(|row| row.get_at(0)).collect()
    }

    pub fn values_x<T: FromValue>(self, ctx: &Context) -> Vec<T> {
        self.values(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    /// First column of the only row, typically an aggregate.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] without rows, [`Error::NotSingular`] with more
    /// than one.
    pub fn value<T: FromValue>(self, ctx: &Context) -> Result<T> {
        let label = E::schema().label;
        let rows = self.rows(ctx)?;
        match rows.as_slice() {
            [] => Err(Error::not_found(label)),
            [row] => row.get_at(0),
            _ => Err(Error::not_singular(label)),
        }
    }

    pub fn value_x<T: FromValue>(self, ctx: &Context) -> T {
        self.value(ctx).unwrap_or_else(|e| panic!("{e}"))
    }
}

/// Grouping builder returned by [`Query::group_by`].
pub struct GroupBy<E: Entity> {
    query: Query<E>,
}

impl<E: Entity> GroupBy<E> {
    pub(super) fn new(query: Query<E>) -> Self {
        Self { query }
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        push_aggregate(&mut self.query.spec.shape, aggregate);
        self
    }

    /// One row per group: the grouped fields then the aggregates.
    pub fn rows(self, ctx: &Context) -> Result<Vec<Row>> {
        run_rows(self.query, ctx)
    }

    pub fn rows_x(self, ctx: &Context) -> Vec<Row> {
        self.rows(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn maps(self, ctx: &Context) -> Result<Vec<ValueMap>> {
        Ok(self.rows(ctx)?.iter().map(Row::to_map).collect())
    }
}
