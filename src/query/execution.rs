//! Terminal operations.
//!
//! Every terminal consumes the builder. Each `*_x` twin panics with the
//! error's message instead of returning it; they exist for seed and
//! bootstrap code.

use super::{Query, Shape};
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::value::{Row, Value};

impl<E: Entity> Query<E> {
    /// Run the query, scan entities and resolve eager loads.
    pub(crate) fn fetch(mut self, ctx: &Context) -> Result<(Vec<Row>, Vec<E>)> {
        let ctx = self.client.context(ctx);
        self.spec.shape = Shape::Entities;
        let schema = E::schema();
        let rows = self
            .client
            .run_query(&ctx, &mut self.spec)?
            .into_iter()
            .map(|row| row.normalize(schema))
            .collect::<Result<Vec<_>>>()?;
        let mut entities = rows.iter().map(E::from_row).collect::<Result<Vec<_>>>()?;

        for load in &self.withs {
            for entity in entities.iter_mut() {
                entity.edges_mut().mark_loaded(load.index);
            }
        }
        for load in &self.withs {
            ctx.check()?;
            load.run(&ctx, &mut entities)?;
        }
        Ok((rows, entities))
    }

    /// Every matching entity.
    pub fn all(self, ctx: &Context) -> Result<Vec<E>> {
        self.fetch(ctx).map(|(_, entities)| entities)
    }

    pub fn all_x(self, ctx: &Context) -> Vec<E> {
        self.all(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    /// First entity, [`Error::NotFound`] when there is none.
    pub fn first(self, ctx: &Context) -> Result<E> {
        self.limit(1)
            .all(ctx)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(E::schema().label))
    }

    pub fn first_x(self, ctx: &Context) -> E {
        self.first(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn first_id(self, ctx: &Context) -> Result<Value> {
        self.limit(1)
            .ids(ctx)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(E::schema().label))
    }

    pub fn first_id_x(self, ctx: &Context) -> Value {
        self.first_id(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    /// The only matching entity.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for no match, [`Error::NotSingular`] for more
    /// than one.
    pub fn only(self, ctx: &Context) -> Result<E> {
        let mut found = self.limit(2).all(ctx)?;
        match found.len() {
            0 => Err(Error::not_found(E::schema().label)),
            1 => Ok(found.remove(0)),
            _ => Err(Error::not_singular(E::schema().label)),
        }
    }

    pub fn only_x(self, ctx: &Context) -> E {
        self.only(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn only_id(self, ctx: &Context) -> Result<Value> {
        let mut found = self.limit(2).ids(ctx)?;
        match found.len() {
            0 => Err(Error::not_found(E::schema().label)),
            1 => Ok(found.remove(0)),
            _ => Err(Error::not_singular(E::schema().label)),
        }
    }

    pub fn only_id_x(self, ctx: &Context) -> Value {
        self.only_id(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Ids of every matching row.
    pub fn ids(mut self, ctx: &Context) -> Result<Vec<Value>> {
        let ctx = self.client.context(ctx);
        self.spec.shape = Shape::Ids;
        let ty = E::schema().id.ty.field_type();
        self.client
            .run_query(&ctx, &mut self.spec)?
            .iter()
            .map(|row| row.get_at::<Value>(0)?.coerce(ty))
            .collect()
    }

    pub fn ids_x(self, ctx: &Context) -> Vec<Value> {
        self.ids(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Number of matching rows, honoring limit and offset.
    pub fn count(mut self, ctx: &Context) -> Result<u64> {
        let ctx = self.client.context(ctx);
        self.spec.shape = Shape::Count;
        let rows = self.client.run_query(&ctx, &mut self.spec)?;
        let count = match rows.first() {
            Some(row) => row.get_at::<i64>(0)?,
            None => 0,
        };
        u64::try_from(count).map_err(|_| Error::Scan(format!("negative count {count}")))
    }

    pub fn count_x(self, ctx: &Context) -> u64 {
        self.count(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    /// At least one row matches.
    pub fn exist(self, ctx: &Context) -> Result<bool> {
        match self.first_id(ctx) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn exist_x(self, ctx: &Context) -> bool {
        self.exist(ctx).unwrap_or_else(|e| panic!("{e}"))
    }
}
