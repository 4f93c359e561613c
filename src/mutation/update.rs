use std::marker::PhantomData;

use super::{Mutation, Op};
use crate::client::Client;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::value::Value;

/// Builder updating every row matching its predicates.
pub struct Update<E: Entity> {
    client: Client,
    mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Update<E> {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            mutation: Mutation::new(E::schema(), Op::Update),
            _entity: PhantomData,
        }
    }

    setters!();
    update_setters!();

    /// Apply the update and return the number of affected rows.
    pub fn save(mut self, ctx: &Context) -> Result<u64> {
        let ctx = self.client.context(ctx);
        self.mutation.apply_update_defaults();
        let out = self.client.mutate(&ctx, &mut self.mutation)?;
        Ok(out.affected)
    }

    pub fn save_x(self, ctx: &Context) -> u64 {
        self.save(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn exec(self, ctx: &Context) -> Result<()> {
        self.save(ctx).map(|_| ())
    }
}

/// Builder updating one row by id.
pub struct UpdateOne<E: Entity> {
    client: Client,
    mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> UpdateOne<E> {
    pub(crate) fn new(client: Client, id: Value) -> Self {
        let mut mutation = Mutation::new(E::schema(), Op::UpdateOne);
        mutation.id = Some(id);
        Self {
            client,
            mutation,
            _entity: PhantomData,
        }
    }

    setters!();
    update_setters!();

    /// Apply the update and return the refreshed entity.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no row has the id or the row does not match
    /// the extra predicates.
    pub fn save(mut self, ctx: &Context) -> Result<E> {
        let ctx = self.client.context(ctx);
        self.mutation.apply_update_defaults();
        let out = self.client.mutate(&ctx, &mut self.mutation)?;
        let row = out
            .row
            .ok_or_else(|| Error::not_found(E::schema().label))?;
        E::from_row(&row.normalize(E::schema())?)
    }

    pub fn save_x(self, ctx: &Context) -> E {
        self.save(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn exec(self, ctx: &Context) -> Result<()> {
        self.save(ctx).map(|_| ())
    }
}
