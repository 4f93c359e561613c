use std::marker::PhantomData;

use super::{Mutation, Op};
use crate::client::Client;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::Result;
use crate::predicate::Predicate;
use crate::value::Value;

/// Builder deleting every row matching its predicates.
pub struct Delete<E: Entity> {
    client: Client,
    mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Delete<E> {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            mutation: Mutation::new(E::schema(), Op::Delete),
            _entity: PhantomData,
        }
    }

    pub fn filter(mut self, pred: Predicate<E>) -> Self {
        self.mutation.predicates.push(pred.into_fn());
        self
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Delete and return the number of removed rows.
    pub fn exec(mut self, ctx: &Context) -> Result<u64> {
        let ctx = self.client.context(ctx);
        let out = self.client.mutate(&ctx, &mut self.mutation)?;
        Ok(out.affected)
    }

    pub fn exec_x(self, ctx: &Context) -> u64 {
        self.exec(ctx).unwrap_or_else(|e| panic!("{e}"))
    }
}

/// Builder deleting one row by id.
pub struct DeleteOne<E: Entity> {
    client: Client,
    mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> DeleteOne<E> {
    pub(crate) fn new(client: Client, id: Value) -> Self {
        let mut mutation = Mutation::new(E::schema(), Op::DeleteOne);
        mutation.id = Some(id);
        Self {
            client,
            mutation,
            _entity: PhantomData,
        }
    }

    /// Only delete when the row also matches `pred`.
    pub fn filter(mut self, pred: Predicate<E>) -> Self {
        self.mutation.predicates.push(pred.into_fn());
        self
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when nothing was deleted.
    pub fn exec(mut self, ctx: &Context) -> Result<()> {
        let ctx = self.client.context(ctx);
        self.client.mutate(&ctx, &mut self.mutation).map(|_| ())
    }

    pub fn exec_x(self, ctx: &Context) {
        self.exec(ctx).unwrap_or_else(|e| panic!("{e}"))
    }
}
