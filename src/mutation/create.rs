use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{exec, Conflict, Mutation, MutationOutput, Op, Upsert};
use crate::client::Client;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::hook;
use crate::value::Row;

/// Builder inserting one row.
pub struct Create<E: Entity> {
    pub(super) client: Client,
    pub(super) mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Create<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            mutation: self.mutation.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Create<E> {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            mutation: Mutation::new(E::schema(), Op::Create),
            _entity: PhantomData,
        }
    }

    setters!();

    /// Use an explicit id instead of a generated one.
    pub fn set_id(mut self, id: impl Into<crate::value::Value>) -> Self {
        self.mutation.id = Some(id.into());
        self
    }

    /// Turn the insert into an upsert on `columns`.
    ///
    /// A resolution must be chosen on the returned [`Upsert`].
    pub fn on_conflict(mut self, columns: &[&str]) -> Upsert<E> {
        self.mutation.conflict = Some(Conflict {
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            resolution: Vec::new(),
        });
        Upsert::new(self)
    }

    pub(super) fn run(&mut self, ctx: &Context) -> Result<MutationOutput> {
        let ctx = self.client.context(ctx);
        self.mutation.apply_create_defaults();
        self.client.mutate(&ctx, &mut self.mutation)
    }

    /// Insert and return the entity built from the inserted values.
    pub fn save(mut self, ctx: &Context) -> Result<E> {
        let out = self.run(ctx)?;
        let row = out.row.ok_or_else(|| {
            Error::Other(format!("create on {} produced no row", E::schema().table))
        })?;
        E::from_row(&row.normalize(E::schema())?)
    }

    pub fn save_x(self, ctx: &Context) -> E {
        self.save(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Insert without building the entity.
    pub fn exec(mut self, ctx: &Context) -> Result<()> {
        self.run(ctx).map(|_| ())
    }

    pub fn exec_x(self, ctx: &Context) {
        self.exec(ctx).unwrap_or_else(|e| panic!("{e}"))
    }
}

/// Builder inserting many rows of one entity type with a single INSERT.
///
/// Each row runs its own hook chain, and the chains nest in input order:
/// calling `next` in row `i` enters row `i + 1`, and the innermost link
/// issues the INSERT. Code after `next` therefore sees the row's id and
/// inserted values, as it would for a single [`Create`]. A hook that returns
/// without calling `next` drops its row from the batch; the remaining rows
/// still run. Nesting costs stack in proportion to the batch size.
pub struct CreateBulk<E: Entity> {
    client: Client,
    builders: Vec<Create<E>>,
}

impl<E: Entity> CreateBulk<E> {
    pub(crate) fn new(client: Client, builders: Vec<Create<E>>) -> Self {
        Self { client, builders }
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Insert every row and return the entities in input order.
    pub fn save(self, ctx: &Context) -> Result<Vec<E>> {
        let client = self.client;
        let ctx = client.context(ctx);
        let pending: Vec<Option<Mutation>> = self
            .builders
            .into_iter()
            .map(|builder| {
                let mut m = builder.mutation;
                m.apply_create_defaults();
                Some(m)
            })
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let bulk = Arc::new(Bulk {
            outputs: Mutex::new(vec![None; pending.len()]),
            pending: Mutex::new(pending),
            staged: Mutex::default(),
            inserted: Mutex::default(),
            client,
        });
        bulk.run_row(&ctx, 0)?;

        let rows = std::mem::take(&mut *guard(&bulk.inserted)?);
        rows.into_iter()
            .map(|row| E::from_row(&row.normalize(E::schema())?))
            .collect()
    }

    pub fn save_x(self, ctx: &Context) -> Vec<E> {
        self.save(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn exec(self, ctx: &Context) -> Result<()> {
        self.save(ctx).map(|_| ())
    }
}

/// Shared state of one bulk save.
struct Bulk {
    client: Client,
    /// Mutations whose hook chain has not started yet, by input index
    pending: Mutex<Vec<Option<Mutation>>>,
    /// Mutations that reached the bottom of their chain, in input order
    staged: Mutex<Vec<(usize, Mutation)>>,
    /// What each row's chain gets back from `next`
    outputs: Mutex<Vec<Option<MutationOutput>>>,
    /// Inserted rows, in input order
    inserted: Mutex<Vec<Row>>,
}

fn guard<T>(state: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    state
        .lock()
        .map_err(|_| Error::Other("bulk create state poisoned".into()))
}

impl Bulk {
    /// Run the hook chain of row `i`; past the last row, insert the batch.
    fn run_row(self: &Arc<Self>, ctx: &Context, i: usize) -> Result<MutationOutput> {
        let next = guard(&self.pending)?.get_mut(i).and_then(Option::take);
        let Some(mut m) = next else {
            self.insert(ctx)?;
            return Ok(MutationOutput::default());
        };

        let entered = Arc::new(AtomicBool::new(false));
        let terminal = {
            let bulk = Arc::clone(self);
            let entered = Arc::clone(&entered);
            hook::mutator(move |ctx, m| {
                entered.store(true, Ordering::SeqCst);
                ctx.check()?;
                m.mark_done()?;
                guard(&bulk.staged)?.push((i, m.clone()));
                bulk.run_row(ctx, i + 1)?;
                let out = guard(&bulk.outputs)?.get_mut(i).and_then(Option::take);
                Ok(out.unwrap_or_default())
            })
        };
        let out = hook::chain(self.client.hooks(), &m, terminal).mutate(ctx, &mut m)?;
        if !entered.load(Ordering::SeqCst) {
            self.run_row(ctx, i + 1)?;
        }
        Ok(out)
    }

    fn insert(&self, ctx: &Context) -> Result<()> {
        let staged = std::mem::take(&mut *guard(&self.staged)?);
        if staged.is_empty() {
            return Ok(());
        }
        let (indices, mut rows): (Vec<usize>, Vec<Mutation>) = staged.into_iter().unzip();
        log::trace!(
            target: "entgraph::mutation",
            "bulk insert of {} rows into {}",
            rows.len(),
            rows[0].table()
        );
        let out = exec::create_rows(self.client.driver(), ctx, &mut rows)?;

        let mut outputs = guard(&self.outputs)?;
        let mut inserted = guard(&self.inserted)?;
        for ((i, m), id) in indices.into_iter().zip(&rows).zip(out.ids) {
            let row = exec::inserted_row(m, &id);
            inserted.push(row.clone());
            if let Some(slot) = outputs.get_mut(i) {
                *slot = Some(MutationOutput {
                    affected: 1,
                    row: Some(row),
                    ids: vec![id],
                });
            }
        }
        Ok(())
    }
}
