//! Mutation hooks.
//!
//! A hook wraps the [`Mutator`] that executes a [`Mutation`]. Hooks run in
//! registration order with the first one outermost; a hook short-circuits
//! by returning without calling `next`.
//!
//! ```
//! use entgraph::hook::{self, Hook};
//! use entgraph::mutation::Op;
//! use entgraph::Value;
//!
//! // Stamp every create and update with the acting user.
//! let audit: Hook = hook::on(
//!     hook::func(|ctx, m, next| {
//!         if m.schema().field("updated_by").is_some() {
//!             m.set_field("updated_by", Value::from("system"));
//!         }
//!         next.mutate(ctx, m)
//!     }),
//!     &[Op::Create, Op::Update, Op::UpdateOne],
//! );
//!
//! // Invoices are append-only.
//! let no_deletes = hook::for_table("invoices", hook::reject(&[Op::Delete, Op::DeleteOne]));
//! # let _ = (audit, no_deletes);
//! ```

use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::mutation::{Mutation, MutationOutput, Op};

/// Executes a mutation.
pub trait Mutator: Send + Sync {
    fn mutate(&self, ctx: &Context, m: &mut Mutation) -> Result<MutationOutput>;
}

struct FnMutator<F>(F);

impl<F> Mutator for FnMutator<F>
where
    F: Fn(&Context, &mut Mutation) -> Result<MutationOutput> + Send + Sync,
{
    fn mutate(&self, ctx: &Context, m: &mut Mutation) -> Result<MutationOutput> {
        (self.0)(ctx, m)
    }
}

/// Turn a closure into a [`Mutator`].
pub fn mutator<F>(f: F) -> Arc<dyn Mutator>
where
    F: Fn(&Context, &mut Mutation) -> Result<MutationOutput> + Send + Sync + 'static,
{
    Arc::new(FnMutator(f))
}

type WrapFn = Arc<dyn Fn(Arc<dyn Mutator>) -> Arc<dyn Mutator> + Send + Sync>;

/// Mutation middleware registered on a client.
#[derive(Clone)]
pub struct Hook {
    wrap: WrapFn,
    ops: Option<Vec<Op>>,
    table: Option<&'static str>,
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("ops", &self.ops)
            .field("table", &self.table)
            .finish()
    }
}

impl Hook {
    /// Hook from a mutator transformer.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Arc<dyn Mutator>) -> Arc<dyn Mutator> + Send + Sync + 'static,
    {
        Self {
            wrap: Arc::new(f),
            ops: None,
            table: None,
        }
    }

    fn applies(&self, table: &str, op: Op) -> bool {
        self.table.map_or(true, |t| t == table)
            && self.ops.as_ref().map_or(true, |ops| ops.contains(&op))
    }
}

/// Hook that sees the mutation and the next mutator on each call.
pub fn func<F>(f: F) -> Hook
where
    F: Fn(&Context, &mut Mutation, &dyn Mutator) -> Result<MutationOutput> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Hook::new(move |next| {
        let f = Arc::clone(&f);
        mutator(move |ctx, m| f(ctx, m, next.as_ref()))
    })
}

/// Restrict a hook to some operations.
pub fn on(mut hook: Hook, ops: &[Op]) -> Hook {
    hook.ops = Some(ops.to_vec());
    hook
}

/// Fail the listed operations before anything is executed.
pub fn reject(ops: &[Op]) -> Hook {
    let h = func(|_, m, _| {
        Err(Error::Other(format!(
            "{} operation is not allowed on {}",
            m.op(),
            m.table()
        )))
    });
    on(h, ops)
}

/// Restrict a hook to mutations of one table.
pub fn for_table(table: &'static str, mut hook: Hook) -> Hook {
    hook.table = Some(table);
    hook
}

/// Wrap `terminal` in every hook matching the mutation.
pub(crate) fn chain(hooks: &[Hook], m: &Mutation, terminal: Arc<dyn Mutator>) -> Arc<dyn Mutator> {
    hooks
        .iter()
        .rev()
        .filter(|h| h.applies(m.table(), m.op()))
        .fold(terminal, |next, h| (h.wrap)(next))
}
