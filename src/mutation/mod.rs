//! Mutation builders.
//!
//! Every write goes through a [`Mutation`]: the untyped description of one
//! create, update or delete against a single entity table. Typed builders
//! ([`Create`], [`Update`], [`UpdateOne`], [`Delete`], [`DeleteOne`],
//! [`Upsert`]) fill it in, hooks may inspect and change it, and the
//! executor at the bottom of the hook chain turns it into statements.
//!
//! ## Lifecycle
//!
//! 1. The builder records field values, clears and edge changes. Unknown
//!    names are remembered as validation errors.
//! 2. On save, defaults run (`default` providers for create,
//!    `update_default` providers for updates).
//! 3. Hooks run, first registered outermost.
//! 4. The executor validates the mutation and issues statements. Anything
//!    that needs more than one statement runs in a transaction unless one
//!    is already open.

/// Field and edge setters shared by the typed builders; each builder holds
/// its [`Mutation`] in a `mutation` field.
macro_rules! setters {
    () => {
        /// Set a field.
        pub fn set(mut self, field: &str, value: impl Into<$crate::value::Value>) -> Self {
            self.mutation.set_field(field, value);
            self
        }

        /// Set a field when `value` is `Some`.
        pub fn set_opt<V: Into<$crate::value::Value>>(self, field: &str, value: Option<V>) -> Self {
            match value {
                Some(value) => self.set(field, value),
                None => self,
            }
        }

        pub fn add_edge_ids<I, V>(mut self, edge: &str, ids: I) -> Self
        where
            I: IntoIterator<Item = V>,
            V: Into<$crate::value::Value>,
        {
            self.mutation.add_edge_ids(edge, ids);
            self
        }

        /// Point a unique edge at `id`.
        pub fn set_edge_id(self, edge: &str, id: impl Into<$crate::value::Value>) -> Self {
            self.add_edge_ids(edge, [id.into()])
        }

        /// The mutation built so far.
        pub fn mutation(&self) -> &$crate::mutation::Mutation {
            &self.mutation
        }

        pub fn mutation_mut(&mut self) -> &mut $crate::mutation::Mutation {
            &mut self.mutation
        }
    };
}

/// Setters only meaningful on rows that already exist.
macro_rules! update_setters {
    () => {
        /// Set a nullable field to NULL.
        pub fn clear(mut self, field: &str) -> Self {
            self.mutation.clear_field(field);
            self
        }

        pub fn remove_edge_ids<I, V>(mut self, edge: &str, ids: I) -> Self
        where
            I: IntoIterator<Item = V>,
            V: Into<$crate::value::Value>,
        {
            self.mutation.remove_edge_ids(edge, ids);
            self
        }

        /// Remove every target of an edge.
        pub fn clear_edge(mut self, edge: &str) -> Self {
            self.mutation.clear_edge(edge);
            self
        }

        /// Narrow the affected rows.
        pub fn filter(mut self, pred: $crate::predicate::Predicate<E>) -> Self {
            self.mutation.predicates.push(pred.into_fn());
            self
        }

        /// Pre-flight validation without touching the database.
        pub fn check(&self) -> $crate::error::Result<()> {
            let mut m = self.mutation.clone();
            m.apply_update_defaults();
            $crate::mutation::exec::check_update(&mut m)
        }
    };
}

mod create;
mod delete;
mod exec;
mod update;
mod upsert;

pub use create::{Create, CreateBulk};
pub use delete::{Delete, DeleteOne};
pub use update::{Update, UpdateOne};
pub use upsert::{Resolution, Upsert};

pub(crate) use exec::Executor;

use indexmap::IndexMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::predicate::{PredFn, Selector};
use crate::schema::EntitySchema;
use crate::value::{Row, Value, ValueMap};

/// Kind of write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Update,
    UpdateOne,
    Delete,
    DeleteOne,
}

impl Op {
    pub fn is_create(self) -> bool {
        self == Op::Create
    }

    pub fn is_update(self) -> bool {
        matches!(self, Op::Update | Op::UpdateOne)
    }

    pub fn is_delete(self) -> bool {
        matches!(self, Op::Delete | Op::DeleteOne)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Create => "Create",
            Op::Update => "Update",
            Op::UpdateOne => "UpdateOne",
            Op::Delete => "Delete",
            Op::DeleteOne => "DeleteOne",
        })
    }
}

/// Pending changes on one edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeChange {
    pub added: Vec<Value>,
    pub removed: Vec<Value>,
    pub cleared: bool,
}

impl EdgeChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && !self.cleared
    }
}

/// Upsert conflict policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub columns: Vec<String>,
    pub resolution: Vec<Resolution>,
}

/// What a mutation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationOutput {
    /// Rows written or deleted
    pub affected: u64,
    /// The created or updated row, for single-row operations
    pub row: Option<Row>,
    /// Ids of created rows, in input order
    pub ids: Vec<Value>,
}

/// Untyped description of one write.
#[derive(Clone)]
pub struct Mutation {
    pub(crate) schema: &'static EntitySchema,
    pub(crate) op: Op,
    pub(crate) fields: ValueMap,
    pub(crate) cleared: Vec<String>,
    pub(crate) edges: IndexMap<&'static str, EdgeChange>,
    pub(crate) id: Option<Value>,
    pub(crate) predicates: Vec<PredFn>,
    pub(crate) conflict: Option<Conflict>,
    pub(crate) errors: Vec<Error>,
    done: bool,
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("table", &self.schema.table)
            .field("op", &self.op)
            .field("id", &self.id)
            .field("fields", &self.fields)
            .field("cleared", &self.cleared)
            .field("edges", &self.edges)
            .field("predicates", &self.predicates.len())
            .field("conflict", &self.conflict)
            .finish()
    }
}

impl Mutation {
    pub(crate) fn new(schema: &'static EntitySchema, op: Op) -> Self {
        Self {
            schema,
            op,
            fields: ValueMap::new(),
            cleared: Vec::new(),
            edges: IndexMap::new(),
            id: None,
            predicates: Vec::new(),
            conflict: None,
            errors: Vec::new(),
            done: false,
        }
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    pub fn table(&self) -> &'static str {
        self.schema.table
    }

    /// Target id of single-row operations (and explicit create ids).
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Fields set so far, in the order they were set.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Set a field value.
    ///
    /// Unknown fields fail the mutation when it executes.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if name == self.schema.id.column && self.op.is_create() {
            self.id = Some(value);
            return;
        }
        if self.schema.field(name).is_none() {
            self.errors.push(Error::validation(
                name,
                format!("unknown field for {}", self.schema.table),
            ));
            return;
        }
        self.cleared.retain(|c| c != name);
        self.fields.insert(name.to_owned(), value);
    }

    /// Forget a field value or clear set earlier, as if it was never
    /// touched.
    pub fn reset_field(&mut self, name: &str) {
        self.fields.shift_remove(name);
        self.cleared.retain(|c| c != name);
    }

    /// Set a column to NULL.
    pub fn clear_field(&mut self, name: &str) {
        if self.schema.field(name).is_none() {
            self.errors.push(Error::validation(
                name,
                format!("unknown field for {}", self.schema.table),
            ));
            return;
        }
        self.reset_field(name);
        self.cleared.push(name.to_owned());
    }

    pub fn is_cleared(&self, name: &str) -> bool {
        self.cleared.iter().any(|c| c == name)
    }

    pub fn edge(&self, name: &str) -> Option<&EdgeChange> {
        self.edges.get(name)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&'static str, &EdgeChange)> {
        self.edges.iter().map(|(k, v)| (*k, v))
    }

    fn edge_mut(&mut self, name: &str) -> Option<&mut EdgeChange> {
        let schema = self.schema;
        let Some((_, def)) = schema.edge(name) else {
            self.errors.push(crate::predicate::unknown_edge(schema, name));
            return None;
        };
        Some(self.edges.entry(def.name).or_default())
    }

    pub fn add_edge_ids<I, V>(&mut self, edge: &str, ids: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        if let Some(change) = self.edge_mut(edge) {
            change.added.extend(ids.into_iter().map(Into::into));
        }
    }

    pub fn remove_edge_ids<I, V>(&mut self, edge: &str, ids: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        if let Some(change) = self.edge_mut(edge) {
            change.removed.extend(ids.into_iter().map(Into::into));
        }
    }

    pub fn clear_edge(&mut self, edge: &str) {
        if let Some(change) = self.edge_mut(edge) {
            change.cleared = true;
        }
    }

    /// Narrow an update or delete with a predicate on the mutated table.
    pub fn where_<F>(&mut self, f: F)
    where
        F: Fn(&mut Selector) + Send + Sync + 'static,
    {
        self.predicates.push(std::sync::Arc::new(f));
    }

    pub fn conflict(&self) -> Option<&Conflict> {
        self.conflict.as_ref()
    }

    /// Fail the mutation with `err` when it executes.
    pub fn fail(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub(crate) fn take_error(&mut self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors.remove(0))
        }
    }

    pub(crate) fn mark_done(&mut self) -> Result<()> {
        if self.done {
            return Err(Error::Other(format!(
                "{} mutation on {} was already executed",
                self.op, self.schema.table
            )));
        }
        self.done = true;
        Ok(())
    }

    /// Fill unset fields from `default` providers, and the id.
    pub(crate) fn apply_create_defaults(&mut self) {
        if self.id.is_none() {
            if let Some(default) = self.schema.id.default {
                self.id = Some(default());
            }
        }
        for field in &self.schema.fields {
            if self.fields.contains_key(field.name) {
                continue;
            }
            if let Some(default) = field.default {
                self.fields.insert(field.name.to_owned(), default());
            }
        }
    }

    /// Fill fields not set or cleared from `update_default` providers.
    pub(crate) fn apply_update_defaults(&mut self) {
        for field in &self.schema.fields {
            if self.fields.contains_key(field.name) || self.is_cleared(field.name) {
                continue;
            }
            if let Some(default) = field.update_default {
                self.fields.insert(field.name.to_owned(), default());
            }
        }
    }
}
