//! The contract between typed entities and the untyped engine.
//!
//! An entity type maps rows to a struct and back ([`Entity::from_row`],
//! [`Entity::value`]) and carries an [`Edges`] side structure that the
//! eager-loading resolver fills in.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::EntitySchema;
use crate::value::{Row, Value};

/// A typed entity backed by an [`EntitySchema`].
///
/// # Example
///
/// ```
/// use entgraph::schema::{EntitySchema, FieldDef, IdDef};
/// use entgraph::{Edges, Entity, Result, Row, Value};
/// use once_cell::sync::Lazy;
///
/// static PLAN: Lazy<EntitySchema> = Lazy::new(|| {
///     EntitySchema::new("plans", "plan", IdDef::int("id")).with_field(FieldDef::string("name"))
/// });
///
/// #[derive(Debug, Clone)]
/// struct Plan {
///     id: i64,
///     name: String,
///     edges: Edges,
/// }
///
/// impl Entity for Plan {
///     fn schema() -> &'static EntitySchema {
///         &PLAN
///     }
///     fn from_row(row: &Row) -> Result<Self> {
///         Ok(Self {
///             id: row.get("id")?,
///             name: row.get("name")?,
///             edges: Edges::new(Self::schema()),
///         })
///     }
///     fn id(&self) -> Value {
///         self.id.into()
///     }
///     fn value(&self, column: &str) -> Option<Value> {
///         match column {
///             "id" => Some(self.id.into()),
///             "name" => Some(self.name.clone().into()),
///             _ => None,
///         }
///     }
///     fn edges(&self) -> &Edges {
///         &self.edges
///     }
///     fn edges_mut(&mut self) -> &mut Edges {
///         &mut self.edges
///     }
/// }
/// ```
pub trait Entity: Clone + Send + Sync + Sized + 'static {
    fn schema() -> &'static EntitySchema;

    /// Build the entity from a row holding every schema column.
    fn from_row(row: &Row) -> Result<Self>;

    fn id(&self) -> Value;

    /// Current value of a column, `None` for unknown columns.
    fn value(&self, column: &str) -> Option<Value>;

    fn edges(&self) -> &Edges;

    fn edges_mut(&mut self) -> &mut Edges;
}

/// Bitset of edges requested by eager loading, indexed by edge position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadedTypes(u64);

impl LoadedTypes {
    pub fn set(&mut self, index: usize) {
        self.0 |= 1 << index;
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0 & (1 << index) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Loaded relation values of one entity.
///
/// An edge is either not loaded (reads fail with [`Error::NotLoaded`]) or
/// loaded, possibly with no targets. Slots hold `Vec<T>` for the edge's
/// target entity type; to-one edges hold at most one element.
#[derive(Clone, Default)]
pub struct Edges {
    schema: Option<&'static EntitySchema>,
    loaded: LoadedTypes,
    slots: Vec<Option<Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for Edges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = match self.schema {
            Some(schema) => schema
                .edges
                .iter()
                .enumerate()
                .filter(|(i, _)| self.loaded.contains(*i))
                .map(|(_, e)| e.name)
                .collect(),
            None => Vec::new(),
        };
        f.debug_struct("Edges").field("loaded", &names).finish()
    }
}

impl Edges {
    pub fn new(schema: &'static EntitySchema) -> Self {
        Self {
            schema: Some(schema),
            loaded: LoadedTypes::default(),
            slots: vec![None; schema.edges.len()],
        }
    }

    pub fn loaded_types(&self) -> LoadedTypes {
        self.loaded
    }

    pub fn is_loaded(&self, edge: &str) -> bool {
        self.index(edge)
            .map(|i| self.loaded.contains(i))
            .unwrap_or(false)
    }

    /// Targets of a to-many edge.
    ///
    /// # Errors
    ///
    /// [`Error::NotLoaded`] when the edge was not requested, even if the
    /// relation is empty in the database.
    pub fn many<T: Entity>(&self, edge: &str) -> Result<&[T]> {
        let index = self.index(edge).ok_or_else(|| Error::not_loaded(edge))?;
        if !self.loaded.contains(index) {
            return Err(Error::not_loaded(edge));
        }
        match self.slots.get(index).and_then(|s| s.as_ref()) {
            Some(slot) => slot
                .downcast_ref::<Vec<T>>()
                .map(Vec::as_slice)
                .ok_or_else(|| {
                    Error::Other(format!(
                        "edge \"{edge}\" does not hold {} values",
                        T::schema().label
                    ))
                }),
            None => Ok(&[]),
        }
    }

    /// Target of a to-one edge; `Ok(None)` when loaded but absent.
    pub fn one<T: Entity>(&self, edge: &str) -> Result<Option<&T>> {
        self.many::<T>(edge).map(|targets| targets.first())
    }

    /// Target of a to-one edge that must exist once loaded.
    pub fn one_required<T: Entity>(&self, edge: &str) -> Result<&T> {
        self.one::<T>(edge)?
            .ok_or_else(|| Error::not_found(T::schema().label))
    }

    pub(crate) fn mark_loaded(&mut self, index: usize) {
        self.loaded.set(index);
    }

    pub(crate) fn set<T: Entity>(&mut self, index: usize, targets: Vec<T>) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.loaded.set(index);
        self.slots[index] = Some(Arc::new(targets));
    }

    fn index(&self, edge: &str) -> Option<usize> {
        self.schema?.edge(edge).map(|(i, _)| i)
    }
}
