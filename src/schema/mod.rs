//! Static per-entity metadata.
//!
//! An [`EntitySchema`] is built once per entity type (typically in a
//! `once_cell` `Lazy` static) and shared read-only by every builder. The
//! engine never inspects Rust structs; everything it knows about a table
//! comes from here.
//!
//! ```
//! use entgraph::schema::{EdgeDef, EntitySchema, FieldDef, IdDef};
//!
//! let schema = EntitySchema::new("invoices", "invoice", IdDef::int("id"))
//!     .with_field(FieldDef::int("amount_cents"))
//!     .with_field(FieldDef::int("customer_id"))
//!     .with_edge(EdgeDef::belongs_to("customer", "customers", "customer_id").required());
//! assert!(schema.valid_column("amount_cents"));
//! assert!(schema.edge("customer").is_some());
//! ```

mod edge;
mod field;

pub use edge::{EdgeDef, LinkTable, Rel};
pub use field::{validators, DefaultFn, FieldDef, FieldType, Validator};

use crate::value::Value;

/// Maximum number of edges per entity (width of the loaded-edge bitset).
pub const MAX_EDGES: usize = 64;

/// How ids are typed and generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    /// Database-generated integer
    Int,
    String,
    Uuid,
}

impl IdType {
    pub fn field_type(self) -> FieldType {
        match self {
            IdType::Int => FieldType::Int,
            IdType::String => FieldType::String,
            IdType::Uuid => FieldType::Uuid,
        }
    }
}

/// Id column descriptor
#[derive(Debug, Clone, Copy)]
pub struct IdDef {
    pub column: &'static str,
    pub ty: IdType,
    pub default: Option<DefaultFn>,
}

impl IdDef {
    pub fn int(column: &'static str) -> Self {
        Self {
            column,
            ty: IdType::Int,
            default: None,
        }
    }

    /// UUID id, generated with `Uuid::new_v4` unless supplied.
    pub fn uuid(column: &'static str) -> Self {
        Self {
            column,
            ty: IdType::Uuid,
            default: Some(|| Value::Uuid(uuid::Uuid::new_v4())),
        }
    }

    /// String id; must be supplied unless a default is set.
    pub fn string(column: &'static str) -> Self {
        Self {
            column,
            ty: IdType::String,
            default: None,
        }
    }

    pub fn default(mut self, f: DefaultFn) -> Self {
        self.default = Some(f);
        self
    }
}

/// Everything the engine knows about one entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub table: &'static str,
    /// Lower-case entity name used in error messages
    pub label: &'static str,
    pub id: IdDef,
    pub fields: Vec<FieldDef>,
    pub edges: Vec<EdgeDef>,
}

impl EntitySchema {
    pub fn new(table: &'static str, label: &'static str, id: IdDef) -> Self {
        Self {
            table,
            label,
            id,
            fields: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        assert!(
            !self.valid_column(field.name),
            "{}: duplicate column {}",
            self.table,
            field.name
        );
        self.fields.push(field);
        self
    }

    /// # Panics
    ///
    /// Panics on a duplicate edge name, on more than [`MAX_EDGES`] edges,
    /// and when an edge keeping its key on this table names an undeclared
    /// column. Schemas are built at startup, so these are programming errors.
    pub fn with_edge(mut self, edge: EdgeDef) -> Self {
        assert!(
            self.edge(edge.name).is_none(),
            "{}: duplicate edge {}",
            self.table,
            edge.name
        );
        assert!(self.edges.len() < MAX_EDGES, "{}: too many edges", self.table);
        if edge.fk_on_self() {
            assert!(
                self.field(edge.column).is_some(),
                "{}: edge {} needs field {}",
                self.table,
                edge.name,
                edge.column
            );
        }
        self.edges.push(edge);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Edge and its position in the loaded-edge bitset.
    pub fn edge(&self, name: &str) -> Option<(usize, &EdgeDef)> {
        self.edges.iter().enumerate().find(|(_, e)| e.name == name)
    }

    /// Id or declared field.
    pub fn valid_column(&self, name: &str) -> bool {
        name == self.id.column || self.field(name).is_some()
    }

    pub fn column_type(&self, name: &str) -> Option<FieldType> {
        if name == self.id.column {
            return Some(self.id.ty.field_type());
        }
        self.field(name).map(|f| f.ty)
    }

    /// Id column followed by every field, in declaration order.
    pub fn columns(&self) -> Vec<&'static str> {
        std::iter::once(self.id.column)
            .chain(self.fields.iter().map(|f| f.name))
            .collect()
    }

    /// Edge whose foreign key is the given column of this table.
    pub fn edge_for_column(&self, column: &str) -> Option<&EdgeDef> {
        self.edges
            .iter()
            .find(|e| e.fk_on_self() && e.column == column)
    }
}
