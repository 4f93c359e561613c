//! Relationship descriptors.

/// Cardinality of an edge, seen from the entity declaring it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rel {
    /// One-to-one
    O2O,
    /// One-to-many
    O2M,
    /// Many-to-one
    M2O,
    /// Many-to-many through a link table
    M2M,
}

/// Link table backing a many-to-many edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTable {
    pub table: &'static str,
    /// Column holding the declaring entity's id
    pub source_column: &'static str,
    /// Column holding the target entity's id
    pub target_column: &'static str,
}

/// Metadata for one named edge.
///
/// Where the foreign key lives follows from the relation:
/// - `M2O` and inverse `O2O`: `column` is on the declaring table
/// - `O2M` and non-inverse `O2O`: `column` is on the target table
/// - `M2M`: `link` describes the join table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDef {
    pub name: &'static str,
    /// Target table
    pub target: &'static str,
    pub rel: Rel,
    pub inverse: bool,
    pub column: &'static str,
    pub link: Option<LinkTable>,
    pub required: bool,
    /// Id column of the target table
    pub target_id: &'static str,
}

impl EdgeDef {
    /// One-to-one, foreign key on the target table.
    pub fn has_one(name: &'static str, target: &'static str, column: &'static str) -> Self {
        Self {
            name,
            target,
            rel: Rel::O2O,
            inverse: false,
            column,
            link: None,
            required: false,
            target_id: "id",
        }
    }

    /// One-to-many, foreign key on the target table.
    pub fn has_many(name: &'static str, target: &'static str, column: &'static str) -> Self {
        Self {
            rel: Rel::O2M,
            ..Self::has_one(name, target, column)
        }
    }

    /// Many-to-one, foreign key on the declaring table.
    pub fn belongs_to(name: &'static str, target: &'static str, column: &'static str) -> Self {
        Self {
            rel: Rel::M2O,
            inverse: true,
            ..Self::has_one(name, target, column)
        }
    }

    /// Inverse one-to-one, foreign key on the declaring table.
    pub fn owned_by(name: &'static str, target: &'static str, column: &'static str) -> Self {
        Self {
            inverse: true,
            ..Self::has_one(name, target, column)
        }
    }

    /// Many-to-many through `link`.
    pub fn many_to_many(
        name: &'static str,
        target: &'static str,
        link: &'static str,
        source_column: &'static str,
        target_column: &'static str,
    ) -> Self {
        Self {
            name,
            target,
            rel: Rel::M2M,
            inverse: false,
            column: source_column,
            link: Some(LinkTable {
                table: link,
                source_column,
                target_column,
            }),
            required: false,
            target_id: "id",
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Target id column, when it is not `id`.
    pub fn target_id(mut self, column: &'static str) -> Self {
        self.target_id = column;
        self
    }

    /// At most one target per entity.
    pub fn is_unique(&self) -> bool {
        matches!(self.rel, Rel::O2O | Rel::M2O)
    }

    /// The foreign key is a column of the declaring table.
    pub fn fk_on_self(&self) -> bool {
        match self.rel {
            Rel::M2O => true,
            Rel::O2O => self.inverse,
            Rel::O2M | Rel::M2M => false,
        }
    }
}
