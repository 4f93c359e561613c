use super::Create;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::value::Value;

/// What to do with a column when the insert hits a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Overwrite every inserted column except the id, immutable fields and
    /// the conflict target
    UpdateNewValues,
    /// Overwrite one column with the inserted value
    UpdateNew(String),
    /// Keep the stored value of one column
    Keep(String),
    /// Set one column to an explicit value
    SetValue(String, Value),
    /// Leave the stored row as is but still report it
    Ignore,
    /// `ON CONFLICT DO NOTHING`
    DoNothing,
}

/// Insert with an `ON CONFLICT` clause.
///
/// ```no_run
/// # use entgraph::{Client, Context, Result};
/// # use entgraph::Entity;
/// # fn run<Customer: Entity>(client: &Client) -> Result<()> {
/// let ctx = Context::background();
/// client
///     .entity::<Customer>()
///     .create()
///     .set("email", "ops@acme.test")
///     .set("name", "Acme Ops")
///     .on_conflict(&["email"])
///     .update_new("name")
///     .exec(&ctx)?;
/// # Ok(())
/// # }
/// ```
pub struct Upsert<E: Entity> {
    create: Create<E>,
}

impl<E: Entity> Upsert<E> {
    pub(super) fn new(create: Create<E>) -> Self {
        Self { create }
    }

    fn push(mut self, resolution: Resolution) -> Self {
        if let Some(conflict) = self.create.mutation.conflict.as_mut() {
            conflict.resolution.push(resolution);
        }
        self
    }

    /// Overwrite the stored row with every inserted value.
    pub fn update_new_values(self) -> Self {
        self.push(Resolution::UpdateNewValues)
    }

    pub fn update_new(self, column: &str) -> Self {
        self.push(Resolution::UpdateNew(column.to_owned()))
    }

    /// Keep the stored value of `column`, also under
    /// [`Upsert::update_new_values`].
    pub fn keep(self, column: &str) -> Self {
        self.push(Resolution::Keep(column.to_owned()))
    }

    pub fn set_value(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(Resolution::SetValue(column.to_owned(), value.into()))
    }

    pub fn ignore(self) -> Self {
        self.push(Resolution::Ignore)
    }

    /// Skip conflicting rows. Not available on MySQL.
    pub fn do_nothing(self) -> Self {
        self.push(Resolution::DoNothing)
    }

    pub fn exec(mut self, ctx: &Context) -> Result<()> {
        self.create.run(ctx).map(|_| ())
    }

    pub fn exec_x(self, ctx: &Context) {
        self.exec(ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Id of the inserted or updated row.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] on dialects without `RETURNING`, and
    /// [`Error::NotFound`] when `do_nothing` skipped the row.
    pub fn id(mut self, ctx: &Context) -> Result<Value> {
        let dialect = self.create.client.dialect();
        if !dialect.supports_returning() {
            return Err(Error::unsupported(dialect, "upsert id"));
        }
        let out = self.create.run(ctx)?;
        out.ids
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(E::schema().label))
    }

    pub fn id_x(self, ctx: &Context) -> Value {
        self.id(ctx).unwrap_or_else(|e| panic!("{e}"))
    }
}
