use std::sync::Arc;

use super::{FromValue, Value, ValueMap};
use crate::error::{Error, Result};
use crate::schema::EntitySchema;

/// One result row: column names shared across the result set plus values.
///
/// Also serves as the dynamic value bag for projections and aggregates;
/// [`Row::get`] fails closed when a column is missing or has another type.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Raw value of a column.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.index_of(column).map(|i| &self.values[i])
    }

    /// Typed value of a column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scan`] if the column is absent or the value does not
    /// convert into `T`.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T> {
        let value = self
            .value(column)
            .ok_or_else(|| Error::Scan(format!("column {column:?} is not in the result set")))?;
        T::from_value(value.clone())
            .map_err(|e| Error::Scan(format!("column {column:?}: {}", scan_detail(&e))))
    }

    /// Typed value by position.
    pub fn get_at<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| Error::Scan(format!("column index {index} out of range")))?;
        T::from_value(value.clone())
    }

    /// Lift every column the schema knows to its declared type.
    pub(crate) fn normalize(mut self, schema: &EntitySchema) -> Result<Self> {
        for (i, column) in self.columns.iter().enumerate() {
            if let Some(ty) = schema.column_type(column) {
                let value = std::mem::replace(&mut self.values[i], Value::Null);
                self.values[i] = value
                    .coerce(ty)
                    .map_err(|e| Error::Scan(format!("{}.{column}: {}", schema.table, scan_detail(&e))))?;
            }
        }
        Ok(self)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Owned map view, in column order.
    pub fn to_map(&self) -> ValueMap {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

fn scan_detail(err: &Error) -> String {
    match err {
        Error::Scan(msg) => msg.clone(),
        other => other.to_string(),
    }
}
