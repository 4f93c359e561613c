//! Column descriptors.

use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// Declared storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    Time,
    Uuid,
    Json,
    /// String column restricted to a fixed set of values
    Enum(&'static [&'static str]),
}

/// Custom field validator; the error string becomes the validation reason.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Value provider for create-time and update-time defaults.
pub type DefaultFn = fn() -> Value;

/// Metadata for one non-id column.
#[derive(Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
    /// Column may hold NULL and may be cleared by updates
    pub nullable: bool,
    /// Create does not require a value
    pub optional: bool,
    /// Column cannot be changed after create
    pub immutable: bool,
    pub unique: bool,
    pub default: Option<DefaultFn>,
    pub update_default: Option<DefaultFn>,
    pub validator: Option<Validator>,
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("nullable", &self.nullable)
            .field("optional", &self.optional)
            .field("immutable", &self.immutable)
            .field("unique", &self.unique)
            .field("default", &self.default.is_some())
            .field("update_default", &self.update_default.is_some())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl FieldDef {
    pub fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            optional: false,
            immutable: false,
            unique: false,
            default: None,
            update_default: None,
            validator: None,
        }
    }

    pub fn bool(name: &'static str) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn int(name: &'static str) -> Self {
        Self::new(name, FieldType::Int)
    }

    pub fn float(name: &'static str) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn bytes(name: &'static str) -> Self {
        Self::new(name, FieldType::Bytes)
    }

    pub fn time(name: &'static str) -> Self {
        Self::new(name, FieldType::Time)
    }

    pub fn uuid(name: &'static str) -> Self {
        Self::new(name, FieldType::Uuid)
    }

    pub fn json(name: &'static str) -> Self {
        Self::new(name, FieldType::Json)
    }

    pub fn enumeration(name: &'static str, values: &'static [&'static str]) -> Self {
        Self::new(name, FieldType::Enum(values))
    }

    /// NULL allowed; implies [`FieldDef::optional`].
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self.optional = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, f: DefaultFn) -> Self {
        self.default = Some(f);
        self
    }

    pub fn update_default(mut self, f: DefaultFn) -> Self {
        self.update_default = Some(f);
        self
    }

    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    /// Create must supply a value.
    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }

    /// Check a value against the column's type rules and custom validator.
    ///
    /// NULL passes only for nullable columns. Returns the failure reason.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err("value is required".to_owned())
            };
        }
        if let FieldType::Enum(values) = self.ty {
            match value {
                Value::String(s) if values.contains(&s.as_str()) => {}
                other => {
                    return Err(format!(
                        "{other} is not one of [{}]",
                        values.join(", ")
                    ))
                }
            }
        }
        if let Some(validator) = &self.validator {
            validator(value)?;
        }
        Ok(())
    }
}

/// Common validators.
pub mod validators {
    use crate::value::Value;

    /// Reject empty strings.
    pub fn not_empty(value: &Value) -> Result<(), String> {
        match value {
            Value::String(s) if s.is_empty() => Err("value is empty".to_owned()),
            _ => Ok(()),
        }
    }

    /// Reject negative numbers.
    pub fn non_negative(value: &Value) -> Result<(), String> {
        match value {
            Value::Int(v) if *v < 0 => Err(format!("{v} is negative")),
            Value::Float(v) if *v < 0.0 => Err(format!("{v} is negative")),
            _ => Ok(()),
        }
    }

    /// Upper bound on string length, counted in characters.
    pub fn max_len(max: usize) -> impl Fn(&Value) -> Result<(), String> + Send + Sync {
        move |value| match value {
            Value::String(s) if s.chars().count() > max => {
                Err(format!("value is longer than {max} characters"))
            }
            _ => Ok(()),
        }
    }
}
