//! Conversions between [`Value`], Rust types and `sea_query::Value`.

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use super::Value;
use crate::error::{Error, Result};
use crate::schema::FieldType;

/// Fallible extraction of a Rust type from a [`Value`].
///
/// Conversions are strict: a value of the wrong kind is a scan error, never
/// a silent default. The few lenient paths cover storage encodings drivers
/// cannot avoid (SQLite stores booleans as integers and UUIDs as text).
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &Value) -> Result<T> {
    Err(Error::Scan(format!(
        "expected {expected}, got {} ({value})",
        value.kind()
    )))
}

fn null<T>(expected: &str) -> Result<T> {
    Err(Error::Scan(format!("expected {expected}, got NULL")))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Null => null("int"),
            other => mismatch("int", &other),
        }
    }
}

macro_rules! impl_from_value_narrow_int {
    ($($ty:ty),*) => {$(
        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self> {
                let wide = i64::from_value(value)?;
                <$ty>::try_from(wide).map_err(|_| {
                    Error::Scan(format!("{wide} out of range for {}", stringify!($ty)))
                })
            }
        }
    )*};
}

impl_from_value_narrow_int!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            Value::Null => null("float"),
            other => mismatch("float", &other),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::Null => null("bool"),
            other => mismatch("bool", &other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(v) => Ok(v),
            Value::Null => null("string"),
            other => mismatch("string", &other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Null => null("bytes"),
            other => mismatch("bytes", &other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Time(v) => Ok(v),
            Value::String(s) => parse_time(&s),
            Value::Null => null("time"),
            other => mismatch("time", &other),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(v) => Ok(v),
            Value::String(s) => {
                Uuid::parse_str(&s).map_err(|e| Error::Scan(format!("invalid uuid {s:?}: {e}")))
            }
            Value::Bytes(b) => {
                Uuid::from_slice(&b).map_err(|e| Error::Scan(format!("invalid uuid bytes: {e}")))
            }
            Value::Null => null("uuid"),
            other => mismatch("uuid", &other),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v),
            Value::String(s) => serde_json::from_str(&s)
                .map_err(|e| Error::Scan(format!("invalid json: {e}"))),
            Value::Null => null("json"),
            other => mismatch("json", &other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    // SQLite CURRENT_TIMESTAMP format
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|e| Error::Scan(format!("invalid timestamp {s:?}: {e}")))
}

macro_rules! impl_into_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.into())
            }
        }
    )*};
}

impl_into_value!(
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => String,
    Vec<u8> => Bytes,
    DateTime<Utc> => Time,
    Uuid => Uuid,
    serde_json::Value => Json,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::String(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl Value {
    /// Normalize a stored value to the declared column type.
    ///
    /// Drivers return what the storage engine holds; this lifts it back to
    /// the schema's view so ids and foreign keys compare equal across
    /// tables regardless of how a driver encoded them.
    pub fn coerce(self, ty: FieldType) -> Result<Value> {
        if self.is_null() {
            return Ok(self);
        }
        Ok(match ty {
            FieldType::Bool => Value::Bool(bool::from_value(self)?),
            FieldType::Int => Value::Int(i64::from_value(self)?),
            FieldType::Float => Value::Float(f64::from_value(self)?),
            FieldType::Time => Value::Time(DateTime::<Utc>::from_value(self)?),
            FieldType::Uuid => Value::Uuid(Uuid::from_value(self)?),
            FieldType::Json => Value::Json(serde_json::Value::from_value(self)?),
            FieldType::String | FieldType::Enum(_) | FieldType::Bytes => self,
        })
    }

    /// Convert into a bindable `sea_query` value.
    pub fn to_sea(&self) -> sea_query::Value {
        match self {
            Value::Null => sea_query::Value::String(None),
            Value::Bool(v) => sea_query::Value::from(*v),
            Value::Int(v) => sea_query::Value::from(*v),
            Value::Float(v) => sea_query::Value::from(*v),
            Value::String(v) => sea_query::Value::from(v.clone()),
            Value::Bytes(v) => sea_query::Value::from(v.clone()),
            Value::Time(v) => sea_query::Value::from(*v),
            Value::Uuid(v) => sea_query::Value::from(*v),
            Value::Json(v) => sea_query::Value::from(v.clone()),
        }
    }

    /// Convert a parameter collected by `sea_query` back into a [`Value`].
    pub fn from_sea(value: &sea_query::Value) -> Result<Value> {
        use sea_query::Value as Sv;
        Ok(match value {
            Sv::Bool(v) => v.map_or(Value::Null, Value::Bool),
            Sv::TinyInt(v) => v.map_or(Value::Null, |v| Value::Int(v.into())),
            Sv::SmallInt(v) => v.map_or(Value::Null, |v| Value::Int(v.into())),
            Sv::Int(v) => v.map_or(Value::Null, |v| Value::Int(v.into())),
            Sv::BigInt(v) => v.map_or(Value::Null, Value::Int),
            Sv::TinyUnsigned(v) => v.map_or(Value::Null, |v| Value::Int(v.into())),
            Sv::SmallUnsigned(v) => v.map_or(Value::Null, |v| Value::Int(v.into())),
            Sv::Unsigned(v) => v.map_or(Value::Null, |v| Value::Int(v.into())),
            Sv::BigUnsigned(v) => match v {
                Some(v) => Value::Int(i64::try_from(*v).map_err(|_| {
                    Error::Scan(format!("{v} out of range for a signed 64-bit parameter"))
                })?),
                None => Value::Null,
            },
            Sv::Float(v) => v.map_or(Value::Null, |v| Value::Float(v.into())),
            Sv::Double(v) => v.map_or(Value::Null, Value::Float),
            Sv::Char(v) => v.map_or(Value::Null, |c| Value::String(c.to_string())),
            Sv::String(v) => match v {
                Some(s) => {
                    let s: &String = s;
                    Value::String(s.clone())
                }
                None => Value::Null,
            },
            Sv::Bytes(v) => match v {
                Some(b) => {
                    let b: &Vec<u8> = b;
                    Value::Bytes(b.clone())
                }
                None => Value::Null,
            },
            Sv::Json(v) => match v {
                Some(j) => {
                    let j: &serde_json::Value = j;
                    Value::Json(j.clone())
                }
                None => Value::Null,
            },
            Sv::ChronoDateTimeUtc(v) => match v {
                Some(t) => {
                    let t: &DateTime<Utc> = t;
                    Value::Time(*t)
                }
                None => Value::Null,
            },
            Sv::Uuid(v) => match v {
                Some(u) => {
                    let u: &Uuid = u;
                    Value::Uuid(*u)
                }
                None => Value::Null,
            },
            other => {
                return Err(Error::Scan(format!(
                    "unsupported statement parameter {other:?}"
                )))
            }
        })
    }
}
