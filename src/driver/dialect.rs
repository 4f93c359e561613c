use std::fmt;

/// SQL dialect reported by a driver.
///
/// Capability queries let builders degrade instead of emitting statements
/// the backend would reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
    MySql,
}

impl Dialect {
    /// `INSERT ... RETURNING` is available.
    pub fn supports_returning(self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }

    /// `SELECT ... FOR UPDATE / FOR SHARE` is available.
    pub fn supports_row_locking(self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::MySql)
    }

    /// `ON CONFLICT DO NOTHING` without an update clause.
    pub fn supports_do_nothing(self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }

    /// Limit emitted when an offset is requested without one.
    ///
    /// Parameters are signed 64-bit, which every supported backend accepts.
    pub fn max_limit(self) -> u64 {
        i64::MAX as u64
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite3",
            Dialect::MySql => "mysql",
        })
    }
}
