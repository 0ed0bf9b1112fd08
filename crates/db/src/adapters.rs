//! Value adapters for SQL dialects.
//!
//! `PostgreSQL` binds UUIDs natively. `MySQL`/`MariaDB` and `SQLite` store them in
//! 16-byte binary columns and reject a native UUID parameter in hand-written
//! statements, so ids are bound as raw bytes there.

use sea_orm::{DatabaseBackend, Value};
use uuid::Uuid;

/// Binds values for hand-written statements on a given backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectAdapter {
    backend: DatabaseBackend,
}

impl DialectAdapter {
    /// Create an adapter for the given backend.
    #[must_use]
    pub const fn new(backend: DatabaseBackend) -> Self {
        Self { backend }
    }

    /// The backend this adapter binds for.
    #[must_use]
    pub const fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    /// Whether the backend accepts native UUID parameters.
    #[must_use]
    pub const fn binds_native_uuid(&self) -> bool {
        matches!(self.backend, DatabaseBackend::Postgres)
    }

    /// Convert an id into a statement parameter.
    #[must_use]
    pub fn uuid(&self, id: Uuid) -> Value {
        if self.binds_native_uuid() {
            Value::Uuid(Some(Box::new(id)))
        } else {
            Value::Bytes(Some(Box::new(id.as_bytes().to_vec())))
        }
    }

    /// Placeholder for the `n`-th parameter (1-based).
    #[must_use]
    pub fn placeholder(&self, n: usize) -> String {
        match self.backend {
            DatabaseBackend::Postgres => format!("${n}"),
            _ => "?".to_string(),
        }
    }

    /// Comma separated placeholders for `count` parameters starting at `first`.
    #[must_use]
    pub fn placeholders(&self, first: usize, count: usize) -> String {
        (first..first + count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
