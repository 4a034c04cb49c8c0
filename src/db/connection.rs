//! Caller-owned connection handle.

use crate::db::backend::NativeConnection;
use crate::models::Ownership;

/// A connection the caller holds across operations, typically for a transaction.
///
/// Obtained from [`Handler::get_connection`](crate::Handler::get_connection), never
/// from the pool. The adapter runs statements on it when it is supplied but never
/// commits, rolls back or closes it on the caller's behalf.
pub struct Connection {
    id: String,
    native: Box<dyn NativeConnection>,
}

impl Connection {
    pub fn new(native: Box<dyn NativeConnection>) -> Self {
        Self {
            id: generate_connection_id(),
            native,
        }
    }

    /// Unique identifier used in log records.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ownership(&self) -> Ownership {
        Ownership::Caller
    }

    pub(crate) fn native_mut(&mut self) -> &mut dyn NativeConnection {
        self.native.as_mut()
    }

    pub(crate) fn into_native(self) -> Box<dyn NativeConnection> {
        self.native
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Generate a unique connection ID.
pub(crate) fn generate_connection_id() -> String {
    format!("conn_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_format() {
        let id = generate_connection_id();
        assert!(id.starts_with("conn_"));
        assert_eq!(id.len(), 5 + 32); // "conn_" + 32 hex chars
    }
}
