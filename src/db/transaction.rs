//! Transaction boundary over a caller-held [`Connection`].
//!
//! These are pass-throughs to the driver. Deciding when to commit or roll back
//! is the caller's business, and nothing here touches the pool.

use crate::db::connection::Connection;
use crate::error::DbResult;
use tracing::debug;

/// Start a transaction on `conn`.
///
/// A no-op for backends whose transactions begin implicitly.
pub async fn begin(conn: &mut Connection) -> DbResult<()> {
    conn.native_mut().begin().await?;
    debug!(connection_id = %conn.id(), "Transaction started");
    Ok(())
}

pub async fn commit(conn: &mut Connection) -> DbResult<()> {
    conn.native_mut().commit().await?;
    debug!(connection_id = %conn.id(), "Transaction committed");
    Ok(())
}

pub async fn rollback(conn: &mut Connection) -> DbResult<()> {
    conn.native_mut().rollback().await?;
    debug!(connection_id = %conn.id(), "Transaction rolled back");
    Ok(())
}

/// Close `conn` for good.
pub async fn close(conn: Connection) -> DbResult<()> {
    let id = conn.id().to_string();
    conn.into_native().close().await?;
    debug!(connection_id = %id, "Connection closed");
    Ok(())
}
