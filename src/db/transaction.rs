use std::ops::Deref;

use duckdb::Connection;
use tracing::warn;

use crate::error::Result;

/// A transaction scoped to a borrowed connection. Rolls back on drop unless
/// [`ScopedTransaction::commit`] was called.
///
/// Beginning while another transaction is still open on the same handle (for
/// instance one abandoned by an earlier failed evaluation) rolls that
/// transaction back and begins again, exactly once.
pub struct ScopedTransaction<'c> {
    conn: &'c Connection,
    finished: bool,
}

impl<'c> ScopedTransaction<'c> {
    pub fn begin(conn: &'c Connection) -> Result<Self> {
        begin_with_retry(|| conn.execute_batch("BEGIN TRANSACTION"), || conn.execute_batch("ROLLBACK"))?;
        Ok(ScopedTransaction { conn, finished: false })
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }
}

/// A failed rollback surfaces the original `begin` error, not its own.
fn begin_with_retry(
    mut begin: impl FnMut() -> duckdb::Result<()>,
    rollback: impl FnOnce() -> duckdb::Result<()>,
) -> duckdb::Result<()> {
    let Err(err) = begin() else {
        return Ok(());
    };
    warn!(%err, "could not begin transaction; rolling back the open one and retrying");
    if let Err(rollback_err) = rollback() {
        warn!(%rollback_err, "rollback before retrying begin failed");
        return Err(err);
    }
    begin()
}

impl Deref for ScopedTransaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(%err, "rollback of abandoned transaction failed");
            }
        }
    }
}
