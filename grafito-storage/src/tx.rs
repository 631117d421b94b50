//! Transaction/session manager.
//!
//! A scope opens a transaction on entry and commits on a clean exit; any
//! error returned from the closure triggers a rollback instead. Nested
//! scopes open savepoints so an inner failure only unwinds to the savepoint,
//! leaving the enclosing transaction free to continue or commit.

use rusqlite::Connection;

use grafito_model::{Error, Result};

use crate::store::Store;

impl Store {
    /// Runs `f` inside a freshly-begun transaction, committing if it returns
    /// `Ok` and rolling back if it returns `Err`. This is the entry point
    /// every mutating primitive and the clause executor goes through.
    pub fn scope<T>(&self, f: impl FnOnce(&Tx) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| Error::transaction("connection mutex poisoned"))?;
        let txn = guard.unchecked_transaction()?;
        tracing::debug!("transaction begin");
        let tx = Tx { conn: &txn };
        match f(&tx) {
            Ok(value) => {
                txn.commit()?;
                tracing::debug!("transaction commit");
                Ok(value)
            }
            Err(err) => {
                let _ = txn.rollback();
                tracing::debug!(error = %err, "transaction rollback");
                Err(err)
            }
        }
    }

    /// Runs `f` with a plain read-only connection reference. Used by
    /// read-only primitives invoked outside an explicit scope, giving them
    /// an implicit read transaction at the SQLite level (WAL readers never
    /// block behind the single writer).
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| Error::transaction("connection mutex poisoned"))?;
        f(&guard)
    }
}

/// A handle to the active transaction, passed into scoped closures.
/// Derefs to `&Connection` so primitives can run SQL directly against it.
pub struct Tx<'a> {
    conn: &'a rusqlite::Transaction<'a>,
}

impl<'a> Tx<'a> {
    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// Opens a savepoint and runs `f` inside it. A returned `Err` rolls back
    /// only to the savepoint boundary; the enclosing transaction is
    /// untouched and the caller may continue or still commit it.
    pub fn savepoint<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut sp = self.conn.savepoint()?;
        match f(&sp) {
            Ok(value) => {
                sp.commit()?;
                Ok(value)
            }
            Err(err) => {
                let _ = sp.rollback();
                Err(err)
            }
        }
    }
}

impl<'a> std::ops::Deref for Tx<'a> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}
