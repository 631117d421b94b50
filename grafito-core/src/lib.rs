//! Grafito: the public `Db`/`Session` facade wiring `grafito-storage`
//! (schema, primitives, indexes, traversal, vector/text search) to
//! `grafito-query` (the Cypher-like lexer/parser/evaluator/executor),
//! plus the external-collaborator surfaces `spec.md` §6 names: dump/
//! restore, `apoc.load.*`/`apoc.import.json`, and Neo4j dump import.
//!
//! # Quick start
//!
//! ```ignore
//! use grafito::{Db, Config, Params};
//!
//! let db = Db::open_in_memory(Config::default())?;
//! db.scope(|session| {
//!     let alice = session.create_node(&["Person".into()], Default::default())?;
//!     session.execute("MATCH (p:Person) RETURN p", &Params::new())?;
//!     Ok(())
//! })?;
//! ```

mod dump;
mod http;
mod neo4j_import;
mod procedures;
mod session;

pub use grafito_model::{
    Direction, Duration, Error, Node, NodeId, Point, PropertyMap, RelId, Relationship, Result,
    Value,
};
pub use grafito_query::{Params, Row, Value as RowValue};
pub use grafito_storage::index::{ConstraintInfo, ConstraintKind, Entity, IndexInfo};
pub use grafito_storage::text::{TextHit, TextIndexConfig};
pub use grafito_storage::traversal::Path;
pub use grafito_storage::vector::{Metric, SearchHit, VectorIndexInfo};
pub use grafito_storage::{Config, JournalMode};

pub use dump::{dump_script, restore_script};
pub use neo4j_import::{ImportStats as Neo4jImportStats, import_dump as import_neo4j_dump};
pub use session::Session;

use std::path::Path;

use grafito_storage::Store;

/// An open Grafito database. Internally a single `rusqlite::Connection`
/// guarded by a mutex, matching `grafito_storage::Store`'s single-writer
/// model (§5).
pub struct Db {
    store: Store,
}

impl Db {
    /// Opens (creating if absent) a database file at `path`.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        register_builtin_procedures();
        Ok(Db { store: Store::open(path, config)? })
    }

    /// Opens a private, in-process database that vanishes when dropped.
    pub fn open_in_memory(config: Config) -> Result<Self> {
        register_builtin_procedures();
        Ok(Db { store: Store::open_in_memory(config)? })
    }

    pub fn config(&self) -> &Config {
        self.store.config()
    }

    /// Runs `f` inside a write scope: a transaction begins on entry and
    /// commits on a clean return; any `Err` rolls it back first (§4.11).
    pub fn scope<T>(&self, f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
        let max_hops = self.store.config().cypher_max_hops;
        self.store.scope(|tx| f(&Session::new(tx.connection(), max_hops)))
    }

    /// Runs `f` inside an implicit read transaction; no write primitive is
    /// reachable through the session it's given (§4.11).
    pub fn read<T>(&self, f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
        let max_hops = self.store.config().cypher_max_hops;
        self.store.read(|conn| f(&Session::new(conn, max_hops)))
    }

    /// Convenience wrapping a single read-only Cypher query in an implicit
    /// read transaction.
    pub fn query(&self, cypher: &str, params: &Params) -> Result<Vec<Row>> {
        self.read(|session| session.query(cypher, params))
    }

    /// Convenience wrapping a single write Cypher statement in its own
    /// scope: it auto-commits alone, per the primitive contract for
    /// single-statement batch APIs described in §4.11.
    pub fn execute(&self, cypher: &str, params: &Params) -> Result<u32> {
        self.scope(|session| session.execute(cypher, params))
    }

    /// Produces the self-describing `CREATE`-script dump (§6, §8 scenario
    /// 6): one `CREATE` per node carrying labels/properties tagged with a
    /// synthetic `_dump_id`, one `MATCH ... CREATE` per relationship keyed
    /// by `_dump_id`, and a final `MATCH (n) REMOVE n._dump_id`.
    pub fn dump(&self) -> Result<String> {
        self.read(dump::dump_script)
    }

    /// Restores a dump produced by [`Db::dump`]. When `clear_existing` is
    /// set, every node (and, transitively, every relationship) is deleted
    /// first.
    pub fn restore(&self, script: &str, clear_existing: bool) -> Result<()> {
        self.scope(|session| dump::restore_script(session, script, clear_existing))
    }

    /// Imports a Zstandard-compressed Neo4j dump archive (§6). Constraints
    /// and native indexes are not imported; recreate them afterward.
    pub fn import_neo4j_dump(&self, archive_path: impl AsRef<Path>) -> Result<neo4j_import::ImportStats> {
        self.scope(|session| neo4j_import::import_dump(archive_path.as_ref(), session))
    }
}

fn register_builtin_procedures() {
    procedures::register_builtins();
}
