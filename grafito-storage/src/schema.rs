//! Normalized relational schema for the graph, the index/constraint
//! registry, and the vector/FTS metadata tables.

use rusqlite::Connection;

use grafito_model::Result;

const SCHEMA_VERSION: i64 = 1;

/// Base DDL. Applied with `IF NOT EXISTS` throughout so it is safe to run
/// against an already-initialized store (idempotent bootstrap, same
/// discipline the migration runner below assumes for later versions).
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at REAL NOT NULL DEFAULT (julianday('now')),
    uri        TEXT,
    properties TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS labels (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS node_labels (
    node_id  INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    label_id INTEGER NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
    PRIMARY KEY (node_id, label_id)
);
CREATE INDEX IF NOT EXISTS idx_node_labels_label ON node_labels(label_id);

CREATE TABLE IF NOT EXISTS rel_types (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS relationships (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    source     INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target     INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    rel_type   TEXT NOT NULL,
    created_at REAL NOT NULL DEFAULT (julianday('now')),
    uri        TEXT,
    properties TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_rel_source_type ON relationships(source, rel_type);
CREATE INDEX IF NOT EXISTS idx_rel_target_type ON relationships(target, rel_type);

CREATE TABLE IF NOT EXISTS property_indexes (
    name       TEXT PRIMARY KEY,
    entity     TEXT NOT NULL CHECK (entity IN ('node', 'relationship')),
    label_or_type TEXT NOT NULL,
    property   TEXT NOT NULL,
    is_unique  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS property_constraints (
    name       TEXT PRIMARY KEY,
    entity     TEXT NOT NULL CHECK (entity IN ('node', 'relationship')),
    label_or_type TEXT NOT NULL,
    property   TEXT NOT NULL,
    kind       TEXT NOT NULL CHECK (kind IN ('uniqueness', 'existence', 'type')),
    scalar_type TEXT
);

CREATE TABLE IF NOT EXISTS vector_indexes (
    name             TEXT PRIMARY KEY,
    dimension        INTEGER NOT NULL,
    backend          TEXT NOT NULL,
    method           TEXT NOT NULL,
    metric           TEXT NOT NULL DEFAULT 'l2',
    store_embeddings INTEGER NOT NULL DEFAULT 0,
    default_k        INTEGER NOT NULL DEFAULT 10,
    embedding_fn     TEXT,
    options          TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS vector_entries (
    index_name TEXT NOT NULL REFERENCES vector_indexes(name) ON DELETE CASCADE,
    node_id    INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    vector     BLOB NOT NULL,
    PRIMARY KEY (index_name, node_id)
);

CREATE TABLE IF NOT EXISTS text_index_config (
    entity        TEXT NOT NULL CHECK (entity IN ('node', 'relationship')),
    label_or_type TEXT,
    property      TEXT NOT NULL,
    weight        REAL NOT NULL DEFAULT 1.0,
    PRIMARY KEY (entity, label_or_type, property)
);

CREATE VIRTUAL TABLE IF NOT EXISTS fts_documents USING fts5(
    entity UNINDEXED,
    entity_id UNINDEXED,
    content
);
"#;

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    migrate(conn)?;
    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64> {
    let v: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .ok();
    Ok(v.and_then(|s| s.parse().ok()).unwrap_or(0))
}

/// Column-existence-driven migration: each step checks `pragma_table_info`
/// before altering, so re-running against a store already at the target
/// version is a no-op.
fn migrate(conn: &Connection) -> Result<()> {
    let version = current_version(conn)?;

    if version < 1 {
        if !column_exists(conn, "nodes", "uri")? {
            conn.execute_batch("ALTER TABLE nodes ADD COLUMN uri TEXT")?;
        }
        conn.execute(
            "INSERT INTO schema_meta(key, value) VALUES ('version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![SCHEMA_VERSION.to_string()],
        )?;
        tracing::info!(version = SCHEMA_VERSION, "schema migrated");
    }

    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("SELECT 1 FROM pragma_table_info('{table}') WHERE name = ?1"))?;
    Ok(stmt.exists(rusqlite::params![column])?)
}
