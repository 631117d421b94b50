//! Text-index subsystem: full-text search over configured
//! `(entity, label-or-type, property)` triples, backed by the `fts_documents`
//! FTS5 virtual table.
//!
//! Rather than SQLite triggers — FTS5 external-content triggers need a
//! fixed column per indexed property, and properties here live in a single
//! JSON text column, so there is nothing a declarative trigger could key
//! off — `grafito-storage` keeps `fts_documents` in sync from the write
//! path: every node/relationship write calls [`sync_node`]/
//! [`sync_relationship`], and every delete calls [`remove_node`]/
//! [`remove_relationship`]. [`rebuild`] is the full repopulate for bulk
//! loads that bypass the per-write sync, or after reconfiguring which
//! properties are indexed.

use rusqlite::{params, Connection};

use grafito_model::{NodeId, PropertyMap, RelId, Result};

use crate::codec;
use crate::index::Entity;
use crate::primitives;

pub struct TextIndexConfig {
    pub entity: Entity,
    pub label_or_type: Option<String>,
    pub property: String,
    pub weight: f64,
}

fn entity_str(entity: Entity) -> &'static str {
    match entity {
        Entity::Node => "node",
        Entity::Relationship => "relationship",
    }
}

pub fn configure(
    conn: &Connection,
    entity: Entity,
    label_or_type: Option<&str>,
    property: &str,
    weight: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO text_index_config(entity, label_or_type, property, weight) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(entity, label_or_type, property) DO UPDATE SET weight = excluded.weight",
        params![entity_str(entity), label_or_type, property, weight],
    )?;
    Ok(())
}

pub fn unconfigure(conn: &Connection, entity: Entity, label_or_type: Option<&str>, property: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM text_index_config WHERE entity = ?1 AND label_or_type IS ?2 AND property = ?3",
        params![entity_str(entity), label_or_type, property],
    )?;
    Ok(())
}

pub fn show_config(conn: &Connection) -> Result<Vec<TextIndexConfig>> {
    let mut stmt =
        conn.prepare("SELECT entity, label_or_type, property, weight FROM text_index_config ORDER BY entity, property")?;
    let rows = stmt.query_map([], |row| {
        let entity: String = row.get(0)?;
        Ok(TextIndexConfig {
            entity: if entity == "node" { Entity::Node } else { Entity::Relationship },
            label_or_type: row.get(1)?,
            property: row.get(2)?,
            weight: row.get(3)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// `label_or_type: NULL` in the config means "applies regardless of label",
/// so it always matches.
fn configs_for_node(conn: &Connection, labels: &[String]) -> Result<Vec<TextIndexConfig>> {
    Ok(show_config(conn)?
        .into_iter()
        .filter(|c| {
            c.entity == Entity::Node
                && match &c.label_or_type {
                    None => true,
                    Some(l) => labels.iter().any(|nl| nl.eq_ignore_ascii_case(l)),
                }
        })
        .collect())
}

fn configs_for_rel_type(conn: &Connection, rel_type: &str) -> Result<Vec<TextIndexConfig>> {
    Ok(show_config(conn)?
        .into_iter()
        .filter(|c| {
            c.entity == Entity::Relationship
                && match &c.label_or_type {
                    None => true,
                    Some(t) => t == rel_type,
                }
        })
        .collect())
}

fn document_text(props: &PropertyMap, configs: &[TextIndexConfig]) -> String {
    configs
        .iter()
        .filter_map(|c| props.get(&c.property))
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Materializes (or re-materializes) `node`'s FTS document from its current
/// labels and properties. A node with no matching configured triple, or
/// whose matching properties are all absent/non-string, has no document —
/// equivalent to "not indexed".
pub fn sync_node(conn: &Connection, node: NodeId, labels: &[String], properties: &PropertyMap) -> Result<()> {
    remove_node(conn, node)?;
    let configs = configs_for_node(conn, labels)?;
    if configs.is_empty() {
        return Ok(());
    }
    let text = document_text(properties, &configs);
    if text.is_empty() {
        return Ok(());
    }
    conn.execute("INSERT INTO fts_documents(entity, entity_id, content) VALUES ('node', ?1, ?2)", params![node.0, text])?;
    Ok(())
}

pub fn remove_node(conn: &Connection, node: NodeId) -> Result<()> {
    conn.execute("DELETE FROM fts_documents WHERE entity = 'node' AND entity_id = ?1", params![node.0])?;
    Ok(())
}

pub fn sync_relationship(conn: &Connection, rel: RelId, rel_type: &str, properties: &PropertyMap) -> Result<()> {
    remove_relationship(conn, rel)?;
    let configs = configs_for_rel_type(conn, rel_type)?;
    if configs.is_empty() {
        return Ok(());
    }
    let text = document_text(properties, &configs);
    if text.is_empty() {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO fts_documents(entity, entity_id, content) VALUES ('relationship', ?1, ?2)",
        params![rel.0, text],
    )?;
    Ok(())
}

pub fn remove_relationship(conn: &Connection, rel: RelId) -> Result<()> {
    conn.execute("DELETE FROM fts_documents WHERE entity = 'relationship' AND entity_id = ?1", params![rel.0])?;
    Ok(())
}

/// Full repopulate: drops every document and re-syncs from the current
/// node/relationship tables against the current configuration. Needed after
/// a bulk import that bypassed the per-write sync calls, or after
/// reconfiguring which properties are indexed.
pub fn rebuild(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM fts_documents", [])?;

    let node_ids: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT id FROM nodes")?;
        stmt.query_map([], |row| row.get(0))?.collect::<rusqlite::Result<_>>()?
    };
    for id in node_ids {
        if let Some(node) = primitives::get_node(conn, NodeId(id))? {
            sync_node(conn, node.id, &node.labels, &node.properties)?;
        }
    }

    let rel_rows: Vec<(i64, String, String)> = {
        let mut stmt = conn.prepare("SELECT id, rel_type, properties FROM relationships")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?.collect::<rusqlite::Result<_>>()?
    };
    for (id, rel_type, props_text) in rel_rows {
        let props = codec::decode_properties(&props_text)?;
        sync_relationship(conn, RelId(id), &rel_type, &props)?;
    }

    Ok(())
}

pub struct TextHit {
    pub entity: Entity,
    pub entity_id: i64,
    pub score: f64,
}

/// Runs an FTS5 `MATCH` query and converts SQLite's `bm25()` convention
/// (negative, lower-is-better) into a non-negative similarity where higher
/// is better.
pub fn search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<TextHit>> {
    let mut stmt = conn.prepare(
        "SELECT entity, entity_id, bm25(fts_documents) FROM fts_documents
         WHERE fts_documents MATCH ?1 ORDER BY bm25(fts_documents) LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![query, limit as i64], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, f64>(2)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (entity, entity_id, raw_score) = row?;
        out.push(TextHit {
            entity: if entity == "node" { Entity::Node } else { Entity::Relationship },
            entity_id,
            score: -raw_score,
        });
    }
    Ok(out)
}

/// Post-hoc filter for a label (nodes) or relationship type, applied after
/// an FTS query since `fts_documents` carries no label/type column.
pub fn filter_by_label_or_type(conn: &Connection, hits: Vec<TextHit>, label_or_type: &str) -> Result<Vec<TextHit>> {
    let mut out = Vec::new();
    for hit in hits {
        let matches = match hit.entity {
            Entity::Node => primitives::get_node(conn, NodeId(hit.entity_id))?
                .map(|n| n.labels.iter().any(|l| l.eq_ignore_ascii_case(label_or_type)))
                .unwrap_or(false),
            Entity::Relationship => primitives::get_relationship(conn, RelId(hit.entity_id))?
                .map(|r| r.rel_type == label_or_type)
                .unwrap_or(false),
        };
        if matches {
            out.push(hit);
        }
    }
    Ok(out)
}

/// Post-hoc property-equality filter, applied the same way a label/type
/// filter is — FTS5 ranks only the indexed text, not structured equality.
pub fn filter_by_property(
    conn: &Connection,
    hits: Vec<TextHit>,
    property: &str,
    value: &grafito_model::Value,
) -> Result<Vec<TextHit>> {
    let mut out = Vec::new();
    for hit in hits {
        let matches = match hit.entity {
            Entity::Node => primitives::get_node(conn, NodeId(hit.entity_id))?
                .map(|n| n.properties.get(property).map(|v| v == value).unwrap_or(false))
                .unwrap_or(false),
            Entity::Relationship => primitives::get_relationship(conn, RelId(hit.entity_id))?
                .map(|r| r.properties.get(property).map(|v| v == value).unwrap_or(false))
                .unwrap_or(false),
        };
        if matches {
            out.push(hit);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::Store;
    use grafito_model::Value;

    #[test]
    fn sync_and_search_round_trip() {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                configure(conn, Entity::Node, Some("Article"), "body", 1.0)?;
                let mut props = PropertyMap::new();
                props.set("body", Value::String("rust ownership and borrowing".into()));
                sync_node(conn, NodeId(1), &["Article".to_string()], &props)?;

                let hits = search(conn, "ownership", 10)?;
                assert_eq!(hits.len(), 1);
                assert_eq!(hits[0].entity_id, 1);
                assert!(hits[0].score >= 0.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn unindexed_label_produces_no_document() {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                configure(conn, Entity::Node, Some("Article"), "body", 1.0)?;
                let mut props = PropertyMap::new();
                props.set("body", Value::String("irrelevant".into()));
                sync_node(conn, NodeId(1), &["Person".to_string()], &props)?;
                assert!(search(conn, "irrelevant", 10)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn rebuild_repopulates_from_existing_rows() {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                configure(conn, Entity::Node, None, "body", 1.0)?;
                let mut props = PropertyMap::new();
                props.set("body", Value::String("graph traversal kernel".into()));
                primitives::create_node(conn, &["Doc".to_string()], props)?;

                rebuild(conn)?;
                let hits = search(conn, "traversal", 10)?;
                assert_eq!(hits.len(), 1);
                Ok(())
            })
            .unwrap();
    }
}
