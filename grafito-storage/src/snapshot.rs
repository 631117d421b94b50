//! Bridge between the rusqlite-backed store and the query engine's
//! snapshot/write-transaction contract.
//!
//! The query engine (`grafito-query`) is written generic over a
//! `GraphSnapshot` trait so it never depends on a concrete storage engine;
//! this module is the one implementation of that contract, backed by plain
//! SQL against the schema in [`crate::schema`]. Internal node/label/
//! relationship-type ids are exposed directly as SQLite rowids — this
//! storage layer has no external/internal id remapping to do, unlike an
//! engine built around compaction.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use grafito_model::{PropertyMap, Value as ModelValue};

use crate::codec;
use crate::primitives;

pub type ExternalId = u64;
pub type InternalNodeId = i64;
pub type LabelId = i64;
pub type RelTypeId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub src: InternalNodeId,
    pub rel: RelTypeId,
    pub dst: InternalNodeId,
}

/// Wire-format property value exchanged across the `GraphSnapshot`/
/// `WriteableGraph` boundary. Narrower than [`grafito_model::Value`] —
/// temporal and spatial types cross the boundary as tagged strings, the same
/// tag scheme [`codec`] uses on disk, so nothing is lost beyond the variant
/// tag itself.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(i64),
    Blob(Vec<u8>),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn from_model(value: &ModelValue) -> Self {
        match value {
            ModelValue::Null => PropertyValue::Null,
            ModelValue::Bool(b) => PropertyValue::Bool(*b),
            ModelValue::Int(i) => PropertyValue::Int(*i),
            ModelValue::Float(f) => PropertyValue::Float(*f),
            ModelValue::String(s) => PropertyValue::String(s.clone()),
            ModelValue::List(items) => {
                PropertyValue::List(items.iter().map(PropertyValue::from_model).collect())
            }
            ModelValue::Map(m) => PropertyValue::Map(
                m.iter().map(|(k, v)| (k.to_string(), PropertyValue::from_model(v))).collect(),
            ),
            other => PropertyValue::String(tagged_string(other)),
        }
    }

    pub fn to_model(&self) -> ModelValue {
        match self {
            PropertyValue::Null => ModelValue::Null,
            PropertyValue::Bool(b) => ModelValue::Bool(*b),
            PropertyValue::Int(i) => ModelValue::Int(*i),
            PropertyValue::Float(f) => ModelValue::Float(*f),
            PropertyValue::String(s) => untag_string(s),
            PropertyValue::DateTime(i) => ModelValue::Int(*i),
            PropertyValue::Blob(b) => {
                ModelValue::List(b.iter().map(|byte| ModelValue::Int(*byte as i64)).collect())
            }
            PropertyValue::List(items) => ModelValue::List(items.iter().map(PropertyValue::to_model).collect()),
            PropertyValue::Map(m) => {
                let mut map = PropertyMap::new();
                for (k, v) in m {
                    map.set(k.clone(), v.to_model());
                }
                ModelValue::Map(map)
            }
        }
    }
}

fn tagged_string(value: &ModelValue) -> String {
    match codec::value_to_json(value) {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn untag_string(s: &str) -> ModelValue {
    codec::json_to_value(serde_json::Value::String(s.to_string()))
}

fn property_map_to_wire(props: &PropertyMap) -> BTreeMap<String, PropertyValue> {
    props.iter().map(|(k, v)| (k.to_string(), PropertyValue::from_model(v))).collect()
}

/// Read-side implementation of the query engine's `GraphSnapshot` contract.
pub struct Snapshot<'a> {
    conn: &'a Connection,
}

impl<'a> Snapshot<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Snapshot { conn }
    }

    /// Escape hatch for callers that need the raw connection — procedures
    /// like `db.vector.search`/`apoc.load.*` operate below the
    /// `GraphSnapshot` abstraction, directly against `vector`/`text`/`index`.
    pub fn connection(&self) -> &'a Connection {
        self.conn
    }
}

fn sql_nodes(conn: &Connection) -> Vec<InternalNodeId> {
    let Ok(mut stmt) = conn.prepare("SELECT id FROM nodes ORDER BY id") else {
        return Vec::new();
    };
    stmt.query_map([], |row| row.get(0))
        .map(|rows| rows.flatten().collect())
        .unwrap_or_default()
}

fn sql_edges(
    conn: &Connection,
    anchor: InternalNodeId,
    rel: Option<RelTypeId>,
    outgoing: bool,
) -> Vec<EdgeKey> {
    let sql = if outgoing {
        "SELECT rt.id, r.target FROM relationships r
         JOIN rel_types rt ON rt.name = r.rel_type
         WHERE r.source = ?1 AND (?2 IS NULL OR rt.id = ?2) ORDER BY r.id"
    } else {
        "SELECT rt.id, r.source FROM relationships r
         JOIN rel_types rt ON rt.name = r.rel_type
         WHERE r.target = ?1 AND (?2 IS NULL OR rt.id = ?2) ORDER BY r.id"
    };
    let Ok(mut stmt) = conn.prepare(sql) else {
        return Vec::new();
    };
    let rows: Vec<(i64, i64)> = stmt
        .query_map(params![anchor, rel], |row| Ok((row.get(0)?, row.get(1)?)))
        .map(|rows| rows.flatten().collect())
        .unwrap_or_default();
    rows.into_iter()
        .map(|(rel_id, other)| {
            if outgoing {
                EdgeKey { src: anchor, rel: rel_id, dst: other }
            } else {
                EdgeKey { src: other, rel: rel_id, dst: anchor }
            }
        })
        .collect()
}

fn node_properties_map(conn: &Connection, iid: InternalNodeId) -> Option<PropertyMap> {
    let text: Option<String> = conn
        .query_row("SELECT properties FROM nodes WHERE id = ?1", params![iid], |row| row.get(0))
        .optional()
        .ok()
        .flatten();
    codec::decode_properties(&text?).ok()
}

fn resolve_edge_row_id(conn: &Connection, edge: EdgeKey) -> Option<i64> {
    let rel_name = resolve_rel_type_name_sql(conn, edge.rel)?;
    conn.query_row(
        "SELECT id FROM relationships WHERE source = ?1 AND rel_type = ?2 AND target = ?3 ORDER BY id LIMIT 1",
        params![edge.src, rel_name, edge.dst],
        |row| row.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

fn edge_properties_map(conn: &Connection, edge: EdgeKey) -> Option<PropertyMap> {
    let rel_id = resolve_edge_row_id(conn, edge)?;
    let text: Option<String> = conn
        .query_row("SELECT properties FROM relationships WHERE id = ?1", params![rel_id], |row| row.get(0))
        .optional()
        .ok()
        .flatten();
    codec::decode_properties(&text?).ok()
}

fn resolve_label_name_sql(conn: &Connection, id: LabelId) -> Option<String> {
    conn.query_row("SELECT name FROM labels WHERE id = ?1", params![id], |row| row.get(0))
        .optional()
        .ok()
        .flatten()
}

fn resolve_rel_type_name_sql(conn: &Connection, id: RelTypeId) -> Option<String> {
    conn.query_row("SELECT name FROM rel_types WHERE id = ?1", params![id], |row| row.get(0))
        .optional()
        .ok()
        .flatten()
}

fn resolve_label_id_sql(conn: &Connection, name: &str) -> Option<LabelId> {
    conn.query_row("SELECT id FROM labels WHERE name = ?1 COLLATE NOCASE", params![name], |row| row.get(0))
        .optional()
        .ok()
        .flatten()
}

fn resolve_rel_type_id_sql(conn: &Connection, name: &str) -> Option<RelTypeId> {
    conn.query_row("SELECT id FROM rel_types WHERE name = ?1", params![name], |row| row.get(0))
        .optional()
        .ok()
        .flatten()
}

fn resolve_node_labels_sql(conn: &Connection, iid: InternalNodeId) -> Option<Vec<LabelId>> {
    let exists: bool = conn
        .query_row("SELECT 1 FROM nodes WHERE id = ?1", params![iid], |_| Ok(()))
        .optional()
        .ok()
        .flatten()
        .is_some();
    if !exists {
        return None;
    }
    let mut stmt = conn.prepare("SELECT label_id FROM node_labels WHERE node_id = ?1 ORDER BY label_id").ok()?;
    let ids: Vec<i64> = stmt.query_map(params![iid], |row| row.get(0)).ok()?.flatten().collect();
    Some(ids)
}

fn node_label_sql(conn: &Connection, iid: InternalNodeId) -> Option<LabelId> {
    conn.query_row(
        "SELECT label_id FROM node_labels WHERE node_id = ?1 ORDER BY label_id LIMIT 1",
        params![iid],
        |row| row.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

/// Entries this entity's label/type has a registered index on whose
/// property equals `value`, scanning rather than truly indexing — the
/// registry in [`crate::index`] tracks *that* an index exists, which is
/// enough for the query planner's index-vs-scan decision; actual lookup
/// speed is a later optimization, not a correctness requirement.
fn lookup_index_sql(conn: &Connection, label: &str, field: &str, value: &PropertyValue) -> Option<Vec<InternalNodeId>> {
    let registered: bool = conn
        .query_row(
            "SELECT 1 FROM property_indexes WHERE entity = 'node' AND label_or_type = ?1 COLLATE NOCASE AND property = ?2",
            params![label, field],
            |_| Ok(()),
        )
        .optional()
        .ok()
        .flatten()
        .is_some();
    if !registered {
        return None;
    }
    let mut stmt = conn
        .prepare(
            "SELECT n.id, n.properties FROM nodes n
             JOIN node_labels nl ON nl.node_id = n.id
             JOIN labels l ON l.id = nl.label_id
             WHERE l.name = ?1 COLLATE NOCASE",
        )
        .ok()?;
    let rows: Vec<(i64, String)> = stmt
        .query_map(params![label], |row| Ok((row.get(0)?, row.get(1)?)))
        .ok()?
        .flatten()
        .collect();
    let mut out = Vec::new();
    for (id, text) in rows {
        if let Ok(props) = codec::decode_properties(&text) {
            if let Some(v) = props.get(field) {
                if &PropertyValue::from_model(v) == value {
                    out.push(id);
                }
            }
        }
    }
    Some(out)
}

macro_rules! impl_graph_snapshot {
    ($ty:ident) => {
        impl<'a> GraphSnapshot for $ty<'a> {
            fn nodes(&self) -> Box<dyn Iterator<Item = InternalNodeId> + '_> {
                Box::new(sql_nodes(self.conn).into_iter())
            }

            fn neighbors(&self, src: InternalNodeId, rel: Option<RelTypeId>) -> Box<dyn Iterator<Item = EdgeKey> + '_> {
                Box::new(sql_edges(self.conn, src, rel, true).into_iter())
            }

            fn incoming_neighbors(&self, dst: InternalNodeId, rel: Option<RelTypeId>) -> Box<dyn Iterator<Item = EdgeKey> + '_> {
                Box::new(sql_edges(self.conn, dst, rel, false).into_iter())
            }

            fn node_property(&self, iid: InternalNodeId, key: &str) -> Option<PropertyValue> {
                let props = node_properties_map(self.conn, iid)?;
                Some(PropertyValue::from_model(props.get(key)?))
            }

            fn node_properties(&self, iid: InternalNodeId) -> Option<BTreeMap<String, PropertyValue>> {
                Some(property_map_to_wire(&node_properties_map(self.conn, iid)?))
            }

            fn edge_property(&self, edge: EdgeKey, key: &str) -> Option<PropertyValue> {
                let props = edge_properties_map(self.conn, edge)?;
                Some(PropertyValue::from_model(props.get(key)?))
            }

            fn edge_properties(&self, edge: EdgeKey) -> Option<BTreeMap<String, PropertyValue>> {
                Some(property_map_to_wire(&edge_properties_map(self.conn, edge)?))
            }

            fn resolve_label_name(&self, id: LabelId) -> Option<String> {
                resolve_label_name_sql(self.conn, id)
            }

            fn resolve_rel_type_name(&self, id: RelTypeId) -> Option<String> {
                resolve_rel_type_name_sql(self.conn, id)
            }

            fn resolve_label_id(&self, name: &str) -> Option<LabelId> {
                resolve_label_id_sql(self.conn, name)
            }

            fn resolve_rel_type_id(&self, name: &str) -> Option<RelTypeId> {
                resolve_rel_type_id_sql(self.conn, name)
            }

            fn resolve_node_labels(&self, iid: InternalNodeId) -> Option<Vec<LabelId>> {
                resolve_node_labels_sql(self.conn, iid)
            }

            fn node_label(&self, iid: InternalNodeId) -> Option<LabelId> {
                node_label_sql(self.conn, iid)
            }

            fn is_tombstoned_node(&self, _iid: InternalNodeId) -> bool {
                // Deletes in this store are hard deletes (ON DELETE CASCADE);
                // a tombstoned node simply stops appearing in any query here.
                false
            }

            fn lookup_index(&self, label: &str, field: &str, value: &PropertyValue) -> Option<Vec<InternalNodeId>> {
                lookup_index_sql(self.conn, label, field, value)
            }

            fn raw_connection(&self) -> Option<&Connection> {
                Some(self.conn)
            }
        }
    };
}

/// The read-only contract the query engine is generic over. Implemented
/// identically by [`Snapshot`] (pure read access) and [`Writer`] (so the
/// same connection can serve as both the read-side snapshot and the
/// write-side transaction within a single `Store::scope`).
pub trait GraphSnapshot {
    fn nodes(&self) -> Box<dyn Iterator<Item = InternalNodeId> + '_>;
    fn neighbors(&self, src: InternalNodeId, rel: Option<RelTypeId>) -> Box<dyn Iterator<Item = EdgeKey> + '_>;
    fn incoming_neighbors(&self, dst: InternalNodeId, rel: Option<RelTypeId>) -> Box<dyn Iterator<Item = EdgeKey> + '_>;
    fn node_property(&self, iid: InternalNodeId, key: &str) -> Option<PropertyValue>;
    fn node_properties(&self, iid: InternalNodeId) -> Option<BTreeMap<String, PropertyValue>>;
    fn edge_property(&self, edge: EdgeKey, key: &str) -> Option<PropertyValue>;
    fn edge_properties(&self, edge: EdgeKey) -> Option<BTreeMap<String, PropertyValue>>;
    fn resolve_label_name(&self, id: LabelId) -> Option<String>;
    fn resolve_rel_type_name(&self, id: RelTypeId) -> Option<String>;
    fn resolve_label_id(&self, name: &str) -> Option<LabelId>;
    fn resolve_rel_type_id(&self, name: &str) -> Option<RelTypeId>;
    fn resolve_node_labels(&self, iid: InternalNodeId) -> Option<Vec<LabelId>>;
    fn node_label(&self, iid: InternalNodeId) -> Option<LabelId>;
    fn is_tombstoned_node(&self, iid: InternalNodeId) -> bool;
    fn lookup_index(&self, label: &str, field: &str, value: &PropertyValue) -> Option<Vec<InternalNodeId>>;

    /// Escape hatch below the abstract contract, for procedures that need
    /// direct SQL access (`vector`/`text`/`index` modules all take
    /// `&Connection`, not a `GraphSnapshot`). Defaults to `None` so a future
    /// non-SQL storage engine implementing this trait isn't forced to expose
    /// one.
    fn raw_connection(&self) -> Option<&Connection> {
        None
    }
}

/// A store that can hand out read snapshots, erased so callers don't need
/// to name the concrete connection type.
pub trait GraphStore {
    fn graph_snapshot(&self) -> Box<dyn GraphSnapshot + '_>;
}

impl_graph_snapshot!(Snapshot);

/// Write-side companion to [`Snapshot`], implementing the same
/// `GraphSnapshot` contract (so one connection serves both roles inside a
/// write scope) plus the primitive mutations the query engine's
/// `WriteableGraph` trait is built from. `grafito-query` implements
/// `WriteableGraph` for this type directly.
pub struct Writer<'a> {
    conn: &'a Connection,
}

impl_graph_snapshot!(Writer);

impl<'a> Writer<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Writer { conn }
    }

    /// Escape hatch for callers that need the raw connection — procedures
    /// like `db.vector.search`/`apoc.load.*` operate below the
    /// `GraphSnapshot` abstraction, directly against `vector`/`text`/`index`.
    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    pub fn create_node_with_label(&mut self, label_id: LabelId) -> grafito_model::Result<InternalNodeId> {
        self.conn.execute("INSERT INTO nodes(properties) VALUES ('{}')", [])?;
        let id = self.conn.last_insert_rowid();
        self.conn.execute(
            "INSERT INTO node_labels(node_id, label_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
            params![id, label_id],
        )?;
        Ok(id)
    }

    pub fn add_label(&mut self, node: InternalNodeId, label_id: LabelId) -> grafito_model::Result<()> {
        self.conn.execute(
            "INSERT INTO node_labels(node_id, label_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
            params![node, label_id],
        )?;
        Ok(())
    }

    pub fn remove_label(&mut self, node: InternalNodeId, label_id: LabelId) -> grafito_model::Result<()> {
        self.conn.execute(
            "DELETE FROM node_labels WHERE node_id = ?1 AND label_id = ?2",
            params![node, label_id],
        )?;
        Ok(())
    }

    pub fn create_edge(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId) -> grafito_model::Result<()> {
        let name = resolve_rel_type_name_sql(self.conn, rel)
            .ok_or_else(|| grafito_model::Error::not_found("rel_type", rel))?;
        self.conn.execute(
            "INSERT INTO relationships(source, target, rel_type, properties) VALUES (?1, ?2, ?3, '{}')",
            params![src, dst, name],
        )?;
        Ok(())
    }

    pub fn set_node_property(&mut self, node: InternalNodeId, key: &str, value: PropertyValue) -> grafito_model::Result<()> {
        let mut props = node_properties_map(self.conn, node).unwrap_or_default();
        props.set(key, value.to_model());
        let encoded = codec::encode_properties(&props)?;
        self.conn.execute("UPDATE nodes SET properties = ?1 WHERE id = ?2", params![encoded, node])?;
        Ok(())
    }

    pub fn set_edge_property(
        &mut self,
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
        key: &str,
        value: PropertyValue,
    ) -> grafito_model::Result<()> {
        let edge = EdgeKey { src, rel, dst };
        let rel_id = resolve_edge_row_id(self.conn, edge)
            .ok_or_else(|| grafito_model::Error::not_found("relationship", 0))?;
        let mut props = edge_properties_map(self.conn, edge).unwrap_or_default();
        props.set(key, value.to_model());
        let encoded = codec::encode_properties(&props)?;
        self.conn.execute("UPDATE relationships SET properties = ?1 WHERE id = ?2", params![encoded, rel_id])?;
        Ok(())
    }

    pub fn remove_node_property(&mut self, node: InternalNodeId, key: &str) -> grafito_model::Result<()> {
        let mut props = node_properties_map(self.conn, node).unwrap_or_default();
        props.remove(key);
        let encoded = codec::encode_properties(&props)?;
        self.conn.execute("UPDATE nodes SET properties = ?1 WHERE id = ?2", params![encoded, node])?;
        Ok(())
    }

    pub fn remove_edge_property(
        &mut self,
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
        key: &str,
    ) -> grafito_model::Result<()> {
        let edge = EdgeKey { src, rel, dst };
        let Some(rel_id) = resolve_edge_row_id(self.conn, edge) else {
            return Ok(());
        };
        let mut props = edge_properties_map(self.conn, edge).unwrap_or_default();
        props.remove(key);
        let encoded = codec::encode_properties(&props)?;
        self.conn.execute("UPDATE relationships SET properties = ?1 WHERE id = ?2", params![encoded, rel_id])?;
        Ok(())
    }

    pub fn delete_node(&mut self, node: InternalNodeId) -> grafito_model::Result<()> {
        self.conn.execute("DELETE FROM nodes WHERE id = ?1", params![node])?;
        Ok(())
    }

    pub fn delete_edge(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId) -> grafito_model::Result<()> {
        if let Some(rel_id) = resolve_edge_row_id(self.conn, EdgeKey { src, rel, dst }) {
            self.conn.execute("DELETE FROM relationships WHERE id = ?1", params![rel_id])?;
        }
        Ok(())
    }

    pub fn get_or_create_label_id(&mut self, name: &str) -> grafito_model::Result<LabelId> {
        primitives::intern_label(self.conn, name)
    }

    pub fn get_or_create_rel_type_id(&mut self, name: &str) -> grafito_model::Result<RelTypeId> {
        primitives::intern_rel_type(self.conn, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::Store;

    #[test]
    fn writer_round_trips_node_and_edge() {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                let mut writer = Writer::new(conn);
                let person = writer.get_or_create_label_id("Person").unwrap();
                let a = writer.create_node_with_label(person).unwrap();
                let b = writer.create_node_with_label(person).unwrap();
                writer.set_node_property(a, "name", PropertyValue::String("Alice".into())).unwrap();

                let knows = writer.get_or_create_rel_type_id("KNOWS").unwrap();
                writer.create_edge(a, knows, b).unwrap();
                writer
                    .set_edge_property(a, knows, b, "since", PropertyValue::Int(2020))
                    .unwrap();

                let snapshot = Snapshot::new(conn);
                let edges: Vec<_> = snapshot.neighbors(a, Some(knows)).collect();
                assert_eq!(edges, vec![EdgeKey { src: a, rel: knows, dst: b }]);
                assert_eq!(
                    snapshot.node_property(a, "name"),
                    Some(PropertyValue::String("Alice".into()))
                );
                assert_eq!(
                    snapshot.edge_property(edges[0], "since"),
                    Some(PropertyValue::Int(2020))
                );
                assert_eq!(snapshot.resolve_node_labels(a), Some(vec![person]));
                Ok(())
            })
            .unwrap();
    }
}
