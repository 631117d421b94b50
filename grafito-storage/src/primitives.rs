//! Graph primitives: CRUD on nodes, relationships, labels, neighbors.
//!
//! Every function here takes a plain `&Connection` so it can run either
//! inside a [`crate::tx::Tx`] (via its `Deref`) or against a bare read
//! connection for queries that don't need an explicit transaction.

use rusqlite::{params, Connection, OptionalExtension};

use grafito_model::{Direction, Error, Node, NodeId, PropertyMap, RelId, Relationship, Value};

use crate::codec;
use crate::index::{self, Entity};
use crate::text;

pub fn create_node(conn: &Connection, labels: &[String], properties: PropertyMap) -> grafito_model::Result<Node> {
    index::check_constraints(conn, Entity::Node, labels, &properties, None)?;

    let encoded = codec::encode_properties(&properties)?;
    conn.execute(
        "INSERT INTO nodes(properties) VALUES (?1)",
        params![encoded],
    )?;
    let id = conn.last_insert_rowid();

    for label in labels {
        intern_label(conn, label)?;
        conn.execute(
            "INSERT INTO node_labels(node_id, label_id)
             SELECT ?1, id FROM labels WHERE name = ?2 COLLATE NOCASE",
            params![id, label],
        )?;
    }

    let node = get_node(conn, NodeId(id))?.ok_or_else(|| Error::not_found("node", id))?;
    text::sync_node(conn, node.id, &node.labels, &node.properties)?;
    Ok(node)
}

pub(crate) fn intern_label(conn: &Connection, name: &str) -> grafito_model::Result<i64> {
    conn.execute(
        "INSERT INTO labels(name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
        params![name],
    )?;
    conn.query_row(
        "SELECT id FROM labels WHERE name = ?1 COLLATE NOCASE",
        params![name],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

pub(crate) fn intern_rel_type(conn: &Connection, name: &str) -> grafito_model::Result<i64> {
    conn.execute(
        "INSERT INTO rel_types(name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
        params![name],
    )?;
    conn.query_row("SELECT id FROM rel_types WHERE name = ?1", params![name], |row| row.get(0))
        .map_err(Error::from)
}

pub fn get_node(conn: &Connection, id: NodeId) -> grafito_model::Result<Option<Node>> {
    let row = conn
        .query_row(
            "SELECT created_at, uri, properties FROM nodes WHERE id = ?1",
            params![id.0],
            |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((created_at, uri, properties)) = row else {
        return Ok(None);
    };

    let labels = node_labels(conn, id)?;
    Ok(Some(Node {
        id,
        labels,
        created_at,
        uri,
        properties: codec::decode_properties(&properties)?,
    }))
}

fn node_labels(conn: &Connection, id: NodeId) -> grafito_model::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT l.name FROM labels l
         JOIN node_labels nl ON nl.label_id = l.id
         WHERE nl.node_id = ?1 ORDER BY l.name",
    )?;
    let rows = stmt.query_map(params![id.0], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// AND-semantics on labels; exact-match property filters.
pub fn match_nodes(
    conn: &Connection,
    labels: &[String],
    property_filters: &[(String, Value)],
) -> grafito_model::Result<Vec<Node>> {
    let mut sql = String::from("SELECT DISTINCT n.id FROM nodes n");
    for (i, _label) in labels.iter().enumerate() {
        sql.push_str(&format!(
            " JOIN node_labels nl{i} ON nl{i}.node_id = n.id
              JOIN labels l{i} ON l{i}.id = nl{i}.label_id AND l{i}.name = ?{} COLLATE NOCASE",
            i + 1
        ));
    }

    let mut stmt = conn.prepare(&sql)?;
    let params_vec: Vec<&dyn rusqlite::ToSql> = labels.iter().map(|l| l as &dyn rusqlite::ToSql).collect();
    let ids = stmt
        .query_map(params_vec.as_slice(), |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::new();
    for id in ids {
        if let Some(node) = get_node(conn, NodeId(id))? {
            if property_filters
                .iter()
                .all(|(k, v)| node.properties.get(k).map(|pv| pv == v).unwrap_or(false))
            {
                out.push(node);
            }
        }
    }
    Ok(out)
}

/// Merges `props` into the node's property map; explicit nulls set rather
/// than delete the key.
pub fn update_node_properties(conn: &Connection, id: NodeId, props: PropertyMap) -> grafito_model::Result<Node> {
    let mut node = get_node(conn, id)?.ok_or_else(|| Error::not_found("node", id.0))?;
    for (k, v) in props.iter() {
        node.properties.set(k, v.clone());
    }
    index::check_constraints(conn, Entity::Node, &node.labels, &node.properties, Some(id.0))?;
    let encoded = codec::encode_properties(&node.properties)?;
    conn.execute("UPDATE nodes SET properties = ?1 WHERE id = ?2", params![encoded, id.0])?;
    text::sync_node(conn, node.id, &node.labels, &node.properties)?;
    Ok(node)
}

pub fn add_labels(conn: &Connection, id: NodeId, labels: &[String]) -> grafito_model::Result<()> {
    for label in labels {
        intern_label(conn, label)?;
        conn.execute(
            "INSERT INTO node_labels(node_id, label_id)
             SELECT ?1, id FROM labels WHERE name = ?2 COLLATE NOCASE
             ON CONFLICT DO NOTHING",
            params![id.0, label],
        )?;
    }
    if let Some(node) = get_node(conn, id)? {
        text::sync_node(conn, node.id, &node.labels, &node.properties)?;
    }
    Ok(())
}

pub fn remove_labels(conn: &Connection, id: NodeId, labels: &[String]) -> grafito_model::Result<()> {
    for label in labels {
        conn.execute(
            "DELETE FROM node_labels WHERE node_id = ?1 AND label_id = (
                SELECT id FROM labels WHERE name = ?2 COLLATE NOCASE
             )",
            params![id.0, label],
        )?;
    }
    if let Some(node) = get_node(conn, id)? {
        text::sync_node(conn, node.id, &node.labels, &node.properties)?;
    }
    Ok(())
}

/// Cascades to every incident relationship via `ON DELETE CASCADE`.
pub fn delete_node(conn: &Connection, id: NodeId) -> grafito_model::Result<()> {
    let changed = conn.execute("DELETE FROM nodes WHERE id = ?1", params![id.0])?;
    if changed == 0 {
        return Err(Error::not_found("node", id.0));
    }
    text::remove_node(conn, id)?;
    Ok(())
}

pub fn create_relationship(
    conn: &Connection,
    source: NodeId,
    target: NodeId,
    rel_type: &str,
    properties: PropertyMap,
) -> grafito_model::Result<Relationship> {
    if get_node(conn, source)?.is_none() {
        return Err(Error::not_found("node", source.0));
    }
    if get_node(conn, target)?.is_none() {
        return Err(Error::not_found("node", target.0));
    }
    index::check_constraints(conn, Entity::Relationship, std::slice::from_ref(&rel_type.to_string()), &properties, None)?;
    intern_rel_type(conn, rel_type)?;

    let encoded = codec::encode_properties(&properties)?;
    conn.execute(
        "INSERT INTO relationships(source, target, rel_type, properties) VALUES (?1, ?2, ?3, ?4)",
        params![source.0, target.0, rel_type, encoded],
    )?;
    let id = conn.last_insert_rowid();
    let rel = get_relationship(conn, RelId(id))?.ok_or_else(|| Error::not_found("relationship", id))?;
    text::sync_relationship(conn, rel.id, &rel.rel_type, &rel.properties)?;
    Ok(rel)
}

pub fn get_relationship(conn: &Connection, id: RelId) -> grafito_model::Result<Option<Relationship>> {
    conn.query_row(
        "SELECT source, target, rel_type, created_at, uri, properties FROM relationships WHERE id = ?1",
        params![id.0],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        },
    )
    .optional()?
    .map(|(source, target, rel_type, created_at, uri, properties)| {
        Ok(Relationship {
            id,
            source: NodeId(source),
            target: NodeId(target),
            rel_type,
            created_at,
            uri,
            properties: codec::decode_properties(&properties)?,
        })
    })
    .transpose()
}

pub fn match_relationships(
    conn: &Connection,
    source: Option<NodeId>,
    target: Option<NodeId>,
    rel_type: Option<&str>,
) -> grafito_model::Result<Vec<Relationship>> {
    let mut sql = String::from("SELECT id FROM relationships WHERE 1=1");
    if source.is_some() {
        sql.push_str(" AND source = :source");
    }
    if target.is_some() {
        sql.push_str(" AND target = :target");
    }
    if rel_type.is_some() {
        sql.push_str(" AND rel_type = :rel_type");
    }
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(
            rusqlite::named_params! {
                ":source": source.map(|n| n.0),
                ":target": target.map(|n| n.0),
                ":rel_type": rel_type,
            },
            |row| row.get::<_, i64>(0),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::new();
    for id in ids {
        if let Some(rel) = get_relationship(conn, RelId(id))? {
            out.push(rel);
        }
    }
    Ok(out)
}

pub fn delete_relationship(conn: &Connection, id: RelId) -> grafito_model::Result<()> {
    let changed = conn.execute("DELETE FROM relationships WHERE id = ?1", params![id.0])?;
    if changed == 0 {
        return Err(Error::not_found("relationship", id.0));
    }
    text::remove_relationship(conn, id)?;
    Ok(())
}

/// `both` returns the deduplicated union of incoming and outgoing neighbors.
pub fn get_neighbors(
    conn: &Connection,
    node: NodeId,
    direction: Direction,
    rel_type: Option<&str>,
) -> grafito_model::Result<Vec<Node>> {
    let mut ids: Vec<i64> = Vec::new();

    if matches!(direction, Direction::Outgoing | Direction::Both) {
        let mut stmt = conn.prepare(
            "SELECT target FROM relationships WHERE source = ?1 AND (?2 IS NULL OR rel_type = ?2)",
        )?;
        ids.extend(stmt.query_map(params![node.0, rel_type], |row| row.get::<_, i64>(0))?.collect::<rusqlite::Result<Vec<_>>>()?);
    }
    if matches!(direction, Direction::Incoming | Direction::Both) {
        let mut stmt = conn.prepare(
            "SELECT source FROM relationships WHERE target = ?1 AND (?2 IS NULL OR rel_type = ?2)",
        )?;
        ids.extend(stmt.query_map(params![node.0, rel_type], |row| row.get::<_, i64>(0))?.collect::<rusqlite::Result<Vec<_>>>()?);
    }

    ids.sort_unstable();
    ids.dedup();

    let mut out = Vec::new();
    for id in ids {
        if let Some(n) = get_node(conn, NodeId(id))? {
            out.push(n);
        }
    }
    Ok(out)
}
