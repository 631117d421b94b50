//! Property-index and constraint registry.

use rusqlite::{params, Connection};

use grafito_model::{Error, PropertyMap, Result, Value};

use crate::codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Node,
    Relationship,
}

impl Entity {
    fn as_str(self) -> &'static str {
        match self {
            Entity::Node => "node",
            Entity::Relationship => "relationship",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Uniqueness,
    Existence,
    Type,
}

impl ConstraintKind {
    fn as_str(self) -> &'static str {
        match self {
            ConstraintKind::Uniqueness => "uniqueness",
            ConstraintKind::Existence => "existence",
            ConstraintKind::Type => "type",
        }
    }
}

pub struct IndexInfo {
    pub name: String,
    pub entity: String,
    pub label_or_type: String,
    pub property: String,
    pub is_unique: bool,
}

pub struct ConstraintInfo {
    pub name: String,
    pub entity: String,
    pub label_or_type: String,
    pub property: String,
    pub kind: String,
    pub scalar_type: Option<String>,
}

fn default_index_name(entity: Entity, label_or_type: &str, property: &str) -> String {
    format!("idx_{}_{}_{}", entity.as_str(), label_or_type, property)
}

/// `CREATE INDEX` — idempotent; a plain SQLite index accelerates
/// `match_nodes`/`match_relationships` equality lookups on this property.
pub fn create_index(
    conn: &Connection,
    entity: Entity,
    label_or_type: &str,
    property: &str,
    unique: bool,
    name: Option<&str>,
) -> Result<String> {
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| default_index_name(entity, label_or_type, property));

    conn.execute(
        "INSERT INTO property_indexes(name, entity, label_or_type, property, is_unique)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO NOTHING",
        params![name, entity.as_str(), label_or_type, property, unique as i64],
    )?;

    if unique {
        create_constraint(conn, entity, label_or_type, property, ConstraintKind::Uniqueness, None, Some(&format!("{name}_unique")))?;
    }

    tracing::info!(index = %name, entity = entity.as_str(), property, "index rebuilt");
    Ok(name)
}

pub fn drop_index(conn: &Connection, name: &str) -> Result<()> {
    conn.execute("DELETE FROM property_indexes WHERE name = ?1", params![name])?;
    Ok(())
}

pub fn show_indexes(conn: &Connection) -> Result<Vec<IndexInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, entity, label_or_type, property, is_unique FROM property_indexes ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(IndexInfo {
            name: row.get(0)?,
            entity: row.get(1)?,
            label_or_type: row.get(2)?,
            property: row.get(3)?,
            is_unique: row.get::<_, i64>(4)? != 0,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

/// `CREATE CONSTRAINT` — rejects creation outright if existing rows already
/// violate it (the "safest rule" decision recorded in SPEC_FULL.md §12.4).
pub fn create_constraint(
    conn: &Connection,
    entity: Entity,
    label_or_type: &str,
    property: &str,
    kind: ConstraintKind,
    scalar_type: Option<&str>,
    name: Option<&str>,
) -> Result<String> {
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}_constraint", default_index_name(entity, label_or_type, property)));

    verify_no_existing_violations(conn, entity, label_or_type, property, kind, scalar_type)?;

    conn.execute(
        "INSERT INTO property_constraints(name, entity, label_or_type, property, kind, scalar_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(name) DO NOTHING",
        params![name, entity.as_str(), label_or_type, property, kind.as_str(), scalar_type],
    )?;
    Ok(name)
}

pub fn drop_constraint(conn: &Connection, name: &str) -> Result<()> {
    conn.execute("DELETE FROM property_constraints WHERE name = ?1", params![name])?;
    Ok(())
}

pub fn show_constraints(conn: &Connection) -> Result<Vec<ConstraintInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, entity, label_or_type, property, kind, scalar_type FROM property_constraints ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ConstraintInfo {
            name: row.get(0)?,
            entity: row.get(1)?,
            label_or_type: row.get(2)?,
            property: row.get(3)?,
            kind: row.get(4)?,
            scalar_type: row.get(5)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

fn verify_no_existing_violations(
    conn: &Connection,
    entity: Entity,
    label_or_type: &str,
    property: &str,
    kind: ConstraintKind,
    scalar_type: Option<&str>,
) -> Result<()> {
    let rows = fetch_properties_for(conn, entity, label_or_type)?;
    match kind {
        ConstraintKind::Uniqueness => {
            let mut seen = std::collections::HashSet::new();
            for props in &rows {
                if let Some(v) = props.get(property) {
                    if v.is_null() {
                        continue;
                    }
                    let key = format!("{v}");
                    if !seen.insert(key) {
                        return Err(Error::constraint(format!(
                            "existing data already violates uniqueness on {property}"
                        )));
                    }
                }
            }
        }
        ConstraintKind::Existence => {
            for props in &rows {
                if props.get(property).map(Value::is_null).unwrap_or(true) {
                    return Err(Error::constraint(format!(
                        "existing data missing required property {property}"
                    )));
                }
            }
        }
        ConstraintKind::Type => {
            let expected = scalar_type.unwrap_or("STRING");
            for props in &rows {
                match props.get(property) {
                    Some(v) if v.type_name() == expected => {}
                    _ => {
                        return Err(Error::constraint(format!(
                            "existing data violates type constraint on {property}: expected {expected}"
                        )))
                    }
                }
            }
        }
    }
    Ok(())
}

fn fetch_properties_for(conn: &Connection, entity: Entity, label_or_type: &str) -> Result<Vec<PropertyMap>> {
    let mut out = Vec::new();
    match entity {
        Entity::Node => {
            let mut stmt = conn.prepare(
                "SELECT n.properties FROM nodes n
                 JOIN node_labels nl ON nl.node_id = n.id
                 JOIN labels l ON l.id = nl.label_id
                 WHERE l.name = ?1 COLLATE NOCASE",
            )?;
            let rows = stmt.query_map(params![label_or_type], |row| row.get::<_, String>(0))?;
            for row in rows {
                out.push(codec::decode_properties(&row?)?);
            }
        }
        Entity::Relationship => {
            let mut stmt = conn.prepare("SELECT properties FROM relationships WHERE rel_type = ?1")?;
            let rows = stmt.query_map(params![label_or_type], |row| row.get::<_, String>(0))?;
            for row in rows {
                out.push(codec::decode_properties(&row?)?);
            }
        }
    }
    Ok(out)
}

/// Consulted by the write primitives before committing a mutation. Checks
/// every constraint registered against any of `labels` (for nodes) or
/// `rel_type` (for relationships).
pub fn check_constraints(
    conn: &Connection,
    entity: Entity,
    labels_or_type: &[String],
    props: &PropertyMap,
    exclude_id: Option<i64>,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT property, kind, scalar_type FROM property_constraints
         WHERE entity = ?1 AND label_or_type = ?2",
    )?;

    for label_or_type in labels_or_type {
        let rows = stmt.query_map(params![entity.as_str(), label_or_type], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?))
        })?;
        for row in rows {
            let (property, kind, scalar_type) = row?;
            let value = props.get(&property);
            match kind.as_str() {
                "existence" => {
                    if value.map(Value::is_null).unwrap_or(true) {
                        return Err(Error::constraint(format!("property {property} is required")));
                    }
                }
                "type" => {
                    let expected = scalar_type.unwrap_or_else(|| "STRING".to_string());
                    match value {
                        Some(v) if v.type_name() == expected => {}
                        Some(v) => {
                            return Err(Error::constraint(format!(
                                "property {property} expected type {expected}, got {}",
                                v.type_name()
                            )))
                        }
                        None => {
                            return Err(Error::constraint(format!(
                                "property {property} expected type {expected}, got missing"
                            )))
                        }
                    }
                }
                "uniqueness" => {
                    if let Some(v) = value {
                        if !v.is_null() {
                            check_unique(conn, entity, label_or_type, &property, v, exclude_id)?;
                        }
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn check_unique(
    conn: &Connection,
    entity: Entity,
    label_or_type: &str,
    property: &str,
    value: &Value,
    exclude_id: Option<i64>,
) -> Result<()> {
    let target = format!("{value}");
    let existing = fetch_properties_with_ids(conn, entity, label_or_type)?;
    for (id, props) in existing {
        if Some(id) == exclude_id {
            continue;
        }
        if let Some(v) = props.get(property) {
            if !v.is_null() && format!("{v}") == target {
                return Err(Error::constraint(format!(
                    "uniqueness constraint violated on {label_or_type}.{property}"
                )));
            }
        }
    }
    Ok(())
}

fn fetch_properties_with_ids(conn: &Connection, entity: Entity, label_or_type: &str) -> Result<Vec<(i64, PropertyMap)>> {
    let mut out = Vec::new();
    match entity {
        Entity::Node => {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.properties FROM nodes n
                 JOIN node_labels nl ON nl.node_id = n.id
                 JOIN labels l ON l.id = nl.label_id
                 WHERE l.name = ?1 COLLATE NOCASE",
            )?;
            let rows = stmt.query_map(params![label_or_type], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, text) = row?;
                out.push((id, codec::decode_properties(&text)?));
            }
        }
        Entity::Relationship => {
            let mut stmt = conn.prepare("SELECT id, properties FROM relationships WHERE rel_type = ?1")?;
            let rows = stmt.query_map(params![label_or_type], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, text) = row?;
                out.push((id, codec::decode_properties(&text)?));
            }
        }
    }
    Ok(out)
}

/// Convenience used by `CREATE CONSTRAINT TYPE`'s parser-facing surface.
pub fn parse_scalar_type(name: &str) -> Option<&'static str> {
    match name.to_ascii_uppercase().as_str() {
        "STRING" => Some("STRING"),
        "INTEGER" => Some("INTEGER"),
        "FLOAT" => Some("FLOAT"),
        "BOOLEAN" => Some("BOOLEAN"),
        "LIST" => Some("LIST"),
        "MAP" => Some("MAP"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::Store;

    #[test]
    fn type_constraint_rejects_missing_and_null_property() {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                create_constraint(
                    conn,
                    Entity::Node,
                    "Person",
                    "age",
                    ConstraintKind::Type,
                    Some("INTEGER"),
                    None,
                )?;

                let mut missing = PropertyMap::new();
                missing.set("name", Value::String("Alice".into()));
                assert!(check_constraints(conn, Entity::Node, &["Person".to_string()], &missing, None).is_err());

                let mut null_age = PropertyMap::new();
                null_age.set("age", Value::Null);
                assert!(check_constraints(conn, Entity::Node, &["Person".to_string()], &null_age, None).is_err());

                let mut wrong_type = PropertyMap::new();
                wrong_type.set("age", Value::String("thirty".into()));
                assert!(check_constraints(conn, Entity::Node, &["Person".to_string()], &wrong_type, None).is_err());

                let mut ok = PropertyMap::new();
                ok.set("age", Value::Int(30));
                assert!(check_constraints(conn, Entity::Node, &["Person".to_string()], &ok, None).is_ok());

                Ok(())
            })
            .unwrap();
    }
}
