//! Registers the storage-backed procedures `grafito_query::executor`'s
//! generic dispatcher can't provide itself: vector search, the URI index,
//! and the `apoc.load.*`/`apoc.import.json` family. Appended to the global
//! registry once, from [`crate::register_builtin_procedures`], the same
//! append-only-registry shape `grafito_storage::vector`'s reranker and
//! embedding-function registries use.

use std::collections::BTreeMap;
use std::sync::Arc;

use grafito_query::executor::get_procedure_registry;
use grafito_query::executor::{ErasedSnapshot, Procedure, Row, Value as QValue};
use grafito_query::Error as QError;
use grafito_storage::primitives;
use grafito_storage::vector;

use crate::http::{self, LoadOptions};

pub fn register_builtins() {
    let registry = get_procedure_registry();
    registry.register("db.vector.search", Arc::new(VectorSearchProcedure));
    registry.register("db.uri_index.create", Arc::new(UriIndexCreateProcedure));
    registry.register("apoc.load.json", Arc::new(ApocLoadJsonProcedure { array: false }));
    registry.register("apoc.load.jsonArray", Arc::new(ApocLoadJsonProcedure { array: true }));
    registry.register("apoc.load.jsonParams", Arc::new(ApocLoadJsonParamsProcedure));
    registry.register("apoc.load.xml", Arc::new(ApocLoadXmlProcedure));
    registry.register("apoc.load.xmlParams", Arc::new(ApocLoadXmlParamsProcedure));
    registry.register("apoc.load.html", Arc::new(ApocLoadHtmlProcedure));
    registry.register("apoc.import.json", Arc::new(ApocImportJsonProcedure));
}

fn connection_of<'a>(snapshot: &'a dyn ErasedSnapshot) -> Result<&'a rusqlite::Connection, QError> {
    snapshot
        .raw_connection_erased()
        .ok_or_else(|| QError::Other("procedure requires a storage-backed connection".into()))
}

fn query_value_to_model(v: &QValue) -> grafito_model::Value {
    match v {
        QValue::Null => grafito_model::Value::Null,
        QValue::Bool(b) => grafito_model::Value::Bool(*b),
        QValue::Int(i) => grafito_model::Value::Int(*i),
        QValue::Float(f) => grafito_model::Value::Float(*f),
        QValue::String(s) => grafito_model::Value::String(s.clone()),
        QValue::List(items) => grafito_model::Value::List(items.iter().map(query_value_to_model).collect()),
        QValue::Map(m) => grafito_model::Value::Map(
            m.iter().map(|(k, v)| (k.clone(), query_value_to_model(v))).collect(),
        ),
        _ => grafito_model::Value::Null,
    }
}

fn json_to_query_value(v: &serde_json::Value) -> QValue {
    match v {
        serde_json::Value::Null => QValue::Null,
        serde_json::Value::Bool(b) => QValue::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                QValue::Int(i)
            } else {
                QValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => QValue::String(s.clone()),
        serde_json::Value::Array(items) => QValue::List(items.iter().map(json_to_query_value).collect()),
        serde_json::Value::Object(map) => {
            QValue::Map(map.iter().map(|(k, v)| (k.clone(), json_to_query_value(v))).collect())
        }
    }
}

fn model_value_to_query(v: &grafito_model::Value) -> QValue {
    match v {
        grafito_model::Value::Null => QValue::Null,
        grafito_model::Value::Bool(b) => QValue::Bool(*b),
        grafito_model::Value::Int(i) => QValue::Int(*i),
        grafito_model::Value::Float(f) => QValue::Float(*f),
        grafito_model::Value::String(s) => QValue::String(s.clone()),
        grafito_model::Value::List(items) => QValue::List(items.iter().map(model_value_to_query).collect()),
        grafito_model::Value::Map(m) => {
            QValue::Map(m.iter().map(|(k, v)| (k.to_string(), model_value_to_query(v))).collect())
        }
        other => QValue::String(other.to_string()),
    }
}

// -- db.vector.search -------------------------------------------------------

struct VectorSearchProcedure;

impl Procedure for VectorSearchProcedure {
    fn execute(&self, snapshot: &dyn ErasedSnapshot, args: Vec<QValue>) -> Result<Vec<Row>, QError> {
        let conn = connection_of(snapshot)?;
        let index = match args.first() {
            Some(QValue::String(s)) => s.clone(),
            _ => return Err(QError::Other("db.vector.search requires an index name".into())),
        };
        let k = match args.get(2) {
            Some(QValue::Int(k)) => *k as usize,
            None => 10,
            _ => return Err(QError::Other("db.vector.search requires an integer k".into())),
        };
        let options = match args.get(3) {
            Some(QValue::Map(m)) => m.clone(),
            _ => BTreeMap::new(),
        };

        let query_vec = match args.get(1) {
            Some(QValue::List(items)) => items
                .iter()
                .map(|v| match v {
                    QValue::Int(i) => Ok(*i as f32),
                    QValue::Float(f) => Ok(*f as f32),
                    _ => Err(QError::Other("vector entries must be numeric".into())),
                })
                .collect::<Result<Vec<f32>, QError>>()?,
            Some(QValue::String(text)) => vector::embed_for_index(conn, &index, text)
                .map_err(|e| QError::Other(e.to_string()))?,
            _ => return Err(QError::Other("db.vector.search requires a vector or text query".into())),
        };

        let labels: Vec<String> = match options.get("labels") {
            Some(QValue::List(items)) => items
                .iter()
                .filter_map(|v| if let QValue::String(s) = v { Some(s.clone()) } else { None })
                .collect(),
            _ => Vec::new(),
        };
        let properties: Vec<(String, grafito_model::Value)> = match options.get("properties") {
            Some(QValue::Map(m)) => m.iter().map(|(k, v)| (k.clone(), query_value_to_model(v))).collect(),
            _ => Vec::new(),
        };

        let allowed = |node: grafito_model::NodeId| -> bool {
            let Ok(Some(n)) = primitives::get_node(conn, node) else { return false };
            if !labels.iter().all(|l| n.has_label(l)) {
                return false;
            }
            properties.iter().all(|(k, v)| n.properties.get(k).map(|pv| pv == v).unwrap_or(false))
        };

        let candidate_multiplier = match options.get("candidate_multiplier") {
            Some(QValue::Int(n)) if *n > 0 => Some(*n as usize),
            _ => None,
        };

        let hits = if labels.is_empty() && properties.is_empty() {
            vector::search(conn, &index, &query_vec, k, None).map_err(|e| QError::Other(e.to_string()))?
        } else {
            vector::search_with_prefilter(conn, &index, &query_vec, k, &allowed, candidate_multiplier)
                .map_err(|e| QError::Other(e.to_string()))?
        };

        let rerank_requested = matches!(options.get("rerank"), Some(QValue::Bool(true)));
        let reranker_name = match options.get("reranker") {
            Some(QValue::String(s)) => Some(s.as_str()),
            _ => None,
        };
        let hits = if rerank_requested || reranker_name.is_some() {
            vector::rerank(&query_vec, hits, reranker_name)
        } else {
            hits
        };

        Ok(hits
            .into_iter()
            .map(|hit| {
                Row::new(vec![
                    ("node".to_string(), QValue::NodeId(hit.node.0)),
                    ("score".to_string(), QValue::Float(hit.score)),
                ])
            })
            .collect())
    }
}

// -- db.uri_index.create -----------------------------------------------------

struct UriIndexCreateProcedure;

impl Procedure for UriIndexCreateProcedure {
    fn execute(&self, snapshot: &dyn ErasedSnapshot, args: Vec<QValue>) -> Result<Vec<Row>, QError> {
        let conn = connection_of(snapshot)?;
        let kind = match args.first() {
            Some(QValue::String(s)) => s.as_str(),
            _ => "node",
        };
        let (table, name) = if kind.eq_ignore_ascii_case("relationship") {
            ("relationships", "idx_relationships_uri")
        } else {
            ("nodes", "idx_nodes_uri")
        };
        conn.execute(&format!("CREATE INDEX IF NOT EXISTS {name} ON {table}(uri)"), [])
            .map_err(|e| QError::Other(e.to_string()))?;
        Ok(vec![Row::new(vec![("name".to_string(), QValue::String(name.to_string()))])])
    }
}

// -- apoc.load.json[Array] ---------------------------------------------------

struct ApocLoadJsonProcedure {
    array: bool,
}

impl Procedure for ApocLoadJsonProcedure {
    fn execute(&self, _snapshot: &dyn ErasedSnapshot, args: Vec<QValue>) -> Result<Vec<Row>, QError> {
        let source = match args.first() {
            Some(QValue::String(s)) => s.clone(),
            _ => return Err(QError::Other("apoc.load.json requires a URL or path".into())),
        };
        let bytes = http::fetch(&source, &LoadOptions::default()).map_err(|e| QError::Other(e.to_string()))?;
        load_json_rows(&bytes, self.array)
    }
}

struct ApocLoadJsonParamsProcedure;

impl Procedure for ApocLoadJsonParamsProcedure {
    fn execute(&self, _snapshot: &dyn ErasedSnapshot, args: Vec<QValue>) -> Result<Vec<Row>, QError> {
        let source = match args.first() {
            Some(QValue::String(s)) => s.clone(),
            _ => return Err(QError::Other("apoc.load.jsonParams requires a URL or path".into())),
        };
        let options = parse_load_options(args.get(1), args.get(2));
        let bytes = http::fetch(&source, &options).map_err(|e| QError::Other(e.to_string()))?;
        load_json_rows(&bytes, false)
    }
}

fn load_json_rows(bytes: &[u8], array: bool) -> Result<Vec<Row>, QError> {
    let parsed: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| QError::Other(e.to_string()))?;
    if array {
        let items = parsed.as_array().ok_or_else(|| QError::Other("expected a JSON array".into()))?;
        Ok(items
            .iter()
            .map(|item| Row::new(vec![("value".to_string(), json_to_query_value(item))]))
            .collect())
    } else {
        Ok(vec![Row::new(vec![("value".to_string(), json_to_query_value(&parsed))])])
    }
}

fn parse_load_options(headers: Option<&QValue>, config: Option<&QValue>) -> LoadOptions {
    let mut options = LoadOptions::default();
    if let Some(QValue::Map(m)) = headers {
        options.headers = m
            .iter()
            .filter_map(|(k, v)| if let QValue::String(s) = v { Some((k.clone(), s.clone())) } else { None })
            .collect();
    }
    if let Some(QValue::Map(m)) = config {
        if let Some(QValue::String(s)) = m.get("method") {
            options.method = Some(s.clone());
        }
        if let Some(QValue::String(s)) = m.get("payload") {
            options.payload = Some(s.clone());
        }
        if let Some(QValue::Int(i)) = m.get("timeout") {
            options.timeout_ms = Some((*i).max(0) as u64);
        }
        if let Some(QValue::Int(i)) = m.get("retry") {
            options.retry = (*i).max(0) as u32;
        }
        if let Some(QValue::Bool(b)) = m.get("failOnError") {
            options.fail_on_error = *b;
        }
    }
    options
}

// -- apoc.load.xml[Params] ----------------------------------------------------

struct ApocLoadXmlProcedure;

impl Procedure for ApocLoadXmlProcedure {
    fn execute(&self, _snapshot: &dyn ErasedSnapshot, args: Vec<QValue>) -> Result<Vec<Row>, QError> {
        let source = match args.first() {
            Some(QValue::String(s)) => s.clone(),
            _ => return Err(QError::Other("apoc.load.xml requires a URL or path".into())),
        };
        let bytes = http::fetch(&source, &LoadOptions::default()).map_err(|e| QError::Other(e.to_string()))?;
        let value = http::parse_xml(&bytes).map_err(|e| QError::Other(e.to_string()))?;
        Ok(vec![Row::new(vec![("value".to_string(), model_value_to_query(&value))])])
    }
}

struct ApocLoadXmlParamsProcedure;

impl Procedure for ApocLoadXmlParamsProcedure {
    fn execute(&self, _snapshot: &dyn ErasedSnapshot, args: Vec<QValue>) -> Result<Vec<Row>, QError> {
        let source = match args.first() {
            Some(QValue::String(s)) => s.clone(),
            _ => return Err(QError::Other("apoc.load.xmlParams requires a URL or path".into())),
        };
        let options = parse_load_options(args.get(1), args.get(2));
        let bytes = http::fetch(&source, &options).map_err(|e| QError::Other(e.to_string()))?;
        let value = http::parse_xml(&bytes).map_err(|e| QError::Other(e.to_string()))?;
        Ok(vec![Row::new(vec![("value".to_string(), model_value_to_query(&value))])])
    }
}

// -- apoc.load.html -----------------------------------------------------------

struct ApocLoadHtmlProcedure;

impl Procedure for ApocLoadHtmlProcedure {
    fn execute(&self, _snapshot: &dyn ErasedSnapshot, args: Vec<QValue>) -> Result<Vec<Row>, QError> {
        let source = match args.first() {
            Some(QValue::String(s)) => s.clone(),
            _ => return Err(QError::Other("apoc.load.html requires a URL or path".into())),
        };
        let bytes = http::fetch(&source, &LoadOptions::default()).map_err(|e| QError::Other(e.to_string()))?;
        let text = String::from_utf8_lossy(&bytes).to_string();
        Ok(vec![Row::new(vec![("html".to_string(), QValue::String(text))])])
    }
}

// -- apoc.import.json ---------------------------------------------------------

struct ApocImportJsonProcedure;

impl Procedure for ApocImportJsonProcedure {
    fn execute(&self, snapshot: &dyn ErasedSnapshot, args: Vec<QValue>) -> Result<Vec<Row>, QError> {
        let conn = connection_of(snapshot)?;
        let source = match args.first() {
            Some(QValue::String(s)) => s.clone(),
            _ => return Err(QError::Other("apoc.import.json requires a URL or path".into())),
        };
        let bytes = http::fetch(&source, &LoadOptions::default()).map_err(|e| QError::Other(e.to_string()))?;
        let stats = import_json_bytes(conn, &bytes).map_err(|e| QError::Other(e.to_string()))?;
        Ok(vec![Row::new(vec![
            ("nodes".to_string(), QValue::Int(stats.0 as i64)),
            ("relationships".to_string(), QValue::Int(stats.1 as i64)),
        ])])
    }
}

/// Accepts a JSON array of entries, JSONL (one entry per line), or a
/// `{nodes, relationships}` object. Each node entry may carry an `id` used
/// only to resolve relationship `from`/`to` references within this same
/// import; an unresolved reference fails the whole import.
fn import_json_bytes(conn: &rusqlite::Connection, bytes: &[u8]) -> grafito_model::Result<(usize, usize)> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();

    let (node_entries, rel_entries): (Vec<serde_json::Value>, Vec<serde_json::Value>) =
        if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(trimmed) {
            let nodes = obj.get("nodes").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            let rels = obj.get("relationships").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            (nodes, rels)
        } else if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(trimmed) {
            (items, Vec::new())
        } else {
            let entries: Vec<serde_json::Value> = trimmed
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(serde_json::from_str)
                .collect::<Result<_, _>>()
                .map_err(grafito_model::Error::from)?;
            (entries, Vec::new())
        };

    let mut id_map: BTreeMap<String, grafito_model::NodeId> = BTreeMap::new();
    let mut node_count = 0;
    for entry in &node_entries {
        let labels: Vec<String> = entry
            .get("labels")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let properties = entry
            .get("properties")
            .map(json_to_property_map)
            .unwrap_or_default();
        let node = primitives::create_node(conn, &labels, properties)?;
        if let Some(import_id) = entry.get("id").and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|i| i.to_string()))) {
            id_map.insert(import_id, node.id);
        }
        node_count += 1;
    }

    let mut rel_count = 0;
    for entry in &rel_entries {
        let from = entry.get("from").and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|i| i.to_string())));
        let to = entry.get("to").and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|i| i.to_string())));
        let (Some(from), Some(to)) = (from, to) else {
            return Err(grafito_model::Error::import("relationship entry missing from/to"));
        };
        let source = *id_map
            .get(&from)
            .ok_or_else(|| grafito_model::Error::import(format!("unresolved relationship endpoint: {from}")))?;
        let target = *id_map
            .get(&to)
            .ok_or_else(|| grafito_model::Error::import(format!("unresolved relationship endpoint: {to}")))?;
        let rel_type = entry.get("type").and_then(|v| v.as_str()).unwrap_or("RELATED");
        let properties = entry.get("properties").map(json_to_property_map).unwrap_or_default();
        primitives::create_relationship(conn, source, target, rel_type, properties)?;
        rel_count += 1;
    }

    Ok((node_count, rel_count))
}

fn json_to_property_map(v: &serde_json::Value) -> grafito_model::PropertyMap {
    let mut map = grafito_model::PropertyMap::new();
    if let Some(obj) = v.as_object() {
        for (k, v) in obj {
            map.set(k.clone(), json_to_model_value(v));
        }
    }
    map
}

fn json_to_model_value(v: &serde_json::Value) -> grafito_model::Value {
    match v {
        serde_json::Value::Null => grafito_model::Value::Null,
        serde_json::Value::Bool(b) => grafito_model::Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                grafito_model::Value::Int(i)
            } else {
                grafito_model::Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => grafito_model::Value::String(s.clone()),
        serde_json::Value::Array(items) => grafito_model::Value::List(items.iter().map(json_to_model_value).collect()),
        serde_json::Value::Object(obj) => grafito_model::Value::Map(json_to_property_map(&serde_json::Value::Object(obj.clone()))),
    }
}
