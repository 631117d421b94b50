//! Query facade — the storage-agnostic trait boundary the executor walks.
//!
//! `crate::facade::GraphSnapshot` is a local trait with the exact method
//! set `grafito_storage::snapshot::GraphSnapshot` already implements for
//! its `Snapshot` and `Writer` connection wrappers; the blanket impl below
//! bridges any storage type implementing the latter into the former. That
//! split — generic executor, one concrete storage binding — keeps the
//! Cypher layer testable against a fake snapshot independent of any real
//! storage engine; here the "real" storage engine is `grafito-storage`,
//! wired in directly since this workspace only ever has one.

use std::collections::BTreeMap;

pub use grafito_storage::snapshot::{EdgeKey, InternalNodeId, LabelId, PropertyValue, RelTypeId};

pub type ExternalId = u64;

use crate::{Error, Params, Result, Row};

/// The read-only contract the query engine is generic over.
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
    fn connection(&self) -> Option<&rusqlite::Connection>;
}

impl<T: grafito_storage::snapshot::GraphSnapshot> GraphSnapshot for T {
    fn nodes(&self) -> Box<dyn Iterator<Item = InternalNodeId> + '_> {
        grafito_storage::snapshot::GraphSnapshot::nodes(self)
    }
    fn neighbors(&self, src: InternalNodeId, rel: Option<RelTypeId>) -> Box<dyn Iterator<Item = EdgeKey> + '_> {
        grafito_storage::snapshot::GraphSnapshot::neighbors(self, src, rel)
    }
    fn incoming_neighbors(&self, dst: InternalNodeId, rel: Option<RelTypeId>) -> Box<dyn Iterator<Item = EdgeKey> + '_> {
        grafito_storage::snapshot::GraphSnapshot::incoming_neighbors(self, dst, rel)
    }
    fn node_property(&self, iid: InternalNodeId, key: &str) -> Option<PropertyValue> {
        grafito_storage::snapshot::GraphSnapshot::node_property(self, iid, key)
    }
    fn node_properties(&self, iid: InternalNodeId) -> Option<BTreeMap<String, PropertyValue>> {
        grafito_storage::snapshot::GraphSnapshot::node_properties(self, iid)
    }
    fn edge_property(&self, edge: EdgeKey, key: &str) -> Option<PropertyValue> {
        grafito_storage::snapshot::GraphSnapshot::edge_property(self, edge, key)
    }
    fn edge_properties(&self, edge: EdgeKey) -> Option<BTreeMap<String, PropertyValue>> {
        grafito_storage::snapshot::GraphSnapshot::edge_properties(self, edge)
    }
    fn resolve_label_name(&self, id: LabelId) -> Option<String> {
        grafito_storage::snapshot::GraphSnapshot::resolve_label_name(self, id)
    }
    fn resolve_rel_type_name(&self, id: RelTypeId) -> Option<String> {
        grafito_storage::snapshot::GraphSnapshot::resolve_rel_type_name(self, id)
    }
    fn resolve_label_id(&self, name: &str) -> Option<LabelId> {
        grafito_storage::snapshot::GraphSnapshot::resolve_label_id(self, name)
    }
    fn resolve_rel_type_id(&self, name: &str) -> Option<RelTypeId> {
        grafito_storage::snapshot::GraphSnapshot::resolve_rel_type_id(self, name)
    }
    fn resolve_node_labels(&self, iid: InternalNodeId) -> Option<Vec<LabelId>> {
        grafito_storage::snapshot::GraphSnapshot::resolve_node_labels(self, iid)
    }
    fn node_label(&self, iid: InternalNodeId) -> Option<LabelId> {
        grafito_storage::snapshot::GraphSnapshot::node_label(self, iid)
    }
    fn is_tombstoned_node(&self, iid: InternalNodeId) -> bool {
        grafito_storage::snapshot::GraphSnapshot::is_tombstoned_node(self, iid)
    }
    fn lookup_index(&self, label: &str, field: &str, value: &PropertyValue) -> Option<Vec<InternalNodeId>> {
        grafito_storage::snapshot::GraphSnapshot::lookup_index(self, label, field, value)
    }
    fn connection(&self) -> Option<&rusqlite::Connection> {
        grafito_storage::snapshot::GraphSnapshot::raw_connection(self)
    }
}

/// Executes a Cypher query and collects all results into a Vec. Convenience
/// entry point combining parse + plan + execute for embedders that don't
/// need a prepared-statement handle.
pub fn query_collect<S: GraphSnapshot>(snapshot: &S, cypher: &str, params: &Params) -> Result<Vec<Row>> {
    let query = crate::query_api::prepare(cypher).map_err(|e| Error::Other(e.to_string()))?;
    let results: Vec<Result<Row>> = query.execute_streaming(snapshot, params).collect();
    results.into_iter().collect()
}

/// Extension trait giving any [`GraphSnapshot`] a `.query(...)` method.
pub trait QueryExt {
    fn query(&self, cypher: &str, params: &Params) -> Result<Vec<Row>>;
}

impl<T: GraphSnapshot> QueryExt for T {
    fn query(&self, cypher: &str, params: &Params) -> Result<Vec<Row>> {
        query_collect(self, cypher, params)
    }
}
