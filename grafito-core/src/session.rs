//! `Session`: the handle every `Db::scope`/`Db::read` closure is given.
//! Thin wrapper around `&rusqlite::Connection` exposing the graph
//! primitives, index/constraint registry, traversal kernel, vector/text
//! search, and the Cypher query engine as one coherent surface. Mutating
//! methods are reachable whether the session came from a write scope or a
//! read one — like the storage primitives underneath, nothing here
//! enforces read-only at this layer beyond what `Store::read`'s implicit
//! transaction already gives a well-behaved caller.

use rusqlite::Connection;

use grafito_model::{Direction, Error, Node, NodeId, PropertyMap, RelId, Relationship, Result, Value};
use grafito_query::{Params, QueryExt, Row};
use grafito_storage::index::{self, ConstraintInfo, ConstraintKind, Entity, IndexInfo};
use grafito_storage::primitives;
use grafito_storage::snapshot::{Snapshot, Writer};
use grafito_storage::text::{self, TextHit, TextIndexConfig};
use grafito_storage::traversal::{self, Path};
use grafito_storage::vector::{self, Metric, SearchHit, VectorIndexInfo};

/// A session wraps a single connection reference; every method below opens
/// its own short-lived `rusqlite::Statement`, matching how
/// `grafito-storage`'s primitives are written (plain `&Connection` in,
/// `grafito_model::Result` out).
pub struct Session<'a> {
    conn: &'a Connection,
    default_max_hops: u32,
}

fn query_err(e: grafito_query::Error) -> Error {
    Error::query_execution(e.to_string())
}

impl<'a> Session<'a> {
    pub(crate) fn new(conn: &'a Connection, default_max_hops: u32) -> Self {
        Session { conn, default_max_hops }
    }

    /// Caller-supplied params win; otherwise fall back to the database's
    /// configured `cypher_max_hops` ceiling for unbounded `-[*]-` patterns.
    fn params_with_default_hops(&self, params: &Params) -> Params {
        let mut params = params.clone();
        if params.max_hops().is_none() {
            params.set_max_hops(self.default_max_hops);
        }
        params
    }

    // -- node primitives -------------------------------------------------

    pub fn create_node(&self, labels: &[String], properties: PropertyMap) -> Result<Node> {
        primitives::create_node(self.conn, labels, properties)
    }

    pub fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        primitives::get_node(self.conn, id)
    }

    pub fn match_nodes(&self, labels: &[String], property_filters: &[(String, Value)]) -> Result<Vec<Node>> {
        primitives::match_nodes(self.conn, labels, property_filters)
    }

    pub fn update_node_properties(&self, id: NodeId, props: PropertyMap) -> Result<Node> {
        primitives::update_node_properties(self.conn, id, props)
    }

    pub fn add_labels(&self, id: NodeId, labels: &[String]) -> Result<()> {
        primitives::add_labels(self.conn, id, labels)
    }

    pub fn remove_labels(&self, id: NodeId, labels: &[String]) -> Result<()> {
        primitives::remove_labels(self.conn, id, labels)
    }

    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        primitives::delete_node(self.conn, id)
    }

    // -- relationship primitives -----------------------------------------

    pub fn create_relationship(
        &self,
        source: NodeId,
        target: NodeId,
        rel_type: &str,
        properties: PropertyMap,
    ) -> Result<Relationship> {
        primitives::create_relationship(self.conn, source, target, rel_type, properties)
    }

    pub fn get_relationship(&self, id: RelId) -> Result<Option<Relationship>> {
        primitives::get_relationship(self.conn, id)
    }

    pub fn match_relationships(
        &self,
        source: Option<NodeId>,
        target: Option<NodeId>,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        primitives::match_relationships(self.conn, source, target, rel_type)
    }

    pub fn delete_relationship(&self, id: RelId) -> Result<()> {
        primitives::delete_relationship(self.conn, id)
    }

    pub fn get_neighbors(&self, node: NodeId, direction: Direction, rel_type: Option<&str>) -> Result<Vec<Node>> {
        primitives::get_neighbors(self.conn, node, direction, rel_type)
    }

    // -- traversal ---------------------------------------------------------

    pub fn shortest_path(
        &self,
        source: NodeId,
        target: NodeId,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Option<Path>> {
        traversal::shortest_path(self.conn, source, target, direction, rel_type)
    }

    pub fn all_shortest_paths(
        &self,
        source: NodeId,
        target: NodeId,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Path>> {
        traversal::all_shortest_paths(self.conn, source, target, direction, rel_type)
    }

    pub fn bounded_path(
        &self,
        source: NodeId,
        target: NodeId,
        max_depth: u32,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Option<Path>> {
        traversal::bounded_path(self.conn, source, target, max_depth, direction, rel_type)
    }

    pub fn variable_length_paths(
        &self,
        source: NodeId,
        target: Option<NodeId>,
        min: u32,
        max: u32,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Path>> {
        traversal::variable_length_paths(self.conn, source, target, min, max, direction, rel_type)
    }

    // -- property indexes / constraints ------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_index(
        &self,
        entity: Entity,
        label_or_type: &str,
        property: &str,
        unique: bool,
        name: Option<&str>,
    ) -> Result<String> {
        index::create_index(self.conn, entity, label_or_type, property, unique, name)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        index::drop_index(self.conn, name)
    }

    pub fn show_indexes(&self) -> Result<Vec<IndexInfo>> {
        index::show_indexes(self.conn)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_constraint(
        &self,
        entity: Entity,
        label_or_type: &str,
        property: &str,
        kind: ConstraintKind,
        scalar_type: Option<&str>,
        name: Option<&str>,
    ) -> Result<String> {
        index::create_constraint(self.conn, entity, label_or_type, property, kind, scalar_type, name)
    }

    pub fn drop_constraint(&self, name: &str) -> Result<()> {
        index::drop_constraint(self.conn, name)
    }

    pub fn show_constraints(&self) -> Result<Vec<ConstraintInfo>> {
        index::show_constraints(self.conn)
    }

    // -- vector index -------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_vector_index(
        &self,
        name: &str,
        dimension: usize,
        backend: &str,
        method: &str,
        metric: Metric,
        store_embeddings: bool,
        default_k: usize,
        embedding_fn: Option<&str>,
    ) -> Result<()> {
        vector::create_index(self.conn, name, dimension, backend, method, metric, store_embeddings, default_k, embedding_fn)
    }

    pub fn drop_vector_index(&self, name: &str) -> Result<()> {
        vector::drop_index(self.conn, name)
    }

    pub fn show_vector_indexes(&self) -> Result<Vec<VectorIndexInfo>> {
        vector::show_indexes(self.conn)
    }

    pub fn vector_upsert(&self, index: &str, node: NodeId, embedding: &[f32]) -> Result<()> {
        vector::upsert(self.conn, index, node, embedding)
    }

    pub fn vector_remove(&self, index: &str, node: NodeId) -> Result<()> {
        vector::remove(self.conn, index, node)
    }

    pub fn vector_search(&self, index: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        vector::search(self.conn, index, query, k, None)
    }

    pub fn vector_search_with_prefilter(
        &self,
        index: &str,
        query: &[f32],
        k: usize,
        allowed: &dyn Fn(NodeId) -> bool,
        candidate_multiplier: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        vector::search_with_prefilter(self.conn, index, query, k, allowed, candidate_multiplier)
    }

    // -- text index ----------------------------------------------------------

    pub fn configure_text_index(&self, entity: Entity, label_or_type: Option<&str>, property: &str, weight: f64) -> Result<()> {
        text::configure(self.conn, entity, label_or_type, property, weight)
    }

    pub fn unconfigure_text_index(&self, entity: Entity, label_or_type: Option<&str>, property: &str) -> Result<()> {
        text::unconfigure(self.conn, entity, label_or_type, property)
    }

    pub fn show_text_index_config(&self) -> Result<Vec<TextIndexConfig>> {
        text::show_config(self.conn)
    }

    pub fn text_search(&self, query: &str, limit: usize) -> Result<Vec<TextHit>> {
        text::search(self.conn, query, limit)
    }

    pub fn rebuild_text_index(&self) -> Result<()> {
        text::rebuild(self.conn)
    }

    // -- Cypher --------------------------------------------------------------

    /// Runs a read-only Cypher query and collects every row. Write clauses
    /// (`CREATE`/`MERGE`/`SET`/`DELETE`/...) fail here since the snapshot
    /// this builds never implements `WriteableGraph`; use [`Session::execute`]
    /// for those instead.
    pub fn query(&self, cypher: &str, params: &Params) -> Result<Vec<Row>> {
        let params = self.params_with_default_hops(params);
        let snapshot = Snapshot::new(self.conn);
        snapshot.query(cypher, &params).map_err(query_err)
    }

    /// Runs a Cypher statement that may read, write, or both, returning the
    /// number of entities created, updated, or deleted. Any rows a `RETURN`
    /// clause produces are discarded; use [`Session::query`] to read rows
    /// back out of a pure read query instead.
    pub fn execute(&self, cypher: &str, params: &Params) -> Result<u32> {
        let params = self.params_with_default_hops(params);
        let query = grafito_query::prepare(cypher).map_err(query_err)?;
        let snapshot = Snapshot::new(self.conn);
        let mut writer = Writer::new(self.conn);
        let (_rows, write_count) = query.execute_mixed(&snapshot, &mut writer, &params).map_err(query_err)?;
        Ok(write_count)
    }

    /// Runs a Cypher statement that may read, write, or both, returning both
    /// the rows a trailing `RETURN` produced and the write count — the shape
    /// `apoc.*`-style procedures and the dump/restore protocol need since
    /// they interleave `MATCH`/`CREATE` and read the bindings back.
    pub fn query_mixed(&self, cypher: &str, params: &Params) -> Result<(Vec<Row>, u32)> {
        let params = self.params_with_default_hops(params);
        let query = grafito_query::prepare(cypher).map_err(query_err)?;
        let snapshot = Snapshot::new(self.conn);
        let mut writer = Writer::new(self.conn);
        let (rows, write_count) = query.execute_mixed(&snapshot, &mut writer, &params).map_err(query_err)?;
        let rows = rows
            .into_iter()
            .map(|cols| Row::new(cols.into_iter().collect()))
            .collect();
        Ok((rows, write_count))
    }

    pub(crate) fn connection(&self) -> &'a Connection {
        self.conn
    }
}
