//! Vector-index subsystem: a named ANN structure over a fixed dimension,
//! its embeddings persisted in `vector_entries`, plus the pre-filter
//! pipeline, reranker registry, and embedding-function registry §4.10
//! describes.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use rusqlite::{params, Connection, OptionalExtension};

use grafito_model::{Error, NodeId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    L2,
    Ip,
    Cosine,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::Ip => "ip",
            Metric::Cosine => "cosine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "l2" => Some(Metric::L2),
            "ip" => Some(Metric::Ip),
            "cosine" => Some(Metric::Cosine),
            _ => None,
        }
    }

    /// Higher is always better, across every metric — callers never need to
    /// flip a comparison direction based on which metric an index uses.
    fn score(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Metric::L2 => -l2_distance(a, b),
            Metric::Ip => dot(a, b),
            Metric::Cosine => cosine_similarity(a, b),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| ((*x - *y) as f64).powi(2)).sum::<f64>().sqrt()
}

fn norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot(a, b) / denom
    }
}

pub struct VectorIndexInfo {
    pub name: String,
    pub dimension: usize,
    pub backend: String,
    pub method: String,
    pub metric: Metric,
    pub store_embeddings: bool,
    pub default_k: usize,
    pub embedding_fn: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub fn create_index(
    conn: &Connection,
    name: &str,
    dimension: usize,
    backend: &str,
    method: &str,
    metric: Metric,
    store_embeddings: bool,
    default_k: usize,
    embedding_fn: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO vector_indexes(name, dimension, backend, method, metric, store_embeddings, default_k, embedding_fn)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(name) DO NOTHING",
        params![
            name,
            dimension as i64,
            backend,
            method,
            metric.as_str(),
            store_embeddings as i64,
            default_k as i64,
            embedding_fn
        ],
    )?;
    Ok(())
}

pub fn drop_index(conn: &Connection, name: &str) -> Result<()> {
    conn.execute("DELETE FROM vector_indexes WHERE name = ?1", params![name])?;
    Ok(())
}

pub fn show_indexes(conn: &Connection) -> Result<Vec<VectorIndexInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, dimension, backend, method, metric, store_embeddings, default_k, embedding_fn
         FROM vector_indexes ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(VectorIndexInfo {
            name: row.get(0)?,
            dimension: row.get::<_, i64>(1)? as usize,
            backend: row.get(2)?,
            method: row.get(3)?,
            metric: Metric::parse(&row.get::<_, String>(4)?).unwrap_or(Metric::L2),
            store_embeddings: row.get::<_, i64>(5)? != 0,
            default_k: row.get::<_, i64>(6)? as usize,
            embedding_fn: row.get(7)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

fn get_index(conn: &Connection, name: &str) -> Result<VectorIndexInfo> {
    show_indexes(conn)?
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| Error::index(format!("no vector index named {name}")))
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// Inserts or replaces `node`'s stored embedding in `index`. A reranker
/// needs the raw vector back, which is only possible when the index was
/// created with `store_embeddings: true`; upserting is allowed regardless,
/// since a non-materializing index is still searchable.
pub fn upsert(conn: &Connection, index: &str, node: NodeId, vector: &[f32]) -> Result<()> {
    let info = get_index(conn, index)?;
    if vector.len() != info.dimension {
        return Err(Error::configuration(format!(
            "vector of dimension {} does not match index {index}'s dimension {}",
            vector.len(),
            info.dimension
        )));
    }
    conn.execute(
        "INSERT INTO vector_entries(index_name, node_id, vector) VALUES (?1, ?2, ?3)
         ON CONFLICT(index_name, node_id) DO UPDATE SET vector = excluded.vector",
        params![index, node.0, encode_vector(vector)],
    )?;
    Ok(())
}

pub fn remove(conn: &Connection, index: &str, node: NodeId) -> Result<()> {
    conn.execute("DELETE FROM vector_entries WHERE index_name = ?1 AND node_id = ?2", params![index, node.0])?;
    Ok(())
}

pub struct SearchHit {
    pub node: NodeId,
    pub score: f64,
    pub vector: Vec<f32>,
}

fn all_entries(conn: &Connection, index: &str) -> Result<Vec<(NodeId, Vec<f32>)>> {
    let mut stmt = conn.prepare("SELECT node_id, vector FROM vector_entries WHERE index_name = ?1")?;
    let rows = stmt.query_map(params![index], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        let (id, bytes) = row?;
        out.push((NodeId(id), decode_vector(&bytes)));
    }
    Ok(out)
}

/// Brute-force `k`-nearest-neighbor search — the required reference
/// backend; exact, supports every metric. `allowed` is an already-resolved
/// pre-filter predicate; `None` searches the whole index.
pub fn search(
    conn: &Connection,
    index: &str,
    query: &[f32],
    k: usize,
    allowed: Option<&dyn Fn(NodeId) -> bool>,
) -> Result<Vec<SearchHit>> {
    let info = get_index(conn, index)?;
    if query.len() != info.dimension {
        return Err(Error::configuration(format!(
            "query vector of dimension {} does not match index {index}'s dimension {}",
            query.len(),
            info.dimension
        )));
    }
    let mut scored: Vec<SearchHit> = all_entries(conn, index)?
        .into_iter()
        .filter(|(id, _)| allowed.map(|f| f(*id)).unwrap_or(true))
        .map(|(node, vector)| {
            let score = info.metric.score(query, &vector);
            SearchHit { node, score, vector }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node.0.cmp(&b.node.0))
    });
    scored.truncate(k);
    Ok(scored)
}

/// Over-pull multiplier applied when a labels/property filter accompanies
/// a search and the backend has no filter pushdown (true of the
/// brute-force backend, always): `k * CANDIDATE_MULTIPLIER` unfiltered
/// results are pulled before the post-filter trims back to `k`.
pub const CANDIDATE_MULTIPLIER: usize = 3;

/// The dispatcher-level entry point for a filtered search: pulls an
/// over-pull of candidates, applies `allowed`, and trims to `k`. This
/// post-filter is authoritative — there is no backend here that can push
/// the filter down instead.
pub fn search_with_prefilter(
    conn: &Connection,
    index: &str,
    query: &[f32],
    k: usize,
    allowed: &dyn Fn(NodeId) -> bool,
    candidate_multiplier: Option<usize>,
) -> Result<Vec<SearchHit>> {
    let multiplier = candidate_multiplier.unwrap_or(CANDIDATE_MULTIPLIER).max(1);
    let over_pull = k.saturating_mul(multiplier).max(k);
    let mut hits = search(conn, index, query, over_pull, None)?;
    hits.retain(|hit| allowed(hit.node));
    hits.truncate(k);
    Ok(hits)
}

/// A reranker reorders (and may rescore) a candidate set after the initial
/// search. Registered callbacks take the query vector and the candidate
/// set and return a reordered, possibly-rescored top-k.
pub type Reranker = dyn Fn(&[f32], Vec<SearchHit>) -> Vec<SearchHit> + Send + Sync;

pub struct RerankerRegistry {
    handlers: RwLock<HashMap<String, Arc<Reranker>>>,
}

impl Default for RerankerRegistry {
    fn default() -> Self {
        let mut handlers: HashMap<String, Arc<Reranker>> = HashMap::new();
        handlers.insert("identity".to_string(), Arc::new(identity_reranker) as Arc<Reranker>);
        RerankerRegistry { handlers: RwLock::new(handlers) }
    }
}

impl RerankerRegistry {
    pub fn register(&self, name: impl Into<String>, reranker: Arc<Reranker>) {
        self.handlers.write().expect("reranker registry poisoned").insert(name.into(), reranker);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Reranker>> {
        self.handlers.read().expect("reranker registry poisoned").get(name).cloned()
    }
}

fn identity_reranker(_query: &[f32], candidates: Vec<SearchHit>) -> Vec<SearchHit> {
    candidates
}

static GLOBAL_RERANKER_REGISTRY: OnceLock<RerankerRegistry> = OnceLock::new();

pub fn reranker_registry() -> &'static RerankerRegistry {
    GLOBAL_RERANKER_REGISTRY.get_or_init(RerankerRegistry::default)
}

/// Applies `rerank: true` semantics: with no explicit reranker named, the
/// default is the identity reranker over stored vectors — the caller must
/// have checked `store_embeddings` first, since without it `hit.vector` is
/// whatever the backend happened to return (here, always populated, but a
/// future non-materializing backend could leave it empty).
pub fn rerank(query: &[f32], candidates: Vec<SearchHit>, name: Option<&str>) -> Vec<SearchHit> {
    let reranker = name
        .and_then(|n| reranker_registry().get(n))
        .unwrap_or_else(|| reranker_registry().get("identity").expect("identity reranker always registered"));
    reranker(query, candidates)
}

/// Converts text to a vector for upserts/queries that supply text instead
/// of a vector. Not tied to any particular embedding model — callers
/// register whatever function their index names in `embedding_fn`.
pub type EmbeddingFn = dyn Fn(&str) -> Vec<f32> + Send + Sync;

#[derive(Default)]
pub struct EmbeddingFnRegistry {
    handlers: RwLock<HashMap<String, Arc<EmbeddingFn>>>,
}

impl EmbeddingFnRegistry {
    pub fn register(&self, name: impl Into<String>, f: Arc<EmbeddingFn>) {
        self.handlers.write().expect("embedding registry poisoned").insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<Arc<EmbeddingFn>> {
        self.handlers.read().expect("embedding registry poisoned").get(name).cloned()
    }
}

static GLOBAL_EMBEDDING_REGISTRY: OnceLock<EmbeddingFnRegistry> = OnceLock::new();

pub fn embedding_fn_registry() -> &'static EmbeddingFnRegistry {
    GLOBAL_EMBEDDING_REGISTRY.get_or_init(EmbeddingFnRegistry::default)
}

/// Embeds `text` with `index`'s associated embedding function. A missing
/// association is a `ConfigurationError`, per §4.10.
pub fn embed_for_index(conn: &Connection, index: &str, text: &str) -> Result<Vec<f32>> {
    let info = get_index(conn, index)?;
    let name = info
        .embedding_fn
        .ok_or_else(|| Error::configuration(format!("vector index {index} has no embedding function")))?;
    let embed = embedding_fn_registry()
        .get(&name)
        .ok_or_else(|| Error::configuration(format!("embedding function {name} is not registered")))?;
    Ok(embed(text))
}

/// The ANN backend contract §4.10 describes. Only the brute-force
/// reference backend below implements it; a pluggable IVF/HNSW/mmap-tree
/// backend would implement the same trait and slot in wherever `backend`
/// is configured on an index.
pub trait AnnBackend: Send + Sync {
    fn add(&mut self, id: NodeId, vector: Vec<f32>);
    fn remove(&mut self, id: NodeId);
    fn search(&self, query: &[f32], k: usize) -> Vec<(NodeId, f64)>;
    fn persist(&self, path: &std::path::Path) -> Result<()>;
    fn load(&mut self, path: &std::path::Path) -> Result<()>;
    fn supported_metrics(&self) -> &'static [&'static str];
}

/// Standalone in-memory brute-force backend, independent of the
/// `vector_entries`-table-backed functions above; useful for embedding a
/// vector index outside a `Store`, or for conformance-testing a future ANN
/// backend against the exact reference this one computes.
pub struct BruteForceBackend {
    metric: Metric,
    entries: HashMap<i64, Vec<f32>>,
}

impl BruteForceBackend {
    pub fn new(metric: Metric) -> Self {
        BruteForceBackend { metric, entries: HashMap::new() }
    }
}

impl AnnBackend for BruteForceBackend {
    fn add(&mut self, id: NodeId, vector: Vec<f32>) {
        self.entries.insert(id.0, vector);
    }

    fn remove(&mut self, id: NodeId) {
        self.entries.remove(&id.0);
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(NodeId, f64)> {
        let mut scored: Vec<(NodeId, f64)> =
            self.entries.iter().map(|(id, v)| (NodeId(*id), self.metric.score(query, v))).collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn persist(&self, path: &std::path::Path) -> Result<()> {
        let serializable: HashMap<String, Vec<f32>> =
            self.entries.iter().map(|(id, v)| (id.to_string(), v.clone())).collect();
        std::fs::write(path, serde_json::to_vec(&serializable)?)?;
        Ok(())
    }

    fn load(&mut self, path: &std::path::Path) -> Result<()> {
        let loaded: HashMap<String, Vec<f32>> = serde_json::from_slice(&std::fs::read(path)?)?;
        self.entries = loaded.into_iter().filter_map(|(id, v)| id.parse::<i64>().ok().map(|id| (id, v))).collect();
        Ok(())
    }

    fn supported_metrics(&self) -> &'static [&'static str] {
        &["l2", "ip", "cosine"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::Store;

    #[test]
    fn brute_force_search_ranks_nearest_first() {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                create_index(conn, "embeds", 2, "brute_force", "flat", Metric::L2, true, 10, None)?;
                upsert(conn, "embeds", NodeId(1), &[0.0, 0.0])?;
                upsert(conn, "embeds", NodeId(2), &[10.0, 10.0])?;
                upsert(conn, "embeds", NodeId(3), &[0.1, 0.1])?;

                let hits = search(conn, "embeds", &[0.0, 0.0], 2, None)?;
                assert_eq!(hits.len(), 2);
                assert_eq!(hits[0].node, NodeId(1));
                assert_eq!(hits[1].node, NodeId(3));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn prefilter_trims_after_overpull() {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                create_index(conn, "embeds", 1, "brute_force", "flat", Metric::L2, false, 10, None)?;
                for i in 1..=6i64 {
                    upsert(conn, "embeds", NodeId(i), &[i as f32])?;
                }
                let allowed = |id: NodeId| id.0 % 2 == 0;
                let hits = search_with_prefilter(conn, "embeds", &[0.0], 2, &allowed, None)?;
                assert_eq!(hits.len(), 2);
                assert!(hits.iter().all(|h| h.node.0 % 2 == 0));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn search_breaks_equal_score_ties_by_node_id() {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                create_index(conn, "embeds", 2, "brute_force", "flat", Metric::L2, false, 10, None)?;
                // Upserted out of id order, but both equidistant from the query.
                upsert(conn, "embeds", NodeId(3), &[1.0, 0.0])?;
                upsert(conn, "embeds", NodeId(1), &[0.0, 1.0])?;
                upsert(conn, "embeds", NodeId(2), &[-1.0, 0.0])?;

                let hits = search(conn, "embeds", &[0.0, 0.0], 3, None)?;
                assert_eq!(hits.iter().map(|h| h.node).collect::<Vec<_>>(), vec![NodeId(1), NodeId(2), NodeId(3)]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn prefilter_honors_explicit_candidate_multiplier() {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                create_index(conn, "embeds", 1, "brute_force", "flat", Metric::L2, false, 10, None)?;
                for i in 1..=5i64 {
                    upsert(conn, "embeds", NodeId(i), &[i as f32])?;
                }
                // Only node 5 passes the filter, but it's the furthest candidate.
                let allowed = |id: NodeId| id.0 == 5;

                // Default multiplier (3) over-pulls only the 3 nearest and misses it.
                let default_hits = search_with_prefilter(conn, "embeds", &[0.0], 1, &allowed, None)?;
                assert!(default_hits.is_empty());

                // An explicit multiplier wide enough to cover the whole index finds it.
                let wide_hits = search_with_prefilter(conn, "embeds", &[0.0], 1, &allowed, Some(5))?;
                assert_eq!(wide_hits.len(), 1);
                assert_eq!(wide_hits[0].node, NodeId(5));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn in_memory_backend_persists_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let mut backend = BruteForceBackend::new(Metric::Cosine);
        backend.add(NodeId(1), vec![1.0, 0.0]);
        backend.persist(&path).unwrap();

        let mut reloaded = BruteForceBackend::new(Metric::Cosine);
        reloaded.load(&path).unwrap();
        let hits = reloaded.search(&[1.0, 0.0], 1);
        assert_eq!(hits[0].0, NodeId(1));
    }
}
