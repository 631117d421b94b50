//! Traversal kernel: BFS shortest path, DFS bounded path, variable-length
//! path enumeration, and the shortestPath/allShortestPaths pair.

use std::collections::{HashSet, VecDeque};

use rusqlite::Connection;

use grafito_model::{Direction, NodeId, RelId, Result};

use crate::primitives;

/// A path is an alternation of node ids starting and ending with one, with
/// the relationship ids used between consecutive nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub nodes: Vec<NodeId>,
    pub rels: Vec<RelId>,
}

impl Path {
    pub fn single(node: NodeId) -> Self {
        Path { nodes: vec![node], rels: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rels.len()
    }
}

fn expand(
    conn: &Connection,
    node: NodeId,
    direction: Direction,
    rel_type: Option<&str>,
) -> Result<Vec<(RelId, NodeId)>> {
    let mut out = Vec::new();
    if matches!(direction, Direction::Outgoing | Direction::Both) {
        for rel in primitives::match_relationships(conn, Some(node), None, rel_type)? {
            out.push((rel.id, rel.target));
        }
    }
    if matches!(direction, Direction::Incoming | Direction::Both) {
        for rel in primitives::match_relationships(conn, None, Some(node), rel_type)? {
            out.push((rel.id, rel.source));
        }
    }
    Ok(out)
}

/// BFS shortest path; ties broken by insertion (first-discovered-parent)
/// order. Returns `None` if `target` is unreachable.
pub fn shortest_path(
    conn: &Connection,
    source: NodeId,
    target: NodeId,
    direction: Direction,
    rel_type: Option<&str>,
) -> Result<Option<Path>> {
    if source == target {
        return Ok(Some(Path::single(source)));
    }

    let mut visited = HashSet::new();
    visited.insert(source);
    let mut parent: std::collections::HashMap<NodeId, (NodeId, RelId)> = std::collections::HashMap::new();
    let mut queue = VecDeque::new();
    queue.push_back(source);

    while let Some(current) = queue.pop_front() {
        for (rel_id, next) in expand(conn, current, direction, rel_type)? {
            if visited.insert(next) {
                parent.insert(next, (current, rel_id));
                if next == target {
                    return Ok(Some(reconstruct(source, target, &parent)));
                }
                queue.push_back(next);
            }
        }
    }
    Ok(None)
}

/// Every shortest path (same minimum length, possibly several).
pub fn all_shortest_paths(
    conn: &Connection,
    source: NodeId,
    target: NodeId,
    direction: Direction,
    rel_type: Option<&str>,
) -> Result<Vec<Path>> {
    if source == target {
        return Ok(vec![Path::single(source)]);
    }

    let mut depth: std::collections::HashMap<NodeId, usize> = std::collections::HashMap::new();
    depth.insert(source, 0);
    let mut queue = VecDeque::new();
    queue.push_back(source);
    let mut target_depth = None;

    // First pass: BFS layer-by-layer to find the minimum depth at which the
    // target is reached; we don't stop at the first discovery because other
    // nodes at the same layer may also reach it via a path of equal length.
    while let Some(current) = queue.pop_front() {
        let current_depth = depth[&current];
        if let Some(td) = target_depth {
            if current_depth >= td {
                break;
            }
        }
        for (_, next) in expand(conn, current, direction, rel_type)? {
            if !depth.contains_key(&next) {
                depth.insert(next, current_depth + 1);
                if next == target {
                    target_depth = Some(current_depth + 1);
                }
                queue.push_back(next);
            }
        }
    }

    let Some(target_depth) = target_depth else {
        return Ok(Vec::new());
    };

    // Second pass: enumerate all simple paths of exactly `target_depth`
    // hops via depth-bounded DFS, keeping only those that respect the
    // computed per-node minimum depth (prunes exponential blowup).
    let mut results = Vec::new();
    let mut stack = vec![source];
    let mut rel_stack: Vec<RelId> = Vec::new();
    enumerate_exact(conn, source, target, target_depth, direction, rel_type, &mut stack, &mut rel_stack, &depth, &mut results)?;
    Ok(results)
}

#[allow(clippy::too_many_arguments)]
fn enumerate_exact(
    conn: &Connection,
    current: NodeId,
    target: NodeId,
    remaining: usize,
    direction: Direction,
    rel_type: Option<&str>,
    stack: &mut Vec<NodeId>,
    rel_stack: &mut Vec<RelId>,
    min_depth: &std::collections::HashMap<NodeId, usize>,
    results: &mut Vec<Path>,
) -> Result<()> {
    if remaining == 0 {
        if current == target {
            results.push(Path { nodes: stack.clone(), rels: rel_stack.clone() });
        }
        return Ok(());
    }
    for (rel_id, next) in expand(conn, current, direction, rel_type)? {
        if stack.contains(&next) {
            continue;
        }
        if min_depth.get(&next).copied().unwrap_or(usize::MAX) != stack.len() {
            continue;
        }
        stack.push(next);
        rel_stack.push(rel_id);
        enumerate_exact(conn, next, target, remaining - 1, direction, rel_type, stack, rel_stack, min_depth, results)?;
        rel_stack.pop();
        stack.pop();
    }
    Ok(())
}

fn reconstruct(
    source: NodeId,
    target: NodeId,
    parent: &std::collections::HashMap<NodeId, (NodeId, RelId)>,
) -> Path {
    let mut nodes = vec![target];
    let mut rels = Vec::new();
    let mut current = target;
    while current != source {
        let (prev, rel) = parent[&current];
        rels.push(rel);
        nodes.push(prev);
        current = prev;
    }
    nodes.reverse();
    rels.reverse();
    Path { nodes, rels }
}

/// DFS bounded path: any simple path of length ≤ `max_depth`, enumerated in
/// neighbor-insertion order, first match wins.
pub fn bounded_path(
    conn: &Connection,
    source: NodeId,
    target: NodeId,
    max_depth: u32,
    direction: Direction,
    rel_type: Option<&str>,
) -> Result<Option<Path>> {
    if source == target {
        return Ok(Some(Path::single(source)));
    }
    let mut visited = vec![source];
    let mut rels = Vec::new();
    dfs(conn, source, target, max_depth, direction, rel_type, &mut visited, &mut rels)
}

#[allow(clippy::too_many_arguments)]
fn dfs(
    conn: &Connection,
    current: NodeId,
    target: NodeId,
    remaining: u32,
    direction: Direction,
    rel_type: Option<&str>,
    visited: &mut Vec<NodeId>,
    rels: &mut Vec<RelId>,
) -> Result<Option<Path>> {
    if remaining == 0 {
        return Ok(None);
    }
    for (rel_id, next) in expand(conn, current, direction, rel_type)? {
        if visited.contains(&next) {
            continue;
        }
        if next == target {
            visited.push(next);
            rels.push(rel_id);
            let path = Path { nodes: visited.clone(), rels: rels.clone() };
            rels.pop();
            visited.pop();
            return Ok(Some(path));
        }
        visited.push(next);
        rels.push(rel_id);
        if let Some(found) = dfs(conn, next, target, remaining - 1, direction, rel_type, visited, rels)? {
            return Ok(Some(found));
        }
        rels.pop();
        visited.pop();
    }
    Ok(None)
}

/// Enumerates every simple path between `source` and `target` whose hop
/// count falls in `[min, max]`, used to bind variable-length relationship
/// patterns. `max` is clamped to `cypher_max_hops` by the caller when the
/// pattern leaves the upper bound unspecified.
pub fn variable_length_paths(
    conn: &Connection,
    source: NodeId,
    target: Option<NodeId>,
    min: u32,
    max: u32,
    direction: Direction,
    rel_type: Option<&str>,
) -> Result<Vec<Path>> {
    let mut results = Vec::new();
    let mut stack = vec![source];
    let mut rels = Vec::new();
    walk_all(conn, source, target, min, max, direction, rel_type, &mut stack, &mut rels, &mut results)?;
    Ok(results)
}

#[allow(clippy::too_many_arguments)]
fn walk_all(
    conn: &Connection,
    current: NodeId,
    target: Option<NodeId>,
    min: u32,
    max: u32,
    direction: Direction,
    rel_type: Option<&str>,
    stack: &mut Vec<NodeId>,
    rels: &mut Vec<RelId>,
    results: &mut Vec<Path>,
) -> Result<()> {
    let depth = rels.len() as u32;
    if depth >= min {
        if target.map(|t| t == current).unwrap_or(true) {
            results.push(Path { nodes: stack.clone(), rels: rels.clone() });
        }
    }
    if depth >= max {
        return Ok(());
    }
    for (rel_id, next) in expand(conn, current, direction, rel_type)? {
        if stack.contains(&next) {
            continue;
        }
        stack.push(next);
        rels.push(rel_id);
        walk_all(conn, next, target, min, max, direction, rel_type, stack, rels, results)?;
        rels.pop();
        stack.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::config::Config;
    use grafito_model::PropertyMap;

    fn make_cycle() -> Store {
        let store = Store::open_in_memory(Config::default()).unwrap();
        store
            .scope(|tx| {
                let conn = tx.connection();
                let a = primitives::create_node(conn, &["Person".into()], PropertyMap::new())?;
                let b = primitives::create_node(conn, &["Person".into()], PropertyMap::new())?;
                let c = primitives::create_node(conn, &["Person".into()], PropertyMap::new())?;
                primitives::create_relationship(conn, a.id, b.id, "KNOWS", PropertyMap::new())?;
                primitives::create_relationship(conn, b.id, c.id, "KNOWS", PropertyMap::new())?;
                primitives::create_relationship(conn, c.id, a.id, "KNOWS", PropertyMap::new())?;
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn shortest_path_on_cycle() {
        let store = make_cycle();
        store
            .read(|conn| {
                let path = shortest_path(conn, NodeId(1), NodeId(3), Direction::Outgoing, None)?.unwrap();
                assert_eq!(path.nodes, vec![NodeId(1), NodeId(2), NodeId(3)]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn self_path_is_zero_length() {
        let store = make_cycle();
        store
            .read(|conn| {
                let path = bounded_path(conn, NodeId(1), NodeId(1), 3, Direction::Outgoing, None)?.unwrap();
                assert_eq!(path.len(), 0);
                Ok(())
            })
            .unwrap();
    }
}
