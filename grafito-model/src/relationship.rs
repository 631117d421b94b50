use crate::ids::{NodeId, RelId};
use crate::value::PropertyMap;
use serde::{Deserialize, Serialize};

/// A directed, typed edge between two existing nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelId,
    pub source: NodeId,
    pub target: NodeId,
    pub rel_type: String,
    pub created_at: f64,
    pub uri: Option<String>,
    pub properties: PropertyMap,
}
