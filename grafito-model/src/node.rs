use crate::ids::NodeId;
use crate::value::PropertyMap;
use serde::{Deserialize, Serialize};

/// A graph node: an id, a duplicate-free set of labels, a creation
/// timestamp (Julian day, matching the storage layer's `julianday()`), an
/// optional URI, and its property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub created_at: f64,
    pub uri: Option<String>,
    pub properties: PropertyMap,
}

impl Node {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }

    /// Merges `labels` into the node's label set, skipping duplicates
    /// case-insensitively.
    pub fn add_labels(&mut self, labels: impl IntoIterator<Item = String>) {
        for label in labels {
            if !self.has_label(&label) {
                self.labels.push(label);
            }
        }
    }

    pub fn remove_labels(&mut self, labels: &[String]) {
        self.labels
            .retain(|l| !labels.iter().any(|r| r.eq_ignore_ascii_case(l)));
    }
}
