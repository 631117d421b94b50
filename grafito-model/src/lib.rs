//! Grafito data model.
//!
//! Shared across the storage, query, and core crates: the entity structs
//! (`Node`, `Relationship`), the dynamically-typed `Value`, the id newtypes,
//! and the crate-wide `Error`.

pub mod error;
pub mod ids;
pub mod node;
pub mod relationship;
pub mod value;

pub use error::{Error, Result};
pub use ids::{Direction, NodeId, RelId};
pub use node::Node;
pub use relationship::Relationship;
pub use value::{Duration, Point, PropertyMap, Value};
