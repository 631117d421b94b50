//! Grafito query engine: lexer, parser, AST, expression evaluator, and the
//! clause executor for the Cypher-like pattern query language.
//!
//! Generic over [`facade::GraphSnapshot`]/[`executor::WriteableGraph`] so
//! this crate never names a concrete storage engine; `grafito-storage`
//! implements both traits for its `Snapshot`/`Writer` connection wrappers
//! (see [`facade`]), and `grafito-core` is what callers actually use to
//! open a database and run queries against it.
//!
//! # Quick Start
//!
//! ```ignore
//! use grafito_query::{prepare, Params};
//!
//! let query = prepare("MATCH (n:Person)-[:KNOWS]->(m) RETURN n, m LIMIT 10").unwrap();
//! let rows: Vec<_> = query
//!     .execute_streaming(&snapshot, &Params::new())
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! ```
//!
//! # Architecture
//!
//! - `lexer` / `parser` / `ast` - tokenize and parse Cypher into a statement AST
//! - `evaluator` - three-valued-logic expression evaluation, functions, aggregates
//! - `executor` - the clause pipeline (MATCH/CREATE/MERGE/SET/DELETE/...), procedure dispatch,
//!   pattern-to-plan lowering, and the `Plan`/`PlanIterator` the pipeline walks
//! - `query_api` - `prepare()`/`PreparedQuery`, the embedder-facing entry point

pub mod ast;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod facade;
pub mod lexer;
pub mod parser;
pub mod query_api;

pub use error::{Error, Result};
pub use executor::{Row, Value, WriteableGraph};
pub use facade::{
    EdgeKey, ExternalId, GraphSnapshot, InternalNodeId, LabelId, PropertyValue, QueryExt,
    RelTypeId, query_collect,
};
pub use query_api::{Params, PreparedQuery, prepare};

/// Parses a Cypher query string into an AST.
///
/// This is a low-level API. Most users should use [`prepare()`] instead,
/// which handles both parsing and planning.
pub fn parse(cypher: &str) -> Result<ast::Query> {
    parser::Parser::parse(cypher)
}
