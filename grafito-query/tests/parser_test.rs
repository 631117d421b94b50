//! Lexer/parser-level checks: clause shape for a handful of representative
//! queries, variable-length bound parsing, and malformed input rejection.

use grafito_query::ast::{Clause, PathElement, RelationshipDirection};
use grafito_query::parse;

#[test]
fn single_match_return_produces_one_match_and_one_return_clause() {
    let query = parse("MATCH (n:Person) RETURN n").unwrap();
    assert_eq!(query.clauses.len(), 2);
    assert!(matches!(query.clauses[0], Clause::Match(_)));
    assert!(matches!(query.clauses[1], Clause::Return(_)));
}

#[test]
fn optional_match_is_flagged_on_the_clause() {
    let query = parse("OPTIONAL MATCH (n) RETURN n").unwrap();
    match &query.clauses[0] {
        Clause::Match(m) => assert!(m.optional),
        other => panic!("expected a Match clause, got {other:?}"),
    }
}

#[test]
fn variable_length_pattern_bounds_are_parsed() {
    let query = parse("MATCH (a)-[:KNOWS*2..4]->(b) RETURN b").unwrap();
    let Clause::Match(m) = &query.clauses[0] else { panic!("expected Match") };
    let rel = m.patterns[0]
        .elements
        .iter()
        .find_map(|e| match e {
            PathElement::Relationship(r) => Some(r),
            _ => None,
        })
        .unwrap();
    let var_len = rel.variable_length.as_ref().expect("expected variable-length bounds");
    assert_eq!(var_len.min, Some(2));
    assert_eq!(var_len.max, Some(4));
    assert_eq!(rel.direction, RelationshipDirection::LeftToRight);
}

#[test]
fn unbounded_variable_length_pattern_has_no_explicit_bounds() {
    let query = parse("MATCH (a)-[:KNOWS*]->(b) RETURN b").unwrap();
    let Clause::Match(m) = &query.clauses[0] else { panic!("expected Match") };
    let rel = m.patterns[0]
        .elements
        .iter()
        .find_map(|e| match e {
            PathElement::Relationship(r) => Some(r),
            _ => None,
        })
        .unwrap();
    let var_len = rel.variable_length.as_ref().expect("expected variable-length marker");
    assert_eq!(var_len.min, None);
    assert_eq!(var_len.max, None);
}

#[test]
fn undirected_relationship_pattern_parses() {
    let query = parse("MATCH (a)-[:KNOWS]-(b) RETURN b").unwrap();
    let Clause::Match(m) = &query.clauses[0] else { panic!("expected Match") };
    let rel = m.patterns[0]
        .elements
        .iter()
        .find_map(|e| match e {
            PathElement::Relationship(r) => Some(r),
            _ => None,
        })
        .unwrap();
    assert_eq!(rel.direction, RelationshipDirection::Undirected);
}

#[test]
fn multiple_clauses_chain_in_order() {
    let query = parse("MATCH (n) WHERE n.age > 18 WITH n RETURN n.name ORDER BY n.name LIMIT 10").unwrap();
    let kinds: Vec<&str> = query
        .clauses
        .iter()
        .map(|c| match c {
            Clause::Match(_) => "Match",
            Clause::Where(_) => "Where",
            Clause::With(_) => "With",
            Clause::Return(_) => "Return",
            _ => "Other",
        })
        .collect();
    assert_eq!(kinds, vec!["Match", "Where", "With", "Return"]);
}

#[test]
fn unclosed_node_pattern_is_a_parse_error() {
    assert!(parse("MATCH (n RETURN n").is_err());
}

#[test]
fn dangling_clause_keyword_is_a_parse_error() {
    assert!(parse("MATCH (n) RETURN").is_err());
}

#[test]
fn empty_query_parses_to_zero_clauses() {
    assert_eq!(parse("").unwrap().clauses.len(), 0);
}
