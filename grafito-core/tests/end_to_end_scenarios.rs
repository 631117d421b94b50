//! End-to-end scenarios pinned against the public `Db` facade: a
//! CREATE/MATCH round trip with arithmetic projection, a uniqueness
//! constraint rejecting a second non-null value, and a dump/restore cycle
//! that reproduces node/relationship counts.

use grafito::{Config, Db, Entity, Params, RowValue as Value};

fn db() -> Db {
    Db::open_in_memory(Config::default()).unwrap()
}

#[test]
fn create_then_match_with_arithmetic_projection() {
    let db = db();
    db.execute(
        "CREATE (a:Person {name:'Alice',age:30}), (b:Person {name:'Bob'}), (a)-[:KNOWS {since:2020}]->(b)",
        &Params::new(),
    )
    .unwrap();

    let rows = db
        .query(
            "MATCH (p:Person)-[:KNOWS]->(q) RETURN p.name, q.name, p.age + 1",
            &Params::new(),
        )
        .unwrap();

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("p.name"), Some(&Value::String("Alice".into())));
    assert_eq!(row.get("q.name"), Some(&Value::String("Bob".into())));
    assert_eq!(row.get("p.age + 1"), Some(&Value::Int(31)));
}

#[test]
fn uniqueness_constraint_permits_multiple_nulls_rejects_second_duplicate() {
    let db = db();
    db.scope(|session| {
        session.create_constraint(
            Entity::Node,
            "User",
            "email",
            grafito::ConstraintKind::Uniqueness,
            None,
            None,
        )?;
        Ok(())
    })
    .unwrap();

    // Two nodes with a null email both succeed.
    db.execute("CREATE (:User {name:'a'})", &Params::new()).unwrap();
    db.execute("CREATE (:User {name:'b'})", &Params::new()).unwrap();

    // First non-null email succeeds.
    db.execute("CREATE (:User {email:'a@b'})", &Params::new()).unwrap();

    // Second identical non-null email fails the transaction.
    let err = db.execute("CREATE (:User {email:'a@b'})", &Params::new()).unwrap_err();
    assert!(err.is_constraint_violation(), "expected constraint violation, got {err:?}");
}

#[test]
fn dump_restore_round_trip_preserves_counts() {
    let db = db();
    db.scope(|session| {
        for i in 0..20 {
            session.create_node(&["Person".into()], Default::default())?;
            let _ = i;
        }
        Ok(())
    })
    .unwrap();

    db.scope(|session| {
        let people = session.match_nodes(&["Person".into()], &[])?;
        for pair in people.chunks(2) {
            if let [a, b] = pair {
                session.create_relationship(a.id, b.id, "KNOWS", Default::default())?;
            }
        }
        Ok(())
    })
    .unwrap();

    let before_nodes = db.query("MATCH (n) RETURN count(n)", &Params::new()).unwrap();
    let before_rels = db.query("MATCH ()-[r]->() RETURN count(r)", &Params::new()).unwrap();

    let script = db.dump().unwrap();

    // The dump protocol's final cleanup statement must be present.
    assert!(script.contains("REMOVE n._dump_id"), "dump script missing the trailing cleanup statement");

    let fresh = db();
    fresh.restore(&script, true).unwrap();

    let after_nodes = fresh.query("MATCH (n) RETURN count(n)", &Params::new()).unwrap();
    let after_rels = fresh.query("MATCH ()-[r]->() RETURN count(r)", &Params::new()).unwrap();

    assert_eq!(before_nodes[0].get("count(n)"), after_nodes[0].get("count(n)"));
    assert_eq!(before_rels[0].get("count(r)"), after_rels[0].get("count(r)"));

    // The `_dump_id` scratch property does not survive restoration.
    let leftover = fresh
        .query("MATCH (n) WHERE n._dump_id IS NOT NULL RETURN count(n)", &Params::new())
        .unwrap();
    assert_eq!(leftover[0].get("count(n)"), Some(&Value::Int(0)));
}

#[test]
fn unbounded_variable_length_pattern_respects_configured_hop_ceiling() {
    // A chain of 5 relationships (6 nodes); cap the database's unbounded
    // `-[*]-` ceiling at 2 hops and confirm an unbounded traversal never
    // reaches the far end of the chain.
    let db = Db::open_in_memory(Config::default().with_cypher_max_hops(2)).unwrap();
    db.scope(|session| {
        let mut prev = session.create_node(&["N".into()], Default::default())?;
        for _ in 0..5 {
            let next = session.create_node(&["N".into()], Default::default())?;
            session.create_relationship(prev.id, next.id, "NEXT", Default::default())?;
            prev = next;
        }
        Ok(())
    })
    .unwrap();

    let rows = db
        .query("MATCH (a:N)-[:NEXT*]->(b) RETURN count(b)", &Params::new())
        .unwrap();
    // With a 2-hop ceiling, only hops 1..=2 from every starting node are
    // reachable; the chain's 5th relationship is never traversed into.
    let count = match rows[0].get("count(b)") {
        Some(Value::Int(n)) => *n,
        other => panic!("expected int count, got {other:?}"),
    };
    assert!(count > 0, "expected some reachable nodes within 2 hops");
    assert!(
        count < 15,
        "hop ceiling was not applied: count(b) = {count} reached every pair in the chain"
    );
}

#[test]
fn delete_node_cascades_to_incident_relationships() {
    let db = db();
    db.scope(|session| {
        let a = session.create_node(&["Person".into()], Default::default())?;
        let b = session.create_node(&["Person".into()], Default::default())?;
        session.create_relationship(a.id, b.id, "KNOWS", Default::default())?;
        session.delete_node(a.id)?;
        Ok(())
    })
    .unwrap();

    let rows = db.query("MATCH ()-[r]->() RETURN count(r)", &Params::new()).unwrap();
    assert_eq!(rows[0].get("count(r)"), Some(&Value::Int(0)));
}
