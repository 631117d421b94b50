//! CREATE/DELETE clause execution against the storage-backed
//! `Snapshot`/`Writer` pair, exercised directly below the `grafito-core`
//! facade.

use grafito_storage::snapshot::{Snapshot, Writer};
use grafito_storage::{Config, Store};
use grafito_query::{prepare, Params};

fn store() -> Store {
    Store::open_in_memory(Config::default()).unwrap()
}

#[test]
fn create_single_node() {
    let store = store();
    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let mut writer = Writer::new(tx.connection());
            let query = prepare("CREATE (n)").unwrap();
            let count = query.execute_write(&snapshot, &mut writer, &Params::new()).unwrap();
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn create_node_with_properties() {
    let store = store();
    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let mut writer = Writer::new(tx.connection());
            let query = prepare("CREATE (n {name: 'Alice', age: 30})").unwrap();
            let count = query.execute_write(&snapshot, &mut writer, &Params::new()).unwrap();
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn create_relationship_counts_both_endpoints_and_edge() {
    let store = store();
    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let mut writer = Writer::new(tx.connection());
            let query = prepare("CREATE (a)-[:KNOWS]->(b)").unwrap();
            let count = query.execute_write(&snapshot, &mut writer, &Params::new()).unwrap();
            assert_eq!(count, 3);
            Ok(())
        })
        .unwrap();
}

#[test]
fn delete_detaches_relationships_first() {
    let store = store();
    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let mut writer = Writer::new(tx.connection());
            prepare("CREATE (a)-[:KNOWS]->(b)")
                .unwrap()
                .execute_write(&snapshot, &mut writer, &Params::new())
                .unwrap();
            Ok(())
        })
        .unwrap();

    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let mut writer = Writer::new(tx.connection());
            let deleted = prepare("MATCH (a)-[:KNOWS]->(b) DETACH DELETE a")
                .unwrap()
                .execute_write(&snapshot, &mut writer, &Params::new())
                .unwrap();
            // the relationship and the node.
            assert_eq!(deleted, 2);
            Ok(())
        })
        .unwrap();
}

#[test]
fn delete_bound_relationship_variable() {
    let store = store();
    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let mut writer = Writer::new(tx.connection());
            prepare("CREATE (a)-[:KNOWS]->(b)")
                .unwrap()
                .execute_write(&snapshot, &mut writer, &Params::new())
                .unwrap();
            Ok(())
        })
        .unwrap();

    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let mut writer = Writer::new(tx.connection());
            let deleted = prepare("MATCH (a)-[r:KNOWS]->(b) DELETE r")
                .unwrap()
                .execute_write(&snapshot, &mut writer, &Params::new())
                .unwrap();
            assert_eq!(deleted, 1);

            let remaining: Vec<_> = prepare("MATCH (a)-[r:KNOWS]->(b) RETURN r")
                .unwrap()
                .execute_streaming(&snapshot, &Params::new())
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            assert!(remaining.is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn plain_delete_rejects_node_with_incident_relationships() {
    let store = store();
    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let mut writer = Writer::new(tx.connection());
            prepare("CREATE (a)-[:KNOWS]->(b)")
                .unwrap()
                .execute_write(&snapshot, &mut writer, &Params::new())
                .unwrap();
            Ok(())
        })
        .unwrap();

    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let mut writer = Writer::new(tx.connection());
            // `a` is a source and `b` a target; plain DELETE must fail on both.
            assert!(prepare("MATCH (a)-[:KNOWS]->(b) DELETE a")
                .unwrap()
                .execute_write(&snapshot, &mut writer, &Params::new())
                .is_err());
            assert!(prepare("MATCH (a)-[:KNOWS]->(b) DELETE b")
                .unwrap()
                .execute_write(&snapshot, &mut writer, &Params::new())
                .is_err());
            Ok(())
        })
        .unwrap();
}
