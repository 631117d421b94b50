//! Three-valued logic truth tables (spec §4.6, §8): every combination of
//! `{true, false, null} x {true, false, null}` for AND/OR/XOR, the `IS
//! NULL`/`IS NOT NULL` predicates (which never themselves return null), and
//! the list-scalar equality shorthand for `=`/`<>`.

use grafito_query::{prepare, Params};
use grafito_storage::snapshot::Snapshot;
use grafito_storage::{Config, Store};

fn scalar(cypher: &str) -> grafito_query::Value {
    let store = Store::open_in_memory(Config::default()).unwrap();
    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let query = prepare(cypher).unwrap();
            let rows: Vec<_> = query
                .execute_streaming(&snapshot, &Params::new())
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            assert_eq!(rows.len(), 1);
            Ok(rows[0].columns()[0].1.clone())
        })
        .unwrap()
}

fn lit(token: &str) -> &'static str {
    match token {
        "true" => "true",
        "false" => "false",
        _ => "null",
    }
}

fn and_truth_table() -> [[&'static str; 3]; 3] {
    // rows/cols ordered true, false, null
    [["true", "false", "null"], ["false", "false", "false"], ["null", "false", "null"]]
}

fn or_truth_table() -> [[&'static str; 3]; 3] {
    [["true", "true", "true"], ["true", "false", "null"], ["true", "null", "null"]]
}

fn xor_truth_table() -> [[&'static str; 3]; 3] {
    [["false", "true", "null"], ["true", "false", "null"], ["null", "null", "null"]]
}

#[test]
fn and_matches_every_truth_table_cell() {
    let values = ["true", "false", "null"];
    let expected = and_truth_table();
    for (i, l) in values.iter().enumerate() {
        for (j, r) in values.iter().enumerate() {
            let got = scalar(&format!("RETURN {} AND {}", lit(l), lit(r)));
            let want = expected[i][j];
            match want {
                "null" => assert_eq!(got, grafito_query::Value::Null, "{l} AND {r}"),
                "true" => assert_eq!(got, grafito_query::Value::Bool(true), "{l} AND {r}"),
                "false" => assert_eq!(got, grafito_query::Value::Bool(false), "{l} AND {r}"),
                _ => unreachable!(),
            }
        }
    }
}

#[test]
fn or_matches_every_truth_table_cell() {
    let values = ["true", "false", "null"];
    let expected = or_truth_table();
    for (i, l) in values.iter().enumerate() {
        for (j, r) in values.iter().enumerate() {
            let got = scalar(&format!("RETURN {} OR {}", lit(l), lit(r)));
            let want = expected[i][j];
            match want {
                "null" => assert_eq!(got, grafito_query::Value::Null, "{l} OR {r}"),
                "true" => assert_eq!(got, grafito_query::Value::Bool(true), "{l} OR {r}"),
                "false" => assert_eq!(got, grafito_query::Value::Bool(false), "{l} OR {r}"),
                _ => unreachable!(),
            }
        }
    }
}

#[test]
fn xor_matches_every_truth_table_cell() {
    let values = ["true", "false", "null"];
    let expected = xor_truth_table();
    for (i, l) in values.iter().enumerate() {
        for (j, r) in values.iter().enumerate() {
            let got = scalar(&format!("RETURN {} XOR {}", lit(l), lit(r)));
            let want = expected[i][j];
            match want {
                "null" => assert_eq!(got, grafito_query::Value::Null, "{l} XOR {r}"),
                "true" => assert_eq!(got, grafito_query::Value::Bool(true), "{l} XOR {r}"),
                "false" => assert_eq!(got, grafito_query::Value::Bool(false), "{l} XOR {r}"),
                _ => unreachable!(),
            }
        }
    }
}

#[test]
fn null_equals_null_is_null() {
    assert_eq!(scalar("RETURN null = null"), grafito_query::Value::Null);
}

#[test]
fn is_null_never_produces_null() {
    assert_eq!(scalar("RETURN null IS NULL"), grafito_query::Value::Bool(true));
    assert_eq!(scalar("RETURN 1 IS NULL"), grafito_query::Value::Bool(false));
    assert_eq!(scalar("RETURN null IS NOT NULL"), grafito_query::Value::Bool(false));
    assert_eq!(scalar("RETURN 1 IS NOT NULL"), grafito_query::Value::Bool(true));
}

#[test]
fn list_scalar_equality_is_membership_but_ordering_is_not() {
    assert_eq!(scalar("RETURN 2 = [1,2,3]"), grafito_query::Value::Bool(true));
    assert_eq!(scalar("RETURN 5 = [1,2,3]"), grafito_query::Value::Bool(false));
    assert_eq!(scalar("RETURN 2 <> [1,2,3]"), grafito_query::Value::Bool(false));
}

#[test]
fn not_propagates_null() {
    assert_eq!(scalar("RETURN NOT true"), grafito_query::Value::Bool(false));
    assert_eq!(scalar("RETURN NOT false"), grafito_query::Value::Bool(true));
    assert_eq!(scalar("RETURN NOT null"), grafito_query::Value::Null);
}

#[test]
fn comparison_with_null_is_null() {
    assert_eq!(scalar("RETURN 1 < null"), grafito_query::Value::Null);
    assert_eq!(scalar("RETURN null < 1"), grafito_query::Value::Null);
    assert_eq!(scalar("RETURN 1 = null"), grafito_query::Value::Null);
}
