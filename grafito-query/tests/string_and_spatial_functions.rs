//! Built-in library coverage spec §4.6 calls out beyond the core
//! string/collection/path/temporal set: regex matching (`=~`/`matches`),
//! the `deaccent`/`strip_html`/`strip_emoji`/`snake_case`/`levenshtein`/
//! `jaccard` string helpers, spatial `point`/`distance`, the `apoc.text.*`/
//! `apoc.map.*`/`apoc.convert.toMap`/`apoc.coll.*` subset, and the
//! `stdDev`/`stdDevP`/`percentileCont`/`percentileDisc` aggregates.

use grafito_query::{Params, prepare};
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

fn as_bool(v: grafito_query::Value) -> bool {
    matches!(v, grafito_query::Value::Bool(true))
}

fn as_f64(v: grafito_query::Value) -> f64 {
    match v {
        grafito_query::Value::Float(f) => f,
        grafito_query::Value::Int(i) => i as f64,
        other => panic!("expected numeric, got {other:?}"),
    }
}

#[test]
fn regex_match_operator_anchors_the_whole_string() {
    assert!(as_bool(scalar("RETURN 'hello123' =~ '[a-z]+[0-9]+'")));
    assert!(!as_bool(scalar("RETURN 'hello123world' =~ '[a-z]+[0-9]+'")));
}

#[test]
fn regex_match_propagates_null() {
    assert!(matches!(
        scalar("RETURN null =~ '.*'"),
        grafito_query::Value::Null
    ));
}

#[test]
fn matches_function_matches_operator() {
    assert!(as_bool(scalar("RETURN matches('abc', 'a.c')")));
    assert!(!as_bool(scalar("RETURN matches('abcd', 'a.c')")));
}

#[test]
fn levenshtein_distance() {
    assert_eq!(as_f64(scalar("RETURN levenshtein('kitten', 'sitting')")), 3.0);
    assert_eq!(as_f64(scalar("RETURN levenshtein('same', 'same')")), 0.0);
}

#[test]
fn jaccard_similarity_of_identical_strings_is_one() {
    assert_eq!(as_f64(scalar("RETURN jaccard('hello', 'hello')")), 1.0);
}

#[test]
fn snake_case_converts_camel_case() {
    assert_eq!(
        scalar("RETURN snake_case('helloWorldAgain')"),
        grafito_query::Value::String("hello_world_again".to_string())
    );
}

#[test]
fn deaccent_strips_diacritics() {
    assert_eq!(
        scalar("RETURN deaccent('café')"),
        grafito_query::Value::String("cafe".to_string())
    );
}

#[test]
fn strip_html_removes_tags() {
    assert_eq!(
        scalar("RETURN strip_html('<b>bold</b> text')"),
        grafito_query::Value::String("bold text".to_string())
    );
}

#[test]
fn point_distance_cartesian() {
    let v = scalar("RETURN distance(point({x: 0, y: 0}), point({x: 3, y: 4}))");
    assert_eq!(as_f64(v), 5.0);
}

#[test]
fn point_distance_geographic_is_positive_for_distinct_points() {
    let v = scalar(
        "RETURN distance(point({longitude: 0.0, latitude: 0.0}), point({longitude: 1.0, latitude: 1.0}))",
    );
    assert!(as_f64(v) > 0.0);
}

#[test]
fn apoc_coll_sum_and_sort() {
    assert_eq!(as_f64(scalar("RETURN apoc.coll.sum([1, 2, 3])")), 6.0);
    let sorted = scalar("RETURN apoc.coll.sort([3, 1, 2])");
    assert_eq!(
        sorted,
        grafito_query::Value::List(vec![
            grafito_query::Value::Int(1),
            grafito_query::Value::Int(2),
            grafito_query::Value::Int(3),
        ])
    );
}

#[test]
fn apoc_text_join_and_capitalize() {
    assert_eq!(
        scalar("RETURN apoc.text.join(['a', 'b', 'c'], '-')"),
        grafito_query::Value::String("a-b-c".to_string())
    );
    assert_eq!(
        scalar("RETURN apoc.text.capitalize('hello')"),
        grafito_query::Value::String("Hello".to_string())
    );
}

#[test]
fn stddev_and_percentile_aggregates() {
    let store = Store::open_in_memory(Config::default()).unwrap();
    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let query = prepare(
                "UNWIND [1, 2, 3, 4, 5] AS x RETURN stdDev(x) AS sd, percentileCont(x, 0.5) AS p50",
            )
            .unwrap();
            let rows: Vec<_> = query
                .execute_streaming(&snapshot, &Params::new())
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            assert_eq!(rows.len(), 1);
            let sd = as_f64(rows[0].columns()[0].1.clone());
            // sample std dev of [1..5] is sqrt(2.5) ~= 1.5811
            assert!((sd - 1.5811388300841898).abs() < 1e-9);
            let p50 = as_f64(rows[0].columns()[1].1.clone());
            assert_eq!(p50, 3.0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn stddev_of_singleton_group_is_null() {
    assert!(matches!(
        scalar("UNWIND [1] AS x RETURN stdDev(x)"),
        grafito_query::Value::Null
    ));
}
