//! UNWIND/WITH/aggregation pipeline (spec §4.7, §8 scenario 3) and the
//! core aggregate functions' empty-group behavior (§4.6: every aggregate
//! over an empty group yields null except `count` -> 0 and `collect` ->
//! the empty list).

use grafito_query::{prepare, Params, Value};
use grafito_storage::snapshot::Snapshot;
use grafito_storage::{Config, Store};

fn rows(cypher: &str) -> Vec<grafito_query::Row> {
    let store = Store::open_in_memory(Config::default()).unwrap();
    store
        .scope(|tx| {
            let snapshot = Snapshot::new(tx.connection());
            let query = prepare(cypher).unwrap();
            let rows: Vec<_> = query
                .execute_streaming(&snapshot, &Params::new())
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            Ok(rows)
        })
        .unwrap()
}

#[test]
fn unwind_with_where_collect_yields_filtered_list() {
    let rows = rows("UNWIND [1,2,3] AS x WITH x WHERE x>1 RETURN collect(x)");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].columns()[0].1,
        Value::List(vec![Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn unwind_expands_one_frame_per_element() {
    let rows = rows("UNWIND [10,20,30] AS x RETURN x");
    let values: Vec<_> = rows.iter().map(|r| r.get("x").cloned().unwrap()).collect();
    assert_eq!(values, vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
}

#[test]
fn count_over_empty_input_is_zero() {
    let rows = rows("UNWIND [] AS x RETURN count(x)");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns()[0].1, Value::Int(0));
}

#[test]
fn collect_over_empty_input_is_empty_list() {
    let rows = rows("UNWIND [] AS x RETURN collect(x)");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns()[0].1, Value::List(vec![]));
}

#[test]
fn sum_over_empty_input_is_null() {
    let rows = rows("UNWIND [] AS x RETURN sum(x)");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns()[0].1, Value::Null);
}

#[test]
fn count_star_counts_rows_including_nulls() {
    let rows = rows("UNWIND [1, null, 3] AS x RETURN count(*)");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns()[0].1, Value::Int(3));
}

#[test]
fn count_distinct_deduplicates() {
    let rows = rows("UNWIND [1,1,2,2,3] AS x RETURN count(DISTINCT x)");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns()[0].1, Value::Int(3));
}

#[test]
fn min_max_avg_over_a_simple_group() {
    let rows = rows("UNWIND [1,2,3,4] AS x RETURN min(x), max(x), avg(x)");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("min(x)"), Some(&Value::Int(1)));
    assert_eq!(row.get("max(x)"), Some(&Value::Int(4)));
    assert_eq!(row.get("avg(x)"), Some(&Value::Float(2.5)));
}

#[test]
fn order_by_defaults_ascending_with_nulls_last() {
    let rows = rows("UNWIND [3, null, 1, 2] AS x RETURN x ORDER BY x");
    let values: Vec<_> = rows.iter().map(|r| r.get("x").cloned().unwrap()).collect();
    assert_eq!(
        values,
        vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Null]
    );
}

#[test]
fn distinct_deduplicates_by_value_equality() {
    let rows = rows("UNWIND [1,1,2,2,3] AS x RETURN DISTINCT x ORDER BY x");
    let values: Vec<_> = rows.iter().map(|r| r.get("x").cloned().unwrap()).collect();
    assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn skip_and_limit_paginate() {
    let rows = rows("UNWIND [1,2,3,4,5] AS x RETURN x ORDER BY x SKIP 1 LIMIT 2");
    let values: Vec<_> = rows.iter().map(|r| r.get("x").cloned().unwrap()).collect();
    assert_eq!(values, vec![Value::Int(2), Value::Int(3)]);
}
