//! Hash join integration tests

use std::sync::Arc;

use quartzdb::{
    AbstractOperator, ColumnId, DataType, JoinHash, JoinMode, JoinPredicate, JoinSortMerge,
    PredicateCondition, SegmentAccessor, Table, TableColumnDefinition, TableType, TableWrapper,
    Value,
};

fn wrap(table: Arc<Table>) -> Arc<TableWrapper> {
    let wrapper = TableWrapper::new(table);
    wrapper.execute().unwrap();
    wrapper
}

fn kv_table(rows: &[(i32, &str)]) -> Arc<TableWrapper> {
    let table = Table::new(
        vec![
            TableColumnDefinition::new("k", DataType::Int, false),
            TableColumnDefinition::new("v", DataType::Varchar, false),
        ],
        TableType::Data,
        3,
    );
    for (key, value) in rows {
        table
            .append(vec![Some(Value::Int(*key)), Some(Value::from(*value))])
            .unwrap();
    }
    wrap(Arc::new(table))
}

fn nullable_key_table(keys: &[Option<i32>]) -> Arc<TableWrapper> {
    let table = Table::new(
        vec![TableColumnDefinition::new("k", DataType::Int, true)],
        TableType::Data,
        4,
    );
    for key in keys {
        table.append(vec![key.map(Value::Int)]).unwrap();
    }
    wrap(Arc::new(table))
}

fn key_table(keys: &[i32]) -> Arc<TableWrapper> {
    nullable_key_table(&keys.iter().map(|&key| Some(key)).collect::<Vec<_>>())
}

fn collect_rows(table: &Arc<Table>) -> Vec<Vec<Option<Value>>> {
    let mut rows = Vec::new();
    for chunk_id in 0..table.chunk_count() {
        let chunk = table.get_chunk(chunk_id);
        let accessors: Vec<SegmentAccessor> = (0..table.column_count())
            .map(|column_id| SegmentAccessor::new(chunk.get_segment(column_id as ColumnId)))
            .collect();
        for offset in 0..chunk.size() {
            rows.push(
                accessors
                    .iter()
                    .map(|accessor| accessor.value(offset))
                    .collect(),
            );
        }
    }
    rows
}

fn sorted_row_set(rows: &[Vec<Option<Value>>]) -> Vec<String> {
    let mut formatted: Vec<String> = rows.iter().map(|row| format!("{row:?}")).collect();
    formatted.sort();
    formatted
}

fn int_row(values: &[Option<i32>]) -> Vec<Option<Value>> {
    values.iter().map(|value| value.map(Value::Int)).collect()
}

fn run_hash_join(
    left: Arc<TableWrapper>,
    right: Arc<TableWrapper>,
    mode: JoinMode,
    radix_bits: Option<usize>,
) -> Vec<Vec<Option<Value>>> {
    let join = JoinHash::new(
        left,
        right,
        mode,
        (0, 0),
        PredicateCondition::Equals,
        radix_bits,
        Vec::new(),
    );
    join.execute().unwrap();
    collect_rows(&join.get_output())
}

#[test]
fn test_inner_equi_join() {
    let left = kv_table(&[(1, "a"), (2, "b")]);
    let right = kv_table(&[(2, "x"), (2, "y"), (3, "z")]);
    let rows = run_hash_join(left, right, JoinMode::Inner, None);
    assert_eq!(
        rows,
        vec![
            vec![
                Some(Value::Int(2)),
                Some(Value::from("b")),
                Some(Value::Int(2)),
                Some(Value::from("x")),
            ],
            vec![
                Some(Value::Int(2)),
                Some(Value::from("b")),
                Some(Value::Int(2)),
                Some(Value::from("y")),
            ],
        ]
    );
}

#[test]
fn test_left_outer_join() {
    let left = kv_table(&[(1, "a"), (2, "b")]);
    let right = kv_table(&[(2, "x"), (2, "y"), (3, "z")]);
    let rows = run_hash_join(left, right, JoinMode::Left, None);
    assert_eq!(
        rows,
        vec![
            vec![Some(Value::Int(1)), Some(Value::from("a")), None, None],
            vec![
                Some(Value::Int(2)),
                Some(Value::from("b")),
                Some(Value::Int(2)),
                Some(Value::from("x")),
            ],
            vec![
                Some(Value::Int(2)),
                Some(Value::from("b")),
                Some(Value::Int(2)),
                Some(Value::from("y")),
            ],
        ]
    );
}

#[test]
fn test_semi_join_keeps_left_input_order() {
    let left = key_table(&[1, 2, 3]);
    let right = key_table(&[2, 3, 3, 4]);
    let rows = run_hash_join(left, right, JoinMode::Semi, None);
    assert_eq!(rows, vec![int_row(&[Some(2)]), int_row(&[Some(3)])]);
}

#[test]
fn test_anti_join() {
    let left = key_table(&[1, 2, 3]);
    let right = key_table(&[2, 3, 3, 4]);
    let rows = run_hash_join(left, right, JoinMode::Anti, None);
    assert_eq!(rows, vec![int_row(&[Some(1)])]);
}

#[test]
fn test_right_outer_join() {
    let left = kv_table(&[(1, "a"), (2, "b")]);
    let right = kv_table(&[(2, "x"), (5, "q")]);
    let rows = run_hash_join(left, right, JoinMode::Right, None);
    assert_eq!(
        sorted_row_set(&rows),
        sorted_row_set(&[
            vec![
                Some(Value::Int(2)),
                Some(Value::from("b")),
                Some(Value::Int(2)),
                Some(Value::from("x")),
            ],
            vec![None, None, Some(Value::Int(5)), Some(Value::from("q"))],
        ])
    );
}

#[test]
fn test_full_outer_join_pads_both_sides() {
    let left = key_table(&[1, 2]);
    let right = key_table(&[2, 7]);
    let rows = run_hash_join(left, right, JoinMode::Outer, None);
    assert_eq!(
        sorted_row_set(&rows),
        sorted_row_set(&[
            int_row(&[Some(1), None]),
            int_row(&[Some(2), Some(2)]),
            int_row(&[None, Some(7)]),
        ])
    );
}

#[test]
fn test_null_keys_never_match() {
    let left = nullable_key_table(&[Some(1), None, Some(2)]);
    let right = nullable_key_table(&[Some(1), None]);
    let rows = run_hash_join(Arc::clone(&left), Arc::clone(&right), JoinMode::Inner, None);
    assert_eq!(rows, vec![int_row(&[Some(1), Some(1)])]);

    // The null-keyed left row surfaces padded in the left outer join.
    let rows = run_hash_join(left, right, JoinMode::Left, None);
    assert_eq!(
        sorted_row_set(&rows),
        sorted_row_set(&[
            int_row(&[Some(1), Some(1)]),
            int_row(&[None, None]),
            int_row(&[Some(2), None]),
        ])
    );
}

#[test]
fn test_semi_and_anti_partition_the_left_input() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let left_keys: Vec<Option<i32>> = (0..80)
        .map(|_| {
            if rng.gen_bool(0.1) {
                None
            } else {
                Some(rng.gen_range(0..15))
            }
        })
        .collect();
    let right_keys: Vec<i32> = (0..40).map(|_| rng.gen_range(0..15)).collect();

    let left = nullable_key_table(&left_keys);
    let right = key_table(&right_keys);

    let semi_rows = run_hash_join(Arc::clone(&left), Arc::clone(&right), JoinMode::Semi, None);
    let anti_rows = run_hash_join(left, right, JoinMode::Anti, None);

    assert_eq!(semi_rows.len() + anti_rows.len(), left_keys.len());
    let semi_set = sorted_row_set(&semi_rows);
    for row in &anti_rows {
        assert!(!semi_set.contains(&format!("{row:?}")));
    }
}

#[test]
fn test_inner_join_multiplicity() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let left_keys: Vec<i32> = (0..60).map(|_| rng.gen_range(0..10)).collect();
    let right_keys: Vec<i32> = (0..50).map(|_| rng.gen_range(0..10)).collect();

    let expected: usize = (0..10)
        .map(|key| {
            let left_count = left_keys.iter().filter(|&&k| k == key).count();
            let right_count = right_keys.iter().filter(|&&k| k == key).count();
            left_count * right_count
        })
        .sum();

    let rows = run_hash_join(
        key_table(&left_keys),
        key_table(&right_keys),
        JoinMode::Inner,
        None,
    );
    assert_eq!(rows.len(), expected);
}

#[test]
fn test_swap_invariance() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let left_keys: Vec<i32> = (0..40).map(|_| rng.gen_range(0..8)).collect();
    let right_keys: Vec<i32> = (0..70).map(|_| rng.gen_range(0..8)).collect();

    let forward = run_hash_join(
        key_table(&left_keys),
        key_table(&right_keys),
        JoinMode::Inner,
        None,
    );
    let backward = run_hash_join(
        key_table(&right_keys),
        key_table(&left_keys),
        JoinMode::Inner,
        None,
    );

    // Mirror the backward rows into left-then-right order before comparing.
    let mirrored: Vec<Vec<Option<Value>>> = backward
        .into_iter()
        .map(|row| vec![row[1].clone(), row[0].clone()])
        .collect();
    assert_eq!(sorted_row_set(&forward), sorted_row_set(&mirrored));
}

#[test]
fn test_explicit_radix_bits_match_single_partition_results() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let left_keys: Vec<i32> = (0..200).map(|_| rng.gen_range(0..25)).collect();
    let right_keys: Vec<i32> = (0..150).map(|_| rng.gen_range(0..25)).collect();

    let partitioned = run_hash_join(
        key_table(&left_keys),
        key_table(&right_keys),
        JoinMode::Inner,
        Some(3),
    );
    let single = run_hash_join(
        key_table(&left_keys),
        key_table(&right_keys),
        JoinMode::Inner,
        Some(0),
    );
    assert_eq!(sorted_row_set(&partitioned), sorted_row_set(&single));
}

#[test]
fn test_additional_predicates_filter_pairs() {
    let make_side = |rows: &[(i32, i32)]| {
        let table = Table::new(
            vec![
                TableColumnDefinition::new("k", DataType::Int, false),
                TableColumnDefinition::new("p", DataType::Int, false),
            ],
            TableType::Data,
            4,
        );
        for (key, payload) in rows {
            table
                .append(vec![Some(Value::Int(*key)), Some(Value::Int(*payload))])
                .unwrap();
        }
        wrap(Arc::new(table))
    };
    let left = make_side(&[(1, 10), (1, 11), (2, 20)]);
    let right = make_side(&[(1, 10), (1, 12), (2, 20)]);

    let join = JoinHash::new(
        left,
        right,
        JoinMode::Inner,
        (0, 0),
        PredicateCondition::Equals,
        None,
        vec![JoinPredicate::new((1, 1), PredicateCondition::Equals)],
    );
    join.execute().unwrap();
    let rows = collect_rows(&join.get_output());
    assert_eq!(
        sorted_row_set(&rows),
        sorted_row_set(&[
            int_row(&[Some(1), Some(10), Some(1), Some(10)]),
            int_row(&[Some(2), Some(20), Some(2), Some(20)]),
        ])
    );
}

#[test]
fn test_additional_predicates_apply_to_semi_joins() {
    let make_side = |rows: &[(i32, i32)]| {
        let table = Table::new(
            vec![
                TableColumnDefinition::new("k", DataType::Int, false),
                TableColumnDefinition::new("p", DataType::Int, false),
            ],
            TableType::Data,
            4,
        );
        for (key, payload) in rows {
            table
                .append(vec![Some(Value::Int(*key)), Some(Value::Int(*payload))])
                .unwrap();
        }
        wrap(Arc::new(table))
    };
    let left = make_side(&[(1, 10), (2, 20)]);
    let right = make_side(&[(1, 99), (2, 20)]);

    let join = JoinHash::new(
        left,
        right,
        JoinMode::Semi,
        (0, 0),
        PredicateCondition::Equals,
        None,
        vec![JoinPredicate::new((1, 1), PredicateCondition::Equals)],
    );
    join.execute().unwrap();
    let rows = collect_rows(&join.get_output());
    assert_eq!(rows, vec![int_row(&[Some(2), Some(20)])]);
}

#[test]
fn test_reference_inputs_are_dereferenced() {
    let base_left = kv_table(&[(1, "a"), (2, "b"), (3, "c")]);
    let base_right = kv_table(&[(2, "x"), (3, "y")]);

    // First join produces a reference table.
    let first = JoinHash::new(
        base_left,
        base_right,
        JoinMode::Inner,
        (0, 0),
        PredicateCondition::Equals,
        None,
        Vec::new(),
    );
    first.execute().unwrap();
    let intermediate = first.get_output();
    assert_eq!(intermediate.table_type(), TableType::References);

    // Joining the reference table again must not stack references.
    let other = kv_table(&[(2, "q"), (3, "r")]);
    let second = JoinHash::new(
        wrap(intermediate),
        other,
        JoinMode::Inner,
        (0, 0),
        PredicateCondition::Equals,
        None,
        Vec::new(),
    );
    second.execute().unwrap();
    let output = second.get_output();

    for chunk_id in 0..output.chunk_count() {
        let chunk = output.get_chunk(chunk_id);
        for column_id in 0..output.column_count() {
            match chunk.get_segment(column_id as ColumnId).as_ref() {
                quartzdb::Segment::Reference(segment) => {
                    assert_eq!(segment.referenced_table().table_type(), TableType::Data);
                }
                _ => panic!("join output must consist of reference segments"),
            }
        }
    }
    let rows = collect_rows(&output);
    assert_eq!(
        sorted_row_set(&rows),
        sorted_row_set(&[
            vec![
                Some(Value::Int(2)),
                Some(Value::from("b")),
                Some(Value::Int(2)),
                Some(Value::from("x")),
                Some(Value::Int(2)),
                Some(Value::from("q")),
            ],
            vec![
                Some(Value::Int(3)),
                Some(Value::from("c")),
                Some(Value::Int(3)),
                Some(Value::from("y")),
                Some(Value::Int(3)),
                Some(Value::from("r")),
            ],
        ])
    );
}

#[test]
fn test_dictionary_encoded_inputs() {
    let table = Table::new(
        vec![
            TableColumnDefinition::new("k", DataType::Int, false),
            TableColumnDefinition::new("v", DataType::Varchar, false),
        ],
        TableType::Data,
        2,
    );
    for (key, value) in [(1, "a"), (2, "b"), (2, "c"), (4, "d")] {
        table
            .append(vec![Some(Value::Int(key)), Some(Value::from(value))])
            .unwrap();
    }
    table.finalize_last_chunk();
    for chunk_id in 0..table.chunk_count() {
        table.get_chunk(chunk_id).encode_dictionary().unwrap();
    }

    let left = wrap(Arc::new(table));
    let right = kv_table(&[(2, "x"), (4, "y")]);
    let rows = run_hash_join(left, right, JoinMode::Inner, None);
    assert_eq!(rows.len(), 3);
}

#[test]
fn test_hash_join_matches_sort_merge_on_equi_inputs() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let left_keys: Vec<i32> = (0..100).map(|_| rng.gen_range(0..20)).collect();
    let right_keys: Vec<i32> = (0..80).map(|_| rng.gen_range(0..20)).collect();

    let hash_rows = run_hash_join(
        key_table(&left_keys),
        key_table(&right_keys),
        JoinMode::Inner,
        None,
    );

    let merge = JoinSortMerge::new(
        key_table(&left_keys),
        key_table(&right_keys),
        JoinMode::Inner,
        (0, 0),
        PredicateCondition::Equals,
    );
    merge.execute().unwrap();
    let merge_rows = collect_rows(&merge.get_output());

    assert_eq!(sorted_row_set(&hash_rows), sorted_row_set(&merge_rows));
}

#[test]
fn test_deep_copy_is_independent() {
    let left = kv_table(&[(1, "a"), (2, "b")]);
    let right = kv_table(&[(2, "x")]);
    let join = JoinHash::new(
        left,
        right,
        JoinMode::Inner,
        (0, 0),
        PredicateCondition::Equals,
        None,
        Vec::new(),
    );
    let copy = join.deep_copy();

    fn execute_tree(operator: &Arc<dyn AbstractOperator>) {
        for input in operator.inputs() {
            execute_tree(&input);
        }
        operator.execute().unwrap();
    }

    join.execute().unwrap();
    execute_tree(&copy);
    assert_eq!(
        sorted_row_set(&collect_rows(&join.get_output())),
        sorted_row_set(&collect_rows(&copy.get_output()))
    );
}

#[test]
fn test_description_names_mode_and_columns() {
    let left = kv_table(&[(1, "a")]);
    let right = kv_table(&[(1, "b")]);
    let join = JoinHash::new(
        left,
        right,
        JoinMode::Semi,
        (0, 0),
        PredicateCondition::Equals,
        None,
        Vec::new(),
    );
    let description = join.description(quartzdb::DescriptionMode::SingleLine);
    assert!(description.contains("JoinHash"));
    assert!(description.contains("Semi"));
}

#[test]
fn test_mismatched_key_types_are_rejected() {
    let left = key_table(&[1, 2]);
    let long_table = Table::new(
        vec![TableColumnDefinition::new("k", DataType::Long, false)],
        TableType::Data,
        4,
    );
    long_table.append(vec![Some(Value::Long(1))]).unwrap();
    let right = wrap(Arc::new(long_table));

    let join = JoinHash::new(
        left,
        right,
        JoinMode::Inner,
        (0, 0),
        PredicateCondition::Equals,
        None,
        Vec::new(),
    );
    assert!(join.execute().is_err());
}
