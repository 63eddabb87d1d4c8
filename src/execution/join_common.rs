//! Shared join machinery
//!
//! Both join operators produce reference tables: per-partition position
//! lists are turned into reference segments over the input tables. When an
//! input is itself a reference table, its position lists are dereferenced
//! first so the output never stacks reference segments on reference
//! segments.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::common::constants::DEFAULT_CHUNK_SIZE;
use crate::storage::{PositionList, ReferenceSegment, Segment, Table, TableColumnDefinition, TableType};
use crate::types::{ColumnId, JoinMode, PredicateCondition, Value, NULL_ROW_ID};

/// Hash of a join key, shared by radix partitioning and hash clustering.
pub(crate) fn hash_value(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// One join predicate: a column pair and a comparison condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPredicate {
    pub column_ids: (ColumnId, ColumnId),
    pub condition: PredicateCondition,
}

impl JoinPredicate {
    pub fn new(column_ids: (ColumnId, ColumnId), condition: PredicateCondition) -> Self {
        Self {
            column_ids,
            condition,
        }
    }

    /// The same predicate as seen from swapped inputs.
    pub fn flip(&self) -> JoinPredicate {
        JoinPredicate {
            column_ids: (self.column_ids.1, self.column_ids.0),
            condition: crate::types::flip_predicate_condition(self.condition),
        }
    }
}

/// Create the (empty) output table of a join: left columns followed by right
/// columns, with nullability widened on sides that may receive null padding.
/// Semi and anti joins pass `right: None` and keep only the left columns.
pub(crate) fn build_join_output_table(
    left: &Arc<Table>,
    right: Option<&Arc<Table>>,
    mode: JoinMode,
) -> Arc<Table> {
    let left_forced_nullable = matches!(mode, JoinMode::Right | JoinMode::Outer);
    let right_forced_nullable = matches!(mode, JoinMode::Left | JoinMode::Outer);

    let mut definitions = Vec::with_capacity(
        left.column_count() + right.map_or(0, |table| table.column_count()),
    );
    for definition in left.column_definitions() {
        definitions.push(TableColumnDefinition::new(
            definition.name.clone(),
            definition.data_type,
            definition.nullable || left_forced_nullable,
        ));
    }
    if let Some(right) = right {
        for definition in right.column_definitions() {
            definitions.push(TableColumnDefinition::new(
                definition.name.clone(),
                definition.data_type,
                definition.nullable || right_forced_nullable,
            ));
        }
    }
    Arc::new(Table::new(
        definitions,
        TableType::References,
        DEFAULT_CHUNK_SIZE,
    ))
}

/// The position lists of one column of a reference table, chunk by chunk.
pub(crate) type PosLists = Vec<Arc<PositionList>>;

/// One `PosLists` handle per column. Columns whose chunks carry identical
/// position lists share the same handle, which lets output assembly reuse
/// one dereferenced list for all of them.
pub(crate) type PosListsBySegment = Vec<Arc<PosLists>>;

pub(crate) fn setup_pos_lists_by_segment(table: &Arc<Table>) -> PosListsBySegment {
    debug_assert_eq!(table.table_type(), TableType::References);
    let chunk_count = table.chunk_count();
    let mut shared: HashMap<Vec<*const PositionList>, Arc<PosLists>> = HashMap::new();
    let mut result = Vec::with_capacity(table.column_count());

    for column_id in 0..table.column_count() as ColumnId {
        let pos_lists: PosLists = (0..chunk_count)
            .map(|chunk_id| reference_pos_list(table, chunk_id, column_id))
            .collect();
        let key: Vec<*const PositionList> =
            pos_lists.iter().map(|list| Arc::as_ptr(list)).collect();
        let entry = shared
            .entry(key)
            .or_insert_with(move || Arc::new(pos_lists));
        result.push(Arc::clone(entry));
    }
    result
}

fn reference_pos_list(
    table: &Arc<Table>,
    chunk_id: crate::types::ChunkId,
    column_id: ColumnId,
) -> Arc<PositionList> {
    match table.get_chunk(chunk_id).get_segment(column_id).as_ref() {
        Segment::Reference(segment) => Arc::clone(segment.pos_list()),
        _ => panic!("reference table contains a non-reference segment"),
    }
}

/// Translate a position list over a reference table into one over the
/// referenced data table. Null padding entries stay null.
pub(crate) fn dereference_pos_list(
    input_pos_lists: &PosLists,
    pos_list: &PositionList,
) -> PositionList {
    let mut result = PositionList::with_capacity(pos_list.len());
    for row_id in pos_list {
        if row_id.is_null() {
            result.push(NULL_ROW_ID);
        } else {
            result.push(
                input_pos_lists[row_id.chunk_id as usize][row_id.chunk_offset as usize],
            );
        }
    }
    result
}

/// Append one reference segment per column of `input_table` to
/// `output_segments`, all sharing `pos_list`. Reference inputs are
/// dereferenced per column.
pub(crate) fn add_output_segments(
    output_segments: &mut Vec<Arc<Segment>>,
    input_table: &Arc<Table>,
    pos_list: &Arc<PositionList>,
) {
    for column_id in 0..input_table.column_count() as ColumnId {
        if input_table.table_type() == TableType::References {
            if input_table.chunk_count() > 0 {
                let input_pos_lists: PosLists = (0..input_table.chunk_count())
                    .map(|chunk_id| reference_pos_list(input_table, chunk_id, column_id))
                    .collect();
                let new_pos_list =
                    Arc::new(dereference_pos_list(&input_pos_lists, pos_list));
                let (referenced_table, referenced_column_id) =
                    match input_table.get_chunk(0).get_segment(column_id).as_ref() {
                        Segment::Reference(segment) => (
                            Arc::clone(segment.referenced_table()),
                            segment.referenced_column_id(),
                        ),
                        _ => panic!("reference table contains a non-reference segment"),
                    };
                output_segments.push(Arc::new(Segment::Reference(ReferenceSegment::new(
                    referenced_table,
                    referenced_column_id,
                    new_pos_list,
                ))));
            } else {
                // Without chunks the referenced table cannot be deduced; the
                // position list holds only null padding, so any data table
                // with the right schema serves as referent.
                let dummy_table =
                    Table::create_dummy_table(input_table.column_definitions().to_vec());
                output_segments.push(Arc::new(Segment::Reference(ReferenceSegment::new(
                    dummy_table,
                    column_id,
                    Arc::clone(pos_list),
                ))));
            }
        } else {
            output_segments.push(Arc::new(Segment::Reference(ReferenceSegment::new(
                Arc::clone(input_table),
                column_id,
                Arc::clone(pos_list),
            ))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, RowId, Value};

    fn data_table() -> Arc<Table> {
        let table = Table::new_data_table(vec![
            TableColumnDefinition::new("a", DataType::Int, false),
            TableColumnDefinition::new("b", DataType::Int, false),
        ]);
        for i in 0..4 {
            table
                .append(vec![Some(Value::Int(i)), Some(Value::Int(i * 10))])
                .unwrap();
        }
        Arc::new(table)
    }

    #[test]
    fn test_join_predicate_flip() {
        let predicate = JoinPredicate::new((0, 2), PredicateCondition::LessThan);
        let flipped = predicate.flip();
        assert_eq!(flipped.column_ids, (2, 0));
        assert_eq!(flipped.condition, PredicateCondition::GreaterThan);
        assert_eq!(flipped.flip(), predicate);
    }

    #[test]
    fn test_output_table_widens_nullability() {
        let left = data_table();
        let right = data_table();
        let output = build_join_output_table(&left, Some(&right), JoinMode::Left);
        assert_eq!(output.column_count(), 4);
        assert!(!output.column_is_nullable(0));
        assert!(output.column_is_nullable(2));
        assert_eq!(output.table_type(), TableType::References);
    }

    #[test]
    fn test_pos_lists_by_segment_shares_identical_lists() {
        let data = data_table();
        let pos_list = Arc::new(PositionList::from_row_ids(vec![
            RowId::new(0, 2),
            RowId::new(0, 0),
        ]));
        let reference_table = Arc::new(Table::new(
            data.column_definitions().to_vec(),
            TableType::References,
            DEFAULT_CHUNK_SIZE,
        ));
        let segments = vec![
            Arc::new(Segment::Reference(ReferenceSegment::new(
                Arc::clone(&data),
                0,
                Arc::clone(&pos_list),
            ))),
            Arc::new(Segment::Reference(ReferenceSegment::new(
                Arc::clone(&data),
                1,
                Arc::clone(&pos_list),
            ))),
        ];
        reference_table.append_chunk(segments).unwrap();

        let by_segment = setup_pos_lists_by_segment(&reference_table);
        assert_eq!(by_segment.len(), 2);
        assert!(Arc::ptr_eq(&by_segment[0], &by_segment[1]));
    }

    #[test]
    fn test_dereference_keeps_nulls() {
        let inner = Arc::new(PositionList::from_row_ids(vec![
            RowId::new(0, 3),
            RowId::new(0, 1),
        ]));
        let input_pos_lists: PosLists = vec![inner];
        let mut outer = PositionList::new();
        outer.push(RowId::new(0, 1));
        outer.push(NULL_ROW_ID);
        let dereferenced = dereference_pos_list(&input_pos_lists, &outer);
        assert_eq!(dereferenced[0], RowId::new(0, 1));
        assert!(dereferenced[1].is_null());
    }
}
