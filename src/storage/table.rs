//! Table storage
//!
//! A table is an ordered sequence of chunks plus an immutable column schema.
//! Data tables store values; reference tables hold reference segments that
//! indirect into data tables.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::common::constants::DEFAULT_CHUNK_SIZE;
use crate::common::{QuartzError, QuartzResult};
use crate::storage::chunk::Chunk;
use crate::storage::segment::Segment;
use crate::types::{ChunkId, ColumnId, DataType, RowId, Value};

/// Name, type and nullability of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl TableColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Whether a table's segments store values or references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    Data,
    References,
}

/// An ordered sequence of chunks with a fixed column schema.
#[derive(Debug)]
pub struct Table {
    column_definitions: Vec<TableColumnDefinition>,
    table_type: TableType,
    target_chunk_size: usize,
    chunks: RwLock<Vec<Arc<Chunk>>>,
}

impl Table {
    pub fn new(
        column_definitions: Vec<TableColumnDefinition>,
        table_type: TableType,
        target_chunk_size: usize,
    ) -> Self {
        assert!(target_chunk_size > 0, "chunk size must be positive");
        Self {
            column_definitions,
            table_type,
            target_chunk_size,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub fn new_data_table(column_definitions: Vec<TableColumnDefinition>) -> Self {
        Self::new(column_definitions, TableType::Data, DEFAULT_CHUNK_SIZE)
    }

    /// An empty data table carrying only a schema. Reference segments over
    /// all-null position lists use this when the referenced table cannot be
    /// deduced from an input without chunks.
    pub fn create_dummy_table(column_definitions: Vec<TableColumnDefinition>) -> Arc<Table> {
        Arc::new(Self::new_data_table(column_definitions))
    }

    pub fn column_definitions(&self) -> &[TableColumnDefinition] {
        &self.column_definitions
    }

    pub fn column_count(&self) -> usize {
        self.column_definitions.len()
    }

    pub fn column_name(&self, column_id: ColumnId) -> &str {
        &self.column_definitions[column_id as usize].name
    }

    pub fn column_data_type(&self, column_id: ColumnId) -> DataType {
        self.column_definitions[column_id as usize].data_type
    }

    pub fn column_is_nullable(&self, column_id: ColumnId) -> bool {
        self.column_definitions[column_id as usize].nullable
    }

    pub fn column_id_by_name(&self, name: &str) -> Option<ColumnId> {
        self.column_definitions
            .iter()
            .position(|definition| definition.name == name)
            .map(|index| index as ColumnId)
    }

    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    pub fn target_chunk_size(&self) -> usize {
        self.target_chunk_size
    }

    pub fn row_count(&self) -> usize {
        self.chunks.read().iter().map(|chunk| chunk.size()).sum()
    }

    pub fn chunk_count(&self) -> ChunkId {
        self.chunks.read().len() as ChunkId
    }

    pub fn get_chunk(&self, chunk_id: ChunkId) -> Arc<Chunk> {
        let chunks = self.chunks.read();
        assert!(
            (chunk_id as usize) < chunks.len(),
            "chunk id {chunk_id} out of range"
        );
        Arc::clone(&chunks[chunk_id as usize])
    }

    /// Append one row to the last mutable chunk, starting a new chunk when
    /// the current one has reached the target size. Full chunks are
    /// finalized as a side effect.
    pub fn append(&self, row: Vec<Option<Value>>) -> QuartzResult<()> {
        if self.table_type != TableType::Data {
            return Err(QuartzError::Storage(
                "rows can only be appended to data tables".to_string(),
            ));
        }
        if row.len() != self.column_count() {
            return Err(QuartzError::InvalidArgument(format!(
                "row arity {} does not match column count {}",
                row.len(),
                self.column_count()
            )));
        }

        let chunk = {
            let mut chunks = self.chunks.write();
            let needs_new_chunk = match chunks.last() {
                Some(chunk) => chunk.is_finalized() || chunk.size() >= self.target_chunk_size,
                None => true,
            };
            if needs_new_chunk {
                if let Some(last) = chunks.last() {
                    last.finalize();
                }
                chunks.push(Arc::new(Chunk::new_mutable(
                    self.column_definitions
                        .iter()
                        .map(|definition| (definition.data_type, definition.nullable)),
                )));
            }
            Arc::clone(chunks.last().unwrap())
        };
        chunk.append_row(&row)
    }

    /// Append a pre-built chunk from one segment per column. The chunk is
    /// finalized immediately.
    pub fn append_chunk(&self, segments: Vec<Arc<Segment>>) -> QuartzResult<()> {
        if segments.len() != self.column_count() {
            return Err(QuartzError::InvalidArgument(format!(
                "segment count {} does not match column count {}",
                segments.len(),
                self.column_count()
            )));
        }
        let row_count = segments.first().map_or(0, |segment| segment.len());
        if segments.iter().any(|segment| segment.len() != row_count) {
            return Err(QuartzError::InvalidArgument(
                "all segments of a chunk must have the same length".to_string(),
            ));
        }
        let chunk = Chunk::new(segments);
        chunk.finalize();
        self.chunks.write().push(Arc::new(chunk));
        Ok(())
    }

    /// Finalize the last chunk, if any.
    pub fn finalize_last_chunk(&self) {
        if let Some(chunk) = self.chunks.read().last() {
            chunk.finalize();
        }
    }

    /// The value at a row/column address, or `None` for null.
    pub fn value_at(&self, column_id: ColumnId, row_id: RowId) -> Option<Value> {
        let chunk = self.get_chunk(row_id.chunk_id);
        chunk
            .get_segment(column_id)
            .value_at(row_id.chunk_offset as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_table(target_chunk_size: usize) -> Table {
        Table::new(
            vec![
                TableColumnDefinition::new("a", DataType::Int, false),
                TableColumnDefinition::new("b", DataType::Varchar, true),
            ],
            TableType::Data,
            target_chunk_size,
        )
    }

    #[test]
    fn test_append_rolls_chunks() {
        let table = test_table(2);
        for i in 0..5 {
            table
                .append(vec![Some(Value::Int(i)), Some(Value::from("x"))])
                .unwrap();
        }
        assert_eq!(table.row_count(), 5);
        assert_eq!(table.chunk_count(), 3);
        assert!(table.get_chunk(0).is_finalized());
        assert!(table.get_chunk(1).is_finalized());
        assert!(!table.get_chunk(2).is_finalized());
    }

    #[test]
    fn test_value_at() {
        let table = test_table(2);
        table.append(vec![Some(Value::Int(1)), None]).unwrap();
        table
            .append(vec![Some(Value::Int(2)), Some(Value::from("y"))])
            .unwrap();
        table.append(vec![Some(Value::Int(3)), None]).unwrap();

        assert_eq!(table.value_at(0, RowId::new(1, 0)), Some(Value::Int(3)));
        assert_eq!(table.value_at(1, RowId::new(0, 0)), None);
        assert_eq!(table.value_at(1, RowId::new(0, 1)), Some(Value::from("y")));
    }

    #[test]
    fn test_append_arity_checked() {
        let table = test_table(2);
        assert!(table.append(vec![Some(Value::Int(1))]).is_err());
    }

    #[test]
    fn test_column_lookup() {
        let table = test_table(10);
        assert_eq!(table.column_id_by_name("b"), Some(1));
        assert_eq!(table.column_id_by_name("missing"), None);
        assert_eq!(table.column_data_type(0), DataType::Int);
        assert!(table.column_is_nullable(1));
    }
}
