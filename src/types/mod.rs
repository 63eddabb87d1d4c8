//! Core identifiers and enums shared across storage, scheduling and
//! execution: chunk/column/row addressing, join modes and predicate
//! conditions, and the engine's value type.

pub mod validity;
pub mod value;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use validity::ValidityMask;
pub use value::{DataType, Value};

/// Index of a chunk within a table.
pub type ChunkId = u32;
/// Index of a row within a chunk.
pub type ChunkOffset = u32;
/// Index of a column within a table.
pub type ColumnId = u16;
/// Identifier of a NUMA node in the scheduler topology.
pub type NodeId = u32;
/// Identifier of a scheduler worker.
pub type WorkerId = u32;
/// Identifier of a task; unique per process.
pub type TaskId = u64;
/// Monotonic commit id issued by the transaction manager.
pub type CommitId = u32;

/// Commit id of rows that have not been invalidated.
pub const MAX_COMMIT_ID: CommitId = CommitId::MAX;

const NULL_CHUNK_ID: ChunkId = ChunkId::MAX;
const NULL_CHUNK_OFFSET: ChunkOffset = ChunkOffset::MAX;

/// Address of a single row: the chunk it lives in and its offset therein.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId {
    pub chunk_id: ChunkId,
    pub chunk_offset: ChunkOffset,
}

/// Reserved row id denoting outer-join null padding.
pub const NULL_ROW_ID: RowId = RowId {
    chunk_id: NULL_CHUNK_ID,
    chunk_offset: NULL_CHUNK_OFFSET,
};

impl RowId {
    pub fn new(chunk_id: ChunkId, chunk_offset: ChunkOffset) -> Self {
        Self {
            chunk_id,
            chunk_offset,
        }
    }

    /// Whether this row id is the reserved null padding marker.
    #[inline]
    pub fn is_null(&self) -> bool {
        *self == NULL_ROW_ID
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "RowId(NULL)")
        } else {
            write!(f, "RowId({}, {})", self.chunk_id, self.chunk_offset)
        }
    }
}

/// The supported join variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinMode {
    Inner,
    Left,
    Right,
    Outer,
    Semi,
    Anti,
    Cross,
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinMode::Inner => "Inner",
            JoinMode::Left => "Left",
            JoinMode::Right => "Right",
            JoinMode::Outer => "Outer",
            JoinMode::Semi => "Semi",
            JoinMode::Anti => "Anti",
            JoinMode::Cross => "Cross",
        };
        write!(f, "{name}")
    }
}

/// Comparison condition of a join predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateCondition {
    Equals,
    NotEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
}

impl fmt::Display for PredicateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            PredicateCondition::Equals => "=",
            PredicateCondition::NotEquals => "!=",
            PredicateCondition::LessThan => "<",
            PredicateCondition::LessThanEquals => "<=",
            PredicateCondition::GreaterThan => ">",
            PredicateCondition::GreaterThanEquals => ">=",
        };
        write!(f, "{symbol}")
    }
}

/// Mirror a condition across swapped operands: `a < b` holds iff `b > a`.
pub fn flip_predicate_condition(condition: PredicateCondition) -> PredicateCondition {
    match condition {
        PredicateCondition::Equals => PredicateCondition::Equals,
        PredicateCondition::NotEquals => PredicateCondition::NotEquals,
        PredicateCondition::LessThan => PredicateCondition::GreaterThan,
        PredicateCondition::LessThanEquals => PredicateCondition::GreaterThanEquals,
        PredicateCondition::GreaterThan => PredicateCondition::LessThan,
        PredicateCondition::GreaterThanEquals => PredicateCondition::LessThanEquals,
    }
}
