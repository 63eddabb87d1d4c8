//! QuartzDB - Main-Memory Column-Store Execution Engine
//!
//! QuartzDB stores tables as sequences of fixed-capacity chunks, one segment
//! per column, and executes physical operators on a work-stealing task
//! scheduler. The join operators are radix-based: a partitioned hash join
//! and a cluster-sorting merge join, both producing reference tables over
//! their inputs.

pub mod common;
pub mod engine;
pub mod execution;
pub mod scheduler;
pub mod storage;
pub mod types;

// Re-export common types for convenience
pub use common::{QuartzError, QuartzResult};

// Re-export the engine root
pub use engine::{engine, Engine};

// Re-export the type system for convenience
pub use types::{
    ChunkId, ChunkOffset, ColumnId, CommitId, DataType, JoinMode, NodeId, PredicateCondition,
    RowId, TaskId, ValidityMask, Value, WorkerId, NULL_ROW_ID,
};

// Re-export the storage system for convenience
pub use storage::{
    Chunk, DictionarySegment, PositionList, ReferenceSegment, RollbackReason, Segment,
    SegmentAccessor, StorageManager, Table, TableColumnDefinition, TableType,
    TransactionContext, TransactionManager, ValueSegment,
};

// Re-export the scheduler for convenience
pub use scheduler::{
    wait_for_tasks, ImmediateExecutionScheduler, NodeQueueScheduler, SchedulePriority, Scheduler,
    Task, TaskState, Topology,
};

// Re-export the execution layer for convenience
pub use execution::{
    make_operator_task, AbstractOperator, DescriptionMode, GetTable, JoinHash, JoinPredicate,
    JoinSortMerge, TableWrapper,
};
