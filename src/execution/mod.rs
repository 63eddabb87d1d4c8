//! Execution engine for QuartzDB
//!
//! This module provides the physical operators and their contract:
//! - The operator trait and the operator/task bridge
//! - Input suppliers (`TableWrapper`, `GetTable`)
//! - The hash join and sort-merge join operators

pub mod get_table;
pub mod join_common;
pub mod join_hash;
pub mod join_sort_merge;
pub mod operator;
pub mod table_wrapper;

pub use get_table::GetTable;
pub use join_common::JoinPredicate;
pub use join_hash::JoinHash;
pub use join_sort_merge::JoinSortMerge;
pub use operator::{make_operator_task, AbstractOperator, DescriptionMode, ParameterId};
pub use table_wrapper::TableWrapper;
