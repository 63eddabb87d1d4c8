//! Operator contract
//!
//! Physical operators form a tree of trait objects. An operator is executed
//! at most once, stores its output table, and is consumed by its parents via
//! `get_output`. The task framework drives operators through
//! [`make_operator_task`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::common::QuartzResult;
use crate::scheduler::Task;
use crate::storage::{Table, TransactionContext};
use crate::types::Value;

/// Identifier of a prepared-statement placeholder.
pub type ParameterId = u16;

/// How verbose an operator description should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionMode {
    SingleLine,
    MultiLine,
}

pub trait AbstractOperator: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self, _mode: DescriptionMode) -> String {
        self.name().to_string()
    }

    /// Run the operator and store its output. Called exactly once, by the
    /// task framework or directly.
    fn execute(&self) -> QuartzResult<()>;

    /// The output table. Panics when the operator has not executed yet.
    fn get_output(&self) -> Arc<Table>;

    /// An independent copy of this operator tree, without outputs. Copies
    /// must be re-executed bottom-up.
    fn deep_copy(&self) -> Arc<dyn AbstractOperator>;

    /// The direct input operators, left before right. Leaf operators have
    /// none.
    fn inputs(&self) -> Vec<Arc<dyn AbstractOperator>> {
        Vec::new()
    }

    /// Bind prepared-statement values. Read-only operators ignore this.
    fn set_parameters(&self, _parameters: &HashMap<ParameterId, Value>) {}

    /// Attach a transaction context. Read-only operators ignore this.
    fn set_transaction_context(&self, _context: Arc<TransactionContext>) {}
}

/// Wrap an operator into a task. A failure inside the operator body is a
/// fatal engine error; the task state is not rolled back.
pub fn make_operator_task(operator: Arc<dyn AbstractOperator>) -> Arc<Task> {
    let name = operator.name();
    let task = Task::new(move || {
        if let Err(error) = operator.execute() {
            panic!("operator {name} failed: {error}");
        }
    });
    task.set_description(name);
    task
}
