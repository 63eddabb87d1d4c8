use std::sync::Arc;

use crate::scheduler::task::{SchedulePriority, Task};
use crate::scheduler::Scheduler;
use crate::types::NodeId;

/// Default scheduler: executes ready tasks inline on the scheduling thread.
/// Tasks with open dependencies run once their last predecessor completes.
#[derive(Debug, Default)]
pub struct ImmediateExecutionScheduler;

impl ImmediateExecutionScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for ImmediateExecutionScheduler {
    fn schedule(&self, task: Arc<Task>, _preferred_node: Option<NodeId>, _priority: SchedulePriority) {
        if task.is_ready() {
            task.execute();
        }
    }

    fn wait_for_tasks(&self, tasks: &[Arc<Task>]) {
        for task in tasks {
            task.join();
        }
    }

    fn finish(&self) {}
}
