//! Task scheduler for QuartzDB
//!
//! This module provides the concurrency substrate of the engine:
//! - Tasks forming an execution DAG with predecessor tracking
//! - Per-node task queues with FIFO priority levels
//! - Workers with cooperative, NUMA-aware work stealing
//! - An inline scheduler for single-threaded execution

pub mod immediate;
pub mod node_queue;
pub mod task;
pub mod task_queue;
pub mod topology;
pub(crate) mod worker;

use std::sync::Arc;

pub use immediate::ImmediateExecutionScheduler;
pub use node_queue::NodeQueueScheduler;
pub use task::{SchedulePriority, Task, TaskState, PRIORITY_LEVELS};
pub use task_queue::TaskQueue;
pub use topology::{Topology, TopologyNode};

use crate::engine::engine;
use crate::types::NodeId;

/// The scheduling interface operators program against.
pub trait Scheduler: Send + Sync {
    /// Enqueue a task that has transitioned to `Scheduled`. Called through
    /// [`Task::schedule`].
    fn schedule(&self, task: Arc<Task>, preferred_node: Option<NodeId>, priority: SchedulePriority);

    /// Block until every given task is done. Workers keep executing other
    /// tasks while they wait.
    fn wait_for_tasks(&self, tasks: &[Arc<Task>]);

    /// Drain outstanding work and release scheduler resources.
    fn finish(&self);
}

/// Wait on the engine's current scheduler.
pub fn wait_for_tasks(tasks: &[Arc<Task>]) {
    engine().scheduler().wait_for_tasks(tasks);
}
