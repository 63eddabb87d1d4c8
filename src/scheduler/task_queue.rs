use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};

use crate::scheduler::task::{SchedulePriority, Task, PRIORITY_LEVELS};
use crate::types::NodeId;

/// Per-node task queue: one FIFO injector per priority level for stealable
/// tasks, plus a pinned queue for tasks that must stay on their node.
pub struct TaskQueue {
    node_id: NodeId,
    stealable: [Injector<Arc<Task>>; PRIORITY_LEVELS],
    pinned: Mutex<VecDeque<Arc<Task>>>,
    idle_mutex: Mutex<()>,
    idle_condvar: Condvar,
}

impl TaskQueue {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            stealable: [Injector::new(), Injector::new()],
            pinned: Mutex::new(VecDeque::new()),
            idle_mutex: Mutex::new(()),
            idle_condvar: Condvar::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Enqueue a task and wake sleeping workers. The task is marked as
    /// enqueued before it becomes visible to consumers.
    pub fn push(&self, task: Arc<Task>, priority: SchedulePriority) {
        task.try_mark_as_enqueued();
        if task.is_stealable() {
            self.stealable[priority as usize].push(task);
        } else {
            self.pinned.lock().push_back(task);
        }
        self.idle_condvar.notify_all();
    }

    /// Take the next task for a worker of this node, draining priorities in
    /// order. Pinned tasks are served between the priority levels so they
    /// cannot starve behind a deep default backlog.
    pub fn pull(&self) -> Option<Arc<Task>> {
        if let Some(task) = Self::take(&self.stealable[SchedulePriority::High as usize]) {
            return Some(task);
        }
        if let Some(task) = self.pinned.lock().pop_front() {
            return Some(task);
        }
        Self::take(&self.stealable[SchedulePriority::Default as usize])
    }

    /// Take a task on behalf of a worker from another node. Pinned tasks are
    /// never handed out here.
    pub fn steal(&self) -> Option<Arc<Task>> {
        for injector in &self.stealable {
            if let Some(task) = Self::take(injector) {
                return Some(task);
            }
        }
        None
    }

    fn take(injector: &Injector<Arc<Task>>) -> Option<Arc<Task>> {
        loop {
            match injector.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stealable.iter().all(|injector| injector.is_empty()) && self.pinned.lock().is_empty()
    }

    /// Park the calling worker until new work may have arrived. Bounded by
    /// `timeout` so missed wakeups degrade into polling.
    pub fn wait_for_task(&self, timeout: Duration) {
        let mut guard = self.idle_mutex.lock();
        self.idle_condvar.wait_for(&mut guard, timeout);
    }

    pub fn notify_all(&self) {
        self.idle_condvar.notify_all();
    }
}
