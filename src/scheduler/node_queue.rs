//! Work-stealing scheduler
//!
//! One task queue per NUMA node, workers pinned to nodes. `schedule` places
//! ready tasks on the preferred node's queue (defaulting to the calling
//! worker's node); tasks that are not yet ready are activated by predecessor
//! completion instead of sitting in a queue. Idle workers steal same-node
//! first, then cross-node. Non-stealable tasks stay on their node.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::deque::{Steal, Stealer, Worker as WorkerDeque};
use parking_lot::Mutex;
use tracing::debug;

use crate::scheduler::task::{SchedulePriority, Task};
use crate::scheduler::task_queue::TaskQueue;
use crate::scheduler::topology::Topology;
use crate::scheduler::{worker, Scheduler};
use crate::types::{NodeId, WorkerId};

struct WorkerStealer {
    node_id: NodeId,
    stealer: Stealer<Arc<Task>>,
}

/// Scheduler with per-node queues and cooperative work stealing.
pub struct NodeQueueScheduler {
    topology: Topology,
    queues: Vec<Arc<TaskQueue>>,
    stealers: Vec<WorkerStealer>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
    busy_workers: AtomicUsize,
}

impl NodeQueueScheduler {
    pub fn new(topology: Topology) -> Arc<NodeQueueScheduler> {
        let queues: Vec<_> = (0..topology.num_nodes())
            .map(|node_id| Arc::new(TaskQueue::new(node_id as NodeId)))
            .collect();

        // Local deques are created here so every stealer is registered
        // before the first worker runs; each deque then moves into its
        // worker thread.
        let mut locals = Vec::with_capacity(topology.total_worker_count());
        let mut stealers = Vec::with_capacity(topology.total_worker_count());
        let mut next_worker_id: WorkerId = 0;
        for node_id in 0..topology.num_nodes() {
            for _ in 0..topology.worker_count(node_id as NodeId) {
                let local = WorkerDeque::new_fifo();
                stealers.push(WorkerStealer {
                    node_id: node_id as NodeId,
                    stealer: local.stealer(),
                });
                locals.push((next_worker_id, node_id as NodeId, local));
                next_worker_id += 1;
            }
        }

        let scheduler = Arc::new(NodeQueueScheduler {
            topology,
            queues,
            stealers,
            threads: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            busy_workers: AtomicUsize::new(0),
        });

        {
            let mut threads = scheduler.threads.lock();
            for (id, node_id, local) in locals {
                let scheduler_for_worker = Arc::clone(&scheduler);
                let handle = thread::Builder::new()
                    .name(format!("quartz-worker-{id}"))
                    .spawn(move || worker::run_worker(scheduler_for_worker, id, node_id, local))
                    .expect("failed to spawn worker thread");
                threads.push(handle);
            }
        }
        debug!(
            nodes = scheduler.topology.num_nodes(),
            workers = scheduler.topology.total_worker_count(),
            "node queue scheduler started"
        );
        scheduler
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub(crate) fn queue(&self, node_id: NodeId) -> &Arc<TaskQueue> {
        &self.queues[node_id as usize]
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn note_worker_busy(&self) {
        self.busy_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_worker_idle(&self) {
        self.busy_workers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Steal a runnable task for `thief_id`. Same-node sibling deques are
    /// tried before other nodes' queues and deques; node queues hand out
    /// unclaimed tasks, so those get claimed here.
    pub(crate) fn steal_task(&self, thief_id: WorkerId, thief_node: NodeId) -> Option<Arc<Task>> {
        for (index, entry) in self.stealers.iter().enumerate() {
            if entry.node_id != thief_node || index == thief_id as usize {
                continue;
            }
            if let Some(task) = Self::steal_from(&entry.stealer) {
                return Some(task);
            }
        }
        for queue in &self.queues {
            if queue.node_id() == thief_node {
                continue;
            }
            while let Some(task) = queue.steal() {
                if task.try_acquire_for_worker() {
                    return Some(task);
                }
            }
        }
        for (index, entry) in self.stealers.iter().enumerate() {
            if entry.node_id == thief_node || index == thief_id as usize {
                continue;
            }
            if let Some(task) = Self::steal_from(&entry.stealer) {
                return Some(task);
            }
        }
        None
    }

    fn steal_from(stealer: &Stealer<Arc<Task>>) -> Option<Arc<Task>> {
        loop {
            match stealer.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }
}

impl Scheduler for NodeQueueScheduler {
    fn schedule(
        &self,
        task: Arc<Task>,
        preferred_node: Option<NodeId>,
        priority: SchedulePriority,
    ) {
        debug_assert!(
            task.is_scheduled(),
            "schedule() must be called through Task::schedule"
        );
        if !task.is_ready() {
            // Predecessor completion routes the task once it becomes ready.
            return;
        }
        let node_id = preferred_node
            .or_else(worker::current_worker_node)
            .unwrap_or(0);
        assert!(
            (node_id as usize) < self.queues.len(),
            "preferred node {node_id} outside the topology"
        );
        self.queues[node_id as usize].push(task, priority);
    }

    fn wait_for_tasks(&self, tasks: &[Arc<Task>]) {
        if worker::wait_for_tasks_on_current_worker(tasks) {
            return;
        }
        for task in tasks {
            task.join();
        }
    }

    /// Drain all queues, stop the workers and join their threads. Callers
    /// must have waited for their own tasks beforehand.
    fn finish(&self) {
        let mut threads = self.threads.lock();
        if threads.is_empty() {
            return;
        }
        loop {
            let queues_empty = self.queues.iter().all(|queue| queue.is_empty());
            let deques_empty = self.stealers.iter().all(|entry| entry.stealer.is_empty());
            if queues_empty && deques_empty && self.busy_workers.load(Ordering::Acquire) == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.shutting_down.store(true, Ordering::Release);
        for queue in &self.queues {
            queue.notify_all();
        }
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        debug!("node queue scheduler finished");
    }
}

impl Drop for NodeQueueScheduler {
    fn drop(&mut self) {
        self.finish();
    }
}
