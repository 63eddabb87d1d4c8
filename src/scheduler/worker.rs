//! Workers
//!
//! Each worker owns a thread, a local deque for tasks claimed on that
//! thread, and access to its node's queue. Idle workers steal: first from
//! siblings on the same node, then across nodes. A thread-local registry
//! maps the calling thread to its worker, which enables the `execute_next`
//! fast path and cooperative waiting.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::deque::Worker as WorkerDeque;
use tracing::debug;

use crate::scheduler::node_queue::NodeQueueScheduler;
use crate::scheduler::task::Task;
use crate::types::{NodeId, WorkerId};

pub(crate) struct WorkerContext {
    id: WorkerId,
    node_id: NodeId,
    scheduler: Arc<NodeQueueScheduler>,
    local: WorkerDeque<Arc<Task>>,
    next_task: RefCell<Option<Arc<Task>>>,
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<Rc<WorkerContext>>> = RefCell::new(None);
}

fn current() -> Option<Rc<WorkerContext>> {
    CURRENT_WORKER.with(|current| current.borrow().clone())
}

/// The node the calling thread's worker belongs to, if the thread is a
/// worker.
pub(crate) fn current_worker_node() -> Option<NodeId> {
    current().map(|context| context.node_id)
}

/// Claim a just-readied task for the current worker so it runs right after
/// the task that completed its last predecessor. Returns `false` when the
/// calling thread is not a worker; the decision is then left to the caller.
pub(crate) fn execute_next_on_current_worker(task: &Arc<Task>) -> bool {
    let Some(context) = current() else {
        return false;
    };
    if !task.is_scheduled() {
        // The scheduler routes the task once it gets scheduled.
        return true;
    }
    if !task.try_acquire_for_worker() {
        return true;
    }
    let mut slot = context.next_task.borrow_mut();
    if slot.is_none() {
        *slot = Some(Arc::clone(task));
    } else {
        context.local.push(Arc::clone(task));
    }
    true
}

/// Cooperative wait: while the given tasks are unfinished, keep executing
/// other tasks reachable from this worker. Returns `false` when the calling
/// thread is not a worker.
pub(crate) fn wait_for_tasks_on_current_worker(tasks: &[Arc<Task>]) -> bool {
    let Some(context) = current() else {
        return false;
    };
    while !tasks.iter().all(|task| task.is_done()) {
        match next_runnable(&context) {
            Some(task) => task.execute(),
            None => std::thread::yield_now(),
        }
    }
    true
}

/// The next task this worker may execute, already claimed. Sources in
/// order: the `execute_next` slot, the local deque, the node queue, theft.
fn next_runnable(context: &WorkerContext) -> Option<Arc<Task>> {
    if let Some(task) = context.next_task.borrow_mut().take() {
        return Some(task);
    }
    if let Some(task) = context.local.pop() {
        return Some(task);
    }
    let queue = context.scheduler.queue(context.node_id);
    while let Some(task) = queue.pull() {
        if task.try_acquire_for_worker() {
            return Some(task);
        }
    }
    context.scheduler.steal_task(context.id, context.node_id)
}

/// Thread entry point of a worker.
pub(crate) fn run_worker(
    scheduler: Arc<NodeQueueScheduler>,
    id: WorkerId,
    node_id: NodeId,
    local: WorkerDeque<Arc<Task>>,
) {
    let context = Rc::new(WorkerContext {
        id,
        node_id,
        scheduler,
        local,
        next_task: RefCell::new(None),
    });
    CURRENT_WORKER.with(|current| *current.borrow_mut() = Some(Rc::clone(&context)));
    debug!(worker_id = id, node_id, "worker started");
    worker_loop(&context);
    CURRENT_WORKER.with(|current| *current.borrow_mut() = None);
    debug!(worker_id = id, node_id, "worker stopped");
}

fn worker_loop(context: &WorkerContext) {
    while !context.scheduler.is_shutting_down() {
        match next_runnable(context) {
            Some(task) => {
                context.scheduler.note_worker_busy();
                task.execute();
                // Drain the execute_next chain before going idle so
                // fast-path tasks never outlive the busy window.
                loop {
                    let chained = context.next_task.borrow_mut().take();
                    match chained {
                        Some(task) => task.execute(),
                        None => break,
                    }
                }
                context.scheduler.note_worker_idle();
            }
            None => context
                .scheduler
                .queue(context.node_id)
                .wait_for_task(Duration::from_millis(10)),
        }
    }
}
