//! Tasks
//!
//! A task is a node in the execution DAG. It tracks its predecessors through
//! an atomic counter and weak back-references, owns its successors, and runs
//! a lock-free state machine:
//!
//! `Created -> Scheduled -> (Enqueued -> AssignedToWorker)? -> Started -> Done`
//!
//! Entering `Enqueued` or `AssignedToWorker` twice returns `false` without
//! changing state, so two workers racing to claim a task resolve benignly;
//! only one of them wins `Started`.

use std::fmt;
use std::sync::atomic::{fence, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::engine::engine;
use crate::scheduler::worker;
use crate::types::{NodeId, TaskId};

/// Scheduling priority; lower values are drained first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePriority {
    High = 0,
    Default = 1,
}

/// Number of distinct priority levels.
pub const PRIORITY_LEVELS: usize = 2;

/// Lifecycle states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Scheduled = 1,
    Enqueued = 2,
    AssignedToWorker = 3,
    Started = 4,
    Done = 5,
}

impl TaskState {
    fn from_u8(value: u8) -> TaskState {
        match value {
            0 => TaskState::Created,
            1 => TaskState::Scheduled,
            2 => TaskState::Enqueued,
            3 => TaskState::AssignedToWorker,
            4 => TaskState::Started,
            5 => TaskState::Done,
            _ => unreachable!("invalid task state {value}"),
        }
    }
}

type TaskBody = Box<dyn FnOnce() + Send + 'static>;
type DoneCallback = Box<dyn FnOnce() + Send + 'static>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// A schedulable unit of work with DAG dependencies.
///
/// Successors are owned by their predecessors' successor lists; the backward
/// direction uses weak references, which keeps the DAG acyclic in ownership.
pub struct Task {
    id: TaskId,
    priority: SchedulePriority,
    stealable: bool,
    self_weak: Weak<Task>,
    description: Mutex<String>,
    state: AtomicU8,
    pending_predecessors: AtomicUsize,
    predecessors: Mutex<Vec<Weak<Task>>>,
    successors: Mutex<Vec<Arc<Task>>>,
    done_callback: Mutex<Option<DoneCallback>>,
    body: Mutex<Option<TaskBody>>,
    done: Mutex<bool>,
    done_condvar: Condvar,
}

impl Task {
    /// A stealable task with default priority.
    pub fn new(body: impl FnOnce() + Send + 'static) -> Arc<Task> {
        Self::new_with_options(SchedulePriority::Default, true, body)
    }

    pub fn new_with_options(
        priority: SchedulePriority,
        stealable: bool,
        body: impl FnOnce() + Send + 'static,
    ) -> Arc<Task> {
        Arc::new_cyclic(|self_weak| Task {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            priority,
            stealable,
            self_weak: self_weak.clone(),
            description: Mutex::new(String::new()),
            state: AtomicU8::new(TaskState::Created as u8),
            pending_predecessors: AtomicUsize::new(0),
            predecessors: Mutex::new(Vec::new()),
            successors: Mutex::new(Vec::new()),
            done_callback: Mutex::new(None),
            body: Mutex::new(Some(Box::new(body))),
            done: Mutex::new(false),
            done_condvar: Condvar::new(),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> SchedulePriority {
        self.priority
    }

    pub fn is_stealable(&self) -> bool {
        self.stealable
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// A task is ready once every predecessor has completed.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.pending_predecessors.load(Ordering::Acquire) == 0
    }

    pub fn is_scheduled(&self) -> bool {
        self.state() >= TaskState::Scheduled
    }

    /// Whether the task has fully completed, including its done-callback.
    pub fn is_done(&self) -> bool {
        *self.done.lock()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *self.description.lock() = description.into();
    }

    pub fn description(&self) -> String {
        let description = self.description.lock();
        if description.is_empty() {
            format!("{{Task with id: {}}}", self.id)
        } else {
            description.clone()
        }
    }

    pub fn predecessors(&self) -> Vec<Weak<Task>> {
        self.predecessors.lock().clone()
    }

    pub fn successors(&self) -> Vec<Arc<Task>> {
        self.successors.lock().clone()
    }

    fn self_arc(&self) -> Arc<Task> {
        self.self_weak
            .upgrade()
            .expect("task is alive while its methods run")
    }

    /// Declare that `successor` must not run before `self` has completed.
    /// Dependencies may only be added while both tasks are unscheduled.
    pub fn set_as_predecessor_of(&self, successor: &Arc<Task>) {
        assert!(
            !self.is_scheduled(),
            "cannot add dependencies after the task was scheduled"
        );
        assert_eq!(
            successor.state(),
            TaskState::Created,
            "successors cannot gain predecessors after scheduling"
        );
        successor
            .pending_predecessors
            .fetch_add(1, Ordering::AcqRel);
        self.successors.lock().push(Arc::clone(successor));
        successor.predecessors.lock().push(self.self_weak.clone());
    }

    /// Register a callback invoked exactly once, after the task reaches
    /// `Done`.
    pub fn set_done_callback(&self, callback: impl FnOnce() + Send + 'static) {
        assert!(
            !self.is_scheduled(),
            "cannot set a done-callback after the task was scheduled"
        );
        *self.done_callback.lock() = Some(Box::new(callback));
    }

    /// Hand the task to the current scheduler. The fence makes every write
    /// of the scheduling thread visible to whichever worker executes the
    /// task; the reverse direction is covered by the done-condvar.
    pub fn schedule(&self, preferred_node: Option<NodeId>) {
        fence(Ordering::SeqCst);
        self.try_transition_to(TaskState::Scheduled);
        engine()
            .scheduler()
            .schedule(self.self_arc(), preferred_node, self.priority);
    }

    /// Block until the task is done. Must not be called from a worker; use
    /// the scheduler's `wait_for_tasks` there instead.
    pub fn join(&self) {
        debug_assert!(
            self.is_scheduled(),
            "task must be scheduled before it can be waited for"
        );
        let mut done = self.done.lock();
        while !*done {
            self.done_condvar.wait(&mut done);
        }
    }

    /// Run the task body and complete the lifecycle: transition to `Done`,
    /// activate successors, fire the done-callback, publish the done flag.
    pub fn execute(&self) {
        self.try_transition_to(TaskState::Started);
        trace!(
            task_id = self.id,
            description = %self.description(),
            addr = self as *const Task as usize,
            "task started"
        );
        debug_assert!(
            self.is_ready(),
            "task must not be executed before its dependencies are done"
        );
        fence(Ordering::SeqCst);

        let body = self.body.lock().take();
        if let Some(body) = body {
            body();
        }

        self.try_transition_to(TaskState::Done);

        let successors = self.successors.lock().clone();
        for successor in &successors {
            successor.on_predecessor_done();
        }

        if let Some(callback) = self.done_callback.lock().take() {
            callback();
        }

        {
            let mut done = self.done.lock();
            *done = true;
        }
        self.done_condvar.notify_all();
        trace!(
            task_id = self.id,
            addr = self as *const Task as usize,
            "task finished"
        );
    }

    /// Move the task to `Scheduled` without involving the engine scheduler.
    #[cfg(test)]
    pub(crate) fn mark_as_scheduled_for_test(&self) {
        self.try_transition_to(TaskState::Scheduled);
    }

    pub(crate) fn try_mark_as_enqueued(&self) -> bool {
        self.try_transition_to(TaskState::Enqueued)
    }

    pub(crate) fn try_mark_as_assigned_to_worker(&self) -> bool {
        self.try_transition_to(TaskState::AssignedToWorker)
    }

    /// Claim the task for execution by a worker. Exactly one claimant per
    /// task succeeds; the others observe `false` and drop their reference.
    pub(crate) fn try_acquire_for_worker(&self) -> bool {
        self.try_mark_as_enqueued();
        self.try_mark_as_assigned_to_worker()
    }

    /// Called by a completing predecessor. The last predecessor to finish
    /// routes the task: onto the current worker when there is one, inline
    /// otherwise. Unscheduled tasks are left for the scheduler.
    pub(crate) fn on_predecessor_done(&self) {
        let previous = self.pending_predecessors.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "predecessor counter underflow");
        if previous != 1 {
            return;
        }
        if worker::execute_next_on_current_worker(&self.self_arc()) {
            return;
        }
        if self.is_scheduled() {
            self.execute();
        }
    }

    /// Attempt a state transition. Idempotent re-entry into `Enqueued` or
    /// `AssignedToWorker` (including entry from a later state) returns
    /// `false` without changing state; every other illegal transition is a
    /// contract violation.
    fn try_transition_to(&self, new_state: TaskState) -> bool {
        loop {
            let previous = TaskState::from_u8(self.state.load(Ordering::Acquire));
            let legal = match new_state {
                TaskState::Created => false,
                TaskState::Scheduled => previous == TaskState::Created,
                TaskState::Enqueued => previous == TaskState::Scheduled,
                TaskState::AssignedToWorker => previous == TaskState::Enqueued,
                TaskState::Started => {
                    previous == TaskState::Scheduled || previous == TaskState::AssignedToWorker
                }
                TaskState::Done => previous == TaskState::Started,
            };
            if !legal {
                match new_state {
                    TaskState::Enqueued if previous >= TaskState::Enqueued => return false,
                    TaskState::AssignedToWorker if previous >= TaskState::AssignedToWorker => {
                        return false
                    }
                    _ => panic!("illegal task state transition: {previous:?} -> {new_state:?}"),
                }
            }
            if self
                .state
                .compare_exchange(
                    previous as u8,
                    new_state as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .field(
                "pending_predecessors",
                &self.pending_predecessors.load(Ordering::Relaxed),
            )
            .field("stealable", &self.stealable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_created_and_ready() {
        let task = Task::new(|| {});
        assert_eq!(task.state(), TaskState::Created);
        assert!(task.is_ready());
        assert!(!task.is_scheduled());
        assert!(!task.is_done());
    }

    #[test]
    fn test_enqueue_reentry_returns_false() {
        let task = Task::new(|| {});
        task.mark_as_scheduled_for_test();
        assert!(task.try_mark_as_enqueued());
        assert!(!task.try_mark_as_enqueued());
        assert_eq!(task.state(), TaskState::Enqueued);
        assert!(task.try_mark_as_assigned_to_worker());
        assert!(!task.try_mark_as_assigned_to_worker());
        assert_eq!(task.state(), TaskState::AssignedToWorker);
    }

    #[test]
    fn test_only_one_claimant_wins() {
        let task = Task::new(|| {});
        task.mark_as_scheduled_for_test();
        assert!(task.try_acquire_for_worker());
        assert!(!task.try_acquire_for_worker());
    }

    #[test]
    #[should_panic(expected = "illegal task state transition")]
    fn test_done_before_started_panics() {
        let task = Task::new(|| {});
        task.try_transition_to(TaskState::Done);
    }

    #[test]
    fn test_predecessor_wiring() {
        let first = Task::new(|| {});
        let second = Task::new(|| {});
        first.set_as_predecessor_of(&second);
        assert!(!second.is_ready());
        assert_eq!(first.successors().len(), 1);
        assert_eq!(second.predecessors().len(), 1);
    }
}
