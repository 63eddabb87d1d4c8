//! Scheduler integration tests
//!
//! These tests swap the process-wide scheduler, so they serialize on a lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use quartzdb::{
    engine, make_operator_task, wait_for_tasks, AbstractOperator, DataType, GetTable,
    ImmediateExecutionScheduler, JoinHash, JoinMode, JoinSortMerge, NodeQueueScheduler,
    PredicateCondition, SchedulePriority, Table, TableColumnDefinition, TableType, TableWrapper,
    Task, TaskState, Topology, Value,
};

static SCHEDULER_LOCK: Mutex<()> = Mutex::new(());

fn scheduler_guard() -> MutexGuard<'static, ()> {
    SCHEDULER_LOCK.lock().unwrap_or_else(|error| error.into_inner())
}

fn with_node_queue_scheduler(topology: Topology, body: impl FnOnce()) {
    let _guard = scheduler_guard();
    engine().set_scheduler(NodeQueueScheduler::new(topology));
    body();
    engine().set_scheduler(Arc::new(ImmediateExecutionScheduler::new()));
}

#[test]
fn test_logging_init_is_idempotent() {
    quartzdb::common::logging::init_with_level("error");
    quartzdb::common::logging::init();
}

#[test]
fn test_single_task_runs_and_completes() {
    let _guard = scheduler_guard();
    let counter = Arc::new(AtomicUsize::new(0));
    let task = {
        let counter = Arc::clone(&counter);
        Task::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    };
    task.schedule(None);
    wait_for_tasks(std::slice::from_ref(&task));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(task.state(), TaskState::Done);
    assert!(task.is_done());
}

#[test]
fn test_done_callback_fires_once_after_done() {
    let _guard = scheduler_guard();
    let callback_count = Arc::new(AtomicUsize::new(0));
    let task = Task::new(|| {});
    {
        let callback_count = Arc::clone(&callback_count);
        let observer = Arc::clone(&task);
        task.set_done_callback(move || {
            assert_eq!(observer.state(), TaskState::Done);
            callback_count.fetch_add(1, Ordering::SeqCst);
        });
    }
    task.schedule(None);
    task.join();
    assert_eq!(callback_count.load(Ordering::SeqCst), 1);
}

// Three tasks a -> b -> c, scheduled in the order c, a, b: all of them must
// complete, a before b, b before c.
#[test]
fn test_chain_scheduled_out_of_order_inline() {
    let _guard = scheduler_guard();
    run_chain_out_of_order();
}

#[test]
fn test_chain_scheduled_out_of_order_with_workers() {
    with_node_queue_scheduler(Topology::single_node(4), run_chain_out_of_order);
}

fn run_chain_out_of_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let make_task = |name: &'static str| {
        let order = Arc::clone(&order);
        Task::new(move || {
            order.lock().unwrap().push(name);
        })
    };
    let a = make_task("a");
    let b = make_task("b");
    let c = make_task("c");
    a.set_as_predecessor_of(&b);
    b.set_as_predecessor_of(&c);

    c.schedule(None);
    a.schedule(None);
    b.schedule(None);
    wait_for_tasks(&[Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)]);

    assert!(a.is_done() && b.is_done() && c.is_done());
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
}

#[test]
fn test_diamond_dependencies() {
    with_node_queue_scheduler(Topology::single_node(4), || {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make_task = |name: &'static str| {
            let order = Arc::clone(&order);
            Task::new(move || {
                order.lock().unwrap().push(name);
            })
        };
        let source = make_task("source");
        let middle_one = make_task("middle_one");
        let middle_two = make_task("middle_two");
        let sink = make_task("sink");
        source.set_as_predecessor_of(&middle_one);
        source.set_as_predecessor_of(&middle_two);
        middle_one.set_as_predecessor_of(&sink);
        middle_two.set_as_predecessor_of(&sink);

        let tasks = vec![
            Arc::clone(&sink),
            Arc::clone(&middle_two),
            Arc::clone(&middle_one),
            Arc::clone(&source),
        ];
        for task in &tasks {
            task.schedule(None);
        }
        wait_for_tasks(&tasks);

        let order = order.lock().unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "source");
        assert_eq!(order[3], "sink");
    });
}

#[test]
fn test_many_tasks_all_execute_exactly_once() {
    with_node_queue_scheduler(Topology::single_node(4), || {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..500 {
            let counter = Arc::clone(&counter);
            let task = Task::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            task.schedule(None);
            tasks.push(task);
        }
        wait_for_tasks(&tasks);
        assert_eq!(counter.load(Ordering::SeqCst), 500);
        assert!(tasks.iter().all(|task| task.is_done()));
    });
}

#[test]
fn test_random_dag_batches() {
    use rand::Rng;

    with_node_queue_scheduler(Topology::single_node(4), || {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let counter = Arc::new(AtomicUsize::new(0));
            let layer_count = rng.gen_range(2..5);
            let mut previous_layer: Vec<Arc<Task>> = Vec::new();
            let mut tasks = Vec::new();
            for _ in 0..layer_count {
                let layer_width = rng.gen_range(1..6);
                let mut layer = Vec::new();
                for _ in 0..layer_width {
                    let counter = Arc::clone(&counter);
                    let task = Task::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                    for predecessor in &previous_layer {
                        predecessor.set_as_predecessor_of(&task);
                    }
                    layer.push(task);
                }
                tasks.extend(layer.iter().cloned());
                previous_layer = layer;
            }
            // Schedule in reverse so successors are regularly scheduled
            // before their predecessors.
            for task in tasks.iter().rev() {
                task.schedule(None);
            }
            wait_for_tasks(&tasks);
            assert_eq!(counter.load(Ordering::SeqCst), tasks.len());
        }
    });
}

#[test]
fn test_fake_numa_topology_runs_and_steals() {
    with_node_queue_scheduler(Topology::fake_numa_topology(2, 2), || {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        // Everything lands on node 1; node 0 workers can only make progress
        // by stealing across nodes.
        for _ in 0..200 {
            let counter = Arc::clone(&counter);
            let task = Task::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            task.schedule(Some(1));
            tasks.push(task);
        }
        wait_for_tasks(&tasks);
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    });
}

#[test]
fn test_non_stealable_tasks_complete() {
    with_node_queue_scheduler(Topology::fake_numa_topology(2, 1), || {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for index in 0..50 {
            let counter = Arc::clone(&counter);
            let task = Task::new_with_options(SchedulePriority::Default, false, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            task.schedule(Some((index % 2) as u32));
            tasks.push(task);
        }
        wait_for_tasks(&tasks);
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    });
}

#[test]
#[should_panic(expected = "cannot add dependencies")]
fn test_adding_dependency_after_schedule_panics() {
    let _guard = scheduler_guard();
    let first = Task::new(|| {});
    let second = Task::new(|| {});
    first.schedule(None);
    first.set_as_predecessor_of(&second);
}

fn number_table(values: &[i32]) -> Arc<Table> {
    let table = Table::new(
        vec![TableColumnDefinition::new("n", DataType::Int, false)],
        TableType::Data,
        3,
    );
    for &value in values {
        table.append(vec![Some(Value::Int(value))]).unwrap();
    }
    Arc::new(table)
}

#[test]
fn test_get_table_through_operator_task() {
    let _guard = scheduler_guard();
    engine()
        .storage_manager()
        .add_table("scheduler_test_numbers", number_table(&[1, 2, 3]))
        .unwrap();

    let get_table = GetTable::new("scheduler_test_numbers");
    let task = make_operator_task(get_table.clone());
    task.schedule(None);
    wait_for_tasks(std::slice::from_ref(&task));
    assert_eq!(get_table.get_output().row_count(), 3);

    engine()
        .storage_manager()
        .drop_table("scheduler_test_numbers")
        .unwrap();
}

#[test]
fn test_engine_reset_clears_tables() {
    let _guard = scheduler_guard();
    engine()
        .storage_manager()
        .add_table("scheduler_test_reset", number_table(&[4]))
        .unwrap();
    engine().reset();
    assert!(!engine().storage_manager().has_table("scheduler_test_reset"));

    // The engine stays usable after a reset.
    let task = Task::new(|| {});
    task.schedule(None);
    wait_for_tasks(std::slice::from_ref(&task));
    assert!(task.is_done());
}

// Joins submit their jobs to whatever scheduler is installed; run both
// operators on the worker pool and compare against known results.
#[test]
fn test_joins_on_node_queue_scheduler() {
    with_node_queue_scheduler(Topology::single_node(4), || {
        let left = TableWrapper::new(number_table(&[1, 2, 2, 5, 7, 9]));
        let right = TableWrapper::new(number_table(&[2, 2, 3, 7, 8]));
        left.execute().unwrap();
        right.execute().unwrap();

        let hash_join = JoinHash::new(
            left.clone(),
            right.clone(),
            JoinMode::Inner,
            (0, 0),
            PredicateCondition::Equals,
            Some(2),
            Vec::new(),
        );
        hash_join.execute().unwrap();
        // 2 appears twice on both sides, 7 once on each.
        assert_eq!(hash_join.get_output().row_count(), 5);

        let merge_join = JoinSortMerge::new(
            left,
            right,
            JoinMode::Inner,
            (0, 0),
            PredicateCondition::Equals,
        );
        merge_join.execute().unwrap();
        assert_eq!(merge_join.get_output().row_count(), 5);
    });
}
