//! Sort-merge join
//!
//! The inputs are materialized and clustered into a fixed number of sorted
//! clusters; equality joins cluster by key hash, every other predicate range
//! clusters on sampled split values so the clusters are globally ordered.
//! Each cluster pair is merged by one scheduler job: runs of equal values
//! are located with a binary search and handled as a unit. Outer rows for
//! non-equality predicates are patched in afterwards since their bounds may
//! lie in other clusters, and rows with null join keys are appended last.
//! Anti joins reuse the semi result: a linear anti-merge over the sorted
//! cluster removes every matched row.

use std::cmp::Ordering;
use std::mem::size_of;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::constants::{ASSUMED_L2_CACHE_SIZE, PARALLEL_OUTPUT_WRITE_THRESHOLD};
use crate::common::{QuartzError, QuartzResult};
use crate::execution::join_common::{
    add_output_segments, build_join_output_table, hash_value,
};
use crate::execution::operator::{AbstractOperator, DescriptionMode};
use crate::scheduler::{wait_for_tasks, Task};
use crate::storage::{PositionList, Segment, SegmentAccessor, Table};
use crate::types::{
    ChunkId, ChunkOffset, ColumnId, JoinMode, PredicateCondition, RowId, Value, NULL_ROW_ID,
};

/// Parallel radix-cluster-sort join supporting all comparison predicates.
pub struct JoinSortMerge {
    left: Arc<dyn AbstractOperator>,
    right: Arc<dyn AbstractOperator>,
    mode: JoinMode,
    column_ids: (ColumnId, ColumnId),
    predicate_condition: PredicateCondition,
    output: Mutex<Option<Arc<Table>>>,
}

impl JoinSortMerge {
    pub fn new(
        left: Arc<dyn AbstractOperator>,
        right: Arc<dyn AbstractOperator>,
        mode: JoinMode,
        column_ids: (ColumnId, ColumnId),
        predicate_condition: PredicateCondition,
    ) -> Arc<Self> {
        assert_ne!(mode, JoinMode::Cross, "sort merge join does not support cross joins");
        assert!(
            !matches!(mode, JoinMode::Semi | JoinMode::Anti)
                || predicate_condition == PredicateCondition::Equals,
            "sort merge join only supports semi and anti joins with an equality predicate"
        );
        assert!(
            mode != JoinMode::Outer || predicate_condition == PredicateCondition::Equals,
            "sort merge join only supports full outer joins with an equality predicate"
        );
        assert!(
            predicate_condition != PredicateCondition::NotEquals || mode == JoinMode::Inner,
            "sort merge join only supports inner joins for inequality predicates"
        );
        Arc::new(Self {
            left,
            right,
            mode,
            column_ids,
            predicate_condition,
            output: Mutex::new(None),
        })
    }
}

impl AbstractOperator for JoinSortMerge {
    fn name(&self) -> &'static str {
        "JoinSortMerge"
    }

    fn description(&self, _mode: DescriptionMode) -> String {
        format!(
            "JoinSortMerge ({} on column {} {} column {})",
            self.mode, self.column_ids.0, self.predicate_condition, self.column_ids.1
        )
    }

    fn execute(&self) -> QuartzResult<()> {
        let left_table = self.left.get_output();
        let right_table = self.right.get_output();

        if left_table.column_data_type(self.column_ids.0)
            != right_table.column_data_type(self.column_ids.1)
        {
            return Err(QuartzError::InvalidType(
                "sort merge join requires matching join column types".to_string(),
            ));
        }

        let cluster_count =
            determine_number_of_clusters(left_table.row_count(), right_table.row_count());

        // Null join keys match nothing. Outer modes keep them for padding;
        // anti joins keep left nulls because unmatched rows qualify.
        let include_null_left =
            matches!(self.mode, JoinMode::Left | JoinMode::Outer | JoinMode::Anti);
        let include_null_right = matches!(self.mode, JoinMode::Right | JoinMode::Outer);

        let cluster_output = radix_cluster_sort(
            &left_table,
            &right_table,
            self.column_ids,
            self.predicate_condition == PredicateCondition::Equals,
            include_null_left,
            include_null_right,
            cluster_count,
        );

        let context = Arc::new(SortMergeContext {
            left_clusters: cluster_output.clusters_left,
            right_clusters: cluster_output.clusters_right,
            mode: self.mode,
            op: self.predicate_condition,
            left_input_table: Arc::clone(&left_table),
            left_column_id: self.column_ids.0,
        });

        let join_impl = JoinSortMergeImpl {
            context,
            left_table,
            right_table,
            null_rows_left: cluster_output.null_rows_left,
            null_rows_right: cluster_output.null_rows_right,
            mode: self.mode,
            op: self.predicate_condition,
            cluster_count,
            include_null_left,
            include_null_right,
        };
        *self.output.lock() = Some(join_impl.execute()?);
        Ok(())
    }

    fn get_output(&self) -> Arc<Table> {
        self.output
            .lock()
            .clone()
            .expect("operator must execute before get_output")
    }

    fn deep_copy(&self) -> Arc<dyn AbstractOperator> {
        JoinSortMerge::new(
            self.left.deep_copy(),
            self.right.deep_copy(),
            self.mode,
            self.column_ids,
            self.predicate_condition,
        )
    }

    fn inputs(&self) -> Vec<Arc<dyn AbstractOperator>> {
        vec![Arc::clone(&self.left), Arc::clone(&self.right)]
    }
}

/// One materialized row of a join column.
struct MaterializedValue {
    value: Value,
    row_id: RowId,
}

type MaterializedSegment = Vec<MaterializedValue>;
type MaterializedSegmentList = Vec<MaterializedSegment>;

/// Number of clusters: grow linearly with the input until clusters stop
/// fitting the assumed L2 cache, then dampen growth to the square root so
/// downstream operators are not flooded with tiny chunks. Rounded to a
/// power of two for radix clustering.
fn determine_number_of_clusters(row_count_left: usize, row_count_right: usize) -> usize {
    const LINEAR_GROWTH_UPPER_BOUND: usize = 16;
    let row_count_max = row_count_left.max(row_count_right);

    let values_per_cluster = ASSUMED_L2_CACHE_SIZE / size_of::<MaterializedValue>();
    let cluster_count_goal = row_count_max / values_per_cluster;

    let cluster_count_capped = cluster_count_goal.min(LINEAR_GROWTH_UPPER_BOUND)
        + (cluster_count_goal.saturating_sub(LINEAR_GROWTH_UPPER_BOUND) as f64).sqrt() as usize;

    if cluster_count_capped <= 1 {
        return 1;
    }
    let final_cluster_count = 2f64.powi((cluster_count_capped as f64).log2().round() as i32);
    (final_cluster_count as usize).max(1)
}

struct ClusterOutput {
    clusters_left: MaterializedSegmentList,
    clusters_right: MaterializedSegmentList,
    null_rows_left: PositionList,
    null_rows_right: PositionList,
}

/// Materialize both join columns and distribute them into `cluster_count`
/// sorted clusters. Equality joins cluster by key hash so equal keys share a
/// cluster; other predicates range cluster on sampled split values so the
/// concatenation of clusters is globally sorted. Null rows are collected
/// separately when the join mode needs them.
fn radix_cluster_sort(
    left_table: &Arc<Table>,
    right_table: &Arc<Table>,
    column_ids: (ColumnId, ColumnId),
    equi_case: bool,
    include_null_left: bool,
    include_null_right: bool,
    cluster_count: usize,
) -> ClusterOutput {
    let (left_values, null_rows_left) =
        materialize_column(left_table, column_ids.0, include_null_left);
    let (right_values, null_rows_right) =
        materialize_column(right_table, column_ids.1, include_null_right);

    let (mut clusters_left, mut clusters_right) = if cluster_count == 1 {
        (vec![left_values], vec![right_values])
    } else if equi_case {
        (
            radix_cluster(left_values, cluster_count),
            radix_cluster(right_values, cluster_count),
        )
    } else {
        let split_values = pick_split_values(&left_values, &right_values, cluster_count);
        (
            range_cluster(left_values, &split_values, cluster_count),
            range_cluster(right_values, &split_values, cluster_count),
        )
    };

    sort_clusters(&mut clusters_left);
    sort_clusters(&mut clusters_right);

    ClusterOutput {
        clusters_left,
        clusters_right,
        null_rows_left,
        null_rows_right,
    }
}

/// Extract `(value, row id)` pairs of one column, one job per chunk.
/// Results keep chunk order; null join keys go to the separate null list
/// when requested and are dropped otherwise.
fn materialize_column(
    table: &Arc<Table>,
    column_id: ColumnId,
    include_nulls: bool,
) -> (MaterializedSegment, PositionList) {
    let chunk_count = table.chunk_count() as usize;
    let results: Arc<Vec<Mutex<(MaterializedSegment, PositionList)>>> = Arc::new(
        (0..chunk_count)
            .map(|_| Mutex::new((Vec::new(), PositionList::new())))
            .collect(),
    );

    let mut jobs = Vec::with_capacity(chunk_count);
    for chunk_id in 0..chunk_count {
        let table = Arc::clone(table);
        let results = Arc::clone(&results);
        let job = Task::new(move || {
            let chunk = table.get_chunk(chunk_id as ChunkId);
            let accessor = SegmentAccessor::new(chunk.get_segment(column_id));
            let mut values = Vec::with_capacity(accessor.len());
            let mut null_rows = PositionList::new();
            for offset in 0..accessor.len() {
                let row_id = RowId::new(chunk_id as ChunkId, offset as ChunkOffset);
                match accessor.value(offset) {
                    Some(value) => values.push(MaterializedValue { value, row_id }),
                    None if include_nulls => null_rows.push(row_id),
                    None => {}
                }
            }
            *results[chunk_id].lock() = (values, null_rows);
        });
        job.set_description(format!("JoinSortMerge materialize chunk {chunk_id}"));
        job.schedule(None);
        jobs.push(job);
    }
    wait_for_tasks(&jobs);

    let mut all_values = Vec::new();
    let mut all_null_rows = PositionList::new();
    for slot in results.iter() {
        let (mut values, null_rows) = std::mem::take(&mut *slot.lock());
        all_values.append(&mut values);
        all_null_rows.extend_from(&null_rows);
    }
    (all_values, all_null_rows)
}

/// Cluster by the low bits of the key hash. Only legal for equality joins,
/// where all matches of a key land in the same cluster.
fn radix_cluster(values: MaterializedSegment, cluster_count: usize) -> MaterializedSegmentList {
    debug_assert!(cluster_count.is_power_of_two());
    let mask = (cluster_count - 1) as u64;
    let mut clusters: MaterializedSegmentList =
        (0..cluster_count).map(|_| Vec::new()).collect();
    for materialized in values {
        let cluster = (hash_value(&materialized.value) & mask) as usize;
        clusters[cluster].push(materialized);
    }
    clusters
}

/// Split values for range clustering: sample both inputs, sort the sample,
/// and take equidistant quantiles. Shared between the two sides so their
/// cluster boundaries agree.
fn pick_split_values(
    left_values: &MaterializedSegment,
    right_values: &MaterializedSegment,
    cluster_count: usize,
) -> Vec<Value> {
    const SAMPLES_PER_CLUSTER: usize = 10;
    let total = left_values.len() + right_values.len();
    let step = (total / (SAMPLES_PER_CLUSTER * cluster_count)).max(1);

    let mut samples: Vec<Value> = left_values
        .iter()
        .chain(right_values.iter())
        .step_by(step)
        .map(|materialized| materialized.value.clone())
        .collect();
    samples.sort_by(|a, b| a.compare(b));

    if samples.is_empty() {
        return Vec::new();
    }
    (1..cluster_count)
        .map(|index| samples[index * samples.len() / cluster_count].clone())
        .collect()
}

/// Cluster into contiguous value ranges so cluster `i` holds exactly the
/// values between split `i - 1` and split `i`.
fn range_cluster(
    values: MaterializedSegment,
    split_values: &[Value],
    cluster_count: usize,
) -> MaterializedSegmentList {
    let mut clusters: MaterializedSegmentList =
        (0..cluster_count).map(|_| Vec::new()).collect();
    for materialized in values {
        let cluster = split_values
            .partition_point(|split| split.compare(&materialized.value) != Ordering::Greater);
        clusters[cluster].push(materialized);
    }
    clusters
}

/// Sort every cluster by value, one job per cluster. The sort is stable, so
/// rows with equal keys keep their materialization order.
fn sort_clusters(clusters: &mut MaterializedSegmentList) {
    let slots: Arc<Vec<Mutex<MaterializedSegment>>> = Arc::new(
        std::mem::take(clusters)
            .into_iter()
            .map(Mutex::new)
            .collect(),
    );
    let mut jobs = Vec::with_capacity(slots.len());
    for cluster_id in 0..slots.len() {
        let slots = Arc::clone(&slots);
        let job = Task::new(move || {
            slots[cluster_id]
                .lock()
                .sort_by(|a, b| a.value.compare(&b.value));
        });
        job.set_description(format!("JoinSortMerge sort cluster {cluster_id}"));
        job.schedule(None);
        jobs.push(job);
    }
    wait_for_tasks(&jobs);

    *clusters = Arc::try_unwrap(slots)
        .unwrap_or_else(|_| panic!("cluster sort results still shared"))
        .into_iter()
        .map(|slot| slot.into_inner())
        .collect();
}

/// A position in the clustered, sorted representation of one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TablePosition {
    cluster: usize,
    index: usize,
}

impl TablePosition {
    fn new(cluster: usize, index: usize) -> Self {
        Self { cluster, index }
    }

    fn to(self, end: TablePosition) -> TableRange {
        TableRange { start: self, end }
    }
}

/// A range of rows between two positions, possibly spanning clusters.
#[derive(Debug, Clone, Copy)]
struct TableRange {
    start: TablePosition,
    end: TablePosition,
}

impl TableRange {
    fn new(cluster: usize, start_index: usize, end_index: usize) -> Self {
        Self {
            start: TablePosition::new(cluster, start_index),
            end: TablePosition::new(cluster, end_index),
        }
    }

    fn for_every_row_id(&self, table: &MaterializedSegmentList, mut action: impl FnMut(RowId)) {
        for cluster in self.start.cluster..=self.end.cluster {
            if cluster >= table.len() {
                break;
            }
            let start_index = if cluster == self.start.cluster {
                self.start.index
            } else {
                0
            };
            let end_index = if cluster == self.end.cluster {
                self.end.index
            } else {
                table[cluster].len()
            };
            for index in start_index..end_index {
                action(table[cluster][index].row_id);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareResult {
    Less,
    Greater,
    Equal,
}

/// Read-only join state shared with the per-cluster merge jobs.
struct SortMergeContext {
    left_clusters: MaterializedSegmentList,
    right_clusters: MaterializedSegmentList,
    mode: JoinMode,
    op: PredicateCondition,
    left_input_table: Arc<Table>,
    left_column_id: ColumnId,
}

impl SortMergeContext {
    fn end_of_left(&self) -> TablePosition {
        end_of_table(&self.left_clusters)
    }

    fn end_of_right(&self) -> TablePosition {
        end_of_table(&self.right_clusters)
    }
}

fn end_of_table(table: &MaterializedSegmentList) -> TablePosition {
    debug_assert!(!table.is_empty(), "clustered table has no clusters");
    let last_cluster = table.len() - 1;
    TablePosition::new(last_cluster, table[last_cluster].len())
}

/// Length of the run of equal values starting at `start`.
fn run_length(values: &MaterializedSegment, start: usize) -> usize {
    if start >= values.len() {
        return 0;
    }
    let target = &values[start].value;
    values[start..].partition_point(|materialized| {
        materialized.value.compare(target) != Ordering::Greater
    })
}

/// Emits join result row id pairs for one cluster job.
struct Emitter<'a> {
    context: &'a SortMergeContext,
    left_out: &'a mut PositionList,
    right_out: &'a mut PositionList,
}

impl<'a> Emitter<'a> {
    fn emit_combination(&mut self, left: RowId, right: RowId) {
        self.left_out.push(left);
        self.right_out.push(right);
    }

    /// Cross product of both ranges. Semi and anti joins keep only the left
    /// row ids, each at most once per run.
    fn emit_all_combinations(&mut self, left_range: TableRange, right_range: TableRange) {
        if matches!(self.context.mode, JoinMode::Semi | JoinMode::Anti) {
            left_range.for_every_row_id(&self.context.left_clusters, |left_row_id| {
                self.left_out.push(left_row_id);
            });
            return;
        }
        let mut right_row_ids = Vec::new();
        right_range.for_every_row_id(&self.context.right_clusters, |right_row_id| {
            right_row_ids.push(right_row_id);
        });
        left_range.for_every_row_id(&self.context.left_clusters, |left_row_id| {
            for &right_row_id in &right_row_ids {
                self.left_out.push(left_row_id);
                self.right_out.push(right_row_id);
            }
        });
    }

    fn emit_right_null_combinations(&mut self, left_range: TableRange) {
        left_range.for_every_row_id(&self.context.left_clusters, |left_row_id| {
            self.left_out.push(left_row_id);
            self.right_out.push(NULL_ROW_ID);
        });
    }

    fn emit_left_null_combinations(&mut self, right_range: TableRange) {
        right_range.for_every_row_id(&self.context.right_clusters, |right_row_id| {
            self.left_out.push(NULL_ROW_ID);
            self.right_out.push(right_row_id);
        });
    }

    /// Handle one `(left run, right run)` pair according to the predicate
    /// and the comparison of their values.
    fn join_runs(
        &mut self,
        left_run: TableRange,
        right_run: TableRange,
        compare_result: CompareResult,
    ) {
        let end_of_left = self.context.end_of_left();
        let end_of_right = self.context.end_of_right();
        let mode = self.context.mode;
        match self.context.op {
            PredicateCondition::Equals => match compare_result {
                CompareResult::Equal => self.emit_all_combinations(left_run, right_run),
                CompareResult::Less => {
                    if matches!(mode, JoinMode::Left | JoinMode::Outer) {
                        self.emit_right_null_combinations(left_run);
                    }
                }
                CompareResult::Greater => {
                    if matches!(mode, JoinMode::Right | JoinMode::Outer) {
                        self.emit_left_null_combinations(right_run);
                    }
                }
            },
            PredicateCondition::NotEquals => match compare_result {
                CompareResult::Greater => {
                    self.emit_all_combinations(left_run.start.to(end_of_left), right_run);
                }
                CompareResult::Equal => {
                    self.emit_all_combinations(left_run.end.to(end_of_left), right_run);
                    self.emit_all_combinations(left_run, right_run.end.to(end_of_right));
                }
                CompareResult::Less => {
                    self.emit_all_combinations(left_run, right_run.start.to(end_of_right));
                }
            },
            PredicateCondition::GreaterThan => match compare_result {
                CompareResult::Greater => {
                    self.emit_all_combinations(left_run.start.to(end_of_left), right_run);
                }
                CompareResult::Equal => {
                    self.emit_all_combinations(left_run.end.to(end_of_left), right_run);
                }
                CompareResult::Less => {}
            },
            PredicateCondition::GreaterThanEquals => {
                if compare_result == CompareResult::Greater || compare_result == CompareResult::Equal
                {
                    self.emit_all_combinations(left_run.start.to(end_of_left), right_run);
                }
            }
            PredicateCondition::LessThan => match compare_result {
                CompareResult::Less => {
                    self.emit_all_combinations(left_run, right_run.start.to(end_of_right));
                }
                CompareResult::Equal => {
                    self.emit_all_combinations(left_run, right_run.end.to(end_of_right));
                }
                CompareResult::Greater => {}
            },
            PredicateCondition::LessThanEquals => {
                if compare_result == CompareResult::Less || compare_result == CompareResult::Equal {
                    self.emit_all_combinations(left_run, right_run.start.to(end_of_right));
                }
            }
        }
    }
}

fn compare_values(left: &Value, right: &Value) -> CompareResult {
    match left.compare(right) {
        Ordering::Less => CompareResult::Less,
        Ordering::Equal => CompareResult::Equal,
        Ordering::Greater => CompareResult::Greater,
    }
}

/// Merge one cluster pair. Runs of equal values are advanced as units; any
/// remainder after one side is exhausted goes through the Less/Greater
/// branches, which matters for outer and non-equality joins.
fn join_cluster(context: &SortMergeContext, cluster_number: usize) -> (PositionList, PositionList) {
    let left_cluster = &context.left_clusters[cluster_number];
    let right_cluster = &context.right_clusters[cluster_number];

    let mut left_out = PositionList::new();
    let mut right_out = PositionList::new();
    let mut emitter = Emitter {
        context,
        left_out: &mut left_out,
        right_out: &mut right_out,
    };

    let mut left_run_start = 0usize;
    let mut right_run_start = 0usize;
    let mut left_run_end = left_run_start + run_length(left_cluster, left_run_start);
    let mut right_run_end = right_run_start + run_length(right_cluster, right_run_start);

    let left_size = left_cluster.len();
    let right_size = right_cluster.len();

    while left_run_start < left_size && right_run_start < right_size {
        let left_value = &left_cluster[left_run_start].value;
        let right_value = &right_cluster[right_run_start].value;
        let compare_result = compare_values(left_value, right_value);

        let left_run = TableRange::new(cluster_number, left_run_start, left_run_end);
        let right_run = TableRange::new(cluster_number, right_run_start, right_run_end);
        emitter.join_runs(left_run, right_run, compare_result);

        match compare_result {
            CompareResult::Equal => {
                left_run_start = left_run_end;
                right_run_start = right_run_end;
                left_run_end = left_run_start + run_length(left_cluster, left_run_start);
                right_run_end = right_run_start + run_length(right_cluster, right_run_start);
            }
            CompareResult::Less => {
                left_run_start = left_run_end;
                left_run_end = left_run_start + run_length(left_cluster, left_run_start);
            }
            CompareResult::Greater => {
                right_run_start = right_run_end;
                right_run_end = right_run_start + run_length(right_cluster, right_run_start);
            }
        }
    }

    let left_rest = TableRange::new(cluster_number, left_run_start, left_size);
    let right_rest = TableRange::new(cluster_number, right_run_start, right_size);
    if left_run_start < left_size {
        emitter.join_runs(left_rest, right_rest, CompareResult::Less);
    } else if right_run_start < right_size {
        emitter.join_runs(left_rest, right_rest, CompareResult::Greater);
    }

    // Anti joins overwrite the semi result: every left row whose value is in
    // the match list drops out, the rest survives.
    if context.mode == JoinMode::Anti {
        left_out = remove_matched_row_ids(context, &left_out, left_cluster);
    }

    (left_out, right_out)
}

/// Anti-merge of the semi-join matches against the sorted cluster. Both are
/// ordered by value, so one linear pass suffices. Segment accessors are
/// cached per chunk to resolve the match values.
fn remove_matched_row_ids(
    context: &SortMergeContext,
    matches: &PositionList,
    input_cluster: &MaterializedSegment,
) -> PositionList {
    let mut result =
        PositionList::with_capacity(input_cluster.len().saturating_sub(matches.len()));

    if matches.is_empty() {
        for materialized in input_cluster {
            result.push(materialized.row_id);
        }
        return result;
    }

    let chunk_count = context.left_input_table.chunk_count() as usize;
    let mut accessors: Vec<Option<SegmentAccessor>> = (0..chunk_count).map(|_| None).collect();

    let mut match_index = 0usize;
    let mut input_index = 0usize;
    while input_index < input_cluster.len() {
        let match_row_id = matches[match_index];
        let accessor = accessors[match_row_id.chunk_id as usize].get_or_insert_with(|| {
            SegmentAccessor::new(
                context
                    .left_input_table
                    .get_chunk(match_row_id.chunk_id)
                    .get_segment(context.left_column_id),
            )
        });
        // Matches stem from an equality join and therefore cannot be null.
        let match_value = accessor
            .value(match_row_id.chunk_offset as usize)
            .expect("semi join matches cannot be null");

        let input = &input_cluster[input_index];
        match input.value.compare(&match_value) {
            Ordering::Equal => {
                input_index += 1;
                match_index += 1;
                if match_index == matches.len() {
                    for materialized in &input_cluster[input_index..] {
                        result.push(materialized.row_id);
                    }
                    break;
                }
            }
            Ordering::Less => {
                result.push(input.row_id);
                input_index += 1;
            }
            Ordering::Greater => {
                for materialized in &input_cluster[input_index..] {
                    result.push(materialized.row_id);
                }
                break;
            }
        }
    }
    result
}

/// Smallest value of a globally sorted clustered table.
fn table_min_value(table: &MaterializedSegmentList) -> Option<&Value> {
    table
        .iter()
        .find(|cluster| !cluster.is_empty())
        .map(|cluster| &cluster[0].value)
}

/// Largest value of a globally sorted clustered table.
fn table_max_value(table: &MaterializedSegmentList) -> Option<&Value> {
    table
        .iter()
        .rev()
        .find(|cluster| !cluster.is_empty())
        .map(|cluster| &cluster.last().unwrap().value)
}

/// First position whose value satisfies a monotone condition, scanning the
/// globally sorted table front to back.
fn first_value_that_satisfies(
    table: &MaterializedSegmentList,
    condition: impl Fn(&Value) -> bool,
) -> Option<TablePosition> {
    for (cluster_id, cluster) in table.iter().enumerate() {
        if cluster.is_empty() || !condition(&cluster.last().unwrap().value) {
            continue;
        }
        for (index, materialized) in cluster.iter().enumerate() {
            if condition(&materialized.value) {
                return Some(TablePosition::new(cluster_id, index));
            }
        }
    }
    None
}

struct JoinSortMergeImpl {
    context: Arc<SortMergeContext>,
    left_table: Arc<Table>,
    right_table: Arc<Table>,
    null_rows_left: PositionList,
    null_rows_right: PositionList,
    mode: JoinMode,
    op: PredicateCondition,
    cluster_count: usize,
    include_null_left: bool,
    include_null_right: bool,
}

impl JoinSortMergeImpl {
    fn execute(&self) -> QuartzResult<Arc<Table>> {
        let mut output_pos_lists = self.perform_join();

        // Rows whose join key is null never match; outer modes append them
        // with padding on the opposite side.
        if self.include_null_left || self.include_null_right {
            let mut null_output_left = PositionList::new();
            let mut null_output_right = PositionList::new();
            if self.include_null_left {
                for row_id in &self.null_rows_left {
                    null_output_left.push(*row_id);
                    null_output_right.push(NULL_ROW_ID);
                }
            }
            if self.include_null_right {
                for row_id in &self.null_rows_right {
                    null_output_left.push(NULL_ROW_ID);
                    null_output_right.push(*row_id);
                }
            }
            output_pos_lists.push((null_output_left, null_output_right));
        }

        self.write_output(output_pos_lists)
    }

    /// Merge all clusters in parallel, then patch outer rows for
    /// non-equality predicates (their bounds may lie in other clusters, so
    /// they cannot be handled inside one cluster job).
    fn perform_join(&self) -> Vec<(PositionList, PositionList)> {
        let outputs: Arc<Vec<Mutex<(PositionList, PositionList)>>> = Arc::new(
            (0..self.cluster_count)
                .map(|_| Mutex::new((PositionList::new(), PositionList::new())))
                .collect(),
        );

        let mut jobs = Vec::with_capacity(self.cluster_count);
        for cluster_number in 0..self.cluster_count {
            // Empty clusters cannot produce equality matches.
            if matches!(self.mode, JoinMode::Inner | JoinMode::Semi)
                && self.op == PredicateCondition::Equals
                && (self.context.left_clusters[cluster_number].is_empty()
                    || self.context.right_clusters[cluster_number].is_empty())
            {
                continue;
            }
            let context = Arc::clone(&self.context);
            let outputs = Arc::clone(&outputs);
            let job = Task::new(move || {
                *outputs[cluster_number].lock() = join_cluster(&context, cluster_number);
            });
            job.set_description(format!("JoinSortMerge cluster {cluster_number}"));
            job.schedule(None);
            jobs.push(job);
        }
        wait_for_tasks(&jobs);

        let mut output_pos_lists: Vec<(PositionList, PositionList)> = outputs
            .iter()
            .map(|slot| std::mem::take(&mut *slot.lock()))
            .collect();

        if self.op != PredicateCondition::Equals {
            if matches!(self.mode, JoinMode::Left | JoinMode::Outer) {
                self.left_outer_non_equi_join(&mut output_pos_lists[0]);
            }
            if matches!(self.mode, JoinMode::Right | JoinMode::Outer) {
                self.right_outer_non_equi_join(&mut output_pos_lists[0]);
            }
        }

        output_pos_lists
    }

    /// Pad left rows without a join partner for `<`, `<=`, `>`, `>=`. The
    /// matched rows form a prefix or suffix of the sorted left input, bounded
    /// by the right-side extremum.
    fn left_outer_non_equi_join(&self, output: &mut (PositionList, PositionList)) {
        let left = &self.context.left_clusters;
        let right = &self.context.right_clusters;
        let end_of_left = self.context.end_of_left();
        let begin_of_left = TablePosition::new(0, 0);

        let (right_min, right_max) = match (table_min_value(right), table_max_value(right)) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                // No right values at all: every left row goes unmatched.
                self.emit_right_null_range(begin_of_left.to(end_of_left), output);
                return;
            }
        };

        let unmatched = match self.op {
            // l < r matches iff l is below the right maximum.
            PredicateCondition::LessThan => {
                first_value_that_satisfies(left, |value| {
                    value.compare(right_max) != Ordering::Less
                })
                .map(|position| position.to(end_of_left))
            }
            PredicateCondition::LessThanEquals => {
                first_value_that_satisfies(left, |value| {
                    value.compare(right_max) == Ordering::Greater
                })
                .map(|position| position.to(end_of_left))
            }
            // l > r matches iff l is above the right minimum.
            PredicateCondition::GreaterThan => {
                let first_matched = first_value_that_satisfies(left, |value| {
                    value.compare(right_min) == Ordering::Greater
                })
                .unwrap_or(end_of_left);
                Some(begin_of_left.to(first_matched))
            }
            PredicateCondition::GreaterThanEquals => {
                let first_matched = first_value_that_satisfies(left, |value| {
                    value.compare(right_min) != Ordering::Less
                })
                .unwrap_or(end_of_left);
                Some(begin_of_left.to(first_matched))
            }
            _ => None,
        };

        if let Some(range) = unmatched {
            self.emit_right_null_range(range, output);
        }
    }

    /// Pad right rows without a join partner for `<`, `<=`, `>`, `>=`,
    /// mirroring the left-outer patch with the left-side extrema.
    fn right_outer_non_equi_join(&self, output: &mut (PositionList, PositionList)) {
        let left = &self.context.left_clusters;
        let right = &self.context.right_clusters;
        let end_of_right = self.context.end_of_right();
        let begin_of_right = TablePosition::new(0, 0);

        let (left_min, left_max) = match (table_min_value(left), table_max_value(left)) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                self.emit_left_null_range(begin_of_right.to(end_of_right), output);
                return;
            }
        };

        let unmatched = match self.op {
            // l < r matches r iff r is above the left minimum.
            PredicateCondition::LessThan => {
                let first_matched = first_value_that_satisfies(right, |value| {
                    value.compare(left_min) == Ordering::Greater
                })
                .unwrap_or(end_of_right);
                Some(begin_of_right.to(first_matched))
            }
            PredicateCondition::LessThanEquals => {
                let first_matched = first_value_that_satisfies(right, |value| {
                    value.compare(left_min) != Ordering::Less
                })
                .unwrap_or(end_of_right);
                Some(begin_of_right.to(first_matched))
            }
            // l > r matches r iff r is below the left maximum.
            PredicateCondition::GreaterThan => {
                first_value_that_satisfies(right, |value| {
                    value.compare(left_max) != Ordering::Less
                })
                .map(|position| position.to(end_of_right))
            }
            PredicateCondition::GreaterThanEquals => {
                first_value_that_satisfies(right, |value| {
                    value.compare(left_max) == Ordering::Greater
                })
                .map(|position| position.to(end_of_right))
            }
            _ => None,
        };

        if let Some(range) = unmatched {
            self.emit_left_null_range(range, output);
        }
    }

    fn emit_right_null_range(
        &self,
        range: TableRange,
        output: &mut (PositionList, PositionList),
    ) {
        range.for_every_row_id(&self.context.left_clusters, |left_row_id| {
            output.0.push(left_row_id);
            output.1.push(NULL_ROW_ID);
        });
    }

    fn emit_left_null_range(&self, range: TableRange, output: &mut (PositionList, PositionList)) {
        range.for_every_row_id(&self.context.right_clusters, |right_row_id| {
            output.0.push(NULL_ROW_ID);
            output.1.push(right_row_id);
        });
    }

    /// Build the output table: one chunk of reference segments per position
    /// list pair. Writing parallelizes when the clusters are both numerous
    /// and large enough to pay for the scheduling.
    fn write_output(
        &self,
        output_pos_lists: Vec<(PositionList, PositionList)>,
    ) -> QuartzResult<Arc<Table>> {
        let discard_right = matches!(self.mode, JoinMode::Semi | JoinMode::Anti);
        let output_table = if discard_right {
            build_join_output_table(&self.left_table, None, self.mode)
        } else {
            build_join_output_table(&self.left_table, Some(&self.right_table), self.mode)
        };

        let write_output_concurrently = self.cluster_count > 1
            && output_pos_lists
                .first()
                .is_some_and(|(left, _)| left.len() > PARALLEL_OUTPUT_WRITE_THRESHOLD);

        let result_chunks: Arc<Vec<Mutex<Option<Vec<Arc<Segment>>>>>> = Arc::new(
            (0..output_pos_lists.len()).map(|_| Mutex::new(None)).collect(),
        );

        let mut jobs = Vec::new();
        for (pos_list_id, (left, right)) in output_pos_lists.into_iter().enumerate() {
            if left.is_empty() && right.is_empty() {
                continue;
            }
            let left = Arc::new(left);
            let right = Arc::new(right);
            let left_table = Arc::clone(&self.left_table);
            let right_table = Arc::clone(&self.right_table);
            let result_chunks = Arc::clone(&result_chunks);
            let write_chunk = move || {
                let mut output_segments = Vec::new();
                add_output_segments(&mut output_segments, &left_table, &left);
                if !discard_right {
                    add_output_segments(&mut output_segments, &right_table, &right);
                }
                *result_chunks[pos_list_id].lock() = Some(output_segments);
            };

            if write_output_concurrently {
                let job = Task::new(write_chunk);
                job.set_description(format!("JoinSortMerge output partition {pos_list_id}"));
                job.schedule(None);
                jobs.push(job);
            } else {
                write_chunk();
            }
        }
        if write_output_concurrently {
            wait_for_tasks(&jobs);
        }

        for slot in result_chunks.iter() {
            if let Some(segments) = slot.lock().take() {
                output_table.append_chunk(segments)?;
            }
        }
        Ok(output_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_count_small_inputs() {
        assert_eq!(determine_number_of_clusters(0, 0), 1);
        assert_eq!(determine_number_of_clusters(100, 5_000), 1);
    }

    #[test]
    fn test_cluster_count_is_power_of_two() {
        for rows in [10_000, 100_000, 1_000_000, 10_000_000] {
            let clusters = determine_number_of_clusters(rows, rows / 2);
            assert!(clusters.is_power_of_two(), "{clusters} for {rows} rows");
        }
    }

    #[test]
    fn test_cluster_count_growth_dampens() {
        let values_per_cluster = ASSUMED_L2_CACHE_SIZE / size_of::<MaterializedValue>();
        // Goal of exactly 16 clusters grows linearly.
        let rows = 16 * values_per_cluster;
        assert_eq!(determine_number_of_clusters(rows, 0), 16);
        // Beyond that, growth is dampened to the square root.
        let rows = 64 * values_per_cluster;
        let clusters = determine_number_of_clusters(rows, 0);
        assert!(clusters < 64, "expected dampened growth, got {clusters}");
    }

    #[test]
    fn test_run_length_finds_runs() {
        let cluster: MaterializedSegment = [1, 1, 1, 2, 3, 3]
            .iter()
            .enumerate()
            .map(|(index, &value)| MaterializedValue {
                value: Value::Int(value),
                row_id: RowId::new(0, index as ChunkOffset),
            })
            .collect();
        assert_eq!(run_length(&cluster, 0), 3);
        assert_eq!(run_length(&cluster, 3), 1);
        assert_eq!(run_length(&cluster, 4), 2);
        assert_eq!(run_length(&cluster, 6), 0);
    }

    #[test]
    fn test_range_cluster_respects_splits() {
        let values: MaterializedSegment = [5, 1, 9, 3, 7]
            .iter()
            .enumerate()
            .map(|(index, &value)| MaterializedValue {
                value: Value::Int(value),
                row_id: RowId::new(0, index as ChunkOffset),
            })
            .collect();
        let splits = vec![Value::Int(4), Value::Int(8)];
        let clusters = range_cluster(values, &splits, 3);
        let as_ints = |cluster: &MaterializedSegment| -> Vec<i32> {
            cluster
                .iter()
                .map(|materialized| match materialized.value {
                    Value::Int(value) => value,
                    _ => unreachable!(),
                })
                .collect()
        };
        assert_eq!(as_ints(&clusters[0]), vec![1, 3]);
        assert_eq!(as_ints(&clusters[1]), vec![5, 7]);
        assert_eq!(as_ints(&clusters[2]), vec![9]);
    }
}
