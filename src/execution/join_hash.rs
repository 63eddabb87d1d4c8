//! Hash join
//!
//! Radix-partitioned hash join. The build side is materialized, partitioned
//! by the high bits of the key hash and turned into per-partition hash
//! tables; the probe side is materialized and partitioned the same way. Both
//! pipelines run as concurrent scheduler jobs; probing then runs one job per
//! partition. The partition count is derived from the build relation size so
//! each hash table can be expected to fit the L2 cache.

use std::collections::HashMap as StdHashMap;
use std::mem::size_of;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::warn;

use crate::common::constants::ASSUMED_L2_CACHE_SIZE;
use crate::common::{QuartzError, QuartzResult};
use crate::execution::join_common::{
    build_join_output_table, dereference_pos_list, hash_value, setup_pos_lists_by_segment,
    JoinPredicate, PosLists, PosListsBySegment,
};
use crate::execution::operator::{AbstractOperator, DescriptionMode};
use crate::scheduler::{wait_for_tasks, Task};
use crate::storage::{
    PositionList, ReferenceSegment, Segment, SegmentAccessor, Table, TableType,
};
use crate::types::{
    ChunkId, ChunkOffset, ColumnId, JoinMode, PredicateCondition, RowId, Value, NULL_ROW_ID,
};

/// Parallel radix-partitioned hash join operator.
pub struct JoinHash {
    left: Arc<dyn AbstractOperator>,
    right: Arc<dyn AbstractOperator>,
    mode: JoinMode,
    column_ids: (ColumnId, ColumnId),
    predicate_condition: PredicateCondition,
    radix_bits: Option<usize>,
    additional_predicates: Vec<JoinPredicate>,
    output: Mutex<Option<Arc<Table>>>,
}

impl JoinHash {
    pub fn new(
        left: Arc<dyn AbstractOperator>,
        right: Arc<dyn AbstractOperator>,
        mode: JoinMode,
        column_ids: (ColumnId, ColumnId),
        predicate_condition: PredicateCondition,
        radix_bits: Option<usize>,
        additional_predicates: Vec<JoinPredicate>,
    ) -> Arc<Self> {
        assert_ne!(mode, JoinMode::Cross, "hash join does not support cross joins");
        assert_eq!(
            predicate_condition,
            PredicateCondition::Equals,
            "hash join only supports equality as the primary predicate"
        );
        assert!(
            additional_predicates
                .iter()
                .all(|predicate| predicate.condition == PredicateCondition::Equals),
            "additional hash join predicates must use equality"
        );
        Arc::new(Self {
            left,
            right,
            mode,
            column_ids,
            predicate_condition,
            radix_bits,
            additional_predicates,
            output: Mutex::new(None),
        })
    }
}

impl AbstractOperator for JoinHash {
    fn name(&self) -> &'static str {
        "JoinHash"
    }

    fn description(&self, _mode: DescriptionMode) -> String {
        format!(
            "JoinHash ({} on column {} {} column {})",
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
                "hash join requires matching join column types".to_string(),
            ));
        }

        // Left outer, semi and anti joins always swap so the kept side
        // probes; otherwise the smaller input becomes the build side.
        let mut inputs_swapped = matches!(
            self.mode,
            JoinMode::Left | JoinMode::Semi | JoinMode::Anti
        );
        if !inputs_swapped && left_table.row_count() > right_table.row_count() {
            inputs_swapped = true;
        }

        let (build_table, probe_table, build_column_id, probe_column_id) = if inputs_swapped {
            (right_table, left_table, self.column_ids.1, self.column_ids.0)
        } else {
            (left_table, right_table, self.column_ids.0, self.column_ids.1)
        };

        // Only equality is supported, so the primary condition survives the
        // swap unchanged; additional predicates swap their column pairs and
        // flip their conditions.
        let additional_predicates: Vec<JoinPredicate> = if inputs_swapped {
            self.additional_predicates
                .iter()
                .map(JoinPredicate::flip)
                .collect()
        } else {
            self.additional_predicates.clone()
        };
        for predicate in &additional_predicates {
            if build_table.column_data_type(predicate.column_ids.0)
                != probe_table.column_data_type(predicate.column_ids.1)
            {
                return Err(QuartzError::InvalidType(
                    "hash join predicates require matching column types".to_string(),
                ));
            }
        }

        let radix_bits = self.radix_bits.unwrap_or_else(|| {
            calculate_radix_bits(
                build_table.row_count(),
                probe_table.row_count(),
                inputs_swapped,
            )
        });

        let join_impl = JoinHashImpl {
            shared: Arc::new(JoinHashShared {
                build_table,
                probe_table,
                mode: self.mode,
                additional_predicates,
            }),
            build_column_id,
            probe_column_id,
            inputs_swapped,
            radix_bits,
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
        JoinHash::new(
            self.left.deep_copy(),
            self.right.deep_copy(),
            self.mode,
            self.column_ids,
            self.predicate_condition,
            self.radix_bits,
            self.additional_predicates.clone(),
        )
    }

    fn inputs(&self) -> Vec<Arc<dyn AbstractOperator>> {
        vec![Arc::clone(&self.left), Arc::clone(&self.right)]
    }
}

/// Derive the radix bit count from the build relation size so that one
/// partition's hash table stays within the assumed L2 capacity. Each entry
/// is estimated as key + two-element row id vector + one byte overhead,
/// against a 0.8 fill factor, with a 2x safety factor on the cache size.
fn calculate_radix_bits(
    build_row_count: usize,
    probe_row_count: usize,
    inputs_swapped: bool,
) -> usize {
    if build_row_count > probe_row_count {
        warn!(
            inputs_swapped,
            "left relation larger than right relation in hash join"
        );
    }

    const FILL_FACTOR: f64 = 0.8;
    const ADAPTION_FACTOR: f64 = 2.0;

    let bytes_per_entry = size_of::<Value>() + 2 * size_of::<RowId>() + 1;
    let hash_map_size = (build_row_count * bytes_per_entry) as f64 / FILL_FACTOR;
    let cluster_count =
        ((ADAPTION_FACTOR * hash_map_size) / ASSUMED_L2_CACHE_SIZE as f64).max(1.0);
    cluster_count.log2().ceil() as usize
}

/// Partition index from the high `radix_bits` bits of a hash.
#[inline]
fn radix_partition(hash: u64, radix_bits: usize) -> usize {
    if radix_bits == 0 {
        0
    } else {
        (hash >> (64 - radix_bits)) as usize
    }
}

/// One materialized row: its address and its key value. `None` encodes a
/// null key; those are only materialized for sides that keep them.
struct MaterializedRow {
    row_id: RowId,
    value: Option<Value>,
}

type RadixPartition = Arc<Vec<MaterializedRow>>;

/// Hash table of one partition: key value to indices into the partition's
/// element vector. Indices (rather than row ids) let probing mark matched
/// build rows for outer padding.
type JoinHashTable = HashMap<Value, SmallVec<[u32; 2]>>;

/// Join state shared with the per-partition jobs.
struct JoinHashShared {
    build_table: Arc<Table>,
    probe_table: Arc<Table>,
    mode: JoinMode,
    additional_predicates: Vec<JoinPredicate>,
}

impl JoinHashShared {
    /// Additional predicates require strict equality on both sides; a null
    /// on either side fails the pair.
    fn passes_additional_predicates(&self, build_row_id: RowId, probe_row_id: RowId) -> bool {
        self.additional_predicates.iter().all(|predicate| {
            let build_value = self
                .build_table
                .value_at(predicate.column_ids.0, build_row_id);
            let probe_value = self
                .probe_table
                .value_at(predicate.column_ids.1, probe_row_id);
            match (build_value, probe_value) {
                (Some(build_value), Some(probe_value)) => build_value == probe_value,
                _ => false,
            }
        })
    }
}

struct JoinHashImpl {
    shared: Arc<JoinHashShared>,
    build_column_id: ColumnId,
    probe_column_id: ColumnId,
    inputs_swapped: bool,
    radix_bits: usize,
}

impl JoinHashImpl {
    fn execute(&self) -> QuartzResult<Arc<Table>> {
        let partition_count = 1usize << self.radix_bits;
        let mode = self.shared.mode;

        // Which original side is kept determines where padding (and thus
        // null materialization) happens after the swap.
        let left_outer = matches!(mode, JoinMode::Left | JoinMode::Outer);
        let right_outer = matches!(mode, JoinMode::Right | JoinMode::Outer);
        let pad_probe = if self.inputs_swapped { left_outer } else { right_outer };
        let pad_build = if self.inputs_swapped { right_outer } else { left_outer };
        // Null probe keys match nothing, which qualifies them for anti join
        // output, so anti joins keep probe-side nulls as well.
        let keep_probe_nulls = pad_probe || mode == JoinMode::Anti;
        let keep_build_nulls = pad_build;

        // Build and probe pipelines run concurrently; each parallelizes
        // internally over chunks and partitions.
        type BuildOutput = (Vec<RadixPartition>, Vec<Option<Arc<JoinHashTable>>>);
        let build_result: Arc<Mutex<Option<BuildOutput>>> = Arc::new(Mutex::new(None));
        let probe_result: Arc<Mutex<Option<Vec<RadixPartition>>>> = Arc::new(Mutex::new(None));

        let mut pipeline_jobs = Vec::with_capacity(2);
        {
            let table = Arc::clone(&self.shared.build_table);
            let column_id = self.build_column_id;
            let radix_bits = self.radix_bits;
            let slot = Arc::clone(&build_result);
            let job = Task::new(move || {
                let chunked = materialize_input(
                    &table,
                    column_id,
                    keep_build_nulls,
                    radix_bits,
                    partition_count,
                );
                let partitions = partition_radix(chunked, partition_count);
                let hash_tables = build_hash_tables(&partitions);
                *slot.lock() = Some((partitions, hash_tables));
            });
            job.set_description("JoinHash build pipeline");
            job.schedule(None);
            pipeline_jobs.push(job);
        }
        {
            let table = Arc::clone(&self.shared.probe_table);
            let column_id = self.probe_column_id;
            let radix_bits = self.radix_bits;
            let slot = Arc::clone(&probe_result);
            let job = Task::new(move || {
                let chunked = materialize_input(
                    &table,
                    column_id,
                    keep_probe_nulls,
                    radix_bits,
                    partition_count,
                );
                *slot.lock() = Some(partition_radix(chunked, partition_count));
            });
            job.set_description("JoinHash probe pipeline");
            job.schedule(None);
            pipeline_jobs.push(job);
        }
        wait_for_tasks(&pipeline_jobs);

        let (build_partitions, hash_tables) = build_result
            .lock()
            .take()
            .expect("build pipeline must produce partitions");
        let probe_partitions = probe_result
            .lock()
            .take()
            .expect("probe pipeline must produce partitions");

        let (left_pos_lists, right_pos_lists) =
            if matches!(mode, JoinMode::Semi | JoinMode::Anti) {
                self.probe_semi_anti(&build_partitions, &hash_tables, &probe_partitions)
            } else {
                self.probe(
                    &build_partitions,
                    &hash_tables,
                    &probe_partitions,
                    pad_probe,
                    pad_build,
                )
            };

        self.write_output(left_pos_lists, right_pos_lists)
    }

    /// Probe phase for inner and outer modes: one job per partition, each
    /// emitting `(build_row, probe_row)` pairs plus padding rows.
    fn probe(
        &self,
        build_partitions: &[RadixPartition],
        hash_tables: &[Option<Arc<JoinHashTable>>],
        probe_partitions: &[RadixPartition],
        pad_probe: bool,
        pad_build: bool,
    ) -> (Vec<PositionList>, Vec<PositionList>) {
        let partition_count = probe_partitions.len();
        let outputs: Arc<Vec<Mutex<(PositionList, PositionList)>>> = Arc::new(
            (0..partition_count)
                .map(|_| Mutex::new((PositionList::new(), PositionList::new())))
                .collect(),
        );

        let mut jobs = Vec::with_capacity(partition_count);
        for partition_id in 0..partition_count {
            let outputs = Arc::clone(&outputs);
            let shared = Arc::clone(&self.shared);
            let build_elements = Arc::clone(&build_partitions[partition_id]);
            let hash_table = hash_tables[partition_id].clone();
            let probe_elements = Arc::clone(&probe_partitions[partition_id]);
            let job = Task::new(move || {
                // Simple heuristic: around half of the probe rows match.
                let mut left_out = PositionList::with_capacity(probe_elements.len() / 2);
                let mut right_out = PositionList::with_capacity(probe_elements.len() / 2);
                let mut matched = vec![false; build_elements.len()];

                for probe_row in probe_elements.iter() {
                    let mut any_match = false;
                    if let (Some(value), Some(hash_table)) = (&probe_row.value, &hash_table) {
                        if let Some(indices) = hash_table.get(value) {
                            for &index in indices {
                                let build_row_id = build_elements[index as usize].row_id;
                                if shared
                                    .passes_additional_predicates(build_row_id, probe_row.row_id)
                                {
                                    any_match = true;
                                    matched[index as usize] = true;
                                    left_out.push(build_row_id);
                                    right_out.push(probe_row.row_id);
                                }
                            }
                        }
                    }
                    if !any_match && pad_probe {
                        left_out.push(NULL_ROW_ID);
                        right_out.push(probe_row.row_id);
                    }
                }

                if pad_build {
                    for (index, was_matched) in matched.iter().enumerate() {
                        if !was_matched {
                            left_out.push(build_elements[index].row_id);
                            right_out.push(NULL_ROW_ID);
                        }
                    }
                }

                *outputs[partition_id].lock() = (left_out, right_out);
            });
            job.set_description(format!("JoinHash probe partition {partition_id}"));
            job.schedule(None);
            jobs.push(job);
        }
        wait_for_tasks(&jobs);

        collect_pos_list_pairs(&outputs)
    }

    /// Probe phase for semi and anti joins: emits each probe row at most
    /// once, into the probe-side position list only.
    fn probe_semi_anti(
        &self,
        build_partitions: &[RadixPartition],
        hash_tables: &[Option<Arc<JoinHashTable>>],
        probe_partitions: &[RadixPartition],
    ) -> (Vec<PositionList>, Vec<PositionList>) {
        let partition_count = probe_partitions.len();
        let outputs: Arc<Vec<Mutex<(PositionList, PositionList)>>> = Arc::new(
            (0..partition_count)
                .map(|_| Mutex::new((PositionList::new(), PositionList::new())))
                .collect(),
        );

        let mut jobs = Vec::with_capacity(partition_count);
        for partition_id in 0..partition_count {
            let outputs = Arc::clone(&outputs);
            let shared = Arc::clone(&self.shared);
            let build_elements = Arc::clone(&build_partitions[partition_id]);
            let hash_table = hash_tables[partition_id].clone();
            let probe_elements = Arc::clone(&probe_partitions[partition_id]);
            let job = Task::new(move || {
                let keep_on_match = shared.mode == JoinMode::Semi;
                let mut probe_out = PositionList::new();
                for probe_row in probe_elements.iter() {
                    let has_match = match (&probe_row.value, &hash_table) {
                        (Some(value), Some(hash_table)) => {
                            hash_table.get(value).is_some_and(|indices| {
                                indices.iter().any(|&index| {
                                    shared.passes_additional_predicates(
                                        build_elements[index as usize].row_id,
                                        probe_row.row_id,
                                    )
                                })
                            })
                        }
                        _ => false,
                    };
                    if has_match == keep_on_match {
                        probe_out.push(probe_row.row_id);
                    }
                }
                *outputs[partition_id].lock() = (PositionList::new(), probe_out);
            });
            job.set_description(format!("JoinHash semi/anti partition {partition_id}"));
            job.schedule(None);
            jobs.push(job);
        }
        wait_for_tasks(&jobs);

        collect_pos_list_pairs(&outputs)
    }

    /// Assemble the output table from the per-partition position lists,
    /// restoring the user-visible left-then-right column order.
    fn write_output(
        &self,
        left_pos_lists: Vec<PositionList>,
        right_pos_lists: Vec<PositionList>,
    ) -> QuartzResult<Arc<Table>> {
        let mode = self.shared.mode;
        let build_table = &self.shared.build_table;
        let probe_table = &self.shared.probe_table;
        let only_output_probe_input =
            self.inputs_swapped && matches!(mode, JoinMode::Semi | JoinMode::Anti);

        let (original_left, original_right) = if self.inputs_swapped {
            (probe_table, build_table)
        } else {
            (build_table, probe_table)
        };
        let output_table = if only_output_probe_input {
            build_join_output_table(original_left, None, mode)
        } else {
            build_join_output_table(original_left, Some(original_right), mode)
        };

        // Caches keyed on the shared per-column position list groups avoid
        // re-dereferencing identical layouts for wide reference inputs.
        let build_pos_lists_by_segment =
            if build_table.table_type() == TableType::References && !only_output_probe_input {
                setup_pos_lists_by_segment(build_table)
            } else {
                Vec::new()
            };
        let probe_pos_lists_by_segment = if probe_table.table_type() == TableType::References {
            setup_pos_lists_by_segment(probe_table)
        } else {
            Vec::new()
        };
        let mut build_cache: StdHashMap<*const PosLists, Arc<PositionList>> = StdHashMap::new();
        let mut probe_cache: StdHashMap<*const PosLists, Arc<PositionList>> = StdHashMap::new();

        for (left, right) in left_pos_lists.into_iter().zip(right_pos_lists) {
            if left.is_empty() && right.is_empty() {
                continue;
            }
            let left = Arc::new(left);
            let right = Arc::new(right);
            let mut output_segments = Vec::with_capacity(output_table.column_count());
            if self.inputs_swapped {
                write_output_segments(
                    &mut output_segments,
                    probe_table,
                    &probe_pos_lists_by_segment,
                    &right,
                    &mut probe_cache,
                );
                if !only_output_probe_input {
                    write_output_segments(
                        &mut output_segments,
                        build_table,
                        &build_pos_lists_by_segment,
                        &left,
                        &mut build_cache,
                    );
                }
            } else {
                write_output_segments(
                    &mut output_segments,
                    build_table,
                    &build_pos_lists_by_segment,
                    &left,
                    &mut build_cache,
                );
                write_output_segments(
                    &mut output_segments,
                    probe_table,
                    &probe_pos_lists_by_segment,
                    &right,
                    &mut probe_cache,
                );
            }
            output_table.append_chunk(output_segments)?;
        }
        Ok(output_table)
    }
}

/// Materialize one side: per-chunk jobs extract `(row id, key)` pairs and
/// pre-bucket them by radix partition. Null keys are discarded unless
/// `keep_nulls` is set; kept nulls land in partition zero.
fn materialize_input(
    table: &Arc<Table>,
    column_id: ColumnId,
    keep_nulls: bool,
    radix_bits: usize,
    partition_count: usize,
) -> Vec<Vec<Mutex<Vec<MaterializedRow>>>> {
    let chunk_count = table.chunk_count() as usize;
    let results: Arc<Vec<Vec<Mutex<Vec<MaterializedRow>>>>> = Arc::new(
        (0..chunk_count)
            .map(|_| (0..partition_count).map(|_| Mutex::new(Vec::new())).collect())
            .collect(),
    );

    let mut jobs = Vec::with_capacity(chunk_count);
    for chunk_id in 0..chunk_count {
        let table = Arc::clone(table);
        let results = Arc::clone(&results);
        let job = Task::new(move || {
            let chunk = table.get_chunk(chunk_id as ChunkId);
            let accessor = SegmentAccessor::new(chunk.get_segment(column_id));
            let mut buckets: Vec<Vec<MaterializedRow>> =
                (0..partition_count).map(|_| Vec::new()).collect();
            for offset in 0..accessor.len() {
                let row_id = RowId::new(chunk_id as ChunkId, offset as ChunkOffset);
                match accessor.value(offset) {
                    Some(value) => {
                        let hash = hash_value(&value);
                        buckets[radix_partition(hash, radix_bits)].push(MaterializedRow {
                            row_id,
                            value: Some(value),
                        });
                    }
                    None if keep_nulls => {
                        buckets[0].push(MaterializedRow { row_id, value: None });
                    }
                    None => {}
                }
            }
            for (partition_id, bucket) in buckets.into_iter().enumerate() {
                *results[chunk_id][partition_id].lock() = bucket;
            }
        });
        job.set_description(format!("JoinHash materialize chunk {chunk_id}"));
        job.schedule(None);
        jobs.push(job);
    }
    wait_for_tasks(&jobs);

    Arc::try_unwrap(results).unwrap_or_else(|_| panic!("materialization results still shared"))
}

/// Merge the per-chunk buckets into contiguous partitions, one job per
/// partition. With a single partition the buckets are concatenated inline.
fn partition_radix(
    chunk_buckets: Vec<Vec<Mutex<Vec<MaterializedRow>>>>,
    partition_count: usize,
) -> Vec<RadixPartition> {
    if partition_count == 1 {
        let mut partition = Vec::new();
        for chunk in &chunk_buckets {
            partition.append(&mut chunk[0].lock());
        }
        return vec![Arc::new(partition)];
    }

    let chunk_buckets = Arc::new(chunk_buckets);
    let outputs: Arc<Vec<Mutex<Vec<MaterializedRow>>>> = Arc::new(
        (0..partition_count).map(|_| Mutex::new(Vec::new())).collect(),
    );
    let mut jobs = Vec::with_capacity(partition_count);
    for partition_id in 0..partition_count {
        let chunk_buckets = Arc::clone(&chunk_buckets);
        let outputs = Arc::clone(&outputs);
        let job = Task::new(move || {
            let mut partition = Vec::new();
            for chunk in chunk_buckets.iter() {
                partition.append(&mut chunk[partition_id].lock());
            }
            *outputs[partition_id].lock() = partition;
        });
        job.set_description(format!("JoinHash partition {partition_id}"));
        job.schedule(None);
        jobs.push(job);
    }
    wait_for_tasks(&jobs);

    Arc::try_unwrap(outputs)
        .unwrap_or_else(|_| panic!("partition results still shared"))
        .into_iter()
        .map(|slot| Arc::new(slot.into_inner()))
        .collect()
}

/// Build one hash table per partition, one job each. Empty partitions get
/// `None` so probing can short-circuit.
fn build_hash_tables(partitions: &[RadixPartition]) -> Vec<Option<Arc<JoinHashTable>>> {
    let outputs: Arc<Vec<Mutex<Option<Arc<JoinHashTable>>>>> = Arc::new(
        (0..partitions.len()).map(|_| Mutex::new(None)).collect(),
    );
    let mut jobs = Vec::new();
    for (partition_id, partition) in partitions.iter().enumerate() {
        if partition.is_empty() {
            continue;
        }
        let partition = Arc::clone(partition);
        let outputs = Arc::clone(&outputs);
        let job = Task::new(move || {
            let mut hash_table = JoinHashTable::with_capacity(partition.len());
            for (index, row) in partition.iter().enumerate() {
                if let Some(value) = &row.value {
                    hash_table
                        .entry(value.clone())
                        .or_insert_with(SmallVec::new)
                        .push(index as u32);
                }
            }
            *outputs[partition_id].lock() = Some(Arc::new(hash_table));
        });
        job.set_description(format!("JoinHash build partition {partition_id}"));
        job.schedule(None);
        jobs.push(job);
    }
    wait_for_tasks(&jobs);

    Arc::try_unwrap(outputs)
        .unwrap_or_else(|_| panic!("hash table results still shared"))
        .into_iter()
        .map(|slot| slot.into_inner())
        .collect()
}

fn collect_pos_list_pairs(
    outputs: &[Mutex<(PositionList, PositionList)>],
) -> (Vec<PositionList>, Vec<PositionList>) {
    let mut left_lists = Vec::with_capacity(outputs.len());
    let mut right_lists = Vec::with_capacity(outputs.len());
    for slot in outputs {
        let (left, right) = std::mem::take(&mut *slot.lock());
        left_lists.push(left);
        right_lists.push(right);
    }
    (left_lists, right_lists)
}

/// Write one reference segment per column of `input_table`. Reference
/// inputs reuse dereferenced position lists through `cache`, keyed on the
/// shared per-column position list group.
fn write_output_segments(
    output_segments: &mut Vec<Arc<Segment>>,
    input_table: &Arc<Table>,
    pos_lists_by_segment: &PosListsBySegment,
    pos_list: &Arc<PositionList>,
    cache: &mut StdHashMap<*const PosLists, Arc<PositionList>>,
) {
    for column_id in 0..input_table.column_count() as ColumnId {
        if input_table.table_type() == TableType::References {
            if input_table.chunk_count() > 0 {
                let group = &pos_lists_by_segment[column_id as usize];
                let dereferenced = cache
                    .entry(Arc::as_ptr(group))
                    .or_insert_with(|| Arc::new(dereference_pos_list(group, pos_list)));
                let (referenced_table, referenced_column_id) =
                    match input_table.get_chunk(0).get_segment(column_id).as_ref() {
                        Segment::Reference(segment) => (
                            Arc::clone(segment.referenced_table()),
                            segment.referenced_column_id(),
                        ),
                        _ => panic!("reference table contains a non-reference segment"),
                    };
                output_segments.push(Arc::new(Segment::Reference(ReferenceSegment::new(
                    referenced_table,
                    referenced_column_id,
                    Arc::clone(dereferenced),
                ))));
            } else {
                // No chunks, so the referenced table cannot be deduced; the
                // position list holds only null padding and any schema-equal
                // data table serves as referent.
                let dummy_table =
                    Table::create_dummy_table(input_table.column_definitions().to_vec());
                output_segments.push(Arc::new(Segment::Reference(ReferenceSegment::new(
                    dummy_table,
                    column_id,
                    Arc::clone(pos_list),
                ))));
            }
        } else {
            output_segments.push(Arc::new(Segment::Reference(ReferenceSegment::new(
                Arc::clone(input_table),
                column_id,
                Arc::clone(pos_list),
            ))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radix_bits_small_build_side() {
        assert_eq!(calculate_radix_bits(0, 10, false), 0);
        assert_eq!(calculate_radix_bits(1_000, 10_000, false), 0);
    }

    #[test]
    fn test_radix_bits_grow_with_build_side() {
        let bits = calculate_radix_bits(100_000, 200_000, false);
        let bytes_per_entry = size_of::<Value>() + 2 * size_of::<RowId>() + 1;
        let map_size = (100_000 * bytes_per_entry) as f64 / 0.8;
        let clusters = (2.0 * map_size / ASSUMED_L2_CACHE_SIZE as f64).max(1.0);
        assert_eq!(bits, clusters.log2().ceil() as usize);
        assert!(bits >= 4);
    }

    #[test]
    fn test_radix_partition_uses_high_bits() {
        assert_eq!(radix_partition(u64::MAX, 3), 7);
        assert_eq!(radix_partition(0, 3), 0);
        assert_eq!(radix_partition(1 << 62, 2), 1);
        assert_eq!(radix_partition(u64::MAX, 0), 0);
    }
}
