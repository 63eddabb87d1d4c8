use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::{QuartzError, QuartzResult};
use crate::storage::segment::{DictionarySegment, Segment, ValueSegment};
use crate::types::{ColumnId, CommitId, DataType, Value, MAX_COMMIT_ID};

/// Per-row multiversioning metadata: the commit that created a row and the
/// commit that invalidated it (`MAX_COMMIT_ID` while the row is live).
#[derive(Debug, Default)]
pub struct MvccData {
    begin_cids: Vec<CommitId>,
    end_cids: Vec<CommitId>,
}

impl MvccData {
    fn with_row_count(row_count: usize) -> Self {
        Self {
            begin_cids: vec![0; row_count],
            end_cids: vec![MAX_COMMIT_ID; row_count],
        }
    }

    pub fn begin_cid(&self, offset: usize) -> CommitId {
        self.begin_cids[offset]
    }

    pub fn end_cid(&self, offset: usize) -> CommitId {
        self.end_cids[offset]
    }
}

/// A horizontal slice of a table holding exactly one segment per column.
///
/// Chunks are mutable until [`Chunk::finalize`] is called; a finalized chunk
/// is immutable and may be dictionary encoded in place.
#[derive(Debug)]
pub struct Chunk {
    segments: RwLock<Vec<Arc<Segment>>>,
    mvcc: RwLock<MvccData>,
    finalized: AtomicBool,
}

impl Chunk {
    pub fn new(segments: Vec<Arc<Segment>>) -> Self {
        let row_count = segments.first().map_or(0, |segment| segment.len());
        debug_assert!(
            segments.iter().all(|segment| segment.len() == row_count),
            "all segments of a chunk must have the same length"
        );
        Self {
            segments: RwLock::new(segments),
            mvcc: RwLock::new(MvccData::with_row_count(row_count)),
            finalized: AtomicBool::new(false),
        }
    }

    /// Number of rows in this chunk.
    pub fn size(&self) -> usize {
        self.segments
            .read()
            .first()
            .map_or(0, |segment| segment.len())
    }

    pub fn column_count(&self) -> usize {
        self.segments.read().len()
    }

    pub fn get_segment(&self, column_id: ColumnId) -> Arc<Segment> {
        Arc::clone(&self.segments.read()[column_id as usize])
    }

    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.segments.read().clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Seal the chunk. Appends are rejected afterwards.
    pub fn finalize(&self) {
        self.finalized.store(true, Ordering::Release);
    }

    pub(crate) fn append_row(&self, row: &[Option<Value>]) -> QuartzResult<()> {
        if self.is_finalized() {
            return Err(QuartzError::Storage(
                "cannot append to a finalized chunk".to_string(),
            ));
        }
        let mut segments = self.segments.write();
        debug_assert_eq!(row.len(), segments.len());
        for (segment, value) in segments.iter_mut().zip(row.iter()) {
            match Arc::make_mut(segment) {
                Segment::Value(value_segment) => value_segment.append(value.clone())?,
                _ => {
                    return Err(QuartzError::Storage(
                        "rows can only be appended to value segments".to_string(),
                    ))
                }
            }
        }
        let mut mvcc = self.mvcc.write();
        mvcc.begin_cids.push(0);
        mvcc.end_cids.push(MAX_COMMIT_ID);
        Ok(())
    }

    /// Replace every value segment with its dictionary encoding. Only legal
    /// on finalized chunks.
    pub fn encode_dictionary(&self) -> QuartzResult<()> {
        if !self.is_finalized() {
            return Err(QuartzError::Storage(
                "only finalized chunks may be encoded".to_string(),
            ));
        }
        let mut segments = self.segments.write();
        for segment in segments.iter_mut() {
            if let Segment::Value(value_segment) = segment.as_ref() {
                let encoded = DictionarySegment::from_value_segment(value_segment);
                *segment = Arc::new(Segment::Dictionary(encoded));
            }
        }
        Ok(())
    }

    /// Read access to the MVCC metadata.
    pub fn with_mvcc<R>(&self, f: impl FnOnce(&MvccData) -> R) -> R {
        f(&self.mvcc.read())
    }

    pub(crate) fn new_mutable(columns: impl Iterator<Item = (DataType, bool)>) -> Self {
        let segments = columns
            .map(|(data_type, nullable)| {
                Arc::new(Segment::Value(ValueSegment::new(data_type, nullable)))
            })
            .collect();
        Self {
            segments: RwLock::new(segments),
            mvcc: RwLock::new(MvccData::default()),
            finalized: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    #[test]
    fn test_append_until_finalized() {
        let chunk = Chunk::new_mutable([(DataType::Int, false)].into_iter());
        chunk.append_row(&[Some(Value::Int(1))]).unwrap();
        chunk.append_row(&[Some(Value::Int(2))]).unwrap();
        assert_eq!(chunk.size(), 2);

        chunk.finalize();
        assert!(chunk.append_row(&[Some(Value::Int(3))]).is_err());
        assert_eq!(chunk.size(), 2);
    }

    #[test]
    fn test_mvcc_rows_track_appends() {
        let chunk = Chunk::new_mutable([(DataType::Int, false)].into_iter());
        chunk.append_row(&[Some(Value::Int(7))]).unwrap();
        chunk.with_mvcc(|mvcc| {
            assert_eq!(mvcc.begin_cid(0), 0);
            assert_eq!(mvcc.end_cid(0), MAX_COMMIT_ID);
        });
    }

    #[test]
    fn test_encode_dictionary_requires_finalize() {
        let chunk = Chunk::new_mutable([(DataType::Int, false)].into_iter());
        chunk.append_row(&[Some(Value::Int(1))]).unwrap();
        assert!(chunk.encode_dictionary().is_err());
        chunk.finalize();
        chunk.encode_dictionary().unwrap();
        assert!(matches!(
            chunk.get_segment(0).as_ref(),
            Segment::Dictionary(_)
        ));
    }
}
