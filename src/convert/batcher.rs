//! Slicing a record source into batches, the unit of dispatch

use super::config::WorkerMode;
use super::parcel::Parcel;
use super::{ConvertError, ConvertResult};
use crate::resource::{Record, RecordIter};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
enum Payload {
    Records(Vec<Record>),
    Sealed(Parcel),
}

/// An ordered group of records handed to exactly one worker.
#[derive(Debug, Clone)]
pub struct Batch {
    index: u64,
    len: usize,
    payload: Payload,
}

impl Batch {
    fn new(index: u64, records: Vec<Record>, mode: WorkerMode) -> ConvertResult<Self> {
        let len = records.len();
        let payload = match mode {
            WorkerMode::Shared => Payload::Records(records),
            WorkerMode::Isolated => Payload::Sealed(Parcel::seal(&records)?),
        };
        Ok(Self { index, len, payload })
    }

    /// Position of the batch in dispatch order
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.payload, Payload::Sealed(_))
    }

    /// Unwrap the records, opening the parcel if the batch is sealed.
    pub fn into_records(self) -> ConvertResult<Vec<Record>> {
        match self.payload {
            Payload::Records(records) => Ok(records),
            Payload::Sealed(parcel) => parcel.open(),
        }
    }
}

enum Source {
    Stream(RecordIter),
    Retained { batches: Arc<[Batch]>, next: usize },
}

struct State {
    source: Source,
    next_index: u64,
    exhausted: bool,
    retained: BTreeMap<u64, Batch>,
}

/// Shared batch source for the workers of one phase.
///
/// Pulling is serialised by an internal lock. Once the source runs dry
/// every further pull returns `None`; a final partial group is still
/// emitted.
pub struct Batcher {
    mode: WorkerMode,
    retain: bool,
    state: Mutex<State>,
}

impl Batcher {
    /// Batch a fresh pass over a stream. With `retain`, workers hand their
    /// processed records back through [`Batcher::retain_processed`] so a
    /// later phase replays them, including any field a rule set.
    pub fn from_stream(records: RecordIter, mode: WorkerMode, retain: bool) -> Self {
        Self::with_source(Source::Stream(records), mode, retain)
    }

    /// Replay batches retained by an earlier phase.
    pub fn from_retained(batches: Arc<[Batch]>, mode: WorkerMode) -> Self {
        Self::with_source(Source::Retained { batches, next: 0 }, mode, false)
    }

    fn with_source(source: Source, mode: WorkerMode, retain: bool) -> Self {
        Self {
            mode,
            retain,
            state: Mutex::new(State {
                source,
                next_index: 0,
                exhausted: false,
                retained: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Next group of up to `size` records, or `None` once exhausted.
    ///
    /// Retained batches are replayed with the grouping they were read with.
    pub fn next_batch(&self, size: usize) -> ConvertResult<Option<Batch>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.exhausted {
            return Ok(None);
        }

        let batch = match &mut state.source {
            Source::Retained { batches, next } => {
                let batch = batches.get(*next).cloned();
                *next += 1;
                batch
            }
            Source::Stream(records) => {
                let size = size.max(1);
                let mut group = Vec::with_capacity(size.min(4096));
                while group.len() < size {
                    match records.next() {
                        Some(Ok(record)) => group.push(record),
                        Some(Err(e)) => {
                            state.exhausted = true;
                            return Err(ConvertError::Source(e));
                        }
                        None => break,
                    }
                }
                if group.is_empty() {
                    None
                } else {
                    let index = state.next_index;
                    Some(Batch::new(index, group, self.mode)?)
                }
            }
        };

        match batch {
            Some(batch) => {
                state.next_index += 1;
                Ok(Some(batch))
            }
            None => {
                state.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Number of batches handed out so far
    pub fn dispatched(&self) -> u64 {
        self.lock().next_index
    }

    /// Keep the records of batch `index` after the rules ran over them.
    /// Sealed again in isolated mode. A no-op unless the batcher retains.
    pub fn retain_processed(&self, index: u64, records: Vec<Record>) -> ConvertResult<()> {
        if !self.retain {
            return Ok(());
        }
        let batch = Batch::new(index, records, self.mode)?;
        self.lock().retained.insert(index, batch);
        Ok(())
    }

    /// Take every batch retained so far, in dispatch order.
    pub fn take_retained(&self) -> Vec<Batch> {
        std::mem::take(&mut self.lock().retained).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceStream, SourceError, VecStream};

    fn stream(n: i64) -> RecordIter {
        let records = (1..=n).map(|i| Record::new("Entity").with_field("id", i)).collect();
        VecStream::new(records).open().unwrap()
    }

    fn drain(batcher: &Batcher, size: usize) -> Vec<Vec<Record>> {
        let mut out = Vec::new();
        while let Some(batch) = batcher.next_batch(size).unwrap() {
            out.push(batch.into_records().unwrap());
        }
        out
    }

    #[test]
    fn final_partial_group_is_emitted() {
        let batcher = Batcher::from_stream(stream(7), WorkerMode::Shared, false);
        let sizes: Vec<usize> = drain(&batcher, 3).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert!(batcher.next_batch(3).unwrap().is_none());
    }

    #[test]
    fn unit_groups_keep_input_order() {
        let batcher = Batcher::from_stream(stream(4), WorkerMode::Shared, false);
        let ids: Vec<_> = drain(&batcher, 1)
            .into_iter()
            .flatten()
            .map(|r| r.get("id").cloned())
            .collect();
        assert_eq!(ids, (1..=4).map(|i| Some(i.into())).collect::<Vec<_>>());
    }

    #[test]
    fn isolated_mode_seals_and_retained_replays() {
        let batcher = Batcher::from_stream(stream(5), WorkerMode::Isolated, true);
        let mut batches = Vec::new();
        while let Some(batch) = batcher.next_batch(2).unwrap() {
            batches.push(batch);
        }
        assert!(batches.iter().all(Batch::is_sealed));
        assert_eq!(batches[0].index(), 0);
        // Nothing is retained until the records come back.
        assert!(batcher.take_retained().is_empty());

        // Hand back out of order, as concurrent workers would.
        for batch in batches.into_iter().rev() {
            let index = batch.index();
            let records = batch.into_records().unwrap();
            batcher.retain_processed(index, records).unwrap();
        }
        let retained: Arc<[Batch]> = batcher.take_retained().into();
        assert_eq!(retained.len(), 3);
        assert!(retained.iter().all(Batch::is_sealed));

        let replay = Batcher::from_retained(retained, WorkerMode::Isolated);
        let ids: Vec<_> = drain(&replay, 100)
            .into_iter()
            .flatten()
            .map(|r| r.get("id").cloned())
            .collect();
        assert_eq!(ids, (1..=5).map(|i| Some(i.into())).collect::<Vec<_>>());
        assert_eq!(replay.dispatched(), 3);
    }

    #[test]
    fn retained_records_carry_fields_set_after_dispatch() {
        let batcher = Batcher::from_stream(stream(3), WorkerMode::Shared, true);
        while let Some(batch) = batcher.next_batch(2).unwrap() {
            let index = batch.index();
            let mut records = batch.into_records().unwrap();
            for record in records.iter_mut() {
                record.set("seen", true);
            }
            batcher.retain_processed(index, records).unwrap();
        }

        let replay = Batcher::from_retained(batcher.take_retained().into(), WorkerMode::Shared);
        let records: Vec<Record> = drain(&replay, 100).into_iter().flatten().collect();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.get("seen").is_some()));
    }

    #[test]
    fn non_retaining_batcher_ignores_hand_back() {
        let batcher = Batcher::from_stream(stream(2), WorkerMode::Shared, false);
        let batch = batcher.next_batch(2).unwrap().unwrap();
        batcher.retain_processed(batch.index(), batch.into_records().unwrap()).unwrap();
        assert!(batcher.take_retained().is_empty());
    }

    #[test]
    fn source_errors_end_the_pass() {
        let records: RecordIter = Box::new(
            vec![
                Ok(Record::new("Entity")),
                Err(SourceError::Other("connection reset".into())),
                Ok(Record::new("Entity")),
            ]
            .into_iter(),
        );
        let batcher = Batcher::from_stream(records, WorkerMode::Shared, false);

        assert!(matches!(batcher.next_batch(5), Err(ConvertError::Source(_))));
        assert!(batcher.next_batch(5).unwrap().is_none());
    }
}
