//! The unit of concurrency: pulls batches, applies rules, commits buffers

use super::classifier::CommitBuffer;
use super::state::RunContext;
use super::{ConvertError, ConvertResult};
use crate::graph::Fragment;
use crate::rules::RuleContext;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// What one worker did during a phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub batches: u64,
    pub records: u64,
    pub commits: u64,
    /// True if the worker left because of a stop request
    pub stopped: bool,
}

pub struct Worker {
    id: usize,
    ctx: Arc<RunContext>,
    buffer: CommitBuffer,
    report: WorkerReport,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<RunContext>) -> Self {
        Self {
            id,
            ctx,
            buffer: CommitBuffer::new(),
            report: WorkerReport::default(),
        }
    }

    /// Run until the batcher is exhausted, a stop is requested or an error
    /// occurs. Blocking; meant for a dedicated thread.
    pub fn run(mut self) -> ConvertResult<WorkerReport> {
        let phase = self.ctx.phase;
        loop {
            if self.ctx.should_stop() {
                return Ok(self.stopped());
            }

            let batch = match self.ctx.batcher.next_batch(self.ctx.group_size())? {
                Some(batch) => batch,
                None => break,
            };
            let index = batch.index();
            let mut records = batch.into_records()?;
            self.report.batches += 1;

            for record in records.iter_mut() {
                if self.ctx.should_stop() {
                    return Ok(self.stopped());
                }
                if self.ctx.mask.contains(record.record_type()) {
                    let rule_ctx = RuleContext::new(phase, self.ctx.store.as_ref(), &self.ctx.global);
                    let fragment = self
                        .ctx
                        .rules
                        .apply(phase, record, &rule_ctx)
                        .map_err(|source| ConvertError::Rule {
                            phase,
                            record_type: record.record_type().to_string(),
                            record: record.identity(),
                            source,
                        })?;
                    record.clear_supplies();
                    self.buffer.add(fragment);
                }
                self.report.records += 1;
                self.ctx.record_processed();
            }
            self.buffer.add_records(records.len());
            debug!(
                "worker {}: {} batch {} processed, {} elements buffered",
                self.id,
                phase,
                index,
                self.buffer.len()
            );
            self.ctx.batcher.retain_processed(index, records)?;

            // Flushes only happen on batch boundaries so a batch is never
            // split across two commits.
            if self.buffer.len() >= self.ctx.flush_size() {
                self.flush()?;
            }
        }

        if !self.buffer.is_empty() {
            self.flush()?;
        }
        Ok(self.report)
    }

    fn stopped(mut self) -> WorkerReport {
        if self.buffer.len() > 0 {
            debug!(
                "worker {}: stop requested, discarding {} uncommitted elements",
                self.id,
                self.buffer.len()
            );
        }
        self.report.stopped = true;
        self.report
    }

    /// Commit the create bucket, then the merge bucket.
    ///
    /// Creates that carry relationships go through the merge lock as well:
    /// their endpoints may be the subject of an in-flight merge. Each bucket
    /// is counted as soon as it is committed; the records are counted with
    /// the first one.
    fn flush(&mut self) -> ConvertResult<()> {
        let (mut create, mut merge, records) = self.buffer.take();
        let nodes = (create.nodes.len() + merge.nodes.len()) as u64;
        let relationships = (create.relationships.len() + merge.relationships.len()) as u64;
        let mut uncounted = records as u64;
        let started = Instant::now();

        if !create.is_empty() {
            if create.relationships.is_empty() {
                self.commit_create(&mut create)?;
            } else {
                let _guard = self.ctx.merge_lock();
                self.commit_create(&mut create)?;
            }
            self.ctx.counters.add_committed(
                std::mem::take(&mut uncounted),
                create.nodes.len() as u64,
                create.relationships.len() as u64,
            );
        }
        if !merge.is_empty() {
            let _guard = self.ctx.merge_lock();
            let store = &self.ctx.store;
            self.ctx
                .retry
                .run(self.ctx.phase, "merge", self.ctx.stop_token(), || store.merge(&mut merge))?;
        }

        self.ctx.counters.add_committed(
            uncounted,
            merge.nodes.len() as u64,
            merge.relationships.len() as u64,
        );
        self.report.commits += 1;
        debug!(
            "worker {}: committed {} nodes and {} relationships from {} records in {:?}",
            self.id,
            nodes,
            relationships,
            records,
            started.elapsed()
        );
        Ok(())
    }

    fn commit_create(&self, create: &mut Fragment) -> ConvertResult<()> {
        let store = &self.ctx.store;
        self.ctx
            .retry
            .run(self.ctx.phase, "create", self.ctx.stop_token(), || store.create(&mut *create))
    }
}
