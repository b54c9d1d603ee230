//! Top-level driver of a conversion run
//!
//! ```text
//! Idle ──▶ NodePhase ──▶ RelationshipPhase ──▶ Done
//!              │                 │
//!              └──────▶ Aborted ◀┘
//! ```
//!
//! The node phase always completes before relationship work starts. The
//! relationship phase replays the records the node phase read instead of
//! reading the source again.

use super::batcher::{Batch, Batcher};
use super::controller::{BufferSizeController, ControllerSettings};
use super::state::{CounterSnapshot, Progress, ProgressFn, RunContext, RunContextParts, RunCounters};
use super::worker::Worker;
use super::{CancellationToken, ConvertError, ConvertResult, ConverterConfig, Phase};
use crate::resource::ResourceStream;
use crate::rules::{GlobalState, RuleSet};
use crate::storage::GraphStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Where the converter's state machine stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    NodePhase,
    RelationshipPhase,
    Done,
    Aborted,
}

/// Per-invocation switches for resuming an aborted run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub skip_nodes: bool,
    pub skip_relationships: bool,
}

impl RunOptions {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn nodes_only() -> Self {
        Self {
            skip_relationships: true,
            ..Self::default()
        }
    }

    pub fn relationships_only() -> Self {
        Self {
            skip_nodes: true,
            ..Self::default()
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub counters: CounterSnapshot,
    pub phases_run: Vec<Phase>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Converts the records of one source into a graph store.
///
/// Each converter owns its run state; any number of them can coexist.
/// Phase completion and the records read during the node phase are kept
/// between invocations so an aborted run can be resumed with `RunOptions`.
pub struct Converter {
    config: ConverterConfig,
    rules: Arc<RuleSet>,
    source: Arc<dyn ResourceStream>,
    store: Arc<dyn GraphStore>,
    global: GlobalState,
    progress: Option<ProgressFn>,
    controller: ControllerSettings,
    cancel: CancellationToken,
    counters: Arc<RunCounters>,
    state: RunState,
    completed: Vec<Phase>,
    retained: Option<Arc<[Batch]>>,
}

impl Converter {
    /// Validates `config`; invalid combinations fail here, never inside a
    /// worker.
    pub fn new(
        config: ConverterConfig,
        rules: RuleSet,
        source: impl ResourceStream + 'static,
        store: Arc<dyn GraphStore>,
    ) -> ConvertResult<Self> {
        Self::with_shared_source(config, rules, Arc::new(source), store)
    }

    pub fn with_shared_source(
        config: ConverterConfig,
        rules: RuleSet,
        source: Arc<dyn ResourceStream>,
        store: Arc<dyn GraphStore>,
    ) -> ConvertResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rules: Arc::new(rules),
            source,
            store,
            global: GlobalState::new(),
            progress: None,
            controller: ControllerSettings::default(),
            cancel: CancellationToken::new(),
            counters: Arc::new(RunCounters::new()),
            state: RunState::Idle,
            completed: Vec::new(),
            retained: None,
        })
    }

    /// Share `global` with every rule hook of every run.
    pub fn with_global_state(mut self, global: GlobalState) -> Self {
        self.global = global;
        self
    }

    /// Called once per processed record, from worker threads.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_controller_settings(mut self, settings: ControllerSettings) -> Self {
        self.controller = settings;
        self
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn global_state(&self) -> &GlobalState {
        &self.global
    }

    /// Token that aborts the current run when tripped. Reset it before
    /// resuming.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Counters of the latest run, also after an abort
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Phases that have run to completion on this converter
    pub fn completed_phases(&self) -> &[Phase] {
        &self.completed
    }

    pub fn has_retained_records(&self) -> bool {
        self.retained.is_some()
    }

    /// Run the node phase, then the relationship phase.
    ///
    /// The first worker error aborts the run: every other worker is
    /// stopped and awaited, then the error is returned. Batches committed
    /// before the abort stay committed.
    pub async fn run(&mut self, options: RunOptions) -> ConvertResult<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.counters = Arc::new(RunCounters::new());

        if self.cancel.is_cancelled() {
            self.state = RunState::Aborted;
            return Err(ConvertError::Cancelled);
        }

        let mut phases_run = Vec::new();
        let rel_mask = self.rules.type_mask(Phase::Relationship);
        let phase_count = [!options.skip_nodes, !options.skip_relationships]
            .iter()
            .filter(|run| **run)
            .count() as u64;
        let total_hint = self.source.len_hint().map(|n| n as u64 * phase_count);

        info!(
            "Starting conversion with {} worker(s), batch size {}, {:?} mode",
            self.config.effective_workers(),
            self.config.effective_batch_size(),
            self.config.worker_mode
        );

        if options.skip_nodes {
            info!("Skipping node phase");
        } else {
            self.state = RunState::NodePhase;
            self.retained = None;
            // Kept even when the relationship phase is skipped, so a later
            // relationships-only run can replay them.
            let retain = !rel_mask.is_empty();
            let records = match self.source.open() {
                Ok(records) => records,
                Err(e) => return Err(self.abort(e.into())),
            };
            let batcher = Batcher::from_stream(records, self.config.worker_mode, retain);

            let ctx = self.run_phase(Phase::Node, batcher, total_hint).await?;
            if retain {
                self.retained = Some(ctx.batcher.take_retained().into());
            }
            self.mark_completed(Phase::Node);
            phases_run.push(Phase::Node);
        }

        if options.skip_relationships {
            info!("Skipping relationship phase");
        } else {
            self.state = RunState::RelationshipPhase;
            let batcher = match self.retained.clone() {
                Some(batches) => {
                    debug!("Replaying {} retained batches", batches.len());
                    Batcher::from_retained(batches, self.config.worker_mode)
                }
                None => {
                    let records = match self.source.open() {
                        Ok(records) => records,
                        Err(e) => return Err(self.abort(e.into())),
                    };
                    Batcher::from_stream(records, self.config.worker_mode, false)
                }
            };

            self.run_phase(Phase::Relationship, batcher, total_hint).await?;
            self.retained = None;
            self.mark_completed(Phase::Relationship);
            phases_run.push(Phase::Relationship);
        }

        self.state = RunState::Done;
        let summary = RunSummary {
            counters: self.counters.snapshot(),
            phases_run,
            started_at,
            elapsed: clock.elapsed(),
        };
        info!(
            "Processed in total {} nodes and {} relationships (this run took {}s)",
            summary.counters.nodes_committed,
            summary.counters.relationships_committed,
            summary.elapsed.as_secs()
        );
        Ok(summary)
    }

    fn mark_completed(&mut self, phase: Phase) {
        if !self.completed.contains(&phase) {
            self.completed.push(phase);
        }
    }

    fn abort(&mut self, err: ConvertError) -> ConvertError {
        self.state = RunState::Aborted;
        err
    }

    async fn run_phase(
        &mut self,
        phase: Phase,
        batcher: Batcher,
        total_hint: Option<u64>,
    ) -> ConvertResult<Arc<RunContext>> {
        let workers = self.config.effective_workers();
        let adaptive = self.config.controller_enabled();
        let ctx = Arc::new(RunContext::new(RunContextParts {
            phase,
            rules: Arc::clone(&self.rules),
            store: Arc::clone(&self.store),
            global: self.global.clone(),
            counters: Arc::clone(&self.counters),
            batcher,
            retry: self.config.retry,
            progress: self.progress.clone(),
            total_hint,
            batch_size: self.config.effective_batch_size(),
            flush_size: self.config.initial_flush_size(),
            adaptive,
            cancel: self.cancel.clone(),
        }));
        info!("Starting {} phase ({} record types)", phase, ctx.mask.len());

        let controller_stop = CancellationToken::new();
        let controller = adaptive.then(|| {
            let controller = BufferSizeController::new(Arc::clone(&ctx), self.controller, controller_stop.clone());
            tokio::spawn(controller.run())
        });

        // Workers run on blocking threads the runtime cannot abort; if this
        // future is dropped they must still be told to stop.
        let mut guard = StopOnDrop::new(Arc::clone(&ctx), controller_stop.clone());

        let mut set = JoinSet::new();
        for id in 0..workers {
            let worker = Worker::new(id, Arc::clone(&ctx));
            set.spawn_blocking(move || worker.run());
        }

        let cancel = self.cancel.clone();
        let mut cancel_seen = false;
        let mut first_error: Option<ConvertError> = None;
        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(report))) => debug!("{} worker finished: {:?}", phase, report),
                    Some(Ok(Err(e))) => {
                        ctx.stop();
                        if e.is_cancelled() {
                            debug!("{} worker abandoned a commit after stop", phase);
                        } else if first_error.is_none() {
                            error!("{} worker failed: {}", phase, e);
                            first_error = Some(e);
                        } else {
                            debug!("{} worker failed after abort: {}", phase, e);
                        }
                    }
                    Some(Err(join_err)) => {
                        ctx.stop();
                        error!("{} worker panicked: {}", phase, join_err);
                        first_error.get_or_insert(ConvertError::Worker(join_err.to_string()));
                    }
                },
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    warn!("Cancellation requested, waiting for {} workers to stop", phase);
                    ctx.stop();
                }
            }
        }

        guard.disarm();
        controller_stop.cancel();
        if let Some(handle) = controller {
            if let Err(e) = handle.await {
                warn!("buffer size controller ended abnormally: {}", e);
            }
        }

        let counters = self.counters.snapshot();
        if let Some(e) = first_error {
            self.state = RunState::Aborted;
            info!(
                "{} phase aborted after {} resources, {} nodes and {} relationships",
                phase, counters.resources_seen, counters.nodes_committed, counters.relationships_committed
            );
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            self.state = RunState::Aborted;
            info!(
                "{} phase cancelled after {} resources, {} nodes and {} relationships",
                phase, counters.resources_seen, counters.nodes_committed, counters.relationships_committed
            );
            return Err(ConvertError::Cancelled);
        }

        info!("Finished {} phase in {} batches", phase, ctx.batcher.dispatched());
        Ok(ctx)
    }
}

/// Stops the workers and the controller of a phase whose driver is dropped
/// before they finish.
struct StopOnDrop {
    ctx: Arc<RunContext>,
    controller: CancellationToken,
    armed: bool,
}

impl StopOnDrop {
    fn new(ctx: Arc<RunContext>, controller: CancellationToken) -> Self {
        Self {
            ctx,
            controller,
            armed: true,
        }
    }

    /// Every worker has been joined; nothing left to stop.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.armed {
            warn!("{} phase dropped while running, stopping its workers", self.ctx.phase);
            self.ctx.stop();
            self.controller.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Fragment, Node};
    use crate::resource::{Record, VecStream};
    use crate::rules::{FnChain, RuleContext, RuleError};
    use crate::storage::MemoryGraph;

    fn people(ids: &[i64]) -> VecStream {
        VecStream::new(ids.iter().map(|id| Record::new("Person").with_field("id", *id)).collect())
    }

    fn person_rules() -> RuleSet {
        RuleSet::new().with_node_rules(
            "Person",
            FnChain::new(|record: &mut Record, _: &RuleContext<'_>| {
                let id = record.get("id").cloned().ok_or_else(|| RuleError::MissingField("id".into()))?;
                Ok(Fragment::from(
                    Node::new(["Person"]).with_property("ID", id).with_primary_key("ID"),
                ))
            }),
        )
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraph::new());
        let config = ConverterConfig::serialized().with_workers(3);
        let err = Converter::new(config, person_rules(), people(&[1]), store).err().unwrap();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_walks_the_state_machine() {
        let graph = Arc::new(MemoryGraph::new());
        let mut converter = Converter::new(
            ConverterConfig::new().with_workers(2).with_batch_size(2),
            person_rules(),
            people(&[1, 2, 3]),
            graph.clone(),
        )
        .unwrap();
        assert_eq!(converter.state(), RunState::Idle);

        let summary = converter.run(RunOptions::full()).await.unwrap();

        assert_eq!(converter.state(), RunState::Done);
        assert_eq!(summary.phases_run, vec![Phase::Node, Phase::Relationship]);
        assert_eq!(summary.counters.nodes_committed, 3);
        assert_eq!(graph.node_count(Some("Person")).unwrap(), 3);
        // no relationship rules, so nothing was retained
        assert!(!converter.has_retained_records());
    }

    #[tokio::test]
    async fn tripped_token_aborts_before_work() {
        let graph = Arc::new(MemoryGraph::new());
        let mut converter =
            Converter::new(ConverterConfig::serialized(), person_rules(), people(&[1]), graph.clone()).unwrap();
        converter.cancel_handle().cancel();

        let err = converter.run(RunOptions::full()).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(converter.state(), RunState::Aborted);
        assert_eq!(graph.node_count(None).unwrap(), 0);
    }
}
