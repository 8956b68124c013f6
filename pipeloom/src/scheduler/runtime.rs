//! Binding graphs to modules and driving runs.

use super::plan::ExecutionPlan;
use super::task::{BoundNode, NodeTask, TaskOutcome};
use super::worker_pool::PriorityGate;
use super::{RunOptions, RunOutcome, RunResult};
use crate::cancellation::{CancellationToken, ChildToken};
use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::errors::{ModuleError, NodeFailure, PipeloomError};
use crate::events::{emit_event, EventSink, NoOpEventSink};
use crate::graph::{Graph, NodeId};
use crate::module::ModuleBindings;
use crate::observability::SpanTimer;
use crate::resilience::{CacheBackend, Registries};
use crate::suspension::{InMemorySuspensionStore, SnapshotId, SuspensionManager, SuspensionStore};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Binds graphs to module implementations.
///
/// A runtime owns the process-scoped resilience registries, the optional
/// cache backend, the event sink and the suspension store. Every pipeline it
/// binds shares them.
pub struct Runtime {
    config: RuntimeConfig,
    registries: Arc<Registries>,
    cache: Option<Arc<dyn CacheBackend>>,
    events: Arc<dyn EventSink>,
    suspensions: SuspensionManager,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("registries", &self.registries)
            .field("has_cache", &self.cache.is_some())
            .field("suspensions", &self.suspensions)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Creates a runtime with no cache, a no-op event sink and an in-memory
    /// suspension store.
    #[must_use]
    pub fn new(config: RuntimeConfig, registries: Arc<Registries>) -> Self {
        Self {
            config,
            registries,
            cache: None,
            events: Arc::new(NoOpEventSink),
            suspensions: SuspensionManager::new(Arc::new(InMemorySuspensionStore::new())),
        }
    }

    /// Sets the cache backend used by nodes with cache options.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the suspension store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SuspensionStore>) -> Self {
        self.suspensions = SuspensionManager::new(store);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the shared resilience registries.
    #[must_use]
    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    /// Resolves every module node of `graph` and builds its decorator chain.
    ///
    /// # Errors
    ///
    /// Returns [`PipeloomError::Binding`] if a node references a module that
    /// `bindings` does not provide.
    pub fn bind(
        &self,
        graph: Arc<Graph>,
        bindings: &ModuleBindings,
    ) -> Result<Pipeline, PipeloomError> {
        let mut nodes = HashMap::new();
        for node in graph.module_nodes() {
            let module = bindings
                .get(&node.module)
                .ok_or_else(|| PipeloomError::Binding {
                    module: node.module.clone(),
                    node: node.id.clone(),
                })?;
            let options = bindings.effective_options(&node.module, &node.options);
            let chain = self.registries.build_chain(
                &node.module,
                Arc::clone(module),
                &options,
                self.cache.as_ref(),
                &self.events,
            );
            debug!(
                node = %node.id,
                module = %node.module,
                decorators = ?chain.decorator_names(),
                "Bound module node"
            );
            nodes.insert(
                node.id.clone(),
                Arc::new(BoundNode {
                    node: node.clone(),
                    options,
                    chain,
                }),
            );
        }

        info!(pipeline = %graph.qualified_name(), nodes = nodes.len(), "Pipeline bound");
        Ok(Pipeline {
            graph,
            nodes,
            events: Arc::clone(&self.events),
            suspensions: self.suspensions.clone(),
            max_parallelism: self.config.max_parallelism,
        })
    }
}

/// A graph bound to module implementations, ready to run.
pub struct Pipeline {
    graph: Arc<Graph>,
    nodes: HashMap<NodeId, Arc<BoundNode>>,
    events: Arc<dyn EventSink>,
    suspensions: SuspensionManager,
    max_parallelism: Option<usize>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("graph", &self.graph.qualified_name())
            .field("nodes", &self.nodes.len())
            .field("max_parallelism", &self.max_parallelism)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Returns the decorator names of a module node, outermost first.
    #[must_use]
    pub fn decorators_of(&self, node: &NodeId) -> Option<Vec<&'static str>> {
        self.nodes.get(node).map(|bound| bound.chain.decorator_names())
    }

    /// Runs the pipeline, producing every declared output.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown input names, when the run is aborted, or
    /// when the suspension store fails. Module failures are reported in the
    /// returned [`RunResult`].
    pub async fn run(&self, inputs: HashMap<String, Value>) -> Result<RunResult, PipeloomError> {
        self.run_with(inputs, RunOptions::default()).await
    }

    /// Runs the pipeline with explicit options.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::run`]. Also fails with
    /// [`PipeloomError::UnknownOutput`] for undeclared output names.
    pub async fn run_with(
        &self,
        inputs: HashMap<String, Value>,
        options: RunOptions,
    ) -> Result<RunResult, PipeloomError> {
        let timer = SpanTimer::start("run");
        let requested = options
            .outputs
            .map(|names| names.into_iter().collect::<BTreeSet<_>>());
        self.resolve_outputs(requested.as_ref())?;

        let (token, _link) = Self::run_token(options.cancel.as_ref());
        let ctx = Arc::new(ExecutionContext::with_token(
            Uuid::new_v4(),
            self.graph.data_nodes().map(|d| d.id.clone()),
            token,
        ));
        for (name, value) in inputs {
            let id = self.input_id(&name)?;
            ctx.seed(id, value)?;
        }

        self.execute(ctx, requested, None, timer).await
    }

    /// Resumes a suspended run with additional inputs.
    ///
    /// Only the module nodes pending at suspension run. The snapshot is
    /// deleted once the run completes or suspends again under a new id; it is
    /// kept if the run fails.
    ///
    /// # Errors
    ///
    /// Returns [`PipeloomError::VersionMismatch`] if the snapshot belongs to a
    /// different pipeline version, plus everything [`Pipeline::run`] returns.
    pub async fn resume(
        &self,
        snapshot_id: &SnapshotId,
        inputs: HashMap<String, Value>,
    ) -> Result<RunResult, PipeloomError> {
        self.resume_with(snapshot_id, inputs, None).await
    }

    /// Resumes a suspended run that aborts when `cancel` is cancelled.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::resume`].
    pub async fn resume_with(
        &self,
        snapshot_id: &SnapshotId,
        inputs: HashMap<String, Value>,
        cancel: Option<Arc<CancellationToken>>,
    ) -> Result<RunResult, PipeloomError> {
        let timer = SpanTimer::start("resume");
        let snapshot = self.suspensions.load(&self.graph, snapshot_id).await?;
        let (token, _link) = Self::run_token(cancel.as_ref());
        let ctx = Arc::new(SuspensionManager::rehydrate(&self.graph, &snapshot, token)?);

        for (name, value) in inputs {
            let id = self.input_id(&name)?;
            if ctx.is_resolved(id) {
                warn!(input = %name, snapshot_id = %snapshot_id, "Ignoring input already present in snapshot");
                continue;
            }
            ctx.seed(id, value)?;
        }

        emit_event(
            self.events.as_ref(),
            "run.resumed",
            serde_json::json!({
                "run_id": ctx.run_id().to_string(),
                "snapshot_id": snapshot_id.as_str(),
                "pending": snapshot.pending_node_ids.len(),
            }),
        );

        let result = self
            .execute(
                ctx,
                snapshot.requested_outputs.clone(),
                Some(&snapshot.pending_node_ids),
                timer,
            )
            .await?;

        if !result.is_failed() {
            if let Err(e) = self.suspensions.discard(snapshot_id).await {
                warn!(snapshot_id = %snapshot_id, error = %e, "Failed to delete resumed snapshot");
            }
        }
        Ok(result)
    }

    /// Deletes a snapshot without resuming it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn abandon(&self, snapshot_id: &SnapshotId) -> Result<(), PipeloomError> {
        self.suspensions.discard(snapshot_id).await?;
        info!(snapshot_id = %snapshot_id, "Snapshot abandoned");
        Ok(())
    }

    /// Returns the run's token and, for a caller token, the link that must
    /// stay alive until the run ends.
    fn run_token(
        parent: Option<&Arc<CancellationToken>>,
    ) -> (Arc<CancellationToken>, Option<ChildToken>) {
        match parent {
            Some(parent) => {
                let link = parent.child();
                (Arc::clone(link.token()), Some(link))
            }
            None => (Arc::new(CancellationToken::new()), None),
        }
    }

    fn input_id(&self, name: &str) -> Result<&NodeId, PipeloomError> {
        self.graph
            .input_id(name)
            .ok_or_else(|| PipeloomError::UnknownInput(name.to_string()))
    }

    fn resolve_outputs(
        &self,
        requested: Option<&BTreeSet<String>>,
    ) -> Result<Vec<(String, NodeId)>, PipeloomError> {
        match requested {
            None => Ok(self
                .graph
                .outputs()
                .iter()
                .map(|(name, id)| (name.clone(), id.clone()))
                .collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.graph
                        .output_id(name)
                        .map(|id| (name.clone(), id.clone()))
                        .ok_or_else(|| PipeloomError::UnknownOutput(name.clone()))
                })
                .collect(),
        }
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        requested: Option<BTreeSet<String>>,
        candidates: Option<&BTreeSet<NodeId>>,
        timer: SpanTimer,
    ) -> Result<RunResult, PipeloomError> {
        let span = info_span!(
            "pipeline_run",
            pipeline = %self.graph.qualified_name(),
            run_id = %ctx.run_id(),
        );
        self.drive(ctx, requested, candidates, timer)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        ctx: Arc<ExecutionContext>,
        requested: Option<BTreeSet<String>>,
        candidates: Option<&BTreeSet<NodeId>>,
        timer: SpanTimer,
    ) -> Result<RunResult, PipeloomError> {
        let run_id = ctx.run_id();
        let outputs = self.resolve_outputs(requested.as_ref())?;
        let output_ids: Vec<NodeId> = outputs.iter().map(|(_, id)| id.clone()).collect();
        let plan = ExecutionPlan::build(&self.graph, &output_ids, candidates, |id| {
            ctx.is_resolved(id)
        });

        if !plan.blocked.is_empty() && plan.missing_inputs.is_empty() {
            return Err(PipeloomError::Internal(format!(
                "module nodes {:?} are blocked but no pipeline input is missing",
                plan.blocked
            )));
        }

        info!(
            runnable = plan.runnable.len(),
            blocked = plan.blocked.len(),
            "Run started"
        );
        emit_event(
            self.events.as_ref(),
            "run.started",
            serde_json::json!({
                "run_id": run_id.to_string(),
                "pipeline": self.graph.qualified_name(),
                "runnable": plan.runnable.len(),
            }),
        );

        let gate = self.max_parallelism.map(PriorityGate::new);
        let mut tasks = JoinSet::new();
        for id in &plan.runnable {
            let Some(bound) = self.nodes.get(id) else {
                return Err(PipeloomError::Internal(format!(
                    "module node '{id}' has no binding"
                )));
            };
            let task = NodeTask {
                bound: Arc::clone(bound),
                ctx: Arc::clone(&ctx),
                events: Arc::clone(&self.events),
                gate: gate.clone(),
            };
            tasks.spawn(
                task.run()
                    .instrument(info_span!("module_node", node = %id, module = %bound.node.module)),
            );
        }

        let mut logged_errors = Vec::new();
        let mut skipped_nodes = Vec::new();

        loop {
            let joined = tokio::select! {
                biased;
                () = ctx.cancel_token().cancelled() => {
                    tasks.shutdown().await;
                    let reason = ctx.cancel_token().reason().unwrap_or_default();
                    warn!(reason = %reason, "Run aborted");
                    emit_event(
                        self.events.as_ref(),
                        "run.aborted",
                        serde_json::json!({ "run_id": run_id.to_string(), "reason": &reason }),
                    );
                    return Err(PipeloomError::Aborted(reason));
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok(TaskOutcome::Completed | TaskOutcome::Aborted) => {}
                Ok(TaskOutcome::Skipped { failure, logged }) => {
                    skipped_nodes.push(failure.node.clone());
                    if logged {
                        logged_errors.push(failure);
                    }
                }
                Ok(TaskOutcome::Failed(failure)) => {
                    ctx.abort(format!("module node '{}' failed", failure.node));
                    tasks.shutdown().await;
                    return Ok(self.failed(run_id, failure, timer, logged_errors, skipped_nodes));
                }
                Ok(TaskOutcome::Invariant(e)) => {
                    ctx.abort(e.to_string());
                    tasks.shutdown().await;
                    return Err(e.into());
                }
                Err(e) => {
                    ctx.abort("module task panicked");
                    tasks.shutdown().await;
                    return Err(PipeloomError::Internal(format!("module task failed: {e}")));
                }
            }
        }

        if let Some(failure) = self.unreachable_output(&ctx, &outputs)? {
            return Ok(self.failed(run_id, failure, timer, logged_errors, skipped_nodes));
        }

        if plan.needs_suspension() {
            let missing_inputs = plan.missing_inputs.clone();
            let snapshot_id = self
                .suspensions
                .suspend(
                    &self.graph,
                    &ctx,
                    plan.blocked.clone(),
                    missing_inputs.clone(),
                    requested,
                )
                .await?;
            emit_event(
                self.events.as_ref(),
                "run.suspended",
                serde_json::json!({
                    "run_id": run_id.to_string(),
                    "snapshot_id": snapshot_id.as_str(),
                    "missing_inputs": &missing_inputs,
                }),
            );
            return Ok(RunResult {
                run_id,
                outcome: RunOutcome::Suspended {
                    snapshot_id,
                    missing_inputs,
                },
                duration_ms: timer.finish(),
                logged_errors,
                skipped_nodes,
            });
        }

        let mut values = BTreeMap::new();
        for (name, id) in outputs {
            let Some(value) = ctx.value(&id) else {
                return Err(PipeloomError::Internal(format!(
                    "output '{name}' was never written"
                )));
            };
            values.insert(name, value);
        }

        let duration_ms = timer.finish();
        info!(duration_ms, skipped = skipped_nodes.len(), "Run completed");
        emit_event(
            self.events.as_ref(),
            "run.completed",
            serde_json::json!({
                "run_id": run_id.to_string(),
                "duration_ms": duration_ms,
                "skipped_nodes": &skipped_nodes,
            }),
        );
        Ok(RunResult {
            run_id,
            outcome: RunOutcome::Completed { outputs: values },
            duration_ms,
            logged_errors,
            skipped_nodes,
        })
    }

    /// Finds a requested output left unreachable by a skipped producer.
    ///
    /// The failure names the producer, which was skipped itself or lost one
    /// of its own inputs to an earlier skip.
    fn unreachable_output(
        &self,
        ctx: &ExecutionContext,
        outputs: &[(String, NodeId)],
    ) -> Result<Option<NodeFailure>, PipeloomError> {
        for (name, id) in outputs {
            if !ctx.is_resolved(id) || ctx.value(id).is_some() {
                continue;
            }
            let Some(producer) = self
                .graph
                .producer_of(id)
                .and_then(|producer| self.graph.module_node(producer))
            else {
                return Err(PipeloomError::Internal(format!(
                    "output '{name}' is unreachable but has no producer"
                )));
            };
            warn!(output = %name, producer = %producer.id, "Requested output is unreachable");
            return Ok(Some(NodeFailure::new(
                producer.id.clone(),
                &producer.module,
                ModuleError::unreachable_input(&producer.module, id.clone()),
            )));
        }
        Ok(None)
    }

    fn failed(
        &self,
        run_id: Uuid,
        failure: NodeFailure,
        timer: SpanTimer,
        logged_errors: Vec<NodeFailure>,
        skipped_nodes: Vec<NodeId>,
    ) -> RunResult {
        warn!(failure = %failure, "Run failed");
        emit_event(
            self.events.as_ref(),
            "run.failed",
            serde_json::json!({
                "run_id": run_id.to_string(),
                "error": failure.to_dict(),
            }),
        );
        RunResult {
            run_id,
            outcome: RunOutcome::Failed { failure },
            duration_ms: timer.finish(),
            logged_errors,
            skipped_nodes,
        }
    }
}
