use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use weft_core::{
    ActivityContext, ActivityNode, BindingSource, CaseTable, EvalScope, FaultError, FaultKind,
    FlowDefinition, ForkJoinNode, InputValue, Node, NodeId, NodeKind, RunState, ScopeId,
    UpdateOp, ValidationReport,
};
use weft_plan::ValidatedFlow;

use crate::container::{ServiceContainer, ServiceScope};
use crate::events::{EventSink, ExecutionEvent, Verbosity};

/// Outcome of one flow run.
#[derive(Debug)]
pub enum RunOutcome {
    /// The flow ran to completion; a fault consumed by an effective handler
    /// counts as completion.
    Completed,
    /// Validation refused the definition; no activity was invoked.
    ValidationFailed(ValidationReport),
    /// A fault had no effective handler.
    Faulted(FaultError),
    /// Cancellation ended the run.
    Cancelled,
    /// A handler itself failed while handling.
    HandlerFailed(FaultError),
}

impl RunOutcome {
    /// Whether the run settled cleanly.
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::ValidationFailed(_) => "validation_failed",
            RunOutcome::Faulted(_) => "faulted",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::HandlerFailed(_) => "handler_failed",
        }
    }
}

/// How a traversal segment settled.
#[derive(Debug)]
enum SegmentEnd {
    /// Ran off the end of the segment.
    Ran,
    /// A fault escaped every handler in reach.
    Faulted { fault: FaultError },
    /// A dispatched handler completed; the run ends here.
    HandlerDone,
    /// A handler itself faulted.
    HandlerFailed(FaultError),
    /// Cancellation stopped the segment.
    Cancelled,
}

/// Dispatch context of the running segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Top-level traversal: faults route to the nearest effective handler.
    Main,
    /// Fork branch: unhandled faults bubble to the join barrier.
    Branch,
}

/// Continuation after one node.
enum Step {
    Next(Option<NodeId>),
    EnterBlock { block: NodeId, initial: NodeId },
    End(SegmentEnd),
}

enum ActivityFailure {
    Fault(FaultError),
    Cancelled,
}

/// Per-run execution driver threaded through the traversal.
struct Driver {
    flow: Arc<FlowDefinition>,
    state: RunState,
    services: ServiceScope,
    sink: Arc<dyn EventSink>,
    run_id: Uuid,
}

/// Drive one run of a validated flow to its outcome.
pub(crate) async fn run_flow(
    validated: &ValidatedFlow,
    container: Arc<ServiceContainer>,
    sink: Arc<dyn EventSink>,
    token: CancellationToken,
) -> RunOutcome {
    let flow = validated.shared();
    let state = RunState::for_flow(&flow);
    let driver = Arc::new(Driver {
        flow,
        state,
        services: ServiceScope::new(container),
        sink,
        run_id: Uuid::new_v4(),
    });
    driver.init_scope_variables(ScopeId::ROOT);
    driver.notify(ExecutionEvent::FlowStarted {
        run_id: driver.run_id,
        flow: driver.flow.name().to_string(),
    });

    let outcome = match driver.flow.initial() {
        // Unreachable past validation; kept as a defensive fault.
        None => RunOutcome::Faulted(FaultError::new("flow has no initial node")),
        Some(initial) => match driver.run_segment(initial, Mode::Main, token).await {
            SegmentEnd::Ran | SegmentEnd::HandlerDone => RunOutcome::Completed,
            SegmentEnd::Faulted { fault } => RunOutcome::Faulted(fault),
            SegmentEnd::Cancelled => RunOutcome::Cancelled,
            SegmentEnd::HandlerFailed(fault) => RunOutcome::HandlerFailed(fault),
        },
    };
    driver.notify(ExecutionEvent::FlowFinished {
        run_id: driver.run_id,
        outcome: outcome.label(),
    });
    outcome
}

impl Driver {
    fn notify(&self, event: ExecutionEvent) {
        let verbosity = self.sink.verbosity();
        if verbosity == Verbosity::Off {
            return;
        }
        if event.level() <= verbosity {
            self.sink.emit(&event);
        }
    }

    fn init_scope_variables(&self, scope: ScopeId) {
        let Some(info) = self.flow.scope(scope) else {
            return;
        };
        for &variable in info.variables() {
            match self.flow.variable(variable).and_then(|decl| decl.initial().cloned()) {
                Some(value) => self.state.set_variable(variable, value),
                None => self.state.clear_variable(variable),
            }
        }
    }

    fn teardown_scope_variables(&self, scope: ScopeId) {
        let Some(info) = self.flow.scope(scope) else {
            return;
        };
        for &variable in info.variables() {
            self.state.clear_variable(variable);
        }
    }

    /// Walk one sequential region starting at `start` until it runs off the
    /// end, a handler settles the run, or cancellation stops it.
    fn run_segment(
        self: &Arc<Self>,
        start: NodeId,
        mode: Mode,
        token: CancellationToken,
    ) -> BoxFuture<'static, SegmentEnd> {
        let driver = Arc::clone(self);
        Box::pin(async move {
            let mut open_blocks: Vec<NodeId> = Vec::new();
            let mut current = Some(start);
            while let Some(id) = current {
                let Some(node) = driver.flow.node(id) else {
                    return SegmentEnd::Faulted {
                        fault: FaultError::new(format!("node {id} is not part of the flow")),
                    };
                };
                if token.is_cancelled() {
                    return driver.cancel_at(node, mode, &token).await;
                }
                driver.notify(ExecutionEvent::NodeEntered {
                    run_id: driver.run_id,
                    node: id,
                    name: node.name().map(str::to_string),
                });
                let step = driver.step(node, mode, &token).await;
                driver.notify(ExecutionEvent::NodeExited {
                    run_id: driver.run_id,
                    node: id,
                });
                match step {
                    Step::Next(next) => {
                        current = match next {
                            Some(next) => Some(next),
                            None => driver.exit_blocks(&mut open_blocks),
                        };
                    }
                    Step::EnterBlock { block, initial } => {
                        open_blocks.push(block);
                        current = Some(initial);
                    }
                    Step::End(end) => return end,
                }
            }
            SegmentEnd::Ran
        })
    }

    /// Tear down finished blocks until one of them continues the walk.
    fn exit_blocks(&self, open_blocks: &mut Vec<NodeId>) -> Option<NodeId> {
        while let Some(block_id) = open_blocks.pop() {
            let Some(node) = self.flow.node(block_id) else {
                continue;
            };
            if let NodeKind::Block(block) = node.kind() {
                self.teardown_scope_variables(block.body_scope());
                if let Some(next) = block.next() {
                    return Some(next);
                }
            }
        }
        None
    }

    async fn step(self: &Arc<Self>, node: &Node, mode: Mode, token: &CancellationToken) -> Step {
        match node.kind() {
            NodeKind::Activity(activity) | NodeKind::FaultHandler(activity) => {
                match self.run_activity(node.id(), activity, None, token).await {
                    Ok(()) => Step::Next(activity.next()),
                    Err(ActivityFailure::Cancelled) => {
                        Step::End(self.cancel_with(node.id(), activity.cancel(), mode, token).await)
                    }
                    Err(ActivityFailure::Fault(fault)) => {
                        Step::End(self.fault_with(activity.fault(), fault, mode, token).await)
                    }
                }
            }
            NodeKind::Condition(condition) => {
                match condition.evaluate(&EvalScope::new(&self.state)) {
                    Ok(true) => Step::Next(condition.on_true()),
                    Ok(false) => Step::Next(condition.on_false()),
                    Err(fault) => Step::End(self.fault_with(None, fault, mode, token).await),
                }
            }
            NodeKind::Switch(switch) => {
                match switch.table().select(&EvalScope::new(&self.state)) {
                    Ok(Some(target)) => Step::Next(Some(target)),
                    Ok(None) => match switch.default() {
                        Some(default) => Step::Next(Some(default)),
                        None => {
                            let fault = FaultError::engine(
                                FaultKind::UnhandledCase,
                                format!(
                                    "switch {} selected a key with no mapped case and no \
                                     default branch",
                                    self.flow.node_label(node.id())
                                ),
                            );
                            // Dispatched to the flow default handler, never a
                            // node-local edge.
                            Step::End(self.fault_with(None, fault, mode, token).await)
                        }
                    },
                    Err(fault) => Step::End(self.fault_with(None, fault, mode, token).await),
                }
            }
            NodeKind::ForkJoin(fork_join) => self.run_fork_join(node.id(), fork_join, mode, token).await,
            NodeKind::Block(block) => {
                self.init_scope_variables(block.body_scope());
                match block.initial() {
                    Some(initial) => Step::EnterBlock {
                        block: node.id(),
                        initial,
                    },
                    None => Step::Next(block.next()),
                }
            }
        }
    }

    /// Instantiate, bind, and invoke one activity, then publish its result
    /// and apply its updates in declaration order.
    async fn run_activity(
        &self,
        id: NodeId,
        activity: &ActivityNode,
        routed_fault: Option<FaultError>,
        token: &CancellationToken,
    ) -> Result<(), ActivityFailure> {
        let flow_label = self.flow.name().to_string();
        let node_label = self.flow.node_label(id);
        self.state.begin_activation(id);

        let mut instance = match self.services.instantiate(activity.plan()) {
            Ok(instance) => instance,
            Err(err) => {
                return Err(ActivityFailure::Fault(FaultError::engine(
                    FaultKind::Instantiation,
                    format!("could not instantiate {node_label}: {err}"),
                )));
            }
        };

        for binding in activity.bindings() {
            let assigned = self
                .resolve_binding(binding.source())
                .and_then(|value| instance.assign_input(binding.property(), value));
            if let Err(fault) = assigned {
                self.notify(ExecutionEvent::BindingFailed {
                    run_id: self.run_id,
                    node: id,
                    property: binding.property().to_string(),
                    message: fault.message().to_string(),
                });
                return Err(ActivityFailure::Fault(fault));
            }
        }

        if let Some(fault) = routed_fault {
            instance.accept_fault(fault);
        }

        let ctx = ActivityContext::new(token.clone());
        let started = Instant::now();
        let invoked = tokio::select! {
            biased;
            _ = token.cancelled() => {
                metrics::counter!(
                    "weft.executor.cancellations_total",
                    "flow" => flow_label,
                    "node" => node_label
                )
                .increment(1);
                return Err(ActivityFailure::Cancelled);
            }
            result = instance.invoke(&ctx) => result,
        };
        let elapsed = started.elapsed().as_secs_f64() * 1_000.0;
        metrics::histogram!(
            "weft.executor.activity_latency_ms",
            "flow" => flow_label.clone(),
            "node" => node_label.clone()
        )
        .record(elapsed);

        match invoked {
            Ok(value) => {
                self.state
                    .publish_result(id, value)
                    .map_err(ActivityFailure::Fault)?;
                self.notify(ExecutionEvent::ActivityCompleted {
                    run_id: self.run_id,
                    node: id,
                    faulted: false,
                });
                self.apply_updates(id, activity)
            }
            Err(fault) => {
                metrics::counter!(
                    "weft.executor.activity_faults_total",
                    "flow" => flow_label,
                    "node" => node_label
                )
                .increment(1);
                self.notify(ExecutionEvent::ActivityCompleted {
                    run_id: self.run_id,
                    node: id,
                    faulted: true,
                });
                Err(ActivityFailure::Fault(fault))
            }
        }
    }

    fn resolve_binding(&self, source: &BindingSource) -> Result<InputValue, FaultError> {
        match source {
            BindingSource::Constant { value, type_name } => {
                Ok(InputValue::shared(Arc::clone(value), type_name))
            }
            BindingSource::ResultOf(producer) => match self.state.result(*producer) {
                Some(value) => Ok(InputValue::shared(value, "activity result")),
                None => Err(FaultError::engine(
                    FaultKind::ResultNotReady,
                    format!(
                        "result of {} read before its producer completed",
                        self.flow.node_label(*producer)
                    ),
                )),
            },
            BindingSource::Expression { eval, .. } => eval(&EvalScope::new(&self.state)),
        }
    }

    /// Updates of a faulted trigger are never applied: this only runs after
    /// the result cell is populated.
    fn apply_updates(&self, id: NodeId, activity: &ActivityNode) -> Result<(), ActivityFailure> {
        for update in activity.updates() {
            let variable = update.variable();
            let applied = match update.op() {
                UpdateOp::Assign(value) => {
                    self.state.set_variable(variable, Arc::clone(value));
                    Ok(())
                }
                UpdateOp::AssignResult(trigger) => match self.state.result(*trigger) {
                    Some(value) => {
                        self.state.set_variable(variable, value);
                        Ok(())
                    }
                    None => Err(FaultError::engine(
                        FaultKind::ResultNotReady,
                        format!(
                            "update of variable {variable} reads the result of {} before \
                             completion",
                            self.flow.node_label(*trigger)
                        ),
                    )),
                },
                UpdateOp::Update(transform) => match self.state.variable(variable) {
                    Some(current) => transform(current).map(|value| {
                        self.state.set_variable(variable, value);
                    }),
                    None => Err(FaultError::engine(
                        FaultKind::VariableUnset,
                        format!("variable {variable} updated while uninitialized"),
                    )),
                },
            };
            match applied {
                Ok(()) => self.notify(ExecutionEvent::VariableUpdated {
                    run_id: self.run_id,
                    node: id,
                    variable,
                }),
                Err(fault) => return Err(ActivityFailure::Fault(fault)),
            }
        }
        Ok(())
    }

    /// Route a fault to the nearest effective handler for the current mode.
    async fn fault_with(
        self: &Arc<Self>,
        own_handler: Option<NodeId>,
        fault: FaultError,
        mode: Mode,
        token: &CancellationToken,
    ) -> SegmentEnd {
        match mode {
            // Branch faults consult only the node-local handler; the flow
            // default applies at the join barrier.
            Mode::Branch => match own_handler {
                Some(handler) => match self.dispatch_handler(handler, Some(fault), token).await {
                    Ok(()) => SegmentEnd::Ran,
                    Err(handler_fault) => SegmentEnd::HandlerFailed(handler_fault),
                },
                None => SegmentEnd::Faulted { fault },
            },
            Mode::Main => match own_handler.or(self.flow.default_fault_handler()) {
                Some(handler) => match self.dispatch_handler(handler, Some(fault), token).await {
                    Ok(()) => SegmentEnd::HandlerDone,
                    Err(handler_fault) => SegmentEnd::HandlerFailed(handler_fault),
                },
                None => SegmentEnd::Faulted { fault },
            },
        }
    }

    async fn cancel_at(
        self: &Arc<Self>,
        node: &Node,
        mode: Mode,
        token: &CancellationToken,
    ) -> SegmentEnd {
        let own_handler = match node.kind() {
            NodeKind::Activity(activity) | NodeKind::FaultHandler(activity) => activity.cancel(),
            NodeKind::ForkJoin(fork_join) => fork_join.cancel(),
            _ => None,
        };
        self.cancel_with(node.id(), own_handler, mode, token).await
    }

    /// Route cancellation to the effective cancellation handler; the run
    /// settles `Cancelled` whether or not a handler ran.
    async fn cancel_with(
        self: &Arc<Self>,
        at: NodeId,
        own_handler: Option<NodeId>,
        mode: Mode,
        token: &CancellationToken,
    ) -> SegmentEnd {
        self.notify(ExecutionEvent::CancellationPropagated {
            run_id: self.run_id,
            node: at,
        });
        match mode {
            Mode::Branch => {
                if let Some(handler) = own_handler {
                    if let Err(fault) = self.dispatch_handler(handler, None, token).await {
                        return SegmentEnd::HandlerFailed(fault);
                    }
                }
                SegmentEnd::Cancelled
            }
            Mode::Main => match own_handler.or(self.flow.default_cancellation_handler()) {
                Some(handler) => match self.dispatch_handler(handler, None, token).await {
                    Ok(()) => SegmentEnd::Cancelled,
                    Err(fault) => SegmentEnd::HandlerFailed(fault),
                },
                None => SegmentEnd::Cancelled,
            },
        }
    }

    /// Run a handler node as an ordinary activity.
    ///
    /// Handlers are never re-dispatched: they run on a detached token and a
    /// fault inside one ends the run as `HandlerFailed`.
    async fn dispatch_handler(
        self: &Arc<Self>,
        handler: NodeId,
        fault: Option<FaultError>,
        _token: &CancellationToken,
    ) -> Result<(), FaultError> {
        let Some(node) = self.flow.node(handler) else {
            return Err(FaultError::new(format!("handler {handler} is not part of the flow")));
        };
        let Some(activity) = node.kind().as_activity() else {
            return Err(FaultError::new(format!(
                "handler {} is not an activity node",
                self.flow.node_label(handler)
            )));
        };
        if let Some(fault) = &fault {
            self.notify(ExecutionEvent::FaultHandlerInvoked {
                run_id: self.run_id,
                handler,
                fault: fault.message().to_string(),
            });
        }
        let handler_token = CancellationToken::new();
        match self.run_activity(handler, activity, fault, &handler_token).await {
            Ok(()) => Ok(()),
            Err(ActivityFailure::Fault(fault)) => Err(fault),
            // A detached token never fires; kept for completeness.
            Err(ActivityFailure::Cancelled) => Ok(()),
        }
    }

    /// Launch every branch as a linked sub-execution, await the join
    /// barrier, and aggregate the settled ends.
    async fn run_fork_join(
        self: &Arc<Self>,
        id: NodeId,
        fork_join: &ForkJoinNode,
        mode: Mode,
        token: &CancellationToken,
    ) -> Step {
        let branch_token = token.child_token();
        let mut tasks = Vec::with_capacity(fork_join.branches().len());
        for branch in fork_join.branches() {
            let driver = Arc::clone(self);
            let entry = branch.entry();
            let task_token = branch_token.clone();
            tasks.push(tokio::spawn(async move {
                let end = driver.run_segment(entry, Mode::Branch, task_token.clone()).await;
                if matches!(end, SegmentEnd::Faulted { .. } | SegmentEnd::HandlerFailed(_)) {
                    // First fault signals the remaining siblings.
                    task_token.cancel();
                }
                end
            }));
        }

        let settled = futures::future::join_all(tasks).await;
        let mut faults = Vec::new();
        let mut handler_failure = None;
        let mut cancelled = false;
        for result in settled {
            match result {
                Ok(SegmentEnd::Ran | SegmentEnd::HandlerDone) => {}
                Ok(SegmentEnd::Faulted { fault }) => faults.push(fault),
                Ok(SegmentEnd::Cancelled) => cancelled = true,
                Ok(SegmentEnd::HandlerFailed(fault)) => {
                    handler_failure.get_or_insert(fault);
                }
                Err(join_error) => faults.push(FaultError::engine(
                    FaultKind::Join,
                    format!("fork branch ended abnormally: {join_error}"),
                )),
            }
        }

        if let Some(fault) = handler_failure {
            return Step::End(SegmentEnd::HandlerFailed(fault));
        }
        if !faults.is_empty() {
            let mut primary = faults.remove(0);
            for fault in faults {
                primary.push_suppressed(fault);
            }
            return Step::End(self.fault_with(fork_join.fault(), primary, mode, token).await);
        }
        if cancelled || token.is_cancelled() {
            return Step::End(self.cancel_with(id, fork_join.cancel(), mode, token).await);
        }
        Step::Next(fork_join.next())
    }
}
