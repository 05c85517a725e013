use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use weft_core::{NodeId, VariableId};

/// Sink verbosity levels, most to least quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Off,
    Error,
    Warning,
    Info,
    Debug,
}

/// Structured events emitted while a flow runs.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// A run began.
    FlowStarted { run_id: Uuid, flow: String },
    /// A run settled with the named outcome.
    FlowFinished { run_id: Uuid, outcome: &'static str },
    /// The executor reached a node.
    NodeEntered {
        run_id: Uuid,
        node: NodeId,
        name: Option<String>,
    },
    /// The executor left a node.
    NodeExited { run_id: Uuid, node: NodeId },
    /// An activity's action settled.
    ActivityCompleted {
        run_id: Uuid,
        node: NodeId,
        faulted: bool,
    },
    /// A binding failed to resolve or assign.
    BindingFailed {
        run_id: Uuid,
        node: NodeId,
        property: String,
        message: String,
    },
    /// A post-completion update wrote a variable.
    VariableUpdated {
        run_id: Uuid,
        node: NodeId,
        variable: VariableId,
    },
    /// A fault was routed to a handler node.
    FaultHandlerInvoked {
        run_id: Uuid,
        handler: NodeId,
        fault: String,
    },
    /// Cancellation reached a node.
    CancellationPropagated { run_id: Uuid, node: NodeId },
}

impl ExecutionEvent {
    /// Verbosity at which the event becomes visible.
    pub fn level(&self) -> Verbosity {
        match self {
            ExecutionEvent::BindingFailed { .. } => Verbosity::Error,
            ExecutionEvent::FaultHandlerInvoked { .. }
            | ExecutionEvent::CancellationPropagated { .. } => Verbosity::Warning,
            ExecutionEvent::FlowStarted { .. }
            | ExecutionEvent::FlowFinished { .. }
            | ExecutionEvent::ActivityCompleted { .. } => Verbosity::Info,
            ExecutionEvent::NodeEntered { .. }
            | ExecutionEvent::NodeExited { .. }
            | ExecutionEvent::VariableUpdated { .. } => Verbosity::Debug,
        }
    }
}

/// Narrow sink receiving execution events.
///
/// The executor filters by [`EventSink::verbosity`] before calling
/// [`EventSink::emit`] and never emits while holding a lock.
pub trait EventSink: Send + Sync {
    /// Maximum level this sink wants to receive.
    fn verbosity(&self) -> Verbosity {
        Verbosity::Info
    }

    /// Receive one event.
    fn emit(&self, event: &ExecutionEvent);
}

/// Default sink forwarding events to `tracing`.
#[derive(Debug, Clone)]
pub struct TracingSink {
    verbosity: Verbosity,
}

impl TracingSink {
    /// Sink at the given verbosity.
    pub fn with_verbosity(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::with_verbosity(Verbosity::Info)
    }
}

impl EventSink for TracingSink {
    fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn emit(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::FlowStarted { run_id, flow } => {
                info!(%run_id, flow, "flow started");
            }
            ExecutionEvent::FlowFinished { run_id, outcome } => {
                info!(%run_id, outcome, "flow finished");
            }
            ExecutionEvent::NodeEntered { run_id, node, name } => {
                debug!(%run_id, %node, name = name.as_deref(), "node entered");
            }
            ExecutionEvent::NodeExited { run_id, node } => {
                debug!(%run_id, %node, "node exited");
            }
            ExecutionEvent::ActivityCompleted {
                run_id,
                node,
                faulted,
            } => {
                if *faulted {
                    warn!(%run_id, %node, "activity faulted");
                } else {
                    info!(%run_id, %node, "activity completed");
                }
            }
            ExecutionEvent::BindingFailed {
                run_id,
                node,
                property,
                message,
            } => {
                error!(%run_id, %node, property, "binding failed: {message}");
            }
            ExecutionEvent::VariableUpdated {
                run_id,
                node,
                variable,
            } => {
                debug!(%run_id, %node, %variable, "variable updated");
            }
            ExecutionEvent::FaultHandlerInvoked {
                run_id,
                handler,
                fault,
            } => {
                warn!(%run_id, %handler, "fault handler invoked: {fault}");
            }
            ExecutionEvent::CancellationPropagated { run_id, node } => {
                warn!(%run_id, %node, "cancellation propagated");
            }
        }
    }
}

/// Sink that discards every event; useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn verbosity(&self) -> Verbosity {
        Verbosity::Off
    }

    fn emit(&self, _event: &ExecutionEvent) {}
}

/// Sink forwarding events into an unbounded channel.
///
/// Unbounded so a slow consumer never stalls the executor; event volume is
/// one per node transition.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
    verbosity: Verbosity,
}

impl ChannelSink {
    /// Sink writing into `sender` at the given verbosity.
    pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>, verbosity: Verbosity) -> Self {
        Self { sender, verbosity }
    }
}

impl EventSink for ChannelSink {
    fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn emit(&self, event: &ExecutionEvent) {
        // The receiver may have been dropped; events are best-effort.
        let _ = self.sender.send(event.clone());
    }
}
