use std::any::type_name;
use std::marker::PhantomData;
use std::sync::RwLock;

use crate::fault::{FaultError, FaultKind};
use crate::flow::FlowDefinition;
use crate::node::NodeId;
use crate::value::SharedValue;
use crate::variable::VariableId;

/// Per-run shared state: one write-once result cell per node and one
/// mutable slot per declared variable.
///
/// A cell is written exactly once per activation, by the executor, after
/// the producing activity completes successfully; re-entering a producer on
/// a loop back-edge re-arms its cell first. Variable slots are lock-guarded
/// and never held across a suspension point.
pub struct RunState {
    results: Vec<RwLock<Option<SharedValue>>>,
    variables: Vec<RwLock<Option<SharedValue>>>,
}

impl RunState {
    /// Allocate state sized for the given flow, all cells pending and all
    /// variable slots uninitialized.
    pub fn for_flow(flow: &FlowDefinition) -> Self {
        Self {
            results: (0..flow.node_count()).map(|_| RwLock::new(None)).collect(),
            variables: (0..flow.variable_count()).map(|_| RwLock::new(None)).collect(),
        }
    }

    /// Re-arm a producer's cell at the start of an activation, so a looped
    /// activity publishes a fresh result instead of tripping the write-once
    /// guard.
    pub fn begin_activation(&self, producer: NodeId) {
        if let Some(cell) = self.results.get(producer.index()) {
            let mut slot = cell.write().expect("result cell lock poisoned");
            *slot = None;
        }
    }

    /// Populate a node's result cell.
    ///
    /// Fails if the cell was already written since the last activation;
    /// compliant executions publish each result at most once per activation.
    pub fn publish_result(&self, producer: NodeId, value: SharedValue) -> Result<(), FaultError> {
        let cell = self.results.get(producer.index()).ok_or_else(|| {
            FaultError::engine(
                FaultKind::ResultNotReady,
                format!("no result cell allocated for node {producer}"),
            )
        })?;
        let mut slot = cell.write().expect("result cell lock poisoned");
        if slot.is_some() {
            return Err(FaultError::engine(
                FaultKind::ResultNotReady,
                format!("result cell for node {producer} was already populated"),
            ));
        }
        *slot = Some(value);
        Ok(())
    }

    /// Read a node's result cell, `None` while pending.
    pub fn result(&self, producer: NodeId) -> Option<SharedValue> {
        self.results
            .get(producer.index())?
            .read()
            .expect("result cell lock poisoned")
            .clone()
    }

    /// Overwrite a variable slot.
    pub fn set_variable(&self, variable: VariableId, value: SharedValue) {
        let mut slot = self.variables[variable.index()]
            .write()
            .expect("variable slot lock poisoned");
        *slot = Some(value);
    }

    /// Read a variable slot, `None` while uninitialized.
    pub fn variable(&self, variable: VariableId) -> Option<SharedValue> {
        self.variables[variable.index()]
            .read()
            .expect("variable slot lock poisoned")
            .clone()
    }

    /// Reset a variable slot to uninitialized (block teardown).
    pub fn clear_variable(&self, variable: VariableId) {
        let mut slot = self.variables[variable.index()]
            .write()
            .expect("variable slot lock poisoned");
        *slot = None;
    }
}

/// Read view over run state handed to expressions, predicates, and switch
/// choosers.
#[derive(Clone, Copy)]
pub struct EvalScope<'run> {
    state: &'run RunState,
}

impl<'run> EvalScope<'run> {
    /// Wrap the run state for evaluation.
    pub fn new(state: &'run RunState) -> Self {
        Self { state }
    }

    /// Read the raw result of a producer node.
    pub fn result(&self, producer: NodeId) -> Result<SharedValue, FaultError> {
        self.state.result(producer).ok_or_else(|| {
            FaultError::engine(
                FaultKind::ResultNotReady,
                format!("result of node {producer} read before its producer completed"),
            )
        })
    }

    /// Read the raw value of a variable.
    pub fn variable(&self, variable: VariableId) -> Result<SharedValue, FaultError> {
        self.state.variable(variable).ok_or_else(|| {
            FaultError::engine(
                FaultKind::VariableUnset,
                format!("variable {variable} read while uninitialized"),
            )
        })
    }
}

/// Typed accessor over a producer node's result cell.
///
/// Minted by the builder (directly or through an expression's dependency
/// recorder) so every read site is known before execution.
pub struct ResultOf<T> {
    producer: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResultOf<T> {
    pub(crate) fn new(producer: NodeId) -> Self {
        Self {
            producer,
            _marker: PhantomData,
        }
    }

    /// Node whose result this accessor reads.
    pub fn producer(&self) -> NodeId {
        self.producer
    }
}

impl<T: Clone + Send + Sync + 'static> ResultOf<T> {
    /// Read the producer's result.
    ///
    /// Fails with a `ResultNotReady` fault while the producer is pending —
    /// impossible in validated flows, surfaced only defensively.
    pub fn get(&self, scope: &EvalScope<'_>) -> Result<T, FaultError> {
        let raw = scope.result(self.producer)?;
        raw.downcast_ref::<T>().cloned().ok_or_else(|| {
            FaultError::engine(
                FaultKind::InputType,
                format!(
                    "result of node {} does not hold a `{}`",
                    self.producer,
                    type_name::<T>()
                ),
            )
        })
    }
}

impl<T> Clone for ResultOf<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResultOf<T> {}
