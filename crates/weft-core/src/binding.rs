use std::fmt;
use std::sync::Arc;

use crate::activity::Activity;
use crate::fault::FaultError;
use crate::node::NodeId;
use crate::state::{EvalScope, ResultOf};
use crate::value::{InputValue, SharedValue};
use crate::variable::{Var, VariableId};

/// Declarative assignment from a source to one activity input property.
pub struct Binding {
    pub(crate) property: &'static str,
    pub(crate) source: BindingSource,
}

impl Binding {
    /// Target input property name.
    pub fn property(&self) -> &'static str {
        self.property
    }

    /// Value source.
    pub fn source(&self) -> &BindingSource {
        &self.source
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("property", &self.property)
            .field("source", &self.source.label())
            .finish()
    }
}

/// Where a binding's value comes from at resolution time.
pub enum BindingSource {
    /// Eagerly-known value captured at build time.
    Constant {
        value: SharedValue,
        type_name: &'static str,
    },
    /// The result cell of another activity, which must be populated by the
    /// time the owner is invoked.
    ResultOf(NodeId),
    /// Late-bound expression evaluated against the run state, with its read
    /// set recorded at construction.
    Expression {
        reads: Vec<Dependency>,
        eval: Arc<dyn Fn(&EvalScope<'_>) -> Result<InputValue, FaultError> + Send + Sync>,
    },
}

impl BindingSource {
    fn label(&self) -> &'static str {
        match self {
            BindingSource::Constant { .. } => "constant",
            BindingSource::ResultOf(_) => "result_of",
            BindingSource::Expression { .. } => "expression",
        }
    }

    /// Result cells this source reads, directly or through its declared
    /// expression dependencies.
    pub fn result_reads(&self) -> Vec<NodeId> {
        match self {
            BindingSource::Constant { .. } => Vec::new(),
            BindingSource::ResultOf(producer) => vec![*producer],
            BindingSource::Expression { reads, .. } => reads
                .iter()
                .filter_map(|dep| match dep {
                    Dependency::Result(producer) => Some(*producer),
                    Dependency::Variable(_) => None,
                })
                .collect(),
        }
    }

    /// Variables this source reads through its declared dependencies.
    pub fn variable_reads(&self) -> Vec<VariableId> {
        match self {
            BindingSource::Expression { reads, .. } => reads
                .iter()
                .filter_map(|dep| match dep {
                    Dependency::Variable(variable) => Some(*variable),
                    Dependency::Result(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// One recorded read of an expression binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// Reads the result cell of the given producer node.
    Result(NodeId),
    /// Reads the given variable.
    Variable(VariableId),
}

/// Dependency recorder passed to expression constructors.
///
/// Accessors minted through the recorder register the expression's read set
/// mechanically, so the validator can prove liveness without evaluating the
/// expression.
pub struct Deps {
    pub(crate) reads: Vec<Dependency>,
}

impl Deps {
    pub(crate) fn new() -> Self {
        Self { reads: Vec::new() }
    }

    /// Mint a result accessor for the expression, recording the read.
    pub fn result_of<A: Activity>(&mut self, producer: &crate::builder::ActivityHandle<A>) -> ResultOf<A::Output> {
        self.reads.push(Dependency::Result(producer.id()));
        ResultOf::new(producer.id())
    }

    /// Mint a variable accessor for the expression, recording the read.
    pub fn variable<T>(&mut self, variable: &Var<T>) -> Var<T> {
        self.reads.push(Dependency::Variable(variable.id()));
        *variable
    }
}
