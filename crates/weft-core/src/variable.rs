use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::fault::{FaultError, FaultKind};
use crate::flow::ScopeId;
use crate::node::NodeId;
use crate::state::EvalScope;
use crate::value::SharedValue;

/// Identifier of a declared variable, an index into the flow's variable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub(crate) u32);

impl VariableId {
    /// Position in the flow's variable store.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Typed handle over a declared variable.
///
/// Doubles as the read accessor inside expressions; writes only happen
/// through update actions sequenced by the executor.
pub struct Var<T> {
    id: VariableId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Var<T> {
    pub(crate) fn new(id: VariableId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Identifier of the declared variable.
    pub fn id(&self) -> VariableId {
        self.id
    }
}

impl<T: Clone + Send + Sync + 'static> Var<T> {
    /// Read the variable's current value.
    ///
    /// Fails with a `VariableUnset` fault while uninitialized.
    pub fn get(&self, scope: &EvalScope<'_>) -> Result<T, FaultError> {
        let raw = scope.variable(self.id)?;
        raw.downcast_ref::<T>().cloned().ok_or_else(|| {
            FaultError::engine(
                FaultKind::InputType,
                format!("variable {} does not hold a `{}`", self.id, type_name::<T>()),
            )
        })
    }
}

impl<T> Clone for Var<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Var<T> {}

/// Declaration record for one variable.
pub struct VariableDecl {
    pub(crate) id: VariableId,
    pub(crate) name: Option<String>,
    pub(crate) scope: ScopeId,
    pub(crate) initial: Option<SharedValue>,
    pub(crate) type_name: &'static str,
}

impl VariableDecl {
    /// Identifier of this declaration.
    pub fn id(&self) -> VariableId {
        self.id
    }

    /// Optional display name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Declaring scope; block-local variables live only while their block runs.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Value replayed into the slot at scope entry, if declared.
    pub fn initial(&self) -> Option<&SharedValue> {
        self.initial.as_ref()
    }

    /// Name of the declared value type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for VariableDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableDecl")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("type", &self.type_name)
            .field("has_initial", &self.initial.is_some())
            .finish()
    }
}

/// Post-completion update action carried by the trigger activity's node.
///
/// Updates for one trigger run in declaration order, after the trigger's
/// result cell is populated and before its successor starts. Updates of a
/// faulted trigger are skipped.
pub struct VariableUpdate {
    pub(crate) variable: VariableId,
    pub(crate) op: UpdateOp,
}

impl VariableUpdate {
    /// Variable written by this action.
    pub fn variable(&self) -> VariableId {
        self.variable
    }

    /// The update operation.
    pub fn op(&self) -> &UpdateOp {
        &self.op
    }
}

impl fmt::Debug for VariableUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableUpdate")
            .field("variable", &self.variable)
            .field("op", &self.op.label())
            .finish()
    }
}

/// The operation applied by a [`VariableUpdate`].
pub enum UpdateOp {
    /// Store a value fixed at build time.
    Assign(SharedValue),
    /// Store the trigger activity's result.
    AssignResult(NodeId),
    /// Transform the current value in place.
    Update(Arc<dyn Fn(SharedValue) -> Result<SharedValue, FaultError> + Send + Sync>),
}

impl UpdateOp {
    fn label(&self) -> &'static str {
        match self {
            UpdateOp::Assign(_) => "assign",
            UpdateOp::AssignResult(_) => "assign_result",
            UpdateOp::Update(_) => "update",
        }
    }
}
