use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::activity::{Activity, InputSpec};
use crate::binding::Binding;
use crate::fault::FaultError;
use crate::flow::ScopeId;
use crate::state::EvalScope;
use crate::variable::VariableUpdate;

/// Identifier of a node, an index into the flow's flat node store.
///
/// Successors are stored as ids rather than pointers so the in-memory
/// representation stays acyclic even when the flow graph loops.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Position in the flow's node store.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Label attached to an outgoing edge, as surfaced by traversal and export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    /// Ordinary success successor.
    Next,
    /// Fault handler successor.
    Fault,
    /// Cancellation handler successor.
    Cancel,
    /// Condition true branch.
    True,
    /// Condition false branch.
    False,
    /// Switch case keyed by the displayed value.
    Case(String),
    /// Switch default branch.
    Default,
    /// Fork-join branch entry, by position.
    Fork(usize),
    /// Fork-join exit after all branches settle.
    Join,
    /// Block entry into its initial child.
    Body,
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeLabel::Next => f.write_str("next"),
            EdgeLabel::Fault => f.write_str("fault"),
            EdgeLabel::Cancel => f.write_str("cancel"),
            EdgeLabel::True => f.write_str("true"),
            EdgeLabel::False => f.write_str("false"),
            EdgeLabel::Case(key) => write!(f, "case({key})"),
            EdgeLabel::Default => f.write_str("default"),
            EdgeLabel::Fork(idx) => write!(f, "fork_{idx}"),
            EdgeLabel::Join => f.write_str("join"),
            EdgeLabel::Body => f.write_str("body"),
        }
    }
}

/// The activity *type token* stored on a node.
///
/// Carries everything the engine needs to know about the type before an
/// instance exists: identity for container resolution, input metadata for
/// binding checks, and the fault-handler capability flag.
#[derive(Debug, Clone, Copy)]
pub struct ActivityPlan {
    token: TypeId,
    type_name: &'static str,
    inputs: &'static [InputSpec],
    handles_faults: bool,
}

impl ActivityPlan {
    /// Capture the plan for a concrete activity type.
    pub fn of<A: Activity>() -> Self {
        Self {
            token: TypeId::of::<A>(),
            type_name: type_name::<A>(),
            inputs: A::inputs(),
            handles_faults: A::HANDLES_FAULTS,
        }
    }

    /// Type token used for container resolution.
    pub fn token(&self) -> TypeId {
        self.token
    }

    /// Fully-qualified type name, for diagnostics and export.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Declared input properties.
    pub fn inputs(&self) -> &'static [InputSpec] {
        self.inputs
    }

    /// Whether the type carries the fault-handler capability.
    pub fn handles_faults(&self) -> bool {
        self.handles_faults
    }

    /// Lookup one declared input property by name.
    pub fn input(&self, property: &str) -> Option<&'static InputSpec> {
        self.inputs.iter().find(|spec| spec.name == property)
    }
}

/// Activity node payload, also used by the fault-handler variant.
pub struct ActivityNode {
    pub(crate) plan: ActivityPlan,
    pub(crate) next: Option<NodeId>,
    pub(crate) fault: Option<NodeId>,
    pub(crate) cancel: Option<NodeId>,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) updates: Vec<VariableUpdate>,
}

impl ActivityNode {
    pub(crate) fn new(plan: ActivityPlan) -> Self {
        Self {
            plan,
            next: None,
            fault: None,
            cancel: None,
            bindings: Vec::new(),
            updates: Vec::new(),
        }
    }

    /// The activity type token.
    pub fn plan(&self) -> &ActivityPlan {
        &self.plan
    }

    /// Success successor.
    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    /// Node-local fault handler.
    pub fn fault(&self) -> Option<NodeId> {
        self.fault
    }

    /// Node-local cancellation handler.
    pub fn cancel(&self) -> Option<NodeId> {
        self.cancel
    }

    /// Declared input bindings.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Post-completion variable updates, in declaration order.
    pub fn updates(&self) -> &[VariableUpdate] {
        &self.updates
    }
}

/// Condition node payload: a nullary boolean predicate plus two branches.
pub struct ConditionNode {
    pub(crate) predicate: Arc<dyn Fn(&EvalScope<'_>) -> Result<bool, FaultError> + Send + Sync>,
    pub(crate) on_true: Option<NodeId>,
    pub(crate) on_false: Option<NodeId>,
}

impl ConditionNode {
    /// Evaluate the predicate against the run state.
    pub fn evaluate(&self, scope: &EvalScope<'_>) -> Result<bool, FaultError> {
        (self.predicate)(scope)
    }

    /// True branch successor.
    pub fn on_true(&self) -> Option<NodeId> {
        self.on_true
    }

    /// False branch successor.
    pub fn on_false(&self) -> Option<NodeId> {
        self.on_false
    }
}

/// Type-erased case dispatch for a switch node.
///
/// The typed table keeps the key type private to the builder handle while
/// the engine only needs selection and display labels.
pub trait CaseTable: Send + Sync {
    /// Evaluate the choice expression and select a case target by key
    /// equality, in case declaration order.
    fn select(&self, scope: &EvalScope<'_>) -> Result<Option<NodeId>, FaultError>;

    /// Display label and target of every declared case, in order.
    fn cases(&self) -> Vec<(String, NodeId)>;

    /// Whether no case has been declared yet.
    fn is_empty(&self) -> bool;

    /// Builder access for typed mutation.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct TypedCaseTable<K> {
    pub(crate) chooser: Arc<dyn Fn(&EvalScope<'_>) -> Result<K, FaultError> + Send + Sync>,
    pub(crate) cases: Vec<(K, NodeId)>,
}

impl<K> TypedCaseTable<K> {
    pub(crate) fn new(
        chooser: Arc<dyn Fn(&EvalScope<'_>) -> Result<K, FaultError> + Send + Sync>,
    ) -> Self {
        Self {
            chooser,
            cases: Vec::new(),
        }
    }
}

impl<K> CaseTable for TypedCaseTable<K>
where
    K: PartialEq + fmt::Display + Send + Sync + 'static,
{
    fn select(&self, scope: &EvalScope<'_>) -> Result<Option<NodeId>, FaultError> {
        let key = (self.chooser)(scope)?;
        Ok(self
            .cases
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, target)| *target))
    }

    fn cases(&self) -> Vec<(String, NodeId)> {
        self.cases
            .iter()
            .map(|(key, target)| (key.to_string(), *target))
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Switch node payload.
pub struct SwitchNode {
    pub(crate) table: Box<dyn CaseTable>,
    pub(crate) default: Option<NodeId>,
    pub(crate) partial_allowed: bool,
}

impl SwitchNode {
    /// Case dispatch table.
    pub fn table(&self) -> &dyn CaseTable {
        self.table.as_ref()
    }

    /// Default successor taken when no case key matches.
    pub fn default(&self) -> Option<NodeId> {
        self.default
    }

    /// Whether partial key coverage was explicitly accepted.
    pub fn partial_allowed(&self) -> bool {
        self.partial_allowed
    }
}

/// One parallel branch of a fork-join, identified by its entry node.
///
/// The branch body is the subgraph reachable from the entry via `next`
/// edges; it runs to exhaustion before the join barrier releases.
#[derive(Debug, Clone)]
pub struct ForkBranch {
    pub(crate) entry: NodeId,
    pub(crate) name: Option<String>,
}

impl ForkBranch {
    /// Entry node of the branch body.
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Optional display name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Fork-join node payload.
#[derive(Debug, Clone)]
pub struct ForkJoinNode {
    pub(crate) branches: Vec<ForkBranch>,
    pub(crate) next: Option<NodeId>,
    pub(crate) fault: Option<NodeId>,
    pub(crate) cancel: Option<NodeId>,
}

impl ForkJoinNode {
    /// Declared branches, in fork order.
    pub fn branches(&self) -> &[ForkBranch] {
        &self.branches
    }

    /// Successor taken after all branches settle successfully.
    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    /// Fault handler for aggregated branch faults.
    pub fn fault(&self) -> Option<NodeId> {
        self.fault
    }

    /// Cancellation handler for aggregated branch cancellation.
    pub fn cancel(&self) -> Option<NodeId> {
        self.cancel
    }
}

/// Block node payload: a named sub-scope with its own nodes and variables.
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub(crate) initial: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
    pub(crate) body_scope: ScopeId,
}

impl BlockNode {
    /// Initial child executed on block entry.
    pub fn initial(&self) -> Option<NodeId> {
        self.initial
    }

    /// Successor taken after the block's terminal node exits.
    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    /// Scope holding the block's local variables.
    pub fn body_scope(&self) -> ScopeId {
        self.body_scope
    }
}

/// Variant payload of a node.
pub enum NodeKind {
    Activity(ActivityNode),
    Condition(ConditionNode),
    Switch(SwitchNode),
    ForkJoin(ForkJoinNode),
    Block(BlockNode),
    FaultHandler(ActivityNode),
}

impl NodeKind {
    /// Short label for diagnostics and export.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Activity(_) => "activity",
            NodeKind::Condition(_) => "condition",
            NodeKind::Switch(_) => "switch",
            NodeKind::ForkJoin(_) => "fork_join",
            NodeKind::Block(_) => "block",
            NodeKind::FaultHandler(_) => "fault_handler",
        }
    }

    /// Activity payload of activity-shaped variants.
    pub fn as_activity(&self) -> Option<&ActivityNode> {
        match self {
            NodeKind::Activity(activity) | NodeKind::FaultHandler(activity) => Some(activity),
            _ => None,
        }
    }
}

/// A vertex of the flow graph.
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: Option<String>,
    pub(crate) scope: ScopeId,
    pub(crate) kind: NodeKind,
}

impl Node {
    /// Identifier of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Optional display name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Scope this node was declared in.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Variant payload.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Every outgoing labeled edge of this node.
    pub fn successors(&self) -> Vec<(EdgeLabel, NodeId)> {
        let mut edges = Vec::new();
        match &self.kind {
            NodeKind::Activity(activity) | NodeKind::FaultHandler(activity) => {
                if let Some(next) = activity.next {
                    edges.push((EdgeLabel::Next, next));
                }
                if let Some(fault) = activity.fault {
                    edges.push((EdgeLabel::Fault, fault));
                }
                if let Some(cancel) = activity.cancel {
                    edges.push((EdgeLabel::Cancel, cancel));
                }
            }
            NodeKind::Condition(condition) => {
                if let Some(on_true) = condition.on_true {
                    edges.push((EdgeLabel::True, on_true));
                }
                if let Some(on_false) = condition.on_false {
                    edges.push((EdgeLabel::False, on_false));
                }
            }
            NodeKind::Switch(switch) => {
                for (label, target) in switch.table.cases() {
                    edges.push((EdgeLabel::Case(label), target));
                }
                if let Some(default) = switch.default {
                    edges.push((EdgeLabel::Default, default));
                }
            }
            NodeKind::ForkJoin(fork_join) => {
                for (idx, branch) in fork_join.branches.iter().enumerate() {
                    edges.push((EdgeLabel::Fork(idx), branch.entry));
                }
                if let Some(next) = fork_join.next {
                    edges.push((EdgeLabel::Join, next));
                }
                if let Some(fault) = fork_join.fault {
                    edges.push((EdgeLabel::Fault, fault));
                }
                if let Some(cancel) = fork_join.cancel {
                    edges.push((EdgeLabel::Cancel, cancel));
                }
            }
            NodeKind::Block(block) => {
                if let Some(initial) = block.initial {
                    edges.push((EdgeLabel::Body, initial));
                }
                if let Some(next) = block.next {
                    edges.push((EdgeLabel::Next, next));
                }
            }
        }
        edges
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("kind", &self.kind.label())
            .finish()
    }
}
