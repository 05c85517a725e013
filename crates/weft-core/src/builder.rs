use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

use crate::activity::Activity;
use crate::binding::{Binding, BindingSource, Dependency, Deps};
use crate::fault::{FaultError, FaultKind};
use crate::flow::{FlowDefinition, ScopeId, ScopeInfo};
use crate::node::{
    ActivityNode, ActivityPlan, BlockNode, CaseTable, ConditionNode, ForkBranch, ForkJoinNode,
    Node, NodeId, NodeKind, SwitchNode, TypedCaseTable,
};
use crate::state::{EvalScope, ResultOf};
use crate::value::{InputValue, SharedValue};
use crate::variable::{UpdateOp, Var, VariableDecl, VariableId, VariableUpdate};

/// Errors produced by builder misuse.
///
/// These are programmer errors raised immediately at build time; structural
/// and semantic problems that need whole-graph knowledge are left to the
/// validator instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// The edge was already connected.
    #[error("edge `{edge}` of node {node} is already connected")]
    EdgeAlreadySet { node: NodeId, edge: &'static str },
    /// The initial node was already declared.
    #[error("initial node is already declared")]
    InitialAlreadySet,
    /// The default fault handler was already declared.
    #[error("default fault handler is already declared")]
    DefaultFaultHandlerAlreadySet,
    /// The default cancellation handler was already declared.
    #[error("default cancellation handler is already declared")]
    DefaultCancellationHandlerAlreadySet,
    /// The switch already maps the given case key.
    #[error("switch node {node} already maps case `{key}`")]
    DuplicateCase { node: NodeId, key: String },
    /// The activity type declares no such input property.
    #[error("activity `{activity}` declares no input property named `{property}`")]
    UnknownProperty {
        activity: &'static str,
        property: &'static str,
    },
    /// The variable is not visible from the referencing node's scope.
    #[error("variable {variable} is not in scope for node {node}")]
    VariableOutOfScope { variable: VariableId, node: NodeId },
}

/// Handle to an activity node, typed by its activity.
pub struct ActivityHandle<A: Activity> {
    id: NodeId,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Activity> ActivityHandle<A> {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Identifier of the underlying node.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<A: Activity> Clone for ActivityHandle<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Activity> Copy for ActivityHandle<A> {}

impl<A: Activity> fmt::Debug for ActivityHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActivityHandle").field(&self.id).finish()
    }
}

/// Handle to a condition node.
#[derive(Debug, Clone, Copy)]
pub struct ConditionHandle {
    id: NodeId,
}

impl ConditionHandle {
    /// Identifier of the underlying node.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

/// Handle to a switch node, typed by its key.
pub struct SwitchHandle<K> {
    id: NodeId,
    _marker: PhantomData<fn() -> K>,
}

impl<K> SwitchHandle<K> {
    /// Identifier of the underlying node.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<K> Clone for SwitchHandle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for SwitchHandle<K> {}

/// Handle to a fork-join node.
#[derive(Debug, Clone, Copy)]
pub struct ForkJoinHandle {
    id: NodeId,
}

impl ForkJoinHandle {
    /// Identifier of the underlying node.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

/// Handle to a block node.
#[derive(Debug, Clone, Copy)]
pub struct BlockHandle {
    id: NodeId,
}

impl BlockHandle {
    /// Identifier of the underlying node.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

/// Untyped reference to any node, used as an edge target.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef {
    id: NodeId,
}

impl NodeRef {
    /// Identifier of the referenced node.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<A: Activity> From<&ActivityHandle<A>> for NodeRef {
    fn from(handle: &ActivityHandle<A>) -> Self {
        NodeRef { id: handle.id }
    }
}

impl From<&ConditionHandle> for NodeRef {
    fn from(handle: &ConditionHandle) -> Self {
        NodeRef { id: handle.id }
    }
}

impl<K> From<&SwitchHandle<K>> for NodeRef {
    fn from(handle: &SwitchHandle<K>) -> Self {
        NodeRef { id: handle.id }
    }
}

impl From<&ForkJoinHandle> for NodeRef {
    fn from(handle: &ForkJoinHandle) -> Self {
        NodeRef { id: handle.id }
    }
}

impl From<&BlockHandle> for NodeRef {
    fn from(handle: &BlockHandle) -> Self {
        NodeRef { id: handle.id }
    }
}

/// Node handles that carry a `next` edge.
pub trait SequencedNode {
    /// Identifier of the underlying node.
    fn node_id(&self) -> NodeId;
}

impl<A: Activity> SequencedNode for ActivityHandle<A> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl SequencedNode for ForkJoinHandle {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl SequencedNode for BlockHandle {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

/// Node handles that carry `fault` and `cancel` edges.
pub trait GuardedNode: SequencedNode {}

impl<A: Activity> GuardedNode for ActivityHandle<A> {}

impl GuardedNode for ForkJoinHandle {}

/// Fluent, write-only construction surface for a flow.
///
/// Handles returned by the builder are the only way to wire edges and
/// bindings; reading the constructed flow requires successful validation.
pub struct FlowBuilder {
    name: String,
    nodes: Vec<Node>,
    variables: Vec<VariableDecl>,
    scopes: Vec<ScopeInfo>,
    current_scope: ScopeId,
    initial: Option<NodeId>,
    default_fault_handler: Option<NodeId>,
    default_cancellation_handler: Option<NodeId>,
}

impl FlowBuilder {
    /// Create a builder for a flow with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            variables: Vec::new(),
            scopes: vec![ScopeInfo {
                parent: None,
                name: None,
                variables: Vec::new(),
            }],
            current_scope: ScopeId::ROOT,
            initial: None,
            default_fault_handler: None,
            default_cancellation_handler: None,
        }
    }

    fn push_node(&mut self, name: &str, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            name: Some(name.to_string()),
            scope: self.current_scope,
            kind,
        });
        id
    }

    fn activity_node_mut(&mut self, id: NodeId) -> &mut ActivityNode {
        match &mut self.nodes[id.index()].kind {
            NodeKind::Activity(activity) | NodeKind::FaultHandler(activity) => activity,
            _ => panic!("handle {id} does not reference an activity node"),
        }
    }

    fn scope_within(&self, scope: ScopeId, ancestor: ScopeId) -> bool {
        let mut cursor = Some(scope);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.scopes[current.index()].parent;
        }
        false
    }

    fn check_variable_in_scope(&self, variable: VariableId, node: NodeId) -> Result<(), BuildError> {
        let declared = self.variables[variable.index()].scope;
        let referencing = self.nodes[node.index()].scope;
        if self.scope_within(referencing, declared) {
            Ok(())
        } else {
            Err(BuildError::VariableOutOfScope { variable, node })
        }
    }

    /// Add an activity node of type `A`.
    pub fn activity<A: Activity>(&mut self, name: &str) -> ActivityHandle<A> {
        let plan = ActivityPlan::of::<A>();
        let id = self.push_node(name, NodeKind::Activity(ActivityNode::new(plan)));
        ActivityHandle::new(id)
    }

    /// Add a fault-handler node of type `H`.
    ///
    /// The capability of `H` is recorded on the plan and checked by the
    /// validator wherever the node is wired as a handler.
    pub fn fault_handler<H: Activity>(&mut self, name: &str) -> ActivityHandle<H> {
        let plan = ActivityPlan::of::<H>();
        let id = self.push_node(name, NodeKind::FaultHandler(ActivityNode::new(plan)));
        ActivityHandle::new(id)
    }

    /// Add a condition node with a nullary boolean predicate.
    pub fn condition<P>(&mut self, name: &str, predicate: P) -> ConditionHandle
    where
        P: Fn(&EvalScope<'_>) -> Result<bool, FaultError> + Send + Sync + 'static,
    {
        let id = self.push_node(
            name,
            NodeKind::Condition(ConditionNode {
                predicate: Arc::new(predicate),
                on_true: None,
                on_false: None,
            }),
        );
        ConditionHandle { id }
    }

    /// Add a switch node keyed by `K`.
    pub fn switch<K, C>(&mut self, name: &str, chooser: C) -> SwitchHandle<K>
    where
        K: PartialEq + fmt::Display + Send + Sync + 'static,
        C: Fn(&EvalScope<'_>) -> Result<K, FaultError> + Send + Sync + 'static,
    {
        let table = TypedCaseTable::<K>::new(Arc::new(chooser));
        let id = self.push_node(
            name,
            NodeKind::Switch(SwitchNode {
                table: Box::new(table),
                default: None,
                partial_allowed: false,
            }),
        );
        SwitchHandle {
            id,
            _marker: PhantomData,
        }
    }

    /// Add a fork-join node with no branches yet.
    pub fn fork_join(&mut self, name: &str) -> ForkJoinHandle {
        let id = self.push_node(
            name,
            NodeKind::ForkJoin(ForkJoinNode {
                branches: Vec::new(),
                next: None,
                fault: None,
                cancel: None,
            }),
        );
        ForkJoinHandle { id }
    }

    /// Append a parallel branch to a fork-join; branches run in fork order.
    pub fn fork<A: Activity>(&mut self, fork_join: &ForkJoinHandle, name: &str) -> ActivityHandle<A> {
        let entry = self.activity::<A>(name);
        match &mut self.nodes[fork_join.id.index()].kind {
            NodeKind::ForkJoin(node) => node.branches.push(ForkBranch {
                entry: entry.id,
                name: Some(name.to_string()),
            }),
            _ => panic!("handle {} does not reference a fork-join node", fork_join.id),
        }
        entry
    }

    /// Add a block: a named sub-scope built by `body`, which returns the
    /// block's initial child.
    pub fn block<F>(&mut self, name: &str, body: F) -> Result<BlockHandle, BuildError>
    where
        F: FnOnce(&mut FlowBuilder) -> Result<NodeRef, BuildError>,
    {
        let body_scope = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeInfo {
            parent: Some(self.current_scope),
            name: Some(name.to_string()),
            variables: Vec::new(),
        });
        let id = self.push_node(
            name,
            NodeKind::Block(BlockNode {
                initial: None,
                next: None,
                body_scope,
            }),
        );

        let saved = self.current_scope;
        self.current_scope = body_scope;
        let built = body(self);
        self.current_scope = saved;
        let initial = built?;

        match &mut self.nodes[id.index()].kind {
            NodeKind::Block(block) => block.initial = Some(initial.id()),
            _ => unreachable!("block node was just created"),
        }
        Ok(BlockHandle { id })
    }

    /// Declare an uninitialized variable in the current scope.
    pub fn variable<T: Send + Sync + 'static>(&mut self, name: &str) -> Var<T> {
        self.declare_variable::<T>(name, None)
    }

    /// Declare a variable in the current scope with an initial value
    /// replayed at scope entry.
    pub fn variable_with_initial<T: Send + Sync + 'static>(&mut self, name: &str, initial: T) -> Var<T> {
        self.declare_variable::<T>(name, Some(Arc::new(initial) as SharedValue))
    }

    fn declare_variable<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        initial: Option<SharedValue>,
    ) -> Var<T> {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(VariableDecl {
            id,
            name: Some(name.to_string()),
            scope: self.current_scope,
            initial,
            type_name: std::any::type_name::<T>(),
        });
        self.scopes[self.current_scope.index()].variables.push(id);
        Var::new(id)
    }

    /// Declare the flow's initial node.
    pub fn with_initial_node(&mut self, node: impl Into<NodeRef>) -> Result<(), BuildError> {
        if self.initial.is_some() {
            return Err(BuildError::InitialAlreadySet);
        }
        self.initial = Some(node.into().id());
        Ok(())
    }

    /// Declare the flow-wide default fault handler.
    pub fn with_default_fault_handler<H: Activity>(
        &mut self,
        handler: &ActivityHandle<H>,
    ) -> Result<(), BuildError> {
        if self.default_fault_handler.is_some() {
            return Err(BuildError::DefaultFaultHandlerAlreadySet);
        }
        self.default_fault_handler = Some(handler.id);
        Ok(())
    }

    /// Declare the flow-wide default cancellation handler.
    pub fn with_default_cancellation_handler<H: Activity>(
        &mut self,
        handler: &ActivityHandle<H>,
    ) -> Result<(), BuildError> {
        if self.default_cancellation_handler.is_some() {
            return Err(BuildError::DefaultCancellationHandlerAlreadySet);
        }
        self.default_cancellation_handler = Some(handler.id);
        Ok(())
    }

    /// Connect the success edge of `from` to `to`.
    pub fn connect_to(
        &mut self,
        from: &impl SequencedNode,
        to: impl Into<NodeRef>,
    ) -> Result<(), BuildError> {
        let id = from.node_id();
        let target = to.into().id();
        let slot = match &mut self.nodes[id.index()].kind {
            NodeKind::Activity(activity) | NodeKind::FaultHandler(activity) => &mut activity.next,
            NodeKind::ForkJoin(fork_join) => &mut fork_join.next,
            NodeKind::Block(block) => &mut block.next,
            _ => unreachable!("sequenced handles reference sequenced nodes"),
        };
        if slot.is_some() {
            return Err(BuildError::EdgeAlreadySet { node: id, edge: "next" });
        }
        *slot = Some(target);
        Ok(())
    }

    /// Connect the fault edge of `from` to a handler node.
    pub fn connect_fault_to<H: Activity>(
        &mut self,
        from: &impl GuardedNode,
        handler: &ActivityHandle<H>,
    ) -> Result<(), BuildError> {
        self.set_guard_edge(from.node_id(), handler.id, "fault")
    }

    /// Connect the cancellation edge of `from` to a handler node.
    pub fn connect_cancellation_to<H: Activity>(
        &mut self,
        from: &impl GuardedNode,
        handler: &ActivityHandle<H>,
    ) -> Result<(), BuildError> {
        self.set_guard_edge(from.node_id(), handler.id, "cancel")
    }

    fn set_guard_edge(
        &mut self,
        id: NodeId,
        target: NodeId,
        edge: &'static str,
    ) -> Result<(), BuildError> {
        let slot = match (&mut self.nodes[id.index()].kind, edge) {
            (NodeKind::Activity(activity) | NodeKind::FaultHandler(activity), "fault") => {
                &mut activity.fault
            }
            (NodeKind::Activity(activity) | NodeKind::FaultHandler(activity), _) => {
                &mut activity.cancel
            }
            (NodeKind::ForkJoin(fork_join), "fault") => &mut fork_join.fault,
            (NodeKind::ForkJoin(fork_join), _) => &mut fork_join.cancel,
            _ => unreachable!("guarded handles reference guarded nodes"),
        };
        if slot.is_some() {
            return Err(BuildError::EdgeAlreadySet { node: id, edge });
        }
        *slot = Some(target);
        Ok(())
    }

    /// Connect the true branch of a condition.
    pub fn connect_true_to(
        &mut self,
        condition: &ConditionHandle,
        to: impl Into<NodeRef>,
    ) -> Result<(), BuildError> {
        let target = to.into().id();
        match &mut self.nodes[condition.id.index()].kind {
            NodeKind::Condition(node) => {
                if node.on_true.is_some() {
                    return Err(BuildError::EdgeAlreadySet {
                        node: condition.id,
                        edge: "true",
                    });
                }
                node.on_true = Some(target);
                Ok(())
            }
            _ => unreachable!("condition handles reference condition nodes"),
        }
    }

    /// Connect the false branch of a condition.
    pub fn connect_false_to(
        &mut self,
        condition: &ConditionHandle,
        to: impl Into<NodeRef>,
    ) -> Result<(), BuildError> {
        let target = to.into().id();
        match &mut self.nodes[condition.id.index()].kind {
            NodeKind::Condition(node) => {
                if node.on_false.is_some() {
                    return Err(BuildError::EdgeAlreadySet {
                        node: condition.id,
                        edge: "false",
                    });
                }
                node.on_false = Some(target);
                Ok(())
            }
            _ => unreachable!("condition handles reference condition nodes"),
        }
    }

    /// Begin mapping a switch case; finish with [`CaseBuilder::to`].
    pub fn connect_case<'b, K>(&'b mut self, switch: &SwitchHandle<K>, key: K) -> CaseBuilder<'b, K>
    where
        K: PartialEq + fmt::Display + Send + Sync + 'static,
    {
        CaseBuilder {
            builder: self,
            switch: switch.id,
            key,
        }
    }

    /// Connect the default branch of a switch.
    pub fn connect_default<K>(
        &mut self,
        switch: &SwitchHandle<K>,
        to: impl Into<NodeRef>,
    ) -> Result<(), BuildError> {
        let target = to.into().id();
        match &mut self.nodes[switch.id.index()].kind {
            NodeKind::Switch(node) => {
                if node.default.is_some() {
                    return Err(BuildError::EdgeAlreadySet {
                        node: switch.id,
                        edge: "default",
                    });
                }
                node.default = Some(target);
                Ok(())
            }
            _ => unreachable!("switch handles reference switch nodes"),
        }
    }

    /// Explicitly accept partial key coverage on a switch without a default.
    pub fn allow_partial_cases<K>(&mut self, switch: &SwitchHandle<K>) {
        match &mut self.nodes[switch.id.index()].kind {
            NodeKind::Switch(node) => node.partial_allowed = true,
            _ => unreachable!("switch handles reference switch nodes"),
        }
    }

    /// Mint a typed result accessor for use in predicates and choosers.
    pub fn result_of<A: Activity>(&self, activity: &ActivityHandle<A>) -> ResultOf<A::Output> {
        ResultOf::new(activity.id)
    }

    /// Begin binding the named input property of an activity; finish with
    /// one of the [`BindingBuilder`] modes.
    ///
    /// The property name is checked against the activity type's declared
    /// inputs immediately.
    pub fn bind<'b, A: Activity>(
        &'b mut self,
        activity: &ActivityHandle<A>,
        property: &'static str,
    ) -> Result<BindingBuilder<'b>, BuildError> {
        let plan = self.activity_node_mut(activity.id).plan;
        if plan.input(property).is_none() {
            return Err(BuildError::UnknownProperty {
                activity: plan.type_name(),
                property,
            });
        }
        Ok(BindingBuilder {
            builder: self,
            node: activity.id,
            property,
        })
    }

    /// Begin scheduling post-completion variable updates for an activity.
    pub fn after_completion_of<'b, A: Activity>(
        &'b mut self,
        activity: &ActivityHandle<A>,
    ) -> UpdateBuilder<'b, A> {
        UpdateBuilder {
            builder: self,
            activity: activity.id,
            _marker: PhantomData,
        }
    }

    /// Bind a variable to an activity's result: sugar for
    /// `after_completion_of(activity).assign_result(variable)`.
    pub fn bind_to_result_of<A: Activity>(
        &mut self,
        variable: &Var<A::Output>,
        activity: &ActivityHandle<A>,
    ) -> Result<(), BuildError> {
        self.after_completion_of(activity).assign_result(variable)
    }

    /// Finalise and return the immutable flow definition.
    pub fn build(self) -> FlowDefinition {
        FlowDefinition {
            name: self.name,
            initial: self.initial,
            nodes: self.nodes,
            variables: self.variables,
            scopes: self.scopes,
            default_fault_handler: self.default_fault_handler,
            default_cancellation_handler: self.default_cancellation_handler,
        }
    }
}

/// Pending switch case mapping; complete it with [`CaseBuilder::to`].
pub struct CaseBuilder<'b, K> {
    builder: &'b mut FlowBuilder,
    switch: NodeId,
    key: K,
}

impl<K> CaseBuilder<'_, K>
where
    K: PartialEq + fmt::Display + Send + Sync + 'static,
{
    /// Map the case key to a successor node.
    pub fn to(self, target: impl Into<NodeRef>) -> Result<(), BuildError> {
        let target = target.into().id();
        let switch = self.switch;
        let table = match &mut self.builder.nodes[switch.index()].kind {
            NodeKind::Switch(node) => node.table.as_any_mut(),
            _ => unreachable!("switch handles reference switch nodes"),
        };
        let typed = table
            .downcast_mut::<TypedCaseTable<K>>()
            .expect("case table key type matches its switch handle");
        if typed.cases.iter().any(|(existing, _)| *existing == self.key) {
            return Err(BuildError::DuplicateCase {
                node: switch,
                key: self.key.to_string(),
            });
        }
        typed.cases.push((self.key, target));
        Ok(())
    }
}

/// Pending binding for one input property.
pub struct BindingBuilder<'b> {
    builder: &'b mut FlowBuilder,
    node: NodeId,
    property: &'static str,
}

impl std::fmt::Debug for BindingBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingBuilder")
            .field("node", &self.node)
            .field("property", &self.property)
            .finish()
    }
}

impl BindingBuilder<'_> {
    fn push(self, source: BindingSource) {
        let property = self.property;
        self.builder
            .activity_node_mut(self.node)
            .bindings
            .push(Binding { property, source });
    }

    /// Bind to an eagerly-known value.
    pub fn to_constant<T: Send + Sync + 'static>(self, value: T) -> Result<(), BuildError> {
        self.push(BindingSource::Constant {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        });
        Ok(())
    }

    /// Bind to the result of another activity.
    pub fn to_result_of<B: Activity>(self, source: &ActivityHandle<B>) -> Result<(), BuildError> {
        self.push(BindingSource::ResultOf(source.id()));
        Ok(())
    }

    /// Bind to a late-bound expression.
    ///
    /// `build` receives a dependency recorder and returns the evaluation
    /// closure; every accessor minted through the recorder becomes part of
    /// the binding's declared read set. Variable reads are scope-checked
    /// immediately.
    pub fn to_expression<F, E, T>(self, build: F) -> Result<(), BuildError>
    where
        F: FnOnce(&mut Deps) -> E,
        E: Fn(&EvalScope<'_>) -> Result<T, FaultError> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let mut deps = Deps::new();
        let eval = build(&mut deps);
        for dependency in &deps.reads {
            if let Dependency::Variable(variable) = dependency {
                self.builder.check_variable_in_scope(*variable, self.node)?;
            }
        }
        self.push(BindingSource::Expression {
            reads: deps.reads,
            eval: Arc::new(move |scope: &EvalScope<'_>| eval(scope).map(InputValue::new)),
        });
        Ok(())
    }
}

/// Pending post-completion variable updates for one trigger activity.
///
/// Updates run in the order they are scheduled here.
pub struct UpdateBuilder<'b, A: Activity> {
    builder: &'b mut FlowBuilder,
    activity: NodeId,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Activity> UpdateBuilder<'_, A> {
    fn push(&mut self, variable: VariableId, op: UpdateOp) -> Result<(), BuildError> {
        self.builder.check_variable_in_scope(variable, self.activity)?;
        self.builder
            .activity_node_mut(self.activity)
            .updates
            .push(VariableUpdate { variable, op });
        Ok(())
    }

    /// Assign a value fixed at build time.
    pub fn assign<T: Send + Sync + 'static>(
        mut self,
        variable: &Var<T>,
        value: T,
    ) -> Result<(), BuildError> {
        self.push(variable.id(), UpdateOp::Assign(Arc::new(value)))
    }

    /// Assign the trigger activity's result.
    pub fn assign_result(mut self, variable: &Var<A::Output>) -> Result<(), BuildError> {
        let trigger = self.activity;
        self.push(variable.id(), UpdateOp::AssignResult(trigger))
    }

    /// Transform the variable's current value in place.
    pub fn update<T, F>(mut self, variable: &Var<T>, transform: F) -> Result<(), BuildError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let id = variable.id();
        self.push(
            id,
            UpdateOp::Update(Arc::new(move |current: SharedValue| {
                let mut value = current.downcast_ref::<T>().cloned().ok_or_else(|| {
                    FaultError::engine(
                        FaultKind::InputType,
                        format!(
                            "variable {id} does not hold a `{}`",
                            std::any::type_name::<T>()
                        ),
                    )
                })?;
                transform(&mut value);
                Ok(Arc::new(value) as SharedValue)
            })),
        )
    }
}
