use std::fmt;

use crate::node::{Node, NodeId};
use crate::variable::{VariableDecl, VariableId};

/// Identifier of a variable scope, an index into the flow's scope store.
///
/// Scope 0 is the flow-wide root; every block adds a child scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u32);

impl ScopeId {
    /// The flow-wide root scope.
    pub const ROOT: ScopeId = ScopeId(0);

    /// Position in the flow's scope store.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// One variable scope and the declarations it owns.
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    pub(crate) parent: Option<ScopeId>,
    pub(crate) name: Option<String>,
    pub(crate) variables: Vec<VariableId>,
}

impl ScopeInfo {
    /// Enclosing scope, `None` for the root.
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Optional display name (the owning block's name).
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Variables declared directly in this scope.
    pub fn variables(&self) -> &[VariableId] {
        &self.variables
    }
}

/// Immutable flow produced by the builder.
///
/// The definition is write-only until it passes validation; execution and
/// export consume the validated wrapper, never the raw definition.
pub struct FlowDefinition {
    pub(crate) name: String,
    pub(crate) initial: Option<NodeId>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) variables: Vec<VariableDecl>,
    pub(crate) scopes: Vec<ScopeInfo>,
    pub(crate) default_fault_handler: Option<NodeId>,
    pub(crate) default_cancellation_handler: Option<NodeId>,
}

impl FlowDefinition {
    /// Flow display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared initial node, if any.
    pub fn initial(&self) -> Option<NodeId> {
        self.initial
    }

    /// Number of nodes in the store.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Lookup a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Iterate every node in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Number of declared variables.
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Lookup a variable declaration by id.
    pub fn variable(&self, id: VariableId) -> Option<&VariableDecl> {
        self.variables.get(id.index())
    }

    /// Iterate every variable declaration.
    pub fn variables(&self) -> impl Iterator<Item = &VariableDecl> {
        self.variables.iter()
    }

    /// Lookup a scope by id.
    pub fn scope(&self, id: ScopeId) -> Option<&ScopeInfo> {
        self.scopes.get(id.index())
    }

    /// Flow-wide default fault handler.
    pub fn default_fault_handler(&self) -> Option<NodeId> {
        self.default_fault_handler
    }

    /// Flow-wide default cancellation handler.
    pub fn default_cancellation_handler(&self) -> Option<NodeId> {
        self.default_cancellation_handler
    }

    /// Whether `scope` equals `ancestor` or nests inside it.
    pub fn scope_within(&self, scope: ScopeId, ancestor: ScopeId) -> bool {
        let mut cursor = Some(scope);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.scope(current).and_then(ScopeInfo::parent);
        }
        false
    }

    /// Display label for a node: its name when present, its id otherwise.
    pub fn node_label(&self, id: NodeId) -> String {
        match self.node(id).and_then(Node::name) {
            Some(name) => format!("`{name}`"),
            None => id.to_string(),
        }
    }
}

impl fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field("nodes", &self.nodes.len())
            .field("variables", &self.variables.len())
            .field("scopes", &self.scopes.len())
            .finish()
    }
}
