//! Pre-execution validation for Weft flow definitions.
//!
//! `check` runs a sequence of graph-level passes over a definition and
//! returns every finding as data; `validate` gates execution and export
//! behind a clean report. Diagnostics never abort the pipeline: each pass
//! appends to the shared report so authors see all problems at once.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use weft_core::{
    ActivityNode, CaseTable, Diagnostic, DiagnosticCode, FlowDefinition, Node, NodeId, NodeKind,
    ScopeId, ValidationReport, VariableId,
};

/// A definition that passed validation and may be executed or exported.
///
/// Warnings observed during validation ride along; errors never do.
#[derive(Clone, Debug)]
pub struct ValidatedFlow {
    flow: Arc<FlowDefinition>,
    warnings: Vec<Diagnostic>,
}

impl ValidatedFlow {
    /// Access the underlying definition.
    pub fn flow(&self) -> &FlowDefinition {
        &self.flow
    }

    /// Clone the shared definition handle.
    pub fn shared(&self) -> Arc<FlowDefinition> {
        Arc::clone(&self.flow)
    }

    /// Warnings that did not refuse validation.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }
}

/// Run every validation pass and return the full report.
///
/// Pure over the definition: checking an unmodified flow twice yields the
/// same diagnostics.
pub fn check(flow: &FlowDefinition) -> ValidationReport {
    let mut report = ValidationReport::new();

    check_references(flow, &mut report);
    let reachable = check_reachability(flow, &mut report);
    check_handler_coverage(flow, &reachable, &mut report);
    check_handler_types(flow, &reachable, &mut report);
    check_required_inputs(flow, &reachable, &mut report);
    check_binding_liveness(flow, &reachable, &mut report);
    check_switch_coverage(flow, &reachable, &mut report);
    check_fork_joins(flow, &reachable, &mut report);
    check_variables(flow, &reachable, &mut report);

    report
}

/// Validate a definition, returning the wrapper required for execution and
/// export, or the report when any error is present.
pub fn validate(flow: &Arc<FlowDefinition>) -> Result<ValidatedFlow, ValidationReport> {
    let report = check(flow);
    if report.has_errors() {
        Err(report)
    } else {
        Ok(ValidatedFlow {
            flow: Arc::clone(flow),
            warnings: report.warnings,
        })
    }
}

fn node_exists(flow: &FlowDefinition, id: NodeId) -> bool {
    flow.node(id).is_some()
}

fn check_references(flow: &FlowDefinition, report: &mut ValidationReport) {
    for node in flow.nodes() {
        for (label, target) in node.successors() {
            if !node_exists(flow, target) {
                report.push(
                    Diagnostic::new(
                        DiagnosticCode::DanglingEdge,
                        format!(
                            "edge `{label}` of node {} targets {target}, which is not in the store",
                            flow.node_label(node.id())
                        ),
                    )
                    .with_node(node.id()),
                );
            }
        }
        if let Some(activity) = node.kind().as_activity() {
            for binding in activity.bindings() {
                for producer in binding.source().result_reads() {
                    if !node_exists(flow, producer) {
                        report.push(
                            Diagnostic::new(
                                DiagnosticCode::DanglingEdge,
                                format!(
                                    "binding of `{}` on node {} reads result of {producer}, \
                                     which is not in the store",
                                    binding.property(),
                                    flow.node_label(node.id())
                                ),
                            )
                            .with_node(node.id()),
                        );
                    }
                }
            }
        }
    }

    for (label, target) in [
        ("initial", flow.initial()),
        ("default fault handler", flow.default_fault_handler()),
        (
            "default cancellation handler",
            flow.default_cancellation_handler(),
        ),
    ] {
        if let Some(target) = target
            && !node_exists(flow, target)
        {
            report.push(Diagnostic::new(
                DiagnosticCode::DanglingEdge,
                format!("{label} targets {target}, which is not in the store"),
            ));
        }
    }
}

fn check_reachability(flow: &FlowDefinition, report: &mut ValidationReport) -> HashSet<NodeId> {
    let Some(initial) = flow.initial() else {
        report.push(Diagnostic::new(
            DiagnosticCode::MissingInitialNode,
            format!("flow `{}` does not declare an initial node", flow.name()),
        ));
        // Without an entry point every node would be flagged unreachable;
        // later passes still run over the full store.
        return flow.nodes().map(Node::id).collect();
    };

    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();
    if node_exists(flow, initial) {
        reachable.insert(initial);
        queue.push_back(initial);
    }
    // Default handlers are entered by dispatch rather than by an edge.
    for handler in [flow.default_fault_handler(), flow.default_cancellation_handler()]
        .into_iter()
        .flatten()
    {
        if node_exists(flow, handler) && reachable.insert(handler) {
            queue.push_back(handler);
        }
    }
    while let Some(id) = queue.pop_front() {
        let Some(node) = flow.node(id) else { continue };
        for (_, target) in node.successors() {
            if node_exists(flow, target) && reachable.insert(target) {
                queue.push_back(target);
            }
        }
    }

    for node in flow.nodes() {
        if !reachable.contains(&node.id()) {
            report.push(
                Diagnostic::new(
                    DiagnosticCode::UnreachableNode,
                    format!(
                        "node {} cannot be reached from the initial node",
                        flow.node_label(node.id())
                    ),
                )
                .with_node(node.id()),
            );
        }
    }
    reachable
}

fn check_handler_coverage(
    flow: &FlowDefinition,
    reachable: &HashSet<NodeId>,
    report: &mut ValidationReport,
) {
    for node in flow.nodes() {
        if !reachable.contains(&node.id()) {
            continue;
        }
        let (own_fault, own_cancel) = match node.kind() {
            NodeKind::Activity(activity) => (activity.fault(), activity.cancel()),
            NodeKind::ForkJoin(fork_join) => (fork_join.fault(), fork_join.cancel()),
            // Faults inside a handler terminate the run; handlers need no
            // coverage of their own.
            _ => continue,
        };
        if own_fault.or(flow.default_fault_handler()).is_none() {
            report.push(
                Diagnostic::new(
                    DiagnosticCode::MissingFaultHandler,
                    format!(
                        "node {} has no fault successor and the flow declares no default \
                         fault handler",
                        flow.node_label(node.id())
                    ),
                )
                .with_node(node.id()),
            );
        }
        if own_cancel.or(flow.default_cancellation_handler()).is_none() {
            report.push(
                Diagnostic::new(
                    DiagnosticCode::MissingCancellationHandler,
                    format!(
                        "node {} has no cancellation successor and the flow declares no \
                         default cancellation handler",
                        flow.node_label(node.id())
                    ),
                )
                .with_node(node.id()),
            );
        }
    }
}

fn check_handler_types(
    flow: &FlowDefinition,
    reachable: &HashSet<NodeId>,
    report: &mut ValidationReport,
) {
    let mut check_fault_target = |target: NodeId, role: String| {
        let Some(node) = flow.node(target) else {
            return;
        };
        let capable = node
            .kind()
            .as_activity()
            .map(|activity| activity.plan().handles_faults())
            .unwrap_or(false);
        if !capable {
            report.push(
                Diagnostic::new(
                    DiagnosticCode::InvalidFaultHandlerType,
                    format!(
                        "{role} targets node {}, whose type does not accept a routed fault",
                        flow.node_label(target)
                    ),
                )
                .with_node(target),
            );
        }
    };

    for node in flow.nodes() {
        if !reachable.contains(&node.id()) {
            continue;
        }
        let fault = match node.kind() {
            NodeKind::Activity(activity) | NodeKind::FaultHandler(activity) => activity.fault(),
            NodeKind::ForkJoin(fork_join) => fork_join.fault(),
            _ => None,
        };
        if let Some(target) = fault {
            check_fault_target(
                target,
                format!("fault edge of node {}", flow.node_label(node.id())),
            );
        }
    }
    if let Some(target) = flow.default_fault_handler() {
        check_fault_target(target, "the default fault handler".to_string());
    }
}

fn check_required_inputs(
    flow: &FlowDefinition,
    reachable: &HashSet<NodeId>,
    report: &mut ValidationReport,
) {
    for node in flow.nodes() {
        if !reachable.contains(&node.id()) {
            continue;
        }
        let Some(activity) = node.kind().as_activity() else {
            continue;
        };
        let mut bound: BTreeMap<&str, usize> = BTreeMap::new();
        for binding in activity.bindings() {
            *bound.entry(binding.property()).or_default() += 1;
        }
        for spec in activity.plan().inputs() {
            match bound.get(spec.name).copied().unwrap_or(0) {
                0 if spec.required => report.push(
                    Diagnostic::new(
                        DiagnosticCode::MissingRequiredInput,
                        format!(
                            "required input `{}` of node {} ({}) has no binding",
                            spec.name,
                            flow.node_label(node.id()),
                            activity.plan().type_name()
                        ),
                    )
                    .with_node(node.id()),
                ),
                count if count > 1 => report.push(
                    Diagnostic::new(
                        DiagnosticCode::DuplicateBinding,
                        format!(
                            "input `{}` of node {} carries {count} bindings",
                            spec.name,
                            flow.node_label(node.id())
                        ),
                    )
                    .with_node(node.id()),
                ),
                _ => {}
            }
        }
    }
}

/// How completion knowledge propagates along one analysis edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Publish {
    /// The source node publishes nothing along this edge.
    Plain,
    /// The source activity completed successfully before the target starts.
    CompletesSelf,
    /// The fork-join's join barrier released: all branch must-complete sets
    /// become visible.
    Join,
}

/// Map from a block's body scope to the block node owning it.
fn blocks_by_scope(flow: &FlowDefinition) -> HashMap<ScopeId, NodeId> {
    let mut map = HashMap::new();
    for node in flow.nodes() {
        if let NodeKind::Block(block) = node.kind() {
            map.insert(block.body_scope(), node.id());
        }
    }
    map
}

/// Where control continues when `node` has no explicit successor: the
/// `next` of the nearest enclosing block that declares one.
fn fallthrough(
    flow: &FlowDefinition,
    blocks: &HashMap<ScopeId, NodeId>,
    node: &Node,
) -> Option<NodeId> {
    let mut scope = node.scope();
    loop {
        let block_id = *blocks.get(&scope)?;
        let block_node = flow.node(block_id)?;
        let NodeKind::Block(block) = block_node.kind() else {
            return None;
        };
        match block.next() {
            Some(next) => return Some(next),
            None => scope = block_node.scope(),
        }
    }
}

/// Control-flow edges as the executor will walk them, including block
/// fallthrough, annotated with what each edge publishes.
fn analysis_edges(
    flow: &FlowDefinition,
    blocks: &HashMap<ScopeId, NodeId>,
    node: &Node,
) -> Vec<(NodeId, Publish)> {
    let mut edges = Vec::new();
    match node.kind() {
        NodeKind::Activity(activity) | NodeKind::FaultHandler(activity) => {
            match activity.next() {
                Some(next) => edges.push((next, Publish::CompletesSelf)),
                None => {
                    if let Some(next) = fallthrough(flow, blocks, node) {
                        edges.push((next, Publish::CompletesSelf));
                    }
                }
            }
            if let Some(fault) = activity.fault() {
                edges.push((fault, Publish::Plain));
            }
            if let Some(cancel) = activity.cancel() {
                edges.push((cancel, Publish::Plain));
            }
        }
        NodeKind::Condition(condition) => {
            for branch in [condition.on_true(), condition.on_false()] {
                match branch {
                    Some(target) => edges.push((target, Publish::Plain)),
                    None => {
                        if let Some(next) = fallthrough(flow, blocks, node) {
                            edges.push((next, Publish::Plain));
                        }
                    }
                }
            }
        }
        NodeKind::Switch(switch) => {
            for (_, target) in switch.table().cases() {
                edges.push((target, Publish::Plain));
            }
            if let Some(default) = switch.default() {
                edges.push((default, Publish::Plain));
            }
        }
        NodeKind::ForkJoin(fork_join) => {
            for branch in fork_join.branches() {
                edges.push((branch.entry(), Publish::Plain));
            }
            match fork_join.next() {
                Some(next) => edges.push((next, Publish::Join)),
                None => {
                    if let Some(next) = fallthrough(flow, blocks, node) {
                        edges.push((next, Publish::Join));
                    }
                }
            }
            if let Some(fault) = fork_join.fault() {
                edges.push((fault, Publish::Plain));
            }
            if let Some(cancel) = fork_join.cancel() {
                edges.push((cancel, Publish::Plain));
            }
        }
        NodeKind::Block(block) => {
            match block.initial() {
                Some(initial) => edges.push((initial, Publish::Plain)),
                None => {
                    if let Some(next) = block.next() {
                        edges.push((next, Publish::Plain));
                    }
                }
            }
        }
    }
    edges
}

/// Forward must-complete analysis: for every node reached from `start`, the
/// set of activities guaranteed to have completed successfully on *every*
/// path before the node begins. Loops converge through intersection.
fn must_complete(
    flow: &FlowDefinition,
    blocks: &HashMap<ScopeId, NodeId>,
    fork_musts: &HashMap<NodeId, BTreeSet<NodeId>>,
    start: NodeId,
) -> HashMap<NodeId, BTreeSet<NodeId>> {
    let mut avail: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
    if !node_exists(flow, start) {
        return avail;
    }
    avail.insert(start, BTreeSet::new());
    let mut work = VecDeque::from([start]);

    while let Some(id) = work.pop_front() {
        let Some(node) = flow.node(id) else { continue };
        let in_set = avail.get(&id).cloned().unwrap_or_default();
        for (target, publish) in analysis_edges(flow, blocks, node) {
            if !node_exists(flow, target) {
                continue;
            }
            let mut out = in_set.clone();
            match publish {
                Publish::Plain => {}
                Publish::CompletesSelf => {
                    out.insert(id);
                }
                Publish::Join => {
                    if let Some(musts) = fork_musts.get(&id) {
                        out.extend(musts.iter().copied());
                    }
                }
            }
            match avail.get_mut(&target) {
                None => {
                    avail.insert(target, out);
                    work.push_back(target);
                }
                Some(existing) => {
                    let merged: BTreeSet<NodeId> =
                        existing.intersection(&out).copied().collect();
                    if merged != *existing {
                        *existing = merged;
                        work.push_back(target);
                    }
                }
            }
        }
    }
    avail
}

/// Activities guaranteed complete once the branch rooted at `entry` runs to
/// exhaustion: the intersection over every terminal of its available set.
fn branch_must_set(
    flow: &FlowDefinition,
    blocks: &HashMap<ScopeId, NodeId>,
    fork_musts: &HashMap<NodeId, BTreeSet<NodeId>>,
    entry: NodeId,
) -> BTreeSet<NodeId> {
    let avail = must_complete(flow, blocks, fork_musts, entry);
    let mut terminals = Vec::new();
    for (&id, in_set) in &avail {
        let Some(node) = flow.node(id) else { continue };
        if analysis_edges(flow, blocks, node).is_empty() {
            let mut out = in_set.clone();
            if node.kind().as_activity().is_some() {
                out.insert(id);
            }
            terminals.push(out);
        }
    }
    let mut terminals = terminals.into_iter();
    let Some(first) = terminals.next() else {
        return BTreeSet::new();
    };
    terminals.fold(first, |acc, set| acc.intersection(&set).copied().collect())
}

/// Precompute each fork-join's published must-complete set, innermost first.
fn fork_must_sets(
    flow: &FlowDefinition,
    blocks: &HashMap<ScopeId, NodeId>,
) -> HashMap<NodeId, BTreeSet<NodeId>> {
    let fork_joins: Vec<(NodeId, Vec<NodeId>)> = flow
        .nodes()
        .filter_map(|node| match node.kind() {
            NodeKind::ForkJoin(fork_join) => Some((
                node.id(),
                fork_join.branches().iter().map(|b| b.entry()).collect(),
            )),
            _ => None,
        })
        .collect();

    // Branch bodies may nest further fork-joins; a few rounds reach a fixed
    // point because unresolved inner joins only shrink the published sets.
    let mut musts: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
    for _ in 0..=fork_joins.len() {
        let mut next: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
        for (id, entries) in &fork_joins {
            let mut published = BTreeSet::new();
            for &entry in entries {
                published.extend(branch_must_set(flow, blocks, &musts, entry));
            }
            next.insert(*id, published);
        }
        if next == musts {
            break;
        }
        musts = next;
    }
    musts
}

fn check_binding_liveness(
    flow: &FlowDefinition,
    reachable: &HashSet<NodeId>,
    report: &mut ValidationReport,
) {
    let Some(initial) = flow.initial() else {
        return;
    };
    let blocks = blocks_by_scope(flow);
    let fork_musts = fork_must_sets(flow, &blocks);
    let avail = must_complete(flow, &blocks, &fork_musts, initial);

    for node in flow.nodes() {
        if !reachable.contains(&node.id()) {
            continue;
        }
        let Some(activity) = node.kind().as_activity() else {
            continue;
        };
        // Nodes never reached by the forward walk (handler-only entries)
        // resolve their bindings against the dispatching node's state, which
        // the walk cannot bound; only walked nodes are provable.
        let Some(in_set) = avail.get(&node.id()) else {
            continue;
        };
        for binding in activity.bindings() {
            for producer in binding.source().result_reads() {
                if !node_exists(flow, producer) {
                    continue;
                }
                if !in_set.contains(&producer) {
                    report.push(
                        Diagnostic::new(
                            DiagnosticCode::ResultReadBeforeProducer,
                            format!(
                                "binding of `{}` on node {} reads the result of {}, which is \
                                 not guaranteed to have completed on every path",
                                binding.property(),
                                flow.node_label(node.id()),
                                flow.node_label(producer)
                            ),
                        )
                        .with_node(node.id()),
                    );
                }
            }
        }
    }
}

fn check_switch_coverage(
    flow: &FlowDefinition,
    reachable: &HashSet<NodeId>,
    report: &mut ValidationReport,
) {
    for node in flow.nodes() {
        if !reachable.contains(&node.id()) {
            continue;
        }
        let NodeKind::Switch(switch) = node.kind() else {
            continue;
        };
        if switch.default().is_none() && !switch.partial_allowed() {
            report.push(
                Diagnostic::new(
                    DiagnosticCode::NonDefaultedPartialSwitch,
                    format!(
                        "switch {} has no default branch and partial coverage was not \
                         explicitly accepted",
                        flow.node_label(node.id())
                    ),
                )
                .with_node(node.id()),
            );
        }
    }
}

/// Nodes reachable from `entry` without crossing `stop`.
fn branch_nodes(
    flow: &FlowDefinition,
    blocks: &HashMap<ScopeId, NodeId>,
    entry: NodeId,
    stop: NodeId,
) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    if node_exists(flow, entry) && entry != stop {
        seen.insert(entry);
        queue.push_back(entry);
    }
    while let Some(id) = queue.pop_front() {
        let Some(node) = flow.node(id) else { continue };
        for (target, _) in analysis_edges(flow, blocks, node) {
            if target == stop || !node_exists(flow, target) {
                continue;
            }
            if seen.insert(target) {
                queue.push_back(target);
            }
        }
    }
    seen
}

fn check_fork_joins(
    flow: &FlowDefinition,
    reachable: &HashSet<NodeId>,
    report: &mut ValidationReport,
) {
    let blocks = blocks_by_scope(flow);
    for node in flow.nodes() {
        if !reachable.contains(&node.id()) {
            continue;
        }
        let NodeKind::ForkJoin(fork_join) = node.kind() else {
            continue;
        };
        if fork_join.branches().is_empty() {
            report.push(
                Diagnostic::new(
                    DiagnosticCode::ForkJoinEmpty,
                    format!("fork-join {} declares no branches", flow.node_label(node.id())),
                )
                .with_node(node.id()),
            );
            continue;
        }
        for (idx, branch) in fork_join.branches().iter().enumerate() {
            if re_enters(flow, &blocks, branch.entry(), node.id()) {
                report.push(
                    Diagnostic::new(
                        DiagnosticCode::ForkJoinCycle,
                        format!(
                            "branch {idx} of fork-join {} re-enters its own fork-join",
                            flow.node_label(node.id())
                        ),
                    )
                    .with_node(node.id()),
                );
            }
        }
    }
}

/// Whether the subgraph rooted at `entry` reaches `fork_join`.
fn re_enters(
    flow: &FlowDefinition,
    blocks: &HashMap<ScopeId, NodeId>,
    entry: NodeId,
    fork_join: NodeId,
) -> bool {
    if entry == fork_join {
        return true;
    }
    let mut seen = HashSet::from([entry]);
    let mut queue = VecDeque::from([entry]);
    while let Some(id) = queue.pop_front() {
        let Some(node) = flow.node(id) else { continue };
        for (target, _) in analysis_edges(flow, blocks, node) {
            if target == fork_join {
                return true;
            }
            if node_exists(flow, target) && seen.insert(target) {
                queue.push_back(target);
            }
        }
    }
    false
}

fn check_variables(
    flow: &FlowDefinition,
    reachable: &HashSet<NodeId>,
    report: &mut ValidationReport,
) {
    let blocks = blocks_by_scope(flow);

    let mut check_scope = |node: &Node, variable: VariableId, role: &str| {
        let Some(decl) = flow.variable(variable) else {
            return;
        };
        if !flow.scope_within(node.scope(), decl.scope()) {
            report.push(
                Diagnostic::new(
                    DiagnosticCode::VariableOutOfScope,
                    format!(
                        "{role} on node {} references variable `{}` outside its declaring scope",
                        flow.node_label(node.id()),
                        decl.name().unwrap_or("<unnamed>")
                    ),
                )
                .with_node(node.id()),
            );
        }
    };

    for node in flow.nodes() {
        if !reachable.contains(&node.id()) {
            continue;
        }
        let Some(activity) = node.kind().as_activity() else {
            continue;
        };
        for binding in activity.bindings() {
            for variable in binding.source().variable_reads() {
                check_scope(node, variable, "a binding expression");
            }
        }
        for update in activity.updates() {
            check_scope(node, update.variable(), "an update action");
        }
    }

    // Parallel branches must keep disjoint write sets.
    for node in flow.nodes() {
        if !reachable.contains(&node.id()) {
            continue;
        }
        let NodeKind::ForkJoin(fork_join) = node.kind() else {
            continue;
        };
        let write_sets: Vec<BTreeSet<VariableId>> = fork_join
            .branches()
            .iter()
            .map(|branch| {
                branch_nodes(flow, &blocks, branch.entry(), node.id())
                    .into_iter()
                    .filter_map(|id| flow.node(id))
                    .filter_map(|n| n.kind().as_activity().map(ActivityNode::updates))
                    .flatten()
                    .map(|update| update.variable())
                    .collect()
            })
            .collect();
        for left in 0..write_sets.len() {
            for right in (left + 1)..write_sets.len() {
                for variable in write_sets[left].intersection(&write_sets[right]) {
                    let name = flow
                        .variable(*variable)
                        .and_then(|decl| decl.name())
                        .unwrap_or("<unnamed>")
                        .to_string();
                    report.push(
                        Diagnostic::new(
                            DiagnosticCode::ParallelVariableWriteConflict,
                            format!(
                                "branches {left} and {right} of fork-join {} both write \
                                 variable `{name}`",
                                flow.node_label(node.id())
                            ),
                        )
                        .with_node(node.id()),
                    );
                }
            }
        }
    }
}
