//! Flow model, typed handles, and build-time API for Weft.
//!
//! A flow is a directed graph of nodes (activities, conditions, switches,
//! fork-joins, blocks, fault handlers) wired through the write-only
//! [`FlowBuilder`]. Data moves through typed bindings, write-once result
//! cells, and scoped variables. The definition built here is inert until it
//! passes validation (`weft-plan`) and is driven by the runtime
//! (`weft-exec`).

mod activity;
mod binding;
mod builder;
mod diagnostics;
mod fault;
mod flow;
mod node;
mod state;
mod value;
mod variable;

pub use activity::{Activity, ActivityContext, Erased, ErasedActivity, InputSpec};
pub use binding::{Binding, BindingSource, Dependency, Deps};
pub use builder::{
    ActivityHandle, BindingBuilder, BlockHandle, BuildError, CaseBuilder, ConditionHandle,
    FlowBuilder, ForkJoinHandle, GuardedNode, NodeRef, SequencedNode, SwitchHandle, UpdateBuilder,
};
pub use diagnostics::{
    CodeInfo, DIAGNOSTIC_CODES, Diagnostic, DiagnosticCode, Severity, ValidationReport, code_info,
};
pub use fault::{ActivityResult, FaultError, FaultKind};
pub use flow::{FlowDefinition, ScopeId, ScopeInfo};
pub use node::{
    ActivityNode, ActivityPlan, BlockNode, CaseTable, ConditionNode, EdgeLabel, ForkBranch,
    ForkJoinNode, Node, NodeId, NodeKind, SwitchNode,
};
pub use state::{EvalScope, ResultOf, RunState};
pub use value::{InputValue, SharedValue};
pub use variable::{UpdateOp, Var, VariableDecl, VariableId, VariableUpdate};

/// Convenient prelude re-exporting the most commonly used items.
pub mod prelude {
    pub use crate::activity::{Activity, ActivityContext, InputSpec};
    pub use crate::builder::{ActivityHandle, BuildError, FlowBuilder};
    pub use crate::fault::{ActivityResult, FaultError, FaultKind};
    pub use crate::flow::FlowDefinition;
    pub use crate::node::{EdgeLabel, NodeId, NodeKind};
    pub use crate::state::{EvalScope, ResultOf};
    pub use crate::value::InputValue;
    pub use crate::variable::Var;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use futures::executor::block_on;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[derive(Default)]
    struct Sum {
        first_number: i64,
        second_number: i64,
    }

    #[async_trait]
    impl Activity for Sum {
        type Output = i64;

        crate::activity_inputs! {
            required "first_number" => first_number: i64;
            required "second_number" => second_number: i64;
        }

        async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, FaultError> {
            Ok(self.first_number + self.second_number)
        }
    }

    #[derive(Default)]
    struct ReadNumber;

    #[async_trait]
    impl Activity for ReadNumber {
        type Output = i64;

        async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, FaultError> {
            Ok(7)
        }
    }

    #[test]
    fn declared_inputs_drive_assignment() {
        let specs = <Sum as Activity>::inputs();
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|spec| spec.required));

        let mut sum = Sum::default();
        sum.assign_input("first_number", InputValue::new(7i64)).unwrap();
        sum.assign_input("second_number", InputValue::new(5i64)).unwrap();
        let ctx = ActivityContext::new(CancellationToken::new());
        let total = block_on(sum.execute(&ctx)).unwrap();
        assert_eq!(total, 12);

        let err = Sum::default()
            .assign_input("third_number", InputValue::new(1i64))
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Binding);
    }

    #[test]
    fn input_value_rejects_type_mismatch() {
        let err = InputValue::new("seven").take::<i64>().unwrap_err();
        assert_eq!(err.kind(), FaultKind::InputType);
        assert!(err.message().contains("i64"));
    }

    #[test]
    fn builder_wires_nodes_and_edges() {
        let mut builder = FlowBuilder::new("sum_two_inputs");
        let first = builder.activity::<ReadNumber>("read_first");
        let second = builder.activity::<ReadNumber>("read_second");
        let add = builder.activity::<Sum>("add");
        builder.with_initial_node(&first).unwrap();
        builder.connect_to(&first, &second).unwrap();
        builder.connect_to(&second, &add).unwrap();
        builder.bind(&add, "first_number").unwrap().to_result_of(&first).unwrap();
        builder.bind(&add, "second_number").unwrap().to_result_of(&second).unwrap();

        let flow = builder.build();
        assert_eq!(flow.node_count(), 3);
        assert_eq!(flow.initial(), Some(first.id()));
        let add_node = flow.node(add.id()).unwrap();
        let bindings = add_node.kind().as_activity().unwrap().bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(
            add_node.successors(),
            Vec::<(EdgeLabel, NodeId)>::new(),
            "terminal activity has no outgoing edges"
        );
    }

    #[test]
    fn double_setting_an_edge_is_rejected() {
        let mut builder = FlowBuilder::new("edges");
        let a = builder.activity::<ReadNumber>("a");
        let b = builder.activity::<ReadNumber>("b");
        builder.connect_to(&a, &b).unwrap();
        let err = builder.connect_to(&a, &b).unwrap_err();
        assert_eq!(
            err,
            BuildError::EdgeAlreadySet {
                node: a.id(),
                edge: "next"
            }
        );
    }

    #[test]
    fn duplicate_switch_case_is_rejected() {
        let mut builder = FlowBuilder::new("switch");
        let out = builder.activity::<ReadNumber>("out");
        let other = builder.activity::<ReadNumber>("other");
        let switch =
            builder.switch::<&'static str, _>("route", |_scope: &EvalScope<'_>| Ok("left"));
        builder.connect_case(&switch, "left").to(&out).unwrap();
        let err = builder.connect_case(&switch, "left").to(&other).unwrap_err();
        assert_eq!(
            err,
            BuildError::DuplicateCase {
                node: switch.id(),
                key: "left".to_string()
            }
        );
    }

    #[test]
    fn binding_an_undeclared_property_is_rejected() {
        let mut builder = FlowBuilder::new("bad_binding");
        let add = builder.activity::<Sum>("add");
        let err = builder.bind(&add, "third_number").unwrap_err();
        assert!(matches!(err, BuildError::UnknownProperty { property: "third_number", .. }));
    }

    #[test]
    fn expression_bindings_record_their_read_set() {
        let mut builder = FlowBuilder::new("expr");
        let first = builder.activity::<ReadNumber>("first");
        let add = builder.activity::<Sum>("add");
        let offset = builder.variable_with_initial::<i64>("offset", 3);
        builder
            .bind(&add, "first_number")
            .unwrap()
            .to_expression(|deps| {
                let first = deps.result_of(&first);
                let offset = deps.variable(&offset);
                move |scope: &EvalScope<'_>| Ok(first.get(scope)? + offset.get(scope)?)
            })
            .unwrap();

        let flow = builder.build();
        let binding = &flow
            .node(add.id())
            .unwrap()
            .kind()
            .as_activity()
            .unwrap()
            .bindings()[0];
        assert_eq!(binding.source().result_reads(), vec![first.id()]);
        assert_eq!(binding.source().variable_reads(), vec![offset.id()]);
    }

    #[test]
    fn block_local_variables_are_invisible_outside_their_block() {
        let mut builder = FlowBuilder::new("scopes");
        let outside = builder.activity::<ReadNumber>("outside");
        let mut local = None;
        builder
            .block("inner", |b| {
                local = Some(b.variable::<i64>("local"));
                let inner = b.activity::<ReadNumber>("inner_read");
                Ok(NodeRef::from(&inner))
            })
            .unwrap();
        let local = local.unwrap();
        let err = builder
            .after_completion_of(&outside)
            .assign(&local, 1)
            .unwrap_err();
        assert!(matches!(err, BuildError::VariableOutOfScope { .. }));
    }

    #[test]
    fn result_cells_are_write_once() {
        let mut builder = FlowBuilder::new("cells");
        let read = builder.activity::<ReadNumber>("read");
        builder.with_initial_node(&read).unwrap();
        let flow = builder.build();

        let state = RunState::for_flow(&flow);
        state
            .publish_result(read.id(), Arc::new(7i64) as SharedValue)
            .unwrap();
        let second = state.publish_result(read.id(), Arc::new(8i64) as SharedValue);
        assert!(second.is_err(), "second write must be refused");

        let scope = EvalScope::new(&state);
        let accessor: ResultOf<i64> = ResultOf::new(read.id());
        assert_eq!(accessor.get(&scope).unwrap(), 7);
    }

    #[test]
    fn pending_results_read_as_not_ready() {
        let mut builder = FlowBuilder::new("pending");
        let read = builder.activity::<ReadNumber>("read");
        let flow = builder.build();
        let state = RunState::for_flow(&flow);
        let scope = EvalScope::new(&state);
        let accessor: ResultOf<i64> = ResultOf::new(read.id());
        let err = accessor.get(&scope).unwrap_err();
        assert_eq!(err.kind(), FaultKind::ResultNotReady);
    }

    #[test]
    fn every_diagnostic_code_is_registered() {
        use DiagnosticCode::*;
        for code in [
            MissingInitialNode,
            DanglingEdge,
            UnreachableNode,
            MissingFaultHandler,
            MissingCancellationHandler,
            InvalidFaultHandlerType,
            MissingRequiredInput,
            DuplicateBinding,
            ResultReadBeforeProducer,
            NonDefaultedPartialSwitch,
            ForkJoinEmpty,
            ForkJoinCycle,
            VariableOutOfScope,
            ParallelVariableWriteConflict,
        ] {
            let info = code_info(code);
            assert_eq!(info.code, code);
            assert!(!info.summary.is_empty());
        }
        assert_eq!(DIAGNOSTIC_CODES.len(), 14);
    }
}
