//! End-to-end flow runs against the public runtime surface.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use weft_core::{
    Activity, ActivityContext, DiagnosticCode, EvalScope, FaultError, FlowBuilder, NodeRef,
};
use weft_exec::{FlowRuntime, NullSink, RunOutcome, ServiceContainer};

/// Shared line sink injected into activities through the container.
#[derive(Default, Clone)]
struct Console {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Console {
    fn write(&self, line: impl Into<String>) {
        self.lines.lock().unwrap().push(line.into());
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct ReadNumber {
    value: i64,
}

#[async_trait]
impl Activity for ReadNumber {
    type Output = i64;

    weft_core::activity_inputs! {
        required "value" => value: i64;
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, FaultError> {
        Ok(self.value)
    }
}

#[derive(Default)]
struct Sum {
    first_number: i64,
    second_number: i64,
}

#[async_trait]
impl Activity for Sum {
    type Output = i64;

    weft_core::activity_inputs! {
        required "first_number" => first_number: i64;
        required "second_number" => second_number: i64;
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, FaultError> {
        Ok(self.first_number + self.second_number)
    }
}

struct WriteLine {
    console: Arc<Console>,
    text: String,
}

#[async_trait]
impl Activity for WriteLine {
    type Output = ();

    weft_core::activity_inputs! {
        required "text" => text: String;
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<(), FaultError> {
        self.console.write(self.text.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Explode;

#[async_trait]
impl Activity for Explode {
    type Output = i64;

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, FaultError> {
        Err(FaultError::new("boom"))
    }
}

/// Sleeps long enough that only cancellation ends it in tests.
#[derive(Default)]
struct Napper;

#[async_trait]
impl Activity for Napper {
    type Output = i64;

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, FaultError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(0)
    }
}

struct Recover {
    console: Arc<Console>,
    fault: Option<FaultError>,
}

#[async_trait]
impl Activity for Recover {
    type Output = ();

    const HANDLES_FAULTS: bool = true;

    fn accept_fault(&mut self, fault: FaultError) {
        self.fault = Some(fault);
    }

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<(), FaultError> {
        match &self.fault {
            Some(fault) => self.console.write(format!("handled: {}", fault.message())),
            None => self.console.write("cancelled"),
        }
        Ok(())
    }
}

/// Handler that fails while handling.
#[derive(Default)]
struct FragileRecover;

#[async_trait]
impl Activity for FragileRecover {
    type Output = ();

    const HANDLES_FAULTS: bool = true;

    async fn execute(&mut self, _ctx: &ActivityContext) -> Result<(), FaultError> {
        Err(FaultError::new("handler broke"))
    }
}

fn runtime_with(console: &Console) -> FlowRuntime {
    let mut container = ServiceContainer::new();
    container.add_instance(console.clone()).unwrap();
    container.register_default_activity::<ReadNumber>().unwrap();
    container.register_default_activity::<Sum>().unwrap();
    container.register_default_activity::<Explode>().unwrap();
    container.register_default_activity::<Napper>().unwrap();
    container.register_default_activity::<FragileRecover>().unwrap();
    container
        .register_activity::<WriteLine, _>(|scope| {
            Ok(WriteLine {
                console: scope.resolve::<Console>()?,
                text: String::new(),
            })
        })
        .unwrap();
    container
        .register_activity::<Recover, _>(|scope| {
            Ok(Recover {
                console: scope.resolve::<Console>()?,
                fault: None,
            })
        })
        .unwrap();
    FlowRuntime::new(container).with_sink(Arc::new(NullSink))
}

/// Builder pre-seeded with flow-wide default handlers.
fn covered(name: &str) -> FlowBuilder {
    let mut builder = FlowBuilder::new(name);
    let on_fault = builder.fault_handler::<Recover>("on_fault");
    let on_cancel = builder.fault_handler::<Recover>("on_cancel");
    builder.with_default_fault_handler(&on_fault).unwrap();
    builder.with_default_cancellation_handler(&on_cancel).unwrap();
    builder
}

#[tokio::test]
async fn sum_two_inputs() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("sum_two_inputs");
    let first = builder.activity::<ReadNumber>("read_first");
    let second = builder.activity::<ReadNumber>("read_second");
    let add = builder.activity::<Sum>("add");
    let print = builder.activity::<WriteLine>("print");
    builder.with_initial_node(&first).unwrap();
    builder.connect_to(&first, &second).unwrap();
    builder.connect_to(&second, &add).unwrap();
    builder.connect_to(&add, &print).unwrap();
    builder.bind(&first, "value").unwrap().to_constant(7i64).unwrap();
    builder.bind(&second, "value").unwrap().to_constant(5i64).unwrap();
    builder.bind(&add, "first_number").unwrap().to_result_of(&first).unwrap();
    builder.bind(&add, "second_number").unwrap().to_result_of(&second).unwrap();
    builder
        .bind(&print, "text")
        .unwrap()
        .to_expression(|deps| {
            let total = deps.result_of(&add);
            move |scope: &EvalScope<'_>| Ok(total.get(scope)?.to_string())
        })
        .unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(console.lines(), vec!["12"]);
}

#[tokio::test]
async fn condition_routes_to_the_false_branch() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("condition_branches");
    let first = builder.activity::<ReadNumber>("read_first");
    let second = builder.activity::<ReadNumber>("read_second");
    let out_a = builder.activity::<WriteLine>("out_a");
    let out_b = builder.activity::<WriteLine>("out_b");
    let first_result = builder.result_of(&first);
    let second_result = builder.result_of(&second);
    let pick = builder.condition("first_greater", move |scope: &EvalScope<'_>| {
        Ok(first_result.get(scope)? > second_result.get(scope)?)
    });
    builder.with_initial_node(&first).unwrap();
    builder.connect_to(&first, &second).unwrap();
    builder.connect_to(&second, &pick).unwrap();
    builder.connect_true_to(&pick, &out_a).unwrap();
    builder.connect_false_to(&pick, &out_b).unwrap();
    builder.bind(&first, "value").unwrap().to_constant(3i64).unwrap();
    builder.bind(&second, "value").unwrap().to_constant(9i64).unwrap();
    builder.bind(&out_a, "text").unwrap().to_constant("gt".to_string()).unwrap();
    builder.bind(&out_b, "text").unwrap().to_constant("le".to_string()).unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(console.lines(), vec!["le"]);
}

#[tokio::test]
async fn fault_routes_to_the_default_handler_with_the_error() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("single_fault");
    let explode = builder.activity::<Explode>("explode");
    builder.with_initial_node(&explode).unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    assert!(outcome.is_completed(), "handled fault completes the run: {outcome:?}");
    assert_eq!(console.lines(), vec!["handled: boom"]);
}

#[tokio::test]
async fn fork_join_branches_all_complete_before_the_consumer() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("fork_join");
    let one = builder.variable::<i64>("one");
    let two = builder.variable::<i64>("two");
    let three = builder.variable::<i64>("three");
    let fork_join = builder.fork_join("parallel_reads");
    let read_one = builder.fork::<ReadNumber>(&fork_join, "read_one");
    let read_two = builder.fork::<ReadNumber>(&fork_join, "read_two");
    let read_three = builder.fork::<ReadNumber>(&fork_join, "read_three");
    let print = builder.activity::<WriteLine>("print");
    builder.with_initial_node(&fork_join).unwrap();
    builder.connect_to(&fork_join, &print).unwrap();
    builder.bind(&read_one, "value").unwrap().to_constant(1i64).unwrap();
    builder.bind(&read_two, "value").unwrap().to_constant(2i64).unwrap();
    builder.bind(&read_three, "value").unwrap().to_constant(3i64).unwrap();
    builder.bind_to_result_of(&one, &read_one).unwrap();
    builder.bind_to_result_of(&two, &read_two).unwrap();
    builder.bind_to_result_of(&three, &read_three).unwrap();
    builder
        .bind(&print, "text")
        .unwrap()
        .to_expression(|deps| {
            let one = deps.variable(&one);
            let two = deps.variable(&two);
            let three = deps.variable(&three);
            move |scope: &EvalScope<'_>| {
                Ok(format!(
                    "{},{},{}",
                    one.get(scope)?,
                    two.get(scope)?,
                    three.get(scope)?
                ))
            }
        })
        .unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(console.lines(), vec!["1,2,3"]);
}

#[tokio::test]
async fn faulting_fork_child_cancels_siblings_and_reaches_the_handler() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("fork_child_fault");
    let fork_join = builder.fork_join("parallel");
    let _boom = builder.fork::<Explode>(&fork_join, "boom");
    let _slow_one = builder.fork::<Napper>(&fork_join, "slow_one");
    let _slow_two = builder.fork::<Napper>(&fork_join, "slow_two");
    builder.with_initial_node(&fork_join).unwrap();

    let flow = Arc::new(builder.build());
    let outcome = tokio::time::timeout(Duration::from_secs(5), runtime.run(&flow))
        .await
        .expect("siblings must be cancelled promptly");
    assert!(outcome.is_completed(), "handled fault completes the run: {outcome:?}");
    assert_eq!(console.lines(), vec!["handled: boom"]);
}

#[tokio::test]
async fn missing_required_input_refuses_to_run() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("missing_input");
    let add = builder.activity::<Sum>("add");
    builder.with_initial_node(&add).unwrap();
    builder.bind(&add, "first_number").unwrap().to_constant(1i64).unwrap();

    let flow = Arc::new(builder.build());
    let report = runtime.validate(&flow);
    assert!(
        report
            .errors
            .iter()
            .any(|diagnostic| diagnostic.code == DiagnosticCode::MissingRequiredInput
                && diagnostic.message.contains("second_number")),
        "report must name the unbound property: {report:?}"
    );

    let outcome = runtime.run(&flow).await;
    assert!(matches!(outcome, RunOutcome::ValidationFailed(_)));
    assert!(console.lines().is_empty(), "no activity may be invoked");
}

#[tokio::test]
async fn empty_switch_takes_the_default_branch() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("empty_switch");
    let fallback = builder.activity::<WriteLine>("fallback");
    let route = builder.switch::<&'static str, _>("route", |_scope: &EvalScope<'_>| Ok("anything"));
    builder.with_initial_node(&route).unwrap();
    builder.connect_default(&route, &fallback).unwrap();
    builder.bind(&fallback, "text").unwrap().to_constant("default".to_string()).unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(console.lines(), vec!["default"]);
}

#[tokio::test]
async fn switch_dispatches_by_key_equality() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("switch_dispatch");
    let write_a = builder.activity::<WriteLine>("write_a");
    let write_b = builder.activity::<WriteLine>("write_b");
    let fallback = builder.activity::<WriteLine>("fallback");
    let route = builder.switch::<&'static str, _>("route", |_scope: &EvalScope<'_>| Ok("b"));
    builder.with_initial_node(&route).unwrap();
    builder.connect_case(&route, "a").to(&write_a).unwrap();
    builder.connect_case(&route, "b").to(&write_b).unwrap();
    builder.connect_default(&route, &fallback).unwrap();
    builder.bind(&write_a, "text").unwrap().to_constant("A".to_string()).unwrap();
    builder.bind(&write_b, "text").unwrap().to_constant("B".to_string()).unwrap();
    builder.bind(&fallback, "text").unwrap().to_constant("default".to_string()).unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(console.lines(), vec!["B"]);
}

#[tokio::test]
async fn unmatched_key_without_default_faults_to_the_flow_handler() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("partial_switch");
    let write_a = builder.activity::<WriteLine>("write_a");
    let route = builder.switch::<&'static str, _>("route", |_scope: &EvalScope<'_>| Ok("missing"));
    builder.with_initial_node(&route).unwrap();
    builder.connect_case(&route, "a").to(&write_a).unwrap();
    builder.allow_partial_cases(&route);
    builder.bind(&write_a, "text").unwrap().to_constant("A".to_string()).unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    assert!(outcome.is_completed(), "unhandled case is a handled fault: {outcome:?}");
    let lines = console.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("handled:"), "handler must receive the fault: {lines:?}");
    assert!(lines[0].contains("no mapped case"));
}

#[tokio::test]
async fn block_with_a_single_node_runs_it_and_exits() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("single_node_block");
    let mut inner_print = None;
    let block = builder
        .block("inner", |b| {
            let print = b.activity::<WriteLine>("inner_print");
            inner_print = Some(print);
            Ok(NodeRef::from(&print))
        })
        .unwrap();
    let after = builder.activity::<WriteLine>("after");
    builder.with_initial_node(&block).unwrap();
    builder.connect_to(&block, &after).unwrap();
    let inner_print = inner_print.unwrap();
    builder.bind(&inner_print, "text").unwrap().to_constant("inner".to_string()).unwrap();
    builder.bind(&after, "text").unwrap().to_constant("after".to_string()).unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(console.lines(), vec!["inner", "after"]);
}

#[tokio::test]
async fn updates_for_one_trigger_run_in_declaration_order() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("update_order");
    let total = builder.variable_with_initial::<i64>("total", 0);
    let read = builder.activity::<ReadNumber>("read");
    let print = builder.activity::<WriteLine>("print");
    builder.with_initial_node(&read).unwrap();
    builder.connect_to(&read, &print).unwrap();
    builder.bind(&read, "value").unwrap().to_constant(5i64).unwrap();
    builder.after_completion_of(&read).assign(&total, 10).unwrap();
    builder
        .after_completion_of(&read)
        .update(&total, |value| *value += 5)
        .unwrap();
    builder
        .bind(&print, "text")
        .unwrap()
        .to_expression(|deps| {
            let total = deps.variable(&total);
            move |scope: &EvalScope<'_>| Ok(total.get(scope)?.to_string())
        })
        .unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(console.lines(), vec!["15"], "assign then update must run in order");
}

#[tokio::test]
async fn cancellation_stops_the_flow_and_runs_the_handler() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = covered("cancel");
    let nap = builder.activity::<Napper>("nap");
    let after = builder.activity::<WriteLine>("after");
    builder.with_initial_node(&nap).unwrap();
    builder.connect_to(&nap, &after).unwrap();
    builder.bind(&after, "text").unwrap().to_constant("after".to_string()).unwrap();

    let flow = Arc::new(builder.build());
    let token = CancellationToken::new();
    let (outcome, ()) = tokio::join!(runtime.run_with_token(&flow, token.clone()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    assert!(matches!(outcome, RunOutcome::Cancelled), "unexpected outcome: {outcome:?}");
    assert_eq!(console.lines(), vec!["cancelled"]);
}

#[tokio::test]
async fn a_failing_handler_ends_the_run_with_handler_failed() {
    let console = Console::default();
    let runtime = runtime_with(&console);

    let mut builder = FlowBuilder::new("fragile_handler");
    let on_fault = builder.fault_handler::<FragileRecover>("on_fault");
    let on_cancel = builder.fault_handler::<Recover>("on_cancel");
    builder.with_default_fault_handler(&on_fault).unwrap();
    builder.with_default_cancellation_handler(&on_cancel).unwrap();
    let explode = builder.activity::<Explode>("explode");
    builder.with_initial_node(&explode).unwrap();

    let flow = Arc::new(builder.build());
    let outcome = runtime.run(&flow).await;
    match outcome {
        RunOutcome::HandlerFailed(fault) => assert_eq!(fault.message(), "handler broke"),
        other => panic!("expected HandlerFailed, got {other:?}"),
    }
}
