use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;
use weft_core::{FlowDefinition, ValidationReport};
use weft_plan::ValidatedFlow;

use crate::container::ServiceContainer;
use crate::events::{EventSink, TracingSink};
use crate::executor::{self, RunOutcome};

/// Public entry point for validating and running flows.
///
/// Holds the service container used to construct activity instances and
/// the sink receiving execution events.
pub struct FlowRuntime {
    container: Arc<ServiceContainer>,
    sink: Arc<dyn EventSink>,
}

impl FlowRuntime {
    /// Runtime over the given container, logging through `tracing`.
    pub fn new(container: ServiceContainer) -> Self {
        Self {
            container: Arc::new(container),
            sink: Arc::new(TracingSink::default()),
        }
    }

    /// Replace the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run every validation pass over a definition.
    pub fn validate(&self, flow: &FlowDefinition) -> ValidationReport {
        weft_plan::check(flow)
    }

    /// Validate and run a flow.
    ///
    /// Resolves to [`RunOutcome::ValidationFailed`] without invoking any
    /// activity when the definition has errors.
    pub async fn run(&self, flow: &Arc<FlowDefinition>) -> RunOutcome {
        self.run_with_token(flow, CancellationToken::new()).await
    }

    /// [`FlowRuntime::run`] with a caller-held cancellation token.
    #[instrument(skip_all, fields(flow = %flow.name()))]
    pub async fn run_with_token(
        &self,
        flow: &Arc<FlowDefinition>,
        token: CancellationToken,
    ) -> RunOutcome {
        match weft_plan::validate(flow) {
            Err(report) => RunOutcome::ValidationFailed(report),
            Ok(validated) => self.run_validated_with_token(&validated, token).await,
        }
    }

    /// Run an already-validated flow.
    pub async fn run_validated(&self, flow: &ValidatedFlow) -> RunOutcome {
        self.run_validated_with_token(flow, CancellationToken::new())
            .await
    }

    /// [`FlowRuntime::run_validated`] with a caller-held cancellation token.
    pub async fn run_validated_with_token(
        &self,
        flow: &ValidatedFlow,
        token: CancellationToken,
    ) -> RunOutcome {
        executor::run_flow(flow, Arc::clone(&self.container), Arc::clone(&self.sink), token).await
    }
}
