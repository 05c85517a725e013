use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Canonical diagnostic severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Execution must be refused.
    Error,
    /// Action recommended but execution may proceed.
    Warning,
}

/// The closed set of validation diagnostic codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum DiagnosticCode {
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
}

/// Registry metadata for one diagnostic code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeInfo {
    /// Stable identifier.
    pub code: DiagnosticCode,
    /// Validator pass that produces the diagnostic.
    pub subsystem: &'static str,
    /// Severity assigned when the diagnostic is emitted.
    pub default_severity: Severity,
    /// Short human-readable description.
    pub summary: &'static str,
}

/// Canonical diagnostic registry.
pub static DIAGNOSTIC_CODES: Lazy<Vec<CodeInfo>> = Lazy::new(|| {
    use DiagnosticCode::*;
    vec![
        CodeInfo {
            code: MissingInitialNode,
            subsystem: "reachability",
            default_severity: Severity::Error,
            summary: "Flow does not declare an initial node",
        },
        CodeInfo {
            code: DanglingEdge,
            subsystem: "references",
            default_severity: Severity::Error,
            summary: "Edge or binding refers to a node outside the store",
        },
        CodeInfo {
            code: UnreachableNode,
            subsystem: "reachability",
            default_severity: Severity::Warning,
            summary: "Node cannot be reached from the initial node",
        },
        CodeInfo {
            code: MissingFaultHandler,
            subsystem: "handlers",
            default_severity: Severity::Error,
            summary: "Activity has neither a fault successor nor a flow default",
        },
        CodeInfo {
            code: MissingCancellationHandler,
            subsystem: "handlers",
            default_severity: Severity::Error,
            summary: "Activity has neither a cancellation successor nor a flow default",
        },
        CodeInfo {
            code: InvalidFaultHandlerType,
            subsystem: "handlers",
            default_severity: Severity::Error,
            summary: "Fault handler target's type lacks the fault-handler capability",
        },
        CodeInfo {
            code: MissingRequiredInput,
            subsystem: "bindings",
            default_severity: Severity::Error,
            summary: "Required input property has no binding",
        },
        CodeInfo {
            code: DuplicateBinding,
            subsystem: "bindings",
            default_severity: Severity::Error,
            summary: "Input property carries more than one binding",
        },
        CodeInfo {
            code: ResultReadBeforeProducer,
            subsystem: "liveness",
            default_severity: Severity::Error,
            summary: "Binding reads a result that is not proven live on every path",
        },
        CodeInfo {
            code: NonDefaultedPartialSwitch,
            subsystem: "switches",
            default_severity: Severity::Error,
            summary: "Switch has neither a default branch nor explicit partial coverage",
        },
        CodeInfo {
            code: ForkJoinEmpty,
            subsystem: "fork_join",
            default_severity: Severity::Error,
            summary: "Fork-join declares no branches",
        },
        CodeInfo {
            code: ForkJoinCycle,
            subsystem: "fork_join",
            default_severity: Severity::Error,
            summary: "Fork-join branch re-enters its own fork-join",
        },
        CodeInfo {
            code: VariableOutOfScope,
            subsystem: "variables",
            default_severity: Severity::Error,
            summary: "Variable referenced outside its declaring scope",
        },
        CodeInfo {
            code: ParallelVariableWriteConflict,
            subsystem: "variables",
            default_severity: Severity::Error,
            summary: "Two parallel fork branches write the same variable",
        },
    ]
});

/// Lookup the registry entry for a code.
pub fn code_info(code: DiagnosticCode) -> &'static CodeInfo {
    DIAGNOSTIC_CODES
        .iter()
        .find(|info| info.code == code)
        .expect("every diagnostic code is registered")
}

/// Concrete diagnostic emitted by a validator pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostic {
    /// Stable code identifying the problem class.
    pub code: DiagnosticCode,
    /// Long-form message presented to the author.
    pub message: String,
    /// Offending node, when one can be named.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
}

impl Diagnostic {
    /// Convenience constructor.
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            node: None,
        }
    }

    /// Attach the offending node.
    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }
}

/// Structured validation result: never raised, always returned as data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationReport {
    /// Diagnostics that refuse execution.
    pub errors: Vec<Diagnostic>,
    /// Diagnostics that permit execution.
    pub warnings: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// File a diagnostic under its registered severity.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match code_info(diagnostic.code).default_severity {
            Severity::Error => self.errors.push(diagnostic),
            Severity::Warning => self.warnings.push(diagnostic),
        }
    }

    /// Whether any error is present.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether a diagnostic with the given code was filed.
    pub fn contains(&self, code: DiagnosticCode) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|diagnostic| diagnostic.code == code)
    }
}
