use thiserror::Error;

/// Canonical fault value routed to fault handlers during execution.
///
/// Activities fail with a `FaultError`; engine-level runtime issues (failed
/// instantiation, binding resolution, an unmapped switch key) are faults of
/// the same shape originating at the current node. Fork-join aggregation
/// keeps the first fault primary and records the rest as suppressed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FaultError {
    kind: FaultKind,
    message: String,
    suppressed: Vec<FaultError>,
}

/// Origin classification for a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Failure raised by a user activity's action.
    Activity,
    /// The service container could not construct the activity instance.
    Instantiation,
    /// A binding failed to resolve or to assign.
    Binding,
    /// A resolved value did not match the input property's type.
    InputType,
    /// A switch key had no mapped case and no default branch.
    UnhandledCase,
    /// A result cell was read before its producer completed.
    ResultNotReady,
    /// A variable was read or updated while uninitialized.
    VariableUnset,
    /// A spawned fork branch ended abnormally.
    Join,
}

impl FaultError {
    /// Construct an activity fault from displayable content.
    pub fn new(message: impl Into<String>) -> Self {
        Self::engine(FaultKind::Activity, message)
    }

    /// Construct an engine-originated fault of the given kind.
    pub fn engine(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suppressed: Vec::new(),
        }
    }

    /// Fault for a binding that targets a property the activity does not declare.
    pub fn unknown_property(property: &str) -> Self {
        Self::engine(
            FaultKind::Binding,
            format!("activity declares no input property named `{property}`"),
        )
    }

    /// Classification of this fault.
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Faults subsumed by this one (fork-join siblings).
    pub fn suppressed(&self) -> &[FaultError] {
        &self.suppressed
    }

    /// Record a sibling fault subsumed by this one.
    pub fn push_suppressed(&mut self, fault: FaultError) {
        self.suppressed.push(fault);
    }
}

/// Convenient result alias for activity actions.
pub type ActivityResult<T> = Result<T, FaultError>;
