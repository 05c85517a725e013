use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::fault::FaultError;
use crate::value::{InputValue, SharedValue};

/// Static metadata for one input property of an activity type.
///
/// Required properties must carry exactly one binding; the validator
/// enforces this before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    /// Property name targeted by bindings.
    pub name: &'static str,
    /// Whether a binding is mandatory.
    pub required: bool,
}

/// Execution context handed to an activity's action.
///
/// Carries the run's cancellation token and a worker-pool escape hatch for
/// blocking bodies.
#[derive(Clone)]
pub struct ActivityContext {
    cancellation: CancellationToken,
}

impl ActivityContext {
    /// Build a context over the given cancellation token.
    pub fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    /// Returns `true` once cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Access the cancellation token for cooperative checks or timeouts.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Run a blocking body on the worker pool instead of the executor task.
    pub async fn run_blocking<T, F>(&self, body: F) -> Result<T, FaultError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(body)
            .await
            .map_err(|err| FaultError::new(format!("background body aborted: {err}")))
    }
}

/// A user-supplied unit of work.
///
/// Activities are instantiated per invocation by the service container,
/// receive their bound inputs through [`Activity::assign_input`], and
/// produce a typed result that downstream bindings read from the node's
/// result cell.
#[async_trait]
pub trait Activity: Send + 'static {
    /// Result type populated into the node's result cell on success.
    type Output: Send + Sync + 'static;

    /// Whether this type can receive a routed fault.
    ///
    /// Types wired as fault handlers must opt in and override
    /// [`Activity::accept_fault`]; the validator rejects handler edges to
    /// types that do not.
    const HANDLES_FAULTS: bool = false;

    /// Input property metadata declared by this activity type.
    fn inputs() -> &'static [InputSpec]
    where
        Self: Sized,
    {
        &[]
    }

    /// Assign a resolved binding value to the named input property.
    fn assign_input(&mut self, property: &str, value: InputValue) -> Result<(), FaultError> {
        let _ = value;
        Err(FaultError::unknown_property(property))
    }

    /// Receive the routed fault when this instance runs as a fault handler.
    fn accept_fault(&mut self, fault: FaultError) {
        let _ = fault;
    }

    /// Execute the activity's action.
    async fn execute(&mut self, ctx: &ActivityContext) -> Result<Self::Output, FaultError>;
}

/// Object-safe, type-erased form of [`Activity`] driven by the executor.
///
/// Concrete instances are wrapped in [`Erased`] so the engine stays
/// non-generic over activity types.
pub trait ErasedActivity: Send {
    /// See [`Activity::assign_input`].
    fn assign_input(&mut self, property: &str, value: InputValue) -> Result<(), FaultError>;

    /// See [`Activity::accept_fault`].
    fn accept_fault(&mut self, fault: FaultError);

    /// Invoke the action and erase its output.
    fn invoke<'a>(
        &'a mut self,
        ctx: &'a ActivityContext,
    ) -> BoxFuture<'a, Result<SharedValue, FaultError>>;
}

/// Adapter erasing a concrete activity's output type for the engine.
pub struct Erased<A: Activity>(pub A);

impl<A: Activity> ErasedActivity for Erased<A> {
    fn assign_input(&mut self, property: &str, value: InputValue) -> Result<(), FaultError> {
        self.0.assign_input(property, value)
    }

    fn accept_fault(&mut self, fault: FaultError) {
        self.0.accept_fault(fault);
    }

    fn invoke<'a>(
        &'a mut self,
        ctx: &'a ActivityContext,
    ) -> BoxFuture<'a, Result<SharedValue, FaultError>> {
        Box::pin(async move {
            let output = self.0.execute(ctx).await?;
            Ok(Arc::new(output) as SharedValue)
        })
    }
}

/// Declare an activity's input properties and their assignment plumbing.
///
/// Expands to `inputs()` and `assign_input()` bodies inside an `Activity`
/// impl. `required` fields are assigned directly; `optional` fields must be
/// `Option<T>` and receive `Some(value)` when bound.
///
/// ```ignore
/// #[async_trait]
/// impl Activity for Sum {
///     type Output = i64;
///
///     weft_core::activity_inputs! {
///         required "first_number" => first_number: i64;
///         required "second_number" => second_number: i64;
///         optional "label" => label: String;
///     }
///
///     async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, FaultError> {
///         Ok(self.first_number + self.second_number)
///     }
/// }
/// ```
#[macro_export]
macro_rules! activity_inputs {
    ($($mode:ident $name:literal => $field:ident : $ty:ty);* $(;)?) => {
        fn inputs() -> &'static [$crate::InputSpec] {
            const SPECS: &[$crate::InputSpec] = &[
                $($crate::InputSpec {
                    name: $name,
                    required: $crate::activity_inputs!(@required $mode),
                },)*
            ];
            SPECS
        }

        fn assign_input(
            &mut self,
            property: &str,
            value: $crate::InputValue,
        ) -> ::core::result::Result<(), $crate::FaultError> {
            match property {
                $($name => {
                    $crate::activity_inputs!(@assign $mode self, $field, $ty, value);
                    Ok(())
                })*
                other => Err($crate::FaultError::unknown_property(other)),
            }
        }
    };
    (@required required) => {
        true
    };
    (@required optional) => {
        false
    };
    (@assign required $self:ident, $field:ident, $ty:ty, $value:ident) => {
        $self.$field = $value.take::<$ty>()?
    };
    (@assign optional $self:ident, $field:ident, $ty:ty, $value:ident) => {
        $self.$field = ::core::option::Option::Some($value.take::<$ty>()?)
    };
}
