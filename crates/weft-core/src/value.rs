use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use crate::fault::{FaultError, FaultKind};

/// Immutable shared value stored in result cells, variable slots, and
/// constant bindings.
pub type SharedValue = Arc<dyn Any + Send + Sync>;

/// Resolved binding value handed to an activity's input property.
///
/// Values arrive either owned (expression output) or shared (constants and
/// result cells); `take` converts both into the property's concrete type.
pub struct InputValue {
    repr: ValueRepr,
    type_name: &'static str,
}

enum ValueRepr {
    Owned(Box<dyn Any + Send>),
    Shared(SharedValue),
}

impl InputValue {
    /// Wrap an owned value.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            repr: ValueRepr::Owned(Box::new(value)),
            type_name: type_name::<T>(),
        }
    }

    /// Wrap an already-shared value without copying it.
    pub fn shared(value: SharedValue, type_name: &'static str) -> Self {
        Self {
            repr: ValueRepr::Shared(value),
            type_name,
        }
    }

    /// Name of the concrete type carried by this value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Extract the value as `T`.
    ///
    /// Shared values are cloned out; owned values are moved. A type mismatch
    /// is surfaced as an input fault naming both sides.
    pub fn take<T: Clone + Send + Sync + 'static>(self) -> Result<T, FaultError> {
        let carried = self.type_name;
        match self.repr {
            ValueRepr::Owned(boxed) => boxed.downcast::<T>().map(|value| *value).map_err(|_| {
                FaultError::engine(
                    FaultKind::InputType,
                    format!(
                        "input value of type `{carried}` cannot be assigned where `{}` is expected",
                        type_name::<T>()
                    ),
                )
            }),
            ValueRepr::Shared(shared) => {
                shared.downcast_ref::<T>().cloned().ok_or_else(|| {
                    FaultError::engine(
                        FaultKind::InputType,
                        format!(
                            "input value of type `{carried}` cannot be assigned where `{}` is expected",
                            type_name::<T>()
                        ),
                    )
                })
            }
        }
    }
}

impl fmt::Debug for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InputValue").field(&self.type_name).finish()
    }
}
