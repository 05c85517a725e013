//! Runtime for validated Weft flows.
//!
//! The executor walks the graph one node at a time inside sequential
//! regions and fans out linked tasks inside fork-join regions. Activity
//! instances come from the [`ServiceContainer`]; execution events flow
//! through an [`EventSink`]; cancellation propagates structurally through
//! linked tokens. All per-run state lives in an execution context threaded
//! through the traversal — the engine keeps no globals.

mod container;
mod events;
mod executor;
mod runtime;

pub use container::{RegistryError, ResolveError, ServiceContainer, ServiceScope};
pub use events::{ChannelSink, EventSink, ExecutionEvent, NullSink, TracingSink, Verbosity};
pub use executor::RunOutcome;
pub use runtime::FlowRuntime;
