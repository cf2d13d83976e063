//! Vela Callback Dispatcher
//!
//! Routes native invocations of managed callbacks and owns the engine thread.
//!
//! - [`CallbackDispatcher`]: token -> managed closure table, per-owner
//!   invalidation
//! - [`EngineQueue`]: one dedicated OS thread per engine instance that owns
//!   all engine state and drains cross-thread work in FIFO order

mod dispatcher;
mod error;
mod queue;

pub use dispatcher::{CallbackDispatcher, ResolvedCallback};
pub use error::DispatchError;
pub use queue::{EngineQueue, EngineState, panic_message};

pub use vela_value::CallbackToken;
