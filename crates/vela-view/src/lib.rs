//! Vela View
//!
//! The objects host code programs against. An [`Engine`] owns one engine
//! thread with a native engine on it; each [`Session`] is one native view.
//!
//! ```text
//! host threads ──Engine/Session──▶ EngineQueue ──▶ engine thread
//!                                                  EngineCore
//!                                                  ├── HandleRegistry
//!                                                  ├── CallbackDispatcher
//!                                                  ├── SurfaceBridge ──▶ GpuDriver
//!                                                  └── NativeEngine ──UpcallSink──┘
//! ```
//!
//! Calls from other threads queue and block; calls made on the engine thread
//! (from a callback or paint handler) run inline, up to the configured
//! nesting depth.

mod config;
mod engine;
mod error;
mod event;
mod native;
mod runtime;
mod session;

pub use config::{EngineConfig, ViewConfig};
pub use engine::{Engine, EngineStats};
pub use error::{BridgeError, NativeError};
pub use event::{ConsoleLevel, FrameInfo, SessionState, ViewEvent};
pub use native::{NativeEngine, UpcallSink};
pub use session::{CallbackHandle, Session};

pub use vela_dispatch::DispatchError;
pub use vela_gpu::{
    DrawBatch, DrawCommand, GpuDriver, GpuState, ResourceNotice, SoftwareDriver, SurfaceError,
    SurfaceFrame, TraceDriver,
};
pub use vela_handle::{NativeHandle, OwnerId};
pub use vela_value::{
    CallbackToken, Invocation, ManagedCallback, MarshalError, NativeString, NativeValue,
    ScriptException, ScriptFunction, ScriptString, ScriptValue,
};
