//! Vela Value Marshaller
//!
//! Converts values between the managed representation ([`ScriptValue`]) and
//! the native engine's representation ([`NativeValue`]).
//!
//! Primitives are copied. Objects, arrays and functions cross by reference
//! through the handle registry; managed closures cross as callback tokens
//! issued by the dispatcher.

mod error;
mod marshal;
mod native;
mod script;

pub use error::MarshalError;
pub use marshal::{BoxError, CallbackBinder, FunctionInvoker, Marshaller};
pub use native::{NativeString, NativeValue};
pub use script::{
    Callback, Invocation, ManagedCallback, ScriptException, ScriptFunction, ScriptString,
    ScriptValue, UnboundCallback,
};

use std::fmt;

/// Dispatcher-issued identity of a managed callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackToken(pub u64);

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback#{}", self.0)
    }
}
