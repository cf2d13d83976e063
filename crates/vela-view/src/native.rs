//! Native engine seam
//!
//! [`NativeEngine`] is the downward interface: everything the facade asks
//! of the engine. [`UpcallSink`] is the upward one: everything the engine
//! reports back. Both live on the engine thread only.
//!
//! Reference conventions:
//! - values returned by `evaluate`, `call_function` and `get_property` are
//!   borrowed; the facade retains what it keeps
//! - `create_view` and `make_array` return a reference the caller owns
//! - `retain` and `release` adjust the count and must not call back into
//!   the sink

use std::cell::OnceCell;
use std::rc::{Rc, Weak};

use vela_gpu::{DrawBatch, DriverError, ReplayReport, ResourceNotice, SurfaceError};
use vela_handle::NativeHandle;
use vela_value::{CallbackToken, NativeValue};

use crate::runtime::EngineCore;
use crate::{NativeError, ViewConfig, ViewEvent};

/// Single-threaded native engine
pub trait NativeEngine {
    /// Nested native frames this engine tolerates on its own thread.
    fn max_call_depth(&self) -> usize {
        1
    }

    fn create_view(&self, config: &ViewConfig) -> Result<NativeHandle, NativeError>;

    fn load_url(&self, view: NativeHandle, url: &str) -> Result<(), NativeError>;

    fn reload(&self, view: NativeHandle) -> Result<(), NativeError>;

    /// Run `script` in the view's global scope. A thrown value comes back
    /// as [`NativeValue::Exception`].
    fn evaluate(&self, view: NativeHandle, script: &str) -> Result<NativeValue, NativeError>;

    fn call_function(
        &self,
        view: NativeHandle,
        function: NativeHandle,
        this: NativeValue,
        args: Vec<NativeValue>,
    ) -> Result<NativeValue, NativeError>;

    fn get_property(
        &self,
        view: NativeHandle,
        object: NativeHandle,
        name: &str,
    ) -> Result<NativeValue, NativeError>;

    fn set_property(
        &self,
        view: NativeHandle,
        object: NativeHandle,
        name: &str,
        value: NativeValue,
    ) -> Result<(), NativeError>;

    fn make_array(&self, view: NativeHandle, items: Vec<NativeValue>) -> Result<NativeHandle, NativeError>;

    /// Expose `token` to scripts as the global function `name`.
    fn bind_callback(&self, view: NativeHandle, name: &str, token: CallbackToken) -> Result<(), NativeError>;

    fn unbind_callback(&self, view: NativeHandle, token: CallbackToken);

    fn resize(&self, view: NativeHandle, width: u32, height: u32) -> Result<(), NativeError>;

    /// Run timers and pending jobs; may post events.
    fn update(&self);

    /// Repaint dirty views; emits draw batches through the sink.
    fn render(&self);

    fn retain(&self, handle: NativeHandle);

    fn release(&self, handle: NativeHandle);
}

/// Upcalls from the native engine into the facade
///
/// Handed to the native engine when it is built. Upcalls that arrive before
/// the engine is fully started, or after it stopped, are dropped.
#[derive(Clone, Default)]
pub struct UpcallSink {
    core: Rc<OnceCell<Weak<EngineCore>>>,
}

impl UpcallSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, core: &Rc<EngineCore>) {
        let _ = self.core.set(Rc::downgrade(core));
    }

    fn core(&self) -> Option<Rc<EngineCore>> {
        self.core.get().and_then(Weak::upgrade)
    }

    /// Run the managed callback registered under `token` and wait for it.
    ///
    /// Stale tokens yield `undefined`; a thrown value comes back as a
    /// native exception.
    pub fn invoke_callback(
        &self,
        view: NativeHandle,
        token: CallbackToken,
        this: NativeValue,
        args: Vec<NativeValue>,
    ) -> NativeValue {
        match self.core() {
            Some(core) => core.invoke_callback(view, token, this, args),
            None => {
                tracing::debug!("Dropping upcall to {}: engine stopped", token);
                NativeValue::Undefined
            }
        }
    }

    pub fn post_event(&self, view: NativeHandle, event: ViewEvent) {
        if let Some(core) = self.core() {
            core.post_event(view, event);
        }
    }

    /// Replay a draw batch through the host driver.
    pub fn submit_batch(&self, batch: DrawBatch) -> Result<ReplayReport, SurfaceError> {
        match self.core() {
            Some(core) => core.submit_batch(batch),
            None => Err(SurfaceError::Driver(DriverError::new("engine stopped"))),
        }
    }

    pub fn resource(&self, notice: ResourceNotice) -> Result<(), SurfaceError> {
        match self.core() {
            Some(core) => core.resource(notice),
            None => Ok(()),
        }
    }

    /// The native side now holds `handle`; keep its proxy alive.
    pub fn retain_object(&self, handle: NativeHandle) -> bool {
        self.core().is_some_and(|core| core.pin(handle))
    }

    /// The native side no longer holds `handle`.
    pub fn release_object(&self, handle: NativeHandle) -> bool {
        self.core().is_some_and(|core| core.unpin(handle))
    }

    /// The native engine destroyed `handle` on its own.
    pub fn object_destroyed(&self, handle: NativeHandle) -> bool {
        self.core().is_some_and(|core| core.object_destroyed(handle))
    }
}

impl std::fmt::Debug for UpcallSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpcallSink")
            .field("attached", &self.core().is_some())
            .finish()
    }
}
