//! Sessions
//!
//! A [`Session`] is one native view plus everything it owns: proxies,
//! callback registrations and render targets. Handles are cheap to clone and
//! usable from any thread; every operation runs on the engine thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use vela_dispatch::DispatchError;
use vela_gpu::SurfaceFrame;
use vela_handle::{NativeHandle, OwnerId};
use vela_value::{CallbackToken, Invocation, ManagedCallback, ScriptValue};

use crate::runtime::EngineCore;
use crate::{BridgeError, Engine, SessionState, ViewEvent};

#[derive(Debug, Clone, Default)]
struct SessionInfo {
    title: String,
    url: String,
    width: u32,
    height: u32,
}

/// Session state visible from every thread
#[derive(Debug)]
pub(crate) struct SessionShared {
    state: AtomicU8,
    info: Mutex<SessionInfo>,
}

impl SessionShared {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            state: AtomicU8::new(SessionState::Created as u8),
            info: Mutex::new(SessionInfo {
                width,
                height,
                ..SessionInfo::default()
            }),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless destroyed.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (SessionState::from_u8(raw) != SessionState::Destroyed).then_some(next as u8)
            })
            .is_ok()
    }

    /// Returns `true` for the call that destroyed the session.
    pub(crate) fn mark_destroyed(&self) -> bool {
        self.state.swap(SessionState::Destroyed as u8, Ordering::AcqRel) != SessionState::Destroyed as u8
    }

    fn info(&self) -> std::sync::MutexGuard<'_, SessionInfo> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_size(&self, width: u32, height: u32) {
        let mut info = self.info();
        info.width = width;
        info.height = height;
    }

    pub(crate) fn apply_event(&self, event: &ViewEvent) {
        match event {
            ViewEvent::TitleChanged(title) => self.info().title = title.clone(),
            ViewEvent::UrlChanged(url) => self.info().url = url.clone(),
            _ => {}
        }
        if event.starts_main_load() {
            self.advance(SessionState::Loading);
        } else if event.finishes_main_load() {
            self.advance(SessionState::Ready);
        }
    }
}

/// Handle to one native view
#[derive(Clone)]
pub struct Session {
    engine: Engine,
    owner: OwnerId,
    view: NativeHandle,
    shared: Arc<SessionShared>,
}

impl Session {
    pub(crate) fn new(engine: Engine, owner: OwnerId, view: NativeHandle, shared: Arc<SessionShared>) -> Self {
        Self {
            engine,
            owner,
            view,
            shared,
        }
    }

    pub fn id(&self) -> OwnerId {
        self.owner
    }

    /// Native handle of the view.
    pub fn view(&self) -> NativeHandle {
        self.view
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == SessionState::Destroyed
    }

    /// Last title reported by the page.
    pub fn title(&self) -> String {
        self.shared.info().title.clone()
    }

    /// Last URL reported by the page.
    pub fn url(&self) -> String {
        self.shared.info().url.clone()
    }

    pub fn size(&self) -> (u32, u32) {
        let info = self.shared.info();
        (info.width, info.height)
    }

    fn run<F, R>(&self, job: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&EngineCore, OwnerId) -> Result<R, BridgeError> + Send + 'static,
        R: Send + 'static,
    {
        if self.is_destroyed() {
            return Err(BridgeError::SessionClosed(self.owner));
        }
        let owner = self.owner;
        self.engine.execute(move |core| job(core, owner))
    }

    pub fn load_url(&self, url: &str) -> Result<(), BridgeError> {
        let url = url.to_string();
        self.run(move |core, owner| core.load_url(owner, &url))
    }

    pub fn reload(&self) -> Result<(), BridgeError> {
        self.run(|core, owner| core.reload(owner))
    }

    /// Evaluate `script` in the page. A thrown value comes back as
    /// [`ScriptValue::Exception`]; use [`ScriptValue::into_result`] to
    /// re-raise it.
    pub fn run_script(&self, script: &str) -> Result<ScriptValue, BridgeError> {
        let script = script.to_string();
        self.run(move |core, owner| core.run_script(owner, &script))
    }

    /// Resize the view. Render targets painted at the old size become stale.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), BridgeError> {
        self.run(move |core, owner| core.resize(owner, width, height))
    }

    /// Expose `callback` to scripts as the global function `name`.
    pub fn register_callback<F>(&self, name: &str, callback: F) -> Result<CallbackHandle, BridgeError>
    where
        F: Fn(&Invocation) -> Result<ScriptValue, ScriptValue> + Send + Sync + 'static,
    {
        let name = name.to_string();
        let bound_name = name.clone();
        let token = self.run(move |core, owner| core.register_callback(owner, &bound_name, Arc::new(callback)))?;
        Ok(CallbackHandle {
            engine: self.engine.clone(),
            owner: self.owner,
            token,
            name,
            shared: self.shared.clone(),
        })
    }

    pub fn call_function(
        &self,
        function: &ScriptValue,
        this: ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, BridgeError> {
        let function = function.clone();
        self.run(move |core, owner| core.call_function(owner, &function, &this, &args))
    }

    pub fn get_property(&self, object: &ScriptValue, name: &str) -> Result<ScriptValue, BridgeError> {
        let object = object.clone();
        let name = name.to_string();
        self.run(move |core, owner| core.get_property(owner, &object, &name))
    }

    pub fn set_property(&self, object: &ScriptValue, name: &str, value: ScriptValue) -> Result<(), BridgeError> {
        let object = object.clone();
        let name = name.to_string();
        self.run(move |core, owner| core.set_property(owner, &object, &name, &value))
    }

    pub fn make_array(&self, items: Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> {
        self.run(move |core, owner| core.make_array(owner, &items))
    }

    /// Release the native reference behind `value` now instead of waiting
    /// for its last clone to drop.
    ///
    /// Releasing a value twice fails with `AlreadyReleased`.
    pub fn release(&self, value: ScriptValue) -> Result<(), BridgeError> {
        self.run(move |core, owner| core.release(owner, &value))
    }

    /// Called on the engine thread after each repaint of this view.
    pub fn set_paint_handler<F>(&self, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(&SurfaceFrame) + Send + 'static,
    {
        self.run(move |core, owner| core.set_paint_handler(owner, Box::new(handler)))
    }

    /// Called on the engine thread for every event of this view.
    pub fn set_event_handler<F>(&self, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(&ViewEvent) + Send + 'static,
    {
        self.run(move |core, owner| core.set_event_handler(owner, Box::new(handler)))
    }

    /// Destroy the session. Idempotent; callable from any thread.
    ///
    /// Work already queued for the session runs first. Teardown then drops
    /// its callbacks, releases its proxies and invalidates its render
    /// targets.
    pub fn destroy(&self) {
        if !self.shared.mark_destroyed() {
            return;
        }
        let owner = self.owner;
        match self.engine.post(move |core| core.teardown(owner)) {
            Ok(()) => tracing::debug!("Scheduled teardown of {}", owner),
            // A stopped engine already tore everything down.
            Err(_) => tracing::debug!("Engine stopped before teardown of {}", owner),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.owner)
            .field("view", &self.view)
            .field("state", &self.state())
            .finish()
    }
}

/// Registered managed callback, callable from any thread
#[derive(Clone)]
pub struct CallbackHandle {
    engine: Engine,
    owner: OwnerId,
    token: CallbackToken,
    name: String,
    shared: Arc<SessionShared>,
}

impl CallbackHandle {
    pub fn token(&self) -> CallbackToken {
        self.token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// The callback as a script value, for passing to native code.
    pub fn as_value(&self) -> ScriptValue {
        ScriptValue::Callback(ManagedCallback::Bound(self.token))
    }

    /// Run the callback on the engine thread and wait for its result.
    ///
    /// A thrown value comes back as [`ScriptValue::Exception`].
    pub fn invoke(&self, args: Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> {
        if self.shared.state() == SessionState::Destroyed {
            return Err(DispatchError::StaleCallback(self.token).into());
        }
        let token = self.token;
        self.engine
            .execute(move |core| core.invoke_registered(token, ScriptValue::Undefined, args))
    }

    /// Queue the callback without waiting.
    ///
    /// If the session is destroyed before the job runs, it is dropped.
    pub fn post(&self, args: Vec<ScriptValue>) -> Result<(), BridgeError> {
        if self.shared.state() == SessionState::Destroyed {
            tracing::debug!("Dropping post to {}: session destroyed", self.token);
            return Err(DispatchError::StaleCallback(self.token).into());
        }
        let token = self.token;
        self.engine.post(move |core| {
            if let Err(err) = core.invoke_registered(token, ScriptValue::Undefined, args) {
                if err.is_stale() {
                    tracing::debug!("Dropped queued invocation: {}", err);
                } else {
                    tracing::warn!("Queued invocation of {} failed: {}", token, err);
                }
            }
        })
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}
