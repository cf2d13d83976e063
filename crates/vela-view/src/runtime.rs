//! Engine-thread state
//!
//! `EngineCore` is created on the engine thread and never leaves it. It owns
//! the handle registry, the callback dispatcher, the surface bridge and the
//! session table. No `RefCell` borrow is held while native code runs, so
//! upcalls arriving in the middle of a native call find everything free.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

use vela_dispatch::{CallbackDispatcher, DispatchError, EngineQueue, EngineState, ResolvedCallback, panic_message};
use vela_gpu::{DrawBatch, GpuDriver, ReplayReport, ResourceNotice, SurfaceBridge, SurfaceError, SurfaceFrame};
use vela_handle::{HandleRegistry, ManagedProxy, NativeHandle, NativeRefCount, OwnerId};
use vela_value::{
    BoxError, Callback, CallbackToken, FunctionInvoker, Invocation, ManagedCallback, MarshalError,
    Marshaller, NativeValue, ScriptException, ScriptFunction, ScriptString, ScriptValue,
};

use crate::session::SessionShared;
use crate::{BridgeError, EngineConfig, EngineStats, NativeEngine, SessionState, ViewConfig, ViewEvent};

pub(crate) type PaintHandler = Box<dyn Fn(&SurfaceFrame) + Send>;
pub(crate) type EventHandler = Box<dyn Fn(&ViewEvent) + Send>;

/// Reference counting through the native engine
struct Refs<'a>(&'a dyn NativeEngine);

impl NativeRefCount for Refs<'_> {
    fn retain(&self, handle: NativeHandle) {
        self.0.retain(handle);
    }

    fn release(&self, handle: NativeHandle) {
        self.0.release(handle);
    }
}

/// Counts nested native frames; decrements on drop.
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

struct SessionEntry {
    view: ManagedProxy,
    shared: Arc<SessionShared>,
    paint: Option<Rc<PaintHandler>>,
    events: Option<Rc<EventHandler>>,
}

pub(crate) struct EngineCore {
    native: Box<dyn NativeEngine>,
    registry: RefCell<HandleRegistry>,
    dispatcher: RefCell<CallbackDispatcher>,
    surfaces: RefCell<SurfaceBridge<Box<dyn GpuDriver>>>,
    sessions: RefCell<HashMap<OwnerId, SessionEntry>>,
    /// Owners torn down by the current job
    retired: RefCell<Vec<OwnerId>>,
    invoker: Arc<dyn FunctionInvoker>,
    depth: Cell<usize>,
    limit: usize,
    closed: Cell<bool>,
}

impl EngineCore {
    pub(crate) fn new(
        native: Box<dyn NativeEngine>,
        driver: Box<dyn GpuDriver>,
        invoker: Arc<dyn FunctionInvoker>,
        config: &EngineConfig,
    ) -> Self {
        let limit = config.max_call_depth.min(native.max_call_depth()).max(1);
        tracing::debug!(
            "Call depth limit {} (configured {}, native {})",
            limit,
            config.max_call_depth,
            native.max_call_depth()
        );
        Self {
            native,
            registry: RefCell::new(HandleRegistry::new()),
            dispatcher: RefCell::new(CallbackDispatcher::new()),
            surfaces: RefCell::new(SurfaceBridge::new(driver)),
            sessions: RefCell::new(HashMap::new()),
            retired: RefCell::new(Vec::new()),
            invoker,
            depth: Cell::new(0),
            limit,
            closed: Cell::new(false),
        }
    }

    fn enter(&self) -> Result<DepthGuard<'_>, DispatchError> {
        let depth = self.depth.get();
        if depth >= self.limit {
            tracing::warn!("Refusing native call at depth {} (limit {})", depth + 1, self.limit);
            return Err(DispatchError::ReentrancyLimit {
                depth: depth + 1,
                limit: self.limit,
            });
        }
        self.depth.set(depth + 1);
        Ok(DepthGuard { depth: &self.depth })
    }

    fn marshal<R>(&self, owner: OwnerId, f: impl FnOnce(&mut Marshaller<'_>) -> R) -> R {
        let mut registry = self.registry.borrow_mut();
        let mut dispatcher = self.dispatcher.borrow_mut();
        let refs = Refs(&*self.native);
        let mut marshaller = Marshaller::new(&mut registry, &refs, &mut *dispatcher, &self.invoker, owner);
        f(&mut marshaller)
    }

    fn view_of(&self, owner: OwnerId) -> Result<NativeHandle, BridgeError> {
        self.sessions
            .borrow()
            .get(&owner)
            .map(|entry| entry.view.handle())
            .ok_or(BridgeError::SessionClosed(owner))
    }

    fn shared_of(&self, owner: OwnerId) -> Result<Arc<SessionShared>, BridgeError> {
        self.sessions
            .borrow()
            .get(&owner)
            .map(|entry| entry.shared.clone())
            .ok_or(BridgeError::SessionClosed(owner))
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub(crate) fn create_session(
        &self,
        owner: OwnerId,
        config: &ViewConfig,
        shared: Arc<SessionShared>,
    ) -> Result<NativeHandle, BridgeError> {
        if self.closed.get() {
            return Err(DispatchError::QueueClosed.into());
        }

        let view = {
            let _guard = self.enter()?;
            self.native.create_view(config)?
        };
        if view.is_null() {
            return Err(MarshalError::NullHandle.into());
        }

        let proxy = self
            .registry
            .borrow_mut()
            .adopt(view, owner, &Refs(&*self.native));
        self.sessions.borrow_mut().insert(
            owner,
            SessionEntry {
                view: proxy,
                shared,
                paint: None,
                events: None,
            },
        );
        tracing::info!("Created {} on view {} ({}x{})", owner, view, config.width, config.height);
        Ok(view)
    }

    pub(crate) fn load_url(&self, owner: OwnerId, url: &str) -> Result<(), BridgeError> {
        let view = self.view_of(owner)?;
        self.shared_of(owner)?.advance(SessionState::Loading);
        tracing::debug!("{} loading {}", owner, url);
        let _guard = self.enter()?;
        Ok(self.native.load_url(view, url)?)
    }

    pub(crate) fn reload(&self, owner: OwnerId) -> Result<(), BridgeError> {
        let view = self.view_of(owner)?;
        self.shared_of(owner)?.advance(SessionState::Loading);
        let _guard = self.enter()?;
        Ok(self.native.reload(view)?)
    }

    pub(crate) fn run_script(&self, owner: OwnerId, script: &str) -> Result<ScriptValue, BridgeError> {
        let view = self.view_of(owner)?;
        let result = {
            let _guard = self.enter()?;
            self.native.evaluate(view, script)?
        };
        Ok(self.marshal(owner, |m| m.from_native(result))?)
    }

    pub(crate) fn call_function(
        &self,
        owner: OwnerId,
        function: &ScriptValue,
        this: &ScriptValue,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, BridgeError> {
        if !matches!(function, ScriptValue::Function(_)) {
            return Err(BridgeError::Type {
                expected: "function",
                got: function.type_name(),
            });
        }
        let view = self.view_of(owner)?;
        let (function, this, args) = self.marshal(owner, |m| {
            Ok::<_, MarshalError>((m.to_native(function)?, m.to_native(this)?, m.to_native_args(args)?))
        })?;
        let handle = function.handle().ok_or(MarshalError::NullHandle)?;

        let result = {
            let _guard = self.enter()?;
            self.native.call_function(view, handle, this, args)?
        };
        Ok(self.marshal(owner, |m| m.from_native(result))?)
    }

    pub(crate) fn get_property(
        &self,
        owner: OwnerId,
        object: &ScriptValue,
        name: &str,
    ) -> Result<ScriptValue, BridgeError> {
        let view = self.view_of(owner)?;
        let object = self.object_handle(owner, object)?;
        let result = {
            let _guard = self.enter()?;
            self.native.get_property(view, object, name)?
        };
        Ok(self.marshal(owner, |m| m.from_native(result))?)
    }

    pub(crate) fn set_property(
        &self,
        owner: OwnerId,
        object: &ScriptValue,
        name: &str,
        value: &ScriptValue,
    ) -> Result<(), BridgeError> {
        let view = self.view_of(owner)?;
        let object = self.object_handle(owner, object)?;
        let value = self.marshal(owner, |m| m.to_native(value))?;
        let _guard = self.enter()?;
        Ok(self.native.set_property(view, object, name, value)?)
    }

    fn object_handle(&self, owner: OwnerId, object: &ScriptValue) -> Result<NativeHandle, BridgeError> {
        if object.proxy().is_none() {
            return Err(BridgeError::Type {
                expected: "object",
                got: object.type_name(),
            });
        }
        let native = self.marshal(owner, |m| m.to_native(object))?;
        Ok(native.handle().ok_or(MarshalError::NullHandle)?)
    }

    pub(crate) fn make_array(&self, owner: OwnerId, items: &[ScriptValue]) -> Result<ScriptValue, BridgeError> {
        let view = self.view_of(owner)?;
        let items = self.marshal(owner, |m| m.to_native_args(items))?;
        let handle = {
            let _guard = self.enter()?;
            self.native.make_array(view, items)?
        };
        if handle.is_null() {
            return Err(MarshalError::NullHandle.into());
        }
        let proxy = self
            .registry
            .borrow_mut()
            .adopt(handle, owner, &Refs(&*self.native));
        Ok(ScriptValue::Array(proxy))
    }

    pub(crate) fn release(&self, owner: OwnerId, value: &ScriptValue) -> Result<(), BridgeError> {
        let view = self.view_of(owner)?;
        if let Some(proxy) = value.proxy() {
            self.registry
                .borrow_mut()
                .release(proxy, &Refs(&*self.native))?;
        } else if let ScriptValue::Callback(ManagedCallback::Bound(token)) = value {
            if self.dispatcher.borrow_mut().unregister(*token) {
                let _guard = self.enter()?;
                self.native.unbind_callback(view, *token);
            }
        }
        Ok(())
    }

    pub(crate) fn register_callback(
        &self,
        owner: OwnerId,
        name: &str,
        callback: Callback,
    ) -> Result<CallbackToken, BridgeError> {
        let view = self.view_of(owner)?;
        let token = self
            .dispatcher
            .borrow_mut()
            .register(owner, Some(name), callback)?;

        let bound = self
            .enter()
            .map_err(BridgeError::from)
            .and_then(|_guard| Ok(self.native.bind_callback(view, name, token)?));
        if let Err(err) = bound {
            self.dispatcher.borrow_mut().unregister(token);
            return Err(err);
        }
        tracing::debug!("{} bound '{}' as {}", owner, name, token);
        Ok(token)
    }

    pub(crate) fn resize(&self, owner: OwnerId, width: u32, height: u32) -> Result<(), BridgeError> {
        let view = self.view_of(owner)?;
        {
            let _guard = self.enter()?;
            self.native.resize(view, width, height)?;
        }
        self.shared_of(owner)?.set_size(width, height);
        Ok(())
    }

    pub(crate) fn set_paint_handler(&self, owner: OwnerId, handler: PaintHandler) -> Result<(), BridgeError> {
        let mut sessions = self.sessions.borrow_mut();
        let entry = sessions.get_mut(&owner).ok_or(BridgeError::SessionClosed(owner))?;
        entry.paint = Some(Rc::new(handler));
        Ok(())
    }

    pub(crate) fn set_event_handler(&self, owner: OwnerId, handler: EventHandler) -> Result<(), BridgeError> {
        let mut sessions = self.sessions.borrow_mut();
        let entry = sessions.get_mut(&owner).ok_or(BridgeError::SessionClosed(owner))?;
        entry.events = Some(Rc::new(handler));
        Ok(())
    }

    /// Drop every trace of `owner`: callbacks first, then proxies (the view
    /// included), then render targets.
    pub(crate) fn teardown(&self, owner: OwnerId) {
        let entry = self.sessions.borrow_mut().remove(&owner);
        let Some(entry) = entry else {
            return;
        };
        let view = entry.view.handle();

        let tokens = self.dispatcher.borrow_mut().invalidate_owner(owner);
        for token in &tokens {
            self.native.unbind_callback(view, *token);
        }
        let released = self
            .registry
            .borrow_mut()
            .release_owned_by(owner, &Refs(&*self.native));
        let targets = self.surfaces.borrow_mut().invalidate_owner(view.as_raw());

        entry.shared.mark_destroyed();
        self.retired.borrow_mut().push(owner);
        tracing::info!(
            "Destroyed {}: {} callbacks, {} proxies, {} render targets",
            owner,
            tokens.len(),
            released,
            targets.len()
        );
    }

    // ------------------------------------------------------------------
    // Managed callbacks
    // ------------------------------------------------------------------

    /// Run a registered callback on behalf of the host.
    pub(crate) fn invoke_registered(
        &self,
        token: CallbackToken,
        this: ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, BridgeError> {
        let resolved = self.dispatcher.borrow_mut().resolve(token)?;
        let invocation = Invocation::new(this, args);
        Ok(match run_managed(&resolved, &invocation) {
            Ok(value) => value,
            Err(thrown) => thrown_exception(thrown),
        })
    }

    pub(crate) fn invoke_callback(
        &self,
        view: NativeHandle,
        token: CallbackToken,
        this: NativeValue,
        args: Vec<NativeValue>,
    ) -> NativeValue {
        let Ok(resolved) = self.dispatcher.borrow_mut().resolve(token) else {
            return NativeValue::Undefined;
        };
        tracing::trace!("Upcall {} from view {}", token, view);

        let invocation = match self.marshal(resolved.owner, |m| m.invocation(this, args)) {
            Ok(invocation) => invocation,
            Err(err) => {
                tracing::warn!("Arguments for {} could not be marshalled: {}", token, err);
                return NativeValue::exception(err.to_string(), NativeValue::Undefined);
            }
        };
        let result = run_managed(&resolved, &invocation);
        drop(invocation);
        self.marshal(resolved.owner, |m| m.callback_result(result))
    }

    // ------------------------------------------------------------------
    // Native upcalls
    // ------------------------------------------------------------------

    pub(crate) fn post_event(&self, view: NativeHandle, event: ViewEvent) {
        let found = self
            .sessions
            .borrow()
            .iter()
            .find(|(_, entry)| entry.view.handle() == view)
            .map(|(owner, entry)| (*owner, entry.shared.clone(), entry.events.clone()));
        let Some((owner, shared, handler)) = found else {
            tracing::debug!("Dropping event for unknown view {}", view);
            return;
        };

        if let ViewEvent::ConsoleMessage { level, message, .. } = &event {
            tracing::debug!("{} console {:?}: {}", owner, level, message);
        }
        shared.apply_event(&event);
        if let Some(handler) = handler {
            handler(&event);
        }
    }

    pub(crate) fn submit_batch(&self, batch: DrawBatch) -> Result<ReplayReport, SurfaceError> {
        let report = self.surfaces.borrow_mut().submit(&batch)?;

        let painted: Vec<(Rc<PaintHandler>, SurfaceFrame)> = {
            let sessions = self.sessions.borrow();
            report
                .frames
                .iter()
                .filter_map(|frame| {
                    sessions
                        .values()
                        .find(|entry| entry.view.handle().as_raw() == frame.view)
                        .and_then(|entry| entry.paint.clone())
                        .map(|handler| (handler, *frame))
                })
                .collect()
        };
        for (handler, frame) in painted {
            handler(&frame);
        }
        Ok(report)
    }

    pub(crate) fn resource(&self, notice: ResourceNotice) -> Result<(), SurfaceError> {
        let result = self.surfaces.borrow_mut().apply(notice);
        if let Err(err) = &result {
            if err.is_stale() {
                tracing::debug!("Ignoring resource notice: {}", err);
            } else {
                tracing::warn!("Resource notice rejected: {}", err);
            }
        }
        result
    }

    pub(crate) fn pin(&self, handle: NativeHandle) -> bool {
        self.registry.borrow_mut().pin(handle).is_ok()
    }

    pub(crate) fn unpin(&self, handle: NativeHandle) -> bool {
        self.registry.borrow_mut().unpin(handle).is_ok()
    }

    pub(crate) fn object_destroyed(&self, handle: NativeHandle) -> bool {
        self.registry.borrow_mut().invalidate(handle)
    }

    // ------------------------------------------------------------------
    // Engine
    // ------------------------------------------------------------------

    pub(crate) fn update(&self) -> Result<(), BridgeError> {
        let _guard = self.enter()?;
        self.native.update();
        Ok(())
    }

    pub(crate) fn render(&self) -> Result<(), BridgeError> {
        let _guard = self.enter()?;
        self.native.render();
        Ok(())
    }

    /// Forget owners torn down by an earlier job. Jobs queued before the
    /// teardown have run by now and later ones fail the session lookup.
    fn forget_retired(&self) {
        let owners: Vec<OwnerId> = self.retired.borrow_mut().drain(..).collect();
        if owners.is_empty() {
            return;
        }
        let mut dispatcher = self.dispatcher.borrow_mut();
        for owner in &owners {
            dispatcher.forget_owner(*owner);
        }
        tracing::trace!("Forgot {} closed owners", owners.len());
    }

    /// Perform the native releases queued by dropped proxies.
    pub(crate) fn flush(&self) -> usize {
        let Ok(mut registry) = self.registry.try_borrow_mut() else {
            return 0;
        };
        registry.drain_finalized(&Refs(&*self.native))
    }

    pub(crate) fn stats(&self) -> EngineStats {
        let registry = self.registry.borrow();
        let dispatcher = self.dispatcher.borrow();
        let surfaces = self.surfaces.borrow();
        let bridge = surfaces.stats();
        EngineStats {
            sessions: self.sessions.borrow().len(),
            proxies: registry.len(),
            pending_finalizations: registry.pending_finalizations(),
            callbacks: dispatcher.len(),
            closed_owners: dispatcher.closed_owners(),
            render_targets: surfaces.map().live_target_count(),
            textures: surfaces.map().texture_count(),
            geometry: surfaces.map().geometry_count(),
            batches_replayed: bridge.batches_replayed,
            batches_dropped: bridge.batches_dropped,
            commands_replayed: bridge.commands_replayed,
            call_depth_limit: self.limit,
        }
    }

    /// Tear down every session and release everything still held.
    pub(crate) fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        let owners: Vec<OwnerId> = self.sessions.borrow().keys().copied().collect();
        for owner in owners {
            self.teardown(owner);
        }

        let refs = Refs(&*self.native);
        let drained = self.registry.borrow_mut().drain_finalized(&refs);
        let released = self.registry.borrow_mut().release_all(&refs);
        self.surfaces.borrow_mut().release_all();
        tracing::info!("Engine closed ({} finalized, {} released)", drained, released);
    }
}

impl EngineState for EngineCore {
    fn before_job(&self) {
        self.forget_retired();
        let drained = self.flush();
        if drained > 0 {
            tracing::trace!("Finalized {} proxies", drained);
        }
    }

    fn on_shutdown(&self) {
        self.close();
    }
}

/// Run a managed callback; a panic is thrown into the caller as an exception.
fn run_managed(resolved: &ResolvedCallback, invocation: &Invocation) -> Result<ScriptValue, ScriptValue> {
    panic::catch_unwind(AssertUnwindSafe(|| (resolved.callback)(invocation))).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!("Callback {} ({:?}) panicked: {}", resolved.token, resolved.name, message);
        Err(ScriptValue::exception(format!("callback panicked: {}", message)))
    })
}

fn thrown_exception(thrown: ScriptValue) -> ScriptValue {
    match thrown {
        ScriptValue::Exception(exception) => ScriptValue::Exception(exception),
        other => ScriptValue::Exception(Box::new(ScriptException {
            message: ScriptString::from(other.to_string()),
            value: other,
        })),
    }
}

/// Runs [`ScriptFunction::call`] through the engine queue
#[derive(Default)]
pub(crate) struct QueueInvoker {
    queue: OnceLock<EngineQueue<EngineCore>>,
}

impl QueueInvoker {
    pub(crate) fn attach(&self, queue: EngineQueue<EngineCore>) {
        let _ = self.queue.set(queue);
    }
}

impl FunctionInvoker for QueueInvoker {
    fn invoke(
        &self,
        function: &ScriptFunction,
        this: ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, BoxError> {
        let queue = self.queue.get().ok_or(DispatchError::QueueClosed)?;
        let owner = function.owner();
        let function = ScriptValue::Function(function.clone());
        let result = queue.execute(move |core| core.call_function(owner, &function, &this, &args))?;
        Ok(result?)
    }
}
