//! QuickJS native engine

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use rquickjs::function::{Rest, This};
use rquickjs::{Array, Context, Ctx, Object, Persistent, Runtime, Value};
use vela_gpu::{DrawBatch, GeometryId, GpuState, RenderTargetDesc, RenderTargetId, ResourceNotice};
use vela_view::{
    CallbackToken, ConsoleLevel, FrameInfo, NativeEngine, NativeError, NativeHandle, NativeValue, UpcallSink,
    ViewConfig, ViewEvent,
};

use crate::bindings::{self, Scope, Shared, js_error, lossy};
use crate::scene::Scene;
use crate::table::SlotKind;
use crate::{QuickJsConfig, console, loader};

struct JsView {
    context: Context,
    refs: u32,
    width: u32,
    height: u32,
    url: String,
    background: [u8; 4],
    javascript: bool,
    scene: Rc<RefCell<Scene>>,
    target: Option<RenderTargetId>,
    geometry: Option<GeometryId>,
    sequence: u64,
    user_agent: String,
    callbacks: HashMap<CallbackToken, String>,
    /// Objects the host stored into JS properties, by (holder, property)
    held: HashMap<(NativeHandle, String), NativeHandle>,
}

impl JsView {
    fn holds(&self, object: NativeHandle) -> bool {
        self.held.values().any(|held| *held == object)
    }
}

/// Upcall that may not run where it arises.
///
/// `release` must not call back into the facade, so what it causes waits
/// here until the next top-level engine call.
enum Deferred {
    Resource(ResourceNotice),
    Unpin(NativeHandle),
    RetireView(NativeHandle),
}

/// Clears the busy flag on drop.
struct BusyGuard<'a> {
    busy: &'a Cell<bool>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.set(false);
    }
}

/// [`NativeEngine`] backed by QuickJS
///
/// One runtime per engine, one context per view. QuickJS cannot be entered
/// while it is running, so nested native calls are refused: the engine
/// reports a call depth of one and fails re-entrant calls as busy.
pub struct QuickJsEngine {
    shared: Rc<Shared>,
    views: RefCell<HashMap<NativeHandle, JsView>>,
    dead_views: RefCell<Vec<JsView>>,
    dead_ids: RefCell<Vec<Persistent<Object<'static>>>>,
    dead_contexts: RefCell<Vec<Context>>,
    deferred: RefCell<Vec<Deferred>>,
    next_resource: Cell<u32>,
    busy: Cell<bool>,
    config: QuickJsConfig,
    // Dropped last; everything above may hold values of this runtime.
    runtime: Runtime,
}

impl QuickJsEngine {
    pub fn new(sink: UpcallSink) -> Result<Self, NativeError> {
        Self::with_config(sink, QuickJsConfig::default())
    }

    pub fn with_config(sink: UpcallSink, config: QuickJsConfig) -> Result<Self, NativeError> {
        tracing::info!("Creating QuickJS runtime");
        let runtime = Runtime::new().map_err(js_error)?;
        runtime.set_memory_limit(config.memory_limit);
        runtime.set_max_stack_size(config.max_stack_size);

        Ok(Self {
            shared: Rc::new(Shared::new(sink)),
            views: RefCell::new(HashMap::new()),
            dead_views: RefCell::new(Vec::new()),
            dead_ids: RefCell::new(Vec::new()),
            dead_contexts: RefCell::new(Vec::new()),
            deferred: RefCell::new(Vec::new()),
            next_resource: Cell::new(0),
            busy: Cell::new(false),
            config,
            runtime,
        })
    }

    pub fn config(&self) -> &QuickJsConfig {
        &self.config
    }

    /// Live views.
    pub fn view_count(&self) -> usize {
        self.views.borrow().len()
    }

    /// Exported JS values still tracked.
    pub fn exported_count(&self) -> usize {
        self.shared.table.borrow().len()
    }

    fn next_resource(&self) -> u32 {
        let id = self.next_resource.get() + 1;
        self.next_resource.set(id);
        id
    }

    fn unknown_view(view: NativeHandle) -> NativeError {
        NativeError::new(format!("unknown view {}", view))
    }

    fn context(&self, view: NativeHandle) -> Result<Context, NativeError> {
        self.views
            .borrow()
            .get(&view)
            .map(|v| v.context.clone())
            .ok_or_else(|| Self::unknown_view(view))
    }

    /// Drop released values and views. No-op while QuickJS is running.
    fn collect(&self) {
        if self.busy.get() {
            return;
        }
        let (swept, values) = {
            let mut table = self.shared.table.borrow_mut();
            let swept = table.sweep();
            (swept, table.take_graveyard())
        };
        let freed = values.len();
        drop(values);
        self.dead_ids.borrow_mut().clear();
        self.dead_contexts.borrow_mut().clear();
        let views = std::mem::take(&mut *self.dead_views.borrow_mut());
        let destroyed = views.len();
        drop(views);
        if freed > 0 || destroyed > 0 {
            tracing::trace!("Freed {} values ({} unretained), {} views", freed, swept, destroyed);
        }
    }

    /// Send the upcalls deferred by `release`. No-op while QuickJS is running.
    fn flush_deferred(&self) {
        if self.busy.get() {
            return;
        }
        let deferred = std::mem::take(&mut *self.deferred.borrow_mut());
        for upcall in deferred {
            match upcall {
                Deferred::Resource(notice) => {
                    if let Err(err) = self.shared.sink.resource(notice) {
                        tracing::debug!("Deferred notice dropped: {}", err);
                    }
                }
                Deferred::Unpin(object) => {
                    self.shared.sink.release_object(object);
                }
                Deferred::RetireView(view) => self.destroy_exports(view),
            }
        }
    }

    /// Drop every value `view` exported and tell the facade about the ones
    /// it still referenced.
    fn destroy_exports(&self, view: NativeHandle) {
        let destroyed = self.shared.table.borrow_mut().retire_view(view);
        for object in &destroyed {
            self.shared.sink.object_destroyed(*object);
        }
        if !destroyed.is_empty() {
            tracing::debug!("Destroyed {} exported values of view {}", destroyed.len(), view);
        }
    }

    /// Replace the view's context with a fresh one for a new page.
    ///
    /// Values of the old page die with it. Host callbacks are bound again in
    /// the new global scope.
    fn navigate(&self, view: NativeHandle) -> Result<(), NativeError> {
        let (scene, user_agent, callbacks) = self
            .views
            .borrow()
            .get(&view)
            .map(|v| (v.scene.clone(), v.user_agent.clone(), v.callbacks.clone()))
            .ok_or_else(|| Self::unknown_view(view))?;

        let context = Context::full(&self.runtime).map_err(js_error)?;
        let ids = self.run_in(&context, |ctx| {
            let install = || -> rquickjs::Result<Persistent<Object<'static>>> {
                let ids = install_view(&ctx, &self.shared, view, scene, &user_agent)?;
                for (token, name) in &callbacks {
                    bindings::bind_global(&ctx, self.shared.clone(), view, name, *token)?;
                }
                Ok(ids)
            };
            install().map_err(js_error)
        })?;
        if let Some(old) = self.shared.set_ids(view, ids) {
            self.dead_ids.borrow_mut().push(old);
        }

        let (old, held) = {
            let mut views = self.views.borrow_mut();
            let v = views.get_mut(&view).ok_or_else(|| Self::unknown_view(view))?;
            (std::mem::replace(&mut v.context, context), std::mem::take(&mut v.held))
        };
        self.dead_contexts.borrow_mut().push(old);

        let mut unpinned: Vec<NativeHandle> = held.into_values().collect();
        unpinned.sort_unstable();
        unpinned.dedup();
        for object in unpinned {
            self.shared.sink.release_object(object);
        }
        self.destroy_exports(view);
        Ok(())
    }

    /// Run `f` inside `context`, refusing if QuickJS is already running.
    fn run_in<R>(
        &self,
        context: &Context,
        f: impl FnOnce(Ctx<'_>) -> Result<R, NativeError>,
    ) -> Result<R, NativeError> {
        if self.busy.get() {
            tracing::warn!("Refusing re-entrant QuickJS call");
            return Err(NativeError::new("QuickJS is busy"));
        }
        self.flush_deferred();
        self.collect();
        self.busy.set(true);
        let _guard = BusyGuard { busy: &self.busy };
        context.with(f)
    }

    /// Track that `holder.name` now refers to `stored`, pinning it for the
    /// facade and unpinning what the property referred to before.
    fn hold(&self, view: NativeHandle, holder: NativeHandle, name: &str, stored: Option<NativeHandle>) {
        let (previous, still_held) = {
            let mut views = self.views.borrow_mut();
            let Some(v) = views.get_mut(&view) else {
                return;
            };
            let key = (holder, name.to_string());
            let previous = match stored {
                Some(object) => v.held.insert(key, object),
                None => v.held.remove(&key),
            };
            (previous, previous.is_some_and(|object| v.holds(object)))
        };
        if previous == stored {
            return;
        }
        if let Some(object) = stored {
            if !self.shared.sink.retain_object(object) {
                tracing::debug!("Facade does not track {}", object);
            }
        }
        if let Some(object) = previous.filter(|_| !still_held) {
            self.shared.sink.release_object(object);
        }
    }

    fn post(&self, view: NativeHandle, event: ViewEvent) {
        self.shared.sink.post_event(view, event);
    }

    fn run_page_scripts(&self, view: NativeHandle, source_id: &str, scripts: Vec<String>) -> Result<(), NativeError> {
        for script in scripts {
            if let NativeValue::Exception { message, .. } = self.evaluate(view, &script)? {
                let message = lossy(&message);
                tracing::warn!("Uncaught exception in {}: {}", source_id, message);
                self.post(
                    view,
                    ViewEvent::ConsoleMessage {
                        level: ConsoleLevel::Error,
                        message,
                        source_id: source_id.to_string(),
                        line: 0,
                        column: 0,
                    },
                );
            }
        }
        Ok(())
    }
}

fn install_view<'js>(
    ctx: &Ctx<'js>,
    shared: &Rc<Shared>,
    view: NativeHandle,
    scene: Rc<RefCell<Scene>>,
    user_agent: &str,
) -> rquickjs::Result<Persistent<Object<'static>>> {
    console::install_console(ctx, shared.clone(), view)?;
    bindings::install_host_api(ctx, shared.clone(), view, scene, user_agent)?;
    let ids: Object<'js> = ctx.eval("new WeakMap()")?;
    Ok(Persistent::save(ctx, ids))
}

impl NativeEngine for QuickJsEngine {
    /// QuickJS contexts are not re-entrant.
    fn max_call_depth(&self) -> usize {
        1
    }

    fn create_view(&self, config: &ViewConfig) -> Result<NativeHandle, NativeError> {
        let context = Context::full(&self.runtime).map_err(js_error)?;
        let view = self.shared.allocate();
        let background = if config.transparent { [0; 4] } else { config.background };
        let scene = Rc::new(RefCell::new(Scene::new(background)));

        let ids = self.run_in(&context, |ctx| {
            install_view(&ctx, &self.shared, view, scene.clone(), &config.user_agent).map_err(js_error)
        })?;
        if let Some(old) = self.shared.set_ids(view, ids) {
            self.dead_ids.borrow_mut().push(old);
        }

        self.views.borrow_mut().insert(
            view,
            JsView {
                context,
                refs: 1,
                width: config.width,
                height: config.height,
                url: String::new(),
                background,
                javascript: config.enable_javascript,
                scene,
                target: None,
                geometry: None,
                sequence: 0,
                user_agent: config.user_agent.clone(),
                callbacks: HashMap::new(),
                held: HashMap::new(),
            },
        );
        tracing::debug!("Created QuickJS view {} ({}x{})", view, config.width, config.height);
        Ok(view)
    }

    fn load_url(&self, view: NativeHandle, url: &str) -> Result<(), NativeError> {
        self.collect();
        let javascript = self
            .views
            .borrow()
            .get(&view)
            .map(|v| v.javascript)
            .ok_or_else(|| Self::unknown_view(view))?;

        self.post(view, ViewEvent::BeginLoading(FrameInfo::main(url)));
        let page = match loader::fetch(url) {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!("Failed to load {}: {}", url, err);
                self.post(
                    view,
                    ViewEvent::FailLoading {
                        frame: FrameInfo::main(url),
                        description: err.to_string(),
                        error_domain: err.domain().to_string(),
                        error_code: err.code(),
                    },
                );
                return Ok(());
            }
        };

        self.navigate(view)?;
        if let Some(v) = self.views.borrow_mut().get_mut(&view) {
            v.url = page.url.clone();
            let mut scene = v.scene.borrow_mut();
            scene.clear_rects();
            scene.set_background(v.background);
        }

        let frame = FrameInfo::main(page.url.clone());
        self.post(view, ViewEvent::UrlChanged(page.url.clone()));
        self.post(view, ViewEvent::WindowObjectReady(frame.clone()));
        if let Some(title) = page.title() {
            self.post(view, ViewEvent::TitleChanged(title));
        }
        if javascript {
            self.run_page_scripts(view, &page.url, page.scripts())?;
        }
        self.post(view, ViewEvent::DomReady(frame.clone()));
        self.post(view, ViewEvent::FinishLoading(frame));
        tracing::info!("Loaded {} into view {}", page.url, view);
        Ok(())
    }

    fn reload(&self, view: NativeHandle) -> Result<(), NativeError> {
        let url = self
            .views
            .borrow()
            .get(&view)
            .map(|v| v.url.clone())
            .ok_or_else(|| Self::unknown_view(view))?;
        let url = if url.is_empty() { "about:blank".to_string() } else { url };
        self.load_url(view, &url)
    }

    fn evaluate(&self, view: NativeHandle, script: &str) -> Result<NativeValue, NativeError> {
        let context = self.context(view)?;
        self.run_in(&context, |ctx| {
            let scope = Scope::new(&ctx, &self.shared, view);
            match ctx.eval::<Value, _>(script) {
                Ok(value) => scope.from_js(value).map_err(|err| scope.failed(err)),
                Err(err) => scope.caught(err),
            }
        })
    }

    fn call_function(
        &self,
        view: NativeHandle,
        function: NativeHandle,
        this: NativeValue,
        args: Vec<NativeValue>,
    ) -> Result<NativeValue, NativeError> {
        let context = self.context(view)?;
        self.run_in(&context, |ctx| {
            let scope = Scope::new(&ctx, &self.shared, view);
            let Some(callee) = scope.lookup(function)?.into_function() else {
                return Err(NativeError::new(format!("{} is not a function", function)));
            };
            let this = scope.to_js(this).map_err(|err| scope.failed(err))?;
            let args = args
                .into_iter()
                .map(|arg| scope.to_js(arg))
                .collect::<rquickjs::Result<Vec<_>>>()
                .map_err(|err| scope.failed(err))?;

            let result: rquickjs::Result<Value> = callee.call((This(this), Rest(args)));
            match result {
                Ok(value) => scope.from_js(value).map_err(|err| scope.failed(err)),
                Err(err) => scope.caught(err),
            }
        })
    }

    fn get_property(&self, view: NativeHandle, object: NativeHandle, name: &str) -> Result<NativeValue, NativeError> {
        let context = self.context(view)?;
        self.run_in(&context, |ctx| {
            let scope = Scope::new(&ctx, &self.shared, view);
            let Some(target) = scope.lookup(object)?.into_object() else {
                return Err(NativeError::new(format!("{} is not an object", object)));
            };
            match target.get::<_, Value>(name) {
                Ok(value) => scope.from_js(value).map_err(|err| scope.failed(err)),
                Err(err) => scope.caught(err),
            }
        })
    }

    fn set_property(
        &self,
        view: NativeHandle,
        object: NativeHandle,
        name: &str,
        value: NativeValue,
    ) -> Result<(), NativeError> {
        let context = self.context(view)?;
        let stored = value.handle();
        self.run_in(&context, |ctx| {
            let scope = Scope::new(&ctx, &self.shared, view);
            let Some(target) = scope.lookup(object)?.into_object() else {
                return Err(NativeError::new(format!("{} is not an object", object)));
            };
            let value = scope.to_js(value).map_err(|err| scope.failed(err))?;
            target.set(name, value).map_err(|err| scope.failed(err))
        })?;
        self.hold(view, object, name, stored);
        Ok(())
    }

    fn make_array(&self, view: NativeHandle, items: Vec<NativeValue>) -> Result<NativeHandle, NativeError> {
        let context = self.context(view)?;
        let handle = self.run_in(&context, |ctx| {
            let scope = Scope::new(&ctx, &self.shared, view);
            let build = || -> rquickjs::Result<NativeHandle> {
                let array = Array::new(ctx.clone())?;
                for (i, item) in items.into_iter().enumerate() {
                    array.set(i, scope.to_js(item)?)?;
                }
                scope.export(array.into_value(), SlotKind::Array)
            };
            build().map_err(|err| scope.failed(err))
        })?;
        // The caller owns the new array.
        self.shared.table.borrow_mut().retain(handle);
        Ok(handle)
    }

    fn bind_callback(&self, view: NativeHandle, name: &str, token: CallbackToken) -> Result<(), NativeError> {
        let context = self.context(view)?;
        self.run_in(&context, |ctx| {
            bindings::bind_global(&ctx, self.shared.clone(), view, name, token).map_err(js_error)
        })?;

        if let Some(v) = self.views.borrow_mut().get_mut(&view) {
            v.callbacks.insert(token, name.to_string());
        }
        tracing::debug!("Bound {} as '{}' in view {}", token, name, view);
        Ok(())
    }

    fn unbind_callback(&self, view: NativeHandle, token: CallbackToken) {
        let name = self
            .views
            .borrow_mut()
            .get_mut(&view)
            .and_then(|v| v.callbacks.remove(&token));
        let Some(name) = name else {
            return;
        };
        let Ok(context) = self.context(view) else {
            return;
        };
        // A stale global only ever resolves to undefined.
        let removed = self.run_in(&context, |ctx| ctx.globals().remove(name.as_str()).map_err(js_error));
        if let Err(err) = removed {
            tracing::debug!("Left '{}' bound in view {}: {}", name, view, err);
        }
    }

    fn resize(&self, view: NativeHandle, width: u32, height: u32) -> Result<(), NativeError> {
        let old = {
            let mut views = self.views.borrow_mut();
            let v = views.get_mut(&view).ok_or_else(|| Self::unknown_view(view))?;
            v.width = width;
            v.height = height;
            v.scene.borrow_mut().mark_dirty();
            v.target.take()
        };
        if let Some(id) = old {
            if let Err(err) = self
                .shared
                .sink
                .resource(ResourceNotice::ResizeRenderTarget { id, width, height })
            {
                tracing::debug!("Resize of {} not applied: {}", id, err);
            }
        }
        tracing::debug!("Resized view {} to {}x{}", view, width, height);
        Ok(())
    }

    fn update(&self) {
        self.flush_deferred();
        self.collect();
        if self.busy.get() {
            return;
        }
        self.busy.set(true);
        let _guard = BusyGuard { busy: &self.busy };

        let (mut ran, mut failed) = (0, 0);
        while ran + failed < self.config.max_jobs_per_update {
            match self.runtime.execute_pending_job() {
                Ok(true) => ran += 1,
                Ok(false) => break,
                Err(_) => failed += 1,
            }
        }
        if failed > 0 {
            tracing::warn!("{} pending jobs threw", failed);
        }
        if ran > 0 {
            tracing::trace!("Ran {} pending jobs", ran);
        }
    }

    fn render(&self) {
        self.flush_deferred();
        self.collect();

        let mut notices = Vec::new();
        let mut batches = Vec::new();
        {
            let mut views = self.views.borrow_mut();
            for (handle, v) in views.iter_mut() {
                let mut scene = v.scene.borrow_mut();
                if !scene.take_dirty() && v.target.is_some() {
                    continue;
                }

                let target = match v.target {
                    Some(target) => target,
                    None => {
                        let id = RenderTargetId(self.next_resource());
                        notices.push(ResourceNotice::DefineRenderTarget {
                            id,
                            desc: RenderTargetDesc::new(v.width, v.height),
                            view: handle.as_raw(),
                        });
                        v.target = Some(id);
                        id
                    }
                };

                v.sequence += 1;
                let mut batch = DrawBatch::new(v.sequence).clear(target);
                if let Some(data) = scene.geometry(v.width, v.height) {
                    let count = data.indices.len() as u32;
                    let geometry = match v.geometry {
                        Some(id) => {
                            notices.push(ResourceNotice::UpdateGeometry { id, data });
                            id
                        }
                        None => {
                            let id = GeometryId(self.next_resource());
                            notices.push(ResourceNotice::DefineGeometry { id, data });
                            v.geometry = Some(id);
                            id
                        }
                    };
                    let state = GpuState::new(target, v.width, v.height).with_blend(true);
                    batch = batch.draw(state, geometry, 0, count);
                }
                batches.push(batch);
            }
        }

        for notice in notices {
            if let Err(err) = self.shared.sink.resource(notice) {
                tracing::warn!("Resource notice rejected: {}", err);
            }
        }
        for batch in batches {
            match self.shared.sink.submit_batch(batch) {
                Ok(report) => tracing::trace!("Painted {} frames", report.frames.len()),
                Err(err) if err.is_stale() => tracing::debug!("Dropped stale paint: {}", err),
                Err(err) => tracing::warn!("Paint failed: {}", err),
            }
        }
    }

    fn retain(&self, handle: NativeHandle) {
        if let Some(v) = self.views.borrow_mut().get_mut(&handle) {
            v.refs += 1;
            return;
        }
        if !self.shared.table.borrow_mut().retain(handle) {
            tracing::warn!("Retain of unknown handle {}", handle);
        }
    }

    fn release(&self, handle: NativeHandle) {
        let mut views = self.views.borrow_mut();
        if let Some(v) = views.get_mut(&handle) {
            v.refs = v.refs.saturating_sub(1);
            if v.refs > 0 {
                return;
            }
            if let Some(v) = views.remove(&handle) {
                let mut deferred = self.deferred.borrow_mut();
                if let Some(id) = v.geometry {
                    deferred.push(Deferred::Resource(ResourceNotice::DestroyGeometry { id }));
                }
                if let Some(id) = v.target {
                    deferred.push(Deferred::Resource(ResourceNotice::DestroyRenderTarget { id }));
                }
                let mut unpinned: Vec<NativeHandle> = v.held.values().copied().collect();
                unpinned.sort_unstable();
                unpinned.dedup();
                deferred.extend(unpinned.into_iter().map(Deferred::Unpin));
                deferred.push(Deferred::RetireView(handle));
                self.dead_views.borrow_mut().push(v);
            }
            if let Some(ids) = self.shared.remove_ids(handle) {
                self.dead_ids.borrow_mut().push(ids);
            }
            tracing::debug!("Destroyed QuickJS view {}", handle);
            return;
        }

        let released = self.shared.table.borrow_mut().release(handle);
        if !released {
            tracing::warn!("Release of unknown handle {}", handle);
            return;
        }
        if self.shared.table.borrow().contains(handle) {
            return;
        }
        // What the released object held is no longer held through it.
        for v in views.values_mut() {
            let orphaned: Vec<NativeHandle> = v
                .held
                .iter()
                .filter(|((holder, _), _)| *holder == handle)
                .map(|(_, object)| *object)
                .collect();
            if orphaned.is_empty() {
                continue;
            }
            v.held.retain(|(holder, _), _| *holder != handle);
            let mut deferred = self.deferred.borrow_mut();
            for object in orphaned {
                if !v.holds(object) {
                    deferred.push(Deferred::Unpin(object));
                }
            }
        }
    }
}

impl Drop for QuickJsEngine {
    fn drop(&mut self) {
        let values = self.shared.table.borrow_mut().drain();
        let ids = self.shared.drain_ids();
        let exported = values.len();
        drop(values);
        drop(ids);
        self.dead_ids.borrow_mut().clear();
        self.deferred.borrow_mut().clear();
        self.dead_views.borrow_mut().clear();
        self.views.borrow_mut().clear();
        self.dead_contexts.borrow_mut().clear();
        tracing::debug!("QuickJS engine dropped ({} exported values freed)", exported);
    }
}

impl std::fmt::Debug for QuickJsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickJsEngine")
            .field("views", &self.view_count())
            .field("exported", &self.exported_count())
            .field("busy", &self.busy.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_view() -> (QuickJsEngine, NativeHandle) {
        let engine = QuickJsEngine::new(UpcallSink::default()).unwrap();
        let view = engine.create_view(&ViewConfig::new(16, 16)).unwrap();
        (engine, view)
    }

    #[test]
    fn test_evaluate_number() {
        let (engine, view) = engine_with_view();
        assert_eq!(engine.evaluate(view, "1+1").unwrap(), NativeValue::Number(2.0));
    }

    #[test]
    fn test_evaluate_string() {
        let (engine, view) = engine_with_view();
        assert_eq!(
            engine.evaluate(view, "'a' + 'b'").unwrap(),
            NativeValue::string("ab")
        );
    }

    #[test]
    fn test_throw_becomes_exception_value() {
        let (engine, view) = engine_with_view();
        let result = engine.evaluate(view, "throw new TypeError('boom')").unwrap();
        match result {
            NativeValue::Exception { message, .. } => {
                assert_eq!(lossy(&message), "TypeError: boom");
            }
            other => panic!("expected exception, got {:?}", other),
        }
    }

    #[test]
    fn test_borrowed_objects_swept_on_next_call() {
        let (engine, view) = engine_with_view();
        let result = engine.evaluate(view, "({ a: 1 })").unwrap();
        assert!(matches!(result, NativeValue::Object(_)));
        assert_eq!(engine.exported_count(), 1);

        engine.evaluate(view, "0").unwrap();
        assert_eq!(engine.exported_count(), 0);
    }

    #[test]
    fn test_retained_object_properties() {
        let (engine, view) = engine_with_view();
        let NativeValue::Object(object) = engine.evaluate(view, "({ a: 1 })").unwrap() else {
            panic!("expected object");
        };
        engine.retain(object);

        engine.set_property(view, object, "b", NativeValue::string("two")).unwrap();
        assert_eq!(engine.get_property(view, object, "a").unwrap(), NativeValue::Number(1.0));
        assert_eq!(engine.get_property(view, object, "b").unwrap(), NativeValue::string("two"));
        assert_eq!(engine.get_property(view, object, "c").unwrap(), NativeValue::Undefined);

        engine.release(object);
        engine.evaluate(view, "0").unwrap();
        assert_eq!(engine.exported_count(), 0);
        assert!(engine.get_property(view, object, "a").is_err());
    }

    #[test]
    fn test_same_object_same_handle() {
        let (engine, view) = engine_with_view();
        engine.evaluate(view, "globalThis.thing = {}").unwrap();
        let NativeValue::Object(first) = engine.evaluate(view, "thing").unwrap() else {
            panic!("expected object");
        };
        engine.retain(first);
        let NativeValue::Object(second) = engine.evaluate(view, "thing").unwrap() else {
            panic!("expected object");
        };
        assert_eq!(first, second);
    }

    #[test]
    fn test_call_function() {
        let (engine, view) = engine_with_view();
        let NativeValue::Function(add) = engine.evaluate(view, "(function (a, b) { return a + b; })").unwrap() else {
            panic!("expected function");
        };
        engine.retain(add);

        let sum = engine
            .call_function(
                view,
                add,
                NativeValue::Undefined,
                vec![NativeValue::Number(1.0), NativeValue::Number(2.0)],
            )
            .unwrap();
        assert_eq!(sum, NativeValue::Number(3.0));
    }

    #[test]
    fn test_call_non_function_fails() {
        let (engine, view) = engine_with_view();
        let NativeValue::Object(object) = engine.evaluate(view, "({})").unwrap() else {
            panic!("expected object");
        };
        engine.retain(object);
        assert!(engine.call_function(view, object, NativeValue::Undefined, vec![]).is_err());
    }

    #[test]
    fn test_make_array_is_owned() {
        let (engine, view) = engine_with_view();
        let array = engine
            .make_array(view, vec![NativeValue::Number(1.0), NativeValue::string("two"), NativeValue::Null])
            .unwrap();

        // Survives the sweep at the start of the next call.
        assert_eq!(engine.get_property(view, array, "length").unwrap(), NativeValue::Number(3.0));
        assert_eq!(engine.get_property(view, array, "1").unwrap(), NativeValue::string("two"));

        engine.release(array);
        engine.evaluate(view, "0").unwrap();
        assert_eq!(engine.exported_count(), 0);
    }

    #[test]
    fn test_bind_and_unbind_callback() {
        let (engine, view) = engine_with_view();
        engine.bind_callback(view, "hello", CallbackToken(1)).unwrap();
        assert_eq!(engine.evaluate(view, "typeof hello").unwrap(), NativeValue::string("function"));
        // No facade attached: the upcall yields undefined.
        assert_eq!(engine.evaluate(view, "hello(1)").unwrap(), NativeValue::Undefined);

        engine.unbind_callback(view, CallbackToken(1));
        assert_eq!(engine.evaluate(view, "typeof hello").unwrap(), NativeValue::string("undefined"));
    }

    #[test]
    fn test_views_are_isolated() {
        let (engine, first) = engine_with_view();
        let second = engine.create_view(&ViewConfig::new(8, 8)).unwrap();
        engine.evaluate(first, "globalThis.x = 1").unwrap();
        assert_eq!(engine.evaluate(second, "typeof x").unwrap(), NativeValue::string("undefined"));
    }

    #[test]
    fn test_view_released_at_zero() {
        let (engine, view) = engine_with_view();
        engine.retain(view);
        engine.release(view);
        assert_eq!(engine.view_count(), 1);
        engine.release(view);
        assert_eq!(engine.view_count(), 0);
        assert!(engine.evaluate(view, "1").is_err());
    }

    #[test]
    fn test_pending_jobs_run_on_update() {
        let (engine, view) = engine_with_view();
        engine
            .evaluate(view, "globalThis.done = false; Promise.resolve().then(() => { globalThis.done = true; })")
            .unwrap();
        engine.update();
        assert_eq!(engine.evaluate(view, "done").unwrap(), NativeValue::Boolean(true));
    }

    #[test]
    fn test_load_runs_page_scripts() {
        let (engine, view) = engine_with_view();
        engine
            .load_url(view, "data:text/javascript,globalThis.loaded=40%2B2")
            .unwrap();
        assert_eq!(engine.evaluate(view, "loaded").unwrap(), NativeValue::Number(42.0));
    }

    #[test]
    fn test_javascript_disabled_skips_scripts() {
        let engine = QuickJsEngine::new(UpcallSink::default()).unwrap();
        let view = engine
            .create_view(&ViewConfig::new(8, 8).with_javascript(false))
            .unwrap();
        engine
            .load_url(view, "data:text/javascript,globalThis.loaded=1")
            .unwrap();
        assert_eq!(engine.evaluate(view, "typeof loaded").unwrap(), NativeValue::string("undefined"));
    }

    #[test]
    fn test_navigation_starts_fresh_globals() {
        let (engine, view) = engine_with_view();
        engine.bind_callback(view, "hello", CallbackToken(1)).unwrap();
        engine.evaluate(view, "globalThis.x = 1").unwrap();

        engine.load_url(view, "about:blank").unwrap();

        assert_eq!(engine.evaluate(view, "typeof x").unwrap(), NativeValue::string("undefined"));
        assert_eq!(engine.evaluate(view, "typeof hello").unwrap(), NativeValue::string("function"));
        assert_eq!(engine.evaluate(view, "typeof vela.fillRect").unwrap(), NativeValue::string("function"));
    }

    #[test]
    fn test_navigation_retires_exported_values() {
        let (engine, view) = engine_with_view();
        let NativeValue::Object(object) = engine.evaluate(view, "({ a: 1 })").unwrap() else {
            panic!("expected object");
        };
        engine.retain(object);

        engine.load_url(view, "about:blank").unwrap();

        assert_eq!(engine.exported_count(), 0);
        assert!(engine.get_property(view, object, "a").is_err());
    }
}
