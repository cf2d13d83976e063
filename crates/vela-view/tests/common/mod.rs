//! Scripted fake native engine
//!
//! Scripts are one command per call:
//!
//! | script            | effect                                              |
//! |-------------------|-----------------------------------------------------|
//! | `A+B`             | number `A + B`                                      |
//! | `fire NAME N`     | invoke global `NAME` N times with `0..N`            |
//! | `call NAME ARG`   | invoke global `NAME` with string `ARG`, return it   |
//! | `throw MSG`       | exception `MSG`                                     |
//! | `object`          | new object                                          |
//! | `function`        | new function returning the sum of its arguments     |
//! | `title T`         | post `TitleChanged(T)`                              |
//! | `stale`           | submit a batch for the target retired by `resize`   |
//! | `get H`           | return object `H` (raw handle) again                |
//! | `hold H`          | keep object `H` from the native side (pin)          |
//! | `unhold H`        | stop keeping object `H`                             |
//! | `destroy H`       | destroy object `H` without a release                |
//!
//! `FakeRecord::events` keeps unbinds, releases and teardown upcalls in the
//! order they happened.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use vela_gpu::{DrawBatch, RenderTargetDesc, RenderTargetId, ResourceNotice, TraceDriver, TraceLog};
use vela_view::{
    CallbackToken, Engine, EngineConfig, FrameInfo, NativeEngine, NativeError, NativeHandle,
    NativeValue, SurfaceError, UpcallSink, ViewConfig, ViewEvent,
};

/// What the fake saw, readable from the test thread
#[derive(Debug, Default)]
pub struct FakeRecord {
    pub refs: HashMap<u64, i64>,
    pub calls: Vec<String>,
    pub batches: Vec<Result<u64, SurfaceError>>,
    pub unbound: Vec<CallbackToken>,
    pub destroyed_views: Vec<u64>,
    pub events: Vec<String>,
    /// Invoke each callback as it is unbound, like a page unload handler
    pub upcall_on_unbind: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeLog(Arc<Mutex<FakeRecord>>);

impl FakeLog {
    fn with<R>(&self, f: impl FnOnce(&mut FakeRecord) -> R) -> R {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn refcount(&self, handle: NativeHandle) -> i64 {
        self.with(|r| r.refs.get(&handle.as_raw()).copied().unwrap_or(0))
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|r| r.calls.clone())
    }

    pub fn batches(&self) -> Vec<Result<u64, SurfaceError>> {
        self.with(|r| r.batches.clone())
    }

    pub fn unbound(&self) -> Vec<CallbackToken> {
        self.with(|r| r.unbound.clone())
    }

    pub fn destroyed_views(&self) -> Vec<u64> {
        self.with(|r| r.destroyed_views.clone())
    }

    pub fn events(&self) -> Vec<String> {
        self.with(|r| r.events.clone())
    }

    pub fn clear_events(&self) {
        self.with(|r| r.events.clear());
    }

    pub fn set_upcall_on_unbind(&self, enabled: bool) {
        self.with(|r| r.upcall_on_unbind = enabled);
    }
}

struct FakeView {
    width: u32,
    height: u32,
    target: Option<RenderTargetId>,
    retired: Option<RenderTargetId>,
    sequence: u64,
    globals: HashMap<String, CallbackToken>,
}

enum FakeObject {
    Plain(HashMap<String, NativeValue>),
    Function,
    Array(Vec<NativeValue>),
}

pub struct FakeEngine {
    sink: UpcallSink,
    log: FakeLog,
    next_handle: Cell<u64>,
    next_target: Cell<u32>,
    views: RefCell<HashMap<NativeHandle, FakeView>>,
    objects: RefCell<HashMap<NativeHandle, FakeObject>>,
}

impl FakeEngine {
    pub fn new(sink: UpcallSink, log: FakeLog) -> Self {
        Self {
            sink,
            log,
            next_handle: Cell::new(0x1000),
            next_target: Cell::new(1),
            views: RefCell::new(HashMap::new()),
            objects: RefCell::new(HashMap::new()),
        }
    }

    fn record(&self, call: impl Into<String>) {
        let call = call.into();
        self.log.with(|r| r.calls.push(call));
    }

    fn allocate(&self, initial_refs: i64) -> NativeHandle {
        let raw = self.next_handle.get() + 0x10;
        self.next_handle.set(raw);
        self.log.with(|r| r.refs.insert(raw, initial_refs));
        NativeHandle::from_raw(raw)
    }

    fn global(&self, view: NativeHandle, name: &str) -> Option<CallbackToken> {
        self.views
            .borrow()
            .get(&view)
            .and_then(|v| v.globals.get(name).copied())
    }

    fn event(&self, event: String) {
        self.log.with(|r| r.events.push(event));
    }

    fn parse_handle(raw: &str) -> Result<NativeHandle, NativeError> {
        raw.parse()
            .map(NativeHandle::from_raw)
            .map_err(|_| NativeError::new(format!("bad handle {}", raw)))
    }

    fn not_defined(name: &str) -> NativeValue {
        NativeValue::exception(format!("ReferenceError: {} is not defined", name), NativeValue::Undefined)
    }

    fn submit(&self, batch: DrawBatch) {
        let sequence = batch.sequence;
        let result = self.sink.submit_batch(batch).map(|_| sequence);
        self.log.with(|r| r.batches.push(result));
    }
}

impl NativeEngine for FakeEngine {
    fn max_call_depth(&self) -> usize {
        4
    }

    fn create_view(&self, config: &ViewConfig) -> Result<NativeHandle, NativeError> {
        let view = self.allocate(1);
        self.views.borrow_mut().insert(
            view,
            FakeView {
                width: config.width,
                height: config.height,
                target: None,
                retired: None,
                sequence: 0,
                globals: HashMap::new(),
            },
        );
        self.record(format!("create_view {}x{}", config.width, config.height));
        Ok(view)
    }

    fn load_url(&self, view: NativeHandle, url: &str) -> Result<(), NativeError> {
        self.record(format!("load_url {}", url));
        self.sink.post_event(view, ViewEvent::BeginLoading(FrameInfo::main(url)));
        if let Some(reason) = url.strip_prefix("fail:") {
            self.sink.post_event(
                view,
                ViewEvent::FailLoading {
                    frame: FrameInfo::main(url),
                    description: reason.to_string(),
                    error_domain: "fake".into(),
                    error_code: -1,
                },
            );
            return Ok(());
        }
        self.sink.post_event(view, ViewEvent::UrlChanged(url.to_string()));
        self.sink.post_event(view, ViewEvent::FinishLoading(FrameInfo::main(url)));
        Ok(())
    }

    fn reload(&self, view: NativeHandle) -> Result<(), NativeError> {
        self.record("reload");
        self.sink.post_event(view, ViewEvent::BeginLoading(FrameInfo::main("reload")));
        self.sink.post_event(view, ViewEvent::FinishLoading(FrameInfo::main("reload")));
        Ok(())
    }

    fn evaluate(&self, view: NativeHandle, script: &str) -> Result<NativeValue, NativeError> {
        self.record(format!("evaluate {}", script));
        let words: Vec<&str> = script.split_whitespace().collect();

        match words.as_slice() {
            ["fire", name, count] => {
                let Some(token) = self.global(view, name) else {
                    return Ok(Self::not_defined(name));
                };
                let count: u32 = count.parse().map_err(|_| NativeError::new("bad count"))?;
                for i in 0..count {
                    let result = self.sink.invoke_callback(
                        view,
                        token,
                        NativeValue::Undefined,
                        vec![NativeValue::Number(f64::from(i))],
                    );
                    if result.is_exception() {
                        return Ok(result);
                    }
                }
                Ok(NativeValue::Undefined)
            }
            ["call", name, arg] => match self.global(view, name) {
                Some(token) => Ok(self.sink.invoke_callback(
                    view,
                    token,
                    NativeValue::Undefined,
                    vec![NativeValue::string(*arg)],
                )),
                None => Ok(Self::not_defined(name)),
            },
            ["throw", message] => Ok(NativeValue::exception(*message, NativeValue::string(*message))),
            ["object"] => {
                let handle = self.allocate(0);
                self.objects
                    .borrow_mut()
                    .insert(handle, FakeObject::Plain(HashMap::new()));
                Ok(NativeValue::Object(handle))
            }
            ["function"] => {
                let handle = self.allocate(0);
                self.objects.borrow_mut().insert(handle, FakeObject::Function);
                Ok(NativeValue::Function(handle))
            }
            ["title", title] => {
                self.sink.post_event(view, ViewEvent::TitleChanged(title.to_string()));
                Ok(NativeValue::Undefined)
            }
            ["stale"] => {
                let retired = {
                    let mut views = self.views.borrow_mut();
                    let v = views.get_mut(&view).ok_or(NativeError::new("unknown view"))?;
                    v.sequence += 1;
                    v.retired.map(|target| (target, v.sequence))
                };
                if let Some((target, sequence)) = retired {
                    self.submit(DrawBatch::new(sequence).clear(target));
                }
                Ok(NativeValue::Undefined)
            }
            ["get", raw] => {
                let handle = Self::parse_handle(raw)?;
                Ok(match self.objects.borrow().get(&handle) {
                    Some(FakeObject::Plain(_)) => NativeValue::Object(handle),
                    Some(FakeObject::Array(_)) => NativeValue::Array(handle),
                    Some(FakeObject::Function) => NativeValue::Function(handle),
                    None => NativeValue::exception(format!("no object {}", raw), NativeValue::Undefined),
                })
            }
            ["hold", raw] => Ok(NativeValue::Boolean(self.sink.retain_object(Self::parse_handle(raw)?))),
            ["unhold", raw] => Ok(NativeValue::Boolean(self.sink.release_object(Self::parse_handle(raw)?))),
            ["destroy", raw] => {
                let handle = Self::parse_handle(raw)?;
                self.objects.borrow_mut().remove(&handle);
                self.log.with(|r| r.refs.remove(&handle.as_raw()));
                Ok(NativeValue::Boolean(self.sink.object_destroyed(handle)))
            }
            [expr] if expr.contains('+') => {
                let mut parts = expr.splitn(2, '+');
                let a: f64 = parts.next().unwrap_or("").parse().map_err(|_| NativeError::new("bad number"))?;
                let b: f64 = parts.next().unwrap_or("").parse().map_err(|_| NativeError::new("bad number"))?;
                Ok(NativeValue::Number(a + b))
            }
            _ => Ok(NativeValue::exception(
                format!("SyntaxError: {}", script),
                NativeValue::Undefined,
            )),
        }
    }

    fn call_function(
        &self,
        _view: NativeHandle,
        function: NativeHandle,
        _this: NativeValue,
        args: Vec<NativeValue>,
    ) -> Result<NativeValue, NativeError> {
        match self.objects.borrow().get(&function) {
            Some(FakeObject::Function) => {}
            _ => return Err(NativeError::new("not a function")),
        }
        let sum = args
            .iter()
            .map(|arg| match arg {
                NativeValue::Number(n) => *n,
                _ => 0.0,
            })
            .sum();
        Ok(NativeValue::Number(sum))
    }

    fn get_property(
        &self,
        _view: NativeHandle,
        object: NativeHandle,
        name: &str,
    ) -> Result<NativeValue, NativeError> {
        let objects = self.objects.borrow();
        match objects.get(&object) {
            Some(FakeObject::Plain(props)) => Ok(props.get(name).cloned().unwrap_or_default()),
            Some(FakeObject::Array(items)) if name == "length" => Ok(NativeValue::Number(items.len() as f64)),
            Some(FakeObject::Array(items)) => Ok(name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default()),
            Some(FakeObject::Function) => Ok(NativeValue::Undefined),
            None => Err(NativeError::new(format!("unknown object {}", object))),
        }
    }

    fn set_property(
        &self,
        _view: NativeHandle,
        object: NativeHandle,
        name: &str,
        value: NativeValue,
    ) -> Result<(), NativeError> {
        match self.objects.borrow_mut().get_mut(&object) {
            Some(FakeObject::Plain(props)) => {
                props.insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(NativeError::new("not a plain object")),
        }
    }

    fn make_array(&self, _view: NativeHandle, items: Vec<NativeValue>) -> Result<NativeHandle, NativeError> {
        let handle = self.allocate(1);
        self.objects.borrow_mut().insert(handle, FakeObject::Array(items));
        Ok(handle)
    }

    fn bind_callback(&self, view: NativeHandle, name: &str, token: CallbackToken) -> Result<(), NativeError> {
        let mut views = self.views.borrow_mut();
        let v = views.get_mut(&view).ok_or(NativeError::new("unknown view"))?;
        v.globals.insert(name.to_string(), token);
        Ok(())
    }

    fn unbind_callback(&self, view: NativeHandle, token: CallbackToken) {
        self.event(format!("unbind {}", token.0));
        if self.log.with(|r| r.upcall_on_unbind) {
            let result = self.sink.invoke_callback(view, token, NativeValue::Undefined, vec![]);
            self.event(format!("upcall {} -> {:?}", token.0, result));
        }
        if let Some(v) = self.views.borrow_mut().get_mut(&view) {
            v.globals.retain(|_, bound| *bound != token);
        }
        self.log.with(|r| r.unbound.push(token));
    }

    fn resize(&self, view: NativeHandle, width: u32, height: u32) -> Result<(), NativeError> {
        let old = {
            let mut views = self.views.borrow_mut();
            let v = views.get_mut(&view).ok_or(NativeError::new("unknown view"))?;
            v.width = width;
            v.height = height;
            let old = v.target.take();
            if old.is_some() {
                v.retired = old;
            }
            old
        };
        if let Some(id) = old {
            let _ = self.sink.resource(ResourceNotice::ResizeRenderTarget { id, width, height });
        }
        self.record(format!("resize {}x{}", width, height));
        Ok(())
    }

    fn update(&self) {
        self.record("update");
    }

    fn render(&self) {
        let mut defines = Vec::new();
        let mut batches = Vec::new();
        {
            let mut views = self.views.borrow_mut();
            for (view, v) in views.iter_mut() {
                let target = match v.target {
                    Some(target) => target,
                    None => {
                        let id = RenderTargetId(self.next_target.get());
                        self.next_target.set(id.0 + 1);
                        v.target = Some(id);
                        defines.push(ResourceNotice::DefineRenderTarget {
                            id,
                            desc: RenderTargetDesc::new(v.width, v.height),
                            view: view.as_raw(),
                        });
                        id
                    }
                };
                v.sequence += 1;
                batches.push(DrawBatch::new(v.sequence).clear(target));
            }
        }
        for notice in defines {
            let _ = self.sink.resource(notice);
        }
        for batch in batches {
            self.submit(batch);
        }
    }

    fn retain(&self, handle: NativeHandle) {
        self.log.with(|r| *r.refs.entry(handle.as_raw()).or_insert(0) += 1);
    }

    fn release(&self, handle: NativeHandle) {
        self.event(format!("release {}", handle.as_raw()));
        let remaining = self.log.with(|r| {
            let count = r.refs.entry(handle.as_raw()).or_insert(0);
            *count -= 1;
            *count
        });
        if remaining <= 0 && self.views.borrow_mut().remove(&handle).is_some() {
            self.log.with(|r| r.destroyed_views.push(handle.as_raw()));
        }
    }
}

/// Engine over the fake with a recording driver.
pub fn start() -> (Engine, FakeLog, TraceLog) {
    start_with(EngineConfig::default())
}

pub fn start_with(config: EngineConfig) -> (Engine, FakeLog, TraceLog) {
    let log = FakeLog::default();
    let trace = TraceLog::new();
    let native_log = log.clone();
    let engine = Engine::start(
        config,
        move |sink| Ok(FakeEngine::new(sink, native_log)),
        TraceDriver::with_log(trace.clone()),
    )
    .expect("engine starts");
    (engine, log, trace)
}
