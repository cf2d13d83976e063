//! JS bindings
//!
//! [`Scope`] converts values between QuickJS and the facade for one view.
//! Objects cross as handles from the [`HandleTable`]; a per-view `WeakMap`
//! gives each JS object a stable handle while it stays exported.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use rquickjs::function::{Opt, Rest, This};
use rquickjs::{Ctx, Exception, Function, Object, Persistent, Value};
use vela_view::{CallbackToken, NativeError, NativeHandle, NativeString, NativeValue, UpcallSink, ViewEvent};

use crate::console;
use crate::scene::{FillRect, Scene, channel};
use crate::table::{HandleTable, SlotKind};
use crate::text;

/// State reachable from JS closures
pub(crate) struct Shared {
    pub(crate) sink: UpcallSink,
    pub(crate) table: RefCell<HandleTable>,
    ids: RefCell<HashMap<NativeHandle, Persistent<Object<'static>>>>,
    next_handle: Cell<u64>,
}

impl Shared {
    pub(crate) fn new(sink: UpcallSink) -> Self {
        Self {
            sink,
            table: RefCell::new(HandleTable::new()),
            ids: RefCell::new(HashMap::new()),
            next_handle: Cell::new(0),
        }
    }

    /// Fresh non-null handle.
    pub(crate) fn allocate(&self) -> NativeHandle {
        let raw = self.next_handle.get() + 1;
        self.next_handle.set(raw);
        NativeHandle::from_raw(raw)
    }

    /// Install the identity map of `view`'s current context, returning the
    /// previous one.
    pub(crate) fn set_ids(
        &self,
        view: NativeHandle,
        ids: Persistent<Object<'static>>,
    ) -> Option<Persistent<Object<'static>>> {
        self.ids.borrow_mut().insert(view, ids)
    }

    pub(crate) fn remove_ids(&self, view: NativeHandle) -> Option<Persistent<Object<'static>>> {
        self.ids.borrow_mut().remove(&view)
    }

    pub(crate) fn drain_ids(&self) -> Vec<Persistent<Object<'static>>> {
        self.ids.borrow_mut().drain().map(|(_, ids)| ids).collect()
    }

    fn ids(&self, view: NativeHandle) -> Option<Persistent<Object<'static>>> {
        self.ids.borrow().get(&view).cloned()
    }
}

/// Display form of a native string.
pub(crate) fn lossy(s: &NativeString) -> String {
    String::from_utf8_lossy(s.as_bytes()).into_owned()
}

pub(crate) fn js_error(err: rquickjs::Error) -> NativeError {
    NativeError::new(format!("QuickJS: {}", err))
}

/// Value conversion for one view inside a QuickJS call
pub(crate) struct Scope<'a, 'js> {
    ctx: &'a Ctx<'js>,
    shared: &'a Rc<Shared>,
    view: NativeHandle,
    ids: Option<Object<'js>>,
}

impl<'a, 'js> Scope<'a, 'js> {
    pub(crate) fn new(ctx: &'a Ctx<'js>, shared: &'a Rc<Shared>, view: NativeHandle) -> Self {
        let ids = shared.ids(view).and_then(|ids| ids.restore(ctx).ok());
        Self {
            ctx,
            shared,
            view,
            ids,
        }
    }

    /// Handle for `value`, reusing the one it already has.
    pub(crate) fn export(&self, value: Value<'js>, kind: SlotKind) -> rquickjs::Result<NativeHandle> {
        if let Some(ids) = &self.ids {
            let get: Function<'js> = ids.get("get")?;
            let known: Value<'js> = get.call((This(ids.clone()), value.clone()))?;
            if let Some(raw) = known.as_number() {
                let handle = NativeHandle::from_raw(raw as u64);
                if self.shared.table.borrow().contains(handle) {
                    return Ok(handle);
                }
            }
        }

        let handle = self.shared.allocate();
        let saved = Persistent::save(self.ctx, value.clone());
        self.shared.table.borrow_mut().insert(handle, self.view, saved, kind);
        if let Some(ids) = &self.ids {
            let set: Function<'js> = ids.get("set")?;
            let _: Value<'js> = set.call((This(ids.clone()), value, handle.as_raw() as f64))?;
        }
        Ok(handle)
    }

    /// The JS value behind an exported handle.
    pub(crate) fn lookup(&self, handle: NativeHandle) -> Result<Value<'js>, NativeError> {
        let (saved, _) = self
            .shared
            .table
            .borrow()
            .get(handle)
            .ok_or_else(|| NativeError::new(format!("unknown handle {}", handle)))?;
        saved.restore(self.ctx).map_err(js_error)
    }

    pub(crate) fn from_js(&self, value: Value<'js>) -> rquickjs::Result<NativeValue> {
        if value.is_undefined() {
            return Ok(NativeValue::Undefined);
        }
        if value.is_null() {
            return Ok(NativeValue::Null);
        }
        if let Some(b) = value.as_bool() {
            return Ok(NativeValue::Boolean(b));
        }
        if let Some(n) = value.as_number() {
            return Ok(NativeValue::Number(n));
        }
        if let Some(s) = value.as_string() {
            let bytes = text::string_bytes(self.ctx, s)?;
            return Ok(NativeValue::String(NativeString::from_bytes(bytes)));
        }
        if value.is_function() {
            return Ok(NativeValue::Function(self.export(value, SlotKind::Function)?));
        }
        if value.is_array() {
            return Ok(NativeValue::Array(self.export(value, SlotKind::Array)?));
        }
        if value.is_object() {
            return Ok(NativeValue::Object(self.export(value, SlotKind::Object)?));
        }
        tracing::trace!("{:?} value crossed as undefined", value.type_of());
        Ok(NativeValue::Undefined)
    }

    pub(crate) fn to_js(&self, value: NativeValue) -> rquickjs::Result<Value<'js>> {
        let ctx = self.ctx.clone();
        Ok(match value {
            NativeValue::Undefined => Value::new_undefined(ctx),
            NativeValue::Null => Value::new_null(ctx),
            NativeValue::Boolean(b) => Value::new_bool(ctx, b),
            NativeValue::Number(n) => Value::new_number(ctx, n),
            NativeValue::String(s) => text::string_from_bytes(self.ctx, s.as_bytes())?.into_value(),
            NativeValue::Object(handle) | NativeValue::Array(handle) | NativeValue::Function(handle) => {
                match self.lookup(handle) {
                    Ok(value) => value,
                    Err(err) => return Err(Exception::throw_reference(self.ctx, &err.to_string())),
                }
            }
            NativeValue::Callback(token) => {
                callback_function(self.ctx, self.shared.clone(), self.view, token)?.into_value()
            }
            NativeValue::Exception { message, .. } => Exception::from_message(ctx, &lossy(&message))?.into_value(),
        })
    }

    /// Return `value` to script code, throwing a carried exception.
    pub(crate) fn reply(&self, value: NativeValue) -> rquickjs::Result<Value<'js>> {
        match value {
            NativeValue::Exception { message, value } => {
                let thrown = match *value {
                    NativeValue::Undefined => Exception::from_message(self.ctx.clone(), &lossy(&message))?.into_value(),
                    other => self.to_js(other)?,
                };
                Err(self.ctx.throw(thrown))
            }
            other => self.to_js(other),
        }
    }

    /// Turn a failed QuickJS call into a returned exception value.
    pub(crate) fn caught(&self, err: rquickjs::Error) -> Result<NativeValue, NativeError> {
        if !matches!(err, rquickjs::Error::Exception) {
            return Err(js_error(err));
        }
        let thrown = self.ctx.catch();
        let message = describe_thrown(&thrown);
        tracing::debug!("Script threw: {}", message);
        let value = self.from_js(thrown).map_err(js_error)?;
        Ok(NativeValue::exception(message, value))
    }

    /// Like [`caught`](Self::caught), for calls that cannot return a value.
    pub(crate) fn failed(&self, err: rquickjs::Error) -> NativeError {
        match self.caught(err) {
            Ok(NativeValue::Exception { message, .. }) => NativeError::new(lossy(&message)),
            Ok(_) => NativeError::new("QuickJS: exception"),
            Err(err) => err,
        }
    }
}

fn describe_thrown(thrown: &Value<'_>) -> String {
    if let Some(exception) = thrown.as_exception() {
        let message = exception.message().unwrap_or_default();
        let name = thrown
            .as_object()
            .and_then(|object| object.get::<_, Option<String>>("name").ok().flatten());
        return match name {
            Some(name) if !name.is_empty() => format!("{}: {}", name, message),
            _ => message,
        };
    }
    console::describe(thrown)
}

/// JS function forwarding to the managed callback behind `token`.
pub(crate) fn callback_function<'js>(
    ctx: &Ctx<'js>,
    shared: Rc<Shared>,
    view: NativeHandle,
    token: CallbackToken,
) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, this: This<Value<'js>>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let scope = Scope::new(&ctx, &shared, view);
            let this = scope.from_js(this.0)?;
            let args = args
                .0
                .into_iter()
                .map(|arg| scope.from_js(arg))
                .collect::<rquickjs::Result<Vec<_>>>()?;
            let result = shared.sink.invoke_callback(view, token, this, args);
            scope.reply(result)
        },
    )
}

/// Expose `token` as the global function `name`.
pub(crate) fn bind_global<'js>(
    ctx: &Ctx<'js>,
    shared: Rc<Shared>,
    view: NativeHandle,
    name: &str,
    token: CallbackToken,
) -> rquickjs::Result<()> {
    let function = callback_function(ctx, shared, view, token)?.with_name(name)?;
    ctx.globals().set(name, function)
}

/// `[r, g, b, a?]` with alpha defaulting to opaque.
fn rgba(color: &[f64]) -> [u8; 4] {
    let at = |i: usize, default: f64| channel(color.get(i).copied().unwrap_or(default));
    [at(0, 0.0), at(1, 0.0), at(2, 0.0), at(3, 255.0)]
}

/// Install the `vela` paint API and `navigator`.
pub(crate) fn install_host_api<'js>(
    ctx: &Ctx<'js>,
    shared: Rc<Shared>,
    view: NativeHandle,
    scene: Rc<RefCell<Scene>>,
    user_agent: &str,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let vela = Object::new(ctx.clone())?;

    let paint = scene.clone();
    vela.set(
        "setBackground",
        Function::new(ctx.clone(), move |color: Vec<f64>| {
            paint.borrow_mut().set_background(rgba(&color));
        })?,
    )?;

    let paint = scene.clone();
    vela.set(
        "fillRect",
        Function::new(
            ctx.clone(),
            move |x: f64, y: f64, width: f64, height: f64, color: Opt<Vec<f64>>| {
                paint.borrow_mut().fill_rect(FillRect {
                    x: x as f32,
                    y: y as f32,
                    width: width as f32,
                    height: height as f32,
                    color: rgba(&color.0.unwrap_or_default()),
                });
            },
        )?,
    )?;

    let paint = scene;
    vela.set(
        "clearRects",
        Function::new(ctx.clone(), move || {
            paint.borrow_mut().clear_rects();
        })?,
    )?;

    vela.set(
        "setTitle",
        Function::new(ctx.clone(), move |title: String| {
            shared.sink.post_event(view, ViewEvent::TitleChanged(title));
        })?,
    )?;

    globals.set("vela", vela)?;

    let navigator = Object::new(ctx.clone())?;
    navigator.set("userAgent", user_agent.to_string())?;
    globals.set("navigator", navigator)?;
    Ok(())
}
