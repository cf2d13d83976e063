//! Marshaller
//!
//! One `Marshaller` is built per crossing on the engine thread. It borrows the
//! registry and the callback binder for the duration of the conversion only;
//! neither borrow may be held while native code runs.

use std::sync::Arc;

use vela_handle::{HandleRegistry, ManagedProxy, NativeHandle, NativeRefCount, OwnerId};

use crate::{
    Callback, CallbackToken, Invocation, ManagedCallback, MarshalError, NativeString, NativeValue,
    ScriptException, ScriptFunction, ScriptString, ScriptValue,
};

/// Error returned through [`FunctionInvoker`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Registers managed closures so the native side can call them.
pub trait CallbackBinder {
    /// Register `callback` for `owner` and return its token.
    fn bind(&mut self, owner: OwnerId, callback: Callback) -> Result<CallbackToken, MarshalError>;

    /// Whether `token` still names a live registration.
    fn is_bound(&self, token: CallbackToken) -> bool;
}

/// Performs the re-entrant native call behind [`ScriptFunction::call`].
pub trait FunctionInvoker: Send + Sync {
    fn invoke(
        &self,
        function: &ScriptFunction,
        this: ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, BoxError>;
}

/// Value converter for one session
pub struct Marshaller<'a> {
    registry: &'a mut HandleRegistry,
    native: &'a dyn NativeRefCount,
    binder: &'a mut dyn CallbackBinder,
    invoker: &'a Arc<dyn FunctionInvoker>,
    owner: OwnerId,
}

impl<'a> Marshaller<'a> {
    pub fn new(
        registry: &'a mut HandleRegistry,
        native: &'a dyn NativeRefCount,
        binder: &'a mut dyn CallbackBinder,
        invoker: &'a Arc<dyn FunctionInvoker>,
        owner: OwnerId,
    ) -> Self {
        Self {
            registry,
            native,
            binder,
            invoker,
            owner,
        }
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Convert a managed value for the native side.
    pub fn to_native(&mut self, value: &ScriptValue) -> Result<NativeValue, MarshalError> {
        Ok(match value {
            ScriptValue::Undefined => NativeValue::Undefined,
            ScriptValue::Null => NativeValue::Null,
            ScriptValue::Boolean(b) => NativeValue::Boolean(*b),
            ScriptValue::Number(n) => NativeValue::Number(*n),
            ScriptValue::String(s) => NativeValue::String(NativeString::from_bytes(s.as_bytes())),
            ScriptValue::Object(proxy) => NativeValue::Object(self.check_proxy(proxy)?),
            ScriptValue::Array(proxy) => NativeValue::Array(self.check_proxy(proxy)?),
            ScriptValue::Function(function) => {
                NativeValue::Function(self.check_proxy(function.proxy())?)
            }
            ScriptValue::Callback(ManagedCallback::Bound(token)) => {
                if !self.binder.is_bound(*token) {
                    return Err(MarshalError::StaleCallback(*token));
                }
                NativeValue::Callback(*token)
            }
            ScriptValue::Callback(ManagedCallback::Unbound(callback)) => {
                let registry = self.registry.id();
                match callback.token_for(registry, self.owner) {
                    Some(token) if self.binder.is_bound(token) => NativeValue::Callback(token),
                    _ => {
                        let token = self.binder.bind(self.owner, callback.body().clone())?;
                        callback.remember(registry, self.owner, token);
                        NativeValue::Callback(token)
                    }
                }
            }
            ScriptValue::Exception(exception) => NativeValue::Exception {
                message: NativeString::from_bytes(exception.message.as_bytes()),
                value: Box::new(self.to_native(&exception.value)?),
            },
        })
    }

    /// Convert a native value, registering any handles it carries.
    pub fn from_native(&mut self, value: NativeValue) -> Result<ScriptValue, MarshalError> {
        Ok(match value {
            NativeValue::Undefined => ScriptValue::Undefined,
            NativeValue::Null => ScriptValue::Null,
            NativeValue::Boolean(b) => ScriptValue::Boolean(b),
            NativeValue::Number(n) => ScriptValue::Number(n),
            NativeValue::String(s) => ScriptValue::String(ScriptString::from_bytes(s.into_bytes())),
            NativeValue::Object(handle) => ScriptValue::Object(self.register(handle)?),
            NativeValue::Array(handle) => ScriptValue::Array(self.register(handle)?),
            NativeValue::Function(handle) => {
                let proxy = self.register(handle)?;
                ScriptValue::Function(ScriptFunction::new(proxy, self.owner, self.invoker.clone()))
            }
            NativeValue::Callback(token) => ScriptValue::Callback(ManagedCallback::Bound(token)),
            NativeValue::Exception { message, value } => {
                ScriptValue::Exception(Box::new(ScriptException {
                    message: ScriptString::from_bytes(message.into_bytes()),
                    value: self.from_native(*value)?,
                }))
            }
        })
    }

    pub fn to_native_args(&mut self, args: &[ScriptValue]) -> Result<Vec<NativeValue>, MarshalError> {
        args.iter().map(|arg| self.to_native(arg)).collect()
    }

    pub fn from_native_args(
        &mut self,
        args: Vec<NativeValue>,
    ) -> Result<Vec<ScriptValue>, MarshalError> {
        args.into_iter().map(|arg| self.from_native(arg)).collect()
    }

    /// Build the managed view of a native upcall's receiver and arguments.
    pub fn invocation(
        &mut self,
        this: NativeValue,
        args: Vec<NativeValue>,
    ) -> Result<Invocation, MarshalError> {
        let this = self.from_native(this)?;
        let args = self.from_native_args(args)?;
        Ok(Invocation::new(this, args))
    }

    /// Convert a managed callback's outcome for the native caller.
    ///
    /// Thrown values and marshalling failures become native exceptions;
    /// nothing unwinds into native code.
    pub fn callback_result(&mut self, result: Result<ScriptValue, ScriptValue>) -> NativeValue {
        let converted = match result {
            Ok(value) => self.to_native(&value),
            Err(ScriptValue::Exception(exception)) => {
                self.to_native(&ScriptValue::Exception(exception))
            }
            Err(thrown) => {
                let message = ScriptString::from(thrown.to_string());
                self.to_native(&ScriptValue::Exception(Box::new(ScriptException {
                    message,
                    value: thrown,
                })))
            }
        };
        converted.unwrap_or_else(|err| {
            tracing::warn!("Callback result could not be marshalled: {}", err);
            NativeValue::exception(err.to_string(), NativeValue::Undefined)
        })
    }

    fn check_proxy(&self, proxy: &ManagedProxy) -> Result<NativeHandle, MarshalError> {
        let handle = proxy.handle();
        if proxy.registry() != self.registry.id() {
            tracing::error!("Proxy for {} crossed into a foreign engine", handle);
            return Err(MarshalError::ForeignProxy(handle));
        }
        if !proxy.is_alive() {
            return Err(MarshalError::Released(handle));
        }
        Ok(handle)
    }

    fn register(&mut self, handle: NativeHandle) -> Result<ManagedProxy, MarshalError> {
        if handle.is_null() {
            return Err(MarshalError::NullHandle);
        }
        Ok(self.registry.register(handle, self.owner, self.native))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Counts(RefCell<i64>);

    impl NativeRefCount for Counts {
        fn retain(&self, _: NativeHandle) {
            *self.0.borrow_mut() += 1;
        }

        fn release(&self, _: NativeHandle) {
            *self.0.borrow_mut() -= 1;
        }
    }

    #[derive(Default)]
    struct Binder {
        next: u64,
        bound: HashSet<CallbackToken>,
    }

    impl CallbackBinder for Binder {
        fn bind(&mut self, _: OwnerId, _: Callback) -> Result<CallbackToken, MarshalError> {
            self.next += 1;
            let token = CallbackToken(self.next);
            self.bound.insert(token);
            Ok(token)
        }

        fn is_bound(&self, token: CallbackToken) -> bool {
            self.bound.contains(&token)
        }
    }

    struct NoInvoke;

    impl FunctionInvoker for NoInvoke {
        fn invoke(&self, _: &ScriptFunction, _: ScriptValue, _: Vec<ScriptValue>) -> Result<ScriptValue, BoxError> {
            Err("not callable in tests".into())
        }
    }

    const OWNER: OwnerId = OwnerId(1);

    #[test]
    fn test_objects_cross_by_reference() {
        let native = Counts::default();
        let mut registry = HandleRegistry::new();
        let mut binder = Binder::default();
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(NoInvoke);
        let mut m = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OWNER);

        let handle = NativeHandle::from_raw(0x99);
        let first = m.from_native(NativeValue::Object(handle)).unwrap();
        let second = m.from_native(NativeValue::Object(handle)).unwrap();

        assert_eq!(first, second);
        assert_eq!(m.to_native(&first).unwrap(), NativeValue::Object(handle));
        assert_eq!(*native.0.borrow(), 1);
    }

    #[test]
    fn test_released_proxy_is_refused() {
        let native = Counts::default();
        let mut registry = HandleRegistry::new();
        let proxy = registry.register(NativeHandle::from_raw(3), OWNER, &native);
        registry.release(&proxy, &native).unwrap();

        let mut binder = Binder::default();
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(NoInvoke);
        let mut m = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OWNER);

        assert_eq!(
            m.to_native(&ScriptValue::Object(proxy)),
            Err(MarshalError::Released(NativeHandle::from_raw(3)))
        );
    }

    #[test]
    fn test_unbound_callback_is_bound_once_marshalled() {
        let native = Counts::default();
        let mut registry = HandleRegistry::new();
        let mut binder = Binder::default();
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(NoInvoke);
        let mut m = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OWNER);

        let value = ScriptValue::callback(|_| Ok(ScriptValue::Null));
        let NativeValue::Callback(token) = m.to_native(&value).unwrap() else {
            panic!("expected callback token");
        };

        let back = m.from_native(NativeValue::Callback(token)).unwrap();
        assert_eq!(back, ScriptValue::Callback(ManagedCallback::Bound(token)));
        assert_eq!(
            m.to_native(&ScriptValue::Callback(ManagedCallback::Bound(CallbackToken(77)))),
            Err(MarshalError::StaleCallback(CallbackToken(77)))
        );
    }

    #[test]
    fn test_same_callback_reuses_its_token() {
        let native = Counts::default();
        let mut registry = HandleRegistry::new();
        let mut binder = Binder::default();
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(NoInvoke);

        let value = ScriptValue::callback(|_| Ok(ScriptValue::Null));
        let copy = value.clone();
        let (first, second, third) = {
            let mut m = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OWNER);
            (
                m.to_native(&value).unwrap(),
                m.to_native(&value).unwrap(),
                m.to_native(&copy).unwrap(),
            )
        };

        assert_eq!(first, NativeValue::Callback(CallbackToken(1)));
        assert_eq!(second, first);
        assert_eq!(third, first);
        assert_eq!(binder.next, 1);

        // Once the registration is gone the closure binds again.
        binder.bound.clear();
        let mut m = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OWNER);
        assert_eq!(m.to_native(&value).unwrap(), NativeValue::Callback(CallbackToken(2)));
        assert_eq!(m.to_native(&value).unwrap(), NativeValue::Callback(CallbackToken(2)));
        drop(m);
        assert_eq!(binder.next, 2);
    }

    #[test]
    fn test_callback_binds_once_per_session() {
        let native = Counts::default();
        let mut registry = HandleRegistry::new();
        let mut binder = Binder::default();
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(NoInvoke);
        let value = ScriptValue::callback(|_| Ok(ScriptValue::Null));

        let first = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OWNER)
            .to_native(&value)
            .unwrap();
        let other = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OwnerId(2))
            .to_native(&value)
            .unwrap();

        assert_ne!(first, other);
        assert_eq!(binder.next, 2);
    }

    #[test]
    fn test_native_exception_becomes_value() {
        let native = Counts::default();
        let mut registry = HandleRegistry::new();
        let mut binder = Binder::default();
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(NoInvoke);
        let mut m = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OWNER);

        let value = m
            .from_native(NativeValue::exception("TypeError: x", NativeValue::string("x")))
            .unwrap();
        let err = value.into_result().unwrap_err();

        assert_eq!(err.message.as_str(), Some("TypeError: x"));
        assert_eq!(err.value, ScriptValue::from("x"));
    }

    #[test]
    fn test_callback_error_becomes_native_exception() {
        let native = Counts::default();
        let mut registry = HandleRegistry::new();
        let mut binder = Binder::default();
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(NoInvoke);
        let mut m = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OWNER);

        let out = m.callback_result(Err(ScriptValue::from("bad input")));
        assert_eq!(
            out,
            NativeValue::exception("bad input", NativeValue::string("bad input"))
        );
        assert_eq!(m.callback_result(Ok(ScriptValue::from(4))), NativeValue::Number(4.0));
    }

    #[test]
    fn test_null_handle_rejected() {
        let native = Counts::default();
        let mut registry = HandleRegistry::new();
        let mut binder = Binder::default();
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(NoInvoke);
        let mut m = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OWNER);

        assert_eq!(
            m.from_native(NativeValue::Object(NativeHandle::NULL)),
            Err(MarshalError::NullHandle)
        );
    }
}
