//! Managed-side value representation

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use vela_handle::{ManagedProxy, NativeHandle, OwnerId, RegistryId};

use crate::marshal::{BoxError, FunctionInvoker};
use crate::CallbackToken;

/// Script string as raw bytes.
///
/// Script engines are not required to produce valid UTF-8, and embedded zero
/// bytes are legal.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptString(Vec<u8>);

impl ScriptString {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Borrow as `&str` if the bytes are valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ScriptString {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for ScriptString {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for ScriptString {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for ScriptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for ScriptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Arguments of one managed callback invocation
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub this: ScriptValue,
    pub args: Vec<ScriptValue>,
}

static UNDEFINED: ScriptValue = ScriptValue::Undefined;

impl Invocation {
    pub fn new(this: ScriptValue, args: Vec<ScriptValue>) -> Self {
        Self { this, args }
    }

    /// Argument `index`, or `undefined` when the caller passed fewer.
    pub fn arg(&self, index: usize) -> &ScriptValue {
        self.args.get(index).unwrap_or(&UNDEFINED)
    }
}

/// Managed callback body. An `Err` is thrown into the script.
pub type Callback = Arc<dyn Fn(&Invocation) -> Result<ScriptValue, ScriptValue> + Send + Sync>;

/// Managed closure passed as a script value
#[derive(Clone)]
pub enum ManagedCallback {
    /// Not yet known to the dispatcher; bound when first marshalled
    Unbound(UnboundCallback),
    /// Registered with the dispatcher
    Bound(CallbackToken),
}

impl ManagedCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Invocation) -> Result<ScriptValue, ScriptValue> + Send + Sync + 'static,
    {
        ManagedCallback::Unbound(UnboundCallback::new(Arc::new(f)))
    }

    pub fn token(&self) -> Option<CallbackToken> {
        match self {
            ManagedCallback::Bound(token) => Some(*token),
            ManagedCallback::Unbound(_) => None,
        }
    }
}

impl PartialEq for ManagedCallback {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ManagedCallback::Bound(a), ManagedCallback::Bound(b)) => a == b,
            (ManagedCallback::Unbound(a), ManagedCallback::Unbound(b)) => {
                Arc::ptr_eq(&a.body, &b.body)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ManagedCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagedCallback::Unbound(_) => f.write_str("Unbound"),
            ManagedCallback::Bound(token) => write!(f, "Bound({})", token),
        }
    }
}

/// Closure that has not been registered yet.
///
/// Clones share the tokens issued for them, so marshalling the same closure
/// into the same session again reuses its registration.
#[derive(Clone)]
pub struct UnboundCallback {
    body: Callback,
    tokens: Arc<Mutex<Vec<(RegistryId, OwnerId, CallbackToken)>>>,
}

impl UnboundCallback {
    pub fn new(body: Callback) -> Self {
        Self {
            body,
            tokens: Arc::default(),
        }
    }

    pub fn body(&self) -> &Callback {
        &self.body
    }

    /// Token issued for this closure in `owner`'s session, if any.
    pub fn token_for(&self, registry: RegistryId, owner: OwnerId) -> Option<CallbackToken> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens
            .iter()
            .find(|(r, o, _)| *r == registry && *o == owner)
            .map(|(_, _, token)| *token)
    }

    /// Remember `token` for `owner`'s session, replacing a stale one.
    pub fn remember(&self, registry: RegistryId, owner: OwnerId, token: CallbackToken) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|(r, o, _)| !(*r == registry && *o == owner));
        tokens.push((registry, owner, token));
    }
}

/// Callable native object
#[derive(Clone)]
pub struct ScriptFunction {
    proxy: ManagedProxy,
    owner: OwnerId,
    invoker: Arc<dyn FunctionInvoker>,
}

impl ScriptFunction {
    pub fn new(proxy: ManagedProxy, owner: OwnerId, invoker: Arc<dyn FunctionInvoker>) -> Self {
        Self {
            proxy,
            owner,
            invoker,
        }
    }

    pub fn proxy(&self) -> &ManagedProxy {
        &self.proxy
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Call into the native engine. Script exceptions come back as
    /// [`ScriptValue::Exception`].
    pub fn call(&self, this: ScriptValue, args: Vec<ScriptValue>) -> Result<ScriptValue, BoxError> {
        self.invoker.invoke(self, this, args)
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("handle", &self.proxy.handle())
            .field("owner", &self.owner)
            .finish()
    }
}

/// Script exception carried as a value
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptException {
    pub message: ScriptString,
    pub value: ScriptValue,
}

impl ScriptException {
    pub fn new(message: impl Into<ScriptString>) -> Self {
        Self {
            message: message.into(),
            value: ScriptValue::Undefined,
        }
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uncaught exception: {}", self.message)
    }
}

impl std::error::Error for ScriptException {}

/// Managed script value
#[derive(Debug, Clone, Default)]
pub enum ScriptValue {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(ScriptString),
    Object(ManagedProxy),
    Array(ManagedProxy),
    Function(ScriptFunction),
    Callback(ManagedCallback),
    Exception(Box<ScriptException>),
}

impl ScriptValue {
    pub fn string(s: impl Into<ScriptString>) -> Self {
        ScriptValue::String(s.into())
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Invocation) -> Result<ScriptValue, ScriptValue> + Send + Sync + 'static,
    {
        ScriptValue::Callback(ManagedCallback::new(f))
    }

    pub fn exception(message: impl Into<ScriptString>) -> Self {
        ScriptValue::Exception(Box::new(ScriptException::new(message)))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, ScriptValue::Undefined)
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, ScriptValue::Exception(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&ScriptString> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ScriptFunction> {
        match self {
            ScriptValue::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Proxy behind a reference value.
    pub fn proxy(&self) -> Option<&ManagedProxy> {
        match self {
            ScriptValue::Object(p) | ScriptValue::Array(p) => Some(p),
            ScriptValue::Function(f) => Some(f.proxy()),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<NativeHandle> {
        self.proxy().map(ManagedProxy::handle)
    }

    /// Re-raise a carried exception as an error.
    pub fn into_result(self) -> Result<ScriptValue, ScriptException> {
        match self {
            ScriptValue::Exception(exception) => Err(*exception),
            value => Ok(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Null => "null",
            ScriptValue::Boolean(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Object(_) => "object",
            ScriptValue::Array(_) => "array",
            ScriptValue::Function(_) => "function",
            ScriptValue::Callback(_) => "callback",
            ScriptValue::Exception(_) => "exception",
        }
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScriptValue::Undefined, ScriptValue::Undefined) => true,
            (ScriptValue::Null, ScriptValue::Null) => true,
            (ScriptValue::Boolean(a), ScriptValue::Boolean(b)) => a == b,
            (ScriptValue::Number(a), ScriptValue::Number(b)) => a == b,
            (ScriptValue::String(a), ScriptValue::String(b)) => a == b,
            (ScriptValue::Object(a), ScriptValue::Object(b)) => a.same_proxy(b),
            (ScriptValue::Array(a), ScriptValue::Array(b)) => a.same_proxy(b),
            (ScriptValue::Function(a), ScriptValue::Function(b)) => a.proxy.same_proxy(&b.proxy),
            (ScriptValue::Callback(a), ScriptValue::Callback(b)) => a == b,
            (ScriptValue::Exception(a), ScriptValue::Exception(b)) => a == b,
            _ => false,
        }
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        ScriptValue::Number(n)
    }
}

impl From<i32> for ScriptValue {
    fn from(n: i32) -> Self {
        ScriptValue::Number(n as f64)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Boolean(b)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::String(s.into())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::String(s.into())
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Undefined => f.write_str("undefined"),
            ScriptValue::Null => f.write_str("null"),
            ScriptValue::Boolean(b) => write!(f, "{}", b),
            ScriptValue::Number(n) => write!(f, "{}", n),
            ScriptValue::String(s) => write!(f, "{}", s),
            ScriptValue::Object(p) => write!(f, "[object {}]", p.handle()),
            ScriptValue::Array(p) => write!(f, "[array {}]", p.handle()),
            ScriptValue::Function(func) => write!(f, "[function {}]", func.proxy.handle()),
            ScriptValue::Callback(cb) => write!(f, "[callback {:?}]", cb),
            ScriptValue::Exception(e) => write!(f, "{}", e),
        }
    }
}
