//! Marshaller integration tests

use std::cell::Cell;
use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use vela_handle::{HandleRegistry, NativeHandle, NativeRefCount, OwnerId};
use vela_value::{
    BoxError, Callback, CallbackBinder, CallbackToken, FunctionInvoker, MarshalError, Marshaller,
    NativeString, NativeValue, ScriptFunction, ScriptString, ScriptValue,
};

#[derive(Default)]
struct Counts {
    live: Cell<i64>,
}

impl NativeRefCount for Counts {
    fn retain(&self, _: NativeHandle) {
        self.live.set(self.live.get() + 1);
    }

    fn release(&self, _: NativeHandle) {
        self.live.set(self.live.get() - 1);
    }
}

#[derive(Default)]
struct Binder {
    bound: HashSet<CallbackToken>,
}

impl CallbackBinder for Binder {
    fn bind(&mut self, _: OwnerId, _: Callback) -> Result<CallbackToken, MarshalError> {
        let token = CallbackToken(self.bound.len() as u64 + 1);
        self.bound.insert(token);
        Ok(token)
    }

    fn is_bound(&self, token: CallbackToken) -> bool {
        self.bound.contains(&token)
    }
}

/// Echoes the first argument back, standing in for a native call.
struct Echo;

impl FunctionInvoker for Echo {
    fn invoke(
        &self,
        _: &ScriptFunction,
        _: ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, BoxError> {
        Ok(args.into_iter().next().unwrap_or_default())
    }
}

fn with_marshaller<R>(f: impl FnOnce(&mut Marshaller<'_>) -> R) -> R {
    let native = Counts::default();
    let mut registry = HandleRegistry::new();
    let mut binder = Binder::default();
    let invoker: Arc<dyn FunctionInvoker> = Arc::new(Echo);
    let mut marshaller = Marshaller::new(&mut registry, &native, &mut binder, &invoker, OwnerId(1));
    f(&mut marshaller)
}

// ============================================================================
// STRINGS
// ============================================================================

fn round_trip(bytes: &[u8]) -> ScriptValue {
    with_marshaller(|m| {
        let native = m.to_native(&ScriptValue::String(ScriptString::from_bytes(bytes))).unwrap();
        let NativeValue::String(s) = native else {
            panic!("expected native string");
        };
        // Cross the boundary the way an FFI string arrives: pointer and length.
        let copied = unsafe { NativeString::copy_from_raw(s.as_ptr(), s.len()) };
        m.from_native(NativeValue::String(copied)).unwrap()
    })
}

#[test]
fn test_string_with_embedded_nul() {
    let value = round_trip(b"left\0right");
    assert_eq!(value.as_string().unwrap().as_bytes(), b"left\0right");
}

#[test]
fn test_non_utf8_string() {
    let value = round_trip(&[0xc3, 0x28, 0x00, 0xff]);
    assert_eq!(value.as_string().unwrap().as_bytes(), &[0xc3, 0x28, 0x00, 0xff]);
}

proptest! {
    #[test]
    fn prop_string_round_trip_is_byte_exact(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let value = round_trip(&bytes);
        prop_assert_eq!(value.as_string().map(|s| s.as_bytes().to_vec()), Some(bytes));
    }

    #[test]
    fn prop_numbers_pass_through(n in any::<f64>()) {
        let native = with_marshaller(|m| m.to_native(&ScriptValue::Number(n)).unwrap());
        match native {
            NativeValue::Number(out) => prop_assert_eq!(out.to_bits(), n.to_bits()),
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }
}

// ============================================================================
// REFERENCES
// ============================================================================

#[test]
fn test_function_values_invoke_through_seam() {
    with_marshaller(|m| {
        let value = m.from_native(NativeValue::Function(NativeHandle::from_raw(8))).unwrap();
        let function = value.as_function().unwrap();

        let result = function
            .call(ScriptValue::Undefined, vec![ScriptValue::from("echo")])
            .unwrap();
        assert_eq!(result, ScriptValue::from("echo"));
        assert_eq!(function.owner(), OwnerId(1));
    });
}

#[test]
fn test_arguments_marshal_in_order() {
    with_marshaller(|m| {
        let args = vec![
            ScriptValue::from(1),
            ScriptValue::Null,
            ScriptValue::from(true),
            ScriptValue::from("s"),
        ];
        let native = m.to_native_args(&args).unwrap();
        assert_eq!(
            native,
            vec![
                NativeValue::Number(1.0),
                NativeValue::Null,
                NativeValue::Boolean(true),
                NativeValue::string("s"),
            ]
        );
        assert_eq!(m.from_native_args(native).unwrap(), args);
    });
}

#[test]
fn test_proxy_from_other_engine_is_foreign() {
    let native = Counts::default();
    let mut other = HandleRegistry::new();
    let foreign = other.register(NativeHandle::from_raw(4), OwnerId(1), &native);

    with_marshaller(|m| {
        assert_eq!(
            m.to_native(&ScriptValue::Array(foreign.clone())),
            Err(MarshalError::ForeignProxy(NativeHandle::from_raw(4)))
        );
    });
}
