//! Vela Handle Registry
//!
//! Maps opaque native object identities to managed proxies.
//!
//! The registry is the single owning authority for the handle -> proxy
//! mapping. Proxies are generational arena slots; the registry keeps a weak
//! reference to each proxy and only holds a strong one while the native side
//! is known to keep the object alive (see [`HandleRegistry::pin`]).
//!
//! ```text
//! native engine ──handle──▶ HandleRegistry ──weak──▶ ManagedProxy (host code)
//!                                 ▲                        │ Drop
//!                                 └──── ReleaseQueue ◀─────┘
//! ```

mod arena;
mod error;
mod proxy;
mod registry;
mod release_queue;

pub use arena::{GenArena, ProxyId};
pub use error::HandleError;
pub use proxy::ManagedProxy;
pub use registry::{HandleRegistry, RegistryId};
pub use release_queue::ReleaseQueue;

use std::fmt;

/// Opaque identity issued by the native engine.
///
/// Never dereferenced on the managed side. Zero is the null handle.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativeHandle(u64);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle(0x{:x})", self.0)
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Identity of the session that registered a proxy or callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Reference counting entry points of the native engine.
///
/// Implementations must not call back into the bridge.
pub trait NativeRefCount {
    /// Take one native reference on `handle`.
    fn retain(&self, handle: NativeHandle);

    /// Drop one native reference on `handle`.
    fn release(&self, handle: NativeHandle);
}
