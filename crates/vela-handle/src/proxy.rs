//! Managed proxy

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{NativeHandle, ProxyId, RegistryId, ReleaseQueue};

struct ProxyCell {
    handle: NativeHandle,
    id: ProxyId,
    registry: RegistryId,
    released: AtomicBool,
    finalizer: ReleaseQueue,
}

impl Drop for ProxyCell {
    fn drop(&mut self) {
        // Losing the race means an explicit release already ran.
        if self.mark_released() {
            self.finalizer.defer(self.id, self.handle);
        }
    }
}

impl ProxyCell {
    /// Flip the released flag. Returns true for the single winner.
    fn mark_released(&self) -> bool {
        self.released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Managed-side wrapper around exactly one [`NativeHandle`].
///
/// Clones share identity. Dropping the last clone of a live proxy schedules
/// the native release on the engine thread.
#[derive(Clone)]
pub struct ManagedProxy {
    cell: Arc<ProxyCell>,
}

impl ManagedProxy {
    pub(crate) fn new(
        handle: NativeHandle,
        id: ProxyId,
        registry: RegistryId,
        finalizer: ReleaseQueue,
    ) -> Self {
        Self {
            cell: Arc::new(ProxyCell {
                handle,
                id,
                registry,
                released: AtomicBool::new(false),
                finalizer,
            }),
        }
    }

    pub fn handle(&self) -> NativeHandle {
        self.cell.handle
    }

    pub fn id(&self) -> ProxyId {
        self.cell.id
    }

    pub fn registry(&self) -> RegistryId {
        self.cell.registry
    }

    /// Whether the native object is still reachable through this proxy.
    pub fn is_alive(&self) -> bool {
        !self.cell.released.load(Ordering::Acquire)
    }

    /// Whether two proxies are the same proxy (not merely the same handle).
    pub fn same_proxy(&self, other: &ManagedProxy) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn mark_released(&self) -> bool {
        self.cell.mark_released()
    }

    pub(crate) fn downgrade(&self) -> WeakProxy {
        WeakProxy(Arc::downgrade(&self.cell))
    }
}

/// Non-owning reference held by the registry.
pub(crate) struct WeakProxy(Weak<ProxyCell>);

impl WeakProxy {
    pub(crate) fn upgrade(&self) -> Option<ManagedProxy> {
        self.0.upgrade().map(|cell| ManagedProxy { cell })
    }
}

impl PartialEq for ManagedProxy {
    fn eq(&self, other: &Self) -> bool {
        self.same_proxy(other)
    }
}

impl Eq for ManagedProxy {}

impl Hash for ManagedProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.cell) as usize).hash(state);
    }
}

impl fmt::Debug for ManagedProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProxy")
            .field("handle", &self.cell.handle)
            .field("id", &self.cell.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
