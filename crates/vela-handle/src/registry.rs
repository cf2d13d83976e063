//! Handle registry
//!
//! Engine-thread-only mapping from [`NativeHandle`] to [`ManagedProxy`].
//! The registry is owned by the engine thread's state and is never shared
//! across threads; proxies only reach back into it through the
//! [`ReleaseQueue`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::proxy::WeakProxy;
use crate::{GenArena, HandleError, ManagedProxy, NativeHandle, NativeRefCount, OwnerId, ProxyId, ReleaseQueue};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one registry instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    Exclusive(OwnerId),
    Shared,
}

struct Slot {
    handle: NativeHandle,
    proxy: WeakProxy,
    ownership: Ownership,
    /// Strong reference while the native side holds the object
    pinned: Option<ManagedProxy>,
}

/// Native handle registry
pub struct HandleRegistry {
    id: RegistryId,
    slots: GenArena<Slot>,
    by_handle: HashMap<NativeHandle, ProxyId>,
    finalizer: ReleaseQueue,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            id: RegistryId(NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed)),
            slots: GenArena::new(),
            by_handle: HashMap::new(),
            finalizer: ReleaseQueue::new(),
        }
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }

    /// Return the live proxy for `handle`, or retain a native reference and
    /// create one.
    pub fn register(
        &mut self,
        handle: NativeHandle,
        owner: OwnerId,
        native: &dyn NativeRefCount,
    ) -> ManagedProxy {
        if let Some(proxy) = self.live_proxy(handle) {
            self.share(proxy.id(), owner);
            return proxy;
        }

        native.retain(handle);
        self.insert(handle, owner)
    }

    /// Like [`register`](Self::register) for a reference the caller already
    /// owns, such as the result of a native create call.
    pub fn adopt(
        &mut self,
        handle: NativeHandle,
        owner: OwnerId,
        native: &dyn NativeRefCount,
    ) -> ManagedProxy {
        if let Some(proxy) = self.live_proxy(handle) {
            // The existing proxy already holds a reference.
            native.release(handle);
            self.share(proxy.id(), owner);
            return proxy;
        }

        self.insert(handle, owner)
    }

    /// Find the proxy registered for `handle`.
    pub fn lookup(&self, handle: NativeHandle) -> Result<ManagedProxy, HandleError> {
        self.live_proxy(handle).ok_or_else(|| {
            tracing::error!("Lookup of unregistered native handle {}", handle);
            HandleError::UnknownHandle(handle)
        })
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.live_proxy(handle).is_some()
    }

    /// Release `proxy` and its native reference exactly once.
    pub fn release(
        &mut self,
        proxy: &ManagedProxy,
        native: &dyn NativeRefCount,
    ) -> Result<(), HandleError> {
        let handle = proxy.handle();
        if proxy.registry() != self.id {
            tracing::error!("Release of {} through a foreign registry", handle);
            return Err(HandleError::ForeignProxy(handle));
        }
        if !proxy.mark_released() {
            tracing::error!("Double release of native handle {}", handle);
            return Err(HandleError::AlreadyReleased(handle));
        }

        self.forget(proxy.id(), handle);
        native.release(handle);
        tracing::trace!("Released {}", handle);
        Ok(())
    }

    /// The native engine destroyed `handle` on its own; drop the mapping
    /// without a native release.
    pub fn invalidate(&mut self, handle: NativeHandle) -> bool {
        let Some(id) = self.by_handle.remove(&handle) else {
            return false;
        };
        if let Some(slot) = self.slots.remove(id) {
            if let Some(proxy) = slot.proxy.upgrade() {
                proxy.mark_released();
            }
        }
        tracing::debug!("Native side destroyed {}", handle);
        true
    }

    /// Release every proxy owned exclusively by `owner`.
    pub fn release_owned_by(&mut self, owner: OwnerId, native: &dyn NativeRefCount) -> usize {
        let owned: Vec<ProxyId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.ownership == Ownership::Exclusive(owner))
            .map(|(id, _)| id)
            .collect();

        let mut released = 0;
        for id in owned {
            let Some(slot) = self.slots.get(id) else {
                continue;
            };
            let handle = slot.handle;
            // A proxy that no longer upgrades is mid-finalization and sits in
            // the release queue already.
            let Some(proxy) = slot.proxy.upgrade() else {
                continue;
            };
            if proxy.mark_released() {
                self.forget(id, handle);
                native.release(handle);
                released += 1;
            }
        }

        tracing::debug!("Released {} proxies owned by {}", released, owner);
        released
    }

    /// Release every remaining proxy. Used at engine shutdown.
    pub fn release_all(&mut self, native: &dyn NativeRefCount) -> usize {
        let ids: Vec<ProxyId> = self.slots.iter().map(|(id, _)| id).collect();
        let mut released = 0;
        for id in ids {
            let Some(slot) = self.slots.get(id) else {
                continue;
            };
            let handle = slot.handle;
            // Slots that no longer upgrade are released by the queue drain.
            let Some(proxy) = slot.proxy.upgrade() else {
                continue;
            };
            if proxy.mark_released() {
                self.forget(id, handle);
                native.release(handle);
                released += 1;
            }
        }
        released + self.drain_finalized(native)
    }

    /// Keep the proxy for `handle` alive while the native side holds it.
    pub fn pin(&mut self, handle: NativeHandle) -> Result<(), HandleError> {
        let proxy = self.lookup(handle)?;
        if let Some(slot) = self.slots.get_mut(proxy.id()) {
            slot.pinned = Some(proxy);
        }
        Ok(())
    }

    /// Drop the strong reference taken by [`pin`](Self::pin).
    pub fn unpin(&mut self, handle: NativeHandle) -> Result<(), HandleError> {
        let id = *self
            .by_handle
            .get(&handle)
            .ok_or(HandleError::UnknownHandle(handle))?;
        let pinned = self.slots.get_mut(id).and_then(|slot| slot.pinned.take());
        // Dropping the last clone here enqueues the finalization.
        drop(pinned);
        Ok(())
    }

    /// Perform the native releases of proxies finalized by `Drop`.
    pub fn drain_finalized(&mut self, native: &dyn NativeRefCount) -> usize {
        let mut drained = 0;
        for (id, handle) in self.finalizer.take_all() {
            // A missing slot was invalidated by the native side first.
            if self.slots.remove(id).is_none() {
                tracing::trace!("Skipping release of invalidated {}", handle);
                continue;
            }
            if self.by_handle.get(&handle) == Some(&id) {
                self.by_handle.remove(&handle);
            }
            native.release(handle);
            drained += 1;
        }
        if drained > 0 {
            tracing::trace!("Drained {} finalized proxies", drained);
        }
        drained
    }

    /// Number of slots, including proxies awaiting finalization.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn pending_finalizations(&self) -> u64 {
        self.finalizer.len()
    }

    /// Number of live proxies owned exclusively by `owner`.
    pub fn owned_by(&self, owner: OwnerId) -> usize {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.ownership == Ownership::Exclusive(owner))
            .count()
    }

    fn live_proxy(&self, handle: NativeHandle) -> Option<ManagedProxy> {
        let id = self.by_handle.get(&handle)?;
        let slot = self.slots.get(*id)?;
        slot.proxy.upgrade().filter(ManagedProxy::is_alive)
    }

    fn insert(&mut self, handle: NativeHandle, owner: OwnerId) -> ManagedProxy {
        let id = self.slots.next_id();
        let proxy = ManagedProxy::new(handle, id, self.id, self.finalizer.clone());
        let inserted = self.slots.insert(Slot {
            handle,
            proxy: proxy.downgrade(),
            ownership: Ownership::Exclusive(owner),
            pinned: None,
        });
        debug_assert_eq!(inserted, id);

        // Replaces a mapping whose proxy is mid-finalization; that release is
        // still queued under the old id.
        self.by_handle.insert(handle, id);
        tracing::trace!("Registered {} as {:?} for {}", handle, id, owner);
        proxy
    }

    fn forget(&mut self, id: ProxyId, handle: NativeHandle) {
        self.slots.remove(id);
        if self.by_handle.get(&handle) == Some(&id) {
            self.by_handle.remove(&handle);
        }
    }

    fn share(&mut self, id: ProxyId, owner: OwnerId) {
        if let Some(slot) = self.slots.get_mut(id) {
            if slot.ownership != Ownership::Exclusive(owner) {
                slot.ownership = Ownership::Shared;
            }
        }
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("id", &self.id)
            .field("slots", &self.slots.len())
            .field("pending_finalizations", &self.finalizer.len())
            .finish()
    }
}
