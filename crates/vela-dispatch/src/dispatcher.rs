//! Callback table
//!
//! Registrations are owned here, never by proxies, so a native object that
//! holds a callback which captures a proxy to that same object does not keep
//! itself alive. Owners drop all of their registrations in one mutation.

use std::collections::{HashMap, HashSet};

use vela_handle::OwnerId;
use vela_value::{Callback, CallbackBinder, CallbackToken, MarshalError};

use crate::DispatchError;

struct Registration {
    owner: OwnerId,
    name: Option<String>,
    callback: Callback,
    invocations: u64,
}

/// Registration looked up for one invocation
#[derive(Clone)]
pub struct ResolvedCallback {
    pub token: CallbackToken,
    pub owner: OwnerId,
    pub name: Option<String>,
    pub callback: Callback,
}

impl std::fmt::Debug for ResolvedCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCallback")
            .field("token", &self.token)
            .field("owner", &self.owner)
            .field("name", &self.name)
            .finish()
    }
}

/// Managed callback dispatcher
#[derive(Default)]
pub struct CallbackDispatcher {
    next_token: u64,
    entries: HashMap<CallbackToken, Registration>,
    closed: HashSet<OwnerId>,
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `owner`, optionally under a script-visible name.
    pub fn register(
        &mut self,
        owner: OwnerId,
        name: Option<&str>,
        callback: Callback,
    ) -> Result<CallbackToken, DispatchError> {
        if self.closed.contains(&owner) {
            tracing::debug!("Refusing callback registration for closed {}", owner);
            return Err(DispatchError::OwnerClosed(owner));
        }

        self.next_token += 1;
        let token = CallbackToken(self.next_token);
        self.entries.insert(
            token,
            Registration {
                owner,
                name: name.map(str::to_owned),
                callback,
                invocations: 0,
            },
        );
        tracing::trace!("Registered {} ({:?}) for {}", token, name, owner);
        Ok(token)
    }

    /// Remove one registration. Returns false if it was already gone.
    pub fn unregister(&mut self, token: CallbackToken) -> bool {
        self.entries.remove(&token).is_some()
    }

    /// Look up `token` for an invocation.
    pub fn resolve(&mut self, token: CallbackToken) -> Result<ResolvedCallback, DispatchError> {
        let Some(entry) = self.entries.get_mut(&token) else {
            tracing::debug!("Dropping invocation of stale {}", token);
            return Err(DispatchError::StaleCallback(token));
        };
        entry.invocations += 1;
        Ok(ResolvedCallback {
            token,
            owner: entry.owner,
            name: entry.name.clone(),
            callback: entry.callback.clone(),
        })
    }

    /// Remove every registration of `owner` and refuse new ones.
    ///
    /// Returns the removed tokens in registration order.
    pub fn invalidate_owner(&mut self, owner: OwnerId) -> Vec<CallbackToken> {
        self.closed.insert(owner);

        let mut removed: Vec<CallbackToken> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(token, _)| *token)
            .collect();
        removed.sort_unstable();
        for token in &removed {
            self.entries.remove(token);
        }

        tracing::debug!("Invalidated {} callbacks of {}", removed.len(), owner);
        removed
    }

    pub fn contains(&self, token: CallbackToken) -> bool {
        self.entries.contains_key(&token)
    }

    pub fn is_closed(&self, owner: OwnerId) -> bool {
        self.closed.contains(&owner)
    }

    /// Drop the closed mark of `owner`. Only call this once nothing queued
    /// can still name the owner.
    pub fn forget_owner(&mut self, owner: OwnerId) -> bool {
        self.closed.remove(&owner)
    }

    pub fn closed_owners(&self) -> usize {
        self.closed.len()
    }

    pub fn owner_of(&self, token: CallbackToken) -> Option<OwnerId> {
        self.entries.get(&token).map(|entry| entry.owner)
    }

    /// Script-visible name of `token`, if it was registered under one.
    pub fn name_of(&self, token: CallbackToken) -> Option<&str> {
        self.entries.get(&token).and_then(|entry| entry.name.as_deref())
    }

    /// How many times `token` has been resolved for invocation.
    pub fn invocations(&self, token: CallbackToken) -> Option<u64> {
        self.entries.get(&token).map(|entry| entry.invocations)
    }

    pub fn owned_by(&self, owner: OwnerId) -> usize {
        self.entries.values().filter(|entry| entry.owner == owner).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CallbackBinder for CallbackDispatcher {
    fn bind(&mut self, owner: OwnerId, callback: Callback) -> Result<CallbackToken, MarshalError> {
        self.register(owner, None, callback)
            .map_err(|err| MarshalError::Binding(err.to_string()))
    }

    fn is_bound(&self, token: CallbackToken) -> bool {
        self.contains(token)
    }
}
