//! Exported JS values
//!
//! Every JS object that crosses to the facade gets a slot holding a
//! `Persistent` reference and a count of facade references. A slot created
//! for a borrowed value starts at zero and survives until the next top-level
//! engine call; `retain` keeps it alive past that.
//!
//! Slots are never freed inside a QuickJS call. Released values wait in a
//! graveyard until the engine drops them between calls.
//!
//! A slot belongs to the view whose context exported it and dies with that
//! context.

use std::collections::HashMap;

use rquickjs::{Persistent, Value};
use vela_view::NativeHandle;

/// Kind of exported value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Object,
    Array,
    Function,
}

struct Slot {
    value: Persistent<Value<'static>>,
    view: NativeHandle,
    kind: SlotKind,
    refs: u32,
}

#[derive(Default)]
pub struct HandleTable {
    slots: HashMap<NativeHandle, Slot>,
    graveyard: Vec<Persistent<Value<'static>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        handle: NativeHandle,
        view: NativeHandle,
        value: Persistent<Value<'static>>,
        kind: SlotKind,
    ) {
        self.slots.insert(
            handle,
            Slot {
                value,
                view,
                kind,
                refs: 0,
            },
        );
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.slots.contains_key(&handle)
    }

    /// Persistent reference and kind for `handle`.
    pub fn get(&self, handle: NativeHandle) -> Option<(Persistent<Value<'static>>, SlotKind)> {
        self.slots
            .get(&handle)
            .map(|slot| (slot.value.clone(), slot.kind))
    }

    pub fn refs(&self, handle: NativeHandle) -> Option<u32> {
        self.slots.get(&handle).map(|slot| slot.refs)
    }

    pub fn retain(&mut self, handle: NativeHandle) -> bool {
        match self.slots.get_mut(&handle) {
            Some(slot) => {
                slot.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one facade reference; the slot goes to the graveyard at zero.
    pub fn release(&mut self, handle: NativeHandle) -> bool {
        let Some(slot) = self.slots.get_mut(&handle) else {
            return false;
        };
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            if let Some(slot) = self.slots.remove(&handle) {
                self.graveyard.push(slot.value);
            }
        }
        true
    }

    /// Retire borrowed slots nobody retained.
    pub fn sweep(&mut self) -> usize {
        let unreferenced: Vec<NativeHandle> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.refs == 0)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &unreferenced {
            if let Some(slot) = self.slots.remove(handle) {
                self.graveyard.push(slot.value);
            }
        }
        unreferenced.len()
    }

    /// Retire every slot of `view`. Returns the handles the facade still
    /// referenced.
    pub fn retire_view(&mut self, view: NativeHandle) -> Vec<NativeHandle> {
        let owned: Vec<NativeHandle> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.view == view)
            .map(|(handle, _)| *handle)
            .collect();
        let mut referenced = Vec::new();
        for handle in owned {
            if let Some(slot) = self.slots.remove(&handle) {
                if slot.refs > 0 {
                    referenced.push(handle);
                }
                self.graveyard.push(slot.value);
            }
        }
        referenced.sort_unstable();
        referenced
    }

    /// Values to drop once no QuickJS call is running.
    pub fn take_graveyard(&mut self) -> Vec<Persistent<Value<'static>>> {
        std::mem::take(&mut self.graveyard)
    }

    /// Every remaining value, for engine shutdown.
    pub fn drain(&mut self) -> Vec<Persistent<Value<'static>>> {
        let mut all = self.take_graveyard();
        all.extend(self.slots.drain().map(|(_, slot)| slot.value));
        all
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
