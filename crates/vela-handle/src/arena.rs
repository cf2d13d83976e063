//! Generational arena
//!
//! Slot map backing the registry. A [`ProxyId`] stays unique for the life of
//! the arena even when its slot is reused.

use std::fmt;

/// Generational index of a proxy slot
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Debug for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyId({}v{})", self.index, self.generation)
    }
}

/// Generational arena (slot map)
pub struct GenArena<T> {
    items: Vec<Option<T>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T> GenArena<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Id the next insert will receive.
    pub fn next_id(&self) -> ProxyId {
        match self.free_list.last() {
            Some(&index) => ProxyId {
                index,
                generation: self.generations[index as usize],
            },
            None => ProxyId {
                index: self.items.len() as u32,
                generation: 0,
            },
        }
    }

    /// Insert item
    pub fn insert(&mut self, value: T) -> ProxyId {
        let id = match self.free_list.pop() {
            Some(index) => ProxyId {
                index,
                generation: self.generations[index as usize],
            },
            None => {
                let index = self.items.len() as u32;
                self.items.push(None);
                self.generations.push(0);
                ProxyId { index, generation: 0 }
            }
        };
        self.items[id.index as usize] = Some(value);
        self.live += 1;
        id
    }

    /// Get item
    pub fn get(&self, id: ProxyId) -> Option<&T> {
        if self.generations.get(id.index as usize) != Some(&id.generation) {
            return None;
        }
        self.items.get(id.index as usize).and_then(Option::as_ref)
    }

    /// Get mutable item
    pub fn get_mut(&mut self, id: ProxyId) -> Option<&mut T> {
        if self.generations.get(id.index as usize) != Some(&id.generation) {
            return None;
        }
        self.items.get_mut(id.index as usize).and_then(Option::as_mut)
    }

    /// Remove item, bumping the slot generation
    pub fn remove(&mut self, id: ProxyId) -> Option<T> {
        if self.generations.get(id.index as usize) != Some(&id.generation) {
            return None;
        }
        let value = self.items[id.index as usize].take()?;
        self.generations[id.index as usize] = id.generation.wrapping_add(1);
        self.free_list.push(id.index);
        self.live -= 1;
        Some(value)
    }

    /// Iterate live items with their ids
    pub fn iter(&self) -> impl Iterator<Item = (ProxyId, &T)> {
        self.items.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|value| {
                let id = ProxyId {
                    index: index as u32,
                    generation: self.generations[index],
                };
                (id, value)
            })
        })
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<T> Default for GenArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
