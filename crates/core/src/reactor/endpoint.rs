use std::os::fd::RawFd;
use std::time::Instant;

use crate::error::{Result, WallError};

use super::Reactor;

/// Capacity of the endpoint table.
pub const MAX_ENDPOINTS: usize = 64;

/// Callback invoked by the reactor for readiness or housekeeping.
///
/// Whatever the closure captures is its user data. It receives the reactor
/// itself, so it may rewrite any endpoint, including its own.
pub type Callback = Box<dyn FnMut(&mut Reactor, EndpointHandle)>;

/// Stable reference to a registered endpoint.
///
/// The generation is unique per registration, so a handle kept across a
/// `release` never addresses whatever endpoint later reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointHandle {
    index: u32,
    generation: u32,
}

impl EndpointHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// One watched source: a camera, the keyboard, a remote bridge.
pub(crate) struct Endpoint {
    pub name: String,
    pub fd: Option<RawFd>,
    pub on_read: Option<Callback>,
    pub deadline: Option<Instant>,
    pub on_housekeeping: Option<Callback>,
}

impl Endpoint {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fd: None,
            on_read: None,
            deadline: None,
            on_housekeeping: None,
        }
    }

    /// Neither readable nor waiting on a timer.
    pub fn is_inert(&self) -> bool {
        (self.fd.is_none() || self.on_read.is_none())
            && (self.deadline.is_none() || self.on_housekeeping.is_none())
    }
}

struct Slot {
    generation: u32,
    endpoint: Option<Endpoint>,
}

/// Fixed-capacity slot arena.
///
/// Slots never move. Freed slots are reused lowest-index first and trailing
/// free slots are trimmed by [`compact`](Self::compact), which only the
/// reactor calls, and only between dispatch passes.
pub(crate) struct EndpointTable {
    slots: Vec<Slot>,
    live: usize,
    next_generation: u32,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(MAX_ENDPOINTS),
            live: 0,
            next_generation: 1,
        }
    }

    pub fn insert(&mut self, name: &str) -> Result<EndpointHandle> {
        if self.live >= MAX_ENDPOINTS {
            return Err(WallError::TableFull(MAX_ENDPOINTS));
        }

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);

        let index = match self.slots.iter().position(|s| s.endpoint.is_none()) {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    endpoint: None,
                });
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[index];
        slot.generation = generation;
        slot.endpoint = Some(Endpoint::new(name));
        self.live += 1;

        Ok(EndpointHandle {
            index: index as u32,
            generation,
        })
    }

    pub fn remove(&mut self, handle: EndpointHandle) -> Option<Endpoint> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let removed = slot.endpoint.take();
        if removed.is_some() {
            self.live -= 1;
        }
        removed
    }

    pub fn get(&self, handle: EndpointHandle) -> Option<&Endpoint> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.endpoint.as_ref()
    }

    pub fn get_mut(&mut self, handle: EndpointHandle) -> Option<&mut Endpoint> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.endpoint.as_mut()
    }

    /// Trim free slots from the tail of the table.
    pub fn compact(&mut self) {
        while self.slots.last().is_some_and(|s| s.endpoint.is_none()) {
            self.slots.pop();
        }
    }

    /// Handles of every live endpoint, in slot order.
    pub fn snapshot(&self) -> Vec<EndpointHandle> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EndpointHandle, &Endpoint)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.endpoint.as_ref().map(|endpoint| {
                (
                    EndpointHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    endpoint,
                )
            })
        })
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_lowest_free_slot() {
        let mut table = EndpointTable::new();
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        let _c = table.insert("c").unwrap();

        table.remove(a);
        table.remove(b);
        let d = table.insert("d").unwrap();
        assert_eq!(d.index(), 0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn stale_handle_does_not_alias_reused_slot() {
        let mut table = EndpointTable::new();
        let old = table.insert("old").unwrap();
        table.remove(old);
        let new = table.insert("new").unwrap();

        assert_eq!(old.index(), new.index());
        assert!(table.get(old).is_none());
        assert_eq!(table.get(new).unwrap().name, "new");
    }

    #[test]
    fn compact_trims_only_the_tail() {
        let mut table = EndpointTable::new();
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        let c = table.insert("c").unwrap();

        table.remove(a);
        table.remove(c);
        table.compact();

        assert_eq!(table.slot_count(), 2);
        assert_eq!(table.get(b).unwrap().name, "b");
        assert!(table.get(c).is_none(), "trimmed handle must stay stale");

        let d = table.insert("d").unwrap();
        assert_eq!(d.index(), 0);
        assert!(table.get(c).is_none());
    }

    #[test]
    fn table_full() {
        let mut table = EndpointTable::new();
        for i in 0..MAX_ENDPOINTS {
            table.insert(&format!("ep{i}")).unwrap();
        }
        assert!(matches!(
            table.insert("overflow"),
            Err(WallError::TableFull(MAX_ENDPOINTS))
        ));
    }

    #[test]
    fn inert_until_readable_or_timed() {
        let mut table = EndpointTable::new();
        let handle = table.insert("cam").unwrap();
        let endpoint = table.get_mut(handle).unwrap();
        assert!(endpoint.is_inert());

        endpoint.fd = Some(3);
        assert!(endpoint.is_inert(), "a descriptor without a read callback is not watched");

        endpoint.deadline = Some(Instant::now());
        endpoint.on_housekeeping = Some(Box::new(|_: &mut Reactor, _: EndpointHandle| {}));
        assert!(!endpoint.is_inert());

        endpoint.deadline = None;
        endpoint.on_read = Some(Box::new(|_: &mut Reactor, _: EndpointHandle| {}));
        assert!(!endpoint.is_inert());
    }
}
