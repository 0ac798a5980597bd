//! Slot management for the transfer pool

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a slot inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub usize);

impl SlotId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

/// Position of a slot in its read/write cycle
///
/// `digested` records whether the checksum accumulator has consumed the
/// slot's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    ReservedForRead,
    Ready {
        offset: u64,
        length: usize,
        digested: bool,
    },
    ReservedForWrite {
        offset: u64,
        length: usize,
        digested: bool,
    },
}

impl SlotState {
    /// Committed data that has not been digested, as `(offset, length)`
    pub fn pending_digest(&self) -> Option<(u64, usize)> {
        match *self {
            SlotState::Ready {
                offset,
                length,
                digested: false,
            }
            | SlotState::ReservedForWrite {
                offset,
                length,
                digested: false,
            } => Some((offset, length)),
            _ => None,
        }
    }
}

/// A slot in the transfer pool
///
/// `storage` is `None` until the slot is first reserved, and while its
/// buffer is lent out to a lease.
#[derive(Debug)]
pub struct Slot {
    pub id: SlotId,
    pub capacity: usize,
    pub state: SlotState,
    pub storage: Option<Box<[u8]>>,
}

impl Slot {
    /// Create a new free slot without storage
    pub fn new(id: SlotId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            state: SlotState::Free,
            storage: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SlotState::Ready { .. })
    }

    pub fn is_reserved_for_read(&self) -> bool {
        self.state == SlotState::ReservedForRead
    }

    /// Free or about to be filled: the reader can still put data here
    pub fn is_fillable(&self) -> bool {
        matches!(self.state, SlotState::Free | SlotState::ReservedForRead)
    }

    /// Take the buffer out of the slot, allocating it on first use.
    ///
    /// Returns `None` if the allocator refuses the request.
    pub fn lend_storage(&mut self) -> Option<Box<[u8]>> {
        if let Some(storage) = self.storage.take() {
            return Some(storage);
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(self.capacity).ok()?;
        buf.resize(self.capacity, 0);
        Some(buf.into_boxed_slice())
    }

    /// Bytes committed into this slot, if it holds data
    pub fn data(&self) -> Option<&[u8]> {
        match self.state {
            SlotState::Ready { length, .. } => {
                self.storage.as_deref().map(|buf| &buf[..length])
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_display() {
        let id = SlotId(5);
        assert_eq!(id.index(), 5);
        assert_eq!(id.to_string(), "Slot(5)");
    }

    #[test]
    fn test_lazy_storage() {
        let mut slot = Slot::new(SlotId(0), 16);
        assert!(slot.storage.is_none());

        let buf = slot.lend_storage().expect("allocation");
        assert_eq!(buf.len(), 16);
        assert!(slot.storage.is_none());

        slot.storage = Some(buf);
        let again = slot.lend_storage().expect("reuse");
        assert_eq!(again.len(), 16);
    }

    #[test]
    fn test_state_predicates() {
        let mut slot = Slot::new(SlotId(1), 8);
        assert!(slot.is_free());
        assert!(slot.is_fillable());

        slot.state = SlotState::ReservedForRead;
        assert!(slot.is_reserved_for_read());
        assert!(slot.is_fillable());

        slot.state = SlotState::Ready {
            offset: 8,
            length: 4,
            digested: false,
        };
        assert!(slot.is_ready());
        assert!(!slot.is_fillable());
        assert_eq!(slot.state.pending_digest(), Some((8, 4)));

        slot.state = SlotState::Ready {
            offset: 8,
            length: 4,
            digested: true,
        };
        assert_eq!(slot.state.pending_digest(), None);
    }

    #[test]
    fn test_data_view() {
        let mut slot = Slot::new(SlotId(0), 8);
        slot.storage = Some(vec![1, 2, 3, 4, 5, 6, 7, 8].into_boxed_slice());
        assert!(slot.data().is_none());

        slot.state = SlotState::Ready {
            offset: 0,
            length: 3,
            digested: false,
        };
        assert_eq!(slot.data(), Some(&[1u8, 2, 3][..]));
    }
}
