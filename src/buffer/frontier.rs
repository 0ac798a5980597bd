//! Checksum frontier
//!
//! Tracks the contiguous prefix of the stream that the checksum accumulator
//! has consumed. Slots may be committed in any order; bytes only reach the
//! accumulator once everything below them has.

use super::slot::{Slot, SlotState};
use crate::checksum::Checksum;
use std::collections::BTreeMap;

/// Digest progress through the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumFrontier {
    offset: u64,
    ready: bool,
    /// Accumulator finalized; no more bytes are fed
    sealed: bool,
    /// Bytes at or beyond the frontier left the pool undigested
    hole: bool,
}

impl Default for ChecksumFrontier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumFrontier {
    pub fn new() -> Self {
        Self {
            offset: 0,
            ready: true,
            sealed: false,
            hole: false,
        }
    }

    /// Stream offset up to which the accumulator has consumed data
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// True when no committed data is waiting beyond a gap
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Some bytes beyond the frontier were lost; readiness cannot return
    pub fn has_hole(&self) -> bool {
        self.hole
    }

    /// Stop feeding the accumulator. `ready` keeps its last value.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Feed every committed slot that extends the contiguous prefix into
    /// `sum`, then recompute readiness. Returns the number of bytes fed.
    pub fn advance(&mut self, slots: &mut [Slot], sum: &mut dyn Checksum) -> u64 {
        if self.sealed {
            return 0;
        }

        let mut pending: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (idx, slot) in slots.iter().enumerate() {
            if let SlotState::Ready {
                offset,
                digested: false,
                ..
            } = slot.state
            {
                if offset >= self.offset {
                    pending.entry(offset).or_default().push(idx);
                }
            }
        }

        let mut fed = 0u64;
        while let Some(run) = pending.remove(&self.offset) {
            for idx in run {
                let slot = &mut slots[idx];
                let SlotState::Ready {
                    offset,
                    length,
                    digested: false,
                } = slot.state
                else {
                    continue;
                };
                // An earlier slot in this run may already have moved us on
                if offset != self.offset {
                    continue;
                }
                let Some(buf) = slot.storage.as_deref() else {
                    continue;
                };
                sum.add(&buf[..length]);
                slot.state = SlotState::Ready {
                    offset,
                    length,
                    digested: true,
                };
                // commit_read rejects ranges ending past u64::MAX
                self.offset = self.offset.saturating_add(length as u64);
                fed += length as u64;
            }
        }

        self.ready = !self.hole && !self.gap_beyond(slots);
        fed
    }

    /// Record a slot leaving the pool. Undigested bytes at or beyond the
    /// frontier can never be fed, so readiness is lost for good.
    pub fn on_release(&mut self, offset: u64, length: usize, digested: bool) {
        if self.sealed || digested || length == 0 {
            return;
        }
        if offset >= self.offset {
            self.hole = true;
            self.ready = false;
        }
    }

    fn gap_beyond(&self, slots: &[Slot]) -> bool {
        slots.iter().any(|slot| match slot.state.pending_digest() {
            Some((offset, length)) => {
                offset > self.offset || (offset == self.offset && length > 0)
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::slot::SlotId;
    use crate::checksum::Crc32;

    fn ready_slot(idx: usize, offset: u64, data: &[u8]) -> Slot {
        let mut slot = Slot::new(SlotId(idx), 8);
        let mut buf = vec![0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        slot.storage = Some(buf.into_boxed_slice());
        slot.state = SlotState::Ready {
            offset,
            length: data.len(),
            digested: false,
        };
        slot
    }

    #[test]
    fn test_in_order_advance() {
        let mut sum = Crc32::new();
        sum.start();
        let mut frontier = ChecksumFrontier::new();
        let mut slots = vec![ready_slot(0, 0, b"abcd"), ready_slot(1, 4, b"efgh")];

        assert_eq!(frontier.advance(&mut slots, &mut sum), 8);
        assert_eq!(frontier.offset(), 8);
        assert!(frontier.is_ready());

        sum.end();
        assert_eq!(sum.value(), Some(crc32fast::hash(b"abcdefgh")));
    }

    #[test]
    fn test_gap_blocks_advance() {
        let mut sum = Crc32::new();
        sum.start();
        let mut frontier = ChecksumFrontier::new();
        let mut slots = vec![ready_slot(0, 4, b"efgh"), Slot::new(SlotId(1), 8)];

        assert_eq!(frontier.advance(&mut slots, &mut sum), 0);
        assert_eq!(frontier.offset(), 0);
        assert!(!frontier.is_ready());

        slots[1] = ready_slot(1, 0, b"abcd");
        assert_eq!(frontier.advance(&mut slots, &mut sum), 8);
        assert_eq!(frontier.offset(), 8);
        assert!(frontier.is_ready());
    }

    #[test]
    fn test_zero_length_slot_is_consumed() {
        let mut sum = Crc32::new();
        sum.start();
        let mut frontier = ChecksumFrontier::new();
        let mut slots = vec![ready_slot(0, 0, b"abcd"), ready_slot(1, 4, b"")];

        frontier.advance(&mut slots, &mut sum);
        assert_eq!(frontier.offset(), 4);
        assert!(frontier.is_ready());
        assert_eq!(slots[1].state.pending_digest(), None);
    }

    #[test]
    fn test_sealed_frontier_freezes() {
        let mut sum = Crc32::new();
        sum.start();
        let mut frontier = ChecksumFrontier::new();
        let mut slots = vec![ready_slot(0, 4, b"efgh")];
        frontier.advance(&mut slots, &mut sum);
        assert!(!frontier.is_ready());

        frontier.seal();
        slots.push(ready_slot(1, 0, b"abcd"));
        assert_eq!(frontier.advance(&mut slots, &mut sum), 0);
        assert_eq!(frontier.offset(), 0);
        assert!(!frontier.is_ready());
    }

    #[test]
    fn test_release_beyond_frontier_leaves_hole() {
        let mut sum = Crc32::new();
        sum.start();
        let mut frontier = ChecksumFrontier::new();

        frontier.on_release(0, 0, false);
        assert!(frontier.is_ready());

        frontier.on_release(4, 4, false);
        assert!(!frontier.is_ready());

        let mut slots = vec![ready_slot(0, 0, b"abcd")];
        frontier.advance(&mut slots, &mut sum);
        assert_eq!(frontier.offset(), 4);
        assert!(!frontier.is_ready());
    }

    #[test]
    fn test_release_below_frontier_is_harmless() {
        let mut sum = Crc32::new();
        sum.start();
        let mut frontier = ChecksumFrontier::new();
        let mut slots = vec![ready_slot(0, 0, b"abcd")];
        frontier.advance(&mut slots, &mut sum);

        // Duplicate data for an already digested range
        frontier.on_release(0, 4, false);
        assert!(frontier.is_ready());
    }
}
