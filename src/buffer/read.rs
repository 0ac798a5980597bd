//! Read-side protocol (producer)

use super::lease::ReadLease;
use super::pool::{warn_stale, TransferPool};
use super::slot::{Slot, SlotId, SlotState};
use crate::metrics;
use std::ptr;
use tracing::{debug, warn};

impl TransferPool {
    /// True if at least one slot is free for filling
    pub fn probe_for_read(&self) -> bool {
        self.lock().slots.iter().any(Slot::is_free)
    }

    /// Reserve a free slot for filling.
    ///
    /// Returns `None` on any error flag, when the writer has signalled end of
    /// stream, when nothing is free and `wait` is false, or when a wait was
    /// aborted by an error or reconfiguration.
    pub fn acquire_for_read(&self, wait: bool) -> Option<ReadLease<'_>> {
        let mut state = self.lock();
        if state.slots.is_empty() {
            return None;
        }
        loop {
            if state.flags.any_error() {
                return None;
            }

            let found = state.slots.iter_mut().find_map(|slot| {
                if !slot.is_free() {
                    return None;
                }
                match slot.lend_storage() {
                    Some(storage) => {
                        slot.state = SlotState::ReservedForRead;
                        Some((slot.id, storage))
                    }
                    None => {
                        warn!(
                            slot = %slot.id,
                            capacity = slot.capacity,
                            "Failed to allocate slot storage"
                        );
                        None
                    }
                }
            });

            if let Some((id, storage)) = found {
                let generation = state.generation;
                debug!(slot = %id, generation, "Slot reserved for read");
                drop(state);
                self.wait.notify();
                return Some(ReadLease::new(self, id, generation, storage));
            }

            // The writer gave up, nothing will ever be freed
            if state.flags.eof_write {
                return None;
            }
            if !wait {
                return None;
            }
            metrics::WAITS_TOTAL.with_label_values(&["read"]).inc();
            if !self.wait.await_change(&mut state) {
                return None;
            }
        }
    }

    /// Publish `length` bytes of a filled slot at stream `offset`.
    ///
    /// Advances the checksum frontier and wakes the writer. Returns false,
    /// releasing the slot, if the lease belongs to another pool or an older
    /// configuration, if `length` exceeds the slot capacity, or if the range
    /// would end past `u64::MAX`.
    pub fn commit_read(&self, mut lease: ReadLease<'_>, length: usize, offset: u64) -> bool {
        if !ptr::eq(lease.pool, self) {
            return false;
        }
        let Some(storage) = lease.take_storage() else {
            return false;
        };
        let slot_id = lease.slot;

        let mut state = self.lock();
        if lease.generation != state.generation {
            warn_stale("read", slot_id, lease.generation, state.generation);
            return false;
        }
        let Some(slot) = state.slots.get_mut(slot_id.index()) else {
            return false;
        };
        if !slot.is_reserved_for_read() {
            return false;
        }
        slot.storage = Some(storage);
        let capacity = slot.capacity;
        let Some(end) = offset
            .checked_add(length as u64)
            .filter(|_| length <= capacity)
        else {
            warn!(
                slot = %slot_id,
                offset,
                length,
                capacity,
                "Rejected read commit outside slot or stream bounds"
            );
            slot.state = SlotState::Free;
            drop(state);
            self.wait.notify();
            return false;
        };
        slot.state = SlotState::Ready {
            offset,
            length,
            digested: false,
        };
        state.high_water = state.high_water.max(end);
        state.digest_committed();
        metrics::READ_BYTES_TOTAL.inc_by(length as u64);
        debug!(
            slot = %slot_id,
            offset,
            length,
            frontier = state.frontier.offset(),
            checksum_ready = state.frontier.is_ready(),
            "Slot committed by reader"
        );

        drop(state);
        self.wait.notify();
        true
    }

    /// Return an unfilled slot to the free list
    pub(super) fn abandon_read(&self, slot_id: SlotId, generation: u64, storage: Box<[u8]>) {
        let mut state = self.lock();
        if generation != state.generation {
            return;
        }
        if let Some(slot) = state.slots.get_mut(slot_id.index()) {
            if slot.is_reserved_for_read() {
                slot.state = SlotState::Free;
                slot.storage = Some(storage);
                debug!(slot = %slot_id, "Read lease released without commit");
            }
        }
        drop(state);
        self.wait.notify();
    }

    /// Signal (or clear) end of stream on the read side.
    ///
    /// Setting it finalizes the checksum; data committed afterwards is no
    /// longer digested.
    pub fn signal_read_eof(&self, eof: bool) {
        let mut state = self.lock();
        if eof {
            state.seal_checksum();
        }
        state.flags.eof_read = eof;
        debug!(eof, "Read side end of stream");
        drop(state);
        self.wait.notify();
    }

    /// Signal (or clear) a source failure.
    ///
    /// The first error wins: a read error is not recorded if the write side
    /// or the throughput monitor already failed. Either way the read side is
    /// marked finished so a blocked writer is released.
    pub fn signal_read_error(&self, is_error: bool) {
        let mut state = self.lock();
        if is_error {
            if !(state.flags.error_write || state.flags.error_transfer) {
                state.flags.error_read = true;
                metrics::ERRORS_TOTAL.with_label_values(&["read"]).inc();
                warn!(generation = state.generation, "Read side failed");
            }
            state.seal_checksum();
            state.flags.eof_read = true;
        } else {
            state.flags.error_read = false;
        }
        drop(state);
        self.wait.notify();
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::TransferPool;
    use crate::checksum::Crc32;

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = TransferPool::with_blocks(None, 8, 2);
        assert!(pool.probe_for_read());

        let a = pool.acquire_for_read(false).expect("first slot");
        let b = pool.acquire_for_read(false).expect("second slot");
        assert_ne!(a.slot(), b.slot());
        assert_eq!(a.capacity(), 8);
        assert!(!pool.probe_for_read());
        assert!(pool.acquire_for_read(false).is_none());

        drop(a);
        assert!(pool.probe_for_read());
        drop(b);
    }

    #[test]
    fn test_commit_publishes_data() {
        let pool = TransferPool::with_blocks(None, 8, 1);
        let mut lease = pool.acquire_for_read(false).unwrap();
        lease.as_mut_slice()[..3].copy_from_slice(b"xyz");
        assert!(lease.commit(3, 16));

        assert!(pool.probe_for_write());
        assert_eq!(pool.high_water_offset(), 19);

        let out = pool.acquire_for_write(false).unwrap();
        assert_eq!(out.offset(), 16);
        assert_eq!(out.as_slice(), b"xyz");
    }

    #[test]
    fn test_oversized_commit_rejected() {
        let pool = TransferPool::with_blocks(None, 4, 1);
        let lease = pool.acquire_for_read(false).unwrap();
        assert!(!pool.commit_read(lease, 5, 0));
        assert!(pool.probe_for_read());
        assert!(!pool.probe_for_write());
    }

    #[test]
    fn test_commit_past_end_of_offsets_rejected() {
        let pool = TransferPool::with_blocks(None, 4, 1);
        let lease = pool.acquire_for_read(false).unwrap();
        assert!(!lease.commit(4, u64::MAX - 1));
        assert!(pool.probe_for_read());
        assert!(!pool.probe_for_write());
        assert_eq!(pool.high_water_offset(), 0);

        // The last representable range is still accepted
        let lease = pool.acquire_for_read(false).unwrap();
        assert!(lease.commit(4, u64::MAX - 4));
        assert_eq!(pool.high_water_offset(), u64::MAX);
    }

    #[test]
    fn test_commit_near_end_of_offsets_with_checksum() {
        let pool = TransferPool::with_blocks(Some(Box::new(Crc32::new())), 4, 2);
        let lease = pool.acquire_for_read(false).unwrap();
        assert!(!lease.commit(4, u64::MAX - 2));

        let lease = pool.acquire_for_read(false).unwrap();
        assert!(lease.commit(4, u64::MAX - 4));
        assert_eq!(pool.checksum_frontier(), 0);
        assert!(!pool.checksum_ready());
    }

    #[test]
    fn test_stale_lease_rejected() {
        let pool = TransferPool::with_blocks(None, 4, 1);
        let lease = pool.acquire_for_read(false).unwrap();
        pool.configure(None, 4, 1);
        assert!(!pool.commit_read(lease, 4, 0));
        assert!(pool.probe_for_read());
    }

    #[test]
    fn test_lease_from_other_pool_rejected() {
        let first = TransferPool::with_blocks(None, 4, 1);
        let second = TransferPool::with_blocks(None, 4, 1);
        let lease = first.acquire_for_read(false).unwrap();
        assert!(!second.commit_read(lease, 4, 0));
        // Dropping the lease gave the slot back to its own pool
        assert!(first.probe_for_read());
        assert!(!second.probe_for_write());
    }

    #[test]
    fn test_eof_write_stops_reader() {
        let pool = TransferPool::with_blocks(None, 4, 1);
        let _held = pool.acquire_for_read(false).unwrap();
        pool.signal_write_eof(true);
        assert!(pool.acquire_for_read(true).is_none());
    }

    #[test]
    fn test_read_error_forces_eof() {
        let pool = TransferPool::with_blocks(None, 4, 1);
        pool.signal_read_error(true);
        assert!(pool.error_read());
        assert!(pool.eof_read());
        assert!(pool.acquire_for_read(true).is_none());

        pool.signal_read_error(false);
        assert!(!pool.error_read());
        assert!(pool.eof_read());
    }

    #[test]
    fn test_first_error_wins() {
        let pool = TransferPool::with_blocks(None, 4, 1);
        pool.signal_write_error(true);
        pool.signal_read_error(true);
        assert!(pool.error_write());
        assert!(!pool.error_read());
        assert!(pool.eof_read());
    }
}
