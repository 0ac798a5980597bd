//! Write-side protocol (consumer)

use super::lease::WriteLease;
use super::pool::{warn_stale, TransferPool};
use super::slot::{Slot, SlotId, SlotState};
use crate::metrics;
use std::ptr;
use tracing::{debug, warn};

/// Lowest-offset block available to the writer
struct Candidate {
    idx: usize,
    offset: u64,
    length: usize,
    digested: bool,
}

impl TransferPool {
    /// True if at least one slot holds committed data
    pub fn probe_for_write(&self) -> bool {
        self.lock().slots.iter().any(Slot::is_ready)
    }

    /// Reserve the committed slot with the smallest offset for draining.
    ///
    /// While a checksum is behind a gap and the reader can still fill that
    /// gap, blocks at or beyond the frontier are held back so the checksum
    /// can be computed in order without extra buffering.
    ///
    /// Returns `None` on any error flag, at clean end of stream (reader
    /// finished and nothing left), when nothing is available and `wait` is
    /// false, or when a wait was aborted.
    pub fn acquire_for_write(&self, wait: bool) -> Option<WriteLease<'_>> {
        let mut state = self.lock();
        if state.slots.is_empty() {
            return None;
        }
        loop {
            if state.flags.any_error() {
                return None;
            }

            let mut have_for_read = false;
            let mut have_fillable = false;
            let mut best: Option<Candidate> = None;
            for (idx, slot) in state.slots.iter().enumerate() {
                have_for_read |= slot.is_reserved_for_read();
                have_fillable |= slot.is_fillable();
                if let SlotState::Ready {
                    offset,
                    length,
                    digested,
                } = slot.state
                {
                    if best.as_ref().map_or(true, |b| offset < b.offset) {
                        best = Some(Candidate {
                            idx,
                            offset,
                            length,
                            digested,
                        });
                    }
                }
            }

            if let Some(candidate) = best {
                if state.withholds(candidate.offset) && have_fillable && !state.flags.eof_read {
                    metrics::WITHHELD_TOTAL.inc();
                    debug!(
                        offset = candidate.offset,
                        frontier = state.frontier.offset(),
                        "Holding block back until checksum catches up"
                    );
                    if !wait {
                        return None;
                    }
                    if !self.wait.await_change(&mut state) {
                        return None;
                    }
                    continue;
                }

                let generation = state.generation;
                let slot = &mut state.slots[candidate.idx];
                let Some(storage) = slot.storage.take() else {
                    // Ready slots always own their buffer
                    slot.state = SlotState::Free;
                    continue;
                };
                slot.state = SlotState::ReservedForWrite {
                    offset: candidate.offset,
                    length: candidate.length,
                    digested: candidate.digested,
                };
                let id = slot.id;
                debug!(
                    slot = %id,
                    offset = candidate.offset,
                    length = candidate.length,
                    "Slot reserved for write"
                );
                drop(state);
                self.wait.notify();
                return Some(WriteLease::new(
                    self,
                    id,
                    generation,
                    candidate.offset,
                    candidate.length,
                    storage,
                ));
            }

            if state.flags.eof_read && !have_for_read {
                return None;
            }
            if !wait {
                return None;
            }
            metrics::WAITS_TOTAL.with_label_values(&["write"]).inc();
            if !self.wait.await_change(&mut state) {
                return None;
            }
        }
    }

    /// Mark a drained slot as written and free it.
    ///
    /// The slot's length is reported to the throughput monitor, which may
    /// reject the transfer.
    pub fn commit_write(&self, mut lease: WriteLease<'_>) {
        if !ptr::eq(lease.pool, self) {
            return;
        }
        if let Some(storage) = lease.take_storage() {
            self.finish_write(lease.slot, lease.generation, storage, true);
        }
    }

    /// Free a slot whose write failed, without reporting its bytes
    pub fn discard_write(&self, mut lease: WriteLease<'_>) {
        if !ptr::eq(lease.pool, self) {
            return;
        }
        if let Some(storage) = lease.take_storage() {
            self.finish_write(lease.slot, lease.generation, storage, false);
        }
    }

    pub(super) fn finish_write(
        &self,
        slot_id: SlotId,
        generation: u64,
        storage: Box<[u8]>,
        report: bool,
    ) {
        let mut state = self.lock();
        if generation != state.generation {
            warn_stale("write", slot_id, generation, state.generation);
            return;
        }
        let idx = slot_id.index();
        let length = match state.slots.get(idx).map(|slot| slot.state) {
            Some(SlotState::ReservedForWrite { length, .. }) => length,
            _ => return,
        };

        if report {
            metrics::WRITTEN_BYTES_TOTAL.inc_by(length as u64);
            if !state.monitor.transfer(length as u64) && state.reject_transfer() {
                warn!(
                    slot = %slot_id,
                    transferred = state.monitor.transferred(),
                    "Throughput monitor rejected transfer"
                );
            }
        }
        state.release_slot(idx, storage);
        debug!(slot = %slot_id, written = report, "Slot released by writer");

        drop(state);
        self.wait.notify();
    }

    /// Signal (or clear) end of stream on the write side
    pub fn signal_write_eof(&self, eof: bool) {
        let mut state = self.lock();
        state.flags.eof_write = eof;
        debug!(eof, "Write side end of stream");
        drop(state);
        self.wait.notify();
    }

    /// Signal (or clear) a destination failure; the write side is marked
    /// finished so a blocked reader is released.
    pub fn signal_write_error(&self, is_error: bool) {
        let mut state = self.lock();
        if is_error {
            if !(state.flags.error_read || state.flags.error_transfer) {
                state.flags.error_write = true;
                metrics::ERRORS_TOTAL.with_label_values(&["write"]).inc();
                warn!(generation = state.generation, "Write side failed");
            }
            state.flags.eof_write = true;
        } else {
            state.flags.error_write = false;
        }
        drop(state);
        self.wait.notify();
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::TransferPool;
    use crate::checksum::Crc32;

    fn commit(pool: &TransferPool, offset: u64, data: &[u8]) {
        let mut lease = pool.acquire_for_read(false).expect("free slot");
        lease.as_mut_slice()[..data.len()].copy_from_slice(data);
        assert!(lease.commit(data.len(), offset));
    }

    #[test]
    fn test_smallest_offset_first() {
        let pool = TransferPool::with_blocks(None, 4, 3);
        commit(&pool, 8, b"cccc");
        commit(&pool, 0, b"aaaa");
        commit(&pool, 4, b"bbbb");

        let offsets: Vec<u64> = (0..3)
            .map(|_| {
                let lease = pool.acquire_for_write(false).unwrap();
                let offset = lease.offset();
                lease.commit();
                offset
            })
            .collect();
        assert_eq!(offsets, vec![0, 4, 8]);
    }

    #[test]
    fn test_no_double_checkout() {
        let pool = TransferPool::with_blocks(None, 4, 2);
        commit(&pool, 0, b"aaaa");

        let held = pool.acquire_for_write(false).unwrap();
        assert!(!pool.probe_for_write());
        assert!(pool.acquire_for_write(false).is_none());
        held.commit();
    }

    #[test]
    fn test_withholds_block_beyond_gap() {
        let pool = TransferPool::with_blocks(Some(Box::new(Crc32::new())), 4, 2);
        commit(&pool, 4, b"bbbb");
        assert!(!pool.checksum_ready());

        // A free slot remains, so the reader may still fill offset 0
        assert!(pool.acquire_for_write(false).is_none());

        pool.signal_read_eof(true);
        let lease = pool.acquire_for_write(false).expect("released at eof");
        assert_eq!(lease.offset(), 4);
    }

    #[test]
    fn test_releases_when_nothing_fillable() {
        let pool = TransferPool::with_blocks(Some(Box::new(Crc32::new())), 4, 1);
        commit(&pool, 4, b"bbbb");
        // The only slot holds data; holding it back would deadlock
        let lease = pool.acquire_for_write(false).expect("released");
        lease.commit();
        assert!(!pool.checksum_ready());
    }

    #[test]
    fn test_no_withholding_without_checksum() {
        let pool = TransferPool::with_blocks(None, 4, 2);
        commit(&pool, 4, b"bbbb");
        assert!(pool.checksum_ready());
        assert_eq!(pool.acquire_for_write(false).unwrap().offset(), 4);
    }

    #[test]
    fn test_clean_end_of_stream() {
        let pool = TransferPool::with_blocks(None, 4, 2);
        pool.signal_read_eof(true);
        assert!(pool.acquire_for_write(true).is_none());
    }

    #[test]
    fn test_discard_does_not_report() {
        let pool = TransferPool::with_blocks(None, 4, 2);
        commit(&pool, 0, b"aaaa");
        commit(&pool, 4, b"bbbb");

        pool.acquire_for_write(false).unwrap().discard();
        pool.acquire_for_write(false).unwrap().commit();
        assert_eq!(pool.bytes_transferred(), 4);
        assert_eq!(pool.snapshot().free, 2);
    }

    #[test]
    fn test_dropped_write_lease_frees_slot() {
        let pool = TransferPool::with_blocks(None, 4, 1);
        commit(&pool, 0, b"aaaa");
        drop(pool.acquire_for_write(false).unwrap());
        assert!(pool.probe_for_read());
        assert_eq!(pool.bytes_transferred(), 0);
    }

    #[test]
    fn test_write_error_forces_eof() {
        let pool = TransferPool::with_blocks(None, 4, 1);
        pool.signal_write_error(true);
        assert!(pool.error_write());
        assert!(pool.eof_write());
        assert!(pool.acquire_for_write(true).is_none());
    }
}
