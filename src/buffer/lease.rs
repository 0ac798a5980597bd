//! Checked-out slots
//!
//! A lease owns the slot's buffer for as long as the slot is reserved, so
//! the reader fills and the writer drains it without holding the pool lock.
//! Committing consumes the lease; dropping it releases the slot.

use super::pool::TransferPool;
use super::slot::SlotId;
use std::fmt;

/// A slot reserved for filling by the reader
pub struct ReadLease<'a> {
    pub(super) pool: &'a TransferPool,
    pub(super) slot: SlotId,
    pub(super) generation: u64,
    pub(super) storage: Option<Box<[u8]>>,
}

impl<'a> ReadLease<'a> {
    pub(super) fn new(
        pool: &'a TransferPool,
        slot: SlotId,
        generation: u64,
        storage: Box<[u8]>,
    ) -> Self {
        Self {
            pool,
            slot,
            generation,
            storage: Some(storage),
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Pool generation this lease was issued under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of bytes the slot can hold
    pub fn capacity(&self) -> usize {
        self.storage.as_ref().map_or(0, |buf| buf.len())
    }

    /// Writable view of the whole slot
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.storage.as_deref_mut().unwrap_or_default()
    }

    /// Shorthand for [`TransferPool::commit_read`]
    pub fn commit(self, length: usize, offset: u64) -> bool {
        let pool = self.pool;
        pool.commit_read(self, length, offset)
    }

    pub(super) fn take_storage(&mut self) -> Option<Box<[u8]>> {
        self.storage.take()
    }
}

impl Drop for ReadLease<'_> {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.pool.abandon_read(self.slot, self.generation, storage);
        }
    }
}

impl fmt::Debug for ReadLease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadLease")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// A slot holding committed data, reserved for draining by the writer
pub struct WriteLease<'a> {
    pub(super) pool: &'a TransferPool,
    pub(super) slot: SlotId,
    pub(super) generation: u64,
    pub(super) offset: u64,
    pub(super) length: usize,
    pub(super) storage: Option<Box<[u8]>>,
}

impl<'a> WriteLease<'a> {
    pub(super) fn new(
        pool: &'a TransferPool,
        slot: SlotId,
        generation: u64,
        offset: u64,
        length: usize,
        storage: Box<[u8]>,
    ) -> Self {
        Self {
            pool,
            slot,
            generation,
            offset,
            length,
            storage: Some(storage),
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stream offset of the first byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The committed bytes
    pub fn as_slice(&self) -> &[u8] {
        match self.storage.as_deref() {
            Some(buf) => &buf[..self.length],
            None => &[],
        }
    }

    /// Shorthand for [`TransferPool::commit_write`]
    pub fn commit(self) {
        let pool = self.pool;
        pool.commit_write(self);
    }

    /// Shorthand for [`TransferPool::discard_write`]
    pub fn discard(self) {
        let pool = self.pool;
        pool.discard_write(self);
    }

    pub(super) fn take_storage(&mut self) -> Option<Box<[u8]>> {
        self.storage.take()
    }
}

impl Drop for WriteLease<'_> {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.pool
                .finish_write(self.slot, self.generation, storage, false);
        }
    }
}

impl fmt::Debug for WriteLease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteLease")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}
