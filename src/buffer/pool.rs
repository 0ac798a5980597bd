//! Transfer pool lifecycle and query surface
//!
//! The read-side and write-side protocols live in `read.rs` and `write.rs`
//! as further `impl TransferPool` blocks; this file owns the shared state,
//! (re)configuration and everything both actors may ask about.

use super::frontier::ChecksumFrontier;
use super::slot::{Slot, SlotId, SlotState};
use super::wait::WaitPrimitive;
use crate::checksum::Checksum;
use crate::config::PoolConfig;
use crate::error::Error;
use crate::metrics;
use crate::throughput::{ThroughputMonitor, Unthrottled};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Block size reported by an unconfigured pool
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default bound on a single condition-variable wait
pub const DEFAULT_WAKE_INTERVAL: Duration = Duration::from_secs(1);

/// Sticky end-of-stream and error flags
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Flags {
    pub(crate) eof_read: bool,
    pub(crate) eof_write: bool,
    pub(crate) error_read: bool,
    pub(crate) error_write: bool,
    pub(crate) error_transfer: bool,
}

impl Flags {
    pub(crate) fn any_error(&self) -> bool {
        self.error_read || self.error_write || self.error_transfer
    }

    /// No further state change is expected from either actor
    pub(crate) fn terminal(&self) -> bool {
        self.error_read || self.error_write || (self.eof_read && self.eof_write)
    }
}

/// Everything guarded by the pool mutex
pub(crate) struct PoolState {
    pub(crate) slots: Vec<Slot>,
    pub(crate) block_size: usize,
    pub(crate) flags: Flags,
    pub(crate) high_water: u64,
    pub(crate) generation: u64,
    pub(crate) checksum: Option<Box<dyn Checksum>>,
    pub(crate) frontier: ChecksumFrontier,
    pub(crate) monitor: Box<dyn ThroughputMonitor>,
    pub(crate) wake_interval: Duration,
}

impl PoolState {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            block_size: 0,
            flags: Flags::default(),
            high_water: 0,
            generation: 0,
            checksum: None,
            frontier: ChecksumFrontier::new(),
            monitor: Box::new(Unthrottled::new()),
            wake_interval: DEFAULT_WAKE_INTERVAL,
        }
    }

    /// Flag the transfer as rejected unless the pool is already terminal.
    /// Returns true if the flag was newly raised.
    pub(crate) fn reject_transfer(&mut self) -> bool {
        if self.flags.terminal() || self.flags.error_transfer {
            return false;
        }
        self.flags.error_transfer = true;
        metrics::ERRORS_TOTAL.with_label_values(&["transfer"]).inc();
        true
    }

    /// Feed newly contiguous committed data to the checksum
    pub(crate) fn digest_committed(&mut self) {
        if let Some(sum) = self.checksum.as_deref_mut() {
            let fed = self.frontier.advance(&mut self.slots, sum);
            if fed > 0 {
                metrics::DIGESTED_BYTES_TOTAL.inc_by(fed);
            }
        }
    }

    /// Finalize the checksum once; later commits no longer reach it
    pub(crate) fn seal_checksum(&mut self) {
        if self.frontier.is_sealed() {
            return;
        }
        if let Some(sum) = self.checksum.as_deref_mut() {
            sum.end();
        }
        self.frontier.seal();
    }

    /// Hand a drained slot back to the free list
    pub(crate) fn release_slot(&mut self, idx: usize, storage: Box<[u8]>) {
        let slot = &mut self.slots[idx];
        if let SlotState::ReservedForWrite {
            offset,
            length,
            digested,
        } = slot.state
        {
            if self.checksum.is_some() {
                self.frontier.on_release(offset, length, digested);
            }
        }
        slot.state = SlotState::Free;
        slot.storage = Some(storage);
    }

    /// Whether the write side must hold back a block starting at `offset`
    /// to let the checksum catch up
    pub(crate) fn withholds(&self, offset: u64) -> bool {
        !self.frontier.is_ready()
            && !self.frontier.has_hole()
            && offset >= self.frontier.offset()
    }
}

/// Point-in-time view of the pool, for logging and reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub generation: u64,
    pub block_size: usize,
    pub block_count: usize,
    pub free: usize,
    pub reserved_for_read: usize,
    pub ready: usize,
    pub reserved_for_write: usize,
    pub eof_read: bool,
    pub eof_write: bool,
    pub error_read: bool,
    pub error_write: bool,
    pub error_transfer: bool,
    pub high_water_offset: u64,
    pub checksum_frontier: u64,
    pub checksum_ready: bool,
    pub bytes_transferred: u64,
}

/// Fixed set of transfer slots shared by one reader and one writer actor
///
/// Readers fill slots in any offset order; writers always receive the
/// lowest available offset; an optional checksum sees the stream strictly
/// in order. All coordination goes through one mutex and one condition
/// variable.
pub struct TransferPool {
    pub(super) state: Mutex<PoolState>,
    pub(super) wait: WaitPrimitive,
}

impl fmt::Debug for TransferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferPool")
            .field("status", &self.snapshot())
            .finish()
    }
}

impl Default for TransferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferPool {
    /// Create an empty, inert pool
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState::new()),
            wait: WaitPrimitive::new(),
        }
    }

    /// Create and configure a pool
    pub fn with_blocks(
        checksum: Option<Box<dyn Checksum>>,
        block_size: usize,
        block_count: usize,
    ) -> Self {
        let pool = Self::new();
        pool.configure(checksum, block_size, block_count);
        pool
    }

    /// Create a pool from configuration
    pub fn from_config(config: &PoolConfig, checksum: Option<Box<dyn Checksum>>) -> Self {
        let pool = Self::new();
        pool.set_wake_interval(config.wake_interval());
        pool.configure(checksum, config.block_size, config.block_count);
        pool
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock()
    }

    /// (Re)configure the pool.
    ///
    /// Frees all slot storage, clears every flag, resets the frontier and
    /// arms `checksum`. Bumps the generation, so threads blocked under the
    /// previous configuration give up and leases issued under it are
    /// rejected. A zero `block_size` or `block_count` leaves the pool inert.
    pub fn configure(
        &self,
        checksum: Option<Box<dyn Checksum>>,
        block_size: usize,
        block_count: usize,
    ) {
        let mut state = self.lock();
        state.generation += 1;
        state.slots = if block_size == 0 || block_count == 0 {
            Vec::new()
        } else {
            (0..block_count)
                .map(|i| Slot::new(SlotId(i), block_size))
                .collect()
        };
        state.block_size = block_size;
        state.flags = Flags::default();
        state.high_water = 0;
        state.frontier = ChecksumFrontier::new();
        state.checksum = checksum;
        if let Some(sum) = state.checksum.as_deref_mut() {
            sum.start();
        }
        state.monitor.reset();

        metrics::RECONFIGURATIONS_TOTAL.inc();
        metrics::SLOTS_CONFIGURED.set(state.slots.len() as i64);
        info!(
            generation = state.generation,
            block_size,
            block_count = state.slots.len(),
            checksum = state.checksum.as_ref().map(|s| s.algorithm()),
            "Configured transfer pool"
        );

        drop(state);
        self.wait.notify();
    }

    /// Bound for a single internal wait
    pub fn set_wake_interval(&self, interval: Duration) {
        self.lock().wake_interval = interval.max(Duration::from_millis(1));
    }

    /// Replace the throughput collaborator
    pub fn set_throughput_monitor(&self, monitor: Box<dyn ThroughputMonitor>) {
        self.lock().monitor = monitor;
    }

    /// Configuration counter, bumped by every [`TransferPool::configure`]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Number of slots in the current configuration
    pub fn block_count(&self) -> usize {
        self.lock().slots.len()
    }

    /// Largest slot capacity, or [`DEFAULT_BLOCK_SIZE`] when unconfigured
    pub fn suggested_block_size(&self) -> usize {
        let state = self.lock();
        state
            .slots
            .iter()
            .map(|slot| slot.capacity)
            .max()
            .unwrap_or(DEFAULT_BLOCK_SIZE)
    }

    pub fn eof_read(&self) -> bool {
        self.lock().flags.eof_read
    }

    pub fn eof_write(&self) -> bool {
        self.lock().flags.eof_write
    }

    pub fn error_read(&self) -> bool {
        self.lock().flags.error_read
    }

    pub fn error_write(&self) -> bool {
        self.lock().flags.error_write
    }

    /// True if the throughput monitor rejected the transfer
    pub fn error_transfer(&self) -> bool {
        self.lock().flags.error_transfer
    }

    pub fn has_error(&self) -> bool {
        self.lock().flags.any_error()
    }

    /// Offset following the last byte ever committed (gaps ignored)
    pub fn high_water_offset(&self) -> u64 {
        self.lock().high_water
    }

    /// Bytes accepted by the throughput monitor
    pub fn bytes_transferred(&self) -> u64 {
        self.lock().monitor.transferred()
    }

    /// Whether the checksum has consumed everything committed so far
    pub fn checksum_ready(&self) -> bool {
        self.lock().frontier.is_ready()
    }

    pub fn checksum_frontier(&self) -> u64 {
        self.lock().frontier.offset()
    }

    /// Access the armed accumulator.
    ///
    /// The guard holds the pool lock; drop it before calling back into the
    /// pool.
    pub fn checksum_accumulator(&self) -> Option<MappedMutexGuard<'_, dyn Checksum + 'static>> {
        MutexGuard::try_map(self.lock(), |state| state.checksum.as_deref_mut()).ok()
    }

    /// Finalized checksum rendered as `algorithm:hex`
    pub fn checksum_hex(&self) -> Option<String> {
        self.lock().checksum.as_ref().and_then(|sum| sum.to_hex())
    }

    /// Translate the sticky flags into an error, if any is set
    pub fn failure(&self) -> Option<Error> {
        let flags = self.lock().flags;
        if flags.error_transfer {
            Some(Error::Transfer(
                "throughput monitor rejected the transfer".to_string(),
            ))
        } else if flags.error_read {
            Some(Error::Read("source side reported a failure".to_string()))
        } else if flags.error_write {
            Some(Error::Write(
                "destination side reported a failure".to_string(),
            ))
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> PoolStatus {
        let state = self.lock();
        let mut status = PoolStatus {
            generation: state.generation,
            block_size: state.block_size,
            block_count: state.slots.len(),
            free: 0,
            reserved_for_read: 0,
            ready: 0,
            reserved_for_write: 0,
            eof_read: state.flags.eof_read,
            eof_write: state.flags.eof_write,
            error_read: state.flags.error_read,
            error_write: state.flags.error_write,
            error_transfer: state.flags.error_transfer,
            high_water_offset: state.high_water,
            checksum_frontier: state.frontier.offset(),
            checksum_ready: state.frontier.is_ready(),
            bytes_transferred: state.monitor.transferred(),
        };
        for slot in &state.slots {
            match slot.state {
                SlotState::Free => status.free += 1,
                SlotState::ReservedForRead => status.reserved_for_read += 1,
                SlotState::Ready { .. } => status.ready += 1,
                SlotState::ReservedForWrite { .. } => status.reserved_for_write += 1,
            }
        }
        status
    }

    /// Wait for one change of pool state; see the read/write acquire calls
    /// for how the result is used
    pub fn wait_any(&self) -> bool {
        let mut state = self.lock();
        self.wait.await_change(&mut state)
    }

    /// Block until the read side has signalled end of stream.
    ///
    /// This and the other `wait_until_*_eof`/`*_done` waits do not observe
    /// reconfiguration: `configure` clears the flags they wait for, so a
    /// caller blocked across it keeps waiting for the new configuration's
    /// actors. Use [`TransferPool::wait_any`] in a loop to be released by
    /// a generation change instead.
    pub fn wait_until_read_eof(&self) {
        let mut state = self.lock();
        self.wait.wait_until(&mut state, |s| s.flags.eof_read);
    }

    /// Block until the write side has signalled end of stream
    pub fn wait_until_write_eof(&self) {
        let mut state = self.lock();
        self.wait.wait_until(&mut state, |s| s.flags.eof_write);
    }

    pub fn wait_until_both_eof(&self) {
        let mut state = self.lock();
        self.wait
            .wait_until(&mut state, |s| s.flags.eof_read && s.flags.eof_write);
    }

    /// Block until the read side finished or failed
    pub fn wait_until_read_done(&self) {
        let mut state = self.lock();
        self.wait
            .wait_until(&mut state, |s| s.flags.eof_read || s.flags.error_read);
    }

    /// Block until the write side finished or failed
    pub fn wait_until_write_done(&self) {
        let mut state = self.lock();
        self.wait
            .wait_until(&mut state, |s| s.flags.eof_write || s.flags.error_write);
    }

    /// Block until every slot is free again. Returns false if the wait was
    /// aborted by an error or a reconfiguration.
    pub fn wait_until_drained(&self) -> bool {
        let mut state = self.lock();
        while state.slots.iter().any(|slot| !slot.is_free()) {
            if !self.wait.await_change(&mut state) {
                return false;
            }
        }
        true
    }
}

impl Drop for TransferPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.generation += 1;
        state.slots.clear();
        state.checksum = None;
        debug!(generation = state.generation, "Transfer pool torn down");
    }
}

/// Log a lease that arrived after its configuration was replaced
pub(super) fn warn_stale(kind: &str, slot: SlotId, lease_generation: u64, current: u64) {
    warn!(
        %slot,
        lease_generation,
        current_generation = current,
        "Discarding {} lease from a previous configuration",
        kind
    );
}
