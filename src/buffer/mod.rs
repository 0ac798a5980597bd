//! Transfer Buffer Pool
//!
//! Decouples a source reader from a destination writer. The reader fills
//! fixed-size slots, possibly out of order when several streams read in
//! parallel; the writer drains them lowest offset first; an optional
//! checksum observes the bytes strictly in stream order.
//!
//! # Architecture
//!
//! ```text
//! TransferPool (one Mutex + one Condvar)
//!   ├─→ Slot 0: Free
//!   ├─→ Slot 1: ReservedForRead        ← ReadLease (reader fills)
//!   ├─→ Slot 2: Ready(offset=8, len=4)
//!   ├─→ Slot 3: ReservedForWrite       ← WriteLease (writer drains)
//!   │
//!   ├─→ ChecksumFrontier: offset=4, ready=false (gap at 4..8)
//!   └─→ generation: bumped by every configure()
//!
//! Free ──acquire_for_read──→ ReservedForRead ──commit_read──→ Ready
//!   ↑                                                          │
//!   └──commit_write / discard_write── ReservedForWrite ←──acquire_for_write
//! ```
//!
//! Slot storage is allocated on first reservation and travels with the
//! lease while a slot is checked out, so neither actor holds the pool lock
//! during I/O.

pub mod frontier;
pub mod lease;
pub mod pool;
pub mod read;
pub mod slot;
mod wait;
pub mod write;

pub use frontier::ChecksumFrontier;
pub use lease::{ReadLease, WriteLease};
pub use pool::{PoolStatus, TransferPool, DEFAULT_BLOCK_SIZE, DEFAULT_WAKE_INTERVAL};
pub use slot::{Slot, SlotId, SlotState};
