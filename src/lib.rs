// transferbuf - Transfer buffer pool
// Decouples a source reader from a destination writer during data movement

#![warn(rust_2018_idioms)]

pub mod buffer;
pub mod checksum;
pub mod config;
pub mod delivery;
pub mod metrics;
pub mod throughput;

// Re-exports for convenience
pub use buffer::{PoolStatus, ReadLease, SlotId, TransferPool, WriteLease};
pub use checksum::{Checksum, Cksum, Crc32};
pub use config::{ChecksumKind, DeliveryConfig, PoolConfig};
pub use delivery::{Delivery, DeliveryReport};
pub use throughput::{ThroughputMonitor, Unthrottled};

/// transferbuf error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Read error: {0}")]
        Read(String),

        #[error("Write error: {0}")]
        Write(String),

        #[error("Transfer error: {0}")]
        Transfer(String),

        #[error("Pool reconfigured during transfer (generation {expected} -> {found})")]
        Invalidated { expected: u64, found: u64 },

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Internal error: {0}")]
        Internal(String),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;

    #[test]
    fn test_invalidated_message() {
        let err = Error::Invalidated {
            expected: 3,
            found: 4,
        };
        assert_eq!(
            err.to_string(),
            "Pool reconfigured during transfer (generation 3 -> 4)"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
