//! Throughput collaborator seam
//!
//! The pool consults a [`ThroughputMonitor`] on every completed write and on
//! every wake of a blocked operation. A rejection marks the transfer as
//! failed; the policy deciding what "too slow" means lives outside the pool.

/// Accept/reject policy for transfer progress
///
/// Called with the pool lock held; implementations must not block.
pub trait ThroughputMonitor: Send {
    /// Polled while an operation is waiting. Returning false rejects the
    /// transfer even though no bytes moved.
    fn check(&mut self) -> bool {
        true
    }

    /// Report `bytes` drained by the writer. Returning false rejects the
    /// transfer.
    fn transfer(&mut self, bytes: u64) -> bool;

    /// Total bytes reported so far
    fn transferred(&self) -> u64;

    /// Called when the pool is reconfigured
    fn reset(&mut self) {}
}

/// Monitor that never rejects and only counts bytes
#[derive(Debug, Default, Clone)]
pub struct Unthrottled {
    transferred: u64,
}

impl Unthrottled {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThroughputMonitor for Unthrottled {
    fn transfer(&mut self, bytes: u64) -> bool {
        self.transferred += bytes;
        true
    }

    fn transferred(&self) -> u64 {
        self.transferred
    }

    fn reset(&mut self) {
        self.transferred = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unthrottled_counts() {
        let mut monitor = Unthrottled::new();
        assert!(monitor.check());
        assert!(monitor.transfer(10));
        assert!(monitor.transfer(5));
        assert_eq!(monitor.transferred(), 15);

        monitor.reset();
        assert_eq!(monitor.transferred(), 0);
    }
}
