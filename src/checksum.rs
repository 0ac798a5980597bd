//! Streaming checksum accumulators
//!
//! The pool treats an accumulator as opaque: it calls [`Checksum::start`]
//! when the pool is configured, [`Checksum::add`] with bytes in strictly
//! ascending, contiguous offset order, and [`Checksum::end`] once the read
//! side reaches end of stream.

use std::fmt::Write as _;

/// Byte-order-respecting checksum accumulator
///
/// Implementations are invoked while the pool lock is held. They must be
/// CPU-bound and must never call back into the pool.
pub trait Checksum: Send {
    /// Short algorithm name used as the prefix of [`Checksum::to_hex`]
    fn algorithm(&self) -> &'static str;

    /// Reset to the initial state
    fn start(&mut self);

    /// Feed the next contiguous run of bytes
    fn add(&mut self, data: &[u8]);

    /// Finalize; calling it more than once has no further effect
    fn end(&mut self);

    /// Final digest, `None` until [`Checksum::end`] was called
    fn digest(&self) -> Option<Vec<u8>>;

    /// Render the digest as `algorithm:hex`
    fn to_hex(&self) -> Option<String> {
        let digest = self.digest()?;
        let mut out = String::with_capacity(self.algorithm().len() + 1 + digest.len() * 2);
        out.push_str(self.algorithm());
        out.push(':');
        for byte in digest {
            let _ = write!(out, "{:02x}", byte);
        }
        Some(out)
    }
}

/// CRC-32 (IEEE) accumulator backed by `crc32fast`
#[derive(Debug, Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
    count: u64,
    value: Option<u32>,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalized CRC value
    pub fn value(&self) -> Option<u32> {
        self.value
    }

    /// Number of bytes fed so far
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Checksum for Crc32 {
    fn algorithm(&self) -> &'static str {
        "crc32"
    }

    fn start(&mut self) {
        self.hasher = crc32fast::Hasher::new();
        self.count = 0;
        self.value = None;
    }

    fn add(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.count += data.len() as u64;
    }

    fn end(&mut self) {
        if self.value.is_none() {
            self.value = Some(self.hasher.clone().finalize());
        }
    }

    fn digest(&self) -> Option<Vec<u8>> {
        self.value.map(|v| v.to_be_bytes().to_vec())
    }
}

const CKSUM_POLY: u32 = 0x04C1_1DB7;

const CKSUM_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CKSUM_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// POSIX `cksum` accumulator
///
/// Non-reflected CRC-32 with the stream length appended before the final
/// complement, matching the output of the `cksum` utility.
#[derive(Debug, Clone, Default)]
pub struct Cksum {
    crc: u32,
    count: u64,
    value: Option<u32>,
}

impl Cksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalized value, as printed in decimal by `cksum`
    pub fn value(&self) -> Option<u32> {
        self.value
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn update(crc: u32, data: &[u8]) -> u32 {
        data.iter().fold(crc, |crc, &byte| {
            (crc << 8) ^ CKSUM_TABLE[((crc >> 24) as u8 ^ byte) as usize]
        })
    }
}

impl Checksum for Cksum {
    fn algorithm(&self) -> &'static str {
        "cksum"
    }

    fn start(&mut self) {
        self.crc = 0;
        self.count = 0;
        self.value = None;
    }

    fn add(&mut self, data: &[u8]) {
        self.crc = Self::update(self.crc, data);
        self.count += data.len() as u64;
    }

    fn end(&mut self) {
        if self.value.is_some() {
            return;
        }
        let mut crc = self.crc;
        let mut len = self.count;
        while len != 0 {
            crc = Self::update(crc, &[len as u8]);
            len >>= 8;
        }
        self.value = Some(!crc);
    }

    fn digest(&self) -> Option<Vec<u8>> {
        self.value.map(|v| v.to_be_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cksum_matches_utility() {
        // printf 123456789 | cksum  ->  930766865 9
        let mut sum = Cksum::new();
        sum.start();
        sum.add(b"1234");
        sum.add(b"56789");
        sum.end();
        assert_eq!(sum.value(), Some(930_766_865));
        assert_eq!(sum.count(), 9);
        assert_eq!(sum.to_hex().as_deref(), Some("cksum:377a6011"));
    }

    #[test]
    fn test_cksum_empty_and_short_input() {
        let mut sum = Cksum::new();
        sum.start();
        sum.end();
        assert_eq!(sum.value(), Some(0xffff_ffff));

        // printf abcdefgh | cksum  ->  1095960684 8
        sum.start();
        sum.add(b"abcdefgh");
        sum.end();
        assert_eq!(sum.value(), Some(1_095_960_684));
        assert_ne!(sum.value(), Some(crc32fast::hash(b"abcdefgh")));
    }

    #[test]
    fn test_crc32_matches_one_shot() {
        let mut sum = Crc32::new();
        sum.start();
        sum.add(b"hello ");
        sum.add(b"world");
        assert!(sum.digest().is_none());

        sum.end();
        assert_eq!(sum.value(), Some(crc32fast::hash(b"hello world")));
        assert_eq!(sum.count(), 11);
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut sum = Crc32::new();
        sum.start();
        sum.add(b"abc");
        sum.end();
        let first = sum.value();
        sum.add(b"more");
        sum.end();
        assert_eq!(sum.value(), first);
    }

    #[test]
    fn test_hex_rendering() {
        let mut sum = Crc32::new();
        sum.start();
        sum.end();
        // CRC-32 of the empty input is zero
        assert_eq!(sum.to_hex().as_deref(), Some("crc32:00000000"));
    }

    #[test]
    fn test_start_resets() {
        let mut sum = Crc32::new();
        sum.start();
        sum.add(b"garbage");
        sum.end();
        sum.start();
        sum.add(b"abc");
        sum.end();
        assert_eq!(sum.value(), Some(crc32fast::hash(b"abc")));
    }
}
