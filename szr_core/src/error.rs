//! Error types for compression and decoding.

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = core::result::Result<T, SzError>;

#[derive(Debug, Error)]
pub enum SzError {
    /// One of the volume extents is zero.
    #[error("invalid dimensions {r1}x{r2}x{r3}: every extent must be at least 1")]
    InvalidDimensions { r1: usize, r2: usize, r3: usize },

    /// The error bound is not a finite positive number.
    #[error("invalid precision {0}: must be finite and > 0")]
    InvalidPrecision(f64),

    /// The volume slice does not hold `r1 * r2 * r3` samples.
    #[error("volume holds {actual} samples but dimensions describe {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("allocation failed: could not allocate {requested_bytes} bytes")]
    AllocationFailed { requested_bytes: usize },

    #[error("corrupted container: {message} at offset {offset}")]
    Corrupted { message: String, offset: usize },

    #[error("truncated container: need {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        needed: usize,
        offset: usize,
        available: usize,
    },

    #[error("checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("codec mismatch: container uses codec {found} but provided codec has id {expected}")]
    CodecMismatch { expected: u16, found: u16 },

    #[error("unsupported container version {0}.{1}.{2}")]
    UnsupportedVersion(u8, u8, u8),

    #[error("block index {index} out of range (total {total})")]
    BlockOutOfRange { index: usize, total: usize },

    #[error("huffman coding error: {0}")]
    Huffman(String),

    /// The auxiliary integer-array codec failed.
    #[error("auxiliary codec error: {0}")]
    Codec(anyhow::Error),

    /// An internal invariant did not hold (e.g. the size upper bound).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SzError {
    pub fn corrupted(message: impl Into<String>, offset: usize) -> Self {
        SzError::Corrupted {
            message: message.into(),
            offset,
        }
    }

    /// True for errors raised by input validation, before any work was done.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SzError::InvalidDimensions { .. }
                | SzError::InvalidPrecision(_)
                | SzError::LengthMismatch { .. }
                | SzError::InvalidConfig(_)
        )
    }
}

/// Allocate a `len`-element vector filled with `value`, reporting
/// allocation failure as an error instead of aborting.
pub(crate) fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>> {
    let mut v = try_with_capacity(len)?;
    v.resize(len, value);
    Ok(v)
}

/// Reserve exactly `capacity` elements up front.
pub(crate) fn try_with_capacity<T>(capacity: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(capacity)
        .map_err(|_| SzError::AllocationFailed {
            requested_bytes: capacity.saturating_mul(std::mem::size_of::<T>()),
        })?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        assert!(SzError::InvalidPrecision(0.0).is_precondition());
        assert!(SzError::InvalidDimensions { r1: 0, r2: 1, r3: 1 }.is_precondition());
        assert!(!SzError::AllocationFailed { requested_bytes: 8 }.is_precondition());
        assert!(!SzError::corrupted("bad", 3).is_precondition());
    }

    #[test]
    fn test_huge_allocation_is_reported() {
        let err = try_with_capacity::<u64>(usize::MAX / 4).unwrap_err();
        assert!(matches!(err, SzError::AllocationFailed { .. }));
    }

    #[test]
    fn test_try_filled() {
        let v = try_filled(5, 7i32).unwrap();
        assert_eq!(v, vec![7; 5]);
    }
}
