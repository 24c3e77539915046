//! Ring identifiers.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// Errors from identifier construction and ring arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChordError {
    /// Bit count outside the supported `1..=63` range.
    #[error("bit count {0} not in 1..=63")]
    InvalidBitCount(u32),
    /// A value does not fit in the ring defined by its bit count.
    #[error("id value {value} out of range for {bit_count} bits")]
    IdOutOfRange {
        /// The offending value.
        value: u64,
        /// The ring's bit count.
        bit_count: u32,
    },
    /// Two ids from rings of different sizes were combined.
    #[error("bit count mismatch: {0} vs {1}")]
    BitCountMismatch(u32, u32),
    /// The base (self) id was supplied where an external id is required.
    #[error("operation not valid for the base id")]
    BaseIdNotAllowed,
}

/// An identifier on the ring `0..2^bit_count`.
///
/// All arithmetic is modular in the ring; two ids only interoperate when
/// their bit counts agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    value: u64,
    bit_count: u32,
}

impl NodeId {
    /// Construct an id, validating that `value < 2^bit_count`.
    pub fn new(value: u64, bit_count: u32) -> Result<Self, ChordError> {
        if !(1..=63).contains(&bit_count) {
            return Err(ChordError::InvalidBitCount(bit_count));
        }
        if value >= (1u64 << bit_count) {
            return Err(ChordError::IdOutOfRange { value, bit_count });
        }
        Ok(NodeId { value, bit_count })
    }

    /// Raw value.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Ring size exponent.
    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    fn ring(&self) -> u64 {
        1u64 << self.bit_count
    }

    fn check_same_ring(&self, other: &NodeId) -> Result<(), ChordError> {
        if self.bit_count != other.bit_count {
            return Err(ChordError::BitCountMismatch(self.bit_count, other.bit_count));
        }
        Ok(())
    }

    /// `(self + other) mod 2^bit_count`.
    pub fn add(&self, other: &NodeId) -> Result<NodeId, ChordError> {
        self.check_same_ring(other)?;
        Ok(NodeId {
            value: (self.value + other.value) % self.ring(),
            bit_count: self.bit_count,
        })
    }

    /// `(self - other) mod 2^bit_count`.
    pub fn subtract(&self, other: &NodeId) -> Result<NodeId, ChordError> {
        self.check_same_ring(other)?;
        Ok(NodeId {
            value: (self.value + self.ring() - other.value) % self.ring(),
            bit_count: self.bit_count,
        })
    }

    /// Forward distance travelled going from `base` to `self` around the
    /// ring.
    pub fn distance_from(&self, base: &NodeId) -> Result<u64, ChordError> {
        self.check_same_ring(base)?;
        Ok((self.value + self.ring() - base.value) % self.ring())
    }

    /// Order `a` and `b` by their position on the ring rooted at `base`.
    pub fn compare_position(base: &NodeId, a: &NodeId, b: &NodeId) -> Result<Ordering, ChordError> {
        let da = a.distance_from(base)?;
        let db = b.distance_from(base)?;
        Ok(da.cmp(&db))
    }

    /// `true` if `self` lies in the ring interval from `lower` to `upper`
    /// (rooted at `lower`), with configurable endpoint inclusivity. When
    /// `lower == upper` the interval spans the whole ring.
    pub fn is_within(
        &self,
        lower: &NodeId,
        lower_inclusive: bool,
        upper: &NodeId,
        upper_inclusive: bool,
    ) -> Result<bool, ChordError> {
        let rel = self.distance_from(lower)?;
        let span = upper.distance_from(lower)?;

        let above_lower = if lower_inclusive { true } else { rel > 0 };
        let below_upper = if span == 0 {
            // Degenerate full-ring interval.
            if upper_inclusive { true } else { rel != 0 }
        } else if upper_inclusive {
            rel <= span
        } else {
            rel < span
        };
        Ok(above_lower && below_upper)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}b", self.value, self.bit_count)
    }
}
