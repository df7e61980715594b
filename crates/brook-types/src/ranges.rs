//! Contiguous sequence-id ranges used by the deletion log.
//!
//! A range covers `[low, hi)`.  Two encodings denote a single message:
//! `hi == 0` and `hi == low + 1`.  The log always stores the explicit form
//! (`hi == low + 1`) and collapses back to the marker form (`hi == 0`) when
//! read, so the two are indistinguishable after a round trip.

use serde::{Deserialize, Serialize};

/// A half-open range of message sequence ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelRange {
    pub low: u32,
    /// Exclusive upper bound; 0 means the single message `low`.
    pub hi: u32,
}

impl DelRange {
    pub fn new(low: u32, hi: u32) -> DelRange {
        DelRange { low, hi }
    }

    /// A range covering exactly one message.
    pub fn single(seq: u32) -> DelRange {
        DelRange { low: seq, hi: 0 }
    }

    /// Explicit bounds as written to the log: `hi == 0` becomes `low + 1`.
    pub fn for_write(&self) -> (u32, u32) {
        if self.hi == 0 {
            (self.low, self.low + 1)
        } else {
            (self.low, self.hi)
        }
    }

    /// Rebuild a range from logged bounds, collapsing single-element ranges
    /// back to the `hi == 0` marker form.
    pub fn from_log(low: u32, hi: u32) -> DelRange {
        if hi <= low + 1 {
            DelRange { low, hi: 0 }
        } else {
            DelRange { low, hi }
        }
    }

    /// Number of sequence ids covered.
    pub fn len(&self) -> u32 {
        let (low, hi) = self.for_write();
        hi - low
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `seq` falls inside the range.
    pub fn contains(&self, seq: u32) -> bool {
        let (low, hi) = self.for_write();
        seq >= low && seq < hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_element_forms_are_indistinguishable_after_round_trip() {
        let marker = DelRange::new(5, 0);
        let explicit = DelRange::new(5, 6);

        let (lo_a, hi_a) = marker.for_write();
        let (lo_b, hi_b) = explicit.for_write();
        assert_eq!((lo_a, hi_a), (lo_b, hi_b));

        assert_eq!(DelRange::from_log(lo_a, hi_a), DelRange::from_log(lo_b, hi_b));
        assert_eq!(DelRange::from_log(lo_a, hi_a).hi, 0);
    }

    #[test]
    fn wide_range_survives_round_trip() {
        let r = DelRange::new(2, 9);
        let (lo, hi) = r.for_write();
        assert_eq!(DelRange::from_log(lo, hi), r);
    }

    #[test]
    fn containment() {
        let r = DelRange::new(2, 4);
        assert!(r.contains(2));
        assert!(r.contains(3));
        assert!(!r.contains(4));

        let s = DelRange::single(7);
        assert!(s.contains(7));
        assert!(!s.contains(8));
    }
}
