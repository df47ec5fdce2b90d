//! Circular comparison of 16-bit RTP sequence numbers.

use std::cmp::Ordering;

/// Signed distance from `a` to `b` on the circular 16-bit sequence number
/// line.
///
/// Returns `b - a`, negative if `a` is "after" `b`. Computed as a 16-bit
/// wraparound subtraction reinterpreted as signed: this folds differences
/// whose plain magnitude exceeds `2^15` back onto the short path around
/// the circle, which is what "interpret as wrapped" means for a 16-bit
/// sequence space.
pub fn seq_lt(a: u16, b: u16) -> i32 {
    i32::from(b.wrapping_sub(a) as i16)
}

/// A sequence number with `Ord` defined via [`seq_lt`] instead of plain
/// integer comparison, so it can be used directly as a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CircularSeq(pub u16);

impl PartialOrd for CircularSeq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CircularSeq {
    fn cmp(&self, other: &Self) -> Ordering {
        seq_lt(self.0, other.0).cmp(&0)
    }
}
