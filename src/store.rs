//! Sequence-number-ordered packet store.

use crate::packet::RtpPacket;
use crate::seq::seq_lt;
use std::collections::VecDeque;
use std::fmt;

/// A queue of packets ordered by circular RTP sequence number.
///
/// Front of the queue holds the lowest (oldest) sequence number, back
/// holds the highest (newest). `n` is bounded by `latency * clock_rate`
/// and stays small in practice, so a `VecDeque` with linear insertion is
/// the right tradeoff over a tree — this mirrors the bound `ezk-rtp`'s own
/// jitter buffer relies on for its `VecDeque`-based queue.
pub struct OrderedStore {
    queue: VecDeque<RtpPacket>,
}

impl fmt::Debug for OrderedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedStore")
            .field("len", &self.queue.len())
            .finish()
    }
}

impl Default for OrderedStore {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl OrderedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a packet in sequence order. Returns `false` if a packet with
    /// the same sequence number is already present (duplicate); the
    /// caller retains ownership of `packet` in that case by getting it
    /// back unchanged is not needed here — on duplicate the packet is
    /// simply dropped by the caller.
    pub fn insert(&mut self, packet: RtpPacket) -> bool {
        let seq = packet.sequence_number.0;

        let insert_at = self
            .queue
            .iter()
            .position(|existing| seq_lt(existing.sequence_number.0, seq) <= 0);

        match insert_at {
            None => {
                // Empty, or `packet` sorts after everything already held.
                self.queue.push_back(packet);
                true
            }
            Some(idx) if self.queue[idx].sequence_number.0 == seq => false,
            Some(idx) => {
                self.queue.insert(idx, packet);
                true
            }
        }
    }

    /// Remove and return the lowest-sequence packet. Panics if empty.
    pub fn pop_head(&mut self) -> RtpPacket {
        self.queue.pop_front().expect("pop_head on empty store")
    }

    pub fn peek_head(&self) -> Option<&RtpPacket> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// RTP-timestamp span of held packets: `rtp_ts(tail) - rtp_ts(head)`
    /// interpreted as a signed 32-bit difference. `0` if fewer than two
    /// packets are held.
    pub fn ts_span(&self) -> u32 {
        if self.queue.len() < 2 {
            return 0;
        }
        let head = self.queue.front().unwrap().timestamp.0;
        let tail = self.queue.back().unwrap().timestamp.0;
        tail.wrapping_sub(head)
    }

    /// Drop and release all held packets.
    pub fn flush(&mut self) {
        self.queue.clear();
    }
}
