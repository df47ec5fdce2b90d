//! A real-time RTP packet reordering and pacing jitter buffer.
//!
//! Sits between an RTP ingress path and a single egress pacing task: it
//! absorbs network jitter, reorders out-of-order packets, drops
//! duplicates and late arrivals, waits a bounded time for missing
//! packets, and releases packets on a schedule derived from their RTP
//! timestamps and a reference clock.
//!
//! The engine is a mutex+condvar state machine coordinating one producer
//! thread (calling [`JitterBuffer::push`]) and one dedicated consumer
//! thread (the pacing loop). It does not perform retransmission, FEC,
//! RTCP, or any payload-specific processing — those are external
//! collaborators.

pub mod clock;
pub mod engine;
pub mod error;
pub mod ext_timestamp;
pub mod lifecycle;
pub mod packet;
pub mod segment;
pub mod seq;
pub mod store;

pub use clock::{Clock, ClockId, SystemClock, WaitResult};
pub use engine::{DownstreamSink, OutputPacket, PtMapResolver, SrcResult, Stats};
pub use error::{DownstreamError, PushError};
pub use ext_timestamp::ExtTsTracker;
pub use lifecycle::{Caps, InvalidTransition, JitterBuffer, Phase};
pub use packet::{RtpPacket, RtpTimestamp, SequenceNumber, Ssrc};
pub use segment::Segment;
pub use seq::{seq_lt, CircularSeq};
pub use store::OrderedStore;
