//! RTP packet header fields consumed by the jitter buffer.

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ssrc(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RtpTimestamp(pub u32);

/// An RTP packet as it flows through the buffer: opaque payload plus the
/// header fields the engine needs (sequence number, timestamp, payload
/// type). Payload-specific parsing is out of scope; the payload is kept
/// as an untouched byte range.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub pt: u8,
    pub sequence_number: SequenceNumber,
    pub ssrc: Ssrc,
    pub timestamp: RtpTimestamp,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Parse and validate the fixed RTP header. Returns an error for
    /// anything `rtp-types` rejects as malformed.
    pub fn parse(bytes: impl Into<Bytes>) -> Result<Self, rtp_types::RtpParseError> {
        let packet: Bytes = bytes.into();
        let parsed = rtp_types::RtpPacket::parse(&packet[..])?;

        Ok(Self {
            pt: parsed.payload_type(),
            sequence_number: SequenceNumber(parsed.sequence_number()),
            ssrc: Ssrc(parsed.ssrc()),
            timestamp: RtpTimestamp(parsed.timestamp()),
            payload: packet.slice_ref(parsed.payload()),
        })
    }
}
