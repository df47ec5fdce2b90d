//! Error taxonomy for the push path (spec.md §7).

use std::fmt;

/// Errors a `push` call can return. Late and duplicate packets are not
/// represented here — they are counted, not reported, per spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Malformed RTP header. Fatal: the packet is released and the
    /// element should surface this as an error message upstream.
    #[error("malformed RTP packet: {0}")]
    Decode(#[from] rtp_types::RtpParseError),

    /// `clock_rate` could not be resolved via the pt-map hook.
    #[error("clock rate not negotiated for payload type")]
    NotNegotiated,

    /// The element is being flushed or torn down.
    #[error("flushing")]
    Flushing,

    /// EOS was already delivered; no further packets are accepted.
    #[error("unexpected packet after EOS")]
    UnexpectedEos,

    /// The downstream consumer reported and stored this error; repeated
    /// on every subsequent push until the element is reset.
    #[error("downstream error: {0}")]
    Downstream(DownstreamError),
}

/// Opaque downstream failure, stored in `src_result` once the consumer
/// observes a failed push and surfaced to every subsequent producer push.
#[derive(Debug, Clone)]
pub struct DownstreamError(pub String);

impl fmt::Display for DownstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DownstreamError {}
