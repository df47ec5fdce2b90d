//! Minimal TIME-format segment: converts an RTP-timestamp-derived
//! duration into pipeline running time.

use std::time::Duration;

/// The segment installed by `new_segment` (spec.md §6). Only the `TIME`
/// format is accepted; non-TIME segments are rejected by the caller
/// before a `Segment` is ever constructed.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub rate: f64,
    pub start: Duration,
    pub stop: Option<Duration>,
    pub time: Duration,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            rate: 1.0,
            start: Duration::ZERO,
            stop: None,
            time: Duration::ZERO,
        }
    }
}

impl Segment {
    /// Convert a stream-time duration (already clock-rate converted to
    /// nanoseconds) into running time relative to the segment.
    pub fn to_running_time(&self, position: Duration) -> Duration {
        let elapsed = position.saturating_sub(self.start);
        if self.rate == 1.0 {
            elapsed
        } else {
            Duration::from_secs_f64(elapsed.as_secs_f64() / self.rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rate_passes_through() {
        let segment = Segment::default();
        assert_eq!(
            segment.to_running_time(Duration::from_millis(500)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn start_offset_is_subtracted() {
        let segment = Segment {
            start: Duration::from_millis(100),
            ..Segment::default()
        };
        assert_eq!(
            segment.to_running_time(Duration::from_millis(500)),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn position_before_start_clamps_to_zero() {
        let segment = Segment {
            start: Duration::from_millis(100),
            ..Segment::default()
        };
        assert_eq!(
            segment.to_running_time(Duration::from_millis(50)),
            Duration::ZERO
        );
    }
}
