//! Element lifecycle, configuration surface and latency query
//! aggregation (spec.md §4.5 "State machine", §6).

use crate::clock::Clock;
use crate::engine::{self, DownstreamSink, PtMapResolver, Shared, Stats};
use crate::error::PushError;
use crate::segment::Segment;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Element state, matching spec.md §4.5's
/// `Idle -> Armed -> Running <-> Armed -> Flushing -> Armed -> Shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Armed,
    Running,
    Flushing,
    Shutdown,
}

/// Error returned when a lifecycle method is called from a phase that
/// doesn't allow it.
#[derive(Debug, thiserror::Error)]
#[error("invalid transition from {from:?}")]
pub struct InvalidTransition {
    pub from: Phase,
}

/// `set_caps` input (spec.md §6): only the fields this engine consumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Caps {
    pub clock_rate: Option<u32>,
    pub clock_base: Option<u32>,
    pub seqnum_base: Option<u16>,
}

/// The jitter buffer element. Owns the coordination state, the downstream
/// sink, the pt-map hook and the consumer thread.
pub struct JitterBuffer<C: Clock + 'static> {
    shared: Arc<Shared<C>>,
    downstream: Arc<Mutex<dyn DownstreamSink>>,
    pt_resolver: Arc<Mutex<dyn PtMapResolver>>,
    phase: Mutex<Phase>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock + 'static> fmt::Debug for JitterBuffer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitterBuffer")
            .field("phase", &self.phase.lock().unwrap())
            .field("shared", &"[opaque]")
            .field("downstream", &"[opaque]")
            .finish()
    }
}

impl<C: Clock + 'static> JitterBuffer<C> {
    pub fn new(
        clock: C,
        downstream: impl DownstreamSink + 'static,
        pt_resolver: impl PtMapResolver + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(clock)),
            downstream: Arc::new(Mutex::new(downstream)),
            pt_resolver: Arc::new(Mutex::new(pt_resolver)),
            phase: Mutex::new(Phase::Idle),
            consumer: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    /// The clock this element paces against.
    pub fn clock(&self) -> &C {
        &self.shared.clock
    }

    /// READY -> PAUSED: reset all state, start the consumer thread
    /// blocked.
    pub fn activate(&self) -> Result<(), InvalidTransition> {
        let mut phase = self.phase.lock().unwrap();
        if *phase != Phase::Idle {
            return Err(InvalidTransition { from: *phase });
        }
        self.shared.reset_to_armed();
        self.spawn_consumer();
        *phase = Phase::Armed;
        log::debug!("lifecycle: idle -> armed");
        Ok(())
    }

    /// PAUSED -> PLAYING: unblock the consumer.
    pub fn play(&self) -> Result<(), InvalidTransition> {
        let mut phase = self.phase.lock().unwrap();
        if *phase != Phase::Armed {
            return Err(InvalidTransition { from: *phase });
        }
        self.shared.set_blocked(false);
        *phase = Phase::Running;
        log::debug!("lifecycle: armed -> running");
        Ok(())
    }

    /// PLAYING -> PAUSED: block the consumer again.
    pub fn pause(&self) -> Result<(), InvalidTransition> {
        let mut phase = self.phase.lock().unwrap();
        if *phase != Phase::Running {
            return Err(InvalidTransition { from: *phase });
        }
        self.shared.set_blocked(true);
        *phase = Phase::Armed;
        log::debug!("lifecycle: running -> armed");
        Ok(())
    }

    /// flush-start: cancels the consumer's current wait, drops queued
    /// packets, and pauses the consumer thread.
    pub fn flush_start(&self) {
        let mut phase = self.phase.lock().unwrap();
        let from = *phase;
        self.shared.flush_start();
        *phase = Phase::Flushing;
        log::debug!("lifecycle: flush-start, {from:?} -> flushing");
    }

    /// flush-stop: partially resets state and restarts the consumer
    /// thread.
    pub fn flush_stop(&self) -> Result<(), InvalidTransition> {
        let mut phase = self.phase.lock().unwrap();
        if *phase != Phase::Flushing {
            return Err(InvalidTransition { from: *phase });
        }
        self.join_consumer();
        self.shared.reset_after_flush();
        self.shared.state().set_segment(Segment::default());
        self.spawn_consumer();
        *phase = Phase::Armed;
        log::debug!("lifecycle: flush-stop, flushing -> armed");
        Ok(())
    }

    /// READY -> NULL: cancel any in-flight wait and join the consumer.
    pub fn shutdown(&self) {
        self.shared.flush_start();
        self.join_consumer();
        *self.phase.lock().unwrap() = Phase::Shutdown;
        log::debug!("lifecycle: shutdown");
    }

    fn spawn_consumer(&self) {
        let shared = self.shared.clone();
        let downstream = self.downstream.clone();
        let handle = std::thread::spawn(move || {
            engine::run_consumer_loop(&shared, &downstream);
        });
        *self.consumer.lock().unwrap() = Some(handle);
    }

    fn join_consumer(&self) {
        if let Some(handle) = self.consumer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Ingress `push` (spec.md §4.5).
    pub fn push(&self, bytes: impl Into<bytes::Bytes>) -> Result<(), PushError> {
        engine::push(&self.shared, &self.pt_resolver, bytes)
    }

    pub fn eos(&self) {
        self.shared.signal_eos();
    }

    /// `clear-pt-map()` (spec.md §6, inbound action): forget the resolved
    /// clock rate so the next push re-resolves it through the pt-map hook.
    pub fn clear_pt_map(&self) {
        self.shared.state().clear_clock_rate();
        log::debug!("pt-map cleared, clock rate will be re-resolved");
    }

    /// `set_caps`: returns `false` on a missing/invalid clock rate
    /// (spec.md §6).
    pub fn set_caps(&self, caps: Caps) -> bool {
        let Some(clock_rate) = caps.clock_rate.filter(|rate| *rate >= 1) else {
            return false;
        };
        let mut state = self.shared.state();
        if state.clock_rate().is_none() {
            state.set_clock_rate(clock_rate);
        }
        if let Some(seqnum_base) = caps.seqnum_base {
            // Only takes effect before `next_seq` has been learned (the
            // Idle->Armed transition, or right after a flush reset) — a
            // mid-stream renegotiation must not stomp an already-advanced
            // `next_seq`.
            state.seed_seqnum_base(seqnum_base);
        }
        if let Some(clock_base) = caps.clock_base {
            state.seed_clock_base(clock_base);
        }
        true
    }

    /// `new_segment`: only the `TIME` format is accepted.
    pub fn new_segment(&self, segment: Segment) {
        self.shared.state().set_segment(segment);
    }

    pub fn set_latency_ms(&self, latency_ms: u32) {
        self.shared.state().set_latency_ms(latency_ms);
    }

    pub fn latency_ms(&self) -> u32 {
        self.shared.state().latency_ms()
    }

    pub fn set_drop_on_latency(&self, drop: bool) {
        self.shared.state().set_drop_on_latency(drop);
    }

    pub fn set_ts_offset_ns(&self, offset_ns: i64) {
        self.shared.state().set_ts_offset_ns(offset_ns);
    }

    pub fn set_peer_latency(&self, peer_latency: Duration) {
        self.shared
            .state()
            .set_peer_latency_ns(peer_latency.as_nanos() as u64);
    }

    pub fn stats(&self) -> Stats {
        self.shared.state().stats()
    }

    /// `latency_query`: `(live, min, max)` aggregating peer latency with
    /// this element's own contribution.
    pub fn latency_query(&self, peer_min: Duration, peer_max: Option<Duration>) -> (bool, Duration, Duration) {
        self.shared.state().latency_query(peer_min, peer_max)
    }
}
