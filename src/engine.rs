//! The reordering/pacing engine: a mutex+condvar state machine shared by
//! a producer thread (`push`) and a single consumer thread (the pop
//! loop). Generalizes the producer/consumer split already present
//! between `recv_rtp`/`pop_rtp` in `ezk-rtp`'s `RtpSession` from a
//! single-threaded poll model to the two-OS-thread model spec.md §5
//! calls for.

use crate::clock::{Clock, WaitResult};
use crate::error::{DownstreamError, PushError};
use crate::ext_timestamp::ExtTsTracker;
use crate::packet::RtpPacket;
use crate::segment::Segment;
use crate::seq::seq_lt;
use crate::store::OrderedStore;
use bytes::Bytes;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Terminal status of the consumer. Mirrors spec.md §3's `src_result`
/// field: `OK` unless the element is flushing, has drained past EOS, or a
/// downstream push has failed.
#[derive(Debug, Clone)]
pub enum SrcResult {
    Ok,
    Flushing,
    UnexpectedEos,
    Downstream(DownstreamError),
}

impl SrcResult {
    fn is_ok(&self) -> bool {
        matches!(self, SrcResult::Ok)
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveWait {
    clock_id: crate::clock::ClockId,
    waiting_seq: u16,
}

/// Packet handed to the downstream sink, with the DISCONT flag computed
/// by the pop path (spec.md §4.5 steps 7-8, testable property 9).
#[derive(Debug, Clone)]
pub struct OutputPacket {
    pub packet: RtpPacket,
    pub discont: bool,
}

/// External collaborator: accepts paced, reordered packets. Modeled as a
/// trait because buffer allocation/pad pushing are external-collaborator
/// concerns per spec.md §1.
pub trait DownstreamSink: Send {
    fn push(&mut self, packet: OutputPacket) -> Result<(), DownstreamError>;
    fn eos(&mut self);
}

/// External collaborator: resolves a payload type to a clock rate when
/// `clock_rate` hasn't been negotiated via caps. Spec.md §6 describes
/// this as a `(pt) -> Caps|none` hook; only the clock rate the caps would
/// carry is relevant to this engine, so the hook is simplified to that.
pub trait PtMapResolver: Send {
    fn resolve(&mut self, pt: u8) -> Option<u32>;
}

/// All mutable state guarded by the coordination mutex `M` (spec.md §3,
/// §5), including the ordered store itself.
pub struct PacingState {
    store: OrderedStore,
    last_popped_seq: Option<u16>,
    next_seq: Option<u16>,
    eos: bool,
    blocked: bool,
    src_result: SrcResult,
    clock_rate: Option<u32>,
    clock_base: Option<u64>,
    ext_ts: ExtTsTracker,
    ts_offset_ns: i64,
    prev_ts_offset_ns: i64,
    latency_ms: u32,
    drop_on_latency: bool,
    peer_latency_ns: u64,
    active_wait: Option<ActiveWait>,
    num_late: u64,
    num_duplicates: u64,
    segment: Segment,
}

impl PacingState {
    /// Fresh state as installed on the Idle -> Armed transition
    /// (spec.md §4.5 "State machine").
    pub fn new() -> Self {
        Self {
            store: OrderedStore::new(),
            last_popped_seq: None,
            next_seq: None,
            eos: false,
            blocked: true,
            src_result: SrcResult::Ok,
            clock_rate: None,
            clock_base: None,
            ext_ts: ExtTsTracker::new(),
            ts_offset_ns: 0,
            prev_ts_offset_ns: 0,
            latency_ms: 200,
            drop_on_latency: false,
            peer_latency_ns: 0,
            active_wait: None,
            num_late: 0,
            num_duplicates: 0,
            segment: Segment::default(),
        }
    }

    pub fn stats(&self) -> Stats {
        Stats {
            num_late: self.num_late,
            num_duplicates: self.num_duplicates,
            queued: self.store.len(),
        }
    }

    pub fn set_latency_ms(&mut self, latency_ms: u32) {
        self.latency_ms = latency_ms;
    }

    pub fn latency_ms(&self) -> u32 {
        self.latency_ms
    }

    pub fn set_drop_on_latency(&mut self, drop: bool) {
        self.drop_on_latency = drop;
    }

    pub fn set_ts_offset_ns(&mut self, offset: i64) {
        self.ts_offset_ns = offset;
    }

    pub fn set_peer_latency_ns(&mut self, peer_latency_ns: u64) {
        self.peer_latency_ns = peer_latency_ns;
    }

    pub fn set_segment(&mut self, segment: Segment) {
        self.segment = segment;
    }

    /// Seed `next_seq` from a caps `seqnum-base`, but only if it hasn't
    /// already been learned — from an earlier caps or from the first pop.
    /// A later renegotiation must not stomp an in-flight `next_seq`
    /// (that would manufacture a spurious gap/DISCONT on the very next
    /// in-order packet).
    pub fn seed_seqnum_base(&mut self, seqnum_base: u16) {
        if self.next_seq.is_none() {
            self.next_seq = Some(seqnum_base);
        }
    }

    pub fn clock_rate(&self) -> Option<u32> {
        self.clock_rate
    }

    /// `clear-pt-map()`: forget the resolved clock rate so the next push
    /// re-resolves it through the pt-map hook.
    pub fn clear_clock_rate(&mut self) {
        self.clock_rate = None;
    }

    /// Seed the extended-timestamp anchor from an explicit `clock-base`
    /// carried in caps, instead of discovering it from the first pop.
    pub fn seed_clock_base(&mut self, clock_base: u32) {
        self.clock_base = Some(u64::from(clock_base));
    }

    pub fn set_clock_rate(&mut self, rate: u32) {
        self.clock_rate = Some(rate);
    }

    /// `(live, min_latency, max_latency)` aggregating peer latency with
    /// this element's own contribution (spec.md §6, Open Question 1:
    /// `max` matches `min`'s unit handling).
    pub fn latency_query(&self, peer_min: Duration, peer_max: Option<Duration>) -> (bool, Duration, Duration) {
        let our_latency = Duration::from_millis(u64::from(self.latency_ms));
        let min = peer_min + our_latency;
        let max = peer_max.map(|m| m + our_latency).unwrap_or(min);
        (true, min, max)
    }
}

impl Default for PacingState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PacingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacingState")
            .field("queued", &self.store.len())
            .field("last_popped_seq", &self.last_popped_seq)
            .field("next_seq", &self.next_seq)
            .field("eos", &self.eos)
            .field("blocked", &self.blocked)
            .field("clock_rate", &self.clock_rate)
            .field("latency_ms", &self.latency_ms)
            .field("num_late", &self.num_late)
            .field("num_duplicates", &self.num_duplicates)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub num_late: u64,
    pub num_duplicates: u64,
    pub queued: usize,
}

/// State shared between the producer and the single consumer thread.
pub struct Shared<C: Clock> {
    pub clock: C,
    state: Mutex<PacingState>,
    condvar: Condvar,
}

impl<C: Clock> Shared<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            state: Mutex::new(PacingState::new()),
            condvar: Condvar::new(),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, PacingState> {
        self.state.lock().unwrap()
    }

    /// Reset to the post Idle->Armed form (spec.md §4.5 state machine).
    pub fn reset_to_armed(&self) {
        *self.state.lock().unwrap() = PacingState::new();
    }

    /// flush-stop: partial reset that keeps configuration (latency,
    /// drop_on_latency, ts_offset) across the flush.
    pub fn reset_after_flush(&self) {
        let mut state = self.state.lock().unwrap();
        state.store.flush();
        state.last_popped_seq = None;
        state.next_seq = None;
        state.clock_rate = None;
        state.clock_base = None;
        state.eos = false;
        state.ext_ts = ExtTsTracker::new();
        state.active_wait = None;
        state.src_result = SrcResult::Ok;
    }

    pub fn flush_start(&self) {
        let mut state = self.state.lock().unwrap();
        state.src_result = SrcResult::Flushing;
        let active = state.active_wait.take();
        state.store.flush();
        drop(state);
        self.condvar.notify_all();
        if let Some(active) = active {
            self.clock.unschedule(active.clock_id);
        }
    }

    pub fn set_blocked(&self, blocked: bool) {
        let mut state = self.state.lock().unwrap();
        state.blocked = blocked;
        drop(state);
        self.condvar.notify_all();
    }

    pub fn signal_eos(&self) {
        let mut state = self.state.lock().unwrap();
        if state.eos {
            return;
        }
        state.eos = true;
        drop(state);
        self.condvar.notify_all();
    }
}

impl<C: Clock> fmt::Debug for Shared<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("clock", &"[opaque]")
            .field("state", &self.state.lock().unwrap())
            .finish()
    }
}

/// Ingress push path (spec.md §4.5 "Push path").
pub fn push<C: Clock>(
    shared: &Shared<C>,
    pt_resolver: &Mutex<dyn PtMapResolver>,
    bytes: impl Into<Bytes>,
) -> Result<(), PushError> {
    // Step 1: validate.
    let packet = RtpPacket::parse(bytes)?;

    // Step 2: resolve clock rate via pt-map if unset.
    let needs_resolve = shared.state.lock().unwrap().clock_rate.is_none();
    if needs_resolve {
        let resolved = pt_resolver.lock().unwrap().resolve(packet.pt);
        let mut state = shared.state.lock().unwrap();
        if state.clock_rate.is_none() {
            match resolved {
                Some(rate) => state.clock_rate = Some(rate),
                None => return Err(PushError::NotNegotiated),
            }
        }
    }

    let mut state = shared.state.lock().unwrap();

    // Step 3.
    match &state.src_result {
        SrcResult::Ok => {}
        SrcResult::Flushing => return Err(PushError::Flushing),
        SrcResult::UnexpectedEos => return Err(PushError::UnexpectedEos),
        SrcResult::Downstream(e) => return Err(PushError::Downstream(e.clone())),
    }

    // Step 4.
    if state.eos {
        return Err(PushError::UnexpectedEos);
    }

    let seq = packet.sequence_number.0;

    // Step 5: late packets are silently dropped.
    if let Some(last) = state.last_popped_seq {
        if seq_lt(last, seq) < 0 {
            state.num_late += 1;
            log::trace!("dropping late packet, seq={seq}");
            return Ok(());
        }
    }

    // Step 6: evict head(s) to make room when configured to do so.
    if state.latency_ms > 0 && state.drop_on_latency {
        let clock_rate = state.clock_rate.expect("resolved above");
        let latency_ts = (u64::from(state.latency_ms) * u64::from(clock_rate) / 1000) as u32;
        while state.store.len() >= 2 && state.store.ts_span() >= latency_ts {
            state.store.pop_head();
            log::debug!("evicted head packet to respect drop-on-latency");
        }
    }

    // Step 7: insert, rejecting duplicates.
    if !state.store.insert(packet) {
        state.num_duplicates += 1;
        log::trace!("dropping duplicate packet, seq={seq}");
        return Ok(());
    }

    // Step 8.
    drop(state);
    shared.condvar.notify_all();

    // Step 9: preempt a consumer timing a later packet.
    let state = shared.state.lock().unwrap();
    if let Some(active) = &state.active_wait {
        if seq_lt(active.waiting_seq, seq) < 0 {
            shared.clock.unschedule(active.clock_id);
        }
    }

    Ok(())
}

/// Outcome of one consumer-loop iteration.
enum LoopAction {
    Continue,
    Exit,
}

/// The consumer (pop loop). Runs on its own OS thread; see spec.md §4.5
/// "Pop path" and §5 "Suspension points" for the exact suspension-point
/// contract this function must honor (mutex held while waiting on the
/// condvar, released while waiting on the clock).
pub fn run_consumer_loop<C: Clock>(shared: &Shared<C>, downstream: &Mutex<dyn DownstreamSink>) {
    loop {
        match run_one_iteration(shared, downstream) {
            LoopAction::Continue => continue,
            LoopAction::Exit => return,
        }
    }
}

fn run_one_iteration<C: Clock>(
    shared: &Shared<C>,
    downstream: &Mutex<dyn DownstreamSink>,
) -> LoopAction {
    let mut state = shared.state.lock().unwrap();

    // Step 1/2: wait for work, re-checking shutdown on every wakeup.
    loop {
        if !state.src_result.is_ok() {
            return LoopAction::Exit;
        }
        if !state.blocked && (state.store.len() > 0 || state.eos) {
            break;
        }
        state = shared.condvar.wait(state).unwrap();
    }

    // Step 3: drained and EOS queued.
    if state.store.is_empty() && state.eos && !state.blocked {
        state.src_result = SrcResult::UnexpectedEos;
        drop(state);
        downstream.lock().unwrap().eos();
        return LoopAction::Exit;
    }

    // Step 4.
    let mut outbuf = state.store.pop_head();
    let seq = outbuf.sequence_number.0;

    // Step 5.
    let ext_ts = state.ext_ts.update(outbuf.timestamp.0);

    // Step 6: schedule and wait on the clock if this isn't the expected
    // next packet (first pop, or a gap/reorder we need to pace against).
    if state.next_seq.is_none() || state.next_seq != Some(seq) {
        loop {
            let clock_base = *state.clock_base.get_or_insert(ext_ts);
            let adj_ts = ext_ts.wrapping_sub(clock_base);
            let clock_rate = u64::from(state.clock_rate.unwrap_or(8000));
            let ns = (u128::from(adj_ts) * 1_000_000_000u128 / u128::from(clock_rate)) as u64;

            let running_time = state
                .segment
                .to_running_time(Duration::from_nanos(ns))
                + Duration::from_millis(u64::from(state.latency_ms))
                + Duration::from_nanos(state.peer_latency_ns);

            let target = shared.clock.target_for_running_time(running_time);
            let clock_id = shared.clock.new_single_shot(target);
            state.active_wait = Some(ActiveWait {
                clock_id,
                waiting_seq: seq,
            });

            drop(state);
            let result = shared.clock.wait(clock_id);

            state = shared.state.lock().unwrap();
            state.active_wait = None;

            if !state.src_result.is_ok() {
                return LoopAction::Exit;
            }

            match result {
                WaitResult::Unscheduled => {
                    // Preempted by an earlier-arriving packet: re-insert
                    // and re-evaluate from the current head.
                    if !state.store.insert(outbuf) {
                        state.num_duplicates += 1;
                    }
                    drop(state);
                    return LoopAction::Continue;
                }
                WaitResult::Ok | WaitResult::Early => break,
            }
        }
    }

    // Step 7: gap accounting / DISCONT.
    let mut discont = false;
    if let Some(next_seq) = state.next_seq {
        if next_seq != seq {
            let dropped = seq_lt(next_seq, seq);
            if dropped > 0 {
                state.num_late += dropped as u64;
            }
            discont = true;
            log::debug!("discont: gap before seq={seq}, expected={next_seq}");
        }
    }

    // Step 8: ts-offset, read under the coordination mutex (Open
    // Question 2, resolved in spec.md's favor).
    let ts_offset_ns = state.ts_offset_ns;
    if ts_offset_ns != 0 {
        let clock_rate = i128::from(state.clock_rate.unwrap_or(8000));
        let off_rtp = (i128::from(ts_offset_ns) * clock_rate / 1_000_000_000i128) as i32;
        outbuf.timestamp.0 = outbuf.timestamp.0.wrapping_add_signed(off_rtp);
    }
    if ts_offset_ns != state.prev_ts_offset_ns {
        discont = true;
        log::debug!("discont: ts_offset changed from {} to {ts_offset_ns}", state.prev_ts_offset_ns);
        state.prev_ts_offset_ns = ts_offset_ns;
    }

    // Step 9.
    state.last_popped_seq = Some(seq);
    state.next_seq = Some(seq.wrapping_add(1));

    // Step 10: push downstream without holding the mutex.
    drop(state);
    match downstream.lock().unwrap().push(OutputPacket {
        packet: outbuf,
        discont,
    }) {
        Ok(()) => LoopAction::Continue,
        Err(err) => {
            let mut state = shared.state.lock().unwrap();
            state.src_result = SrcResult::Downstream(err);
            LoopAction::Exit
        }
    }
}
