//! Shared test doubles for the end-to-end scenario tests: a clock driven
//! by an explicit `advance` call instead of wall time, plus stub
//! collaborators for the two external traits the engine depends on.

use bytes::Bytes;
use rtp_jitterbuffer::{Clock, ClockId, DownstreamError, DownstreamSink, OutputPacket, PtMapResolver, WaitResult};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
enum TimerState {
    Pending(Instant),
    Unscheduled,
}

struct Inner {
    elapsed: Duration,
    next_id: u64,
    timers: HashMap<ClockId, TimerState>,
}

/// A [`Clock`] whose notion of "now" only moves when a test calls
/// [`ManualClock::advance`]. Lets the scenario tests exercise the pacing
/// wait/unschedule contract without depending on real wall-clock timing.
pub struct ManualClock {
    epoch: Instant,
    base_time: Duration,
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            base_time: Duration::ZERO,
            inner: Mutex::new(Inner {
                elapsed: Duration::ZERO,
                next_id: 0,
                timers: HashMap::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Move virtual time forward and wake any waiter whose target has
    /// since elapsed.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.elapsed += by;
        drop(inner);
        self.condvar.notify_all();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.epoch + self.inner.lock().unwrap().elapsed
    }

    fn epoch(&self) -> Instant {
        self.epoch
    }

    fn new_single_shot(&self, target: Instant) -> ClockId {
        let mut inner = self.inner.lock().unwrap();
        let id = ClockId::new(inner.next_id);
        inner.next_id += 1;
        inner.timers.insert(id, TimerState::Pending(target));
        id
    }

    fn wait(&self, id: ClockId) -> WaitResult {
        let mut inner = self.inner.lock().unwrap();
        loop {
            match inner.timers.get(&id) {
                None => return WaitResult::Unscheduled,
                Some(TimerState::Unscheduled) => {
                    inner.timers.remove(&id);
                    return WaitResult::Unscheduled;
                }
                Some(TimerState::Pending(target)) => {
                    let target = *target;
                    let now = self.epoch + inner.elapsed;
                    if now >= target {
                        inner.timers.remove(&id);
                        return WaitResult::Ok;
                    }
                    inner = self.condvar.wait(inner).unwrap();
                }
            }
        }
    }

    fn unschedule(&self, id: ClockId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.timers.get_mut(&id) {
            *state = TimerState::Unscheduled;
        }
        drop(inner);
        self.condvar.notify_all();
    }

    fn base_time(&self) -> Duration {
        self.base_time
    }
}

/// Resolves every payload type to the same fixed clock rate.
pub struct FixedRate(pub u32);

impl PtMapResolver for FixedRate {
    fn resolve(&mut self, _pt: u8) -> Option<u32> {
        Some(self.0)
    }
}

/// Resolves every payload type to a fixed clock rate, counting how many
/// times it was actually consulted — lets a test tell whether a push
/// re-resolved the clock rate or used a cached one.
#[derive(Clone)]
pub struct CountingResolver {
    pub rate: u32,
    pub calls: Arc<Mutex<u32>>,
}

impl CountingResolver {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

impl PtMapResolver for CountingResolver {
    fn resolve(&mut self, _pt: u8) -> Option<u32> {
        *self.calls.lock().unwrap() += 1;
        Some(self.rate)
    }
}

/// Collects emitted packets and records whether `eos()` was delivered.
#[derive(Clone)]
pub struct Collector {
    pub packets: Arc<Mutex<Vec<OutputPacket>>>,
    pub eos_seen: Arc<Mutex<bool>>,
}

impl Collector {
    pub fn new() -> Self {
        Self {
            packets: Arc::new(Mutex::new(Vec::new())),
            eos_seen: Arc::new(Mutex::new(false)),
        }
    }

    pub fn sequence_numbers(&self) -> Vec<u16> {
        self.packets
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.packet.sequence_number.0)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().unwrap().len()
    }
}

impl DownstreamSink for Collector {
    fn push(&mut self, packet: OutputPacket) -> Result<(), DownstreamError> {
        self.packets.lock().unwrap().push(packet);
        Ok(())
    }

    fn eos(&mut self) {
        *self.eos_seen.lock().unwrap() = true;
    }
}

/// A minimal 12-byte RTP header with no extensions or padding.
pub fn make_bytes(seq: u16, ts: u32) -> Bytes {
    let mut buf = vec![0u8; 12];
    buf[0] = 0x80;
    buf[1] = 0;
    buf[2] = (seq >> 8) as u8;
    buf[3] = seq as u8;
    buf[4..8].copy_from_slice(&ts.to_be_bytes());
    buf[8..12].copy_from_slice(&0u32.to_be_bytes());
    Bytes::from(buf)
}

/// Spin-poll `condition` until it's true or `timeout` elapses. Pacing
/// itself is driven entirely by `ManualClock`; this only bridges the real
/// OS-thread handoff between the test thread and the consumer thread.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
