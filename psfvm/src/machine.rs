//! The state owned by the scheduler thread.

use crate::{
    audio::{AudioOption, AudioPump},
    clock::Clock,
    iop::{ExecutionCore, Interrupt},
    notify::{Event, Observers},
};
use log::{debug, info, trace};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};
use strum::{Display, IntoStaticStr};

/// Whether the machine is advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum Status {
    Running,
    Paused,
}

/// State published by the scheduler thread for readers on other threads.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    running: AtomicBool,
}

impl Shared {
    #[inline(always)]
    pub fn status(&self) -> Status {
        if self.running.load(Ordering::Acquire) {
            Status::Running
        } else {
            Status::Paused
        }
    }

    #[inline(always)]
    fn publish(&self, status: Status) {
        self.running
            .store(status == Status::Running, Ordering::Release);
    }
}

/// A countdown of clock ticks until the next periodic boundary.
///
/// The counter is re-armed by adding the period to whatever is left, which may be negative.
/// Overshoot past a boundary is therefore carried into the next period instead of being lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseCounter {
    period: i64,
    remaining: i64,
}

impl PhaseCounter {
    /// Creates a counter armed with a full `period`.
    pub fn new(period: i64) -> Self {
        Self {
            period,
            remaining: period,
        }
    }

    #[inline(always)]
    pub fn period(&self) -> i64 {
        self.period
    }

    /// Ticks left until the boundary. Negative once the boundary has been overshot.
    #[inline(always)]
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    #[inline(always)]
    pub fn elapse(&mut self, ticks: u32) {
        self.remaining -= i64::from(ticks);
    }

    /// Schedules the next boundary one period after the current one.
    #[inline(always)]
    pub fn rearm(&mut self) {
        self.remaining += self.period;
    }

    /// Arms the counter with a full period, discarding any carried phase.
    pub fn reset(&mut self) {
        self.remaining = self.period;
    }
}

/// A point-in-time copy of the scheduling state of a [`Machine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub status: Status,
    pub single_step: bool,
    pub frame: PhaseCounter,
    pub audio: PhaseCounter,
}

/// The machine driven by the scheduler: the execution core, the audio pump and the scheduling
/// state around them.
pub struct Machine {
    pub(crate) core: Box<dyn ExecutionCore>,
    pub(crate) audio: Box<dyn AudioPump>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) observers: Observers,
    shared: Arc<Shared>,

    status: Status,
    pub(crate) single_step: bool,
    /// Ticks until the next video frame.
    pub(crate) frame: PhaseCounter,
    /// Ticks until the next audio buffer refill.
    pub(crate) audio_update: PhaseCounter,
    /// When the last frame boundary was reached, for stepped pacing.
    pub(crate) last_frame: Instant,
    shutdown: bool,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("status", &self.status)
            .field("single_step", &self.single_step)
            .field("frame", &self.frame)
            .field("audio_update", &self.audio_update)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl Machine {
    pub(crate) fn new(
        core: Box<dyn ExecutionCore>,
        audio: Box<dyn AudioPump>,
        clock: Arc<dyn Clock>,
        observers: Observers,
        shared: Arc<Shared>,
        frame_ticks: i64,
        audio_update_ticks: i64,
    ) -> Self {
        let last_frame = clock.now();
        shared.publish(Status::Paused);

        Self {
            core,
            audio,
            clock,
            observers,
            shared,

            status: Status::Paused,
            single_step: false,
            frame: PhaseCounter::new(frame_ticks),
            audio_update: PhaseCounter::new(audio_update_ticks),
            last_frame,
            shutdown: false,
        }
    }

    #[inline(always)]
    pub fn status(&self) -> Status {
        self.status
    }

    #[inline(always)]
    pub fn single_step(&self) -> bool {
        self.single_step
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            single_step: self.single_step,
            frame: self.frame,
            audio: self.audio_update,
        }
    }

    pub fn core_mut(&mut self) -> &mut dyn ExecutionCore {
        &mut *self.core
    }

    #[inline(always)]
    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    fn set_status(&mut self, status: Status) {
        debug!(target: "psfvm::scheduler", "{} -> {}", self.status, status);
        self.status = status;
        self.shared.publish(status);
    }

    pub(crate) fn pause(&mut self) {
        self.set_status(Status::Paused);
        self.observers.fire(Event::RunningStateChanged);
        self.observers.fire(Event::MachineStateChanged);
    }

    pub(crate) fn resume(&mut self) {
        self.set_status(Status::Running);
        self.observers.fire(Event::RunningStateChanged);
    }

    pub(crate) fn step(&mut self) {
        self.single_step = true;
        self.resume();
    }

    /// Stops after a quantum that hit a breakpoint or was a single step.
    pub(crate) fn halt(&mut self) {
        self.set_status(Status::Paused);
        self.single_step = false;
        self.observers.fire(Event::MachineStateChanged);
        self.observers.fire(Event::RunningStateChanged);
    }

    pub(crate) fn reset(&mut self) {
        info!(target: "psfvm::scheduler", "resetting machine");
        self.core.reset();
        self.audio.reset();
        self.frame.reset();
        self.audio_update.reset();
        self.last_frame = self.clock.now();
    }

    pub(crate) fn set_audio_option(&mut self, option: AudioOption) {
        self.audio.set_option(option);
    }

    pub(crate) fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    /// Handles a crossed frame boundary: re-arms the frame counter, raises VBlank and notifies
    /// observers.
    pub(crate) fn new_frame(&mut self) {
        trace!(
            target: "psfvm::scheduler",
            "frame boundary, {} ticks of overshoot",
            -self.frame.remaining()
        );
        self.frame.rearm();
        self.core.assert_line(Interrupt::VBlank);
        self.observers.fire(Event::NewFrame);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    const PERIOD: i64 = 614_400;

    /// Feeds `batches` through a counter the way the throughput scheduler does and returns how
    /// many boundaries were crossed.
    fn crossings(counter: &mut PhaseCounter, batches: &[u32]) -> u64 {
        let mut crossed = 0;
        for &ticks in batches {
            counter.elapse(ticks);
            if counter.remaining() < 0 {
                counter.rearm();
                crossed += 1;
            }
        }

        crossed
    }

    #[test]
    fn rearm_keeps_overshoot() {
        let mut counter = PhaseCounter::new(100);
        counter.elapse(130);
        assert_eq!(counter.remaining(), -30);
        counter.rearm();
        assert_eq!(counter.remaining(), 70);

        counter.reset();
        assert_eq!(counter.remaining(), 100);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn boundary_count_never_drifts(
            batches in prop::collection::vec(1..=(PERIOD as u32), 10_000)
        ) {
            let mut counter = PhaseCounter::new(PERIOD);
            let crossed = crossings(&mut counter, &batches);

            let total: u64 = batches.iter().map(|&b| u64::from(b)).sum();
            let expected = total / PERIOD as u64;

            prop_assert!(crossed.abs_diff(expected) <= 1, "{crossed} vs {expected}");
            prop_assert!((0..=PERIOD).contains(&counter.remaining()));
            prop_assert_eq!(
                counter.remaining(),
                PERIOD - total as i64 + crossed as i64 * PERIOD
            );
        }

        #[test]
        fn small_batches_cross_exactly(
            batches in prop::collection::vec(1..4096u32, 1..10_000)
        ) {
            let mut counter = PhaseCounter::new(PERIOD);
            let crossed = crossings(&mut counter, &batches);

            // a boundary is only crossed once the counter goes strictly negative
            let total: u64 = batches.iter().map(|&b| u64::from(b)).sum();
            prop_assert_eq!(crossed, total.saturating_sub(1) / PERIOD as u64);
        }
    }
}
