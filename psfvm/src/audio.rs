//! The interface to the buffer-backed audio backend.

use crate::clock::Clock;
use log::debug;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// A runtime option of the audio backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOption {
    /// Enables or disables reverb on every SPU core.
    Reverb(bool),
}

/// An audio pump: a queue of output buffers that the scheduler refills periodically.
///
/// Like the [`ExecutionCore`](crate::iop::ExecutionCore), it is only ever used from the
/// scheduler thread.
pub trait AudioPump: Send {
    /// Whether there's at least one free output buffer waiting to be filled.
    fn has_free_buffers(&self) -> bool;

    /// Fills and queues a single output buffer.
    fn update(&mut self);

    /// Drops every queued buffer and returns to the initial state.
    fn reset(&mut self);

    /// Applies a runtime option.
    fn set_option(&mut self, option: AudioOption);
}

/// An [`AudioPump`] without an output device. Queued buffers are "played" in real time according
/// to a [`Clock`], which is enough to pace emulation at the correct speed.
pub struct Silent {
    clock: Arc<dyn Clock>,
    buffer_count: usize,
    buffer_duration: Duration,

    /// How many buffers are queued, including the one currently playing.
    queued: usize,
    /// When the buffer at the head of the queue started playing.
    head_started: Instant,
    reverb: bool,
}

impl std::fmt::Debug for Silent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Silent")
            .field("buffer_count", &self.buffer_count)
            .field("buffer_duration", &self.buffer_duration)
            .field("queued", &self.queued)
            .field("reverb", &self.reverb)
            .finish_non_exhaustive()
    }
}

impl Silent {
    /// Creates a new silent pump with `buffer_count` buffers of `buffer_duration` each.
    pub fn new(clock: Arc<dyn Clock>, buffer_count: usize, buffer_duration: Duration) -> Self {
        let head_started = clock.now();
        Self {
            clock,
            buffer_count: buffer_count.max(1),
            buffer_duration,
            queued: 0,
            head_started,
            reverb: false,
        }
    }

    /// How many buffers are queued and not yet fully played.
    pub fn queued(&self) -> usize {
        self.queued - self.played()
    }

    pub fn reverb_enabled(&self) -> bool {
        self.reverb
    }

    fn played(&self) -> usize {
        if self.queued == 0 || self.buffer_duration.is_zero() {
            return self.queued;
        }

        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(self.head_started);
        let played = elapsed.as_nanos() / self.buffer_duration.as_nanos();

        usize::try_from(played).unwrap_or(usize::MAX).min(self.queued)
    }
}

impl AudioPump for Silent {
    fn has_free_buffers(&self) -> bool {
        self.queued() < self.buffer_count
    }

    fn update(&mut self) {
        let played = self.played();
        if played > 0 {
            self.queued -= played;
            self.head_started += self.buffer_duration * u32::try_from(played).unwrap_or(u32::MAX);
        }

        if self.queued == 0 {
            // underrun, the new buffer starts playing right away
            self.head_started = self.clock.now();
        }

        self.queued += 1;
    }

    fn reset(&mut self) {
        self.queued = 0;
        self.head_started = self.clock.now();
    }

    fn set_option(&mut self, option: AudioOption) {
        match option {
            AudioOption::Reverb(enabled) => {
                debug!(target: "psfvm::audio", "reverb enabled: {enabled}");
                self.reverb = enabled;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::ManualClock;

    const BUFFER: Duration = Duration::from_millis(4);

    #[test]
    fn fills_up_then_drains_in_real_time() {
        let clock = Arc::new(ManualClock::new());
        let mut pump = Silent::new(clock.clone(), 3, BUFFER);

        for _ in 0..3 {
            assert!(pump.has_free_buffers());
            pump.update();
        }

        assert!(!pump.has_free_buffers());
        assert_eq!(pump.queued(), 3);

        clock.advance(BUFFER / 2);
        assert!(!pump.has_free_buffers());

        clock.advance(BUFFER / 2);
        assert!(pump.has_free_buffers());
        assert_eq!(pump.queued(), 2);

        pump.update();
        assert!(!pump.has_free_buffers());
    }

    #[test]
    fn underrun_restarts_the_playhead() {
        let clock = Arc::new(ManualClock::new());
        let mut pump = Silent::new(clock.clone(), 2, BUFFER);

        pump.update();
        clock.advance(BUFFER * 10);
        assert_eq!(pump.queued(), 0);

        pump.update();
        pump.update();
        assert_eq!(pump.queued(), 2);
        assert!(!pump.has_free_buffers());

        clock.advance(BUFFER);
        assert_eq!(pump.queued(), 1);
    }

    #[test]
    fn reset_empties_the_queue_and_options_apply() {
        let clock = Arc::new(ManualClock::new());
        let mut pump = Silent::new(clock, 1, BUFFER);

        pump.update();
        assert!(!pump.has_free_buffers());
        pump.reset();
        assert!(pump.has_free_buffers());

        assert!(!pump.reverb_enabled());
        pump.set_option(AudioOption::Reverb(true));
        assert!(pump.reverb_enabled());
    }
}
