//! Scripted collaborators for tests.

use crate::{
    Config,
    audio::{AudioOption, AudioPump},
    clock::Clock,
    iop::{ExecutionCore, Interrupt},
    tags::DebugTags,
};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// A config with short sleeps, so threaded tests don't wait around.
pub fn test_config() -> Config {
    Config {
        idle_interval: Duration::from_millis(1),
        starvation_interval: Duration::from_millis(1),
        ..Config::default()
    }
}

/// A clock that only moves when told to. Sleeping advances it instantly and is recorded.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<(Duration, Vec<Duration>)>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new((Duration::ZERO, Vec::new())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.state.lock().0 += duration;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().1.clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().0
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.0 += duration;
        state.1.push(duration);
    }
}

#[derive(Debug, Default)]
pub struct CoreState {
    /// Ticks consumed by every batch.
    pub batch: u32,
    /// The `single_step` flag of every executed batch.
    pub executed: Vec<bool>,
    pub lines: Vec<Interrupt>,
    pub resets: usize,
    /// Report a breakpoint once this many batches were executed.
    pub break_at: Option<usize>,
    /// Advance this clock by the given amount on every batch.
    pub clock: Option<(Arc<ManualClock>, Duration)>,
    pub tags: DebugTags,
}

/// An execution core that records what the scheduler asks of it.
#[derive(Debug, Clone)]
pub struct ScriptedCore {
    pub state: Arc<Mutex<CoreState>>,
}

impl ScriptedCore {
    pub fn new(batch: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoreState {
                batch,
                ..Default::default()
            })),
        }
    }
}

impl ExecutionCore for ScriptedCore {
    fn execute(&mut self, single_step: bool) -> u32 {
        let mut state = self.state.lock();
        state.executed.push(single_step);
        if let Some((clock, cost)) = &state.clock {
            clock.advance(*cost);
        }

        state.batch
    }

    fn assert_line(&mut self, line: Interrupt) {
        self.state.lock().lines.push(line);
    }

    fn must_break(&self) -> bool {
        let state = self.state.lock();
        state.break_at == Some(state.executed.len())
    }

    fn reset(&mut self) {
        self.state.lock().resets += 1;
    }

    fn debug_tags(&self) -> DebugTags {
        self.state.lock().tags.clone()
    }

    fn set_debug_tags(&mut self, tags: DebugTags) {
        self.state.lock().tags = tags;
    }
}

#[derive(Default)]
pub struct AudioState {
    /// Buffers left to fill. Never replenished.
    pub free: usize,
    pub updates: usize,
    pub resets: usize,
    pub options: Vec<AudioOption>,
    /// Invoked on every update.
    pub on_update: Option<Box<dyn FnMut() + Send>>,
}

/// An audio pump with a fixed budget of free buffers.
#[derive(Clone)]
pub struct ScriptedAudio {
    pub state: Arc<Mutex<AudioState>>,
}

impl ScriptedAudio {
    pub fn new(free: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(AudioState {
                free,
                ..Default::default()
            })),
        }
    }
}

impl AudioPump for ScriptedAudio {
    fn has_free_buffers(&self) -> bool {
        self.state.lock().free > 0
    }

    fn update(&mut self) {
        let mut state = self.state.lock();
        state.free = state.free.saturating_sub(1);
        state.updates += 1;
        if let Some(on_update) = &mut state.on_update {
            on_update();
        }
    }

    fn reset(&mut self) {
        self.state.lock().resets += 1;
    }

    fn set_option(&mut self, option: AudioOption) {
        self.state.lock().options.push(option);
    }
}
