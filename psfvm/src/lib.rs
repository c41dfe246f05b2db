//! Real-time execution scheduler for an IOP emulator.
//!
//! A [`Vm`] owns a scheduler thread which drives an [`ExecutionCore`](iop::ExecutionCore) and an
//! [`AudioPump`](audio::AudioPump) at the correct wall-clock rate. All control requests made
//! through the [`Vm`] are forwarded to the scheduler thread through a mailbox, so the core and the
//! audio pump are never touched from anywhere else.
//!
//! This crate does not emulate any hardware itself: the CPU interpreter, the peripherals and the
//! audio backend are provided by the user through the traits in [`iop`] and [`audio`].

pub mod audio;
pub mod clock;
pub mod iop;
pub mod machine;
pub mod mailbox;
pub mod notify;
pub mod scheduler;
pub mod tags;

#[cfg(test)]
mod testing;

use audio::{AudioOption, AudioPump};
use clock::{Clock, SystemClock};
use easyerr::{Error, ResultExt};
use iop::{ExecutionCore, IOP_CLOCK_FREQ};
use log::{debug, info, warn};
use machine::{Machine, Shared, Snapshot, Status};
use mailbox::{Mailbox, MailboxError};
use notify::{Event, Observers, SubscriptionId};
use scheduler::{Pacing, Scheduler};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};
use tags::TagsError;

/// VM configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frequency of the IOP clock, in Hz.
    pub clock_frequency: u32,
    /// Video frame rate.
    pub frames_per_second: u32,
    /// How much audio is produced by each audio pump update.
    pub audio_update_interval: Duration,
    /// How running quanta are paced.
    pub pacing: Pacing,
    /// How long to sleep between mailbox polls while paused.
    pub idle_interval: Duration,
    /// How long to sleep while the audio pump has no free buffers.
    pub starvation_interval: Duration,
    /// The directory where debug tags are stored.
    pub tags_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clock_frequency: IOP_CLOCK_FREQ,
            frames_per_second: 60,
            audio_update_interval: Duration::from_millis(4),
            pacing: Pacing::default(),
            idle_interval: Duration::from_millis(50),
            starvation_interval: Duration::from_millis(5),
            tags_dir: PathBuf::from("./tags"),
        }
    }
}

impl Config {
    /// Clock ticks per video frame.
    pub fn frame_ticks(&self) -> i64 {
        i64::from(self.clock_frequency / self.frames_per_second.max(1))
    }

    /// Clock ticks per audio pump update.
    pub fn audio_update_ticks(&self) -> i64 {
        let ticks =
            u128::from(self.clock_frequency) * self.audio_update_interval.as_micros() / 1_000_000;
        i64::try_from(ticks).unwrap_or(i64::MAX)
    }

    /// Wall-clock duration of a video frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.frames_per_second.max(1)
    }
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error("couldn't spawn the scheduler thread")]
    Spawn { source: std::io::Error },
    #[error("the scheduler is not running")]
    Mailbox { source: MailboxError },
    #[error("debug tags unavailable")]
    Tags { source: TagsError },
}

/// Handle to a virtual machine running on its own scheduler thread.
///
/// Dropping the handle stops the scheduler and waits for its thread to exit.
#[derive(Debug)]
pub struct Vm {
    pub(crate) sender: mailbox::Sender<Machine>,
    shared: Arc<Shared>,
    observers: Observers,
    tags_dir: PathBuf,
    thread: Option<JoinHandle<()>>,
}

impl Vm {
    /// Creates a new [`Vm`] paced by the system clock and starts its scheduler thread.
    pub fn new(
        config: Config,
        core: impl ExecutionCore + 'static,
        audio: impl AudioPump + 'static,
    ) -> Result<Self, VmError> {
        Self::with_clock(config, core, audio, Arc::new(SystemClock))
    }

    /// Creates a new [`Vm`] paced by the given clock and starts its scheduler thread.
    pub fn with_clock(
        config: Config,
        core: impl ExecutionCore + 'static,
        audio: impl AudioPump + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, VmError> {
        let (mut vm, scheduler) = Self::detached(config, core, audio, clock);
        let thread = std::thread::Builder::new()
            .name("iop scheduler".to_owned())
            .spawn(move || scheduler.run())
            .context(VmCtx::Spawn)?;

        vm.thread = Some(thread);
        Ok(vm)
    }

    /// Creates a new [`Vm`] without starting a scheduler thread. The returned [`Scheduler`] must
    /// be driven by the caller, on a thread other than the one making blocking calls.
    pub fn detached(
        config: Config,
        core: impl ExecutionCore + 'static,
        audio: impl AudioPump + 'static,
        clock: Arc<dyn Clock>,
    ) -> (Self, Scheduler) {
        let shared = Arc::new(Shared::default());
        let observers = Observers::default();
        let (sender, mailbox) = Mailbox::new();
        let machine = Machine::new(
            Box::new(core),
            Box::new(audio),
            clock,
            observers.clone(),
            shared.clone(),
            config.frame_ticks(),
            config.audio_update_ticks(),
        );

        let vm = Self {
            sender,
            shared,
            observers,
            tags_dir: config.tags_dir.clone(),
            thread: None,
        };

        (vm, Scheduler::new(machine, mailbox, &config))
    }

    /// The current status of the machine.
    #[inline(always)]
    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// Resets the execution core, the audio pump and the scheduling state. Meant to be used
    /// while paused. Blocks until done.
    pub fn reset(&self) -> Result<(), MailboxError> {
        self.sender.call(Machine::reset)
    }

    /// Pauses the machine. Blocks until the scheduler has stopped, so the machine can be
    /// inspected right after this returns.
    pub fn pause(&self) -> Result<(), MailboxError> {
        self.sender.send_call(Machine::pause, true)
    }

    /// Resumes the machine. Takes effect at the start of the next scheduler iteration.
    pub fn resume(&self) -> Result<(), MailboxError> {
        self.sender.send_call(Machine::resume, false)
    }

    /// Runs a single instruction and pauses again. Takes effect at the start of the next
    /// scheduler iteration.
    pub fn step(&self) -> Result<(), MailboxError> {
        self.sender.send_call(Machine::step, false)
    }

    /// Applies an audio option. Takes effect at the start of the next scheduler iteration.
    pub fn set_option(&self, option: AudioOption) -> Result<(), MailboxError> {
        self.sender
            .post(move |machine: &mut Machine| machine.set_audio_option(option))
    }

    pub fn set_reverb_enabled(&self, enabled: bool) -> Result<(), MailboxError> {
        self.set_option(AudioOption::Reverb(enabled))
    }

    /// Runs `f` with the execution core on the scheduler thread and returns its result.
    pub fn with_core<F, R>(&self, f: F) -> Result<R, MailboxError>
    where
        F: FnOnce(&mut dyn ExecutionCore) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.sender
            .call(move |machine: &mut Machine| f(machine.core_mut()))
    }

    /// Returns a copy of the scheduling state.
    pub fn snapshot(&self) -> Result<Snapshot, MailboxError> {
        self.sender.call(|machine: &mut Machine| machine.snapshot())
    }

    /// Registers `observer` to be invoked on the scheduler thread whenever `event` fires.
    pub fn subscribe<F>(&self, event: Event, observer: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        self.observers.subscribe(event, observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// The directory where debug tags are stored.
    pub fn tags_dir(&self) -> &Path {
        &self.tags_dir
    }

    /// Loads the debug tags of `package` into the execution core. On failure, the core is left
    /// untouched. A missing document is reported as [`TagsError::NotFound`].
    pub fn load_debug_tags(&self, package: &str) -> Result<(), VmError> {
        let tags = match tags::load(&self.tags_dir, package) {
            Ok(tags) => tags,
            Err(e @ TagsError::NotFound { .. }) => {
                debug!(target: "psfvm::vm", "no debug tags loaded for {package}: {e}");
                return Err(e).context(VmCtx::Tags);
            }
            Err(e) => {
                warn!(target: "psfvm::vm", "couldn't load debug tags for {package}: {e}");
                return Err(e).context(VmCtx::Tags);
            }
        };

        self.with_core(move |core| core.set_debug_tags(tags))
            .context(VmCtx::Mailbox)
    }

    /// Saves the debug tags of the execution core as `package`.
    pub fn save_debug_tags(&self, package: &str) -> Result<(), VmError> {
        let tags = self
            .with_core(|core| core.debug_tags())
            .context(VmCtx::Mailbox)?;

        tags::save(&self.tags_dir, package, &tags).context(VmCtx::Tags)
    }

    fn stop(&mut self) {
        // the scheduler may already be gone, in which case there's nothing to stop
        _ = self.sender.post(Machine::request_shutdown);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(target: "psfvm::vm", "scheduler thread panicked");
            } else {
                info!(target: "psfvm::vm", "scheduler thread joined");
            }
        }
    }

    /// Stops the scheduler and waits for its thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.stop();
    }
}
