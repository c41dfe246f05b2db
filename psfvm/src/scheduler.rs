//! The scheduler loop: the single worker routine that owns the [`Machine`].
//!
//! Every iteration first drains the mailbox, then either idles (while paused) or runs one
//! quantum of emulation with the configured [`Pacing`].

mod stepped;
mod throughput;

use crate::{
    Config,
    machine::{Machine, Status},
    mailbox::Mailbox,
};
use log::info;
use std::time::Duration;
use strum::{Display, EnumString, IntoStaticStr, VariantNames};

/// How running quanta are paced.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, IntoStaticStr, VariantNames,
)]
#[strum(serialize_all = "snake_case")]
pub enum Pacing {
    /// Paced by the audio pump: run until every audio buffer is queued, then sleep.
    #[default]
    Throughput,
    /// Paced by wall-clock time, one batch per quantum, honoring breakpoints. For debugging.
    Stepped,
}

/// Whether the loop should keep going after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Drives a [`Machine`], executing the calls sent to it through its mailbox.
#[derive(Debug)]
pub struct Scheduler {
    machine: Machine,
    mailbox: Mailbox<Machine>,
    pacing: Pacing,
    frame_duration: Duration,
    idle_interval: Duration,
    starvation_interval: Duration,
}

impl Scheduler {
    pub(crate) fn new(machine: Machine, mailbox: Mailbox<Machine>, config: &Config) -> Self {
        Self {
            machine,
            mailbox,
            pacing: config.pacing,
            frame_duration: config.frame_duration(),
            idle_interval: config.idle_interval,
            starvation_interval: config.starvation_interval,
        }
    }

    #[inline(always)]
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    #[inline(always)]
    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Runs a single iteration of the loop.
    pub fn iterate(&mut self) -> Flow {
        self.mailbox.drain(&mut self.machine);
        if self.machine.shutdown_requested() {
            return Flow::Exit;
        }

        match self.machine.status() {
            Status::Paused => self.machine.clock.sleep(self.idle_interval),
            Status::Running => match self.pacing {
                Pacing::Throughput => {
                    throughput::quantum(&mut self.machine, &self.mailbox, self.starvation_interval);
                }
                Pacing::Stepped => stepped::quantum(&mut self.machine, self.frame_duration),
            },
        }

        Flow::Continue
    }

    /// Runs the loop until a shutdown is requested.
    pub fn run(mut self) {
        info!(target: "psfvm::scheduler", "scheduler started ({} pacing)", self.pacing);
        while self.iterate() == Flow::Continue {}
        info!(target: "psfvm::scheduler", "scheduler stopped");
    }
}
