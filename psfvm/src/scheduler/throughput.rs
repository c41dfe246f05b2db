//! Pacing by audio buffer availability.
//!
//! Emulation runs as fast as the audio pump accepts buffers: one buffer is produced per audio
//! period worth of ticks, and the thread sleeps while every buffer is queued.

use crate::{machine::Machine, mailbox::Mailbox};
use log::trace;
use std::time::Duration;

pub(super) fn quantum(machine: &mut Machine, mailbox: &Mailbox<Machine>, starvation: Duration) {
    if machine.single_step {
        advance(machine, true);
        machine.halt();
        return;
    }

    if !machine.audio.has_free_buffers() {
        machine.clock.sleep(starvation);
        return;
    }

    let mut produced = 0u32;
    while machine.audio.has_free_buffers() && !mailbox.is_pending() {
        while machine.audio_update.remaining() > 0 {
            advance(machine, false);
        }

        machine.audio.update();
        machine.audio_update.rearm();
        produced += 1;
    }

    trace!(target: "psfvm::scheduler", "produced {produced} audio buffers");
}

/// Executes a single batch and handles a crossed frame boundary. A single step that lands on an
/// audio boundary also refills audio.
fn advance(machine: &mut Machine, single_step: bool) {
    let ticks = machine.core.execute(single_step);
    machine.audio_update.elapse(ticks);
    machine.frame.elapse(ticks);

    if machine.frame.remaining() < 0 {
        machine.new_frame();
    }

    if single_step && machine.audio_update.remaining() <= 0 {
        machine.audio.update();
        machine.audio_update.rearm();
    }
}
