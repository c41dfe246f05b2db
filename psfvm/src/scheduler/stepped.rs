//! Pacing by wall-clock time, one batch per quantum.
//!
//! Used when stepping through code: breakpoints and single steps are honored after every batch,
//! and frames are throttled to real time by sleeping whatever is left of the frame period.

use crate::machine::Machine;
use log::trace;
use std::time::Duration;

pub(super) fn quantum(machine: &mut Machine, frame_duration: Duration) {
    let single_step = machine.single_step;
    let ticks = machine.core.execute(single_step);

    machine.frame.elapse(ticks);
    if machine.frame.remaining() <= 0 {
        machine.new_frame();

        let elapsed = machine
            .clock
            .now()
            .saturating_duration_since(machine.last_frame);
        let delay = frame_duration.saturating_sub(elapsed);
        if !delay.is_zero() {
            trace!(target: "psfvm::scheduler", "ahead of real time, sleeping {delay:?}");
            machine.clock.sleep(delay);
        }

        machine.last_frame = machine.clock.now();
    }

    if machine.core.must_break() || single_step {
        machine.halt();
    }
}
