//! The interface to the emulated IOP: the CPU interpreter and its attached peripherals.

use crate::tags::DebugTags;
use strum::{FromRepr, IntoStaticStr};

/// The frequency of the IOP clock, in Hz.
pub const IOP_CLOCK_FREQ: u32 = 36_864_000;

/// A line of the IOP interrupt controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum Interrupt {
    VBlank = 0x00,
    GPU = 0x01,
    CDROM = 0x02,
    DMA = 0x03,
    Timer0 = 0x04,
    Timer1 = 0x05,
    Timer2 = 0x06,
    ControllerAndMemCard = 0x07,
    SIO = 0x08,
    SPU = 0x09,
    Controller = 0x0A,
}

/// An execution core: the CPU plus everything that advances along with it.
///
/// The core is owned by the scheduler thread and is never touched from anywhere else.
pub trait ExecutionCore: Send {
    /// Executes a batch of instructions and returns how many clock ticks were consumed. If
    /// `single_step` is set, exactly one instruction is executed.
    fn execute(&mut self, single_step: bool) -> u32;

    /// Asserts the given interrupt line.
    fn assert_line(&mut self, line: Interrupt);

    /// Whether execution stopped at a breakpoint during the last batch.
    fn must_break(&self) -> bool {
        false
    }

    /// Resets the core to its power-on state.
    fn reset(&mut self);

    /// Returns the debug annotations of the core, including the ones contributed by the BIOS.
    fn debug_tags(&self) -> DebugTags {
        DebugTags::default()
    }

    /// Replaces the debug annotations of the core.
    fn set_debug_tags(&mut self, tags: DebugTags) {
        _ = tags;
    }
}
