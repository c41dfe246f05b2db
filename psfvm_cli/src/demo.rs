//! A synthetic execution core, so the scheduler can be driven without a real IOP.
//!
//! The core spins over a short loop of fixed-cost instructions and services the interrupt lines
//! asserted by the scheduler at the end of every batch.

use log::{debug, trace};
use psfvm::{
    iop::{ExecutionCore, Interrupt},
    tags::DebugTags,
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Where the loop starts.
pub const ENTRY: u32 = 0x0000_1000;
/// Where the interrupt handler lives.
pub const HANDLER: u32 = 0x0000_0080;

const CYCLES_PER_INSTRUCTION: u32 = 2;
const INTERRUPT_LINES: u8 = 11;

/// How many times each interrupt line was serviced since the last reset. Readable from any
/// thread while the core runs on the scheduler thread.
#[derive(Debug, Default)]
pub struct Serviced([AtomicU64; INTERRUPT_LINES as usize]);

impl Serviced {
    pub fn get(&self, line: Interrupt) -> u64 {
        self.0[line as usize].load(Ordering::Relaxed)
    }

    fn record(&self, line: Interrupt) {
        self.0[line as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn clear(&self) {
        for count in &self.0 {
            count.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
pub struct Spinner {
    pc: u32,
    /// Instructions in the loop.
    length: u32,
    /// Instructions per batch.
    batch: u32,
    /// Asserted lines, one bit per [`Interrupt`].
    pending: u16,
    serviced: Arc<Serviced>,
    tags: DebugTags,
}

impl Spinner {
    pub fn new(length: u32, batch: u32) -> Self {
        Self {
            pc: ENTRY,
            length: length.max(1),
            batch: batch.max(1),
            pending: 0,
            serviced: Arc::default(),
            tags: DebugTags::default(),
        }
    }

    #[cfg(test)]
    fn pc(&self) -> u32 {
        self.pc
    }

    /// A handle to the service counters, which stays valid once the core is handed to a VM.
    pub fn serviced(&self) -> Arc<Serviced> {
        self.serviced.clone()
    }

    fn advance(&mut self) {
        let end = ENTRY + 4 * self.length;
        self.pc += 4;
        if self.pc >= end {
            self.pc = ENTRY;
        }
    }

    fn service_interrupts(&mut self) {
        if self.pending == 0 {
            return;
        }

        for bit in 0..INTERRUPT_LINES {
            if self.pending & (1 << bit) == 0 {
                continue;
            }

            if let Some(line) = Interrupt::from_repr(bit) {
                trace!("servicing {}", <&'static str>::from(line));
                self.serviced.record(line);
            }
        }

        self.pending = 0;
    }

    /// The annotations every package starts with.
    fn builtin_tags() -> DebugTags {
        let mut tags = DebugTags::default();
        tags.functions.insert(ENTRY, "spin".to_owned());
        tags.functions.insert(HANDLER, "exception_handler".to_owned());
        tags
    }
}

impl ExecutionCore for Spinner {
    fn execute(&mut self, single_step: bool) -> u32 {
        let count = if single_step { 1 } else { self.batch };
        for _ in 0..count {
            self.advance();
        }

        if single_step {
            debug!("stepped to {:08X}", self.pc);
        }

        self.service_interrupts();
        count.saturating_mul(CYCLES_PER_INSTRUCTION)
    }

    fn assert_line(&mut self, line: Interrupt) {
        self.pending |= 1 << (line as u8);
    }

    fn reset(&mut self) {
        self.pc = ENTRY;
        self.pending = 0;
        self.serviced.clear();
    }

    fn debug_tags(&self) -> DebugTags {
        let mut tags = Self::builtin_tags();
        tags.functions
            .extend(self.tags.functions.iter().map(|(a, v)| (*a, v.clone())));
        tags.comments
            .extend(self.tags.comments.iter().map(|(a, v)| (*a, v.clone())));
        tags
    }

    fn set_debug_tags(&mut self, tags: DebugTags) {
        self.tags = tags;
    }
}
