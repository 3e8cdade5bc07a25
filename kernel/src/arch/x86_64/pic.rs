//! Legacy 8259 PIC setup via the `pic8259` crate.
//!
//! Remaps both PICs so IRQ 0..15 land on IDT vectors 32..47, clear of the
//! CPU exception range, then masks everything until the IDT is ready.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

static PICS: Mutex<ChainedPics> =
    // SAFETY: ChainedPics::new is safe to call; the PICs are only actually
    // touched (port I/O) inside `init`/`notify_end_of_interrupt`, both of
    // which run with interrupts masked or disabled around the hardware
    // access.
    unsafe { Mutex::new(ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET)) };

pub fn init() {
    // SAFETY: `initialize` performs the standard ICW1-ICW4 sequence over
    // ports 0x20/0x21/0xA0/0xA1. Called once during `arch::x86_64::init`
    // with interrupts disabled.
    unsafe {
        PICS.lock().initialize();
    }
}

/// Send End-Of-Interrupt for the given IRQ line (0..15).
pub fn notify_end_of_interrupt(irq_line: u8) {
    // SAFETY: `irq_line` is a valid IRQ number handled by this PIC pair;
    // called only from within the corresponding interrupt handler.
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + irq_line);
    }
}
