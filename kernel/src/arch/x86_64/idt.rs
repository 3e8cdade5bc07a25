//! Interrupt Descriptor Table: CPU exceptions, the timer tick (IRQ 0, used
//! for preemption per §4.9), and the remaining legacy PIC vectors (32..48,
//! relayed to [`crate::irq`] per §4.8).

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

/// Legacy 8259 PIC vectors are remapped to start at 32 (see `pic::init`).
const PIC_VECTOR_BASE: u8 = 32;
const TIMER_VECTOR: u8 = PIC_VECTOR_BASE;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        // SAFETY: DOUBLE_FAULT_IST_INDEX names a stack slot the GDT/TSS set
        // up specifically for the double-fault handler, which must run on
        // its own stack since the fault may itself be a stack overflow.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }

        idt[TIMER_VECTOR as usize].set_handler_fn(timer_interrupt_handler);
        seq_macro::apply_irq_handlers(&mut idt);
        idt
    };
}

mod seq_macro {
    use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};

    use super::PIC_VECTOR_BASE;

    /// Installs one generic relay handler on every remaining legacy PIC
    /// vector (1..=15, i.e. 33..=47). Vector 0 (the timer) is wired
    /// separately since it drives the scheduler instead of the relay.
    pub fn apply_irq_handlers(idt: &mut InterruptDescriptorTable) {
        macro_rules! relay_handler {
            ($offset:literal) => {{
                extern "x86-interrupt" fn handler(_frame: InterruptStackFrame) {
                    relay_and_eoi($offset);
                }
                idt[(PIC_VECTOR_BASE as usize) + $offset].set_handler_fn(handler);
            }};
        }
        relay_handler!(1);
        relay_handler!(2);
        relay_handler!(3);
        relay_handler!(4);
        relay_handler!(5);
        relay_handler!(6);
        relay_handler!(7);
        relay_handler!(8);
        relay_handler!(9);
        relay_handler!(10);
        relay_handler!(11);
        relay_handler!(12);
        relay_handler!(13);
        relay_handler!(14);
        relay_handler!(15);
    }

    fn relay_and_eoi(irq_offset: usize) {
        crate::irq::fire(irq_offset as u32);
        crate::arch::x86_64::pic::notify_end_of_interrupt(irq_offset as u8);
    }
}

pub fn init() {
    IDT.load();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    log::warn!("breakpoint exception: {:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("double fault: {:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    log::error!(
        "page fault at {:?}, error={:?}\n{:#?}",
        Cr2::read(),
        error_code,
        stack_frame
    );
    // Per §7: kernel page faults are always fatal. A fault originating in
    // user code (error_code contains the user-mode bit) would instead be
    // routed to process teardown, but no process-termination facility is
    // in scope here.
    panic!("unhandled page fault");
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "general protection fault, error={:#x}\n{:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::arch::x86_64::pic::notify_end_of_interrupt(0);
    crate::arch::x86_64::timer::tick();
}
