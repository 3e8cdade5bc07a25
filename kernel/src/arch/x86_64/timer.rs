//! Programmable Interval Timer (PIT) driving preemption on IRQ 0 (§4.9).

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

const PIT_FREQUENCY_HZ: u32 = 1_193_182;

/// Number of ticks elapsed since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Called from the IRQ 0 handler once EOI has been sent.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::on_timer_tick();
}

/// Program PIT channel 0 for periodic interrupts at `hz` Hz.
pub fn init(hz: u32) {
    let divisor = (PIT_FREQUENCY_HZ / hz).max(1);

    // SAFETY: Ports 0x43 (mode/command) and 0x40 (channel 0 data) are the
    // well-known PIT register addresses. This sequence (mode 2, rate
    // generator, lobyte/hibyte access) is the standard PIT programming
    // idiom and has no effect beyond configuring the timer.
    unsafe {
        use x86_64::instructions::port::Port;
        let mut cmd: Port<u8> = Port::new(0x43);
        let mut data: Port<u8> = Port::new(0x40);
        cmd.write(0x36u8);
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }

    log::info!("PIT configured for {hz} Hz (divisor {divisor})");
}
