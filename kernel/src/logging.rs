//! Kernel-wide structured logging, built on the `log` crate facade (§10.1).
//!
//! Every subsystem logs through `log::info!`/`log::warn!`/etc; this module
//! supplies the one process-wide `log::Log` sink, installed during early
//! boot before any other subsystem initializes. The `Log(ptr, len)`
//! syscall (§6) is a thin wrapper that feeds user-originated strings
//! through the same sink under the `"user"` target, so kernel and
//! userspace log lines share one format.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let ms = crate::arch::x86_64::timer::ticks();
        crate::serial_println!(
            "[{ms:>10}ms] {:<5} {}: {}",
            level_tag(record.level()),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Install the global logger. Must be called exactly once, before any
/// other subsystem logs (see the boot order documented in `kernel_main`).
pub fn init() {
    let level = if cfg!(feature = "testing") {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    log::set_max_level(level);
    // SAFETY: not applicable -- `set_logger` only fails if called twice,
    // which boot order guarantees will not happen.
    log::set_logger(&LOGGER).expect("logger must be installed exactly once");
}

/// Emit a single user-originated log line (`Log` syscall, §6). Truncates
/// to `MAX_USER_LOG_LEN` bytes rather than failing, mirroring the kernel's
/// own bounded log line length.
pub fn log_user_string(bytes: &[u8]) {
    const MAX_USER_LOG_LEN: usize = 256;
    let bytes = &bytes[..bytes.len().min(MAX_USER_LOG_LEN)];
    match core::str::from_utf8(bytes) {
        Ok(s) => log::info!(target: "user", "{s}"),
        Err(_) => log::warn!(target: "user", "<non-utf8 log line, {} bytes>", bytes.len()),
    }
}
