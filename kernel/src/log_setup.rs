//! Wires the `log` facade to the polled COM1 serial sink.
//!
//! Called once from `bootstrap::kmain` before any other subsystem logs.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::serial::SerialPort;

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;
static PORT: Mutex<Option<SerialPort>> = Mutex::new(None);

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut port = PORT.lock();
        if let Some(port) = port.as_mut() {
            let _ = writeln!(
                port,
                "[{:>5} {}] {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Initialize the serial port and install the global logger. Idempotent.
pub fn init() {
    *PORT.lock() = Some(SerialPort::new());
    // SAFETY: `LOGGER` is a `'static` zero-sized type with no interior
    // mutability of its own (all state lives behind `PORT`'s spinlock), so
    // registering it as the global logger is sound even if called from an
    // interrupt-disabled early-boot context.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
}
