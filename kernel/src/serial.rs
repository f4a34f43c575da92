//! Polled COM1 serial sink.
//!
//! Backed by the `uart_16550` crate's raw port-I/O UART, a dependency the
//! workspace already carries. No interrupts are used; every write polls the
//! line-status register, acting as a polled log sink.

use core::fmt;

use uart_16550::SerialPort as Uart16550;

const COM1_BASE: u16 = 0x3F8;

pub struct SerialPort {
    inner: Uart16550,
}

impl SerialPort {
    pub fn new() -> Self {
        // SAFETY: COM1's fixed I/O base is owned exclusively by the kernel;
        // no other code touches ports 0x3F8..0x3FF.
        let mut inner = unsafe { Uart16550::new(COM1_BASE) };
        inner.init();
        Self { inner }
    }
}

impl Default for SerialPort {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.inner.write_str(s)
    }
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    use core::fmt::Write;

    crate::arch::x86::without_interrupts(|| {
        let mut port = SerialPort::new();
        let _ = port.write_fmt(args);
    });
}
