//! `print!`/`println!`, backed by the same serial sink as
//! [`crate::serial_print!`]. Kept as a distinct macro pair (rather than
//! reusing `serial_print!` directly) since call sites read as ordinary
//! console output, not "this went to the debug port".

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::serial::_serial_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
