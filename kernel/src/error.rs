//! Kernel-wide error type.
//!
//! Every fallible kernel path returns a `KernelError`. At the syscall
//! boundary (`syscall::dispatch`) it collapses to a negative errno value
//! per the ABI; everywhere else it composes with `?` the way ordinary Rust
//! errors do.

use core::fmt;

/// Kernel error, one variant per POSIX-style errno the syscall ABI exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    NoMemory,
    NotFound,
    Exists,
    NotDir,
    IsDir,
    PermissionDenied,
    BadFd,
    TooManyOpenFiles,
    NoSpace,
    WouldBlock,
    NoSuchProcess,
    InvalidArgument,
    NoSuchDevice,
    NoSuchDeviceOrAddress,
    ExecFormat,
    Io,
    BrokenPipe,
    NotEmpty,
    NameTooLong,
    TooManyLinks,
    NotSupported,
    ProcessLimit,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Negative errno value returned across the `int 0x80` boundary.
    pub const fn to_errno(self) -> i32 {
        -(match self {
            KernelError::PermissionDenied => 1,   // EPERM
            KernelError::NotFound => 2,            // ENOENT
            KernelError::NoSuchProcess => 3,       // ESRCH
            KernelError::Io => 5,                  // EIO
            KernelError::NoSuchDeviceOrAddress => 6, // ENXIO
            KernelError::ExecFormat => 8,          // ENOEXEC
            KernelError::BadFd => 9,               // EBADF
            KernelError::NoMemory => 12,           // ENOMEM
            KernelError::Exists => 17,             // EEXIST
            KernelError::NoSuchDevice => 19,       // ENODEV
            KernelError::NotDir => 20,             // ENOTDIR
            KernelError::IsDir => 21,              // EISDIR
            KernelError::InvalidArgument => 22,    // EINVAL
            KernelError::TooManyOpenFiles => 24,   // EMFILE
            KernelError::BrokenPipe => 32,         // EPIPE
            KernelError::NameTooLong => 36,        // ENAMETOOLONG
            KernelError::NotEmpty => 39,            // ENOTEMPTY
            KernelError::TooManyLinks => 40,       // ELOOP
            KernelError::NoSpace => 28,             // ENOSPC
            KernelError::WouldBlock => 11,          // EAGAIN
            KernelError::NotSupported => 95,       // ENOTSUP
            KernelError::ProcessLimit => 11,        // EAGAIN
        } as i32)
    }

    const fn component(self) -> &'static str {
        match self {
            KernelError::NoMemory | KernelError::NoSpace => "mm",
            KernelError::NotFound
            | KernelError::Exists
            | KernelError::NotDir
            | KernelError::IsDir
            | KernelError::NotEmpty
            | KernelError::NameTooLong
            | KernelError::TooManyLinks
            | KernelError::NotSupported => "vfs",
            KernelError::BadFd | KernelError::TooManyOpenFiles => "fd",
            KernelError::NoSuchProcess | KernelError::ProcessLimit => "process",
            KernelError::BrokenPipe | KernelError::WouldBlock => "pipe",
            KernelError::NoSuchDevice | KernelError::NoSuchDeviceOrAddress => "dev",
            KernelError::ExecFormat => "elf",
            KernelError::PermissionDenied => "perm",
            KernelError::InvalidArgument => "syscall",
            KernelError::Io => "io",
        }
    }

    const fn sentence(self) -> &'static str {
        match self {
            KernelError::NoMemory => "out of memory",
            KernelError::NotFound => "no such file or directory",
            KernelError::Exists => "file exists",
            KernelError::NotDir => "not a directory",
            KernelError::IsDir => "is a directory",
            KernelError::PermissionDenied => "permission denied",
            KernelError::BadFd => "bad file descriptor",
            KernelError::TooManyOpenFiles => "too many open files",
            KernelError::NoSpace => "no space left on device",
            KernelError::WouldBlock => "operation would block",
            KernelError::NoSuchProcess => "no such process",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::NoSuchDevice => "no such device",
            KernelError::NoSuchDeviceOrAddress => "no such device or address",
            KernelError::ExecFormat => "exec format error",
            KernelError::Io => "i/o error",
            KernelError::BrokenPipe => "broken pipe",
            KernelError::NotEmpty => "directory not empty",
            KernelError::NameTooLong => "name too long",
            KernelError::TooManyLinks => "too many symbolic links",
            KernelError::NotSupported => "operation not supported",
            KernelError::ProcessLimit => "too many processes",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component(), self.sentence())
    }
}

/// Logs `err` at first detection in the "component: sentence"
/// style, then returns it unchanged so callers can `return log_err(e)?`-style
/// propagate without losing the log.
pub fn log_err(err: KernelError) -> KernelError {
    log::error!(target: err.component(), "{}", err.sentence());
    err
}
