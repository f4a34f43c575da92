//! The fixed syscall numbering. This is an ABI contract between kernel and
//! user space: numbers are never renumbered or reordered alphabetically,
//! even when that leaves the declaration order looking arbitrary.

/// One variant per `int 0x80` entry point, discriminants pinned to the
/// numbers user space links against.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    Exit = 0,
    Fork = 1,
    Execve = 2,
    Msleep = 3,
    PageAlloc = 4,
    PageFree = 5,
    SignalRegister = 6,
    SignalResume = 7,
    SignalSend = 8,
    GetPid = 9,
    Open = 10,
    Close = 11,
    Read = 12,
    Write = 13,
    ReadDir = 14,
    Chmod = 15,
    ReadLink = 16,
    Unlink = 17,
    Symlink = 18,
    Mkdir = 19,
    Pipe = 20,
    MoveFd = 21,
    Chdir = 22,
    GetCwd = 23,
    Wait = 24,
    Fstat = 25,
    Lstat = 26,
    Lseek = 27,
    Thread = 28,
    Dup = 29,
    ThreadRegister = 30,
    Yield = 31,
    UiRegister = 32,
    UiMakeResponder = 33,
    UiSplit = 34,
    UiResume = 35,
    UiSwapBuffers = 36,
    UiWait = 37,
    UiYield = 38,
    Rename = 39,
    Resolve = 40,
    Systime = 41,
    Priority = 42,
}

impl SyscallNumber {
    pub fn from_raw(n: u32) -> Option<Self> {
        use SyscallNumber::*;
        Some(match n {
            0 => Exit,
            1 => Fork,
            2 => Execve,
            3 => Msleep,
            4 => PageAlloc,
            5 => PageFree,
            6 => SignalRegister,
            7 => SignalResume,
            8 => SignalSend,
            9 => GetPid,
            10 => Open,
            11 => Close,
            12 => Read,
            13 => Write,
            14 => ReadDir,
            15 => Chmod,
            16 => ReadLink,
            17 => Unlink,
            18 => Symlink,
            19 => Mkdir,
            20 => Pipe,
            21 => MoveFd,
            22 => Chdir,
            23 => GetCwd,
            24 => Wait,
            25 => Fstat,
            26 => Lstat,
            27 => Lseek,
            28 => Thread,
            29 => Dup,
            30 => ThreadRegister,
            31 => Yield,
            32 => UiRegister,
            33 => UiMakeResponder,
            34 => UiSplit,
            35 => UiResume,
            36 => UiSwapBuffers,
            37 => UiWait,
            38 => UiYield,
            39 => Rename,
            40 => Resolve,
            41 => Systime,
            42 => Priority,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chmod_and_readlink_keep_source_header_order() {
        assert_eq!(SyscallNumber::from_raw(15), Some(SyscallNumber::Chmod));
        assert_eq!(SyscallNumber::from_raw(16), Some(SyscallNumber::ReadLink));
    }

    #[test]
    fn priority_is_the_last_entry() {
        assert_eq!(SyscallNumber::from_raw(42), Some(SyscallNumber::Priority));
        assert_eq!(SyscallNumber::from_raw(43), None);
    }
}
