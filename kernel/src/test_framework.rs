//! `no_std` test framework: a custom `#[test_case]` runner that reports
//! results over the serial port and exits QEMU with a pass/fail code.
//!
//! Separate from ordinary `#[cfg(test)] mod tests` unit tests, which run
//! under the host `#[test]` harness -- this runner is only linked in for
//! `cargo test --target ...` against the bare-metal target, where there is
//! no OS to report a process exit code to.

use core::panic::PanicInfo;
use core::time::Duration;

use crate::{serial_print, serial_println};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub trait Testable {
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

#[cfg(test)]
pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("{}\n", info);
    exit_qemu(QemuExitCode::Failed);
}

/// Writes `exit_code` to the QEMU `isa-debug-exit` device at port `0xf4`,
/// the standard no-reboot-required way for a bare-metal test binary to
/// report a result back to the test harness running QEMU.
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    #[cfg(target_arch = "x86")]
    // SAFETY: port 0xf4 is wired to QEMU's isa-debug-exit device by the
    // test runner's `-device isa-debug-exit` flag; writing to it always
    // terminates the VM before control would return here.
    unsafe {
        x86::io::outb(0xf4, exit_code as u32 as u8);
    }
    loop {
        core::hint::spin_loop();
    }
}

/// Reads the CPU timestamp counter, for benchmark timing only -- never
/// relied on for scheduling or wall-clock decisions (see `arch::x86::pit`
/// for those).
#[cfg(target_arch = "x86")]
#[inline(always)]
pub fn read_timestamp() -> u64 {
    // SAFETY: RDTSC has no side effects and is available on every CPU this
    // kernel targets.
    unsafe {
        let mut low: u32;
        let mut high: u32;
        core::arch::asm!("rdtsc", out("eax") low, out("edx") high, options(nomem, nostack));
        ((high as u64) << 32) | low as u64
    }
}

#[cfg(not(target_arch = "x86"))]
#[inline(always)]
pub fn read_timestamp() -> u64 {
    0
}

#[inline(always)]
pub fn cycles_to_ns(cycles: u64) -> u64 {
    const ASSUMED_CPU_GHZ: u64 = 2;
    cycles / ASSUMED_CPU_GHZ
}

/// Macro to define a kernel test that runs under the custom `#[test_case]`
/// runner rather than the host `#[test]` harness.
#[macro_export]
macro_rules! kernel_test {
    ($name:ident, $body:block) => {
        #[test_case]
        fn $name() {
            $body
        }
    };
}

#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr) => {
        if !$cond {
            serial_println!("assertion failed: {}", stringify!($cond));
            panic!("assertion failed");
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            serial_println!($($arg)*);
            panic!("assertion failed");
        }
    };
}

#[macro_export]
macro_rules! kernel_assert_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            serial_println!(
                "assertion failed: {} != {}\n  left: {:?}\n right: {:?}",
                stringify!($left),
                stringify!($right),
                $left,
                $right
            );
            panic!("assertion failed: not equal");
        }
    };
}

/// A timed benchmark result, reported by [`BenchmarkRunner::run_benchmark`].
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkResult {
    pub name: &'static str,
    pub iterations: u64,
    pub total_time: Duration,
    pub avg_time_ns: u64,
    pub min_time_ns: u64,
    pub max_time_ns: u64,
}

pub struct BenchmarkRunner {
    iterations: u64,
    warmup_iterations: u64,
}

impl Default for BenchmarkRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkRunner {
    pub const fn new() -> Self {
        Self {
            iterations: 1000,
            warmup_iterations: 100,
        }
    }

    pub fn run_benchmark<F>(&self, name: &'static str, mut f: F) -> BenchmarkResult
    where
        F: FnMut(),
    {
        serial_print!("{}...\t", name);

        for _ in 0..self.warmup_iterations {
            f();
        }

        let mut min_cycles = u64::MAX;
        let mut max_cycles = 0u64;
        let mut total_cycles = 0u64;

        for _ in 0..self.iterations {
            let start = read_timestamp();
            f();
            let elapsed = read_timestamp().saturating_sub(start);
            total_cycles += elapsed;
            min_cycles = min_cycles.min(elapsed);
            max_cycles = max_cycles.max(elapsed);
        }

        let avg_cycles = total_cycles / self.iterations;
        let result = BenchmarkResult {
            name,
            iterations: self.iterations,
            total_time: Duration::from_nanos(cycles_to_ns(total_cycles)),
            avg_time_ns: cycles_to_ns(avg_cycles),
            min_time_ns: cycles_to_ns(min_cycles),
            max_time_ns: cycles_to_ns(max_cycles),
        };

        serial_println!("[ok] avg: {} ns", result.avg_time_ns);
        result
    }
}

#[macro_export]
macro_rules! kernel_bench {
    ($name:ident, $body:expr) => {
        #[test_case]
        fn $name() {
            use $crate::test_framework::BenchmarkRunner;
            let runner = BenchmarkRunner::new();
            let result = runner.run_benchmark(stringify!($name), || $body);
            serial_println!("  min: {} ns, max: {} ns", result.min_time_ns, result.max_time_ns);
        }
    };
}
