//! Kernel log ring buffer and `printk`-style entry point.
//!
//! Writers go through the `printk!`/`error!`/`warn!`/`info!`/`debug!`/`trace!`
//! macros (or call [`log`] directly). Every line is tagged with a leading
//! `<N>` level marker, timestamped when timestamps are enabled, appended to
//! a 128 KiB ring that silently overwrites its oldest bytes once full, and
//! fanned out to every registered [`Console`] whose threshold the line
//! clears. Before the ring is marked ready, lines bypass it and go straight
//! to whatever consoles are registered -- this is the path early boot code
//! uses before `klog::init()` runs.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use spin::Mutex;

/// Stable constant: the log buffer is 128 KiB of raw bytes.
pub const LOG_BUF_SIZE: usize = 131_072;
const LINE_MAX: usize = 256;
const MAX_CONSOLES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl LogLevel {
    pub const fn from_tag(n: u8) -> Self {
        match n {
            0 => LogLevel::Emergency,
            1 => LogLevel::Alert,
            2 => LogLevel::Critical,
            3 => LogLevel::Error,
            4 => LogLevel::Warning,
            5 => LogLevel::Notice,
            6 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Emergency => "EMERG",
            LogLevel::Alert => "ALERT",
            LogLevel::Critical => "CRIT",
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN",
            LogLevel::Notice => "NOTICE",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// The contract a console driver implements: receive already-formatted
/// bytes. VGA text, PS/2-backed terminals, and any other screen driver are
/// external collaborators that register through this trait; the serial
/// port driver shipped in `arch::x86::serial` is the one console this crate
/// owns directly.
pub trait Console: Sync {
    fn write(&self, buf: &[u8]);
    fn name(&self) -> &'static str;
}

/// Typed argument for the minimal `%`-directive evaluator. Used by callers
/// that build a format string and argument list explicitly (e.g. a driver
/// translating a C-style `printk(fmt, ...)` call) rather than going through
/// Rust's `format_args!`.
#[derive(Clone, Copy)]
pub enum Arg<'a> {
    I32(i32),
    U32(u32),
    Char(char),
    Str(&'a str),
    Ptr(usize),
}

/// Evaluate `%d %u %x %X %c %s %p %%` against `args` in order, appending the
/// result to `out`. A directive with no matching argument renders as `<?>`;
/// an unrecognized directive is copied through literally.
pub fn format_line(fmt: &str, args: &[Arg], out: &mut heapless::String<LINE_MAX>) {
    let mut chars = fmt.chars();
    let mut arg_iter = args.iter();
    while let Some(c) = chars.next() {
        if c != '%' {
            let _ = out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => {
                let _ = out.push('%');
            }
            Some('d') => match arg_iter.next() {
                Some(Arg::I32(v)) => {
                    let _ = write!(out, "{}", v);
                }
                _ => {
                    let _ = out.push_str("<?>");
                }
            },
            Some('u') => match arg_iter.next() {
                Some(Arg::U32(v)) => {
                    let _ = write!(out, "{}", v);
                }
                _ => {
                    let _ = out.push_str("<?>");
                }
            },
            Some('x') => match arg_iter.next() {
                Some(Arg::U32(v)) => {
                    let _ = write!(out, "{:x}", v);
                }
                Some(Arg::Ptr(v)) => {
                    let _ = write!(out, "{:x}", v);
                }
                _ => {
                    let _ = out.push_str("<?>");
                }
            },
            Some('X') => match arg_iter.next() {
                Some(Arg::U32(v)) => {
                    let _ = write!(out, "{:X}", v);
                }
                _ => {
                    let _ = out.push_str("<?>");
                }
            },
            Some('c') => match arg_iter.next() {
                Some(Arg::Char(v)) => {
                    let _ = out.push(*v);
                }
                _ => {
                    let _ = out.push('?');
                }
            },
            Some('s') => match arg_iter.next() {
                Some(Arg::Str(v)) => {
                    let _ = out.push_str(v);
                }
                _ => {
                    let _ = out.push_str("<?>");
                }
            },
            Some('p') => match arg_iter.next() {
                Some(Arg::Ptr(v)) => {
                    let _ = write!(out, "0x{:08x}", v);
                }
                _ => {
                    let _ = out.push_str("<?>");
                }
            },
            Some(other) => {
                let _ = out.push('%');
                let _ = out.push(other);
            }
            None => {
                let _ = out.push('%');
            }
        }
    }
}

struct ByteRing {
    data: [u8; LOG_BUF_SIZE],
    head: usize,
    len: usize,
    seq: u64,
}

impl ByteRing {
    const fn new() -> Self {
        Self {
            data: [0; LOG_BUF_SIZE],
            head: 0,
            len: 0,
            seq: 0,
        }
    }

    fn write_line(&mut self, line: &[u8]) {
        self.seq += 1;
        for &b in line {
            self.data[self.head] = b;
            self.head = (self.head + 1) % LOG_BUF_SIZE;
            if self.len < LOG_BUF_SIZE {
                self.len += 1;
            }
        }
    }

    /// Copy out the valid bytes in write order (oldest first).
    fn snapshot(&self, out: &mut [u8]) -> usize {
        let n = core::cmp::min(self.len, out.len());
        let start = (self.head + LOG_BUF_SIZE - self.len) % LOG_BUF_SIZE;
        for (i, slot) in out.iter_mut().enumerate().take(n) {
            *slot = self.data[(start + i) % LOG_BUF_SIZE];
        }
        n
    }
}

static RING: Mutex<ByteRing> = Mutex::new(ByteRing::new());
static RING_READY: AtomicBool = AtomicBool::new(false);
static CONSOLE_THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static TIMESTAMPS_ENABLED: AtomicBool = AtomicBool::new(true);
static CONSOLES: Mutex<[Option<&'static dyn Console>; MAX_CONSOLES]> = Mutex::new([None; MAX_CONSOLES]);

/// Mark the ring live. Before this call every line bypasses the ring and
/// goes straight to registered consoles, matching the "early" boot path.
pub fn init() {
    RING_READY.store(true, Ordering::Release);
}

/// Register a console. Returns `false` if the console table is full.
pub fn register_console(console: &'static dyn Console) -> bool {
    let mut consoles = CONSOLES.lock();
    for slot in consoles.iter_mut() {
        if slot.is_none() {
            *slot = Some(console);
            return true;
        }
    }
    false
}

pub fn set_console_threshold(level: LogLevel) {
    CONSOLE_THRESHOLD.store(level as u8, Ordering::Relaxed);
}

pub fn enable_timestamps(enabled: bool) {
    TIMESTAMPS_ENABLED.store(enabled, Ordering::Relaxed);
}

fn emit_line(level: LogLevel, body: &str) {
    let mut line: heapless::String<LINE_MAX> = heapless::String::new();
    let _ = write!(line, "<{}>", level as u8);
    if TIMESTAMPS_ENABLED.load(Ordering::Relaxed) {
        let us = crate::time::monotonic_us();
        let _ = write!(line, "[{:5}.{:06}] ", us / 1_000_000, us % 1_000_000);
    }
    let _ = line.push_str(body);
    if !body.ends_with('\n') {
        let _ = line.push('\n');
    }

    let ring_ready = RING_READY.load(Ordering::Acquire);
    if ring_ready {
        RING.lock().write_line(line.as_bytes());
    }

    let threshold = CONSOLE_THRESHOLD.load(Ordering::Relaxed);
    if (level as u8) <= threshold || !ring_ready {
        let consoles = CONSOLES.lock();
        for slot in consoles.iter().flatten() {
            slot.write(line.as_bytes());
        }
    }
}

/// Entry point used by the `printk!` family of macros: format `args` with
/// `core::fmt` and push the result through the level-tagged ring/console
/// pipeline.
pub fn log(level: LogLevel, args: fmt::Arguments) {
    let mut body: heapless::String<LINE_MAX> = heapless::String::new();
    let _ = write!(body, "{}", args);
    emit_line(level, &body);
}

/// Entry point for callers that already hold a format string and an
/// explicit argument list (the `%d`-style evaluator contract).
pub fn printk_raw(level: LogLevel, fmt: &str, args: &[Arg]) {
    let mut body: heapless::String<LINE_MAX> = heapless::String::new();
    format_line(fmt, args, &mut body);
    emit_line(level, &body);
}

/// `debug` syscall subcommand: drain the ring into a caller buffer.
///
/// # Safety
/// `buf` must point to at least `count` writable bytes.
pub unsafe fn sys_dmesg(buf: *mut u8, count: usize) -> Result<isize, crate::lib::error::Errno> {
    use crate::lib::error::Errno;
    if buf.is_null() {
        return Err(Errno::EFAULT);
    }
    let ring = RING.lock();
    let mut tmp = alloc::vec![0u8; count];
    let n = ring.snapshot(&mut tmp);
    core::ptr::copy_nonoverlapping(tmp.as_ptr(), buf, n);
    Ok(n as isize)
}

#[macro_export]
macro_rules! printk {
    ($level:expr, $($arg:tt)*) => {
        $crate::klog::log($level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::printk!($crate::klog::LogLevel::Error, $($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::printk!($crate::klog::LogLevel::Warning, $($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::printk!($crate::klog::LogLevel::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::printk!($crate::klog::LogLevel::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::printk!($crate::klog::LogLevel::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        $crate::printk!($level, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_line_directives() {
        let args = [
            Arg::Str("frame"),
            Arg::U32(7),
            Arg::I32(-3),
            Arg::Ptr(0xdead_beef),
            Arg::Char('!'),
        ];
        let mut out: heapless::String<LINE_MAX> = heapless::String::new();
        format_line("%s %u %d %p%c 100%%", &args, &mut out);
        assert_eq!(out.as_str(), "frame 7 -3 0xdeadbeef! 100%");
    }

    #[test]
    fn format_line_missing_arg_is_placeholder() {
        let mut out: heapless::String<LINE_MAX> = heapless::String::new();
        format_line("%d", &[], &mut out);
        assert_eq!(out.as_str(), "<?>");
    }

    #[test]
    fn byte_ring_wraps_and_preserves_order() {
        let mut ring = ByteRing::new();
        ring.write_line(b"hello ");
        ring.write_line(b"world");
        let mut out = [0u8; 32];
        let n = ring.snapshot(&mut out);
        assert_eq!(&out[..n], b"hello world");
    }

    #[test]
    fn byte_ring_overwrites_oldest_when_full() {
        let mut ring = ByteRing::new();
        let filler = [b'a'; LOG_BUF_SIZE];
        ring.write_line(&filler);
        ring.write_line(b"TAIL");
        let mut out = [0u8; 8];
        let n = ring.snapshot(&mut out);
        // Oldest 4 bytes of 'a' fell off; last 4 bytes are "TAIL".
        assert_eq!(&out[..n], b"aaaaTAIL");
    }
}
