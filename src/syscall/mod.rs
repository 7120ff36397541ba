//! System-call dispatch (§4.E vector 0x80, §4.H, §6).
//!
//! Ten call numbers, demultiplexed on the value the caller places in the
//! first argument register (`eax`, by this architecture's convention --
//! see [`crate::arch::x86::TrapFrame::syscall_number`]), with up to three
//! more arguments in the next three registers. The filesystem, the ELF
//! loader, and everything else `read`/`write`/`open`/`close`/`exec` would
//! delegate to are external collaborators out of this core's scope (§1);
//! those five calls return `ENOSYS` without touching caller state, exactly
//! like an unrecognized call number.

pub mod uaccess;

use crate::arch::x86::TrapFrame;
use crate::lib::error::{Errno, KernelError};
use crate::{klog, mm, process};

const SYS_EXIT: u32 = 1;
const SYS_FORK: u32 = 2;
const SYS_READ: u32 = 3;
const SYS_WRITE: u32 = 4;
const SYS_OPEN: u32 = 5;
const SYS_CLOSE: u32 = 6;
const SYS_EXEC: u32 = 7;
const SYS_WAIT: u32 = 8;
const SYS_MEMINFO: u32 = 9;
const SYS_DEBUG: u32 = 10;

/// `debug` subcommands (§6 syscall 10 "dumps requested subsystem").
const DEBUG_DMESG: u32 = 0;
const DEBUG_SCHEDULER: u32 = 1;

/// Payload for the `meminfo` syscall (§6 "current/peak/frames").
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemInfo {
    pub heap_used: usize,
    pub heap_peak: usize,
    pub frames_used: usize,
    pub frames_total: usize,
}

/// Entry point reached from `idt::common_interrupt_handler` for vector
/// 0x80. Demultiplexes on `frame.syscall_number()` and writes the result
/// back into the frame's return-value register -- except `exit`, which
/// never returns.
pub fn dispatch(frame: &mut TrapFrame) {
    let nr = frame.syscall_number();
    let args = frame.syscall_args();

    #[cfg(feature = "syscall-verbose")]
    crate::trace!(
        "syscall: nr={} args=[{:#x}, {:#x}, {:#x}, {:#x}] pid={}",
        nr,
        args[0],
        args[1],
        args[2],
        args[3],
        process::current_pid()
    );

    match nr {
        SYS_EXIT => process::exit(args[0] as i32),
        SYS_FORK => {
            let ret = match process::fork(frame as *mut TrapFrame) {
                Ok(child) => child as i32,
                Err(e) => Errno::from(e).as_isize() as i32,
            };
            frame.set_return_value(ret);
        }
        SYS_READ | SYS_WRITE | SYS_OPEN | SYS_CLOSE | SYS_EXEC => {
            klog::warn!("syscall: call {} has no filesystem behind it in this core", nr);
            frame.set_return_value(Errno::ENOSYS.as_isize() as i32);
        }
        SYS_WAIT => {
            let ret = match sys_wait() {
                Ok(child) => child as i32,
                Err(e) => Errno::from(e).as_isize() as i32,
            };
            frame.set_return_value(ret);
        }
        SYS_MEMINFO => {
            let ret = match sys_meminfo(args[0]) {
                Ok(()) => 0,
                Err(e) => Errno::from(e).as_isize() as i32,
            };
            frame.set_return_value(ret);
        }
        SYS_DEBUG => {
            let ret = sys_debug(args[0], args[1], args[2]);
            frame.set_return_value(ret);
        }
        other => {
            klog::warn!("syscall: unknown call number {}", other);
            frame.set_return_value(Errno::ENOSYS.as_isize() as i32);
        }
    }
}

/// `wait()` (§6 syscall 8): reap the first terminated child of the caller.
fn sys_wait() -> Result<process::task::Pid, KernelError> {
    let caller = process::current_pid();
    process::reap_child(caller).map(|(pid, _code)| pid)
}

/// `meminfo(out_ptr)` (§6 syscall 9): snapshot current/peak heap usage and
/// frame counts into the caller's buffer.
fn sys_meminfo(out_ptr: u32) -> Result<(), KernelError> {
    let heap = mm::heap::stats();
    let frames = mm::frame::stats();
    let info = MemInfo {
        heap_used: heap.used,
        heap_peak: heap.peak,
        frames_used: frames.used,
        frames_total: frames.total,
    };
    unsafe { uaccess::copy_to_user(out_ptr, info) }
}

/// `debug(cmd, arg)` (§6 syscall 10): dump a requested subsystem. `cmd ==
/// DEBUG_DMESG` drains the log ring into the buffer described by `arg`
/// (pointer) and `len` (byte count); `cmd == DEBUG_SCHEDULER` logs the
/// scheduler's runqueue summary and returns 0. Unknown commands return
/// `EINVAL`.
fn sys_debug(cmd: u32, arg: u32, len: u32) -> i32 {
    match cmd {
        DEBUG_DMESG => {
            if uaccess::validate_user_write(arg, len as usize).is_err() {
                return Errno::EFAULT.as_isize() as i32;
            }
            match unsafe { klog::sys_dmesg(arg as *mut u8, len as usize) } {
                Ok(n) => n as i32,
                Err(e) => e.as_isize() as i32,
            }
        }
        DEBUG_SCHEDULER => {
            process::scheduler::debug_dump();
            0
        }
        _ => Errno::EINVAL.as_isize() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_debug_command_is_invalid_argument() {
        assert_eq!(sys_debug(0xff, 0, 0), Errno::EINVAL.as_isize() as i32);
    }

    #[test]
    fn dmesg_rejects_a_bad_destination_pointer() {
        assert_eq!(sys_debug(DEBUG_DMESG, 0, 16), Errno::EFAULT.as_isize() as i32);
    }
}
