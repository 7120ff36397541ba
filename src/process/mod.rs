//! Process table, lifecycle, and syscall-facing glue (§4.H).
//!
//! [`task`] defines the process-control block, [`pid`] owns the fixed
//! process table and PID bitmap, and [`scheduler`] owns the runqueues that
//! schedule whatever `pid` has allocated. This module ties the three
//! together into the operations the boot sequence and syscall layer call:
//! create a process, exit the current one, ask who is running.

pub mod pid;
pub mod scheduler;
pub mod task;

use crate::lib::error::KernelError;
use crate::mm;
use task::{Pid, SchedPolicy, Task};

pub use task::{ProcessState, KERNEL_STACK_SIZE, MAX_OPEN_FILES};

/// PID of the init task, created synchronously at boot (§4.H, §4.L step 10).
pub const INIT_PID: Pid = 1;

/// Carve a fresh kernel stack for a new task out of the region heap. Returns
/// the top of the stack (the address a new process's `esp` should start at),
/// since the stack grows down.
fn alloc_kernel_stack() -> Result<u32, KernelError> {
    let base = mm::kmalloc(KERNEL_STACK_SIZE).ok_or(KernelError::OutOfMemory)?;
    Ok(base as u32 + KERNEL_STACK_SIZE as u32)
}

/// Allocate a PID, build its PCB, and register it with the scheduler (§4.H
/// `create_process`). `ppid` is the parent's PID (0 for the init task, which
/// has no parent).
pub fn create_process(
    ppid: Pid,
    name: &str,
    policy: SchedPolicy,
    nice: i8,
) -> Result<Pid, KernelError> {
    let stack_top = alloc_kernel_stack()?;
    let pid = pid::allocate(|pid| Task::new(pid, ppid, name, stack_top, policy, nice))?;
    scheduler::register(pid, policy, nice);
    Ok(pid)
}

/// The PID the scheduler currently has running.
pub fn current_pid() -> Pid {
    scheduler::current_pid()
}

/// `exit(code)` (§4.H, §6 syscall 1): record the exit code, mark the caller
/// TERMINATED, drop it from the runqueue, and schedule away. Never returns --
/// a terminated task's kernel stack is about to be reclaimed by whoever
/// reaps it via `wait`.
pub fn exit(code: i32) -> ! {
    let pid = current_pid();
    pid::with_task_mut(pid, |t| {
        t.exit_code = code;
        t.state = ProcessState::Terminated;
    });
    scheduler::unregister(pid);
    scheduler::schedule();
    unreachable!("process::exit: scheduled back into a terminated task");
}

/// Reap the first terminated child of `parent`, if any (backs the `wait`
/// syscall). Returns `NotFound` if `parent` has no terminated children right
/// now; the syscall layer maps that straight onto `ENOENT` per §4.J. Frees
/// the reaped child's kernel stack -- the one resource `exit` itself leaves
/// behind, since a task still needs a stack to keep running on up to the
/// point the scheduler switches away from it.
pub fn reap_child(parent: Pid) -> Result<(Pid, i32), KernelError> {
    for candidate in 1..=(pid::MAX_PROCESSES as Pid) {
        let hit = pid::with_task(candidate, |t| {
            t.ppid == parent && t.state == ProcessState::Terminated
        });
        if hit == Some(true) {
            let code = pid::with_task(candidate, |t| t.exit_code).unwrap_or(0);
            let stack_top = pid::with_task(candidate, |t| t.kernel_stack_top).unwrap_or(0);
            pid::remove(candidate);
            if stack_top != 0 {
                unsafe {
                    mm::kfree((stack_top - KERNEL_STACK_SIZE as u32) as *mut u8);
                }
            }
            return Ok((candidate, code));
        }
    }
    Err(KernelError::NotFound)
}

/// Duplicate the calling task (§4.H, §6 syscall 2). This core has no
/// per-process address space (Non-goal: user-mode separation beyond ring
/// transitions, no copy-on-write) -- every task already shares the one flat
/// mapping -- so "duplicating" a task means giving it its own kernel stack
/// and copying the parent's live stack contents onto it, then relocating the
/// saved context to point into the copy. The child's first return from this
/// trap sees 0; the parent sees the child's PID.
pub fn fork(trapframe: *mut crate::arch::x86::TrapFrame) -> Result<Pid, KernelError> {
    let parent = current_pid();
    let (ppid, parent_stack_top, policy, nice) = pid::with_task(parent, |t| {
        (t.ppid, t.kernel_stack_top, t.policy, t.nice)
    })
    .ok_or(KernelError::NotFound)?;
    let _ = ppid;

    let child = create_process(parent, "forked", policy, nice)?;
    let child_stack_top = pid::with_task(child, |t| t.kernel_stack_top).unwrap();

    let offset = child_stack_top as i64 - parent_stack_top as i64;
    unsafe {
        let parent_base = (parent_stack_top - KERNEL_STACK_SIZE as u32) as *const u8;
        let child_base = (child_stack_top - KERNEL_STACK_SIZE as u32) as *mut u8;
        core::ptr::copy_nonoverlapping(parent_base, child_base, KERNEL_STACK_SIZE);
    }

    let parent_ctx = pid::with_task(parent, |t| t.context).unwrap();
    pid::with_task_mut(child, |t| {
        t.context = parent_ctx;
        t.context.esp = (t.context.esp as i64 + offset) as u32;
        t.context.ebp = (t.context.ebp as i64 + offset) as u32;
    });

    if !trapframe.is_null() {
        let child_frame = ((trapframe as i64) + offset) as *mut crate::arch::x86::TrapFrame;
        unsafe { (*child_frame).set_return_value(0) };
    }

    Ok(child)
}

/// Create the init task (§4.L step 10). Its kernel stack is sized
/// `KERNEL_STACK_SIZE` per §6's stable constants; it has no parent.
pub fn init() -> Pid {
    let pid = create_process(0, "init", SchedPolicy::Normal, 0)
        .expect("process: failed to create the init task (pid 1)");
    debug_assert_eq!(pid, INIT_PID);
    pid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_process_assigns_pid_and_registers_with_scheduler() {
        let before = scheduler::nr_running();
        let pid = create_process(0, "t", SchedPolicy::Normal, 0).unwrap();
        assert!(pid >= 1);
        assert_eq!(scheduler::nr_running(), before + 1);
        scheduler::unregister(pid);
        pid::remove(pid);
    }

    #[test]
    fn reap_child_finds_terminated_child() {
        let parent = current_pid();
        let child = create_process(parent, "c", SchedPolicy::Normal, 0).unwrap();
        pid::with_task_mut(child, |t| t.state = ProcessState::Terminated);
        scheduler::unregister(child);
        let (reaped, _code) = reap_child(parent).unwrap();
        assert_eq!(reaped, child);
        assert!(pid::with_task(child, |_| ()).is_none());
    }

    #[test]
    fn reap_child_reports_not_found_with_no_terminated_children() {
        let parent = current_pid();
        assert_eq!(reap_child(parent).unwrap_err(), KernelError::NotFound);
    }
}
