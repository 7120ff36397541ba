//! Process-control block (§3 "Process", "Schedulable entity").
//!
//! A [`Task`] bundles the two halves the spec calls out separately: the
//! process proper (identity, state, stacks, file table) and the
//! schedulable entity attached to it (policy, priority, slice, weight).
//! They are one struct here because nothing in this kernel ever schedules
//! without a process behind it -- unlike a thread-group design, there is no
//! case where the two halves have independent lifetimes.

use crate::arch::x86::CpuContext;
use heapless::String as FixedString;

pub type Pid = u32;

/// Fixed-size file-descriptor table width (§6 stable constants).
pub const MAX_OPEN_FILES: usize = 16;

/// Kernel stack size per task (§6 stable constants).
pub const KERNEL_STACK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// Scheduling policy (§4.G). `Fifo` and `RoundRobin` are the real-time
/// policies reserved the bottom `MAX_RT_PRIO` priorities; `Normal` and
/// `Batch` share the fair band; `Idle` is reserved for pid 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    Normal,
    Batch,
    Idle,
    Fifo,
    RoundRobin,
}

/// A slot in a file-descriptor table. The core has no VFS (out of scope,
/// §9 "Unused plumbing"); a descriptor only records that the slot is
/// occupied and by what raw fd number a future VFS layer would resolve.
#[derive(Debug, Clone, Copy)]
pub struct FileDescriptor {
    pub raw: u32,
}

/// Attached to every process (§3 "Schedulable entity"), but the live copy
/// used for scheduling decisions is owned by the runqueue
/// ([`super::scheduler`]), not by the `Task` itself -- matching the
/// "reify module-level state as a value owned by an explicit kernel
/// singleton" redesign note. `Task` keeps only the identity-level inputs
/// (`policy`, `nice`) the entity is derived from; see
/// [`super::scheduler::register`]. `run_list` is the intrusive
/// singly-linked-list index the runqueue threads through these entities:
/// rather than a raw "next" pointer through process memory, it is the PID
/// of the next task in whichever priority queue this one currently sits
/// in, or `None` at the tail.
#[derive(Debug, Clone, Copy)]
pub struct SchedEntity {
    pub policy: SchedPolicy,
    pub static_prio: u8,
    pub prio: u8,
    pub slice: u32,
    pub weight: u32,
    pub inv_weight: u32,
    pub run_list: Option<Pid>,
}

impl SchedEntity {
    pub const fn new(policy: SchedPolicy, prio: u8) -> Self {
        SchedEntity {
            policy,
            static_prio: prio,
            prio,
            slice: 0,
            weight: 0,
            inv_weight: 0,
            run_list: None,
        }
    }
}

/// A process-control block (§3 "Process").
pub struct Task {
    pub pid: Pid,
    pub ppid: Pid,
    pub state: ProcessState,
    pub context: CpuContext,
    pub kernel_stack_top: u32,
    pub user_stack_top: u32,
    pub exit_code: i32,
    pub created_at_us: u64,
    pub cpu_time_ticks: u64,
    pub fds: [Option<FileDescriptor>; MAX_OPEN_FILES],
    pub cwd: FixedString<64>,
    pub name: FixedString<32>,
    pub policy: SchedPolicy,
    pub nice: i8,
}

impl Task {
    pub fn new(pid: Pid, ppid: Pid, name: &str, kernel_stack_top: u32, policy: SchedPolicy, nice: i8) -> Self {
        let mut fixed_name = FixedString::new();
        let _ = fixed_name.push_str(name);
        let mut cwd = FixedString::new();
        let _ = cwd.push_str("/");
        Task {
            pid,
            ppid,
            state: ProcessState::Ready,
            context: CpuContext::new(),
            kernel_stack_top,
            user_stack_top: 0,
            exit_code: 0,
            created_at_us: crate::time::monotonic_us(),
            cpu_time_ticks: 0,
            fds: [None; MAX_OPEN_FILES],
            cwd,
            name: fixed_name,
            policy,
            nice,
        }
    }
}
