//! Fixed process table and PID bitmap (§4.H).
//!
//! `MAX_PROCESSES` slots, one bit per slot. PID 0 is never handed out of
//! this table -- it belongs exclusively to the idle task (§4.G "Idle"),
//! which lives outside the fork/exit lifecycle entirely. That keeps "no
//! free slot" representable as a plain `None` from the bitmap scan without
//! colliding with a valid PID 0 (see the source's own find_free_pid
//! ambiguity, §9 design notes -- resolved here by reserving 0 up front).
//! Table slot `i` (0-indexed) holds PID `i + 1`.

use super::task::Task;
use crate::lib::error::KernelError;
use alloc::boxed::Box;
use spin::Mutex;

use super::task::Pid;

/// Stable constant (§6): the fixed process table width.
pub const MAX_PROCESSES: usize = 64;

struct PidTable {
    slots: [Option<Box<Task>>; MAX_PROCESSES],
    bitmap: u64,
    next_hint: usize,
}

impl PidTable {
    const fn new() -> Self {
        const NONE: Option<Box<Task>> = None;
        PidTable {
            slots: [NONE; MAX_PROCESSES],
            bitmap: 0,
            next_hint: 0,
        }
    }

    /// Linear scan for a clear bit, warm-started from the last allocation.
    fn find_free_slot(&self) -> Option<usize> {
        for offset in 0..MAX_PROCESSES {
            let idx = (self.next_hint + offset) % MAX_PROCESSES;
            if self.bitmap & (1u64 << idx) == 0 {
                return Some(idx);
            }
        }
        None
    }

    fn insert(&mut self, idx: usize, task: Task) -> Pid {
        self.bitmap |= 1u64 << idx;
        self.next_hint = (idx + 1) % MAX_PROCESSES;
        self.slots[idx] = Some(Box::new(task));
        (idx + 1) as Pid
    }

    fn remove(&mut self, pid: Pid) -> Option<Box<Task>> {
        let idx = pid.checked_sub(1)? as usize;
        if idx >= MAX_PROCESSES {
            return None;
        }
        self.bitmap &= !(1u64 << idx);
        self.slots[idx].take()
    }

    fn get(&self, pid: Pid) -> Option<&Task> {
        let idx = pid.checked_sub(1)? as usize;
        self.slots.get(idx)?.as_deref()
    }

    fn get_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        let idx = pid.checked_sub(1)? as usize;
        self.slots.get_mut(idx)?.as_mut().map(|b| b.as_mut())
    }

    fn count(&self) -> u32 {
        self.bitmap.count_ones()
    }
}

static TABLE: Mutex<PidTable> = Mutex::new(PidTable::new());

/// Allocate a slot and install a task built by `build` (given its freshly
/// assigned PID). Returns `NotFound` when all `MAX_PROCESSES` slots are in
/// use.
pub fn allocate(build: impl FnOnce(Pid) -> Task) -> Result<Pid, KernelError> {
    let mut t = TABLE.lock();
    let idx = t.find_free_slot().ok_or(KernelError::NotFound)?;
    let pid = (idx + 1) as Pid;
    let task = build(pid);
    Ok(t.insert(idx, task))
}

pub fn remove(pid: Pid) -> Option<Box<Task>> {
    TABLE.lock().remove(pid)
}

pub fn with_task<R>(pid: Pid, f: impl FnOnce(&Task) -> R) -> Option<R> {
    TABLE.lock().get(pid).map(f)
}

pub fn with_task_mut<R>(pid: Pid, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
    TABLE.lock().get_mut(pid).map(f)
}

pub fn process_count() -> u32 {
    TABLE.lock().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::task::SchedPolicy;

    fn dummy(pid: Pid) -> Task {
        Task::new(pid, 0, "t", 0, SchedPolicy::Normal, 0)
    }

    #[test]
    fn allocate_assigns_distinct_slots() {
        let a = allocate(dummy).unwrap();
        let b = allocate(dummy).unwrap();
        assert_ne!(a, b);
        assert!(a >= 1 && b >= 1);
        remove(a);
        remove(b);
    }

    #[test]
    fn remove_frees_the_slot_for_reuse() {
        let a = allocate(dummy).unwrap();
        remove(a).unwrap();
        let b = allocate(dummy).unwrap();
        assert_eq!(a, b);
        remove(b);
    }

    #[test]
    fn table_exhaustion_is_not_found() {
        let mut allocated = alloc::vec::Vec::new();
        for _ in 0..MAX_PROCESSES {
            allocated.push(allocate(dummy).unwrap());
        }
        assert_eq!(allocate(dummy).unwrap_err(), KernelError::NotFound);
        for pid in allocated {
            remove(pid);
        }
    }
}
