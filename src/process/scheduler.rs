//! Priority-array scheduler (§4.G): an O(1)-selection runqueue with two
//! priority-indexed arrays, "active" and "expired", that trade places once
//! the active array drains. This file owns the live [`SchedEntity`] for
//! every runnable task -- the authoritative scheduling state is the
//! runqueue's, not the `Task`'s (§9 "Global mutable state" redesign note).

use super::pid;
use super::task::{Pid, SchedEntity, SchedPolicy};
use spin::Mutex;

/// Priority range (§4.G): 0..MAX_PRIO, bottom `MAX_RT_PRIO` reserved for
/// real-time policies.
pub const MAX_PRIO: u8 = 140;
pub const MAX_RT_PRIO: u8 = 100;
/// Nice 0 maps here.
pub const DEFAULT_PRIO: u8 = 120;

pub const NICE_MIN: i8 = -20;
pub const NICE_MAX: i8 = 19;

const BASE_TIMESLICE: u32 = 10; // ticks; 100ms at 100Hz
const MIN_TIMESLICE: u32 = 2;
const MAX_TIMESLICE: u32 = 2 * BASE_TIMESLICE;
const RT_TIMESLICE: u32 = MAX_TIMESLICE;

/// Idle task's fixed PID (§4.G "Idle"), reserved outside the process table.
pub const IDLE_PID: Pid = 0;

/// Map a nice value in [`NICE_MIN`, `NICE_MAX`] to a static priority in the
/// fair band [`MAX_RT_PRIO`, `MAX_PRIO` - 1].
pub fn nice_to_priority(nice: i8) -> u8 {
    let nice = nice.clamp(NICE_MIN, NICE_MAX);
    (DEFAULT_PRIO as i32 + nice as i32) as u8
}

/// Load weight derived from nice (§3 "Schedulable entity"): `n <= 0` maps
/// to `(2^20) >> (-n)`, `n > 0` maps to `1024 >> n`. Taken literally from
/// the spec; large positive nice values degenerate to a weight of 0 the
/// same way the source formula does.
pub fn nice_to_weight(nice: i8) -> u32 {
    if nice <= 0 {
        (1u32 << 20) >> (-nice as u32)
    } else {
        1024u32.checked_shr(nice as u32).unwrap_or(0)
    }
}

fn inverse_weight(weight: u32) -> u32 {
    if weight == 0 {
        u32::MAX
    } else {
        u32::MAX / weight
    }
}

/// Time slice derived from static priority (§4.G "Time slice"): RT tasks
/// get a fixed slice; fair-band tasks scale linearly around
/// [`DEFAULT_PRIO`], up to `2 * BASE_TIMESLICE` at the top of the band and
/// down to [`MIN_TIMESLICE`] at the bottom.
pub fn timeslice_for_priority(prio: u8) -> u32 {
    if prio < MAX_RT_PRIO {
        return RT_TIMESLICE;
    }
    if prio <= DEFAULT_PRIO {
        let span = (DEFAULT_PRIO - MAX_RT_PRIO) as u32;
        let delta = (DEFAULT_PRIO - prio) as u32;
        (BASE_TIMESLICE + delta * BASE_TIMESLICE / span.max(1)).min(MAX_TIMESLICE)
    } else {
        let span = (MAX_PRIO - 1 - DEFAULT_PRIO) as u32;
        let delta = (prio - DEFAULT_PRIO) as u32;
        BASE_TIMESLICE.saturating_sub(delta * BASE_TIMESLICE / span.max(1)).max(MIN_TIMESLICE)
    }
}

const PRIO_BITS: usize = MAX_PRIO as usize;
const BITMAP_WORDS: usize = (PRIO_BITS + 63) / 64;

#[derive(Clone, Copy)]
struct PrioBitmap([u64; BITMAP_WORDS]);

impl PrioBitmap {
    const fn new() -> Self {
        PrioBitmap([0; BITMAP_WORDS])
    }

    fn set(&mut self, prio: u8) {
        let p = prio as usize;
        self.0[p / 64] |= 1 << (p % 64);
    }

    fn clear(&mut self, prio: u8) {
        let p = prio as usize;
        self.0[p / 64] &= !(1 << (p % 64));
    }

    fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Lowest set bit across the whole bitmap -- the highest-priority
    /// non-empty queue.
    fn first_set(&self) -> Option<u8> {
        for (i, word) in self.0.iter().enumerate() {
            if *word != 0 {
                return Some((i * 64 + word.trailing_zeros() as usize) as u8);
            }
        }
        None
    }
}

/// One of the runqueue's two priority-indexed queue tables (§3 "Runqueue").
struct PriorityArray {
    heads: [Option<Pid>; PRIO_BITS],
    tails: [Option<Pid>; PRIO_BITS],
    bitmap: PrioBitmap,
    nr_queued: u32,
}

impl PriorityArray {
    const fn new() -> Self {
        PriorityArray {
            heads: [None; PRIO_BITS],
            tails: [None; PRIO_BITS],
            bitmap: PrioBitmap::new(),
            nr_queued: 0,
        }
    }

    fn push(&mut self, entities: &mut Entities, pid: Pid, prio: u8, at_head: bool) {
        entities.get_mut(pid).run_list = None;
        let p = prio as usize;
        match (self.heads[p], at_head) {
            (None, _) => {
                self.heads[p] = Some(pid);
                self.tails[p] = Some(pid);
            }
            (Some(head), true) => {
                entities.get_mut(pid).run_list = Some(head);
                self.heads[p] = Some(pid);
            }
            (Some(_), false) => {
                let tail = self.tails[p].expect("tail set whenever head is");
                entities.get_mut(tail).run_list = Some(pid);
                self.tails[p] = Some(pid);
            }
        }
        self.bitmap.set(prio);
        self.nr_queued += 1;
    }

    /// Pop the head of the given priority's queue.
    fn pop_head(&mut self, entities: &mut Entities, prio: u8) -> Option<Pid> {
        let p = prio as usize;
        let pid = self.heads[p]?;
        let next = entities.get(pid).run_list;
        self.heads[p] = next;
        if next.is_none() {
            self.tails[p] = None;
            self.bitmap.clear(prio);
        }
        self.nr_queued -= 1;
        Some(pid)
    }

    /// Remove an arbitrary task from wherever it sits in `prio`'s queue.
    /// O(queue length); queues are bounded by `MAX_PROCESSES`.
    fn remove(&mut self, entities: &mut Entities, pid: Pid, prio: u8) {
        let p = prio as usize;
        if self.heads[p] == Some(pid) {
            self.pop_head(entities, prio);
            return;
        }
        let mut cursor = self.heads[p];
        while let Some(cur) = cursor {
            let next = entities.get(cur).run_list;
            if next == Some(pid) {
                let after = entities.get(pid).run_list;
                entities.get_mut(cur).run_list = after;
                if self.tails[p] == Some(pid) {
                    self.tails[p] = Some(cur);
                }
                self.nr_queued -= 1;
                return;
            }
            cursor = next;
        }
    }

    fn highest_priority(&self) -> Option<u8> {
        self.bitmap.first_set()
    }
}

/// Per-pid entity storage, indexed the same way as the process table
/// (`pid - 1`), plus a reserved slot for the idle task.
struct Entities {
    table: [SchedEntity; pid::MAX_PROCESSES],
    idle: SchedEntity,
}

impl Entities {
    const fn new() -> Self {
        Entities {
            table: [SchedEntity::new(SchedPolicy::Normal, DEFAULT_PRIO); pid::MAX_PROCESSES],
            idle: SchedEntity::new(SchedPolicy::Idle, MAX_PRIO - 1),
        }
    }

    fn get(&self, pid: Pid) -> &SchedEntity {
        if pid == IDLE_PID {
            &self.idle
        } else {
            &self.table[(pid - 1) as usize]
        }
    }

    fn get_mut(&mut self, pid: Pid) -> &mut SchedEntity {
        if pid == IDLE_PID {
            &mut self.idle
        } else {
            &mut self.table[(pid - 1) as usize]
        }
    }
}

/// Three exponential moving averages of the runnable count, at ratios
/// 3/4, 15/16, 63/64 -- conceptually 1/5/15-minute load averages
/// (§4.G "Load tracking"). Fixed-point, scaled by 2^11 like the classic
/// Linux calc_load.
struct LoadAverages {
    avg: [u64; 3],
}

const LOAD_SCALE: u64 = 1 << 11;
const LOAD_RATIOS_NUM: [u64; 3] = [3, 15, 63];
const LOAD_RATIOS_DEN: [u64; 3] = [4, 16, 64];

impl LoadAverages {
    const fn new() -> Self {
        LoadAverages { avg: [0; 3] }
    }

    fn update(&mut self, runnable: u32) {
        let active = (runnable as u64) * LOAD_SCALE;
        for i in 0..3 {
            let ratio_num = LOAD_RATIOS_NUM[i];
            let ratio_den = LOAD_RATIOS_DEN[i];
            self.avg[i] = (self.avg[i] * ratio_num + active * (ratio_den - ratio_num)) / ratio_den;
        }
    }
}

struct Runqueue {
    active: PriorityArray,
    expired: PriorityArray,
    entities: Entities,
    current: Pid,
    nr_running: u32,
    switch_count: u64,
    load: LoadAverages,
    last_swap_at_ticks: u64,
}

impl Runqueue {
    const fn new() -> Self {
        Runqueue {
            active: PriorityArray::new(),
            expired: PriorityArray::new(),
            entities: Entities::new(),
            current: IDLE_PID,
            nr_running: 0,
            switch_count: 0,
            load: LoadAverages::new(),
            last_swap_at_ticks: 0,
        }
    }

    fn enqueue(&mut self, pid: Pid, at_head: bool) {
        let prio = self.entities.get(pid).prio;
        if self.entities.get(pid).slice == 0 {
            let slice = timeslice_for_priority(prio);
            self.entities.get_mut(pid).slice = slice;
        }
        self.active.push(&mut self.entities, pid, prio, at_head);
        self.nr_running += 1;
    }

    fn dequeue(&mut self, pid: Pid, from_active: bool) {
        let prio = self.entities.get(pid).prio;
        if from_active {
            self.active.remove(&mut self.entities, pid, prio);
        } else {
            self.expired.remove(&mut self.entities, pid, prio);
        }
        self.nr_running = self.nr_running.saturating_sub(1);
    }

    /// Scan scheduling classes in order RT, fair, idle; within a class the
    /// lowest set bitmap bit (numerically highest priority) wins.
    fn pick_next(&mut self) -> Pid {
        if let Some(prio) = self.active.highest_priority() {
            if let Some(pid) = self.active.pop_head(&mut self.entities, prio) {
                return pid;
            }
        }
        IDLE_PID
    }

    /// Swap active and expired (§4.G "constant-time pointer swap"): in this
    /// arena-of-values design the two `PriorityArray`s are swapped by value
    /// rather than by repointing a pointer, which is the Rust-idiomatic
    /// equivalent the "ownership with typed handles" redesign note calls
    /// for -- still O(1) in the number of queued tasks, just not literally
    /// a pointer write.
    fn swap_arrays(&mut self) {
        core::mem::swap(&mut self.active, &mut self.expired);
    }
}

static RUNQUEUE: Mutex<Runqueue> = Mutex::new(Runqueue::new());

/// Register a freshly created task with the runqueue, deriving its
/// priority and weight from `nice`, and enqueue it ready to run.
pub fn register(pid: Pid, policy: SchedPolicy, nice: i8) {
    let prio = match policy {
        SchedPolicy::Idle => MAX_PRIO - 1,
        SchedPolicy::Fifo | SchedPolicy::RoundRobin => nice_to_priority(nice).min(MAX_RT_PRIO - 1),
        SchedPolicy::Normal | SchedPolicy::Batch => nice_to_priority(nice),
    };
    let weight = nice_to_weight(nice);
    let mut rq = RUNQUEUE.lock();
    let entity = rq.entities.get_mut(pid);
    *entity = SchedEntity::new(policy, prio);
    entity.weight = weight;
    entity.inv_weight = inverse_weight(weight);
    if pid != IDLE_PID {
        rq.enqueue(pid, false);
    }
}

/// Drop a terminated task's scheduling state. Must be called with the task
/// no longer linked into either array (i.e. after it has stopped running).
pub fn unregister(pid: Pid) {
    let mut rq = RUNQUEUE.lock();
    *rq.entities.get_mut(pid) = SchedEntity::new(SchedPolicy::Normal, DEFAULT_PRIO);
}

pub fn current_pid() -> Pid {
    RUNQUEUE.lock().current
}

/// Timer-tick entry point (§4.G "Tick"), called from the PIT IRQ handler at
/// `TIMER_FREQUENCY`. Decrements the current task's slice; on expiry,
/// requeues it (to `expired` unless it is real-time) and swaps the arrays
/// if `active` has drained. Always ends by invoking `schedule`.
pub fn tick() {
    let mut swapped = false;
    {
        let mut rq = RUNQUEUE.lock();
        let current = rq.current;
        pid::with_task_mut(current, |t| t.cpu_time_ticks += 1);

        let entity = rq.entities.get_mut(current);
        if entity.slice > 0 {
            entity.slice -= 1;
        }
        if entity.slice == 0 {
            let prio = entity.prio;
            let policy = entity.policy;
            entity.slice = timeslice_for_priority(prio);

            if current != IDLE_PID {
                match policy {
                    SchedPolicy::Fifo | SchedPolicy::RoundRobin => {
                        // Real-time tasks never expire to the secondary array.
                        rq.active.push(&mut rq.entities, current, prio, false);
                    }
                    _ => {
                        rq.expired.push(&mut rq.entities, current, prio, false);
                    }
                }
            }

            if rq.active.bitmap.is_empty() && !rq.expired.bitmap.is_empty() {
                rq.swap_arrays();
                rq.last_swap_at_ticks = crate::arch::x86::pit::ticks();
                swapped = true;
            }
        }
        rq.load.update(rq.nr_running);
    }
    if swapped {
        crate::debug!("scheduler: active/expired swap at tick {}", crate::arch::x86::pit::ticks());
    }
    schedule();
}

/// Pick the next task and switch to it if it differs from the current one
/// (§4.G "Schedule").
pub fn schedule() {
    let (prev_pid, next_pid, do_switch) = {
        let mut rq = RUNQUEUE.lock();
        let current = rq.current;
        let next = rq.pick_next();
        if next == current {
            // Nothing else runnable at this or a higher priority: put
            // current back at the head of its queue.
            if current != IDLE_PID {
                let prio = rq.entities.get(current).prio;
                rq.active.push(&mut rq.entities, current, prio, true);
            }
            (current, current, false)
        } else {
            rq.switch_count += 1;
            rq.current = next;
            (current, next, true)
        }
    };

    if !do_switch {
        return;
    }

    pid::with_task_mut(prev_pid, |t| {
        if t.state == super::task::ProcessState::Running {
            t.state = super::task::ProcessState::Ready;
        }
    });
    pid::with_task_mut(next_pid, |t| t.state = super::task::ProcessState::Running);

    switch_contexts(prev_pid, next_pid);
}

/// The idle task's saved context. It never enters the process table (it
/// has no PCB, no file table, no fork/exit lifecycle), so it needs
/// somewhere else to keep the callee-saved registers a context switch into
/// or out of it touches. A bare `static mut`, matching the IDT/GDT/TSS
/// statics in `arch::x86`: single-core, and only ever touched from
/// `schedule`, which runs with a consistent view of the runqueue lock
/// already held.
static mut IDLE_CONTEXT: crate::arch::x86::CpuContext = crate::arch::x86::CpuContext::new();

fn switch_contexts(prev_pid: Pid, next_pid: Pid) {
    let prev_ctx_ptr: *mut crate::arch::x86::CpuContext = match prev_pid {
        IDLE_PID => unsafe { core::ptr::addr_of_mut!(IDLE_CONTEXT) },
        _ => match pid::with_task_mut(prev_pid, |t| &mut t.context as *mut _) {
            Some(p) => p,
            None => return,
        },
    };
    let next_ctx = match next_pid {
        IDLE_PID => unsafe { IDLE_CONTEXT },
        _ => match pid::with_task(next_pid, |t| t.context) {
            Some(c) => c,
            None => return,
        },
    };
    unsafe {
        crate::arch::x86::switch_to(&mut *prev_ctx_ptr, &next_ctx);
    }
}

/// Voluntary yield (§4.G "Yield"): requeue at the tail of the current
/// priority, then schedule.
pub fn yield_now() {
    let pid = { RUNQUEUE.lock().current };
    if pid != IDLE_PID {
        let mut rq = RUNQUEUE.lock();
        let prio = rq.entities.get(pid).prio;
        rq.active.remove(&mut rq.entities, pid, prio);
        rq.active.push(&mut rq.entities, pid, prio, false);
    }
    schedule();
}

/// Mark the current task blocked and drop it from the runqueue without
/// requeueing it (§5 suspension points).
pub fn block_current() {
    let mut rq = RUNQUEUE.lock();
    let pid = rq.current;
    if pid != IDLE_PID {
        let prio = rq.entities.get(pid).prio;
        rq.active.remove(&mut rq.entities, pid, prio);
        rq.nr_running = rq.nr_running.saturating_sub(1);
    }
    drop(rq);
    pid::with_task_mut(pid, |t| t.state = super::task::ProcessState::Blocked);
    schedule();
}

/// Wake a blocked task: re-enqueue it at the head of its priority's active
/// queue so a just-unblocked task gets a chance to run promptly.
pub fn wake_process(pid: Pid) {
    pid::with_task_mut(pid, |t| t.state = super::task::ProcessState::Ready);
    let mut rq = RUNQUEUE.lock();
    rq.enqueue(pid, true);
}

pub fn load_averages() -> [u64; 3] {
    RUNQUEUE.lock().load.avg
}

pub fn nr_running() -> u32 {
    RUNQUEUE.lock().nr_running
}

pub fn switch_count() -> u64 {
    RUNQUEUE.lock().switch_count
}

/// Backs syscall 10 (`debug`, subcommand "scheduler"): a one-line snapshot
/// of runqueue occupancy for the log.
pub fn debug_dump() {
    let rq = RUNQUEUE.lock();
    crate::info!(
        "sched: current={} running={} switches={} active_queued={} expired_queued={}",
        rq.current,
        rq.nr_running,
        rq.switch_count,
        rq.active.nr_queued,
        rq.expired.nr_queued
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_zero_is_default_priority() {
        assert_eq!(nice_to_priority(0), DEFAULT_PRIO);
    }

    #[test]
    fn nice_extremes_stay_in_fair_band() {
        assert_eq!(nice_to_priority(NICE_MIN), MAX_RT_PRIO);
        assert_eq!(nice_to_priority(NICE_MAX), MAX_PRIO - 1);
    }

    #[test]
    fn weight_formula_matches_spec_examples() {
        assert_eq!(nice_to_weight(0), 1 << 20);
        assert_eq!(nice_to_weight(-20), (1 << 20) >> 20);
        assert_eq!(nice_to_weight(1), 1024 >> 1);
    }

    #[test]
    fn default_priority_gets_base_timeslice() {
        assert_eq!(timeslice_for_priority(DEFAULT_PRIO), BASE_TIMESLICE);
    }

    #[test]
    fn top_of_fair_band_gets_double_base() {
        assert_eq!(timeslice_for_priority(MAX_RT_PRIO), 2 * BASE_TIMESLICE);
    }

    #[test]
    fn bottom_of_fair_band_clamps_to_minimum() {
        assert_eq!(timeslice_for_priority(MAX_PRIO - 1), MIN_TIMESLICE);
    }

    #[test]
    fn priority_array_fifo_within_priority() {
        let mut entities = Entities::new();
        let mut arr = PriorityArray::new();
        arr.push(&mut entities, 1, DEFAULT_PRIO, false);
        arr.push(&mut entities, 2, DEFAULT_PRIO, false);
        arr.push(&mut entities, 3, DEFAULT_PRIO, false);
        assert_eq!(arr.pop_head(&mut entities, DEFAULT_PRIO), Some(1));
        assert_eq!(arr.pop_head(&mut entities, DEFAULT_PRIO), Some(2));
        assert_eq!(arr.pop_head(&mut entities, DEFAULT_PRIO), Some(3));
        assert!(arr.bitmap.is_empty());
    }

    #[test]
    fn bitmap_finds_lowest_numbered_priority_first() {
        let mut bm = PrioBitmap::new();
        bm.set(120);
        bm.set(50);
        bm.set(139);
        assert_eq!(bm.first_set(), Some(50));
    }
}
