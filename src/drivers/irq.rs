//! IRQ descriptor model (§4.F): one descriptor per interrupt line, layered
//! above the raw vector dispatch in `arch::x86::idt`. A line's low-level
//! controller (the "chip") and its flow-control policy (edge/level/simple/
//! per-CPU) are both swappable per line; drivers see only `request_irq` and
//! the enable/disable/mask/unmask/ack/eoi surface.

use crate::lib::error::KernelError;
use spin::Mutex;

/// Number of addressable interrupt lines -- sized to the full vector space
/// so every IDT entry (faults, hardware IRQs, the syscall gate) can carry a
/// descriptor, even though only vectors 32..47 are chip-backed hardware
/// lines.
pub const NR_IRQS: usize = 256;

/// Low-level interrupt-controller operations. Any operation may be a no-op;
/// only `mask`/`unmask`/`eoi` are exercised by the reference flow policies,
/// the rest exist for drivers that need them (set_type for level/edge
/// reconfiguration, set_affinity once SMP exists, retrigger for software
/// re-raise, set_wake for suspend/resume).
pub trait Chip: Send + Sync {
    fn name(&self) -> &'static str;
    fn startup(&self, _line: u32) -> bool {
        self.unmask_raw(_line);
        true
    }
    fn shutdown(&self, line: u32) {
        self.mask_raw(line)
    }
    fn mask_raw(&self, _line: u32) {}
    fn unmask_raw(&self, _line: u32) {}
    fn ack(&self, _line: u32) {}
    fn eoi(&self, _line: u32) {}
    fn set_type(&self, _line: u32, _edge: bool) -> Result<(), KernelError> {
        Ok(())
    }
    fn set_affinity(&self, _line: u32, _cpu_mask: u32) -> Result<(), KernelError> {
        Ok(())
    }
    fn retrigger(&self, _line: u32) -> bool {
        false
    }
    fn set_wake(&self, _line: u32, _on: bool) -> Result<(), KernelError> {
        Ok(())
    }
    /// True if the last interrupt on `line` was a controller glitch rather
    /// than a real device assertion (the 8259A's ISR-register check on IRQ7
    /// and IRQ15 is the reference case). Chips with no such concept never
    /// report spurious lines.
    fn is_spurious(&self, _line: u32) -> bool {
        false
    }
}

/// Selects the mask/ack/eoi choreography run around a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPolicy {
    /// Ack immediately, unmask, run the handler, then EOI. A pulse that
    /// arrives while the handler is running is recorded as pending rather
    /// than re-entering the handler.
    Edge,
    /// Mask first (preventing re-entry on the same line), ack, run the
    /// handler, EOI, then unmask.
    Level,
    /// Run the handler and nothing else; the handler manages its own
    /// ack/eoi/mask lifecycle.
    Simple,
    /// Run the handler, then EOI; never masked or unmasked around it.
    PerCpu,
}

pub type Handler = fn(line: u32, data: usize);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u32 {
        /// Multiple handlers may share this line; `request_irq` does not
        /// fail with Busy when a handler is already installed.
        const SHARED = 1 << 0;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Status: u32 {
        const DISABLED  = 1 << 0;
        const IN_PROGRESS = 1 << 1;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IrqStats {
    pub total: u64,
    pub spurious: u64,
    pub unhandled: u64,
    pub retriggered: u64,
    pub missed: u64,
}

pub struct IrqDesc {
    status: Status,
    depth: u32,
    chip: Option<&'static dyn Chip>,
    chip_data: usize,
    flow: FlowPolicy,
    handler: Option<Handler>,
    handler_data: usize,
    flags: IrqFlags,
    name: Option<&'static str>,
    pending: u32,
    stats: IrqStats,
}

impl IrqDesc {
    const fn new() -> Self {
        IrqDesc {
            status: Status::DISABLED,
            depth: 1,
            chip: None,
            chip_data: 0,
            flow: FlowPolicy::Simple,
            handler: None,
            handler_data: 0,
            flags: IrqFlags::empty(),
            name: None,
            pending: 0,
            stats: IrqStats {
                total: 0,
                spurious: 0,
                unhandled: 0,
                retriggered: 0,
                missed: 0,
            },
        }
    }

    pub fn stats(&self) -> IrqStats {
        self.stats
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_disabled(&self) -> bool {
        self.status.contains(Status::DISABLED)
    }
}

struct IrqTable([IrqDesc; NR_IRQS]);

static TABLE: Mutex<IrqTable> = Mutex::new(IrqTable([IrqDesc::new(); NR_IRQS]));

// `IrqDesc` holds only Copy scalars and a `&'static dyn Chip`, so the array
// literal above requires `IrqDesc: Copy`.
impl Clone for IrqDesc {
    fn clone(&self) -> Self {
        *self
    }
}
impl Copy for IrqDesc {}

pub fn set_chip(line: u32, chip: &'static dyn Chip) {
    TABLE.lock().0[line as usize].chip = Some(chip);
}

pub fn set_chip_data(line: u32, data: usize) {
    TABLE.lock().0[line as usize].chip_data = data;
}

pub fn set_flow_handler(line: u32, flow: FlowPolicy) {
    TABLE.lock().0[line as usize].flow = flow;
}

pub fn set_handler_data(line: u32, data: usize) {
    TABLE.lock().0[line as usize].handler_data = data;
}

/// Atomically install `handler` on `line` and, if the line currently has a
/// nonzero disable depth, re-enable it (startup). Fails with `Busy` if the
/// line already has a handler and `SHARED` is not requested.
pub fn request_irq(
    line: u32,
    handler: Handler,
    flags: IrqFlags,
    name: &'static str,
    data: usize,
) -> Result<(), KernelError> {
    let mut t = TABLE.lock();
    let desc = &mut t.0[line as usize];
    if desc.handler.is_some() && !flags.contains(IrqFlags::SHARED) {
        return Err(KernelError::Busy);
    }
    desc.handler = Some(handler);
    desc.handler_data = data;
    desc.flags = flags;
    desc.name = Some(name);
    if desc.depth > 0 {
        desc.depth = 0;
        desc.status.remove(Status::DISABLED);
        if let Some(chip) = desc.chip {
            chip.startup(line);
        }
    }
    Ok(())
}

pub fn free_irq(line: u32, _data: usize) {
    let mut t = TABLE.lock();
    let desc = &mut t.0[line as usize];
    desc.handler = None;
    disable_locked(desc, line);
}

fn disable_locked(desc: &mut IrqDesc, line: u32) {
    let was_zero = desc.depth == 0;
    desc.depth += 1;
    if was_zero {
        desc.status.insert(Status::DISABLED);
        if let Some(chip) = desc.chip {
            chip.mask_raw(line);
        }
    }
}

/// Nested disable: increments the depth counter, masking the line only on
/// the 0->1 edge.
pub fn disable(line: u32) {
    let mut t = TABLE.lock();
    let desc = &mut t.0[line as usize];
    disable_locked(desc, line);
}

/// Nested enable: decrements the depth counter, unmasking only on the 1->0
/// edge. Enabling a line that was never disabled is a no-op.
pub fn enable(line: u32) {
    let mut t = TABLE.lock();
    let desc = &mut t.0[line as usize];
    if desc.depth == 0 {
        return;
    }
    desc.depth -= 1;
    if desc.depth == 0 {
        desc.status.remove(Status::DISABLED);
        if let Some(chip) = desc.chip {
            chip.unmask_raw(line);
        }
    }
}

pub fn mask(line: u32) {
    let t = TABLE.lock();
    if let Some(chip) = t.0[line as usize].chip {
        chip.mask_raw(line);
    }
}

pub fn unmask(line: u32) {
    let t = TABLE.lock();
    if let Some(chip) = t.0[line as usize].chip {
        chip.unmask_raw(line);
    }
}

pub fn ack(line: u32) {
    let t = TABLE.lock();
    if let Some(chip) = t.0[line as usize].chip {
        chip.ack(line);
    }
}

pub fn eoi(line: u32) {
    let t = TABLE.lock();
    if let Some(chip) = t.0[line as usize].chip {
        chip.eoi(line);
    }
}

pub fn stats(line: u32) -> IrqStats {
    TABLE.lock().0[line as usize].stats()
}

/// Entry point called by `arch::x86::idt`'s common handler for hardware IRQ
/// vectors. Runs the line's flow policy around its registered handler.
pub fn dispatch(line: u32) {
    let mut t = TABLE.lock();
    let desc = &mut t.0[line as usize];
    desc.stats.total += 1;

    let handler = match desc.handler {
        Some(h) => h,
        None => {
            if desc.chip.map(|c| c.is_spurious(line)).unwrap_or(false) {
                desc.stats.spurious += 1;
            } else {
                desc.stats.unhandled += 1;
            }
            if let Some(chip) = desc.chip {
                chip.eoi(line);
            }
            #[cfg(feature = "irq-verbose")]
            log_stats(line, &desc.stats);
            return;
        }
    };

    // A handler is registered but the line is currently disabled (nested
    // depth > 0) -- the chip should have masked it, so this vector firing
    // anyway means the interrupt could not be serviced this time around.
    if desc.is_disabled() {
        desc.stats.missed += 1;
        if let Some(chip) = desc.chip {
            chip.eoi(line);
        }
        #[cfg(feature = "irq-verbose")]
        log_stats(line, &desc.stats);
        return;
    }

    if desc.status.contains(Status::IN_PROGRESS) {
        desc.pending += 1;
        desc.stats.retriggered += 1;
        #[cfg(feature = "irq-verbose")]
        log_stats(line, &desc.stats);
        return;
    }

    let data = desc.handler_data;
    let chip = desc.chip;
    match desc.flow {
        FlowPolicy::Edge => {
            if let Some(c) = chip {
                c.ack(line);
            }
            desc.status.remove(Status::DISABLED);
            if let Some(c) = chip {
                c.unmask_raw(line);
            }
            desc.status.insert(Status::IN_PROGRESS);
            drop(t);
            handler(line, data);
            let mut t = TABLE.lock();
            let desc = &mut t.0[line as usize];
            desc.status.remove(Status::IN_PROGRESS);
            if let Some(c) = desc.chip {
                c.eoi(line);
            }
        }
        FlowPolicy::Level => {
            if let Some(c) = chip {
                c.mask_raw(line);
                c.ack(line);
            }
            desc.status.insert(Status::IN_PROGRESS);
            drop(t);
            handler(line, data);
            let mut t = TABLE.lock();
            let desc = &mut t.0[line as usize];
            desc.status.remove(Status::IN_PROGRESS);
            if let Some(c) = desc.chip {
                c.eoi(line);
                c.unmask_raw(line);
            }
        }
        FlowPolicy::Simple => {
            drop(t);
            handler(line, data);
        }
        FlowPolicy::PerCpu => {
            drop(t);
            handler(line, data);
            let t = TABLE.lock();
            if let Some(c) = t.0[line as usize].chip {
                c.eoi(line);
            }
        }
    }

    #[cfg(feature = "irq-verbose")]
    log_stats(line, &stats(line));
}

/// Per-line statistics logging (Cargo feature `irq-verbose`): a trace line
/// per dispatch. Compiled out entirely by default given how hot this path
/// is on a live timer line.
#[cfg(feature = "irq-verbose")]
fn log_stats(line: u32, stats: &IrqStats) {
    crate::trace!(
        "irq: line={} total={} spurious={} unhandled={} retriggered={} missed={}",
        line,
        stats.total,
        stats.spurious,
        stats.unhandled,
        stats.retriggered,
        stats.missed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct FakeChip {
        masked: AtomicUsize,
        acked: AtomicUsize,
        eoied: AtomicUsize,
    }
    impl Chip for FakeChip {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn mask_raw(&self, _line: u32) {
            self.masked.fetch_add(1, Ordering::SeqCst);
        }
        fn unmask_raw(&self, _line: u32) {
            self.masked.fetch_sub(1, Ordering::SeqCst);
        }
        fn ack(&self, _line: u32) {
            self.acked.fetch_add(1, Ordering::SeqCst);
        }
        fn eoi(&self, _line: u32) {
            self.eoied.fetch_add(1, Ordering::SeqCst);
        }
    }
    static FAKE: FakeChip = FakeChip {
        masked: AtomicUsize::new(0),
        acked: AtomicUsize::new(0),
        eoied: AtomicUsize::new(0),
    };
    static HIT: AtomicUsize = AtomicUsize::new(0);
    fn record(_line: u32, _data: usize) {
        HIT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn enable_disable_symmetry() {
        let line = 200;
        set_chip(line, &FAKE);
        disable(line);
        disable(line);
        disable(line);
        enable(line);
        assert_eq!(TABLE.lock().0[line as usize].depth(), 2);
        enable(line);
        assert_eq!(TABLE.lock().0[line as usize].depth(), 1);
        enable(line);
        assert_eq!(TABLE.lock().0[line as usize].depth(), 0);
        assert!(!TABLE.lock().0[line as usize].is_disabled());
    }

    #[test]
    fn request_irq_rejects_without_shared() {
        let line = 201;
        request_irq(line, record, IrqFlags::empty(), "a", 0).unwrap();
        let err = request_irq(line, record, IrqFlags::empty(), "b", 0).unwrap_err();
        assert_eq!(err, KernelError::Busy);
    }

    #[test]
    fn unhandled_line_bumps_counter() {
        let line = 202;
        let before = stats(line).unhandled;
        dispatch(line);
        assert_eq!(stats(line).unhandled, before + 1);
    }

    #[test]
    fn level_policy_masks_during_handler() {
        let line = 203;
        set_chip(line, &FAKE);
        set_flow_handler(line, FlowPolicy::Level);
        request_irq(line, record, IrqFlags::empty(), "level", 0).unwrap();
        let before = HIT.load(Ordering::SeqCst);
        dispatch(line);
        assert_eq!(HIT.load(Ordering::SeqCst), before + 1);
        assert!(!TABLE.lock().0[line as usize]
            .status
            .contains(Status::IN_PROGRESS));
    }

    struct SpuriousChip;
    impl Chip for SpuriousChip {
        fn name(&self) -> &'static str {
            "spurious-fake"
        }
        fn is_spurious(&self, _line: u32) -> bool {
            true
        }
    }
    static SPURIOUS: SpuriousChip = SpuriousChip;

    #[test]
    fn unhandled_line_reported_spurious_by_its_chip_bumps_spurious_not_unhandled() {
        let line = 204;
        set_chip(line, &SPURIOUS);
        let before = stats(line);
        dispatch(line);
        let after = stats(line);
        assert_eq!(after.spurious, before.spurious + 1);
        assert_eq!(after.unhandled, before.unhandled);
    }

    #[test]
    fn disabled_line_with_handler_bumps_missed_not_unhandled() {
        let line = 205;
        set_chip(line, &FAKE);
        request_irq(line, record, IrqFlags::empty(), "missed", 0).unwrap();
        disable(line);
        let before = stats(line);
        dispatch(line);
        let after = stats(line);
        assert_eq!(after.missed, before.missed + 1);
        assert_eq!(after.unhandled, before.unhandled);
    }
}
