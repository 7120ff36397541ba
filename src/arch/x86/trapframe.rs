//! The uniform frame pushed by the low-level entry stubs (§4.E): every
//! general-purpose register, the segment registers, the vector number, and
//! an error code (fabricated as 0 for vectors the CPU itself doesn't push
//! one for).

use spin::Mutex;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    // Pushed by the stub via `pusha`-equivalent, in reverse push order.
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,

    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,

    pub vector: u32,
    pub error_code: u32,

    // Pushed by the CPU itself on every trap/interrupt.
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

impl TrapFrame {
    /// The syscall call number, by convention carried in `eax` at the INT
    /// 0x80 gate.
    pub fn syscall_number(&self) -> u32 {
        self.eax
    }

    pub fn syscall_args(&self) -> [u32; 4] {
        [self.ebx, self.ecx, self.edx, self.esi]
    }

    pub fn set_return_value(&mut self, value: i32) {
        self.eax = value as u32;
    }
}

/// The most recently observed trap frame, stashed by `common_interrupt_handler`
/// on every vector it dispatches so the panic path can print a best-effort
/// register dump even when the panic wasn't raised from inside a handler.
static LAST_TRAPFRAME: Mutex<Option<TrapFrame>> = Mutex::new(None);

pub fn record_last(frame: &TrapFrame) {
    *LAST_TRAPFRAME.lock() = Some(*frame);
}

/// A copy of the last recorded trap frame, or `None` if no interrupt has
/// fired yet (e.g. a panic during early boot, before the IDT is live).
pub fn last() -> Option<TrapFrame> {
    *LAST_TRAPFRAME.lock()
}
