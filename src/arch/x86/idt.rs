//! 32-bit Interrupt Descriptor Table (§4.E): 256 gates, of which this kernel
//! wires three ranges -- CPU fault vectors 0-19, the PIC-remapped hardware
//! IRQ vectors 32-47, and the INT 0x80 syscall gate. Every wired vector
//! funnels through a handful of small entry stubs (below, in `global_asm!`)
//! that normalize the CPU's frame into a single layout, [`super::trapframe::TrapFrame`],
//! before calling into Rust. Vectors with no gate installed fault with #GP
//! (vector 13) if ever reached, which is itself wired and goes through the
//! same fault path rather than triple-faulting.

use super::trapframe::TrapFrame;
use core::arch::global_asm;
use core::mem::size_of;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        IdtEntry {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

const GATE_RING0: u8 = 0x8E; // present, ring 0, 32-bit interrupt gate
const GATE_RING3: u8 = 0xEE; // present, ring 3, 32-bit interrupt gate (syscall trap door)

static mut IDT: [IdtEntry; 256] = [IdtEntry::missing(); 256];

/// Vector numbers with a CPU-pushed error code; every other vector's stub
/// pushes a dummy 0 so the common trampoline sees a uniform frame.
const HAS_ERROR_CODE: [u32; 7] = [8, 10, 11, 12, 13, 14, 17];

fn has_error_code(vector: u32) -> bool {
    HAS_ERROR_CODE.contains(&vector)
}

macro_rules! isr_stub {
    // No CPU-pushed error code: push a dummy 0 first so it lands in the
    // same slot the `err` arm's real error code occupies, keeping the
    // frame layout uniform for the common handler.
    ($name:ident, $vector:expr) => {
        global_asm!(
            concat!(
                ".global ", stringify!($name), "\n",
                stringify!($name), ":\n",
                "    push 0\n",
                "    push ", stringify!($vector), "\n",
                "    jmp isr_common_stub\n",
            )
        );
        extern "C" {
            pub(super) fn $name();
        }
    };
    ($name:ident, $vector:expr, err) => {
        global_asm!(
            concat!(
                ".global ", stringify!($name), "\n",
                stringify!($name), ":\n",
                "    push ", stringify!($vector), "\n",
                "    jmp isr_common_stub\n",
            )
        );
        extern "C" {
            pub(super) fn $name();
        }
    };
}

#[cfg(target_arch = "x86")]
global_asm!(
    r#"
.global isr_common_stub
isr_common_stub:
    push gs
    push fs
    push es
    push ds
    pushad

    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax

    push esp
    call common_interrupt_handler
    add esp, 4

    popad
    pop ds
    pop es
    pop fs
    pop gs
    add esp, 8
    iretd
"#
);

#[cfg(target_arch = "x86")]
mod stubs {
    use super::*;

    isr_stub!(isr0, 0);
    isr_stub!(isr1, 1);
    isr_stub!(isr2, 2);
    isr_stub!(isr3, 3);
    isr_stub!(isr4, 4);
    isr_stub!(isr5, 5);
    isr_stub!(isr6, 6);
    isr_stub!(isr7, 7);
    isr_stub!(isr8, 8, err);
    isr_stub!(isr9, 9);
    isr_stub!(isr10, 10, err);
    isr_stub!(isr11, 11, err);
    isr_stub!(isr12, 12, err);
    isr_stub!(isr13, 13, err);
    isr_stub!(isr14, 14, err);
    isr_stub!(isr15, 15);
    isr_stub!(isr16, 16);
    isr_stub!(isr17, 17, err);
    isr_stub!(isr18, 18);
    isr_stub!(isr19, 19);

    isr_stub!(irq0, 32);
    isr_stub!(irq1, 33);
    isr_stub!(irq2, 34);
    isr_stub!(irq3, 35);
    isr_stub!(irq4, 36);
    isr_stub!(irq5, 37);
    isr_stub!(irq6, 38);
    isr_stub!(irq7, 39);
    isr_stub!(irq8, 40);
    isr_stub!(irq9, 41);
    isr_stub!(irq10, 42);
    isr_stub!(irq11, 43);
    isr_stub!(irq12, 44);
    isr_stub!(irq13, 45);
    isr_stub!(irq14, 46);
    isr_stub!(irq15, 47);

    isr_stub!(isr_syscall, 0x80);
}

#[cfg(target_arch = "x86")]
use stubs::*;

const FAULT_NAMES: [&str; 20] = [
    "divide error",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating point error",
    "alignment check",
    "machine check",
    "SIMD floating point exception",
];

/// Called from `isr_common_stub` for every wired vector. Faults are fatal;
/// hardware IRQs route into the descriptor model; the syscall gate routes
/// into the syscall dispatcher.
#[no_mangle]
extern "C" fn common_interrupt_handler(frame: *mut TrapFrame) {
    let frame = unsafe { &mut *frame };
    super::trapframe::record_last(frame);
    match frame.vector {
        0..=19 => {
            let name = FAULT_NAMES[frame.vector as usize];
            panic!(
                "CPU fault: {} (vector {}, error {:#x}, eip {:#x})",
                name, frame.vector, frame.error_code, frame.eip
            );
        }
        32..=47 => {
            let line = frame.vector - 32;
            crate::drivers::irq::dispatch(line);
        }
        0x80 => {
            crate::syscall::dispatch(frame);
        }
        other => {
            crate::warn!("idt: spurious vector {}", other);
        }
    }
}

#[cfg(target_arch = "x86")]
fn set_gate(vector: usize, handler: unsafe extern "C" fn(), type_attr: u8) {
    unsafe {
        IDT[vector] = IdtEntry::new(
            handler as usize as u32,
            super::gdt::KERNEL_CODE_SEL,
            type_attr,
        );
    }
}

/// Build and load the IDT. Must run after the GDT so `KERNEL_CODE_SEL` is
/// valid, and before interrupts are ever enabled.
#[cfg(target_arch = "x86")]
pub fn init() {
    set_gate(0, isr0, GATE_RING0);
    set_gate(1, isr1, GATE_RING0);
    set_gate(2, isr2, GATE_RING0);
    set_gate(3, isr3, GATE_RING0);
    set_gate(4, isr4, GATE_RING0);
    set_gate(5, isr5, GATE_RING0);
    set_gate(6, isr6, GATE_RING0);
    set_gate(7, isr7, GATE_RING0);
    set_gate(8, isr8, GATE_RING0);
    set_gate(9, isr9, GATE_RING0);
    set_gate(10, isr10, GATE_RING0);
    set_gate(11, isr11, GATE_RING0);
    set_gate(12, isr12, GATE_RING0);
    set_gate(13, isr13, GATE_RING0);
    set_gate(14, isr14, GATE_RING0);
    set_gate(15, isr15, GATE_RING0);
    set_gate(16, isr16, GATE_RING0);
    set_gate(17, isr17, GATE_RING0);
    set_gate(18, isr18, GATE_RING0);
    set_gate(19, isr19, GATE_RING0);

    set_gate(32, irq0, GATE_RING0);
    set_gate(33, irq1, GATE_RING0);
    set_gate(34, irq2, GATE_RING0);
    set_gate(35, irq3, GATE_RING0);
    set_gate(36, irq4, GATE_RING0);
    set_gate(37, irq5, GATE_RING0);
    set_gate(38, irq6, GATE_RING0);
    set_gate(39, irq7, GATE_RING0);
    set_gate(40, irq8, GATE_RING0);
    set_gate(41, irq9, GATE_RING0);
    set_gate(42, irq10, GATE_RING0);
    set_gate(43, irq11, GATE_RING0);
    set_gate(44, irq12, GATE_RING0);
    set_gate(45, irq13, GATE_RING0);
    set_gate(46, irq14, GATE_RING0);
    set_gate(47, irq15, GATE_RING0);

    set_gate(0x80, isr_syscall, GATE_RING3);

    unsafe {
        let ptr = IdtPointer {
            limit: (size_of::<[IdtEntry; 256]>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u32,
        };
        core::arch::asm!("lidt [{0}]", in(reg) &ptr, options(nostack));
    }
}

/// Host test shim: there is no real IDT to load, so this is a no-op that
/// lets callers like `boot::kernel_main` stay unconditional.
#[cfg(not(target_arch = "x86"))]
pub fn init() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_vectors_match_intel_reference() {
        assert!(has_error_code(13));
        assert!(has_error_code(14));
        assert!(!has_error_code(0));
        assert!(!has_error_code(32));
    }

    #[test]
    fn fault_names_cover_vectors_0_to_19() {
        assert_eq!(FAULT_NAMES.len(), 20);
        assert_eq!(FAULT_NAMES[14], "page fault");
        assert_eq!(FAULT_NAMES[13], "general protection fault");
    }
}
