//! Context switch primitive backing the scheduler's "perform the platform
//! context switch" step (§4.G `schedule`). Only the callee-saved registers
//! plus the resume `eip` are swapped here -- everything else belongs to the
//! uniform [`super::TrapFrame`] captured separately at the interrupt
//! boundary and restored by the ISR epilogue.

use super::CpuContext;
use core::arch::global_asm;

#[cfg(target_arch = "x86")]
global_asm!(
    r#"
.global arch_switch_context
arch_switch_context:
    mov eax, [esp+4]
    mov edx, [esp+8]

    mov [eax+0],  ebx
    mov [eax+4],  esi
    mov [eax+8],  edi
    mov [eax+12], ebp
    mov [eax+16], esp
    mov ecx, [esp]
    mov [eax+20], ecx

    mov ebx, [edx+0]
    mov esi, [edx+4]
    mov edi, [edx+8]
    mov ebp, [edx+12]
    mov esp, [edx+16]
    mov ecx, [edx+20]
    jmp ecx
"#
);

#[cfg(target_arch = "x86")]
extern "C" {
    fn arch_switch_context(prev: *mut CpuContext, next: *const CpuContext);
}

/// Host test shim: no real register file to swap.
#[cfg(not(target_arch = "x86"))]
unsafe fn arch_switch_context(_prev: *mut CpuContext, _next: *const CpuContext) {}

/// Save the caller's callee-saved registers into `prev`, load `next`'s, and
/// resume at `next.eip`. Never returns into the caller directly -- execution
/// resumes wherever the outgoing task's own `switch_to` call left off the
/// first time its context is restored.
pub fn switch_to(prev: &mut CpuContext, next: &CpuContext) {
    unsafe { arch_switch_context(prev as *mut CpuContext, next as *const CpuContext) };
}
