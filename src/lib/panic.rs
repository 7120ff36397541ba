//! Panic path: structured diagnostics dump, then halt.
//!
//! Runs entirely off the stack (`heapless::String`, no `alloc`) because the
//! panic that got us here might itself be a corrupted heap -- the one thing
//! this path must never do is allocate. A second panic while already
//! panicking is detected and short-circuits to a minimal message instead of
//! re-running the (possibly what-broke-in-the-first-place) diagnostics.

use core::fmt::Write;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static PANICKING: AtomicBool = AtomicBool::new(false);
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

fn raw_write(s: &str) {
    crate::arch::x86::serial::write_str(s);
}

pub fn panic_handler(info: &PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        raw_write("\n!!! PANIC WHILE PANICKING -- HALTING IMMEDIATELY !!!\n");
        halt();
    }
    let panic_num = PANIC_COUNT.fetch_add(1, Ordering::SeqCst) + 1;

    crate::arch::x86::cpu::disable_interrupts();

    print_header(panic_num);
    print_location_and_message(info);
    print_registers();
    print_current_process();
    print_memory_stats();
    print_stack_trace();

    raw_write("System halted.\n");
    halt();
}

fn print_header(panic_num: u64) {
    let mut line: heapless::String<96> = heapless::String::new();
    raw_write("\n================================================================\n");
    raw_write("!!!                      KERNEL PANIC                       !!!\n");
    raw_write("================================================================\n");
    if panic_num > 1 {
        let _ = write!(line, "panic #{}\n", panic_num);
        raw_write(&line);
    }
}

fn print_location_and_message(info: &PanicInfo) {
    let mut line: heapless::String<256> = heapless::String::new();
    if let Some(loc) = info.location() {
        let _ = write!(line, "at {}:{}:{}\n", loc.file(), loc.line(), loc.column());
    } else {
        let _ = write!(line, "at <unknown location>\n");
    }
    raw_write(&line);

    let mut msg: heapless::String<256> = heapless::String::new();
    let _ = write!(msg, "{}\n", info.message());
    raw_write(&msg);
}

fn print_registers() {
    match crate::arch::x86::trapframe::last() {
        Some(frame) => {
            let mut line: heapless::String<160> = heapless::String::new();
            raw_write("registers (last trap frame):\n");
            let _ = write!(
                line,
                "  eax={:08x} ebx={:08x} ecx={:08x} edx={:08x}\n",
                frame.eax, frame.ebx, frame.ecx, frame.edx
            );
            raw_write(&line);
            line.clear();
            let _ = write!(
                line,
                "  esi={:08x} edi={:08x} ebp={:08x} eip={:08x}\n",
                frame.esi, frame.edi, frame.ebp, frame.eip
            );
            raw_write(&line);
            line.clear();
            let _ = write!(
                line,
                "  cs={:04x} eflags={:08x} vector={} error={:#x}\n",
                frame.cs, frame.eflags, frame.vector, frame.error_code
            );
            raw_write(&line);
        }
        None => raw_write("registers: no trap frame recorded\n"),
    }
}

fn print_current_process() {
    let mut line: heapless::String<96> = heapless::String::new();
    let pid = crate::process::current_pid();
    let _ = write!(line, "current process: pid={}\n", pid);
    raw_write(&line);
}

fn print_memory_stats() {
    let mut line: heapless::String<160> = heapless::String::new();
    let frame_stats = crate::mm::frame::stats();
    let heap_stats = crate::mm::heap::stats();
    let _ = write!(
        line,
        "frames: {}/{} used  heap: {} used, {} peak bytes\n",
        frame_stats.used, frame_stats.total, heap_stats.used, heap_stats.peak
    );
    raw_write(&line);

    raw_write("slab occupancy by size class:\n");
    for (size, stats) in crate::mm::slab::kmalloc_stats() {
        if stats.allocated == 0 {
            continue;
        }
        line.clear();
        let _ = write!(
            line,
            "  {:>5}: active={} peak={} errors={}\n",
            size, stats.active, stats.peak, stats.errors
        );
        raw_write(&line);
    }
}

fn print_stack_trace() {
    raw_write("stack trace:\n");
    let ebp = crate::arch::x86::cpu::read_ebp();
    let mut line: heapless::String<64> = heapless::String::new();
    crate::lib::debug::walk_stack(ebp, |depth, addr| {
        line.clear();
        let _ = write!(line, "  #{} 0x{:08x}\n", depth, addr);
        raw_write(&line);
    });
}

fn halt() -> ! {
    loop {
        crate::arch::x86::cpu::halt();
    }
}

pub fn panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::Relaxed)
}

pub fn is_panicking() -> bool {
    PANICKING.load(Ordering::Relaxed)
}
