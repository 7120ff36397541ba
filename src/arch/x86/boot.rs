//! Ordered bring-up sequence (§4.L): the ten steps between the assembly
//! trampoline (outside this crate's scope -- it sets up a stack and jumps to
//! `kernel_main`) and the scheduler taking over. Each step's failure is
//! fatal; there is no fallback during boot, so failures here go through the
//! panic path rather than an error return.

use super::{cpu, gdt, idt, pic, pit, serial};
use crate::mm::page::PhysAddr;
use crate::process::task::KERNEL_STACK_SIZE;
use crate::{klog, mm, process};

/// Physical memory this reference build assumes it owns, in the absence of
/// a bootloader-provided memory map (§4.A "sized for a 128 MiB machine").
const MEMORY_BASE: PhysAddr = 0;
const FRAME_COUNT: usize = mm::frame::MAX_FRAMES;

/// Early, fixed kernel stack the init task's GDT/TSS entry is primed with
/// before the process layer hands out its own. Sized the same as every other
/// task's kernel stack (§6 stable constants).
static mut EARLY_STACK: [u8; KERNEL_STACK_SIZE] = [0; KERNEL_STACK_SIZE];

/// Run the ten-step bring-up sequence and enter the scheduler. Never
/// returns: step 10 schedules into the init task, and every path through the
/// scheduler either runs a task or halts in the idle loop.
///
/// This is the symbol the assembly trampoline jumps to once it has set up a
/// stack -- there is no further `_start` inside this crate.
#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    let early_stack_top = unsafe { core::ptr::addr_of!(EARLY_STACK) as u32 + KERNEL_STACK_SIZE as u32 };

    // 1. Early GDT: flat code/data plus a TSS descriptor.
    gdt::init(early_stack_top);

    // 2. IDT: fault gates wired, hardware IRQ gates installed but masked by
    //    the IRQ descriptor model until a driver calls request_irq.
    idt::init();

    // 3. Remap both 8259 PICs so the master lands on vector 32, then back
    //    every hardware line (0..16) with the PIC chip before any driver
    //    calls request_irq.
    pic::init();
    for line in 0..16u32 {
        crate::drivers::irq::set_chip(line, &pic::PIC_CHIP);
    }

    // 4. Frame allocator over the memory this reference build assumes.
    mm::frame::init(MEMORY_BASE, FRAME_COUNT);

    // 5. Identity-map the first 4 MiB and enable paging.
    let mut space = mm::paging::AddressSpace::new().expect("boot: failed to allocate the initial page directory");
    mm::paging::enable(&mut space);

    // 6. Region heap, registered as the global allocator via #[global_allocator]
    //    on GlobalHeap in mm::heap -- init() just primes the free-block chain.
    mm::heap::init();

    // 7. Generic kmalloc_slab size-class caches.
    mm::slab::init();

    // 8. Log ring and serial console.
    serial::init();
    klog::register_console(&serial::SERIAL_CONSOLE);
    klog::init();
    crate::info!("sis_kernel: boot sequence reached step 8 (logging live)");
    crate::lib::build_info::log_summary();

    // 9. Scheduler runqueues and idle task, then PIT programmed for the
    //    100 Hz tick and unmasked once the scheduler can receive ticks.
    pit::init();
    let timer_line = pic::Irq::Timer.to_vector() as u32 - 32;
    crate::drivers::irq::set_flow_handler(timer_line, crate::drivers::irq::FlowPolicy::Edge);
    crate::drivers::irq::request_irq(
        timer_line,
        timer_tick,
        crate::drivers::irq::IrqFlags::empty(),
        "pit",
        0,
    )
    .expect("boot: timer line already owned");

    // 10. Init process (PID 1), then enter the scheduler.
    let init_pid = process::init();
    crate::info!("sis_kernel: init process created, pid={}", init_pid);

    cpu::enable_interrupts();
    loop {
        process::scheduler::yield_now();
        cpu::halt();
    }
}

/// Registered on the timer line (§4.E "a timer-line IRQ additionally
/// invokes the scheduler tick").
fn timer_tick(_line: u32, _data: usize) {
    pit::on_tick();
    process::scheduler::tick();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_stack_top_is_word_aligned() {
        let top = unsafe { core::ptr::addr_of!(EARLY_STACK) as u32 + KERNEL_STACK_SIZE as u32 };
        assert_eq!(top % 4, 0);
    }
}
