//! Legacy 8259A PIC driver (§4.L step 3): remaps both controllers so IRQ 0-15
//! land on vectors 32-47, clear of the CPU fault range. Implements
//! [`drivers::irq::Chip`] so the IRQ descriptor model can mask, unmask, and
//! acknowledge lines through the same interface any other controller would
//! use.

use super::port::{inb, outb};
use crate::drivers::irq::Chip;
use spin::Mutex;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const CMD_EOI: u8 = 0x20;
const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;
const READ_ISR: u8 = 0x0B;

/// Vector offset for IRQ 0-7 after remapping.
pub const PIC1_OFFSET: u8 = 32;
/// Vector offset for IRQ 8-15 after remapping.
pub const PIC2_OFFSET: u8 = PIC1_OFFSET + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Irq {
    Timer = 0,
    Keyboard = 1,
    Cascade = 2,
    COM2 = 3,
    COM1 = 4,
    LPT2 = 5,
    Floppy = 6,
    LPT1 = 7,
    RTC = 8,
    ACPI = 9,
    Free1 = 10,
    Free2 = 11,
    Mouse = 12,
    FPU = 13,
    PrimaryATA = 14,
    SecondaryATA = 15,
}

impl Irq {
    pub fn to_vector(self) -> u8 {
        let irq = self as u8;
        if irq < 8 {
            PIC1_OFFSET + irq
        } else {
            PIC2_OFFSET + (irq - 8)
        }
    }

    pub fn from_vector(vector: u8) -> Option<Self> {
        let irq = if (PIC1_OFFSET..PIC1_OFFSET + 8).contains(&vector) {
            vector - PIC1_OFFSET
        } else if (PIC2_OFFSET..PIC2_OFFSET + 8).contains(&vector) {
            (vector - PIC2_OFFSET) + 8
        } else {
            return None;
        };
        match irq {
            0 => Some(Irq::Timer),
            1 => Some(Irq::Keyboard),
            2 => Some(Irq::Cascade),
            3 => Some(Irq::COM2),
            4 => Some(Irq::COM1),
            5 => Some(Irq::LPT2),
            6 => Some(Irq::Floppy),
            7 => Some(Irq::LPT1),
            8 => Some(Irq::RTC),
            9 => Some(Irq::ACPI),
            10 => Some(Irq::Free1),
            11 => Some(Irq::Free2),
            12 => Some(Irq::Mouse),
            13 => Some(Irq::FPU),
            14 => Some(Irq::PrimaryATA),
            15 => Some(Irq::SecondaryATA),
            _ => None,
        }
    }
}

struct ChainedPics;

impl ChainedPics {
    unsafe fn initialize(&self) {
        outb(PIC1_COMMAND, ICW1_INIT | ICW1_ICW4);
        io_wait();
        outb(PIC2_COMMAND, ICW1_INIT | ICW1_ICW4);
        io_wait();

        outb(PIC1_DATA, PIC1_OFFSET);
        io_wait();
        outb(PIC2_DATA, PIC2_OFFSET);
        io_wait();

        outb(PIC1_DATA, 0x04); // IRQ2 has a slave
        io_wait();
        outb(PIC2_DATA, 0x02); // cascade identity
        io_wait();

        outb(PIC1_DATA, ICW4_8086);
        io_wait();
        outb(PIC2_DATA, ICW4_8086);
        io_wait();

        outb(PIC1_DATA, 0xFF);
        outb(PIC2_DATA, 0xFF);
    }

    unsafe fn set_mask(&self, irq: u8, masked: bool) {
        let (port, bit) = if irq < 8 {
            (PIC1_DATA, irq)
        } else {
            (PIC2_DATA, irq - 8)
        };
        let current = inb(port);
        let updated = if masked {
            current | (1 << bit)
        } else {
            current & !(1 << bit)
        };
        outb(port, updated);
        if !masked && irq >= 8 {
            let master = inb(PIC1_DATA);
            outb(PIC1_DATA, master & !(1 << 2));
        }
    }

    unsafe fn eoi(&self, irq: u8) {
        if irq >= 8 {
            outb(PIC2_COMMAND, CMD_EOI);
        }
        outb(PIC1_COMMAND, CMD_EOI);
    }

    unsafe fn is_spurious(&self, irq: u8) -> bool {
        if irq == 7 {
            outb(PIC1_COMMAND, READ_ISR);
            inb(PIC1_COMMAND) & 0x80 == 0
        } else if irq == 15 {
            outb(PIC2_COMMAND, READ_ISR);
            inb(PIC2_COMMAND) & 0x80 == 0
        } else {
            false
        }
    }
}

#[inline]
fn io_wait() {
    unsafe { outb(0x80, 0) };
}

static PICS: Mutex<ChainedPics> = Mutex::new(ChainedPics);

/// Remap and mask both controllers. Must run with interrupts disabled.
pub fn init() {
    unsafe { PICS.lock().initialize() };
}

pub fn is_spurious(irq: u8) -> bool {
    unsafe { PICS.lock().is_spurious(irq) }
}

/// The PIC presented as an IRQ descriptor model [`Chip`]. One instance
/// handles both master and slave; `line` is the IRQ number (0-15), not the
/// remapped vector.
pub struct PicChip;

impl Chip for PicChip {
    fn name(&self) -> &'static str {
        "8259A"
    }

    fn mask_raw(&self, line: u32) {
        unsafe { PICS.lock().set_mask(line as u8, true) };
    }

    fn unmask_raw(&self, line: u32) {
        unsafe { PICS.lock().set_mask(line as u8, false) };
    }

    fn eoi(&self, line: u32) {
        unsafe { PICS.lock().eoi(line as u8) };
    }

    /// Only IRQ7 and IRQ15 can be spurious on the 8259A; every other line
    /// always reflects a real pending interrupt in the ISR register.
    fn is_spurious(&self, line: u32) -> bool {
        (line == 7 || line == 15) && is_spurious(line as u8)
    }
}

pub static PIC_CHIP: PicChip = PicChip;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_vector_roundtrip() {
        assert_eq!(Irq::Timer.to_vector(), 32);
        assert_eq!(Irq::Keyboard.to_vector(), 33);
        assert_eq!(Irq::COM1.to_vector(), 36);
        assert_eq!(Irq::RTC.to_vector(), 40);
        assert_eq!(Irq::Mouse.to_vector(), 44);
        assert_eq!(Irq::from_vector(32), Some(Irq::Timer));
        assert_eq!(Irq::from_vector(44), Some(Irq::Mouse));
        assert_eq!(Irq::from_vector(100), None);
    }
}
