//! 16550 UART serial driver (§4.L step 8, §6): the one [`Console`] this
//! kernel owns directly. COM1 at the standard 0x3F8 base, 115200 8N1, FIFOs
//! enabled. Accessed through raw port I/O -- no external UART crate, since
//! this kernel's only target is 32-bit x86 and the port instructions are a
//! handful of lines.

use super::port::{inb, outb};
use crate::klog::Console;
use spin::Mutex;

pub const COM1_PORT: u16 = 0x3F8;
pub const COM2_PORT: u16 = 0x2F8;

const REG_DATA: u16 = 0;
const REG_INT_ENABLE: u16 = 1;
const REG_FIFO_CTRL: u16 = 2;
const REG_LINE_CTRL: u16 = 3;
const REG_MODEM_CTRL: u16 = 4;
const REG_LINE_STATUS: u16 = 5;

const LSR_THRE: u8 = 1 << 5;
const LSR_DR: u8 = 1 << 0;

pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        SerialPort { base }
    }

    /// Program the UART for 115200 8N1 with FIFOs on. Safe to call more than
    /// once; each call reinitializes the line from scratch.
    fn init(&mut self) {
        unsafe {
            outb(self.base + REG_INT_ENABLE, 0x00); // disable interrupts
            outb(self.base + REG_LINE_CTRL, 0x80); // enable DLAB
            outb(self.base + REG_DATA, 0x01); // divisor low: 1 -> 115200 baud
            outb(self.base + REG_INT_ENABLE, 0x00); // divisor high
            outb(self.base + REG_LINE_CTRL, 0x03); // 8N1, DLAB off
            outb(self.base + REG_FIFO_CTRL, 0xC7); // enable + clear FIFOs, 14-byte threshold
            outb(self.base + REG_MODEM_CTRL, 0x0B); // RTS/DSR set, aux output 2 (IRQs)
        }
    }

    fn tx_ready(&self) -> bool {
        unsafe { inb(self.base + REG_LINE_STATUS) & LSR_THRE != 0 }
    }

    fn write_byte(&self, byte: u8) {
        while !self.tx_ready() {
            core::hint::spin_loop();
        }
        unsafe { outb(self.base + REG_DATA, byte) };
    }

    fn try_read_byte(&self) -> Option<u8> {
        unsafe {
            if inb(self.base + REG_LINE_STATUS) & LSR_DR != 0 {
                Some(inb(self.base + REG_DATA))
            } else {
                None
            }
        }
    }
}

static COM1: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1_PORT));

/// Bring COM1 up. Must run before the first call to [`write_str`].
pub fn init() {
    COM1.lock().init();
}

pub fn write_byte(byte: u8) {
    COM1.lock().write_byte(byte);
}

pub fn write_str(s: &str) {
    for &b in s.as_bytes() {
        write_byte(b);
    }
}

pub fn read_byte() -> Option<u8> {
    COM1.lock().try_read_byte()
}

pub struct SerialConsole;

impl Console for SerialConsole {
    fn write(&self, buf: &[u8]) {
        let com1 = COM1.lock();
        for &b in buf {
            com1.write_byte(b);
        }
    }

    fn name(&self) -> &'static str {
        "ttyS0"
    }
}

pub static SERIAL_CONSOLE: SerialConsole = SerialConsole;
