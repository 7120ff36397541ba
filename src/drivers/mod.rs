//! Driver-facing interfaces (§6): the contracts external collaborators —
//! the PIC, the PIT, the serial port, and (out of this crate's scope) the
//! VGA console, the PS/2 keyboard, and the RTL8139 — are written against.

pub mod console;
pub mod irq;
