//! Architecture support. This kernel targets exactly one profile -- 32-bit
//! protected-mode x86 -- so there is no arch-selection layer here, just the
//! one module.

pub mod x86;
