//! Instruction-level Zilog Z80 interpreter.
//!
//! Each call to [`Z80::run_instruction`] retires exactly one instruction
//! (including any DD/FD/CB/ED prefix chain) and returns the number of
//! T-states it consumed. Memory and I/O go through the [`Bus`] trait.

mod alu;
mod bus;
mod cpu;
mod flags;
mod registers;
mod tables;

pub use bus::Bus;
pub use cpu::Z80;
pub use flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
pub use registers::Registers;
