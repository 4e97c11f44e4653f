//! Memory and I/O bus interface.

/// Everything the CPU can see of the outside world.
///
/// The machine implements this once; the CPU calls it for every opcode
/// fetch, operand read, stack access, and port access.
pub trait Bus {
    /// Read a byte from memory.
    fn mem_read(&mut self, addr: u16) -> u8;

    /// Write a byte to memory. Writes to ROM are silently ignored.
    fn mem_write(&mut self, addr: u16, value: u8);

    /// Read a byte from an I/O port. Unmapped ports return 0xFF.
    fn io_read(&mut self, port: u16) -> u8;

    /// Write a byte to an I/O port. Unmapped ports ignore the write.
    fn io_write(&mut self, port: u16, value: u8);
}
