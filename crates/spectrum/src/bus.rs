//! Memory and I/O routing between the CPU and the machine.
//!
//! Port decoding, most specific pattern first:
//!
//! | Pattern             | Read                     | Write                |
//! |---------------------|--------------------------|----------------------|
//! | 0xFFFD              | selected AY register      | select AY register   |
//! | 0xBFFD              | AY register value         | AY data              |
//! | low byte 0xFD       | 0x7FFD paging register    | paging latch         |
//! | bit 0 clear         | keyboard matrix           | border + beeper bits |
//! | bits 5-7 clear      | Kempston stub (0)         | -                    |
//! | anything else       | 0xFF                      | ignored              |

use ay_3_8910::Ay3_8910;
use z80::Bus;

use crate::keyboard::KeyboardState;
use crate::memory::Memory;

pub struct SpectrumBus {
    pub memory: Memory,
    pub ay: Ay3_8910,
    pub keyboard: KeyboardState,
    /// Border colour latched from port 0xFE bits 0-2.
    pub border: u8,
    /// Last full 0xFE write; bits 3 (MIC) and 4 (EAR) feed the beeper.
    pub port_fe: u8,
}

impl SpectrumBus {
    #[must_use]
    pub fn new(memory: Memory) -> Self {
        Self {
            memory,
            ay: Ay3_8910::new(),
            keyboard: KeyboardState::new(),
            border: 0,
            port_fe: 0,
        }
    }
}

impl Bus for SpectrumBus {
    fn mem_read(&mut self, addr: u16) -> u8 {
        self.memory.read(addr)
    }

    fn mem_write(&mut self, addr: u16, value: u8) {
        self.memory.write(addr, value);
    }

    fn io_read(&mut self, port: u16) -> u8 {
        if port == 0xFFFD {
            self.ay.selected_register()
        } else if port == 0xBFFD {
            self.ay.read_data()
        } else if port & 0x00FF == 0x00FD {
            self.memory.port_7ffd()
        } else if port & 0x0001 == 0 {
            self.keyboard.read((port >> 8) as u8)
        } else if port & 0x00E0 == 0 {
            // Kempston joystick stub: nothing ever pressed.
            0x00
        } else {
            0xFF
        }
    }

    fn io_write(&mut self, port: u16, value: u8) {
        if port == 0xFFFD {
            self.ay.select_register(value & 0x0F);
        } else if port == 0xBFFD {
            self.ay.write_data(value);
        } else if port == 0x1FFD {
            // +2A/+3 banking: not this machine.
        } else if port & 0x00FF == 0x00FD {
            self.memory.write_7ffd(value);
        } else if port & 0x0001 == 0 {
            self.border = value & 0x07;
            self.port_fe = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RomSet;

    fn make_bus() -> SpectrumBus {
        SpectrumBus::new(Memory::new(&RomSet::blank()))
    }

    #[test]
    fn fe_write_sets_border_and_beeper_bits() {
        let mut bus = make_bus();
        bus.io_write(0x00FE, 0x12);
        assert_eq!(bus.border, 2);
        assert_eq!(bus.port_fe, 0x12);
    }

    #[test]
    fn even_port_reads_keyboard() {
        let mut bus = make_bus();
        bus.keyboard.set_key(0, 0x01, true);
        assert_eq!(bus.io_read(0xFEFE) & 0x01, 0x00);
        assert_eq!(bus.io_read(0xFDFE) & 0x01, 0x01, "other row unaffected");
    }

    #[test]
    fn paging_port_latches() {
        let mut bus = make_bus();
        bus.io_write(0x7FFD, 0x20);
        bus.io_write(0x7FFD, 0x07);
        assert_eq!(bus.io_read(0x7FFD), 0x20);
    }

    #[test]
    fn any_fd_low_byte_pages(){
        // The 128K decodes 0x7FFD loosely: any odd port with low byte 0xFD.
        let mut bus = make_bus();
        bus.io_write(0x3FFD, 0x07);
        assert_eq!(bus.memory.port_7ffd(), 0x07);
    }

    #[test]
    fn ay_register_round_trip() {
        let mut bus = make_bus();
        bus.io_write(0xFFFD, 0x08);
        bus.io_write(0xBFFD, 0x1F);
        assert_eq!(bus.io_read(0xFFFD), 0x08);
        assert_eq!(bus.io_read(0xBFFD), 0x1F);
    }

    #[test]
    fn kempston_stub_reads_zero() {
        let mut bus = make_bus();
        assert_eq!(bus.io_read(0x001F), 0x00);
    }

    #[test]
    fn unmapped_port_reads_ff() {
        let mut bus = make_bus();
        assert_eq!(bus.io_read(0x02FF), 0xFF);
    }
}
