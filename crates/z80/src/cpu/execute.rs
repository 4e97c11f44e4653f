//! Instruction execution for the Z80.
//!
//! The decoder advances PC over operand bytes as it consumes them; the
//! caller adds one more after the base opcode, so control transfers store
//! their target minus one. Conditional paths charge their extra T-states
//! on top of the base tables.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use crate::alu;
use crate::bus::Bus;
use crate::flags::{sz53, sz53p, CF, HF, NF, PF, SF, XF, YF, ZF};
use crate::tables::{CYCLES, CYCLES_CB, CYCLES_DD, CYCLES_ED};

use super::{Index, Z80};

/// Flags the RLCA/RRCA/RLA/RRA family leaves untouched.
const ROTA_KEEP: u8 = SF | ZF | PF;

impl Z80 {
    /// Read the operand selected by the low three opcode bits
    /// (6 selects `(HL)`).
    fn get_operand<B: Bus>(&mut self, bus: &mut B, code: u8) -> u8 {
        match code & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            6 => bus.mem_read(self.regs.hl()),
            _ => self.regs.a,
        }
    }

    /// Store to the register selected by a 3-bit code (6 stores to `(HL)`).
    fn set_operand<B: Bus>(&mut self, bus: &mut B, code: u8, value: u8) {
        match code & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            6 => bus.mem_write(self.regs.hl(), value),
            _ => self.regs.a = value,
        }
    }

    /// Register pair by 2-bit code, SP variant.
    fn get_reg16(&self, code: u8) -> u16 {
        match code & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_reg16(&mut self, code: u8, value: u16) {
        match code & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// Immediate byte: advances PC onto the operand.
    fn read_imm8<B: Bus>(&mut self, bus: &mut B) -> u8 {
        self.regs.pc = self.regs.pc.wrapping_add(1);
        bus.mem_read(self.regs.pc)
    }

    /// Immediate word, little-endian: advances PC onto the high byte.
    fn read_imm16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.read_imm8(bus);
        let hi = self.read_imm8(bus);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    // ---------------------------------------------------------------------
    // Control-flow helpers
    // ---------------------------------------------------------------------

    fn cond_jp<B: Bus>(&mut self, bus: &mut B, condition: bool) {
        if condition {
            let target = {
                let lo = bus.mem_read(self.regs.pc.wrapping_add(1));
                let hi = bus.mem_read(self.regs.pc.wrapping_add(2));
                u16::from(lo) | (u16::from(hi) << 8)
            };
            self.regs.pc = target.wrapping_sub(1);
        } else {
            self.regs.pc = self.regs.pc.wrapping_add(2);
        }
    }

    fn cond_jr<B: Bus>(&mut self, bus: &mut B, condition: bool) {
        if condition {
            self.add_cycles(5);
            let offset = bus.mem_read(self.regs.pc.wrapping_add(1)) as i8;
            self.regs.pc = self
                .regs
                .pc
                .wrapping_add(offset as u16)
                .wrapping_add(1);
        } else {
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }
    }

    fn cond_call<B: Bus>(&mut self, bus: &mut B, condition: bool) {
        if condition {
            self.add_cycles(7);
            let ret = self.regs.pc.wrapping_add(3);
            let target = {
                let lo = bus.mem_read(self.regs.pc.wrapping_add(1));
                let hi = bus.mem_read(self.regs.pc.wrapping_add(2));
                u16::from(lo) | (u16::from(hi) << 8)
            };
            self.push_word(bus, ret);
            self.regs.pc = target.wrapping_sub(1);
        } else {
            self.regs.pc = self.regs.pc.wrapping_add(2);
        }
    }

    fn cond_ret<B: Bus>(&mut self, bus: &mut B, condition: bool) {
        if condition {
            self.add_cycles(6);
            self.regs.pc = self.pop_word(bus).wrapping_sub(1);
        }
    }

    fn rst<B: Bus>(&mut self, bus: &mut B, address: u16) {
        let ret = self.regs.pc.wrapping_add(1);
        self.push_word(bus, ret);
        self.regs.pc = address.wrapping_sub(1);
    }

    // ---------------------------------------------------------------------
    // Unprefixed opcodes
    // ---------------------------------------------------------------------

    pub(crate) fn execute_main<B: Bus>(&mut self, bus: &mut B, opcode: u8) {
        // HALT sits where LD (HL), (HL) would be, so handle it before the
        // uniform load range.
        if opcode == 0x76 {
            self.halted = true;
            return;
        }

        // 0x40..0x7F: 8-bit register-to-register loads.
        if (0x40..0x80).contains(&opcode) {
            let operand = self.get_operand(bus, opcode);
            self.set_operand(bus, opcode >> 3, operand);
            return;
        }

        // 0x80..0xBF: ALU on A, operation in bits 5-3.
        if (0x80..0xC0).contains(&opcode) {
            let operand = self.get_operand(bus, opcode);
            self.alu_a((opcode >> 3) & 7, operand);
            return;
        }

        match opcode {
            // NOP
            0x00 => {}

            // LD rr, nn
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.read_imm16(bus);
                self.set_reg16(opcode >> 4, value);
            }

            // LD (BC), A / LD (DE), A
            0x02 => bus.mem_write(self.regs.bc(), self.regs.a),
            0x12 => bus.mem_write(self.regs.de(), self.regs.a),

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                let code = opcode >> 4;
                self.set_reg16(code, self.get_reg16(code).wrapping_add(1));
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let code = opcode >> 4;
                self.set_reg16(code, self.get_reg16(code).wrapping_sub(1));
            }

            // INC r / DEC r (code 6 is (HL))
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let code = (opcode >> 3) & 7;
                let r = alu::inc8(self.get_operand(bus, code));
                self.set_operand(bus, code, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let code = (opcode >> 3) & 7;
                let r = alu::dec8(self.get_operand(bus, code));
                self.set_operand(bus, code, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }

            // LD r, n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let value = self.read_imm8(bus);
                self.set_operand(bus, opcode >> 3, value);
            }

            // RLCA / RRCA / RLA / RRA: S, Z and P survive.
            0x07 => {
                let r = alu::rlc8(self.regs.a);
                self.regs.a = r.value;
                self.regs.f = (self.regs.f & ROTA_KEEP) | (r.flags & !ROTA_KEEP);
            }
            0x0F => {
                let r = alu::rrc8(self.regs.a);
                self.regs.a = r.value;
                self.regs.f = (self.regs.f & ROTA_KEEP) | (r.flags & !ROTA_KEEP);
            }
            0x17 => {
                let r = alu::rl8(self.regs.a, self.regs.f & CF != 0);
                self.regs.a = r.value;
                self.regs.f = (self.regs.f & ROTA_KEEP) | (r.flags & !ROTA_KEEP);
            }
            0x1F => {
                let r = alu::rr8(self.regs.a, self.regs.f & CF != 0);
                self.regs.a = r.value;
                self.regs.f = (self.regs.f & ROTA_KEEP) | (r.flags & !ROTA_KEEP);
            }

            // EX AF, AF'
            0x08 => {
                std::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                std::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
            }

            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                let rr = self.get_reg16(opcode >> 4);
                let (result, flags) = alu::add16(self.regs.hl(), rr);
                self.regs.set_hl(result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // LD A, (BC) / LD A, (DE)
            0x0A => self.regs.a = bus.mem_read(self.regs.bc()),
            0x1A => self.regs.a = bus.mem_read(self.regs.de()),

            // DJNZ e
            0x10 => {
                self.regs.b = self.regs.b.wrapping_sub(1);
                let taken = self.regs.b != 0;
                self.cond_jr(bus, taken);
            }

            // JR e and JR cc, e
            0x18 => self.cond_jr(bus, true),
            0x20 => self.cond_jr(bus, self.regs.f & ZF == 0),
            0x28 => self.cond_jr(bus, self.regs.f & ZF != 0),
            0x30 => self.cond_jr(bus, self.regs.f & CF == 0),
            0x38 => self.cond_jr(bus, self.regs.f & CF != 0),

            // LD (nn), HL / LD HL, (nn)
            0x22 => {
                let addr = self.read_imm16(bus);
                bus.mem_write(addr, self.regs.l);
                bus.mem_write(addr.wrapping_add(1), self.regs.h);
            }
            0x2A => {
                let addr = self.read_imm16(bus);
                self.regs.l = bus.mem_read(addr);
                self.regs.h = bus.mem_read(addr.wrapping_add(1));
            }

            // DAA
            0x27 => {
                let r = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF))
                    | HF
                    | NF
                    | (self.regs.a & (YF | XF));
            }

            // LD (nn), A / LD A, (nn)
            0x32 => {
                let addr = self.read_imm16(bus);
                bus.mem_write(addr, self.regs.a);
            }
            0x3A => {
                let addr = self.read_imm16(bus);
                self.regs.a = bus.mem_read(addr);
            }

            // LD (HL), n
            0x36 => {
                let value = self.read_imm8(bus);
                bus.mem_write(self.regs.hl(), value);
            }

            // SCF / CCF
            0x37 => {
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | CF
                    | (self.regs.a & (YF | XF));
            }
            0x3F => {
                let old_carry = self.regs.f & CF;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (old_carry << 4)
                    | (old_carry ^ CF)
                    | (self.regs.a & (YF | XF));
            }

            // RET cc / RET
            0xC0 => self.cond_ret(bus, self.regs.f & ZF == 0),
            0xC8 => self.cond_ret(bus, self.regs.f & ZF != 0),
            0xD0 => self.cond_ret(bus, self.regs.f & CF == 0),
            0xD8 => self.cond_ret(bus, self.regs.f & CF != 0),
            0xE0 => self.cond_ret(bus, self.regs.f & PF == 0),
            0xE8 => self.cond_ret(bus, self.regs.f & PF != 0),
            0xF0 => self.cond_ret(bus, self.regs.f & SF == 0),
            0xF8 => self.cond_ret(bus, self.regs.f & SF != 0),
            0xC9 => self.regs.pc = self.pop_word(bus).wrapping_sub(1),

            // POP rr / PUSH rr
            0xC1 => {
                let value = self.pop_word(bus);
                self.regs.set_bc(value);
            }
            0xD1 => {
                let value = self.pop_word(bus);
                self.regs.set_de(value);
            }
            0xE1 => {
                let value = self.pop_word(bus);
                self.regs.set_hl(value);
            }
            0xF1 => {
                let value = self.pop_word(bus);
                self.regs.set_af(value);
            }
            0xC5 => self.push_word(bus, self.regs.bc()),
            0xD5 => self.push_word(bus, self.regs.de()),
            0xE5 => self.push_word(bus, self.regs.hl()),
            0xF5 => self.push_word(bus, self.regs.af()),

            // JP cc, nn / JP nn
            0xC2 => self.cond_jp(bus, self.regs.f & ZF == 0),
            0xCA => self.cond_jp(bus, self.regs.f & ZF != 0),
            0xD2 => self.cond_jp(bus, self.regs.f & CF == 0),
            0xDA => self.cond_jp(bus, self.regs.f & CF != 0),
            0xE2 => self.cond_jp(bus, self.regs.f & PF == 0),
            0xEA => self.cond_jp(bus, self.regs.f & PF != 0),
            0xF2 => self.cond_jp(bus, self.regs.f & SF == 0),
            0xFA => self.cond_jp(bus, self.regs.f & SF != 0),
            0xC3 => self.cond_jp(bus, true),
            0xE9 => self.regs.pc = self.regs.hl().wrapping_sub(1),

            // CALL cc, nn / CALL nn
            0xC4 => self.cond_call(bus, self.regs.f & ZF == 0),
            0xCC => self.cond_call(bus, self.regs.f & ZF != 0),
            0xD4 => self.cond_call(bus, self.regs.f & CF == 0),
            0xDC => self.cond_call(bus, self.regs.f & CF != 0),
            0xE4 => self.cond_call(bus, self.regs.f & PF == 0),
            0xEC => self.cond_call(bus, self.regs.f & PF != 0),
            0xF4 => self.cond_call(bus, self.regs.f & SF == 0),
            0xFC => self.cond_call(bus, self.regs.f & SF != 0),
            0xCD => self.cond_call(bus, true),

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let operand = self.read_imm8(bus);
                self.alu_a((opcode >> 3) & 7, operand);
            }

            // RST
            0xC7 => self.rst(bus, 0x00),
            0xCF => self.rst(bus, 0x08),
            0xD7 => self.rst(bus, 0x10),
            0xDF => self.rst(bus, 0x18),
            0xE7 => self.rst(bus, 0x20),
            0xEF => self.rst(bus, 0x28),
            0xF7 => self.rst(bus, 0x30),
            0xFF => self.rst(bus, 0x38),

            // EXX / EX DE, HL / EX (SP), HL
            0xD9 => {
                std::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                std::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                std::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                std::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                std::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                std::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
            }
            0xEB => {
                std::mem::swap(&mut self.regs.d, &mut self.regs.h);
                std::mem::swap(&mut self.regs.e, &mut self.regs.l);
            }
            0xE3 => {
                let sp = self.regs.sp;
                let lo = bus.mem_read(sp);
                let hi = bus.mem_read(sp.wrapping_add(1));
                bus.mem_write(sp, self.regs.l);
                bus.mem_write(sp.wrapping_add(1), self.regs.h);
                self.regs.l = lo;
                self.regs.h = hi;
            }

            // OUT (n), A / IN A, (n): no flags.
            0xD3 => {
                let port_lo = self.read_imm8(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(port_lo);
                bus.io_write(port, self.regs.a);
            }
            0xDB => {
                let port_lo = self.read_imm8(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(port_lo);
                self.regs.a = bus.io_read(port);
            }

            // LD SP, HL
            0xF9 => self.regs.sp = self.regs.hl(),

            // DI / EI land after the next instruction.
            0xF3 => self.do_delayed_di = true,
            0xFB => self.do_delayed_ei = true,

            // Prefixes
            0xCB => self.execute_cb(bus),
            0xED => self.execute_ed_prefix(bus),
            0xDD => self.execute_index_prefix(bus, Index::Ix),
            0xFD => self.execute_index_prefix(bus, Index::Iy),

            _ => unreachable!("all 256 opcodes are covered"),
        }
    }

    /// The eight accumulator ALU operations, indexed by bits 5-3 of the
    /// opcode: ADD, ADC, SUB, SBC, AND, XOR, OR, CP.
    fn alu_a(&mut self, op: u8, operand: u8) {
        let carry = self.regs.f & CF != 0;
        let r = match op {
            0 => alu::add8(self.regs.a, operand, false),
            1 => alu::add8(self.regs.a, operand, carry),
            2 => alu::sub8(self.regs.a, operand, false),
            3 => alu::sub8(self.regs.a, operand, carry),
            4 => alu::and8(self.regs.a, operand),
            5 => alu::xor8(self.regs.a, operand),
            6 => alu::or8(self.regs.a, operand),
            _ => alu::cp8(self.regs.a, operand),
        };
        self.regs.a = r.value;
        self.regs.f = r.flags;
    }

    /// Shift/rotate variant for the CB family, indexed by bits 5-3.
    fn shift_op(&mut self, variant: u8, operand: u8) -> u8 {
        let carry = self.regs.f & CF != 0;
        let r = match variant {
            0 => alu::rlc8(operand),
            1 => alu::rrc8(operand),
            2 => alu::rl8(operand, carry),
            3 => alu::rr8(operand, carry),
            4 => alu::sla8(operand),
            5 => alu::sra8(operand),
            6 => alu::sll8(operand),
            _ => alu::srl8(operand),
        };
        self.regs.f = r.flags;
        r.value
    }

    // ---------------------------------------------------------------------
    // CB prefix
    // ---------------------------------------------------------------------

    fn execute_cb<B: Bus>(&mut self, bus: &mut B) {
        // Second M1 cycle: R increments again.
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);

        self.regs.pc = self.regs.pc.wrapping_add(1);
        let opcode = bus.mem_read(self.regs.pc);
        let bit = (opcode >> 3) & 7;
        let reg = opcode & 7;

        match opcode >> 6 {
            0 => {
                let operand = self.get_operand(bus, reg);
                let result = self.shift_op(bit, operand);
                self.set_operand(bus, reg, result);
            }
            1 => {
                let operand = self.get_operand(bus, reg);
                let zero = operand & (1 << bit) == 0;
                let mut f = (self.regs.f & CF) | HF;
                if zero {
                    f |= ZF | PF;
                }
                if bit == 7 && !zero {
                    f |= SF;
                }
                if bit == 5 && !zero {
                    f |= YF;
                }
                if bit == 3 && !zero {
                    f |= XF;
                }
                self.regs.f = f;
            }
            2 => {
                let operand = self.get_operand(bus, reg);
                self.set_operand(bus, reg, operand & !(1 << bit));
            }
            _ => {
                let operand = self.get_operand(bus, reg);
                self.set_operand(bus, reg, operand | (1 << bit));
            }
        }

        self.add_cycles(CYCLES_CB[opcode as usize]);
    }

    // ---------------------------------------------------------------------
    // ED prefix
    // ---------------------------------------------------------------------

    fn execute_ed_prefix<B: Bus>(&mut self, bus: &mut B) {
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);

        self.regs.pc = self.regs.pc.wrapping_add(1);
        let opcode = bus.mem_read(self.regs.pc);

        if self.execute_ed(bus, opcode) {
            self.add_cycles(CYCLES_ED[opcode as usize]);
        } else {
            // Unrecognised ED pair: an 8 T-state no-op.
            self.add_cycles(8);
        }
    }

    fn execute_ed<B: Bus>(&mut self, bus: &mut B, opcode: u8) -> bool {
        match opcode {
            // IN r, (C); r = 6 only sets flags.
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                let value = bus.io_read(self.regs.bc());
                self.regs.f = (self.regs.f & CF) | alu::in_flags(value);
                let reg = (opcode >> 3) & 7;
                if reg != 6 {
                    self.set_operand(bus, reg, value);
                }
            }

            // OUT (C), r; r = 6 writes zero.
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                let reg = (opcode >> 3) & 7;
                let value = if reg == 6 { 0 } else { self.get_operand(bus, reg) };
                bus.io_write(self.regs.bc(), value);
            }

            // SBC HL, rr / ADC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                let rr = self.get_reg16(opcode >> 4);
                let (result, flags) =
                    alu::sbc16(self.regs.hl(), rr, self.regs.f & CF != 0);
                self.regs.set_hl(result);
                self.regs.f = flags;
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                let rr = self.get_reg16(opcode >> 4);
                let (result, flags) =
                    alu::adc16(self.regs.hl(), rr, self.regs.f & CF != 0);
                self.regs.set_hl(result);
                self.regs.f = flags;
            }

            // LD (nn), rr / LD rr, (nn)
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.read_imm16(bus);
                let rr = self.get_reg16(opcode >> 4);
                bus.mem_write(addr, rr as u8);
                bus.mem_write(addr.wrapping_add(1), (rr >> 8) as u8);
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.read_imm16(bus);
                let lo = bus.mem_read(addr);
                let hi = bus.mem_read(addr.wrapping_add(1));
                self.set_reg16(opcode >> 4, u16::from(lo) | (u16::from(hi) << 8));
            }

            // NEG and its undocumented echoes.
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let r = alu::neg(self.regs.a);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }

            // RETN (all echoes) restores IFF1 from IFF2; RETI does not.
            0x45 | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => {
                self.regs.pc = self.pop_word(bus).wrapping_sub(1);
                self.regs.iff1 = self.regs.iff2;
            }
            0x4D => self.regs.pc = self.pop_word(bus).wrapping_sub(1),

            // IM 0/1/2 (documented and undocumented encodings).
            0x46 | 0x4E | 0x66 | 0x6E => self.regs.im = 0,
            0x56 | 0x76 => self.regs.im = 1,
            0x5E | 0x7E => self.regs.im = 2,

            // LD I, A / LD R, A (the one place R's high bit changes).
            0x47 => self.regs.i = self.regs.a,
            0x4F => self.regs.r = self.regs.a,

            // LD A, I / LD A, R set P from IFF2.
            0x57 => {
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }
            0x5F => {
                self.regs.a = self.regs.r;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }

            // RRD / RLD: nibble rotate through A and (HL).
            0x67 => {
                let addr = self.regs.hl();
                let value = bus.mem_read(addr);
                bus.mem_write(addr, (value >> 4) | (self.regs.a << 4));
                self.regs.a = (self.regs.a & 0xF0) | (value & 0x0F);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
            }
            0x6F => {
                let addr = self.regs.hl();
                let value = bus.mem_read(addr);
                bus.mem_write(addr, (value << 4) | (self.regs.a & 0x0F));
                self.regs.a = (self.regs.a & 0xF0) | (value >> 4);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
            }

            // Block transfers and their repeating forms.
            0xA0 => self.block_ld(bus, 1),
            0xA8 => self.block_ld(bus, -1),
            0xB0 => {
                self.block_ld(bus, 1);
                self.repeat_while(self.regs.bc() != 0);
            }
            0xB8 => {
                self.block_ld(bus, -1);
                self.repeat_while(self.regs.bc() != 0);
            }

            0xA1 => self.block_cp(bus, 1),
            0xA9 => self.block_cp(bus, -1),
            0xB1 => {
                self.block_cp(bus, 1);
                let go = self.regs.f & ZF == 0 && self.regs.bc() != 0;
                self.repeat_while(go);
            }
            0xB9 => {
                self.block_cp(bus, -1);
                let go = self.regs.f & ZF == 0 && self.regs.bc() != 0;
                self.repeat_while(go);
            }

            0xA2 => self.block_in(bus, 1),
            0xAA => self.block_in(bus, -1),
            0xB2 => {
                self.block_in(bus, 1);
                self.repeat_while(self.regs.b != 0);
            }
            0xBA => {
                self.block_in(bus, -1);
                self.repeat_while(self.regs.b != 0);
            }

            0xA3 => self.block_out(bus, 1),
            0xAB => self.block_out(bus, -1),
            0xB3 => {
                self.block_out(bus, 1);
                self.repeat_while(self.regs.b != 0);
            }
            0xBB => {
                self.block_out(bus, -1);
                self.repeat_while(self.regs.b != 0);
            }

            _ => return false,
        }
        true
    }

    /// Re-execute a repeating block instruction: back PC up over the two
    /// prefix bytes and charge the loop cycles.
    fn repeat_while(&mut self, condition: bool) {
        if condition {
            self.add_cycles(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// LDI / LDD. X and Y come from bits 3 and 1 of A + the copied byte.
    fn block_ld<B: Bus>(&mut self, bus: &mut B, step: i16) {
        let value = bus.mem_read(self.regs.hl());
        bus.mem_write(self.regs.de(), value);

        self.regs.set_de(self.regs.de().wrapping_add(step as u16));
        self.regs.set_hl(self.regs.hl().wrapping_add(step as u16));
        self.regs.set_bc(self.regs.bc().wrapping_sub(1));

        let n = self.regs.a.wrapping_add(value);
        let mut f = self.regs.f & (SF | ZF | CF);
        if self.regs.bc() != 0 {
            f |= PF;
        }
        f |= (n & 0x02) << 4; // bit 1 -> Y
        f |= n & 0x08; // bit 3 -> X
        self.regs.f = f;
    }

    /// CPI / CPD. X and Y come from bits 3 and 1 of A - (HL) - H.
    fn block_cp<B: Bus>(&mut self, bus: &mut B, step: i16) {
        let value = bus.mem_read(self.regs.hl());
        let cp = alu::cp8(self.regs.a, value);

        self.regs.set_hl(self.regs.hl().wrapping_add(step as u16));
        self.regs.set_bc(self.regs.bc().wrapping_sub(1));

        let h = u8::from(cp.flags & HF != 0);
        let n = self.regs.a.wrapping_sub(value).wrapping_sub(h);
        let mut f = (cp.flags & (SF | ZF | HF | NF)) | (self.regs.f & CF);
        if self.regs.bc() != 0 {
            f |= PF;
        }
        f |= (n & 0x02) << 4;
        f |= n & 0x08;
        self.regs.f = f;
    }

    /// INI / IND.
    fn block_in<B: Bus>(&mut self, bus: &mut B, step: i16) {
        let r = alu::dec8(self.regs.b);
        self.regs.b = r.value;
        self.regs.f = (self.regs.f & CF) | r.flags | NF;

        let value = bus.io_read((u16::from(self.regs.b) << 8) | u16::from(self.regs.c));
        bus.mem_write(self.regs.hl(), value);
        self.regs.set_hl(self.regs.hl().wrapping_add(step as u16));
    }

    /// OUTI / OUTD.
    fn block_out<B: Bus>(&mut self, bus: &mut B, step: i16) {
        let value = bus.mem_read(self.regs.hl());
        bus.io_write((u16::from(self.regs.b) << 8) | u16::from(self.regs.c), value);
        self.regs.set_hl(self.regs.hl().wrapping_add(step as u16));

        let r = alu::dec8(self.regs.b);
        self.regs.b = r.value;
        self.regs.f = (self.regs.f & CF) | r.flags | NF;
    }

    // ---------------------------------------------------------------------
    // DD/FD prefix
    // ---------------------------------------------------------------------

    fn index(&self, which: Index) -> u16 {
        match which {
            Index::Ix => self.regs.ix,
            Index::Iy => self.regs.iy,
        }
    }

    fn set_index(&mut self, which: Index, value: u16) {
        match which {
            Index::Ix => self.regs.ix = value,
            Index::Iy => self.regs.iy = value,
        }
    }

    /// 8-bit register lookup where H and L are replaced by the halves of the
    /// active index register (the undocumented IXH/IXL/IYH/IYL forms).
    fn get_reg8_indexed(&self, which: Index, code: u8) -> u8 {
        match code & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => (self.index(which) >> 8) as u8,
            5 => self.index(which) as u8,
            7 => self.regs.a,
            _ => unreachable!("(IX+d) handled by the caller"),
        }
    }

    fn set_reg8_indexed(&mut self, which: Index, code: u8, value: u8) {
        match code & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => {
                let idx = self.index(which);
                self.set_index(which, (idx & 0x00FF) | (u16::from(value) << 8));
            }
            5 => {
                let idx = self.index(which);
                self.set_index(which, (idx & 0xFF00) | u16::from(value));
            }
            7 => self.regs.a = value,
            _ => unreachable!("(IX+d) handled by the caller"),
        }
    }

    /// Effective address for `(IX+d)` / `(IY+d)`; advances PC onto the
    /// displacement byte.
    fn indexed_addr<B: Bus>(&mut self, bus: &mut B, which: Index) -> u16 {
        let disp = self.read_imm8(bus) as i8;
        self.index(which).wrapping_add(disp as u16)
    }

    fn execute_index_prefix<B: Bus>(&mut self, bus: &mut B, which: Index) {
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);

        self.regs.pc = self.regs.pc.wrapping_add(1);
        let opcode = bus.mem_read(self.regs.pc);

        if self.execute_index(bus, which, opcode) {
            self.add_cycles(CYCLES_DD[opcode as usize]);
        } else {
            // No indexed form: the prefix degrades to a NOP and the byte
            // re-decodes as a plain instruction. A DD/FD/ED here starts a
            // fresh prefix, so only the last prefix of a chain matters.
            self.regs.pc = self.regs.pc.wrapping_sub(1);
            self.add_cycles(CYCLES[0]);
        }
    }

    fn execute_index<B: Bus>(&mut self, bus: &mut B, which: Index, opcode: u8) -> bool {
        match opcode {
            // ADD idx, rr (0x29 adds the index register to itself).
            0x09 | 0x19 | 0x39 => {
                let rr = self.get_reg16(opcode >> 4);
                let (result, flags) = alu::add16(self.index(which), rr);
                self.set_index(which, result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }
            0x29 => {
                let idx = self.index(which);
                let (result, flags) = alu::add16(idx, idx);
                self.set_index(which, result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // LD idx, nn / LD (nn), idx / LD idx, (nn)
            0x21 => {
                let value = self.read_imm16(bus);
                self.set_index(which, value);
            }
            0x22 => {
                let addr = self.read_imm16(bus);
                let idx = self.index(which);
                bus.mem_write(addr, idx as u8);
                bus.mem_write(addr.wrapping_add(1), (idx >> 8) as u8);
            }
            0x2A => {
                let addr = self.read_imm16(bus);
                let lo = bus.mem_read(addr);
                let hi = bus.mem_read(addr.wrapping_add(1));
                self.set_index(which, u16::from(lo) | (u16::from(hi) << 8));
            }

            // INC idx / DEC idx
            0x23 => {
                let idx = self.index(which).wrapping_add(1);
                self.set_index(which, idx);
            }
            0x2B => {
                let idx = self.index(which).wrapping_sub(1);
                self.set_index(which, idx);
            }

            // INC/DEC/LD on the undocumented register halves.
            0x24 | 0x2C => {
                let code = (opcode >> 3) & 7;
                let r = alu::inc8(self.get_reg8_indexed(which, code));
                self.set_reg8_indexed(which, code, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }
            0x25 | 0x2D => {
                let code = (opcode >> 3) & 7;
                let r = alu::dec8(self.get_reg8_indexed(which, code));
                self.set_reg8_indexed(which, code, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }
            0x26 | 0x2E => {
                let value = self.read_imm8(bus);
                self.set_reg8_indexed(which, (opcode >> 3) & 7, value);
            }

            // INC (idx+d) / DEC (idx+d) / LD (idx+d), n
            0x34 => {
                let addr = self.indexed_addr(bus, which);
                let r = alu::inc8(bus.mem_read(addr));
                bus.mem_write(addr, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }
            0x35 => {
                let addr = self.indexed_addr(bus, which);
                let r = alu::dec8(bus.mem_read(addr));
                bus.mem_write(addr, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }
            0x36 => {
                let addr = self.indexed_addr(bus, which);
                let value = self.read_imm8(bus);
                bus.mem_write(addr, value);
            }

            // 8-bit loads touching the index halves or (idx+d). Loads that
            // involve neither (LD B, C and friends) have no indexed form
            // and degrade; so does 0x76 (HALT).
            0x40..=0x75 | 0x77..=0x7F => {
                let src = opcode & 7;
                let dst = (opcode >> 3) & 7;
                if !(4..=6).contains(&src) && !(4..=6).contains(&dst) {
                    return false;
                }
                if src == 6 {
                    let addr = self.indexed_addr(bus, which);
                    let value = bus.mem_read(addr);
                    // Destination uses the *plain* register file: LD H,(IX+d)
                    // writes H, not IXH.
                    self.set_operand(bus, dst, value);
                } else if dst == 6 {
                    let value = self.get_operand(bus, src);
                    let addr = self.indexed_addr(bus, which);
                    bus.mem_write(addr, value);
                } else {
                    let value = self.get_reg8_indexed(which, src);
                    self.set_reg8_indexed(which, dst, value);
                }
            }

            // ALU on A with index halves and (idx+d); plain-register forms
            // degrade.
            0x80..=0xBF => {
                let src = opcode & 7;
                if !(4..=6).contains(&src) {
                    return false;
                }
                let operand = if src == 6 {
                    let addr = self.indexed_addr(bus, which);
                    bus.mem_read(addr)
                } else {
                    self.get_reg8_indexed(which, src)
                };
                self.alu_a((opcode >> 3) & 7, operand);
            }

            // DDCB / FDCB
            0xCB => self.execute_index_cb(bus, which),

            // POP / PUSH / EX (SP) / JP / LD SP
            0xE1 => {
                let value = self.pop_word(bus);
                self.set_index(which, value);
            }
            0xE5 => {
                let idx = self.index(which);
                self.push_word(bus, idx);
            }
            0xE3 => {
                let sp = self.regs.sp;
                let lo = bus.mem_read(sp);
                let hi = bus.mem_read(sp.wrapping_add(1));
                let idx = self.index(which);
                bus.mem_write(sp, idx as u8);
                bus.mem_write(sp.wrapping_add(1), (idx >> 8) as u8);
                self.set_index(which, u16::from(lo) | (u16::from(hi) << 8));
            }
            0xE9 => self.regs.pc = self.index(which).wrapping_sub(1),
            0xF9 => self.regs.sp = self.index(which),

            _ => return false,
        }
        true
    }

    /// DDCB/FDCB: displacement, then opcode. Shift/rotate and RES/SET write
    /// the memory cell back and also mirror it into the register named by
    /// the low three bits (except 6) - the undocumented shift-and-store
    /// forms. BIT only tests.
    fn execute_index_cb<B: Bus>(&mut self, bus: &mut B, which: Index) {
        let addr = self.indexed_addr(bus, which);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        let opcode = bus.mem_read(self.regs.pc);
        let bit = (opcode >> 3) & 7;
        let reg = opcode & 7;

        let stored = match opcode >> 6 {
            0 => {
                let value = bus.mem_read(addr);
                let result = self.shift_op(bit, value);
                bus.mem_write(addr, result);
                Some(result)
            }
            1 => {
                let zero = bus.mem_read(addr) & (1 << bit) == 0;
                let mut f = (self.regs.f & (CF | YF | XF)) | HF;
                if zero {
                    f |= ZF | PF;
                }
                if bit == 7 && !zero {
                    f |= SF;
                }
                self.regs.f = f;
                None
            }
            2 => {
                let result = bus.mem_read(addr) & !(1 << bit);
                bus.mem_write(addr, result);
                Some(result)
            }
            _ => {
                let result = bus.mem_read(addr) | (1 << bit);
                bus.mem_write(addr, result);
                Some(result)
            }
        };

        if let Some(value) = stored {
            if reg != 6 {
                self.set_operand(bus, reg, value);
            }
        }

        self.add_cycles(CYCLES_CB[opcode as usize] + 8);
    }
}
