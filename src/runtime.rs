use std::cmp::Ordering;
use std::io::{self, Write};

use colored::Colorize;
use miette::{IntoDiagnostic, Result};

use crate::error;
use crate::interrupt;
use crate::mem::Memory;

/// Execution always starts here, regardless of image origin.
const PC_START: u16 = 0x3000;

// Trap vectors
const TRAP_GETC: u16 = 0x20;
const TRAP_OUT: u16 = 0x21;
const TRAP_PUTS: u16 = 0x22;
const TRAP_IN: u16 = 0x23;
const TRAP_PUTSP: u16 = 0x24;
const TRAP_HALT: u16 = 0x25;

/// Represents complete program state during runtime.
pub struct RunState {
    /// System memory with the keyboard device mapped in.
    mem: Memory,
    /// Program counter
    pc: u16,
    /// 8x 16-bit registers
    reg: [u16; 8],
    /// Condition code
    flag: RunFlag,
    /// Sink for the character output traps
    out: Box<dyn Write>,
}

/// Condition code. Exactly one value holds after any flag-setting operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunFlag {
    N = 0b100,
    Z = 0b010,
    P = 0b001,
}

/// How a finished run left the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    /// The HALT trap was executed.
    Halt,
    /// An interrupt request arrived between instructions.
    Interrupt,
}

/// Outcome of a single fetch-decode-execute step.
enum Step {
    Continue,
    Halt,
    Interrupt,
}

/// The 16 opcodes of the architecture, by top-nibble value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Opcode {
    Br,
    Add,
    Ld,
    St,
    Jsr,
    And,
    Ldr,
    Str,
    Rti,
    Not,
    Ldi,
    Sti,
    Jmp,
    Res,
    Lea,
    Trap,
}

impl Opcode {
    fn decode(instr: u16) -> Opcode {
        match instr >> 12 {
            0x0 => Opcode::Br,
            0x1 => Opcode::Add,
            0x2 => Opcode::Ld,
            0x3 => Opcode::St,
            0x4 => Opcode::Jsr,
            0x5 => Opcode::And,
            0x6 => Opcode::Ldr,
            0x7 => Opcode::Str,
            0x8 => Opcode::Rti,
            0x9 => Opcode::Not,
            0xA => Opcode::Ldi,
            0xB => Opcode::Sti,
            0xC => Opcode::Jmp,
            0xD => Opcode::Res,
            0xE => Opcode::Lea,
            0xF => Opcode::Trap,
            // A 16-bit word shifted right by 12 has no other values.
            _ => unreachable!(),
        }
    }
}

/// Sign-extend the low `bits` bits of `val` to a full 16-bit word.
#[inline]
fn s_ext(val: u16, bits: u32) -> u16 {
    debug_assert!(bits > 0 && bits < 16);
    let magnitude = val & ((1 << bits) - 1);
    if magnitude & (1 << (bits - 1)) != 0 {
        magnitude | (u16::MAX << bits)
    } else {
        magnitude
    }
}

/// Destination or source register field, bits 11..9.
#[inline]
fn dr(instr: u16) -> u16 {
    (instr >> 9) & 0b111
}

/// Second register field, bits 8..6.
#[inline]
fn sr(instr: u16) -> u16 {
    (instr >> 6) & 0b111
}

impl RunState {
    pub fn new(mem: Memory, out: Box<dyn Write>) -> RunState {
        RunState {
            mem,
            pc: PC_START,
            reg: [0; 8],
            flag: RunFlag::Z,
            out,
        }
    }

    /// Run with preset memory until HALT or an interrupt request.
    pub fn run(&mut self) -> Result<Exit> {
        loop {
            if interrupt::pending() {
                return Ok(Exit::Interrupt);
            }
            match self.step()? {
                Step::Continue => {}
                Step::Halt => return Ok(Exit::Halt),
                Step::Interrupt => return Ok(Exit::Interrupt),
            }
        }
    }

    fn step(&mut self) -> Result<Step> {
        let instr_addr = self.pc;
        let instr = self.mem.read(self.pc);
        // PC is incremented before the instruction is performed, so every
        // PC-relative offset is relative to the following address.
        self.pc = self.pc.wrapping_add(1);

        match Opcode::decode(instr) {
            Opcode::Br => self.br(instr),
            Opcode::Add => self.add(instr),
            Opcode::Ld => self.ld(instr),
            Opcode::St => self.st(instr),
            Opcode::Jsr => self.jsr(instr),
            Opcode::And => self.and(instr),
            Opcode::Ldr => self.ldr(instr),
            Opcode::Str => self.str(instr),
            Opcode::Not => self.not(instr),
            Opcode::Ldi => self.ldi(instr),
            Opcode::Sti => self.sti(instr),
            Opcode::Jmp => self.jmp(instr),
            Opcode::Lea => self.lea(instr),
            Opcode::Trap => return self.trap(instr, instr_addr),
            Opcode::Rti | Opcode::Res => {
                return Err(error::illegal_instruction(instr, instr_addr))
            }
        }
        Ok(Step::Continue)
    }

    #[inline]
    fn reg(&self, reg: u16) -> u16 {
        self.reg[reg as usize & 0b111]
    }

    #[inline]
    fn reg_mut(&mut self, reg: u16) -> &mut u16 {
        &mut self.reg[reg as usize & 0b111]
    }

    #[inline]
    fn set_flags(&mut self, val: u16) {
        self.flag = match (val as i16).cmp(&0) {
            Ordering::Less => RunFlag::N,
            Ordering::Equal => RunFlag::Z,
            Ordering::Greater => RunFlag::P,
        }
    }

    fn add(&mut self, instr: u16) {
        let lhs = self.reg(sr(instr));
        // Bit 5 selects immediate mode
        let rhs = if instr & 0x20 != 0 {
            s_ext(instr, 5)
        } else {
            self.reg(instr & 0b111)
        };
        let res = lhs.wrapping_add(rhs);
        *self.reg_mut(dr(instr)) = res;
        self.set_flags(res);
    }

    fn and(&mut self, instr: u16) {
        let lhs = self.reg(sr(instr));
        let rhs = if instr & 0x20 != 0 {
            s_ext(instr, 5)
        } else {
            self.reg(instr & 0b111)
        };
        let res = lhs & rhs;
        *self.reg_mut(dr(instr)) = res;
        self.set_flags(res);
    }

    fn not(&mut self, instr: u16) {
        let res = !self.reg(sr(instr));
        *self.reg_mut(dr(instr)) = res;
        self.set_flags(res);
    }

    fn br(&mut self, instr: u16) {
        // Bits 11..9 form the condition mask: n, z, p.
        let mask = dr(instr);
        if self.flag as u16 & mask != 0 {
            self.pc = self.pc.wrapping_add(s_ext(instr, 9));
        }
    }

    fn jmp(&mut self, instr: u16) {
        self.pc = self.reg(sr(instr));
    }

    fn jsr(&mut self, instr: u16) {
        *self.reg_mut(7) = self.pc;
        // Bit 11 selects a PC-relative call over a register-indirect one
        if instr & 0x800 != 0 {
            self.pc = self.pc.wrapping_add(s_ext(instr, 11));
        } else {
            self.pc = self.reg(sr(instr));
        }
    }

    fn ld(&mut self, instr: u16) {
        let val = self.mem.read(self.pc.wrapping_add(s_ext(instr, 9)));
        *self.reg_mut(dr(instr)) = val;
        self.set_flags(val);
    }

    fn ldi(&mut self, instr: u16) {
        let ptr = self.mem.read(self.pc.wrapping_add(s_ext(instr, 9)));
        let val = self.mem.read(ptr);
        *self.reg_mut(dr(instr)) = val;
        self.set_flags(val);
    }

    fn ldr(&mut self, instr: u16) {
        let base = self.reg(sr(instr));
        let val = self.mem.read(base.wrapping_add(s_ext(instr, 6)));
        *self.reg_mut(dr(instr)) = val;
        self.set_flags(val);
    }

    fn lea(&mut self, instr: u16) {
        let val = self.pc.wrapping_add(s_ext(instr, 9));
        *self.reg_mut(dr(instr)) = val;
        self.set_flags(val);
    }

    fn st(&mut self, instr: u16) {
        let val = self.reg(dr(instr));
        self.mem.write(self.pc.wrapping_add(s_ext(instr, 9)), val);
    }

    fn sti(&mut self, instr: u16) {
        let val = self.reg(dr(instr));
        let ptr = self.mem.read(self.pc.wrapping_add(s_ext(instr, 9)));
        self.mem.write(ptr, val);
    }

    fn str(&mut self, instr: u16) {
        let val = self.reg(dr(instr));
        let base = self.reg(sr(instr));
        self.mem.write(base.wrapping_add(s_ext(instr, 6)), val);
    }

    fn trap(&mut self, instr: u16, instr_addr: u16) -> Result<Step> {
        // Return address is saved before the trap body runs
        *self.reg_mut(7) = self.pc;

        match instr & 0xFF {
            TRAP_GETC => {
                let Some(ch) = self.read_input()? else {
                    return Ok(Step::Interrupt);
                };
                *self.reg_mut(0) = u16::from(ch);
                self.set_flags(u16::from(ch));
            }
            TRAP_OUT => {
                let byte = self.reg(0) as u8;
                self.out.write_all(&[byte]).into_diagnostic()?;
                self.out.flush().into_diagnostic()?;
            }
            TRAP_PUTS => {
                // One character per word, low byte only
                let mut addr = self.reg(0);
                loop {
                    let word = self.mem.read(addr);
                    if word == 0 {
                        break;
                    }
                    self.out.write_all(&[word as u8]).into_diagnostic()?;
                    addr = addr.wrapping_add(1);
                }
                self.out.flush().into_diagnostic()?;
            }
            TRAP_IN => {
                self.out
                    .write_all(b"Enter a character: ")
                    .into_diagnostic()?;
                self.out.flush().into_diagnostic()?;
                let Some(ch) = self.read_input()? else {
                    return Ok(Step::Interrupt);
                };
                self.out.write_all(&[ch]).into_diagnostic()?;
                self.out.flush().into_diagnostic()?;
                *self.reg_mut(0) = u16::from(ch);
                self.set_flags(u16::from(ch));
            }
            TRAP_PUTSP => {
                // Two packed characters per word, low byte first
                let mut addr = self.reg(0);
                loop {
                    let word = self.mem.read(addr);
                    if word == 0 {
                        break;
                    }
                    for byte in [word as u8, (word >> 8) as u8] {
                        if byte != 0 {
                            self.out.write_all(&[byte]).into_diagnostic()?;
                        }
                    }
                    addr = addr.wrapping_add(1);
                }
                self.out.flush().into_diagnostic()?;
            }
            TRAP_HALT => {
                writeln!(self.out, "\n{:>12}", "Halted".cyan()).into_diagnostic()?;
                self.out.flush().into_diagnostic()?;
                return Ok(Step::Halt);
            }
            vector => return Err(error::unknown_trap(vector, instr_addr)),
        }
        Ok(Step::Continue)
    }

    /// Blocking read of one character. `None` means an interrupt request
    /// arrived mid-read.
    fn read_input(&mut self) -> Result<Option<u8>> {
        match self.mem.keyboard_mut().read() {
            Ok(ch) => Ok(Some(ch)),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(error::input_failure(err)),
        }
    }
}
