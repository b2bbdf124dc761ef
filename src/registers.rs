//! Register file, status flags and privilege rings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of general-purpose registers (R0..RF).
pub const GP_COUNT: usize = 16;
/// Initial stack pointer; the stack grows downward from here.
pub const SP_INIT: u16 = 0xFFFE;

/// Ring-based privilege level. Numerically smaller is more privileged.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Ring {
    /// Ring 0.
    Kernel = 0,
    /// Ring 1.
    Supervisor = 1,
    /// Ring 2; the level programs boot at.
    User = 2,
}

impl Ring {
    /// Returns `true` when this ring holds at least the privilege `required`
    /// demands.
    pub fn satisfies(&self, required: Ring) -> bool {
        (*self as u8) <= (required as u8)
    }
}

impl fmt::Display for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ring::Kernel => write!(f, "0 (kernel)"),
            Ring::Supervisor => write!(f, "1 (supervisor)"),
            Ring::User => write!(f, "2 (user)"),
        }
    }
}

/// The four status flags held in SR.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusFlags {
    /// Most recent ALU result was zero.
    pub zero: bool,
    /// Bit 15 of the most recent ALU result was set.
    pub negative: bool,
    /// Unsigned carry/borrow out of bit 15.
    pub carry: bool,
    /// Signed overflow.
    pub overflow: bool,
}

impl StatusFlags {
    const ZERO: u16 = 1 << 0;
    const NEGATIVE: u16 = 1 << 1;
    const CARRY: u16 = 1 << 2;
    const OVERFLOW: u16 = 1 << 3;

    /// Packs the flags into the low nibble of an SR word.
    pub fn to_bits(self) -> u16 {
        let mut sr = 0;
        if self.zero {
            sr |= Self::ZERO;
        }
        if self.negative {
            sr |= Self::NEGATIVE;
        }
        if self.carry {
            sr |= Self::CARRY;
        }
        if self.overflow {
            sr |= Self::OVERFLOW;
        }
        sr
    }

    /// Unpacks flags from an SR word.
    pub fn from_bits(sr: u16) -> Self {
        StatusFlags {
            zero: sr & Self::ZERO != 0,
            negative: sr & Self::NEGATIVE != 0,
            carry: sr & Self::CARRY != 0,
            overflow: sr & Self::OVERFLOW != 0,
        }
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Z={} N={} C={} V={}]",
            self.zero as u8, self.negative as u8, self.carry as u8, self.overflow as u8
        )
    }
}

/// Architectural register set.
///
/// Sixteen general-purpose registers R0..RF plus PC, SP, LR, SR and the
/// current privilege ring. R0 is hardwired to zero: reads always yield 0 and
/// writes are silently discarded. That discard is architectural, not an
/// error.
#[derive(Clone, Debug)]
pub struct RegisterFile {
    gp: [u16; GP_COUNT],
    pc: u16,
    sp: u16,
    lr: u16,
    sr: u16,
    ring: Ring,
}

impl RegisterFile {
    /// Index of the hardwired zero register.
    const ZERO_REG: u8 = 0;

    /// Creates the power-on register state: everything zeroed, SP at the top
    /// of the stack region, ring 2.
    pub fn new() -> Self {
        RegisterFile {
            gp: [0; GP_COUNT],
            pc: 0,
            sp: SP_INIT,
            lr: 0,
            sr: 0,
            ring: Ring::User,
        }
    }

    /// Reads general-purpose register `index` (masked to 4 bits).
    pub fn read(&self, index: u8) -> u16 {
        let index = index & 0xF;
        if index == Self::ZERO_REG {
            0
        } else {
            self.gp[index as usize]
        }
    }

    /// Writes general-purpose register `index` (masked to 4 bits).
    ///
    /// Writing R0 is a no-op, not an error.
    pub fn write(&mut self, index: u8, value: u16) {
        let index = index & 0xF;
        if index != Self::ZERO_REG {
            self.gp[index as usize] = value;
        }
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }

    pub fn sp(&self) -> u16 {
        self.sp
    }

    pub fn set_sp(&mut self, value: u16) {
        self.sp = value;
    }

    pub fn lr(&self) -> u16 {
        self.lr
    }

    pub fn set_lr(&mut self, value: u16) {
        self.lr = value;
    }

    /// Raw status register word.
    pub fn sr(&self) -> u16 {
        self.sr
    }

    /// Current status flags.
    pub fn flags(&self) -> StatusFlags {
        StatusFlags::from_bits(self.sr)
    }

    /// Replaces all four flags atomically.
    pub fn set_flags(&mut self, flags: StatusFlags) {
        self.sr = flags.to_bits();
    }

    /// Current privilege ring.
    pub fn ring(&self) -> Ring {
        self.ring
    }

    /// Changes the privilege ring.
    ///
    /// Crate-private: no instruction alters CPL directly; the syscall
    /// gateway is the only caller.
    pub(crate) fn set_ring(&mut self, ring: Ring) {
        self.ring = ring;
    }

    /// Formats the register state for diagnostics.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        out.push_str("General purpose:\n");
        for i in 0..GP_COUNT as u8 {
            out.push_str(&format!("  R{i:X}: {:#06X}", self.read(i)));
            if (i + 1) % 4 == 0 {
                out.push('\n');
            }
        }
        out.push_str(&format!(
            "PC: {:#06X}  SP: {:#06X}  LR: {:#06X}  SR: {:#06X} {}\n",
            self.pc,
            self.sp,
            self.lr,
            self.sr,
            self.flags()
        ));
        out.push_str(&format!("Ring: {}\n", self.ring));
        out
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_on_state() {
        let regs = RegisterFile::new();
        assert_eq!(regs.pc(), 0);
        assert_eq!(regs.sp(), SP_INIT);
        assert_eq!(regs.lr(), 0);
        assert_eq!(regs.sr(), 0);
        assert_eq!(regs.ring(), Ring::User);
        for i in 0..16 {
            assert_eq!(regs.read(i), 0);
        }
    }

    #[test]
    fn r0_reads_zero_and_discards_writes() {
        let mut regs = RegisterFile::new();
        regs.write(0, 0xFFFF);
        assert_eq!(regs.read(0), 0);
        regs.write(1, 0x1234);
        assert_eq!(regs.read(1), 0x1234);
    }

    #[test]
    fn register_index_is_masked() {
        let mut regs = RegisterFile::new();
        regs.write(0x15, 7);
        assert_eq!(regs.read(5), 7);
        // 0x10 masks down to the zero register.
        regs.write(0x10, 9);
        assert_eq!(regs.read(0x10), 0);
    }

    #[test]
    fn flags_roundtrip_through_sr() {
        let mut regs = RegisterFile::new();
        let flags = StatusFlags {
            zero: true,
            negative: false,
            carry: true,
            overflow: true,
        };
        regs.set_flags(flags);
        assert_eq!(regs.flags(), flags);
        assert_eq!(regs.sr(), 0b1101);
    }

    #[test]
    fn ring_order() {
        assert!(Ring::Kernel.satisfies(Ring::User));
        assert!(Ring::Kernel.satisfies(Ring::Kernel));
        assert!(!Ring::User.satisfies(Ring::Kernel));
        assert!(Ring::Supervisor.satisfies(Ring::User));
        assert!(!Ring::User.satisfies(Ring::Supervisor));
    }
}
