//! Instruction decoder.
//!
//! [`decode`] is a pure, total function from a 16-bit word to a decoded
//! instruction record: every word decodes, and words with no assigned
//! encoding decode to [`Instr::Illegal`] rather than failing. Ignored fields
//! (JMP's rd, NOT's rt) are retained in the record, so [`Instr::encode`] is
//! an exact inverse over the whole 16-bit space.

use crate::isa::{InstrFormat, Opcode, HALT_WORD, NOP_WORD, SYSCALL_WORD};
use std::fmt;

/// A decoded instruction.
///
/// One variant per instruction of the base ISA, plus the singleton system
/// encodings and the distinguished [`Instr::Illegal`] variant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Instr {
    /// `0x0000`; advances PC and nothing else.
    Nop,
    /// `0x0001`; traps into the syscall gateway.
    Syscall,
    Add { rd: u8, rs: u8, rt: u8 },
    Addi { rd: u8, imm: u8 },
    Sub { rd: u8, rs: u8, rt: u8 },
    And { rd: u8, rs: u8, rt: u8 },
    Or { rd: u8, rs: u8, rt: u8 },
    Xor { rd: u8, rs: u8, rt: u8 },
    /// rt is encoded but ignored.
    Not { rd: u8, rs: u8, rt: u8 },
    Shl { rd: u8, rs: u8, rt: u8 },
    Shr { rd: u8, rs: u8, rt: u8 },
    Load { rd: u8, rs: u8, off: i8 },
    Store { rd: u8, rs: u8, off: i8 },
    Loadi { rd: u8, imm: u8 },
    /// rd is encoded but ignored.
    Jmp { rd: u8, off: i8 },
    Beq { rd: u8, off: i8 },
    Bne { rd: u8, off: i8 },
    /// `0xFFFF`.
    Halt,
    /// Any word with no assigned encoding; executing it faults.
    Illegal { word: u16 },
}

/// Sign-extends the low 4 bits of an M-type offset field.
fn sext4(field: u16) -> i8 {
    let field = (field & 0xF) as i8;
    if field & 0x8 != 0 {
        field | !0xF
    } else {
        field
    }
}

/// Decodes one instruction word.
///
/// `0xFFFF` is recognized as HALT before any opcode-nibble dispatch would
/// claim it for BNE.
pub fn decode(word: u16) -> Instr {
    if word == HALT_WORD {
        return Instr::Halt;
    }
    let op = match Opcode::from_word(word) {
        Some(op) => op,
        None => {
            // System nibble: only the two singleton words are assigned.
            return match word {
                NOP_WORD => Instr::Nop,
                SYSCALL_WORD => Instr::Syscall,
                _ => Instr::Illegal { word },
            };
        }
    };

    let rd = ((word >> 8) & 0xF) as u8;
    match op.format() {
        InstrFormat::RType => {
            let rs = ((word >> 4) & 0xF) as u8;
            let rt = (word & 0xF) as u8;
            match op {
                Opcode::Add => Instr::Add { rd, rs, rt },
                Opcode::Sub => Instr::Sub { rd, rs, rt },
                Opcode::And => Instr::And { rd, rs, rt },
                Opcode::Or => Instr::Or { rd, rs, rt },
                Opcode::Xor => Instr::Xor { rd, rs, rt },
                Opcode::Not => Instr::Not { rd, rs, rt },
                Opcode::Shl => Instr::Shl { rd, rs, rt },
                Opcode::Shr => Instr::Shr { rd, rs, rt },
                _ => Instr::Illegal { word },
            }
        }
        InstrFormat::IType => {
            let imm = (word & 0xFF) as u8;
            match op {
                Opcode::Addi => Instr::Addi { rd, imm },
                Opcode::Loadi => Instr::Loadi { rd, imm },
                _ => Instr::Illegal { word },
            }
        }
        InstrFormat::MType => {
            let rs = ((word >> 4) & 0xF) as u8;
            let off = sext4(word);
            match op {
                Opcode::Load => Instr::Load { rd, rs, off },
                Opcode::Store => Instr::Store { rd, rs, off },
                _ => Instr::Illegal { word },
            }
        }
        InstrFormat::Control => {
            let off = (word & 0xFF) as u8 as i8;
            match op {
                Opcode::Jmp => Instr::Jmp { rd, off },
                Opcode::Beq => Instr::Beq { rd, off },
                Opcode::Bne => Instr::Bne { rd, off },
                _ => Instr::Illegal { word },
            }
        }
    }
}

impl Instr {
    /// Opcode of this instruction, when it has a nibble-dispatched one.
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Instr::Add { .. } => Some(Opcode::Add),
            Instr::Addi { .. } => Some(Opcode::Addi),
            Instr::Sub { .. } => Some(Opcode::Sub),
            Instr::And { .. } => Some(Opcode::And),
            Instr::Or { .. } => Some(Opcode::Or),
            Instr::Xor { .. } => Some(Opcode::Xor),
            Instr::Not { .. } => Some(Opcode::Not),
            Instr::Shl { .. } => Some(Opcode::Shl),
            Instr::Shr { .. } => Some(Opcode::Shr),
            Instr::Load { .. } => Some(Opcode::Load),
            Instr::Store { .. } => Some(Opcode::Store),
            Instr::Loadi { .. } => Some(Opcode::Loadi),
            Instr::Jmp { .. } => Some(Opcode::Jmp),
            Instr::Beq { .. } => Some(Opcode::Beq),
            Instr::Bne { .. } => Some(Opcode::Bne),
            Instr::Nop | Instr::Syscall | Instr::Halt | Instr::Illegal { .. } => None,
        }
    }

    /// Re-encodes the instruction to its word form.
    ///
    /// Inverse of [`decode`]: `decode(w).encode() == w` for every 16-bit
    /// `w`, including illegal words, which carry their encoding.
    pub fn encode(&self) -> u16 {
        fn r(op: Opcode, rd: u8, rs: u8, rt: u8) -> u16 {
            ((op as u16) << 12)
                | ((rd as u16 & 0xF) << 8)
                | ((rs as u16 & 0xF) << 4)
                | (rt as u16 & 0xF)
        }
        fn i(op: Opcode, rd: u8, imm: u8) -> u16 {
            ((op as u16) << 12) | ((rd as u16 & 0xF) << 8) | imm as u16
        }
        fn m(op: Opcode, rd: u8, rs: u8, off: i8) -> u16 {
            ((op as u16) << 12)
                | ((rd as u16 & 0xF) << 8)
                | ((rs as u16 & 0xF) << 4)
                | (off as u16 & 0xF)
        }
        fn c(op: Opcode, rd: u8, off: i8) -> u16 {
            ((op as u16) << 12) | ((rd as u16 & 0xF) << 8) | (off as u8 as u16)
        }

        match *self {
            Instr::Nop => NOP_WORD,
            Instr::Syscall => SYSCALL_WORD,
            Instr::Add { rd, rs, rt } => r(Opcode::Add, rd, rs, rt),
            Instr::Sub { rd, rs, rt } => r(Opcode::Sub, rd, rs, rt),
            Instr::And { rd, rs, rt } => r(Opcode::And, rd, rs, rt),
            Instr::Or { rd, rs, rt } => r(Opcode::Or, rd, rs, rt),
            Instr::Xor { rd, rs, rt } => r(Opcode::Xor, rd, rs, rt),
            Instr::Not { rd, rs, rt } => r(Opcode::Not, rd, rs, rt),
            Instr::Shl { rd, rs, rt } => r(Opcode::Shl, rd, rs, rt),
            Instr::Shr { rd, rs, rt } => r(Opcode::Shr, rd, rs, rt),
            Instr::Addi { rd, imm } => i(Opcode::Addi, rd, imm),
            Instr::Loadi { rd, imm } => i(Opcode::Loadi, rd, imm),
            Instr::Load { rd, rs, off } => m(Opcode::Load, rd, rs, off),
            Instr::Store { rd, rs, off } => m(Opcode::Store, rd, rs, off),
            Instr::Jmp { rd, off } => c(Opcode::Jmp, rd, off),
            Instr::Beq { rd, off } => c(Opcode::Beq, rd, off),
            Instr::Bne { rd, off } => c(Opcode::Bne, rd, off),
            Instr::Halt => HALT_WORD,
            Instr::Illegal { word } => word,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Instr::Nop => write!(f, "NOP"),
            Instr::Syscall => write!(f, "SYSCALL"),
            Instr::Add { rd, rs, rt }
            | Instr::Sub { rd, rs, rt }
            | Instr::And { rd, rs, rt }
            | Instr::Or { rd, rs, rt }
            | Instr::Xor { rd, rs, rt }
            | Instr::Shl { rd, rs, rt }
            | Instr::Shr { rd, rs, rt } => {
                let m = self.opcode().map(|op| op.mnemonic()).unwrap_or("?");
                write!(f, "{m} R{rd:X}, R{rs:X}, R{rt:X}")
            }
            Instr::Not { rd, rs, .. } => write!(f, "NOT R{rd:X}, R{rs:X}"),
            Instr::Addi { rd, imm } => write!(f, "ADDI R{rd:X}, {imm:#04X}"),
            Instr::Loadi { rd, imm } => write!(f, "LOADI R{rd:X}, {imm:#04X}"),
            Instr::Load { rd, rs, off } => write!(f, "LOAD R{rd:X}, R{rs:X}, {off}"),
            Instr::Store { rd, rs, off } => write!(f, "STORE R{rd:X}, R{rs:X}, {off}"),
            Instr::Jmp { off, .. } => write!(f, "JMP {off}"),
            Instr::Beq { rd, off } => write!(f, "BEQ R{rd:X}, {off}"),
            Instr::Bne { rd, off } => write!(f, "BNE R{rd:X}, {off}"),
            Instr::Halt => write!(f, "HALT"),
            Instr::Illegal { word } => write!(f, "ILLEGAL {word:#06X}"),
        }
    }
}
