//! Architectural state snapshots.
//!
//! A [`Snapshot`] captures everything needed to reproduce a machine:
//! registers, the full memory image, the cycle counter and the halted flag.
//! Installed syscall handlers are host configuration, not architectural
//! state, and are not captured.

use crate::registers::{RegisterFile, Ring, GP_COUNT};
use crate::vm::Vm;
use serde::{Deserialize, Serialize};

/// Serializable register state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RegisterState {
    pub gp: [u16; GP_COUNT],
    pub pc: u16,
    pub sp: u16,
    pub lr: u16,
    pub sr: u16,
    pub ring: Ring,
}

/// A point-in-time copy of the machine's architectural state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub registers: RegisterState,
    /// All 65,536 memory cells.
    pub memory: Vec<u16>,
    pub cycles: u64,
    pub halted: bool,
}

impl Vm {
    /// Captures the current architectural state.
    pub fn snapshot(&self) -> Snapshot {
        let (regs, memory, cycles, halted) = self.raw_parts();
        let mut gp = [0u16; GP_COUNT];
        for (i, slot) in gp.iter_mut().enumerate() {
            *slot = regs.read(i as u8);
        }
        Snapshot {
            registers: RegisterState {
                gp,
                pc: regs.pc(),
                sp: regs.sp(),
                lr: regs.lr(),
                sr: regs.sr(),
                ring: regs.ring(),
            },
            memory: memory.cells().to_vec(),
            cycles,
            halted,
        }
    }

    /// Restores a previously captured state, replacing registers, memory,
    /// cycle counter and halted flag. Syscall handlers are untouched.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        let mut regs = RegisterFile::new();
        for (i, value) in snapshot.registers.gp.iter().enumerate() {
            regs.write(i as u8, *value);
        }
        regs.set_pc(snapshot.registers.pc);
        regs.set_sp(snapshot.registers.sp);
        regs.set_lr(snapshot.registers.lr);
        regs.set_flags(crate::registers::StatusFlags::from_bits(
            snapshot.registers.sr,
        ));
        regs.set_ring(snapshot.registers.ring);
        self.restore_parts(regs, &snapshot.memory, snapshot.cycles, snapshot.halted);
    }
}
