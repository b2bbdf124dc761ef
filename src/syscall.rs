//! Syscall gateway.
//!
//! A dispatch table maps syscall numbers to host-provided handlers, each
//! declaring the least privileged ring allowed to call it. On `SYSCALL` the
//! gateway reads the number from R1 and the arguments from R2..R5, checks
//! the caller's ring against the entry, runs the handler with a borrowed
//! view of the machine, and writes the handler's result back to R1.
//!
//! Handlers registered at ring 0 run with the memory access-flag checks
//! relaxed for the duration of the call, which is how "reality" operations
//! rewrite code or reserved cells without weakening the protection model
//! anywhere else.

use crate::errors::VmError;
use crate::memory::{MemFault, MemFaultKind, Memory};
use crate::registers::{RegisterFile, Ring};
use crate::vm::Vm;
use log::trace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

/// Console I/O: print one character from R2.
pub const SYS_PRINT_CHAR: u16 = 0x01;
/// Console I/O: print the zero-terminated word string at address R2.
pub const SYS_PRINT_STR: u16 = 0x02;
/// Console I/O: print R2 as a hex word.
pub const SYS_PRINT_HEX: u16 = 0x03;
/// Time query: low 16 bits of the cycle counter.
pub const SYS_GET_TIME: u16 = 0x10;

/// Failure reported by a syscall handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyscallError {
    /// A memory access performed through the context was rejected.
    #[error("memory fault ({kind:?}) at {addr:#06X}")]
    Memory {
        kind: MemFaultKind,
        addr: u16,
        ring: Ring,
    },
    /// Host-side failure with a diagnostic reason.
    #[error("{reason}")]
    Failed { reason: String },
}

impl From<MemFault> for SyscallError {
    fn from(fault: MemFault) -> Self {
        SyscallError::Memory {
            kind: fault.kind,
            addr: fault.addr,
            ring: fault.ring,
        }
    }
}

/// Borrowed view of the machine a handler operates on.
///
/// The borrow lasts exactly one handler call; handlers cannot retain it.
pub struct SyscallContext<'a> {
    regs: &'a mut RegisterFile,
    mem: &'a mut Memory,
    ring: Ring,
    cycles: u64,
}

impl SyscallContext<'_> {
    /// Argument register `index` of the call window R2..R5.
    pub fn arg(&self, index: u8) -> u16 {
        self.regs.read(2 + (index & 0x3))
    }

    /// Ring the calling code runs at.
    pub fn ring(&self) -> Ring {
        self.ring
    }

    /// Cycle count at the time of the call.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Reads a general-purpose register.
    pub fn read_register(&self, index: u8) -> u16 {
        self.regs.read(index)
    }

    /// Writes a general-purpose register. Writes to R0 are discarded.
    pub fn write_register(&mut self, index: u8, value: u16) {
        self.regs.write(index, value)
    }

    /// Reads memory with the caller's privilege.
    pub fn load_word(&self, addr: u16) -> Result<u16, SyscallError> {
        Ok(self.mem.load_word(addr, self.ring)?)
    }

    /// Writes memory with the caller's privilege.
    pub fn store_word(&mut self, addr: u16, value: u16) -> Result<(), SyscallError> {
        Ok(self.mem.store_word(addr, value, self.ring)?)
    }

    /// Changes the current privilege ring.
    ///
    /// The gateway is the only path that reaches CPL; plain instructions
    /// cannot get here.
    pub fn set_ring(&mut self, ring: Ring) {
        self.regs.set_ring(ring);
    }
}

/// A host-provided syscall handler.
pub trait SyscallHandler {
    /// Handles one syscall; the returned word is written to R1.
    fn call(&mut self, ctx: &mut SyscallContext<'_>) -> Result<u16, SyscallError>;
}

impl<F> SyscallHandler for F
where
    F: FnMut(&mut SyscallContext<'_>) -> Result<u16, SyscallError>,
{
    fn call(&mut self, ctx: &mut SyscallContext<'_>) -> Result<u16, SyscallError> {
        self(ctx)
    }
}

struct SyscallEntry {
    min_ring: Ring,
    handler: Box<dyn SyscallHandler>,
}

/// Dispatch table mapping syscall numbers to handlers.
#[derive(Default)]
pub struct SyscallTable {
    entries: HashMap<u16, SyscallEntry>,
}

impl SyscallTable {
    pub fn new() -> Self {
        SyscallTable {
            entries: HashMap::new(),
        }
    }

    /// Installs `handler` under `num`, callable from `min_ring` or better.
    /// Replaces any previous handler for the same number.
    pub fn install(&mut self, num: u16, min_ring: Ring, handler: impl SyscallHandler + 'static) {
        self.entries.insert(
            num,
            SyscallEntry {
                min_ring,
                handler: Box::new(handler),
            },
        );
    }

    /// Routes one `SYSCALL` trap. `pc` is the address of the trapping
    /// instruction, used for fault context.
    pub(crate) fn dispatch(
        &mut self,
        pc: u16,
        regs: &mut RegisterFile,
        mem: &mut Memory,
        cycles: u64,
    ) -> Result<(), VmError> {
        let num = regs.read(1);
        let ring = regs.ring();
        let entry = self
            .entries
            .get_mut(&num)
            .ok_or(VmError::UnknownSyscall { pc, num })?;
        if !ring.satisfies(entry.min_ring) {
            return Err(VmError::PrivilegeViolation { pc, num, ring });
        }
        trace!("syscall {num:#06X} from ring {ring}");

        let min_ring = entry.min_ring;
        let handler = &mut entry.handler;
        let result = if min_ring == Ring::Kernel {
            mem.with_protection_relaxed(|mem| {
                let mut ctx = SyscallContext {
                    regs: &mut *regs,
                    mem,
                    ring,
                    cycles,
                };
                handler.call(&mut ctx)
            })
        } else {
            let mut ctx = SyscallContext {
                regs: &mut *regs,
                mem: &mut *mem,
                ring,
                cycles,
            };
            handler.call(&mut ctx)
        };

        let value = result.map_err(|err| match err {
            SyscallError::Memory { kind, addr, ring } => MemFault { kind, addr, ring }.at(pc),
            SyscallError::Failed { reason } => VmError::SyscallFailed { pc, num, reason },
        })?;
        regs.write(1, value);
        Ok(())
    }
}

/// Buffered console device backing the ring-2 I/O syscalls.
///
/// The engine never prints; hosts drain the buffer whenever they like.
#[derive(Debug, Default)]
pub struct Console {
    output: String,
}

impl Console {
    pub fn new() -> Self {
        Console::default()
    }

    pub fn print_char(&mut self, c: char) {
        self.output.push(c);
    }

    pub fn print_str(&mut self, s: &str) {
        self.output.push_str(s);
    }

    /// Everything printed so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Drains and returns the buffered output.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Installs the console and time syscalls on `vm`, sharing `console`
    /// between the handlers.
    pub fn attach(console: &Rc<RefCell<Console>>, vm: &mut Vm) {
        let c = Rc::clone(console);
        vm.install_syscall(SYS_PRINT_CHAR, Ring::User, move |ctx: &mut SyscallContext| {
            let ch = (ctx.arg(0) & 0xFF) as u8 as char;
            c.borrow_mut().print_char(ch);
            Ok(0)
        });

        let c = Rc::clone(console);
        vm.install_syscall(SYS_PRINT_STR, Ring::User, move |ctx: &mut SyscallContext| {
            let mut addr = ctx.arg(0);
            let mut text = String::new();
            loop {
                let word = ctx.load_word(addr)?;
                if word == 0 {
                    break;
                }
                text.push((word & 0xFF) as u8 as char);
                addr = addr.wrapping_add(1);
            }
            let len = text.len() as u16;
            c.borrow_mut().print_str(&text);
            Ok(len)
        });

        let c = Rc::clone(console);
        vm.install_syscall(SYS_PRINT_HEX, Ring::User, move |ctx: &mut SyscallContext| {
            let value = ctx.arg(0);
            c.borrow_mut().print_str(&format!("{value:#06X}"));
            Ok(0)
        });

        vm.install_syscall(SYS_GET_TIME, Ring::User, |ctx: &mut SyscallContext| {
            Ok(ctx.cycles() as u16)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::StepOutcome;

    /// LOADI R1, num ; SYSCALL ; HALT
    fn syscall_program(num: u8) -> Vec<u16> {
        vec![0xC100 | num as u16, 0x0001, 0xFFFF]
    }

    #[test]
    fn unknown_syscall_faults() {
        let mut vm = Vm::new();
        vm.load_program(&syscall_program(0x42), 0).unwrap();
        let err = vm.run(10).unwrap_err();
        assert_eq!(
            err,
            VmError::UnknownSyscall {
                pc: 0x0001,
                num: 0x42
            }
        );
        assert!(!vm.is_halted());
    }

    #[test]
    fn handler_result_lands_in_r1() {
        let mut vm = Vm::new();
        vm.install_syscall(0x42, Ring::User, |_ctx: &mut SyscallContext| Ok(0xBEEF));
        vm.load_program(&syscall_program(0x42), 0).unwrap();
        vm.run(10).unwrap();
        assert_eq!(vm.registers().read(1), 0xBEEF);
        assert!(vm.is_halted());
    }

    #[test]
    fn args_come_from_r2_through_r5() {
        let mut vm = Vm::new();
        vm.install_syscall(0x07, Ring::User, |ctx: &mut SyscallContext| {
            Ok(ctx.arg(0) + ctx.arg(1) + ctx.arg(2) + ctx.arg(3))
        });
        // LOADI R1..R5, then SYSCALL.
        vm.load_program(
            &[0xC107, 0xC210, 0xC320, 0xC430, 0xC540, 0x0001, 0xFFFF],
            0,
        )
        .unwrap();
        vm.run(10).unwrap();
        assert_eq!(vm.registers().read(1), 0x10 + 0x20 + 0x30 + 0x40);
    }

    #[test]
    fn ring_gate_rejects_user_calls_to_privileged_handlers() {
        let mut vm = Vm::new();
        vm.install_syscall(0xA0, Ring::Kernel, |_ctx: &mut SyscallContext| Ok(0));
        vm.load_program(&syscall_program(0xA0), 0).unwrap();
        let err = vm.run(10).unwrap_err();
        assert_eq!(
            err,
            VmError::PrivilegeViolation {
                pc: 0x0001,
                num: 0xA0,
                ring: Ring::User,
            }
        );
    }

    #[test]
    fn privileged_caller_may_use_user_handlers() {
        let mut vm = Vm::new();
        vm.registers_mut().set_ring(Ring::Kernel);
        vm.install_syscall(0x01, Ring::User, |_ctx: &mut SyscallContext| Ok(7));
        vm.load_program(&syscall_program(0x01), 0).unwrap();
        vm.run(10).unwrap();
        assert_eq!(vm.registers().read(1), 7);
    }

    #[test]
    fn ring0_handler_writes_reserved_and_code_cells() {
        let mut vm = Vm::new();
        vm.registers_mut().set_ring(Ring::Kernel);
        vm.install_syscall(0xA0, Ring::Kernel, |ctx: &mut SyscallContext| {
            ctx.store_word(0xFFFE, 0x1234)?;
            ctx.store_word(0x00F0, 0x5678)?;
            Ok(0)
        });
        vm.load_program(&syscall_program(0xA0), 0).unwrap();
        vm.run(10).unwrap();
        assert_eq!(vm.memory().cells()[0xFFFE], 0x1234);
        assert_eq!(vm.memory().cells()[0x00F0], 0x5678);
        // Relaxation ended with the handler: a plain store still faults.
        assert!(vm
            .memory_mut()
            .store_word(0xFFFE, 0, Ring::Kernel)
            .is_err());
    }

    #[test]
    fn user_handler_cannot_reach_reserved_cells() {
        let mut vm = Vm::new();
        vm.install_syscall(0x33, Ring::User, |ctx: &mut SyscallContext| {
            ctx.store_word(0xFFFE, 1)?;
            Ok(0)
        });
        vm.load_program(&syscall_program(0x33), 0).unwrap();
        let err = vm.run(10).unwrap_err();
        assert_eq!(
            err,
            VmError::ProtectionFault {
                pc: 0x0001,
                addr: 0xFFFE,
                ring: Ring::User,
            }
        );
    }

    #[test]
    fn host_failure_surfaces_with_context() {
        let mut vm = Vm::new();
        vm.install_syscall(0x08, Ring::User, |_ctx: &mut SyscallContext| {
            Err(SyscallError::Failed {
                reason: "device detached".into(),
            })
        });
        vm.load_program(&syscall_program(0x08), 0).unwrap();
        let err = vm.run(10).unwrap_err();
        assert_eq!(
            err,
            VmError::SyscallFailed {
                pc: 0x0001,
                num: 0x08,
                reason: "device detached".into(),
            }
        );
    }

    #[test]
    fn gateway_may_change_rings() {
        let mut vm = Vm::new();
        vm.install_syscall(0x90, Ring::User, |ctx: &mut SyscallContext| {
            ctx.set_ring(Ring::Supervisor);
            Ok(0)
        });
        vm.load_program(&syscall_program(0x90), 0).unwrap();
        vm.run(10).unwrap();
        assert_eq!(vm.registers().ring(), Ring::Supervisor);
    }

    #[test]
    fn console_prints_chars_and_hex() {
        let console = Rc::new(RefCell::new(Console::new()));
        let mut vm = Vm::new();
        Console::attach(&console, &mut vm);
        vm.load_program(
            &[
                0xC248, // LOADI R2, 'H'
                0xC101, // LOADI R1, PRINT_CHAR
                0x0001, // SYSCALL
                0xC22A, // LOADI R2, 0x2A
                0xC103, // LOADI R1, PRINT_HEX
                0x0001, // SYSCALL
                0xFFFF,
            ],
            0,
        )
        .unwrap();
        vm.run(20).unwrap();
        assert_eq!(console.borrow().output(), "H0x002A");
    }

    #[test]
    fn console_prints_zero_terminated_string() {
        let console = Rc::new(RefCell::new(Console::new()));
        let mut vm = Vm::new();
        Console::attach(&console, &mut vm);
        // "OK\0" at 0x0200.
        vm.memory_mut()
            .load_words(&[b'O' as u16, b'K' as u16, 0], 0x0200)
            .unwrap();
        vm.load_program(
            &[
                0xC302, // LOADI R3, 0x02
                0xC408, // LOADI R4, 0x08
                0x8234, // SHL R2, R3, R4  -> R2 = 0x0200
                0xC102, // LOADI R1, PRINT_STR
                0x0001, // SYSCALL
                0xFFFF,
            ],
            0,
        )
        .unwrap();
        vm.run(20).unwrap();
        assert_eq!(console.borrow().output(), "OK");
        // Handler returned the string length in R1.
        assert_eq!(vm.registers().read(1), 2);
    }

    #[test]
    fn get_time_returns_cycle_count() {
        let mut vm = Vm::new();
        let console = Rc::new(RefCell::new(Console::new()));
        Console::attach(&console, &mut vm);
        vm.load_program(&syscall_program(SYS_GET_TIME as u8), 0)
            .unwrap();
        assert_eq!(vm.step(), Ok(StepOutcome::Continue)); // LOADI
        assert_eq!(vm.step(), Ok(StepOutcome::Continue)); // SYSCALL, cycle 2
        assert_eq!(vm.registers().read(1), 2);
    }
}
