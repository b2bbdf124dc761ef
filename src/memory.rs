//! Protected linear memory.
//!
//! A flat array of 65,536 word cells, partitioned into four fixed regions
//! with distinct access flags and minimum privilege rings. Every access goes
//! through one gatekeeper check; no other code path reads the caller's ring.

use crate::errors::VmError;
use crate::registers::Ring;
use log::debug;

/// Total number of addressable cells.
pub const MEMORY_CELLS: usize = 0x1_0000;
/// First address of the data region.
pub const DATA_START: u16 = 0x0100;
/// First address of the stack region.
pub const STACK_START: u16 = 0xF000;
/// First address of the reserved region.
pub const RESERVED_START: u16 = 0xFFFE;

/// What an access attempts to do with a cell.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

/// Kind of memory violation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemFaultKind {
    /// The caller's ring does not satisfy the region's minimum ring.
    Protection,
    /// The operation is not in the region's access flags.
    InvalidAccess,
}

/// A rejected memory access, before the VM attaches the faulting PC.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemFault {
    pub kind: MemFaultKind,
    pub addr: u16,
    pub ring: Ring,
}

impl MemFault {
    /// Converts the fault into an embedder-visible error at `pc`.
    pub(crate) fn at(self, pc: u16) -> VmError {
        match self.kind {
            MemFaultKind::Protection => VmError::ProtectionFault {
                pc,
                addr: self.addr,
                ring: self.ring,
            },
            MemFaultKind::InvalidAccess => VmError::InvalidAccess {
                pc,
                addr: self.addr,
                ring: self.ring,
            },
        }
    }
}

/// One entry of the fixed region table.
struct Region {
    name: &'static str,
    start: u16,
    end: u16,
    read: bool,
    write: bool,
    execute: bool,
    min_ring: Ring,
}

const REGIONS: [Region; 4] = [
    Region {
        name: "code",
        start: 0x0000,
        end: 0x00FF,
        read: true,
        write: false,
        execute: true,
        min_ring: Ring::User,
    },
    Region {
        name: "data",
        start: DATA_START,
        end: 0xEFFF,
        read: true,
        write: true,
        execute: false,
        min_ring: Ring::User,
    },
    Region {
        name: "stack",
        start: STACK_START,
        end: 0xFFFD,
        read: true,
        write: true,
        execute: false,
        min_ring: Ring::User,
    },
    Region {
        name: "reserved",
        start: RESERVED_START,
        end: 0xFFFF,
        read: false,
        write: false,
        execute: false,
        min_ring: Ring::Kernel,
    },
];

/// The table covers the full address space, so this lookup is total.
fn region_for(addr: u16) -> &'static Region {
    REGIONS
        .iter()
        .find(|r| addr >= r.start && addr <= r.end)
        .unwrap_or(&REGIONS[3])
}

/// Word-addressable protected memory.
pub struct Memory {
    cells: Vec<u16>,
    relaxed: bool,
}

impl Memory {
    /// Creates zeroed memory with protection active.
    pub fn new() -> Self {
        Memory {
            cells: vec![0; MEMORY_CELLS],
            relaxed: false,
        }
    }

    fn check(&self, addr: u16, access: Access, ring: Ring) -> Result<(), MemFault> {
        let region = region_for(addr);
        if !ring.satisfies(region.min_ring) {
            debug!(
                "ring {ring} denied {access:?} of {addr:#06X} ({} region)",
                region.name
            );
            return Err(MemFault {
                kind: MemFaultKind::Protection,
                addr,
                ring,
            });
        }
        if self.relaxed {
            return Ok(());
        }
        let permitted = match access {
            Access::Read => region.read,
            Access::Write => region.write,
            Access::Execute => region.execute,
        };
        if !permitted {
            debug!(
                "{access:?} of {addr:#06X} not permitted in {} region",
                region.name
            );
            return Err(MemFault {
                kind: MemFaultKind::InvalidAccess,
                addr,
                ring,
            });
        }
        Ok(())
    }

    /// Reads the cell at `addr` on behalf of a caller at `ring`.
    pub fn load_word(&self, addr: u16, ring: Ring) -> Result<u16, MemFault> {
        self.check(addr, Access::Read, ring)?;
        Ok(self.cells[addr as usize])
    }

    /// Writes the cell at `addr` on behalf of a caller at `ring`.
    pub fn store_word(&mut self, addr: u16, value: u16, ring: Ring) -> Result<(), MemFault> {
        self.check(addr, Access::Write, ring)?;
        self.cells[addr as usize] = value;
        Ok(())
    }

    /// Reads the cell at `addr` for execution.
    pub fn fetch_instruction(&self, addr: u16, ring: Ring) -> Result<u16, MemFault> {
        self.check(addr, Access::Execute, ring)?;
        Ok(self.cells[addr as usize])
    }

    /// Copies a word image into memory at `base`, bypassing access checks.
    ///
    /// Host-side loading refuses to overflow memory bounds or touch the
    /// reserved region.
    pub fn load_words(&mut self, words: &[u16], base: u16) -> Result<(), VmError> {
        let end = base as usize + words.len();
        if end > RESERVED_START as usize {
            return Err(VmError::ImageOverflow {
                base,
                len: words.len(),
            });
        }
        self.cells[base as usize..end].copy_from_slice(words);
        debug!("loaded {} words at {base:#06X}", words.len());
        Ok(())
    }

    /// Copies a little-endian byte image into memory at `base`.
    pub fn load_image(&mut self, bytes: &[u8], base: u16) -> Result<(), VmError> {
        if bytes.len() % 2 != 0 {
            return Err(VmError::OddImageLength { len: bytes.len() });
        }
        let words: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.load_words(&words, base)
    }

    /// Runs `f` with the access-flag checks suspended, restoring them on
    /// exit. Ring gating stays active.
    ///
    /// Only the syscall gateway uses this, for ring-0 handler calls that
    /// legitimately rewrite code or reserved cells.
    pub(crate) fn with_protection_relaxed<T>(&mut self, f: impl FnOnce(&mut Memory) -> T) -> T {
        let prev = self.relaxed;
        self.relaxed = true;
        let result = f(self);
        self.relaxed = prev;
        result
    }

    /// Whether the load base sits in an executable region.
    pub fn is_executable(addr: u16) -> bool {
        region_for(addr).execute
    }

    /// All cells, for snapshots and diagnostics.
    pub fn cells(&self) -> &[u16] {
        &self.cells
    }

    /// A bounded window of cells starting at `start`.
    pub fn slice(&self, start: u16, len: usize) -> &[u16] {
        let start = start as usize;
        let end = (start + len).min(MEMORY_CELLS);
        &self.cells[start..end]
    }

    pub(crate) fn restore_cells(&mut self, cells: &[u16]) {
        self.cells.copy_from_slice(cells);
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_region_reads_and_writes_at_user() {
        let mut mem = Memory::new();
        mem.store_word(0x0200, 0xBEEF, Ring::User).unwrap();
        assert_eq!(mem.load_word(0x0200, Ring::User), Ok(0xBEEF));
    }

    #[test]
    fn stack_region_reads_and_writes_at_user() {
        let mut mem = Memory::new();
        mem.store_word(0xF000, 1, Ring::User).unwrap();
        mem.store_word(0xFFFD, 2, Ring::User).unwrap();
        assert_eq!(mem.load_word(0xFFFD, Ring::User), Ok(2));
    }

    #[test]
    fn code_region_rejects_writes() {
        let mut mem = Memory::new();
        let err = mem.store_word(0x0010, 1, Ring::User).unwrap_err();
        assert_eq!(err.kind, MemFaultKind::InvalidAccess);
        assert_eq!(err.addr, 0x0010);
        // Kernel privilege does not override the flag check.
        let err = mem.store_word(0x0010, 1, Ring::Kernel).unwrap_err();
        assert_eq!(err.kind, MemFaultKind::InvalidAccess);
    }

    #[test]
    fn code_region_is_readable_and_executable() {
        let mem = Memory::new();
        assert_eq!(mem.load_word(0x0000, Ring::User), Ok(0));
        assert_eq!(mem.fetch_instruction(0x00FF, Ring::User), Ok(0));
    }

    #[test]
    fn data_region_is_not_executable() {
        let mem = Memory::new();
        let err = mem.fetch_instruction(0x0100, Ring::User).unwrap_err();
        assert_eq!(err.kind, MemFaultKind::InvalidAccess);
    }

    #[test]
    fn reserved_region_faults_lower_rings_on_privilege() {
        let mut mem = Memory::new();
        let err = mem.store_word(0xFFFE, 1, Ring::User).unwrap_err();
        assert_eq!(err.kind, MemFaultKind::Protection);
        let err = mem.load_word(0xFFFF, Ring::Supervisor).unwrap_err();
        assert_eq!(err.kind, MemFaultKind::Protection);
    }

    #[test]
    fn reserved_region_faults_even_kernel_without_relaxation() {
        let mut mem = Memory::new();
        let err = mem.store_word(0xFFFE, 1, Ring::Kernel).unwrap_err();
        assert_eq!(err.kind, MemFaultKind::InvalidAccess);
        let err = mem.load_word(0xFFFE, Ring::Kernel).unwrap_err();
        assert_eq!(err.kind, MemFaultKind::InvalidAccess);
    }

    #[test]
    fn relaxation_is_scoped_and_ring_gated() {
        let mut mem = Memory::new();
        mem.with_protection_relaxed(|mem| {
            mem.store_word(0xFFFE, 0xAA, Ring::Kernel).unwrap();
            mem.store_word(0x0000, 0xBB, Ring::Kernel).unwrap();
            // The ring gate still applies while relaxed.
            let err = mem.store_word(0xFFFE, 0xCC, Ring::User).unwrap_err();
            assert_eq!(err.kind, MemFaultKind::Protection);
        });
        // Protection is restored after the closure returns.
        assert!(mem.store_word(0xFFFE, 0, Ring::Kernel).is_err());
        assert_eq!(mem.cells()[0xFFFE], 0xAA);
        assert_eq!(mem.cells()[0x0000], 0xBB);
    }

    #[test]
    fn image_loader_rejects_overflow_and_reserved() {
        let mut mem = Memory::new();
        assert!(mem.load_words(&[1, 2, 3], 0xFFFC).is_err());
        assert!(mem.load_words(&[1, 2], 0xFFFC).is_ok());
        assert_eq!(
            mem.load_words(&[0; 3], 0xFFFE),
            Err(VmError::ImageOverflow {
                base: 0xFFFE,
                len: 3
            })
        );
    }

    #[test]
    fn slice_is_bounded_by_the_address_space() {
        let mut mem = Memory::new();
        mem.load_words(&[1, 2, 3], 0xFFFB).unwrap();
        assert_eq!(mem.slice(0xFFFB, 3), &[1, 2, 3]);
        assert_eq!(mem.slice(0xFFFB, 100), &[1, 2, 3, 0, 0]);
    }

    #[test]
    fn byte_image_is_little_endian() {
        let mut mem = Memory::new();
        mem.load_image(&[0x05, 0xC1, 0xFF, 0xFF], 0).unwrap();
        assert_eq!(mem.cells()[0], 0xC105);
        assert_eq!(mem.cells()[1], 0xFFFF);
        assert_eq!(
            mem.load_image(&[0x05], 0),
            Err(VmError::OddImageLength { len: 1 })
        );
    }
}
