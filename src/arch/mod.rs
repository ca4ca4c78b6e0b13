//! Guest architecture description and the per-architecture relocation
//! namespaces supported by the loader.
pub mod aarch64;
pub mod x86_64;

use crate::relocation::RelocKind;

/// Machine type of a guest image, from `e_machine`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Machine {
    X86_64,
    Aarch64,
    /// Any other machine. Images of unknown machines can still be
    /// mapped and inspected, but are never relocated or bound.
    Other(u16),
}

impl From<u16> for Machine {
    fn from(e_machine: u16) -> Self {
        match e_machine {
            x86_64::EM_ARCH => Machine::X86_64,
            aarch64::EM_ARCH => Machine::Aarch64,
            other => Machine::Other(other),
        }
    }
}

/// ELF class of a guest image, which fixes its pointer width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Class {
    Elf32,
    Elf64,
}

/// Byte order of the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

/// Pointer width and endianness of a guest image, derived from its ELF
/// header.
///
/// Every pointer-sized value the loader writes to guest memory goes
/// through the engine together with this descriptor, so hosts whose
/// pointer representation differs from the guest's can truncate or
/// extend correctly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchDesc {
    pub machine: Machine,
    pub class: Class,
    pub endianness: Endianness,
}

impl ArchDesc {
    /// Size in bytes of a guest pointer.
    #[inline]
    pub fn ptr_size(&self) -> usize {
        match self.class {
            Class::Elf32 => 4,
            Class::Elf64 => 8,
        }
    }

    /// Encode `value` as a guest pointer into `out`.
    ///
    /// `out` must be exactly [`ptr_size`](Self::ptr_size) bytes; values
    /// wider than the guest pointer are truncated.
    pub fn encode_ptr(&self, value: u64, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.ptr_size());
        let bytes = match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        match self.endianness {
            Endianness::Little => out.copy_from_slice(&bytes[..out.len()]),
            Endianness::Big => out.copy_from_slice(&bytes[8 - out.len()..]),
        }
    }

    /// Decode a guest pointer from `bytes`, zero-extending to 64 bits.
    pub fn decode_ptr(&self, bytes: &[u8]) -> u64 {
        debug_assert_eq!(bytes.len(), self.ptr_size());
        let mut buf = [0u8; 8];
        match self.endianness {
            Endianness::Little => {
                buf[..bytes.len()].copy_from_slice(bytes);
                u64::from_le_bytes(buf)
            }
            Endianness::Big => {
                buf[8 - bytes.len()..].copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            }
        }
    }
}

/// Relocation strategy selected by machine type.
///
/// The two variants share the same relocation semantics and differ only
/// in the relocation constant namespace, the size of the reserved
/// prefix of the PLT GOT, and how PLT stubs communicate the relocation
/// to resolve to the lazy resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArchStrategy {
    X86_64,
    Aarch64,
}

impl ArchStrategy {
    pub(crate) fn for_machine(machine: Machine) -> Option<Self> {
        match machine {
            Machine::X86_64 => Some(ArchStrategy::X86_64),
            Machine::Aarch64 => Some(ArchStrategy::Aarch64),
            Machine::Other(_) => None,
        }
    }

    /// Map an architecture-specific relocation code to its semantics.
    pub(crate) fn reloc_kind(self, r_type: u32) -> Option<RelocKind> {
        match self {
            ArchStrategy::X86_64 => x86_64::reloc_kind(r_type),
            ArchStrategy::Aarch64 => aarch64::reloc_kind(r_type),
        }
    }

    /// Number of pointer-sized entries reserved at the start of the PLT
    /// GOT. Both System V families addressed here reserve three, but
    /// the constant is kept per-architecture.
    pub(crate) const fn reserved_got_entries(self) -> u64 {
        match self {
            ArchStrategy::X86_64 => 3,
            ArchStrategy::Aarch64 => 3,
        }
    }

    /// Recover the PLT relocation index from the hint passed by the PLT
    /// stub.
    ///
    /// On x86-64 the stub pushes the relocation index itself. On
    /// AArch64 it loads the address of the GOT slot, so the index is
    /// recovered from the slot position past the reserved prefix.
    pub(crate) fn plt_reloc_index(self, hint: u64, base: u64, pltgot: u64, ptr_size: u64) -> u64 {
        match self {
            ArchStrategy::X86_64 => hint,
            ArchStrategy::Aarch64 => (hint.wrapping_sub(base).wrapping_sub(pltgot) / ptr_size)
                .wrapping_sub(self.reserved_got_entries()),
        }
    }
}
