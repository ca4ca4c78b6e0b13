//! The typed, read-only view of a parsed executable image.
//!
//! The loader never touches file bytes directly; everything it needs is
//! captured here. Images usually come from [`Image::from_path`] or
//! [`Image::from_bytes`], but since every field is plain data a host
//! can also assemble one by hand (tests do).

use crate::arch::{ArchDesc, Class, Endianness, Machine};

/// A parsed executable image.
#[derive(Debug, Clone)]
pub struct Image {
    /// Display name, used in log records.
    pub name: String,
    pub machine: Machine,
    pub class: Class,
    pub endianness: Endianness,
    /// The virtual base address the file claims: the lowest `p_vaddr`
    /// of any loadable segment. 0 for position-independent images.
    pub declared_base: u64,
    /// Absolute end of the highest loadable segment
    /// (`max(p_vaddr + p_memsz)`); equals `declared_base` when the
    /// image has no loadable segment.
    pub virtual_size: u64,
    /// Entrypoint as declared by the file (`e_entry`).
    pub entrypoint: u64,
    pub segments: Vec<Segment>,
    /// Entries of the dynamic section, in file order.
    pub dynamic: Vec<DynEntry>,
    /// Dynamic symbols, in table order. Index 0 is the null symbol.
    pub dynsyms: Vec<DynSym>,
    /// Dynamic relocations (non-PLT).
    pub dyn_relocs: Vec<Reloc>,
    /// PLT/GOT relocations.
    pub pltgot_relocs: Vec<Reloc>,
}

/// One program segment.
#[derive(Debug, Clone)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Virtual address as declared by the file.
    pub vaddr: u64,
    /// In-memory size (`p_memsz`); may exceed the content length.
    pub mem_size: u64,
    /// File-backed content (`p_filesz` bytes).
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Load,
    Other(u32),
}

/// One entry of the dynamic section.
#[derive(Debug, Clone, Copy)]
pub struct DynEntry {
    pub tag: i64,
    pub value: u64,
}

/// One dynamic symbol.
#[derive(Debug, Clone)]
pub struct DynSym {
    pub name: String,
    /// Image-relative (or absolute, for non-PIE toolchains) address
    /// when the symbol is defined; 0 when imported.
    pub value: u64,
    pub size: u64,
}

/// One relocation record.
#[derive(Debug, Clone, Copy)]
pub struct Reloc {
    /// Image-relative address of the slot to patch.
    pub address: u64,
    /// Architecture-specific relocation code.
    pub r_type: u32,
    /// Index into [`Image::dynsyms`]; `None` when `r_sym` is 0.
    pub symbol: Option<u32>,
    pub addend: i64,
}

impl Image {
    /// Pointer width and endianness of this image.
    pub fn arch(&self) -> ArchDesc {
        ArchDesc {
            machine: self.machine,
            class: self.class,
            endianness: self.endianness,
        }
    }

    /// Value of the first dynamic entry with the given tag.
    pub fn dynamic_tag(&self, tag: i64) -> Option<u64> {
        self.dynamic
            .iter()
            .find(|entry| entry.tag == tag)
            .map(|entry| entry.value)
    }

    /// Relative virtual address of `addr`.
    ///
    /// Some toolchains emit already-relative values below the declared
    /// base; those are preserved as-is.
    pub fn rva(&self, addr: u64) -> u64 {
        if addr >= self.declared_base {
            addr - self.declared_base
        } else {
            addr
        }
    }
}
