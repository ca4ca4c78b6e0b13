#![allow(dead_code)]

use guestld::{
    ArchDesc, Class, DynSym, Endianness, Image, LoaderCtx, Machine, Reloc, Segment, SegmentKind,
    SharedEngine, TargetMemory, TargetSystem,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Sparse guest memory with a bump allocator for mappings.
pub struct VmMem {
    next: u64,
    bytes: HashMap<u64, u8>,
    /// Number of `write` calls, for asserting that an operation did not
    /// touch memory.
    pub writes: usize,
    pub fail_mmap: bool,
}

impl VmMem {
    fn new() -> Self {
        VmMem {
            next: 0x5500_0000,
            bytes: HashMap::new(),
            writes: 0,
            fail_mmap: false,
        }
    }

    /// Seed guest memory without counting as a loader write.
    pub fn poke(&mut self, addr: u64, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.bytes.insert(addr + i as u64, *byte);
        }
    }

    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.bytes.get(&(addr + i as u64)).copied().unwrap_or(0))
            .collect()
    }
}

impl TargetMemory for VmMem {
    fn mmap(&mut self, _hint: u64, size: u64) -> u64 {
        if self.fail_mmap {
            return 0;
        }
        let base = self.next;
        self.next += size.max(0x1000) + 0x10000;
        base
    }

    fn read(&mut self, addr: u64, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.bytes.get(&(addr + i as u64)).copied().unwrap_or(0);
        }
    }

    fn write(&mut self, addr: u64, bytes: &[u8]) {
        self.writes += 1;
        for (i, byte) in bytes.iter().enumerate() {
            self.bytes.insert(addr + i as u64, *byte);
        }
    }
}

/// Scripted target: bump-allocated memory plus a fixed symbol table.
pub struct Vm {
    pub mem: VmMem,
    pub symbols: HashMap<&'static str, u64>,
    pub refuse: bool,
    /// Names passed to `symlink`, in call order.
    pub resolved: Vec<String>,
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            mem: VmMem::new(),
            symbols: HashMap::new(),
            refuse: false,
            resolved: Vec::new(),
        }
    }
}

impl TargetSystem for Vm {
    type Mem = VmMem;

    fn supports(&self, _image: &Image) -> bool {
        !self.refuse
    }

    fn base_address_hint(&self, declared_base: u64, _virtual_size: u64) -> u64 {
        declared_base
    }

    fn mem(&mut self) -> &mut VmMem {
        &mut self.mem
    }

    fn symlink(&mut self, _loader: &LoaderCtx<'_>, sym: &DynSym) -> u64 {
        self.resolved.push(sym.name.clone());
        self.symbols.get(sym.name.as_str()).copied().unwrap_or(0)
    }
}

pub type VmHandle = SharedEngine<Vm>;

pub fn engine() -> VmHandle {
    Arc::new(Mutex::new(Vm::new()))
}

pub fn read_ptr(engine: &SharedEngine<Vm>, arch: ArchDesc, addr: u64) -> u64 {
    engine.lock().unwrap().mem.read_ptr(arch, addr)
}

pub fn peek(engine: &SharedEngine<Vm>, addr: u64, len: usize) -> Vec<u8> {
    engine.lock().unwrap().mem.peek(addr, len)
}

/// An empty 64-bit little-endian image of the given machine, ready to
/// have segments, symbols and relocations pushed onto it.
pub fn image(machine: Machine) -> Image {
    Image {
        name: "test.so".to_string(),
        machine,
        class: Class::Elf64,
        endianness: Endianness::Little,
        declared_base: 0,
        virtual_size: 0x5000,
        entrypoint: 0x1000,
        segments: Vec::new(),
        dynamic: Vec::new(),
        // Index 0 is the null symbol, as in a real dynsym table.
        dynsyms: vec![sym("", 0, 0)],
        dyn_relocs: Vec::new(),
        pltgot_relocs: Vec::new(),
    }
}

pub fn load_segment(vaddr: u64, content: Vec<u8>) -> Segment {
    Segment {
        kind: SegmentKind::Load,
        vaddr,
        mem_size: content.len() as u64,
        content,
    }
}

pub fn sym(name: &str, value: u64, size: u64) -> DynSym {
    DynSym {
        name: name.to_string(),
        value,
        size,
    }
}

pub fn reloc(address: u64, r_type: u32, symbol: Option<u32>, addend: i64) -> Reloc {
    Reloc {
        address,
        r_type,
        symbol,
        addend,
    }
}

fn w16(out: &mut [u8], off: usize, value: u16) {
    out[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

fn w32(out: &mut [u8], off: usize, value: u32) {
    out[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

fn w64(out: &mut [u8], off: usize, value: u64) {
    out[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

/// Assemble a minimal x86-64 ELF64 shared object with one loadable
/// segment, a three-entry dynsym table (`foo` defined at 0x300, `bar`
/// imported), one RELATIVE dynamic relocation and one JUMP_SLOT PLT
/// relocation. `pltrel` is the value of `DT_PLTREL`.
pub fn minimal_elf_x86_64(pltrel: u64) -> Vec<u8> {
    const PHOFF: usize = 0x40;
    const DYNSTR: usize = 0xC0; // "\0foo\0bar\0"
    const DYNSYM: usize = 0xE0; // 3 entries of 24 bytes
    const RELA_DYN: usize = 0x128;
    const RELA_PLT: usize = 0x140;
    const DYNAMIC: usize = 0x200;
    const DYN_SIZE: u64 = 12 * 16;
    const SHOFF: usize = 0x300; // 3 section headers of 64 bytes
    const FILE_SIZE: usize = 0x400;

    let mut out = vec![0u8; FILE_SIZE];

    // ELF header
    out[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    out[4] = 2; // ELFCLASS64
    out[5] = 1; // ELFDATA2LSB
    out[6] = 1; // EV_CURRENT
    w16(&mut out, 0x10, 3); // e_type = ET_DYN
    w16(&mut out, 0x12, 62); // e_machine = EM_X86_64
    w32(&mut out, 0x14, 1); // e_version
    w64(&mut out, 0x18, 0x1000); // e_entry
    w64(&mut out, 0x20, PHOFF as u64);
    w64(&mut out, 0x28, SHOFF as u64);
    w16(&mut out, 0x34, 64); // e_ehsize
    w16(&mut out, 0x36, 56); // e_phentsize
    w16(&mut out, 0x38, 2); // e_phnum
    w16(&mut out, 0x3A, 64); // e_shentsize
    w16(&mut out, 0x3C, 3); // e_shnum
    w16(&mut out, 0x3E, 0); // e_shstrndx

    // PT_LOAD covering the whole file, with extra zero-fill up to 0x5000
    let p = PHOFF;
    w32(&mut out, p, 1); // PT_LOAD
    w32(&mut out, p + 4, 7); // rwx
    w64(&mut out, p + 8, 0); // p_offset
    w64(&mut out, p + 16, 0); // p_vaddr
    w64(&mut out, p + 32, FILE_SIZE as u64); // p_filesz
    w64(&mut out, p + 40, 0x5000); // p_memsz
    w64(&mut out, p + 48, 0x1000); // p_align

    // PT_DYNAMIC
    let p = PHOFF + 56;
    w32(&mut out, p, 2); // PT_DYNAMIC
    w32(&mut out, p + 4, 6); // rw
    w64(&mut out, p + 8, DYNAMIC as u64);
    w64(&mut out, p + 16, DYNAMIC as u64);
    w64(&mut out, p + 32, DYN_SIZE);
    w64(&mut out, p + 40, DYN_SIZE);
    w64(&mut out, p + 48, 8);

    // .dynstr
    out[DYNSTR + 1..DYNSTR + 4].copy_from_slice(b"foo");
    out[DYNSTR + 5..DYNSTR + 8].copy_from_slice(b"bar");

    // .dynsym: null, foo (defined), bar (import)
    let s = DYNSYM + 24;
    w32(&mut out, s, 1); // st_name = "foo"
    out[s + 4] = 0x12; // GLOBAL | FUNC
    w16(&mut out, s + 6, 1); // st_shndx
    w64(&mut out, s + 8, 0x300); // st_value
    w64(&mut out, s + 16, 8); // st_size
    let s = DYNSYM + 48;
    w32(&mut out, s, 5); // st_name = "bar"
    out[s + 4] = 0x12;
    w16(&mut out, s + 6, 0); // SHN_UNDEF

    // .rela.dyn: R_X86_64_RELATIVE at 0x2000, addend 0x40
    w64(&mut out, RELA_DYN, 0x2000);
    w64(&mut out, RELA_DYN + 8, 8); // r_info: sym 0, type 8
    w64(&mut out, RELA_DYN + 16, 0x40);

    // .rela.plt: R_X86_64_JUMP_SLOT at 0x3000 against bar
    w64(&mut out, RELA_PLT, 0x3000);
    w64(&mut out, RELA_PLT + 8, (2u64 << 32) | 7); // sym 2, type 7
    w64(&mut out, RELA_PLT + 16, 0);

    // .dynamic
    let tags: [(u64, u64); 12] = [
        (3, 0x4000),            // DT_PLTGOT
        (5, DYNSTR as u64),     // DT_STRTAB
        (6, DYNSYM as u64),     // DT_SYMTAB
        (10, 9),                // DT_STRSZ
        (11, 24),               // DT_SYMENT
        (7, RELA_DYN as u64),   // DT_RELA
        (8, 24),                // DT_RELASZ
        (9, 24),                // DT_RELAENT
        (23, RELA_PLT as u64),  // DT_JMPREL
        (2, 24),                // DT_PLTRELSZ
        (20, pltrel),           // DT_PLTREL
        (0, 0),                 // DT_NULL
    ];
    for (i, (tag, value)) in tags.iter().enumerate() {
        w64(&mut out, DYNAMIC + i * 16, *tag);
        w64(&mut out, DYNAMIC + i * 16 + 8, *value);
    }

    // Section headers: null, .dynsym, .dynstr
    let s = SHOFF + 64;
    w32(&mut out, s + 4, 11); // SHT_DYNSYM
    w64(&mut out, s + 16, DYNSYM as u64); // sh_addr
    w64(&mut out, s + 24, DYNSYM as u64); // sh_offset
    w64(&mut out, s + 32, 72); // sh_size
    w32(&mut out, s + 40, 2); // sh_link -> .dynstr
    w32(&mut out, s + 44, 1); // sh_info
    w64(&mut out, s + 56, 24); // sh_entsize
    let s = SHOFF + 128;
    w32(&mut out, s + 4, 3); // SHT_STRTAB
    w64(&mut out, s + 16, DYNSTR as u64);
    w64(&mut out, s + 24, DYNSTR as u64);
    w64(&mut out, s + 32, 9);

    out
}
