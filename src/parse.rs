//! Building the image model from ELF files.

use crate::arch::{Class, Endianness, Machine};
use crate::error::{parse_dynamic_error, parse_ehdr_error, parse_phdr_error, Result};
use crate::image::{DynEntry, DynSym, Image, Reloc, Segment, SegmentKind};
use elf::abi::{DT_JMPREL, DT_PLTREL, DT_PLTRELSZ, DT_RELA, DT_RELASZ, ELFMAGIC, PT_LOAD};
use elf::endian::AnyEndian;
use elf::relocation::RelaIterator;
use elf::segment::ProgramHeader;
use elf::ElfBytes;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Whether the file at `path` starts with the ELF magic.
///
/// This is the format-detection precondition of
/// [`Loader::from_file`](crate::Loader::from_file); it never touches
/// anything past the first four bytes.
pub fn is_elf(path: impl AsRef<Path>) -> bool {
    let mut magic = [0u8; 4];
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    file.read_exact(&mut magic).is_ok() && magic == ELFMAGIC
}

impl Image {
    /// Parse an ELF file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Image> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Image::from_bytes(&name, &data)
    }

    /// Parse an ELF image from bytes already in host memory.
    pub fn from_bytes(name: &str, data: &[u8]) -> Result<Image> {
        let file = ElfBytes::<AnyEndian>::minimal_parse(data)
            .map_err(|err| parse_ehdr_error(err.to_string()))?;
        let raw_class = file.ehdr.class;
        let raw_endian = file.ehdr.endianness;
        let entrypoint = file.ehdr.e_entry;
        let machine = Machine::from(file.ehdr.e_machine);
        let class = match raw_class {
            elf::file::Class::ELF32 => Class::Elf32,
            elf::file::Class::ELF64 => Class::Elf64,
        };
        let endianness = match raw_endian {
            AnyEndian::Little => Endianness::Little,
            AnyEndian::Big => Endianness::Big,
        };

        let phdrs: Vec<ProgramHeader> = file
            .segments()
            .map(|table| table.iter().collect())
            .unwrap_or_default();

        let mut segments = Vec::with_capacity(phdrs.len());
        let mut declared_base = u64::MAX;
        let mut virtual_end = 0u64;
        for phdr in &phdrs {
            let kind = match phdr.p_type {
                PT_LOAD => SegmentKind::Load,
                other => SegmentKind::Other(other),
            };
            if kind == SegmentKind::Load {
                declared_base = declared_base.min(phdr.p_vaddr);
                virtual_end = virtual_end.max(phdr.p_vaddr + phdr.p_memsz);
            }
            let start = phdr.p_offset as usize;
            let len = phdr.p_filesz as usize;
            let content = data
                .get(start..start + len)
                .ok_or_else(|| parse_phdr_error("segment data outside the file"))?
                .to_vec();
            segments.push(Segment {
                kind,
                vaddr: phdr.p_vaddr,
                mem_size: phdr.p_memsz,
                content,
            });
        }
        if declared_base == u64::MAX {
            declared_base = 0;
        }
        let virtual_size = virtual_end.max(declared_base);

        let mut dynamic = Vec::new();
        if let Some(table) = file
            .dynamic()
            .map_err(|err| parse_dynamic_error(err.to_string()))?
        {
            for entry in table.iter() {
                dynamic.push(DynEntry {
                    tag: entry.d_tag,
                    value: entry.d_val(),
                });
            }
        }

        let mut dynsyms = Vec::new();
        if let Some((symtab, strtab)) = file
            .dynamic_symbol_table()
            .map_err(|err| parse_dynamic_error(err.to_string()))?
        {
            for sym in symtab.iter() {
                let name = strtab
                    .get(sym.st_name as usize)
                    .map_err(|err| parse_dynamic_error(err.to_string()))?;
                dynsyms.push(DynSym {
                    name: name.to_string(),
                    value: sym.st_value,
                    size: sym.st_size,
                });
            }
        }

        let image = Image {
            name: name.to_string(),
            machine,
            class,
            endianness,
            declared_base,
            virtual_size,
            entrypoint,
            segments,
            dynamic,
            dynsyms,
            dyn_relocs: Vec::new(),
            pltgot_relocs: Vec::new(),
        };

        let dyn_relocs = parse_rela(
            &image, data, raw_endian, raw_class, &phdrs, DT_RELA, DT_RELASZ,
        )?;
        let pltgot_relocs = match image.dynamic_tag(DT_PLTREL) {
            Some(pltrel) if pltrel != DT_RELA as u64 => {
                log::warn!("{name}: PLT relocation table is not RELA, skipping");
                Vec::new()
            }
            _ => parse_rela(
                &image,
                data,
                raw_endian,
                raw_class,
                &phdrs,
                DT_JMPREL,
                DT_PLTRELSZ,
            )?,
        };

        Ok(Image {
            dyn_relocs,
            pltgot_relocs,
            ..image
        })
    }
}

/// Parse a RELA table addressed by a pair of dynamic tags.
fn parse_rela(
    image: &Image,
    data: &[u8],
    endian: AnyEndian,
    class: elf::file::Class,
    phdrs: &[ProgramHeader],
    addr_tag: i64,
    size_tag: i64,
) -> Result<Vec<Reloc>> {
    let (Some(addr), Some(size)) = (image.dynamic_tag(addr_tag), image.dynamic_tag(size_tag))
    else {
        return Ok(Vec::new());
    };
    let bytes = vaddr_slice(data, phdrs, addr, size)
        .ok_or_else(|| parse_dynamic_error("relocation table outside loadable segments"))?;
    let relocs = RelaIterator::new(endian, class, bytes)
        .map(|rela| Reloc {
            address: rela.r_offset,
            r_type: rela.r_type,
            symbol: (rela.r_sym != 0).then_some(rela.r_sym),
            addend: rela.r_addend,
        })
        .collect();
    Ok(relocs)
}

/// Find the file bytes backing a virtual address range, by walking the
/// loadable program headers.
fn vaddr_slice<'data>(
    data: &'data [u8],
    phdrs: &[ProgramHeader],
    vaddr: u64,
    size: u64,
) -> Option<&'data [u8]> {
    for phdr in phdrs {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        if vaddr >= phdr.p_vaddr && vaddr + size <= phdr.p_vaddr + phdr.p_filesz {
            let start = (vaddr - phdr.p_vaddr + phdr.p_offset) as usize;
            return data.get(start..start + size as usize);
        }
    }
    None
}
