use crate::relocation::RelocKind;
use elf::abi::{
    EM_AARCH64, R_AARCH64_COPY, R_AARCH64_GLOB_DAT, R_AARCH64_JUMP_SLOT, R_AARCH64_RELATIVE,
};

pub const EM_ARCH: u16 = EM_AARCH64;

pub const REL_RELATIVE: u32 = R_AARCH64_RELATIVE;
pub const REL_GOT: u32 = R_AARCH64_GLOB_DAT;
pub const REL_JUMP_SLOT: u32 = R_AARCH64_JUMP_SLOT;
pub const REL_COPY: u32 = R_AARCH64_COPY;

pub(crate) fn reloc_kind(r_type: u32) -> Option<RelocKind> {
    match r_type {
        REL_RELATIVE => Some(RelocKind::Relative),
        REL_JUMP_SLOT => Some(RelocKind::JumpSlot),
        REL_GOT => Some(RelocKind::GlobDat),
        REL_COPY => Some(RelocKind::Copy),
        _ => None,
    }
}
