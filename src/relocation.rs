//! The relocation engine.
//!
//! Both supported architectures share the same four relocation
//! semantics; only the constant namespace differs (see [`crate::arch`]).
//! Relocation never fails the load: unsupported codes are logged and
//! the slot is left exactly as the segment copy wrote it.

use crate::arch::ArchStrategy;
use crate::engine::{TargetMemory, TargetSystem};
use crate::image::{DynSym, Reloc};
use crate::loader::LoaderInner;

/// Semantics of a relocation, decoded from the architecture-specific
/// code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RelocKind {
    /// Write `base + addend` into the slot.
    Relative,
    /// Patch a PLT GOT slot: locally defined symbols bind immediately,
    /// imports are either rebased for the lazy trampoline or resolved
    /// through the engine.
    JumpSlot,
    /// Bind a data slot to a symbol address.
    GlobDat,
    /// Copy the symbol's bytes into the slot.
    Copy,
}

impl<E: TargetSystem> LoaderInner<E> {
    /// Apply one relocation record.
    ///
    /// `is_lazy` selects the `JUMP_SLOT` treatment for imports: rebase
    /// the pre-baked trampoline offset when lazy, resolve through the
    /// engine when eager.
    pub(crate) fn apply_reloc(
        &self,
        engine: &mut E,
        strategy: ArchStrategy,
        reloc: &Reloc,
        is_lazy: bool,
    ) {
        let base = self.base();
        let arch = self.arch;
        let slot = base.wrapping_add(reloc.address);
        let Some(kind) = strategy.reloc_kind(reloc.r_type) else {
            log::warn!(
                "{}: relocation type {} is not supported",
                self.image.name,
                reloc.r_type
            );
            return;
        };
        match kind {
            RelocKind::Relative => {
                let value = base.wrapping_add_signed(reloc.addend);
                engine.mem().write_ptr(arch, slot, value);
            }
            RelocKind::JumpSlot => {
                let Some(sym) = self.reloc_symbol(reloc) else {
                    return;
                };
                let local = self.resolve_local(&sym.name);
                let value = if local != 0 {
                    local.wrapping_add_signed(reloc.addend)
                } else if is_lazy {
                    // The slot holds the image-relative trampoline
                    // target; rebase it onto the assigned base.
                    let current = engine.mem().read_ptr(arch, slot);
                    base.wrapping_add(current)
                } else {
                    self.resolve_external(engine, sym)
                        .wrapping_add_signed(reloc.addend)
                };
                engine.mem().write_ptr(arch, slot, value);
            }
            RelocKind::GlobDat => {
                let Some(sym) = self.reloc_symbol(reloc) else {
                    return;
                };
                let local = self.resolve_local(&sym.name);
                let value = if local != 0 {
                    local
                } else {
                    self.resolve_external(engine, sym)
                };
                engine
                    .mem()
                    .write_ptr(arch, slot, value.wrapping_add_signed(reloc.addend));
            }
            RelocKind::Copy => {
                let Some(sym) = self.reloc_symbol(reloc) else {
                    return;
                };
                let src = self.resolve_external(engine, sym);
                let mut buf = vec![0u8; sym.size as usize];
                engine.mem().read(src, &mut buf);
                engine.mem().write(slot, &buf);
            }
        }
    }

    /// The symbol a relocation refers to, or `None` (with a warning)
    /// when the record has no usable symbol reference.
    fn reloc_symbol(&self, reloc: &Reloc) -> Option<&DynSym> {
        let Some(idx) = reloc.symbol else {
            log::warn!(
                "{}: relocation type {} has no symbol",
                self.image.name,
                reloc.r_type
            );
            return None;
        };
        let sym = self.image.dynsyms.get(idx as usize);
        if sym.is_none() {
            log::warn!(
                "{}: relocation symbol index {} out of bounds",
                self.image.name,
                idx
            );
        }
        sym
    }
}
