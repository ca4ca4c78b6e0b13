//! On-demand resolution of imported procedure calls.
//!
//! Under lazy binding the guest's PLT stubs funnel unresolved calls
//! into a resolver with two values: the scratch word the loader left in
//! `GOT[1]` and an architecture-dependent hint naming the relocation.
//! Rather than aliasing a raw loader pointer into guest memory, the
//! scratch word is a token into a process-global registry of live
//! loaders; [`dl_resolve`] is the entry whose address sits in `GOT[2]`.

use crate::arch::ArchStrategy;
use crate::engine::{TargetMemory, TargetSystem};
use crate::loader::LoaderInner;
use elf::abi::DT_PLTGOT;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, Weak};

/// A loader able to serve PLT resolution requests.
pub(crate) trait LazyResolver: Send + Sync {
    fn resolve_plt(&self, hint: u64) -> u64;
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

static LOADERS: LazyLock<Mutex<HashMap<u64, Weak<dyn LazyResolver>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Register a loader and hand out the token to install in `GOT[1]`.
/// Tokens are non-zero and never reused.
pub(crate) fn register(loader: Weak<dyn LazyResolver>) -> u64 {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    LOADERS.lock().unwrap().insert(token, loader);
    token
}

pub(crate) fn unregister(token: u64) {
    LOADERS.lock().unwrap().remove(&token);
}

/// Address of [`dl_resolve`], the value installed in `GOT[2]`.
pub fn resolver_address() -> u64 {
    dl_resolve as usize as u64
}

/// Resolve one PLT entry on behalf of a guest.
///
/// `token` is the word the trampoline read from `GOT[1]`; `hint` is
/// what the PLT stub passed along (the relocation index on x86-64, the
/// address of the GOT slot on AArch64). Patches the GOT slot with the
/// resolved address and returns it, so the trampoline can tail-call the
/// target. Returns 0 when the token no longer names a live loader or
/// the hint is out of range.
///
/// Re-resolving the same entry is idempotent: the slot ends up with the
/// same value on every call.
pub extern "C" fn dl_resolve(token: u64, hint: u64) -> u64 {
    let loader = LOADERS.lock().unwrap().get(&token).cloned();
    match loader.and_then(|weak| weak.upgrade()) {
        Some(loader) => loader.resolve_plt(hint),
        None => {
            log::error!("no live loader for token {token:#x}");
            0
        }
    }
}

impl<E: TargetSystem + Send + 'static> LazyResolver for LoaderInner<E> {
    fn resolve_plt(&self, hint: u64) -> u64 {
        let image = &self.image;
        let base = self.base();
        let arch = self.arch;
        let Some(strategy) = ArchStrategy::for_machine(image.machine) else {
            // Unreachable for registered loaders; binding never runs on
            // unsupported machines.
            return 0;
        };
        let pltgot = image.dynamic_tag(DT_PLTGOT).unwrap_or(0);
        let idx = strategy.plt_reloc_index(hint, base, pltgot, arch.ptr_size() as u64);

        let Some(reloc) = image.pltgot_relocs.get(idx as usize) else {
            log::error!("{}: PLT index out of range: {}", image.name, idx);
            return 0;
        };
        let Some(sym_idx) = reloc.symbol else {
            log::error!(
                "{}: PLT relocation {} has no symbol",
                image.name,
                reloc.r_type
            );
            return 0;
        };
        let Some(sym) = image.dynsyms.get(sym_idx as usize) else {
            log::error!(
                "{}: PLT relocation symbol index {} out of bounds",
                image.name,
                sym_idx
            );
            return 0;
        };

        let mut guard = self.engine.lock().unwrap();
        let engine: &mut E = &mut guard;
        let sym_addr = self.resolve_external(engine, sym);
        log::debug!("{}: resolved {} to {:#x}", image.name, sym.name, sym_addr);
        let slot = base.wrapping_add(reloc.address);
        engine.mem().write_ptr(arch, slot, sym_addr);
        sym_addr
    }
}
