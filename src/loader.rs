//! The per-image loader: segment mapping, relocation passes and the
//! binding controller.

use crate::arch::{ArchDesc, ArchStrategy};
use crate::engine::{LoaderCtx, SharedEngine, TargetMemory, TargetSystem};
use crate::image::{DynSym, Image, SegmentKind};
use crate::lazy;
use crate::parse::is_elf;
use elf::abi::DT_PLTGOT;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) const PAGE_SIZE: u64 = 0x1000;

#[inline]
pub(crate) fn page_align(value: u64) -> u64 {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// When imported procedure calls get resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Binding {
    /// Leave PLT/GOT slots untouched. Guests that jump through the PLT
    /// will execute unrebased offsets; callers choosing this mode are
    /// expected not to.
    NotBind,
    /// Resolve every PLT/GOT relocation through the engine at load
    /// time.
    Now,
    /// Install the lazy-resolver trampoline and defer resolution until
    /// the first call through each PLT entry.
    #[default]
    Lazy,
}

/// A dynamic loader for one executable image.
///
/// Construction maps the image into the engine's guest memory, applies
/// dynamic relocations and performs the requested binding. The loader
/// stays alive for address translation and, under lazy binding, to
/// serve resolution requests arriving through
/// [`dl_resolve`](crate::dl_resolve).
///
/// Guest memory is never unmapped by the loader; the mapping belongs to
/// the engine.
pub struct Loader<E: TargetSystem> {
    pub(crate) inner: Arc<LoaderInner<E>>,
}

pub(crate) struct LoaderInner<E> {
    pub(crate) image: Image,
    pub(crate) arch: ArchDesc,
    /// Dynamic symbols defined by the image itself, name to table
    /// index. Imports (value 0) are never included.
    pub(crate) exports: HashMap<String, usize>,
    /// Assigned guest base address; 0 until mapping succeeds.
    pub(crate) base: AtomicU64,
    /// Registry token written to `GOT[1]`; 0 while not lazily bound.
    pub(crate) token: AtomicU64,
    pub(crate) engine: SharedEngine<E>,
}

impl<E> LoaderInner<E> {
    #[inline]
    pub(crate) fn base(&self) -> u64 {
        self.base.load(Ordering::Acquire)
    }

    /// Guest address of a symbol defined by the image itself, 0 for
    /// imports and unknown names.
    pub(crate) fn resolve_local(&self, name: &str) -> u64 {
        match self.exports.get(name) {
            Some(&idx) => {
                let value = self.image.dynsyms[idx].value;
                self.base().wrapping_add(self.image.rva(value))
            }
            None => 0,
        }
    }
}

impl<E: TargetSystem> LoaderInner<E> {
    /// Resolve an imported symbol through the engine.
    pub(crate) fn resolve_external(&self, engine: &mut E, sym: &DynSym) -> u64 {
        let ctx = LoaderCtx::new(&self.image, self.base());
        engine.symlink(&ctx, sym)
    }
}

impl<E: TargetSystem + Send + 'static> Loader<E> {
    /// Load an ELF file into the engine's guest memory.
    ///
    /// Returns `None` when the file is not an ELF image, cannot be
    /// parsed, or the engine refuses it. Allocation failure does not
    /// yield `None`: the loader is returned with
    /// [`base_address`](Self::base_address) still 0.
    pub fn from_file(
        path: impl AsRef<Path>,
        engine: SharedEngine<E>,
        binding: Binding,
    ) -> Option<Loader<E>> {
        let path = path.as_ref();
        log::info!("loading {}", path.display());
        if !is_elf(path) {
            log::error!("{} is not an ELF file", path.display());
            return None;
        }
        let image = match Image::from_path(path) {
            Ok(image) => image,
            Err(err) => {
                log::error!("cannot parse {}: {err}", path.display());
                return None;
            }
        };
        Self::from_image(image, engine, binding)
    }

    /// Load an already-parsed image into the engine's guest memory.
    ///
    /// Returns `None` only when the engine refuses the image.
    pub fn from_image(
        image: Image,
        engine: SharedEngine<E>,
        binding: Binding,
    ) -> Option<Loader<E>> {
        if !engine.lock().unwrap().supports(&image) {
            log::error!("engine does not support image {}", image.name);
            return None;
        }
        let mut exports = HashMap::new();
        for (idx, sym) in image.dynsyms.iter().enumerate() {
            if sym.value > 0 {
                // Duplicate names: last write wins.
                exports.insert(sym.name.clone(), idx);
            }
        }
        let arch = image.arch();
        let loader = Loader {
            inner: Arc::new(LoaderInner {
                image,
                arch,
                exports,
                base: AtomicU64::new(0),
                token: AtomicU64::new(0),
                engine,
            }),
        };
        loader.load(binding);
        Some(loader)
    }

    fn load(&self, binding: Binding) {
        let inner = &self.inner;
        let image = &inner.image;
        log::info!("loading image {} ({:?})", image.name, image.machine);

        let span = image.virtual_size.saturating_sub(image.declared_base);
        let virtual_size = page_align(span);
        log::debug!("{}: virtual size {:#x}", image.name, virtual_size);

        let mut guard = inner.engine.lock().unwrap();
        let engine: &mut E = &mut guard;
        let hint = engine.base_address_hint(image.declared_base, virtual_size);
        let base = engine.mem().mmap(hint, virtual_size);
        if base == 0 {
            log::error!("{}: guest mmap failed, aborting load", image.name);
            return;
        }
        inner.base.store(base, Ordering::Release);

        for segment in &image.segments {
            if segment.kind != SegmentKind::Load || segment.content.is_empty() {
                continue;
            }
            let rva = image.rva(segment.vaddr);
            log::debug!(
                "{}: mapping segment {:#x} -> {:#x} ({} bytes)",
                image.name,
                segment.vaddr,
                base + rva,
                segment.content.len()
            );
            engine.mem().write(base + rva, &segment.content);
        }

        let Some(strategy) = ArchStrategy::for_machine(image.machine) else {
            log::error!(
                "{}: relocations not supported for machine {:?}",
                image.name,
                image.machine
            );
            return;
        };

        // The dynamic pass only ever performs relative/rebase-style
        // fixups, so it always runs lazy.
        for reloc in &image.dyn_relocs {
            inner.apply_reloc(engine, strategy, reloc, true);
        }

        match binding {
            Binding::NotBind => {}
            Binding::Now => {
                for reloc in &image.pltgot_relocs {
                    inner.apply_reloc(engine, strategy, reloc, false);
                }
            }
            Binding::Lazy => self.bind_lazy(engine, strategy),
        }
    }

    /// Install the lazy-resolver hook and rebase the PLT/GOT slots.
    ///
    /// The PLT GOT starts at the address declared by `DT_PLTGOT`; its
    /// first three pointer-sized entries are reserved. `GOT[1]` is used
    /// as a scratch slot identifying this loader to the resolver and
    /// `GOT[2]` receives the resolver entry the PLT stubs jump through.
    fn bind_lazy(&self, engine: &mut E, strategy: ArchStrategy) {
        let inner = &self.inner;
        let image = &inner.image;
        let Some(got_tag) = image.dynamic_tag(DT_PLTGOT) else {
            log::warn!("{}: missing DT_PLTGOT, cannot lazy-bind", image.name);
            return;
        };
        let arch = inner.arch;
        let ptr_size = arch.ptr_size() as u64;
        let got = self.address_of(got_tag);

        let inner_dyn: Arc<dyn lazy::LazyResolver> = self.inner.clone();
        let resolver: std::sync::Weak<dyn lazy::LazyResolver> = Arc::downgrade(&inner_dyn);
        let token = lazy::register(resolver);
        inner.token.store(token, Ordering::Release);

        engine.mem().write_ptr(arch, got + ptr_size, token);
        engine
            .mem()
            .write_ptr(arch, got + 2 * ptr_size, lazy::resolver_address());

        // Rebase the pre-baked trampoline offsets onto the assigned
        // base so the stubs land in the mapped PLT.
        for reloc in &image.pltgot_relocs {
            inner.apply_reloc(engine, strategy, reloc, true);
        }
    }
}

impl<E: TargetSystem> Loader<E> {
    /// Guest base address assigned at load, or 0 when allocation
    /// failed.
    #[inline]
    pub fn base_address(&self) -> u64 {
        self.inner.base()
    }

    /// Pointer width and endianness of the loaded image.
    #[inline]
    pub fn architecture(&self) -> ArchDesc {
        self.inner.arch
    }

    /// The image this loader was built from.
    #[inline]
    pub fn image(&self) -> &Image {
        &self.inner.image
    }

    /// Guest address of an image-relative offset.
    #[inline]
    pub fn address_of(&self, offset: u64) -> u64 {
        self.inner.base().wrapping_add(offset)
    }

    /// Guest address of a symbol defined by the image, or 0 when the
    /// name is not exported.
    pub fn symbol_address(&self, name: &str) -> u64 {
        self.inner.resolve_local(name)
    }

    /// Guest address of the image entrypoint.
    pub fn entrypoint(&self) -> u64 {
        let image = &self.inner.image;
        self.inner
            .base()
            .wrapping_add(image.entrypoint.wrapping_sub(image.declared_base))
    }

    /// Token installed in `GOT[1]`, once lazy binding has set up the
    /// resolver hook. Hosts wiring the guest-side trampoline pass it
    /// back through [`dl_resolve`](crate::dl_resolve).
    pub fn lazy_token(&self) -> Option<u64> {
        match self.inner.token.load(Ordering::Acquire) {
            0 => None,
            token => Some(token),
        }
    }
}

impl<E: TargetSystem> Drop for Loader<E> {
    fn drop(&mut self) {
        let token = self.inner.token.load(Ordering::Acquire);
        if token != 0 {
            lazy::unregister(token);
        }
    }
}
