//! Interfaces of the host target the loader writes into.
//!
//! The loader itself never owns guest memory and never resolves
//! external symbols; both are delegated to an engine implementing
//! [`TargetSystem`]. Engines are shared: the host keeps its own handle
//! while every loader bound to the engine holds another, so a single
//! target can back several images at once.

use crate::arch::ArchDesc;
use crate::image::{DynSym, Image};
use std::sync::{Arc, Mutex};

/// How engines are passed to the loader: behind a shared lock, so the
/// host keeps access to guest memory for the lifetime of the loader and
/// the lazy resolver can re-enter from another thread.
pub type SharedEngine<E> = Arc<Mutex<E>>;

/// Guest virtual memory as seen by the loader.
///
/// Addresses are guest addresses; they have no meaning in the host
/// address space. All pointer-sized accesses carry the [`ArchDesc`] of
/// the image being loaded so implementations can apply the guest's
/// width and byte order, including hosts whose own pointer width
/// differs from the guest's.
pub trait TargetMemory {
    /// Map `size` bytes of guest memory, preferably at `hint`.
    ///
    /// Returns the assigned guest address, or 0 on failure.
    fn mmap(&mut self, hint: u64, size: u64) -> u64;

    /// Read `buf.len()` bytes from guest memory at `addr`.
    fn read(&mut self, addr: u64, buf: &mut [u8]);

    /// Write `bytes` to guest memory at `addr`.
    fn write(&mut self, addr: u64, bytes: &[u8]);

    /// Read a pointer-sized word in the guest's width and endianness.
    fn read_ptr(&mut self, arch: ArchDesc, addr: u64) -> u64 {
        let mut buf = [0u8; 8];
        let width = arch.ptr_size();
        self.read(addr, &mut buf[..width]);
        arch.decode_ptr(&buf[..width])
    }

    /// Write a pointer-sized word in the guest's width and endianness.
    fn write_ptr(&mut self, arch: ArchDesc, addr: u64, value: u64) {
        let mut buf = [0u8; 8];
        let width = arch.ptr_size();
        arch.encode_ptr(value, &mut buf[..width]);
        self.write(addr, &buf[..width]);
    }
}

/// A host target an image can be loaded into.
pub trait TargetSystem {
    type Mem: TargetMemory;

    /// Whether this target can host the given image at all. A refusal
    /// makes [`Loader::from_image`](crate::Loader::from_image) yield
    /// `None` before any state is created.
    fn supports(&self, image: &Image) -> bool;

    /// Preferred guest base address for an image with the given
    /// declared base and page-aligned virtual footprint.
    fn base_address_hint(&self, declared_base: u64, virtual_size: u64) -> u64;

    /// Guest memory of this target.
    fn mem(&mut self) -> &mut Self::Mem;

    /// Resolve an imported symbol to its runtime guest address.
    ///
    /// `loader` identifies the image asking for the symbol; hosts
    /// resolving against per-image state can key on it. Returning 0
    /// leaves the slot pointing at address 0.
    fn symlink(&mut self, loader: &LoaderCtx<'_>, sym: &DynSym) -> u64;
}

/// View of a loader handed to [`TargetSystem::symlink`].
pub struct LoaderCtx<'a> {
    image: &'a Image,
    base_address: u64,
}

impl<'a> LoaderCtx<'a> {
    pub(crate) fn new(image: &'a Image, base_address: u64) -> Self {
        LoaderCtx {
            image,
            base_address,
        }
    }

    /// The image being loaded.
    #[inline]
    pub fn image(&self) -> &Image {
        self.image
    }

    /// Guest base address assigned to the image.
    #[inline]
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Architecture descriptor of the image.
    #[inline]
    pub fn arch(&self) -> ArchDesc {
        self.image.arch()
    }

    /// Guest address of an image-relative offset.
    #[inline]
    pub fn address_of(&self, offset: u64) -> u64 {
        self.base_address.wrapping_add(offset)
    }
}
