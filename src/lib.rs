//! A cross-architecture dynamic loader for abstract guest address
//! spaces.
//!
//! `guestld` takes an ELF image, places it into the guest memory of a
//! host-provided target engine, applies x86-64 or AArch64 dynamic
//! relocations, resolves imports against the engine, and can install a
//! lazy-binding hook in the guest's global offset table so imported
//! procedure calls are resolved on first use.
//!
//! The crate never executes guest code and never owns guest memory;
//! everything address-space-related goes through the [`TargetSystem`]
//! and [`TargetMemory`] traits.
//!
//! # Example
//!
//! ```ignore
//! use guestld::{Binding, Loader};
//! use std::sync::{Arc, Mutex};
//!
//! let engine = Arc::new(Mutex::new(my_engine));
//! let loader = Loader::from_file("payload.so", engine, Binding::Lazy)
//!     .expect("not an ELF image or engine refused it");
//! let entry = loader.entrypoint();
//! ```

pub mod arch;
mod engine;
mod error;
mod image;
mod lazy;
mod loader;
mod parse;
mod relocation;

pub use arch::{ArchDesc, Class, Endianness, Machine};
pub use engine::{LoaderCtx, SharedEngine, TargetMemory, TargetSystem};
pub use error::{Error, Result};
pub use image::{DynEntry, DynSym, Image, Reloc, Segment, SegmentKind};
pub use lazy::{dl_resolve, resolver_address};
pub use loader::{Binding, Loader};
pub use parse::is_elf;
