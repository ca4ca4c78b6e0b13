use std::borrow::Cow;
use std::fmt::{self, Display};

/// Error types used throughout the `guestld` library.
///
/// These errors represent the failure conditions that can occur while
/// reading an ELF file and building the [`Image`](crate::Image) model.
/// Loading itself reports failures out-of-band (log records plus zero
/// sentinels), matching the behavior of the dynamic loaders this crate
/// is designed to drive.
#[derive(Debug)]
pub enum Error {
    /// An error occurred while opening or reading an ELF file.
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing the ELF header.
    ///
    /// * Invalid magic bytes
    /// * Unsupported ELF class or data encoding
    /// * Invalid ELF header fields
    ParseEhdr {
        /// A descriptive message about the ELF header parsing error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing program headers.
    ///
    /// * Segment data outside the file bounds
    /// * Malformed program header data
    ParsePhdr {
        /// A descriptive message about the program header parsing error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing the dynamic section or one of
    /// the tables it addresses (symbols, relocations).
    ParseDynamic {
        /// A descriptive message about the dynamic section parsing error.
        msg: Cow<'static, str>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::ParseEhdr { msg } => write!(f, "ELF header parsing error: {msg}"),
            Error::ParsePhdr { msg } => write!(f, "Program header parsing error: {msg}"),
            Error::ParseDynamic { msg } => write!(f, "Dynamic section parsing error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            msg: err.to_string().into(),
        }
    }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_ehdr_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseEhdr { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_phdr_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParsePhdr { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_dynamic_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseDynamic { msg: msg.into() }
}

pub type Result<T> = std::result::Result<T, Error>;
