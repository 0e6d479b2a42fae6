#![warn(
    clippy::all,
    clippy::nursery,
    clippy::missing_docs_in_private_items,
    clippy::pedantic,
    missing_docs
)]

//! Diagnoses how a native shared library is located and loaded by the
//! current process, and checks that an exported version function of that
//! library can be resolved and called.
//!
//! Four strategies are tried in a fixed order, see [`ProbeStrategy`]. Every
//! strategy reports a [`ProbeResult`], failures never escape a [`Probe`].
//!
//! # Examples
//! ```no_run
//! # use dylib_probe::{Options, Runner};
//! # fn main() -> anyhow::Result<()> {
//! let mut options = Options::from_env()?;
//! options.set_library("sqlite3");
//! options.set_symbol("sqlite3_libversion");
//!
//! for result in Runner::new(&options).run() {
//!     println!("{}", result);
//! }
//! # Ok(()) }
//! ```

mod ffi;
mod invoker;
mod loader;
mod options;
mod probe;
mod report;
mod runner;
mod search_path;
mod sys;

pub use invoker::{invoke, Invocation};
pub use loader::{
    with_handle, Loader, PlatformLoader, ProcessScope, RawLoader, Released, VersionFn,
};
pub use options::{Options, ENV_BASE_DIR, ENV_LIBRARY, ENV_SYMBOL};
pub use probe::{
    HandleProbe, ImplicitLink, Probe, ProbeResult, ProbeStrategy, SearchPathOverride, Step,
};
pub use report::Banner;
pub use runner::Runner;
pub use search_path::{with_directory, ProcessSearchPath, SearchPath};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    str::Utf8Error,
};
use thiserror::Error;

/// [`dylib-probe`](crate) errors.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// The library could not be resolved through any search location.
    #[error("library `{name}` not found: {message}")]
    LibraryNotFound {
        /// Library name or path that was looked for.
        name: String,
        /// Reason reported by the OS loader.
        message: String,
    },
    /// The library was loaded but does not export the symbol.
    #[error("symbol `{symbol}` not found: {message}")]
    SymbolNotFound {
        /// Name of the missing symbol.
        symbol: String,
        /// Reason reported by the OS loader.
        message: String,
    },
    /// Changing the process search path failed.
    #[error("failed to set search path to `{}`{}", display_directory(.directory), display_code(.code))]
    SearchPathSetFailed {
        /// Directory that was set, [`None`] for the default search order.
        directory: Option<PathBuf>,
        /// OS error code, if the OS reported one.
        code: Option<i32>,
    },
    /// Opening a library handle failed.
    #[error("failed to open `{target}`{}: {message}", display_code(.code))]
    HandleOpenFailed {
        /// Path or name that was opened.
        target: String,
        /// OS error code, if the OS reported one.
        code: Option<i32>,
        /// Reason reported by the OS loader.
        message: String,
    },
    /// Releasing a library handle failed.
    #[error("failed to release `{target}`{}: {message}", display_code(.code))]
    HandleCloseFailed {
        /// Path or name the handle was opened from.
        target: String,
        /// OS error code, if the OS reported one.
        code: Option<i32>,
        /// Reason reported by the OS loader.
        message: String,
    },
    /// Calling the symbol failed.
    #[error("invocation failed: {0}")]
    InvocationFailed(String),
    /// The returned string could not be decoded.
    #[error("failed to decode returned string: {0}")]
    DecodeFailed(String),
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<Utf8Error> for Error {
    fn from(error: Utf8Error) -> Self {
        Self::DecodeFailed(error.to_string())
    }
}

/// Renders an optional OS error code as a suffix.
fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(String::new, |code| format!(" (os error {})", code))
}

/// Renders an optional directory, [`None`] meaning the default search order.
fn display_directory(directory: &Option<PathBuf>) -> String {
    directory.as_ref().map_or_else(
        || String::from("<default>"),
        |directory| directory.display().to_string(),
    )
}

impl Error {
    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::LibraryNotFound { .. } => ErrorKind::LibraryNotFound,
            Self::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
            Self::SearchPathSetFailed { .. } => ErrorKind::SearchPathSetFailed,
            Self::HandleOpenFailed { .. } => ErrorKind::HandleOpenFailed,
            Self::HandleCloseFailed { .. } => ErrorKind::HandleCloseFailed,
            Self::InvocationFailed(_) => ErrorKind::InvocationFailed,
            Self::DecodeFailed(_) => ErrorKind::DecodeFailed,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// OS error code carried by this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::SearchPathSetFailed { code, .. }
            | Self::HandleOpenFailed { code, .. }
            | Self::HandleCloseFailed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Classification of an [`Error`], stored in a [`ProbeResult`].
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// See [`Error::LibraryNotFound`].
    LibraryNotFound,
    /// See [`Error::SymbolNotFound`].
    SymbolNotFound,
    /// See [`Error::SearchPathSetFailed`].
    SearchPathSetFailed,
    /// See [`Error::HandleOpenFailed`].
    HandleOpenFailed,
    /// See [`Error::HandleCloseFailed`].
    HandleCloseFailed,
    /// See [`Error::InvocationFailed`].
    InvocationFailed,
    /// See [`Error::DecodeFailed`].
    DecodeFailed,
    /// See [`Error::Config`].
    Config,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let text = match self {
            Self::LibraryNotFound => "library not found",
            Self::SymbolNotFound => "symbol not found",
            Self::SearchPathSetFailed => "search path set failed",
            Self::HandleOpenFailed => "handle open failed",
            Self::HandleCloseFailed => "handle close failed",
            Self::InvocationFailed => "invocation failed",
            Self::DecodeFailed => "decode failed",
            Self::Config => "configuration",
        };
        write!(f, "{}", text)
    }
}

#[test]
fn error() {
    let error = Error::HandleOpenFailed {
        target: "x64/sqlite3.dll".into(),
        code: Some(126),
        message: "The specified module could not be found.".into(),
    };
    assert_eq!(ErrorKind::HandleOpenFailed, error.kind());
    assert_eq!(Some(126), error.code());
    assert_eq!(
        "failed to open `x64/sqlite3.dll` (os error 126): The specified module could not be found.",
        error.to_string()
    );

    let error = Error::SearchPathSetFailed {
        directory: None,
        code: None,
    };
    assert_eq!("failed to set search path to `<default>`", error.to_string());
}
