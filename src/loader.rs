//! Loaders mapping a library into the process and resolving its symbols.

use crate::{sys, Error};
use libloading::Library;
use std::{
    error::Error as StdError,
    ffi::{CStr, OsStr},
    io,
    os::raw::c_char,
    panic,
    path::Path,
};
use tracing::{debug, error};

/// Signature of the probed symbol: no arguments, returns a pointer to a
/// null-terminated string owned by the library.
pub type VersionFn = unsafe extern "C" fn() -> *const c_char;

/// A way to open, query and release library handles.
///
/// Every handle returned by [`Loader::open`] has to be given back to
/// [`Loader::close`] exactly once, see [`with_handle`].
pub trait Loader {
    /// Handle to a mapped library.
    type Handle;

    /// Human-readable name of the underlying API.
    fn api(&self) -> &'static str;

    /// Maps `target`, a full path or a bare name, into the process.
    ///
    /// # Errors
    /// Fails with [`Error::HandleOpenFailed`] if the OS refuses.
    fn open(&self, target: &Path) -> Result<Self::Handle, Error>;

    /// Looks up `symbol` in `handle`.
    ///
    /// The returned pointer is only valid until `handle` is closed.
    ///
    /// # Errors
    /// Fails with [`Error::SymbolNotFound`] if `handle` doesn't export
    /// `symbol`.
    fn symbol(&self, handle: &Self::Handle, symbol: &CStr) -> Result<VersionFn, Error>;

    /// Releases `handle`.
    ///
    /// # Errors
    /// Fails with [`Error::HandleCloseFailed`] if the OS refuses.
    fn close(&self, handle: Self::Handle, target: &Path) -> Result<(), Error>;
}

impl<L: Loader + ?Sized> Loader for &L {
    type Handle = L::Handle;

    fn api(&self) -> &'static str {
        (**self).api()
    }

    fn open(&self, target: &Path) -> Result<Self::Handle, Error> {
        (**self).open(target)
    }

    fn symbol(&self, handle: &Self::Handle, symbol: &CStr) -> Result<VersionFn, Error> {
        (**self).symbol(handle, symbol)
    }

    fn close(&self, handle: Self::Handle, target: &Path) -> Result<(), Error> {
        (**self).close(handle, target)
    }
}

/// A [`Loader`] that also resolves symbols of the images the process was
/// linked against, the way a statically declared import is resolved.
pub trait ProcessScope: Loader {
    /// Looks up `symbol` among the images the process was linked against.
    ///
    /// # Errors
    /// Fails with [`Error::SymbolNotFound`] if no linked image exports
    /// `symbol`.
    fn process_symbol(&self, symbol: &CStr) -> Result<VersionFn, Error>;
}

impl<L: ProcessScope + ?Sized> ProcessScope for &L {
    fn process_symbol(&self, symbol: &CStr) -> Result<VersionFn, Error> {
        (**self).process_symbol(symbol)
    }
}

/// Outcome of a scoped handle acquisition.
#[derive(Debug)]
pub struct Released<T> {
    /// Value produced while the handle was open.
    pub value: T,
    /// Outcome of releasing the handle.
    pub close: Result<(), Error>,
}

/// Opens `target`, runs `fun` with the handle and releases it again.
///
/// The handle is released on every exit path of `fun`, including unwinding
/// panics, which are resumed after the release.
///
/// # Errors
/// Fails with [`Error::HandleOpenFailed`] if `target` couldn't be opened, in
/// which case `fun` isn't called.
pub fn with_handle<L: Loader + ?Sized, T>(
    loader: &L,
    target: &Path,
    fun: impl FnOnce(&L::Handle) -> T,
) -> Result<Released<T>, Error> {
    let handle = loader.open(target)?;
    debug!(api = loader.api(), target = %target.display(), "opened handle");

    let value = panic::catch_unwind(panic::AssertUnwindSafe(|| fun(&handle)));
    let close = loader.close(handle, target);

    match &close {
        Ok(()) => debug!(api = loader.api(), target = %target.display(), "released handle"),
        Err(error) => error!(api = loader.api(), %error, "failed to release handle"),
    }

    match value {
        Ok(value) => Ok(Released { value, close }),
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Renders `path` for diagnostics.
fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Converts a symbol address into [`VersionFn`].
///
/// # Safety
/// `address` has to point to a function with the [`VersionFn`] signature.
unsafe fn version_fn(address: std::ptr::NonNull<std::os::raw::c_void>) -> VersionFn {
    std::mem::transmute::<*mut std::os::raw::c_void, VersionFn>(address.as_ptr())
}

/// [`Loader`] on top of the raw OS primitives, `dlopen` & co. on Unix and
/// `LoadLibraryW` & co. on Windows.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawLoader;

impl Loader for RawLoader {
    type Handle = sys::RawHandle;

    fn api(&self) -> &'static str {
        if cfg!(windows) {
            "LoadLibraryW"
        } else {
            "dlopen"
        }
    }

    fn open(&self, target: &Path) -> Result<Self::Handle, Error> {
        sys::open(target.as_os_str()).map_err(|failure| Error::HandleOpenFailed {
            target: display(target),
            code: failure.code,
            message: failure.message,
        })
    }

    fn symbol(&self, handle: &Self::Handle, symbol: &CStr) -> Result<VersionFn, Error> {
        match unsafe { sys::symbol(*handle, symbol) } {
            Ok(address) => Ok(unsafe { version_fn(address) }),
            Err(failure) => Err(Error::SymbolNotFound {
                symbol: symbol.to_string_lossy().into_owned(),
                message: failure.message,
            }),
        }
    }

    fn close(&self, handle: Self::Handle, target: &Path) -> Result<(), Error> {
        unsafe { sys::close(handle) }.map_err(|failure| Error::HandleCloseFailed {
            target: display(target),
            code: failure.code,
            message: failure.message,
        })
    }
}

impl ProcessScope for RawLoader {
    fn process_symbol(&self, symbol: &CStr) -> Result<VersionFn, Error> {
        match sys::process_symbol(symbol) {
            Ok(address) => Ok(unsafe { version_fn(address) }),
            Err(failure) => Err(Error::SymbolNotFound {
                symbol: symbol.to_string_lossy().into_owned(),
                message: failure.message,
            }),
        }
    }
}

/// OS error code carried by a [`libloading`] error, if the OS reported one.
fn os_code(error: &libloading::Error) -> Option<i32> {
    StdError::source(error)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .and_then(io::Error::raw_os_error)
}

/// [`Loader`] on top of the cross-platform [`libloading`] crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlatformLoader;

impl Loader for PlatformLoader {
    type Handle = Library;

    fn api(&self) -> &'static str {
        "libloading"
    }

    fn open(&self, target: &Path) -> Result<Self::Handle, Error> {
        unsafe { Library::new(target.as_os_str()) }.map_err(|error| Error::HandleOpenFailed {
            target: display(target),
            code: os_code(&error),
            message: error.to_string(),
        })
    }

    fn symbol(&self, handle: &Self::Handle, symbol: &CStr) -> Result<VersionFn, Error> {
        unsafe { handle.get::<VersionFn>(symbol.to_bytes_with_nul()) }
            .map(|symbol| *symbol)
            .map_err(|error| Error::SymbolNotFound {
                symbol: symbol.to_string_lossy().into_owned(),
                message: error.to_string(),
            })
    }

    fn close(&self, handle: Self::Handle, target: &Path) -> Result<(), Error> {
        handle.close().map_err(|error| Error::HandleCloseFailed {
            target: display(target),
            code: os_code(&error),
            message: error.to_string(),
        })
    }
}

/// Platform file name of library `name`, e.g. `libsqlite3.so` for `sqlite3`.
#[must_use]
pub fn file_name(name: &str) -> std::ffi::OsString {
    libloading::library_filename(OsStr::new(name))
}

#[cfg(test)]
pub mod fake {
    //! In-memory [`Loader`] counting acquisitions and releases.

    use super::{Loader, ProcessScope, VersionFn};
    use crate::Error;
    use std::{
        cell::RefCell,
        ffi::CStr,
        os::raw::c_char,
        path::{Path, PathBuf},
    };

    /// Version returned by [`version`].
    pub const VERSION: &str = "3.45.1";

    /// Exported function of the fake library.
    pub extern "C" fn version() -> *const c_char {
        b"3.45.1\0".as_ptr().cast()
    }

    /// Exported function returning a null pointer.
    pub extern "C" fn null_version() -> *const c_char {
        std::ptr::null()
    }

    /// Fake loader.
    #[derive(Debug, Default)]
    pub struct FakeLoader {
        /// Targets that can be opened.
        pub openable: Vec<PathBuf>,
        /// What the fake library exports under any name.
        pub export: Option<VersionFn>,
        /// What the process image exports under any name.
        pub process_export: Option<VersionFn>,
        /// Every `open` call in order.
        pub attempts: RefCell<Vec<PathBuf>>,
        /// Handles currently open.
        pub open: RefCell<Vec<usize>>,
        /// Number of successful opens.
        pub acquired: RefCell<usize>,
        /// Number of closes.
        pub released: RefCell<usize>,
    }

    impl FakeLoader {
        /// Fake loader able to open `openable`, exporting `export`.
        pub fn new<P: AsRef<Path>>(openable: &[P], export: Option<VersionFn>) -> Self {
            Self {
                openable: openable.iter().map(|path| path.as_ref().into()).collect(),
                export,
                ..Self::default()
            }
        }

        /// Asserts no handle leaked.
        pub fn assert_balanced(&self) {
            assert_eq!(*self.acquired.borrow(), *self.released.borrow());
            assert!(self.open.borrow().is_empty());
        }
    }

    impl Loader for FakeLoader {
        type Handle = usize;

        fn api(&self) -> &'static str {
            "fake"
        }

        fn open(&self, target: &Path) -> Result<usize, Error> {
            self.attempts.borrow_mut().push(target.into());

            if let Some(index) = self.openable.iter().position(|path| path == target) {
                assert!(self.open.borrow().is_empty(), "more than one handle open");
                *self.acquired.borrow_mut() += 1;
                self.open.borrow_mut().push(index);
                Ok(index)
            } else {
                Err(Error::HandleOpenFailed {
                    target: target.display().to_string(),
                    code: Some(126),
                    message: String::from("not found"),
                })
            }
        }

        fn symbol(&self, handle: &usize, symbol: &CStr) -> Result<VersionFn, Error> {
            assert!(self.open.borrow().contains(handle), "use after release");
            self.export.ok_or_else(|| Error::SymbolNotFound {
                symbol: symbol.to_string_lossy().into_owned(),
                message: String::from("not exported"),
            })
        }

        fn close(&self, handle: usize, _: &Path) -> Result<(), Error> {
            let mut open = self.open.borrow_mut();
            let index = open
                .iter()
                .position(|open| *open == handle)
                .expect("double release");
            open.remove(index);
            *self.released.borrow_mut() += 1;
            Ok(())
        }
    }

    impl ProcessScope for FakeLoader {
        fn process_symbol(&self, symbol: &CStr) -> Result<VersionFn, Error> {
            self.process_export.ok_or_else(|| Error::SymbolNotFound {
                symbol: symbol.to_string_lossy().into_owned(),
                message: String::from("not linked"),
            })
        }
    }
}
