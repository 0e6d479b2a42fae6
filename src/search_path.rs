//! The process-wide library search directory.
//!
//! On Windows this is the directory set with `SetDllDirectoryW`. Elsewhere the
//! dynamic linker only reads `LD_LIBRARY_PATH` at startup, so the directory is
//! kept in a process global consulted by [`SearchPath::candidates`] before the
//! OS default search order.

use crate::Error;
#[cfg(not(windows))]
use once_cell::sync::Lazy;
use std::{
    panic,
    path::{Path, PathBuf},
};
#[cfg(not(windows))]
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error};

/// Emulated `SetDllDirectoryW` directory.
#[cfg(not(windows))]
static DIRECTORY: Lazy<RwLock<Option<PathBuf>>> = Lazy::new(|| RwLock::new(None));

/// Access to a process-wide search directory.
pub trait SearchPath {
    /// Gets the current directory, [`None`] for the default search order.
    ///
    /// # Errors
    /// Fails with [`Error::SearchPathSetFailed`] if the OS can't report it.
    fn get(&self) -> Result<Option<PathBuf>, Error>;

    /// Sets the directory, [`None`] restores the default search order.
    ///
    /// # Errors
    /// Fails with [`Error::SearchPathSetFailed`] if the OS refuses.
    fn set(&self, directory: Option<&Path>) -> Result<(), Error>;

    /// Targets to try, in order, when loading `file_name` by bare name: the
    /// search directory first if one is set, then the OS default search.
    ///
    /// Outside of Windows the OS default search doesn't include the
    /// application directory `app_dir`, so it's tried before the bare name.
    ///
    /// # Errors
    /// Fails if the current directory can't be queried.
    fn candidates(&self, app_dir: &Path, file_name: &Path) -> Result<Vec<PathBuf>, Error> {
        let mut candidates = Vec::with_capacity(3);

        if let Some(directory) = self.get()? {
            candidates.push(directory.join(file_name));
        }

        if cfg!(not(windows)) {
            candidates.push(app_dir.join(file_name));
        }

        candidates.push(file_name.to_owned());

        Ok(candidates)
    }
}

impl<S: SearchPath + ?Sized> SearchPath for &S {
    fn get(&self) -> Result<Option<PathBuf>, Error> {
        (**self).get()
    }

    fn set(&self, directory: Option<&Path>) -> Result<(), Error> {
        (**self).set(directory)
    }
}

/// The search directory of the current process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessSearchPath;

impl SearchPath for ProcessSearchPath {
    fn get(&self) -> Result<Option<PathBuf>, Error> {
        #[cfg(windows)]
        {
            crate::sys::dll_directory().map_err(|failure| Error::SearchPathSetFailed {
                directory: None,
                code: failure.code,
            })
        }
        #[cfg(not(windows))]
        {
            Ok(DIRECTORY
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone())
        }
    }

    fn set(&self, directory: Option<&Path>) -> Result<(), Error> {
        #[cfg(windows)]
        {
            crate::sys::set_dll_directory(directory).map_err(|failure| {
                Error::SearchPathSetFailed {
                    directory: directory.map(Path::to_path_buf),
                    code: failure.code,
                }
            })
        }
        #[cfg(not(windows))]
        {
            *DIRECTORY.write().unwrap_or_else(PoisonError::into_inner) =
                directory.map(Path::to_path_buf);
            Ok(())
        }
    }
}

/// Sets `directory` as search directory, runs `fun` and restores the previous
/// directory.
///
/// The previous directory is restored on every exit path of `fun`, including
/// unwinding panics, which are resumed after restoring.
///
/// # Errors
/// - Fails with [`Error::SearchPathSetFailed`] if `directory` couldn't be set,
///   in which case `fun` isn't called.
/// - Fails with [`Error::SearchPathSetFailed`] if the previous directory
///   couldn't be restored.
pub fn with_directory<S: SearchPath + ?Sized, T>(
    search_path: &S,
    directory: &Path,
    fun: impl FnOnce() -> T,
) -> Result<T, Error> {
    let previous = search_path.get()?;
    search_path.set(Some(directory))?;
    debug!(directory = %directory.display(), "search path set");

    let value = panic::catch_unwind(panic::AssertUnwindSafe(fun));
    let restored = search_path.set(previous.as_deref());

    match &restored {
        Ok(()) => debug!(?previous, "search path restored"),
        Err(error) => error!(%error, "failed to restore search path"),
    }

    let value = match value {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    };

    restored.map(|()| value)
}

#[cfg(test)]
pub mod fake {
    //! In-memory [`SearchPath`].

    use super::SearchPath;
    use crate::Error;
    use std::{
        cell::{Cell, RefCell},
        path::{Path, PathBuf},
    };

    /// Fake search path recording every change.
    #[derive(Debug, Default)]
    pub struct FakeSearchPath {
        /// Current directory.
        pub current: RefCell<Option<PathBuf>>,
        /// Every value passed to `set`.
        pub history: RefCell<Vec<Option<PathBuf>>>,
        /// Makes setting a directory fail with this code.
        pub fail_set: Cell<Option<i32>>,
    }

    impl FakeSearchPath {
        /// Fake search path starting at `current`.
        pub fn new(current: Option<&Path>) -> Self {
            Self {
                current: RefCell::new(current.map(Path::to_path_buf)),
                ..Self::default()
            }
        }
    }

    impl SearchPath for FakeSearchPath {
        fn get(&self) -> Result<Option<PathBuf>, Error> {
            Ok(self.current.borrow().clone())
        }

        fn set(&self, directory: Option<&Path>) -> Result<(), Error> {
            self.history
                .borrow_mut()
                .push(directory.map(Path::to_path_buf));

            if let (Some(code), Some(directory)) = (self.fail_set.get(), directory) {
                return Err(Error::SearchPathSetFailed {
                    directory: Some(directory.to_path_buf()),
                    code: Some(code),
                });
            }

            *self.current.borrow_mut() = directory.map(Path::to_path_buf);
            Ok(())
        }
    }
}

/// Renders the current search directory for diagnostics.
#[must_use]
pub fn describe<S: SearchPath + ?Sized>(search_path: &S) -> String {
    match search_path.get() {
        Ok(Some(directory)) => directory.display().to_string(),
        Ok(None) => String::from("<default>"),
        Err(error) => format!("<unknown: {}>", error),
    }
}
