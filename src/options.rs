//! Probe options implementation.

use crate::{ffi::RToC, loader, Error};
use std::{
    env,
    ffi::{CStr, CString, OsString},
    path::{Path, PathBuf},
};

/// Environment variable overriding the library name.
pub const ENV_LIBRARY: &str = "DYLIB_PROBE_LIBRARY";
/// Environment variable overriding the symbol name.
pub const ENV_SYMBOL: &str = "DYLIB_PROBE_SYMBOL";
/// Environment variable overriding the application base directory.
pub const ENV_BASE_DIR: &str = "DYLIB_PROBE_BASE_DIR";

/// Library probed by default.
const DEFAULT_LIBRARY: &str = "sqlite3";
/// Symbol probed by default.
const DEFAULT_SYMBOL: &str = "sqlite3_libversion";

/// What to probe and where to look for it.
///
/// # Examples
/// ```
/// # use dylib_probe::Options;
/// let mut options = Options::new("/opt/app");
/// options.set_library("z");
/// options.set_symbol("zlibVersion");
/// options.set_64bit(true);
///
/// assert_eq!(std::path::Path::new("/opt/app/x64"), options.arch_dir());
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    /// Library name without platform prefix or extension.
    library: String,
    /// Exported symbol to call.
    symbol: CString,
    /// Application base directory.
    base_dir: PathBuf,
    /// Whether the process is 64-bit.
    is_64bit: bool,
}

impl Options {
    /// Creates options probing the default library from `base_dir`.
    ///
    /// The architecture is the one this process was compiled for.
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            library: DEFAULT_LIBRARY.into(),
            symbol: String::from(DEFAULT_SYMBOL).into_cstring(),
            base_dir: base_dir.into(),
            is_64bit: cfg!(target_pointer_width = "64"),
        }
    }

    /// Creates options from the environment.
    ///
    /// The base directory is [`ENV_BASE_DIR`] or the directory of the current
    /// executable, library and symbol can be overridden with [`ENV_LIBRARY`]
    /// and [`ENV_SYMBOL`].
    ///
    /// # Errors
    /// Fails with [`Error::Config`] if no base directory could be determined or
    /// a variable isn't valid unicode.
    pub fn from_env() -> Result<Self, Error> {
        let base_dir = if let Some(base_dir) = env::var_os(ENV_BASE_DIR) {
            PathBuf::from(base_dir)
        } else {
            let exe = env::current_exe()
                .map_err(|error| Error::Config(format!("no current executable: {}", error)))?;
            exe.parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::Config(format!("`{}` has no parent", exe.display())))?
        };

        let mut options = Self::new(base_dir);

        if let Some(library) = var(ENV_LIBRARY)? {
            options.set_library(library);
        }

        if let Some(symbol) = var(ENV_SYMBOL)? {
            options.set_symbol(symbol);
        }

        Ok(options)
    }

    /// Sets the library name, e.g. `sqlite3`.
    pub fn set_library<S: Into<String>>(&mut self, library: S) {
        self.library = library.into();
    }

    /// Library name.
    #[must_use]
    pub fn library(&self) -> &str {
        &self.library
    }

    /// Sets the exported symbol to call.
    ///
    /// Null characters are replaced with `␀`.
    pub fn set_symbol<S: Into<String>>(&mut self, symbol: S) {
        self.symbol = symbol.into().into_cstring();
    }

    /// Exported symbol to call.
    #[must_use]
    pub fn symbol(&self) -> &CStr {
        &self.symbol
    }

    /// Sets the application base directory.
    pub fn set_base_dir<P: Into<PathBuf>>(&mut self, base_dir: P) {
        self.base_dir = base_dir.into();
    }

    /// Application base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Sets whether the process is treated as 64-bit.
    pub fn set_64bit(&mut self, is_64bit: bool) {
        self.is_64bit = is_64bit;
    }

    /// Whether the process is treated as 64-bit.
    #[must_use]
    pub const fn is_64bit(&self) -> bool {
        self.is_64bit
    }

    /// Architecture directory name, `x64` or `x86`.
    #[must_use]
    pub const fn arch(&self) -> &'static str {
        if self.is_64bit {
            "x64"
        } else {
            "x86"
        }
    }

    /// Architecture-specific directory below the base directory.
    #[must_use]
    pub fn arch_dir(&self) -> PathBuf {
        self.base_dir.join(self.arch())
    }

    /// Platform file name of the library, e.g. `libsqlite3.so`.
    #[must_use]
    pub fn file_name(&self) -> OsString {
        loader::file_name(&self.library)
    }

    /// Paths opened by the explicit handle strategy, in priority order.
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        let file_name = self.file_name();

        vec![
            self.arch_dir().join(&file_name),
            self.base_dir.join(&file_name),
            PathBuf::from(file_name),
        ]
    }

    /// Names loaded by the platform loader strategy, in priority order.
    ///
    /// Outside of Windows bare names don't resolve against the application
    /// directory, so its path is tried before them.
    #[must_use]
    pub fn name_variants(&self) -> Vec<PathBuf> {
        let file_name = self.file_name();
        let mut variants = vec![self.arch_dir().join(&file_name)];

        if cfg!(not(windows)) {
            variants.push(self.base_dir.join(&file_name));
        }

        variants.push(PathBuf::from(file_name));
        variants.push(PathBuf::from(&self.library));

        variants
    }
}

/// Reads an optional environment variable.
fn var(key: &str) -> Result<Option<String>, Error> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(value)) => Err(Error::Config(format!(
            "`{}` is not valid unicode: {:?}",
            key, value
        ))),
    }
}

#[test]
fn defaults() {
    let options = Options::new("/opt/app");

    assert_eq!("sqlite3", options.library());
    assert_eq!("sqlite3_libversion", options.symbol().to_str().unwrap());
    assert_eq!(cfg!(target_pointer_width = "64"), options.is_64bit());
}

#[test]
fn candidates() {
    let mut options = Options::new("/opt/app");
    options.set_library("z");
    options.set_64bit(false);
    let file_name = loader::file_name("z");

    assert_eq!(
        vec![
            Path::new("/opt/app/x86").join(&file_name),
            Path::new("/opt/app").join(&file_name),
            PathBuf::from(&file_name),
        ],
        options.candidates()
    );

    let mut variants = vec![Path::new("/opt/app/x86").join(&file_name)];
    #[cfg(not(windows))]
    variants.push(Path::new("/opt/app").join(&file_name));
    variants.push(PathBuf::from(&file_name));
    variants.push(PathBuf::from("z"));

    assert_eq!(variants, options.name_variants());
}

#[test]
fn symbol_with_null() {
    let mut options = Options::new("/opt/app");
    options.set_symbol("version\0");

    assert_eq!("version\u{2400}", options.symbol().to_str().unwrap());
}

#[cfg(test)]
use rusty_fork::rusty_fork_test;

#[cfg(test)]
rusty_fork_test! {
    #[test]
    fn from_env() {
        env::set_var(ENV_BASE_DIR, "/srv/probe");
        env::set_var(ENV_LIBRARY, "z");
        env::set_var(ENV_SYMBOL, "zlibVersion");

        let options = Options::from_env().unwrap();

        assert_eq!(Path::new("/srv/probe"), options.base_dir());
        assert_eq!("z", options.library());
        assert_eq!("zlibVersion", options.symbol().to_str().unwrap());
    }

    #[test]
    fn from_env_defaults() {
        env::remove_var(ENV_BASE_DIR);
        env::remove_var(ENV_LIBRARY);
        env::remove_var(ENV_SYMBOL);

        let options = Options::from_env().unwrap();
        let exe = env::current_exe().unwrap();

        assert_eq!(exe.parent().unwrap(), options.base_dir());
        assert_eq!("sqlite3", options.library());
    }
}
