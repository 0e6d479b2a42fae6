//! Application directory layouts around the fixture library.

use anyhow::Result;
use dylib_probe::{Options, ProbeResult};
use std::{fs, path::PathBuf};
use tempfile::TempDir;

/// Library name the fixture is installed under. Nothing else on the default
/// search path carries it.
pub const LIBRARY: &str = "probe_fixture";

/// Where the fixture library is installed.
#[derive(Clone, Copy, Debug)]
pub enum Layout {
    /// Only in the architecture directory.
    ArchDir,
    /// Only in the application directory.
    #[cfg_attr(windows, allow(dead_code))]
    BaseDir,
    /// In the application directory and the architecture directory.
    Everywhere,
    /// Nowhere.
    Absent,
}

/// A temporary application directory with the fixture installed.
pub struct App {
    /// Keeps the directory alive.
    pub dir: TempDir,
    /// Options probing the installed fixture.
    pub options: Options,
}

impl App {
    /// Installs the fixture according to `layout`, probing `symbol`.
    pub fn new(layout: Layout, symbol: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut options = Options::new(dir.path());
        options.set_library(LIBRARY);
        options.set_symbol(symbol);

        match layout {
            Layout::ArchDir => {
                install(options.arch_dir().join(options.file_name()))?;
            }
            Layout::BaseDir => {
                install(options.base_dir().join(options.file_name()))?;
            }
            Layout::Everywhere => {
                install(options.arch_dir().join(options.file_name()))?;
                install(options.base_dir().join(options.file_name()))?;
            }
            Layout::Absent => (),
        }

        Ok(Self { dir, options })
    }

    /// Path of the fixture in the architecture directory.
    pub fn in_arch_dir(&self) -> PathBuf {
        self.options.arch_dir().join(self.options.file_name())
    }

    /// Path of the fixture in the application directory.
    #[cfg_attr(windows, allow(dead_code))]
    pub fn in_base_dir(&self) -> PathBuf {
        self.options.base_dir().join(self.options.file_name())
    }
}

/// Copies the built fixture to `target`.
fn install(target: PathBuf) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::copy(dylib::location(), target)?;
    Ok(())
}

/// Outcome of every result, comparable across runs.
pub fn outcomes(results: &[ProbeResult]) -> Vec<Result<&str, dylib_probe::ErrorKind>> {
    results
        .iter()
        .map(|result| match result.error_kind() {
            None => Ok(result.value().unwrap_or_default()),
            Some(kind) => Err(kind),
        })
        .collect()
}
