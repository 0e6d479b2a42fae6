//! Human-readable rendering of probe results.

use crate::{Options, ProbeResult, Step};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

/// Indentation of step and summary lines.
const INDENT: &str = "  ";

/// Header printed before the probes run.
#[derive(Clone, Copy, Debug)]
pub struct Banner<'a>(pub &'a Options);

impl Display for Banner<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let options = self.0;

        writeln!(f, "=== dynamic library load order probe ===")?;
        writeln!(f, "process architecture: {}", options.arch())?;
        writeln!(f, "application directory: {}", options.base_dir().display())?;
        write!(
            f,
            "library: {} ({}), symbol: {}",
            options.library(),
            PathBuf::from(options.file_name()).display(),
            options.symbol().to_string_lossy()
        )
    }
}

/// Renders an optional OS error code as a suffix.
fn code(code: Option<i32>) -> String {
    code.map_or_else(String::new, |code| format!(" (os error {})", code))
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::SearchPathSet(directory) => {
                write!(f, "setting search directory: {}", directory.display())
            }
            Self::SearchPathMissing(directory) => write!(
                f,
                "warning: architecture directory missing: {}, trying the default search order",
                directory.display()
            ),
            Self::SearchPathRestored(None) => write!(f, "search directory restored to default"),
            Self::SearchPathRestored(Some(directory)) => {
                write!(f, "search directory restored to {}", directory.display())
            }
            Self::ProcessSymbol(symbol) => {
                write!(f, "`{}` is already linked into the process", symbol)
            }
            Self::Opened { api, target } => {
                write!(f, "trying {}: {} ... opened", api, target.display())
            }
            Self::OpenFailed {
                api,
                target,
                code: error_code,
                message,
            } => write!(
                f,
                "trying {}: {} ... failed{}: {}",
                api,
                target.display(),
                code(*error_code),
                message
            ),
            Self::SymbolFound(symbol) => write!(f, "found exported symbol `{}`", symbol),
            Self::SymbolMissing(symbol) => write!(f, "exported symbol `{}` not found", symbol),
            Self::Released(target) => write!(f, "released {}", target.display()),
            Self::ReleaseFailed { target, message } => {
                write!(f, "failed to release {}: {}", target.display(), message)
            }
        }
    }
}

impl Display for ProbeResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "--- {} ---", self.strategy())?;

        for step in self.steps() {
            writeln!(f, "{}{}", INDENT, step)?;
        }

        match self.error_kind() {
            None => write!(f, "{}succeeded: {}", INDENT, self.message()),
            Some(kind) => write!(f, "{}failed ({}): {}", INDENT, kind, self.message()),
        }
    }
}
