//! The four probing strategies and the results they report.

mod handle;
mod implicit;
mod search;

use crate::{invoker, Error, ErrorKind, Invocation, Options, ProcessScope, SearchPath};
pub use handle::HandleProbe;
pub use implicit::ImplicitLink;
pub use search::SearchPathOverride;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    os::raw::c_char,
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};

/// Mechanism used to resolve the library.
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub enum ProbeStrategy {
    /// Default linkage through the OS default search order.
    ImplicitLink,
    /// Default linkage with the architecture directory as search directory.
    SearchPathOverride,
    /// Explicit handles through the raw OS loader.
    ExplicitHandle,
    /// Explicit handles through [`libloading`].
    PlatformLoaderApi,
}

impl ProbeStrategy {
    /// All strategies in the order they are run.
    pub const ALL: [Self; 4] = [
        Self::ImplicitLink,
        Self::SearchPathOverride,
        Self::ExplicitHandle,
        Self::PlatformLoaderApi,
    ];
}

impl Display for ProbeStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let text = match self {
            Self::ImplicitLink => "implicit link (default search order)",
            Self::SearchPathOverride => "search path override",
            Self::ExplicitHandle => "explicit handle (raw OS loader)",
            Self::PlatformLoaderApi => "platform loader API (libloading)",
        };
        write!(f, "{}", text)
    }
}

/// A phase a probe went through.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Step {
    /// The architecture directory was set as search directory.
    SearchPathSet(PathBuf),
    /// The architecture directory doesn't exist, no override applied.
    SearchPathMissing(PathBuf),
    /// The previous search directory was restored.
    SearchPathRestored(Option<PathBuf>),
    /// The symbol was already linked into the process.
    ProcessSymbol(String),
    /// A candidate was opened.
    Opened {
        /// API that opened it.
        api: &'static str,
        /// Path or name that was opened.
        target: PathBuf,
    },
    /// A candidate failed to open.
    OpenFailed {
        /// API that tried to open it.
        api: &'static str,
        /// Path or name that was tried.
        target: PathBuf,
        /// OS error code, if the OS reported one.
        code: Option<i32>,
        /// Reason reported by the OS loader.
        message: String,
    },
    /// The symbol was found in the opened library.
    SymbolFound(String),
    /// The opened library doesn't export the symbol.
    SymbolMissing(String),
    /// The handle was released.
    Released(PathBuf),
    /// Releasing the handle failed.
    ReleaseFailed {
        /// Path or name the handle was opened from.
        target: PathBuf,
        /// Reason reported by the OS loader.
        message: String,
    },
}

/// Outcome of one probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProbeResult {
    /// Strategy that produced this result.
    strategy: ProbeStrategy,
    /// Human-readable summary.
    message: String,
    /// Decoded string or classified failure.
    value: Result<String, Error>,
    /// Phases in the order they happened.
    steps: Vec<Step>,
}

impl ProbeResult {
    /// Result of a finished invocation.
    #[must_use]
    pub fn from_invocation(
        strategy: ProbeStrategy,
        steps: Vec<Step>,
        invocation: Invocation,
    ) -> Self {
        Self {
            strategy,
            message: invocation.message,
            value: invocation.value,
            steps,
        }
    }

    /// Result of a probe that failed before invoking anything.
    #[must_use]
    pub fn failed(strategy: ProbeStrategy, steps: Vec<Step>, error: Error) -> Self {
        Self {
            strategy,
            message: format!("{} failed: {}", strategy, error),
            value: Err(error),
            steps,
        }
    }

    /// Strategy that produced this result.
    #[must_use]
    pub const fn strategy(&self) -> ProbeStrategy {
        self.strategy
    }

    /// Whether the symbol was resolved, called and its string decoded.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.value.is_ok()
    }

    /// Human-readable summary.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Decoded string returned by the symbol.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref().ok()
    }

    /// The failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.value.as_ref().err()
    }

    /// Classification of the failure, if any.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(Error::kind)
    }

    /// Phases in the order they happened.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The target that was opened last, if any.
    #[must_use]
    pub fn opened(&self) -> Option<&Path> {
        self.steps.iter().rev().find_map(|step| match step {
            Step::Opened { target, .. } => Some(target.as_path()),
            _ => None,
        })
    }
}

/// One self-contained attempt to locate, load and call the library.
pub trait Probe {
    /// Strategy this probe implements.
    fn strategy(&self) -> ProbeStrategy;

    /// Runs the probe.
    ///
    /// Never fails: every error is reported in the [`ProbeResult`], and every
    /// handle or search directory change is undone before returning.
    fn attempt(&self) -> ProbeResult;
}

/// Records a failed open.
fn open_failed(api: &'static str, target: &Path, error: &Error) -> Step {
    warn!(api, target = %target.display(), %error, "failed to open candidate");

    let message = match error {
        Error::HandleOpenFailed { message, .. } => message.clone(),
        error => error.to_string(),
    };

    Step::OpenFailed {
        api,
        target: target.to_owned(),
        code: error.code(),
        message,
    }
}

/// Records the outcome of a release.
fn released(target: &Path, close: Result<(), Error>) -> Step {
    match close {
        Ok(()) => Step::Released(target.to_owned()),
        Err(error) => {
            error!(target = %target.display(), %error, "failed to release handle");

            Step::ReleaseFailed {
                target: target.to_owned(),
                message: error.to_string(),
            }
        }
    }
}

/// Resolves the symbol like a statically declared import would: from the
/// images linked into the process, then by bare name through the search
/// directory, the application directory and the OS default search order. Resolution happens lazily
/// inside the invocation, so failing to find the library is reported as
/// [`Error::LibraryNotFound`].
///
/// A handle opened here is released after the returned string was decoded.
fn load_default<L: ProcessScope, S: SearchPath>(
    options: &Options,
    loader: &L,
    search_path: &S,
    label: &str,
    steps: &mut Vec<Step>,
) -> Invocation {
    let file_name = PathBuf::from(options.file_name());
    let symbol = options.symbol();
    let mut resident: Option<(L::Handle, PathBuf)> = None;

    let call = || -> Result<*const c_char, Error> {
        if let Ok(fun) = loader.process_symbol(symbol) {
            info!(symbol = ?symbol, "symbol linked into the process");
            steps.push(Step::ProcessSymbol(symbol.to_string_lossy().into_owned()));
            return Ok(unsafe { fun() });
        }

        let mut last_error = None;

        for target in search_path.candidates(options.base_dir(), &file_name)? {
            match loader.open(&target) {
                Ok(handle) => {
                    steps.push(Step::Opened {
                        api: loader.api(),
                        target: target.clone(),
                    });
                    let (handle, _) = resident.insert((handle, target));

                    let fun = loader.symbol(handle, symbol).map_err(|error| {
                        steps.push(Step::SymbolMissing(symbol.to_string_lossy().into_owned()));
                        error
                    })?;
                    steps.push(Step::SymbolFound(symbol.to_string_lossy().into_owned()));

                    return Ok(unsafe { fun() });
                }
                Err(error) => {
                    steps.push(open_failed(loader.api(), &target, &error));
                    last_error = Some(error);
                }
            }
        }

        Err(Error::LibraryNotFound {
            name: file_name.display().to_string(),
            message: last_error.map_or_else(
                || String::from("no search location"),
                |error| error.to_string(),
            ),
        })
    };

    // the string lives in the library, so it's decoded before the release
    let invocation = unsafe { invoker::invoke(label, call) };

    if let Some((handle, target)) = resident.take() {
        let close = loader.close(handle, &target);
        steps.push(released(&target, close));
    }

    invocation
}
