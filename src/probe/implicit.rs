use super::{load_default, Probe, ProbeResult, ProbeStrategy};
use crate::{Options, ProcessScope, ProcessSearchPath, RawLoader, SearchPath};
use tracing::info_span;

/// Label of the invocation.
const LABEL: &str = "default load";

/// Loads the library the way a statically declared import does, through the
/// OS default search order without computing any path.
#[derive(Debug)]
pub struct ImplicitLink<'a, L = RawLoader, S = ProcessSearchPath> {
    /// What to probe.
    options: &'a Options,
    /// Loader resolving the import.
    loader: L,
    /// Search directory honored by the default search.
    search_path: S,
}

impl<'a> ImplicitLink<'a> {
    /// Creates the probe on top of the OS loader and process search path.
    #[must_use]
    pub fn new(options: &'a Options) -> Self {
        Self::with_parts(options, RawLoader, ProcessSearchPath)
    }
}

impl<'a, L: ProcessScope, S: SearchPath> ImplicitLink<'a, L, S> {
    /// Creates the probe on top of `loader` and `search_path`.
    pub fn with_parts(options: &'a Options, loader: L, search_path: S) -> Self {
        Self {
            options,
            loader,
            search_path,
        }
    }
}

impl<L: ProcessScope, S: SearchPath> Probe for ImplicitLink<'_, L, S> {
    fn strategy(&self) -> ProbeStrategy {
        ProbeStrategy::ImplicitLink
    }

    fn attempt(&self) -> ProbeResult {
        let _span = info_span!("probe", strategy = %self.strategy()).entered();
        let mut steps = Vec::new();

        let invocation = load_default(
            self.options,
            &self.loader,
            &self.search_path,
            LABEL,
            &mut steps,
        );

        ProbeResult::from_invocation(self.strategy(), steps, invocation)
    }
}
