//! Sequential execution of all probes.

use crate::{
    ffi, search_path, Error, HandleProbe, ImplicitLink, Options, Probe, ProbeResult,
    ProcessSearchPath, SearchPath, SearchPathOverride,
};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use tracing::{error, info};

/// Runs the probes one after another on the calling thread.
///
/// The search directory observed before a probe is put back after it, a
/// probe failing, or even panicking, never stops the run.
///
/// # Examples
/// ```no_run
/// # use dylib_probe::{Options, Runner};
/// let options = Options::new("/opt/app");
///
/// for result in Runner::new(&options).run() {
///     println!("{}", result);
/// }
/// ```
pub struct Runner<'a, S = ProcessSearchPath> {
    /// Probes in the order they run.
    probes: Vec<Box<dyn Probe + 'a>>,
    /// Search directory to keep stable between probes.
    search_path: S,
}

impl<S: Debug> Debug for Runner<'_, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Runner")
            .field(
                "probes",
                &self
                    .probes
                    .iter()
                    .map(|probe| probe.strategy())
                    .collect::<Vec<_>>(),
            )
            .field("search_path", &self.search_path)
            .finish()
    }
}

impl<'a> Runner<'a> {
    /// Creates a runner with the four strategies in their fixed order:
    /// implicit link, search path override, explicit handle and platform
    /// loader API.
    #[must_use]
    pub fn new(options: &'a Options) -> Self {
        Self::with_parts(
            vec![
                Box::new(ImplicitLink::new(options)),
                Box::new(SearchPathOverride::new(options)),
                Box::new(HandleProbe::explicit(options)),
                Box::new(HandleProbe::platform(options)),
            ],
            ProcessSearchPath,
        )
    }
}

impl<'a, S: SearchPath> Runner<'a, S> {
    /// Creates a runner for `probes`, keeping `search_path` stable between
    /// them.
    pub fn with_parts(probes: Vec<Box<dyn Probe + 'a>>, search_path: S) -> Self {
        Self {
            probes,
            search_path,
        }
    }

    /// Runs all probes.
    #[must_use]
    pub fn run(&self) -> Vec<ProbeResult> {
        self.run_with(|_| ())
    }

    /// Runs all probes, handing every result to `report` as soon as it's
    /// available.
    pub fn run_with(&self, mut report: impl FnMut(&ProbeResult)) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.probes.len());

        for probe in &self.probes {
            let result = self.run_one(probe.as_ref());
            report(&result);
            results.push(result);
        }

        let succeeded = results.iter().filter(|result| result.succeeded()).count();
        info!(succeeded, total = results.len(), "probes finished");

        results
    }

    /// Runs one probe and puts the search directory back if it changed.
    fn run_one(&self, probe: &dyn Probe) -> ProbeResult {
        let before = self.search_path.get();

        let result = ffi::catch(|| probe.attempt()).unwrap_or_else(|panic| {
            error!(strategy = %probe.strategy(), %panic, "probe panicked");
            ProbeResult::failed(probe.strategy(), Vec::new(), Error::InvocationFailed(panic))
        });

        match (before, self.search_path.get()) {
            (Ok(before), Ok(after)) if before != after => {
                error!(
                    strategy = %probe.strategy(),
                    ?before,
                    ?after,
                    "search directory changed by probe, resetting"
                );

                if let Err(error) = self.search_path.set(before.as_deref()) {
                    error!(%error, "failed to reset search directory");
                }
            }
            (Err(error), _) | (_, Err(error)) => {
                error!(%error, "failed to query search directory");
            }
            _ => (),
        }

        let search_path = search_path::describe(&self.search_path);

        match result.error() {
            None => info!(strategy = %probe.strategy(), %search_path, "probe succeeded"),
            Some(error) => {
                error!(strategy = %probe.strategy(), %search_path, %error, "probe failed");
            }
        }

        result
    }
}
