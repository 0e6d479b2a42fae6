use super::{open_failed, released, Probe, ProbeResult, ProbeStrategy, Step};
use crate::{invoker, loader, Error, Invocation, Loader, Options, PlatformLoader, RawLoader};
use std::path::PathBuf;
use tracing::{info, info_span};

/// Opens an ordered list of candidates with explicit handles until one
/// succeeds, then looks up and calls the symbol and releases the handle.
///
/// [`HandleProbe::explicit`] goes through the raw OS loader,
/// [`HandleProbe::platform`] through [`libloading`]. Both share the same
/// contract: first success wins, one handle open at a time, released on every
/// exit path.
#[derive(Debug)]
pub struct HandleProbe<'a, L> {
    /// Strategy reported in results.
    strategy: ProbeStrategy,
    /// What to probe.
    options: &'a Options,
    /// Loader opening the candidates.
    loader: L,
    /// Targets in priority order.
    candidates: Vec<PathBuf>,
}

impl<'a> HandleProbe<'a, RawLoader> {
    /// Opens [`Options::candidates`] with the raw OS loader.
    #[must_use]
    pub fn explicit(options: &'a Options) -> Self {
        Self::with_parts(
            ProbeStrategy::ExplicitHandle,
            options,
            RawLoader,
            options.candidates(),
        )
    }
}

impl<'a> HandleProbe<'a, PlatformLoader> {
    /// Opens [`Options::name_variants`] with [`libloading`].
    #[must_use]
    pub fn platform(options: &'a Options) -> Self {
        Self::with_parts(
            ProbeStrategy::PlatformLoaderApi,
            options,
            PlatformLoader,
            options.name_variants(),
        )
    }
}

impl<'a, L: Loader> HandleProbe<'a, L> {
    /// Creates the probe opening `candidates` with `loader`.
    pub fn with_parts(
        strategy: ProbeStrategy,
        options: &'a Options,
        loader: L,
        candidates: Vec<PathBuf>,
    ) -> Self {
        Self {
            strategy,
            options,
            loader,
            candidates,
        }
    }

    /// Looks up and calls the symbol in an open handle.
    fn call(&self, handle: &L::Handle, label: &str, steps: &mut Vec<Step>) -> Invocation {
        let symbol = self.options.symbol();

        match self.loader.symbol(handle, symbol) {
            Ok(fun) => {
                info!(symbol = ?symbol, "found symbol");
                steps.push(Step::SymbolFound(symbol.to_string_lossy().into_owned()));

                // the handle stays open until the string is decoded
                unsafe { invoker::invoke(label, || Ok(fun())) }
            }
            Err(error) => {
                steps.push(Step::SymbolMissing(symbol.to_string_lossy().into_owned()));
                Invocation::failed(label, error)
            }
        }
    }
}

impl<L: Loader> Probe for HandleProbe<'_, L> {
    fn strategy(&self) -> ProbeStrategy {
        self.strategy
    }

    fn attempt(&self) -> ProbeResult {
        let _span = info_span!("probe", strategy = %self.strategy).entered();
        let label = format!("{} call", self.loader.api());
        let mut steps = Vec::new();
        let mut last_error = None;

        for target in &self.candidates {
            let scoped = loader::with_handle(&self.loader, target, |handle| {
                steps.push(Step::Opened {
                    api: self.loader.api(),
                    target: target.clone(),
                });

                self.call(handle, &label, &mut steps)
            });

            match scoped {
                Ok(released_handle) => {
                    steps.push(released(target, released_handle.close));
                    return ProbeResult::from_invocation(
                        self.strategy,
                        steps,
                        released_handle.value,
                    );
                }
                Err(error) => {
                    steps.push(open_failed(self.loader.api(), target, &error));
                    last_error = Some(error);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| Error::LibraryNotFound {
            name: self.options.library().to_owned(),
            message: String::from("no candidates"),
        });

        ProbeResult::failed(self.strategy, steps, error)
    }
}

#[cfg(test)]
mod test {
    use super::HandleProbe;
    use crate::{
        loader::fake::{self, FakeLoader},
        ErrorKind, Options, Probe, ProbeStrategy, Step,
    };
    use std::path::{Path, PathBuf};

    fn candidates() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/opt/app/x64/libfixture.so"),
            PathBuf::from("/opt/app/libfixture.so"),
            PathBuf::from("libfixture.so"),
        ]
    }

    #[test]
    fn first_success_wins() {
        let options = Options::new("/opt/app");
        let loader = FakeLoader::new(
            &["/opt/app/libfixture.so", "libfixture.so"],
            Some(fake::version),
        );

        let result = HandleProbe::with_parts(
            ProbeStrategy::ExplicitHandle,
            &options,
            &loader,
            candidates(),
        )
        .attempt();

        assert!(result.succeeded());
        assert_eq!(Some(fake::VERSION), result.value());
        assert_eq!("fake call succeeded, value: 3.45.1", result.message());
        assert_eq!(Some(Path::new("/opt/app/libfixture.so")), result.opened());
        // the third candidate is never tried
        assert_eq!(candidates()[..2], loader.attempts.borrow()[..]);
        loader.assert_balanced();
    }

    #[test]
    fn steps() {
        let options = Options::new("/opt/app");
        let loader = FakeLoader::new(&["/opt/app/libfixture.so"], Some(fake::version));

        let result = HandleProbe::with_parts(
            ProbeStrategy::PlatformLoaderApi,
            &options,
            &loader,
            candidates(),
        )
        .attempt();

        assert_eq!(
            &[
                Step::OpenFailed {
                    api: "fake",
                    target: PathBuf::from("/opt/app/x64/libfixture.so"),
                    code: Some(126),
                    message: String::from("not found"),
                },
                Step::Opened {
                    api: "fake",
                    target: PathBuf::from("/opt/app/libfixture.so"),
                },
                Step::SymbolFound(String::from("sqlite3_libversion")),
                Step::Released(PathBuf::from("/opt/app/libfixture.so")),
            ],
            result.steps()
        );
    }

    #[test]
    fn all_fail() {
        let options = Options::new("/opt/app");
        let loader = FakeLoader::new::<&str>(&[], Some(fake::version));

        let result = HandleProbe::with_parts(
            ProbeStrategy::ExplicitHandle,
            &options,
            &loader,
            candidates(),
        )
        .attempt();

        assert!(!result.succeeded());
        assert_eq!(Some(ErrorKind::HandleOpenFailed), result.error_kind());
        assert!(result.error().unwrap().to_string().contains("`libfixture.so`"));
        assert_eq!(Some(126), result.error().unwrap().code());
        assert_eq!(candidates(), *loader.attempts.borrow());
        assert_eq!(0, *loader.acquired.borrow());
    }

    #[test]
    fn symbol_missing() {
        let options = Options::new("/opt/app");
        let loader = FakeLoader::new(&["/opt/app/x64/libfixture.so"], None);

        let result = HandleProbe::with_parts(
            ProbeStrategy::ExplicitHandle,
            &options,
            &loader,
            candidates(),
        )
        .attempt();

        assert_eq!(Some(ErrorKind::SymbolNotFound), result.error_kind());
        assert_eq!(
            Some(&Step::Released(PathBuf::from("/opt/app/x64/libfixture.so"))),
            result.steps().last()
        );
        assert_eq!(1, loader.attempts.borrow().len());
        loader.assert_balanced();
    }

    #[test]
    fn constructors() {
        let options = Options::new("/opt/app");

        let explicit = HandleProbe::explicit(&options);
        assert_eq!(ProbeStrategy::ExplicitHandle, explicit.strategy());
        assert_eq!(options.candidates(), explicit.candidates);

        let platform = HandleProbe::platform(&options);
        assert_eq!(ProbeStrategy::PlatformLoaderApi, platform.strategy());
        assert_eq!(options.name_variants(), platform.candidates);
    }
}
