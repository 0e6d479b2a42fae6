use super::{load_default, Probe, ProbeResult, ProbeStrategy, Step};
use crate::{search_path, Options, ProcessScope, ProcessSearchPath, RawLoader, SearchPath};
use tracing::{info_span, warn};

/// Label of the invocation with the override applied.
const LABEL: &str = "search path load";
/// Label of the fallback invocation without override.
const FALLBACK_LABEL: &str = "current directory load";

/// Sets the architecture directory as process search directory, loads the
/// library like [`ImplicitLink`](super::ImplicitLink) and restores the
/// previous search directory.
///
/// A missing architecture directory isn't an error: the default load is
/// attempted without override.
#[derive(Debug)]
pub struct SearchPathOverride<'a, L = RawLoader, S = ProcessSearchPath> {
    /// What to probe.
    options: &'a Options,
    /// Loader resolving the import.
    loader: L,
    /// Search directory to override.
    search_path: S,
}

impl<'a> SearchPathOverride<'a> {
    /// Creates the probe on top of the OS loader and process search path.
    #[must_use]
    pub fn new(options: &'a Options) -> Self {
        Self::with_parts(options, RawLoader, ProcessSearchPath)
    }
}

impl<'a, L: ProcessScope, S: SearchPath> SearchPathOverride<'a, L, S> {
    /// Creates the probe on top of `loader` and `search_path`.
    pub fn with_parts(options: &'a Options, loader: L, search_path: S) -> Self {
        Self {
            options,
            loader,
            search_path,
        }
    }
}

impl<L: ProcessScope, S: SearchPath> Probe for SearchPathOverride<'_, L, S> {
    fn strategy(&self) -> ProbeStrategy {
        ProbeStrategy::SearchPathOverride
    }

    fn attempt(&self) -> ProbeResult {
        let _span = info_span!("probe", strategy = %self.strategy()).entered();
        let mut steps = Vec::new();
        let directory = self.options.arch_dir();

        if !directory.is_dir() {
            warn!(
                directory = %directory.display(),
                "architecture directory missing, no override applied"
            );
            steps.push(Step::SearchPathMissing(directory));

            let invocation = load_default(
                self.options,
                &self.loader,
                &self.search_path,
                FALLBACK_LABEL,
                &mut steps,
            );

            return ProbeResult::from_invocation(self.strategy(), steps, invocation);
        }

        let previous = self.search_path.get();
        let invocation = search_path::with_directory(&self.search_path, &directory, || {
            steps.push(Step::SearchPathSet(directory.clone()));

            load_default(
                self.options,
                &self.loader,
                &self.search_path,
                LABEL,
                &mut steps,
            )
        });

        match invocation {
            Ok(invocation) => {
                steps.push(Step::SearchPathRestored(previous.unwrap_or_default()));
                ProbeResult::from_invocation(self.strategy(), steps, invocation)
            }
            Err(error) => ProbeResult::failed(self.strategy(), steps, error),
        }
    }
}

#[cfg(test)]
mod test {
    use super::SearchPathOverride;
    use crate::{
        loader::fake::{self, FakeLoader},
        search_path::fake::FakeSearchPath,
        ErrorKind, Options, Probe, SearchPath, Step,
    };
    use std::{
        fs,
        path::{Path, PathBuf},
    };
    use tempfile::TempDir;

    fn options(base_dir: &Path) -> Options {
        let mut options = Options::new(base_dir);
        options.set_library("fixture");
        options.set_64bit(true);
        options
    }

    fn with_arch_dir() -> (TempDir, Options) {
        let base_dir = tempfile::tempdir().unwrap();
        fs::create_dir(base_dir.path().join("x64")).unwrap();
        let options = options(base_dir.path());
        (base_dir, options)
    }

    #[test]
    fn override_applied() {
        let (_base_dir, options) = with_arch_dir();
        let in_arch_dir = options.arch_dir().join(options.file_name());
        let loader = FakeLoader::new(&[&in_arch_dir], Some(fake::version));
        let search_path = FakeSearchPath::new(None);

        let result = SearchPathOverride::with_parts(&options, &loader, &search_path).attempt();

        assert!(result.succeeded());
        assert_eq!(
            "search path load succeeded, value: 3.45.1",
            result.message()
        );
        assert_eq!(Some(in_arch_dir.as_path()), result.opened());
        assert_eq!(
            Some(&Step::SearchPathSet(options.arch_dir())),
            result.steps().first()
        );
        assert_eq!(
            Some(&Step::SearchPathRestored(None)),
            result.steps().last()
        );
        assert_eq!(None, search_path.get().unwrap());
        loader.assert_balanced();
    }

    #[test]
    fn restores_previous_on_failure() {
        let (_base_dir, options) = with_arch_dir();
        let loader = FakeLoader::new::<&str>(&[], Some(fake::version));
        let previous = PathBuf::from("/opt/previous");
        let search_path = FakeSearchPath::new(Some(previous.as_path()));

        let result = SearchPathOverride::with_parts(&options, &loader, &search_path).attempt();

        assert_eq!(Some(ErrorKind::LibraryNotFound), result.error_kind());
        assert_eq!(Some(previous.clone()), search_path.get().unwrap());
        assert_eq!(
            vec![Some(options.arch_dir()), Some(previous)],
            *search_path.history.borrow()
        );
        loader.assert_balanced();
    }

    #[test]
    fn missing_directory_falls_back() {
        let base_dir = tempfile::tempdir().unwrap();
        let options = options(base_dir.path());
        let loader = FakeLoader::new(&[options.file_name()], Some(fake::version));
        let search_path = FakeSearchPath::new(None);

        let result = SearchPathOverride::with_parts(&options, &loader, &search_path).attempt();

        assert!(result.succeeded());
        assert_eq!(
            "current directory load succeeded, value: 3.45.1",
            result.message()
        );
        assert_eq!(
            Some(&Step::SearchPathMissing(options.arch_dir())),
            result.steps().first()
        );
        assert!(search_path.history.borrow().is_empty());
        loader.assert_balanced();
    }

    #[cfg(not(windows))]
    #[test]
    fn fallback_application_directory() {
        let base_dir = tempfile::tempdir().unwrap();
        let options = options(base_dir.path());
        let in_app_dir = options.base_dir().join(options.file_name());
        let loader = FakeLoader::new(&[&in_app_dir], Some(fake::version));
        let search_path = FakeSearchPath::new(None);

        let result = SearchPathOverride::with_parts(&options, &loader, &search_path).attempt();

        assert_eq!(
            "current directory load succeeded, value: 3.45.1",
            result.message()
        );
        assert_eq!(Some(in_app_dir.as_path()), result.opened());
        loader.assert_balanced();
    }

    #[test]
    fn set_failure() {
        let (_base_dir, options) = with_arch_dir();
        let loader = FakeLoader::new(&[options.file_name()], Some(fake::version));
        let search_path = FakeSearchPath::new(None);
        search_path.fail_set.set(Some(87));

        let result = SearchPathOverride::with_parts(&options, &loader, &search_path).attempt();

        assert!(!result.succeeded());
        assert_eq!(Some(ErrorKind::SearchPathSetFailed), result.error_kind());
        assert_eq!(Some(87), result.error().unwrap().code());
        assert!(loader.attempts.borrow().is_empty());
        assert_eq!(None, search_path.get().unwrap());
    }

    #[test]
    fn symbol_missing() {
        let (_base_dir, options) = with_arch_dir();
        let in_arch_dir = options.arch_dir().join(options.file_name());
        let loader = FakeLoader::new(&[&in_arch_dir], None);
        let search_path = FakeSearchPath::new(None);

        let result = SearchPathOverride::with_parts(&options, &loader, &search_path).attempt();

        assert_eq!(Some(ErrorKind::SymbolNotFound), result.error_kind());
        assert!(result.steps().contains(&Step::Released(in_arch_dir)));
        assert_eq!(None, search_path.get().unwrap());
        loader.assert_balanced();
    }
}
