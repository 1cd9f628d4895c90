//! Package controller: runs assembly once and publishes the outcome.
//!
//! [`PackageController::start`] kicks off the whole pipeline, either on a
//! detached worker thread or on the calling thread, and returns a handle.
//! The handle moves from pending to exactly one terminal state, available
//! or failed, and every [`PackageController::wait`] call observes that same
//! outcome. Abandoning the handle does not stop the worker.

use crate::aggregator::FileAggregator;
use crate::archive::{ArchiveBuilder, BuiltArchive, OversizeWarning};
use crate::config::PackageConfig;
use crate::distribution::{
    DistributionCache, DistributionIndex, DistributionManifest, DistributionResolver,
    NoDistributions,
};
use crate::entry::{FileEntry, ModuleRecord, runtime_archive_path};
use crate::error::{AssemblyError, PackageError, StorageError, WaitError};
use crate::hooks::{CollaboratorError, Echo, Environment, FlowGraph, PackageStore};
use crate::special::{SpecialContentStore, SpecialFile};
use crate::suffixes::SuffixList;
use crate::walk::{collect, collect_contents};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A finished package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageBlob {
    /// Compressed archive bytes.
    pub bytes: Vec<u8>,
    /// Digest reported by the store, once stored.
    pub digest: Option<String>,
    /// Location reported by the store, once stored.
    pub url: Option<String>,
    /// Set when the package exceeded the size warning threshold.
    pub oversize: Option<OversizeWarning>,
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    /// Assembly or upload is still running.
    Pending,
    /// The package was built (and stored, when a store was supplied).
    Available,
    /// Assembly or upload failed.
    Failed,
}

/// Everything needed to assemble one package.
pub struct PackageRequest {
    flow: FlowGraph,
    environment: Box<dyn Environment>,
    flow_dir: Utf8PathBuf,
    modules: Vec<ModuleRecord>,
    config: PackageConfig,
    store: Option<Arc<dyn PackageStore>>,
    index: Arc<dyn DistributionIndex>,
    cache: DistributionCache,
    echo: Echo,
}

impl PackageRequest {
    /// Package `flow` from the working directory `flow_dir`.
    ///
    /// The request starts with no modules, no store, default configuration,
    /// a fresh distribution cache and a silent echo.
    #[must_use]
    pub fn new(
        flow: FlowGraph,
        environment: impl Environment + 'static,
        flow_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            flow,
            environment: Box::new(environment),
            flow_dir: flow_dir.into(),
            modules: Vec::new(),
            config: PackageConfig::default(),
            store: None,
            index: Arc::new(NoDistributions),
            cache: DistributionCache::new(),
            echo: Echo::silent(),
        }
    }

    /// Modules to resolve and package under the runtime directory.
    #[must_use]
    pub fn with_modules(mut self, modules: impl IntoIterator<Item = ModuleRecord>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: PackageConfig) -> Self {
        self.config = config;
        self
    }

    /// Upload the finished package to `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn PackageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Look up distributions through `index`.
    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn DistributionIndex>) -> Self {
        self.index = index;
        self
    }

    /// Share `cache` with other requests.
    #[must_use]
    pub fn with_cache(mut self, cache: DistributionCache) -> Self {
        self.cache = cache;
        self
    }

    /// Send status lines to `echo`.
    #[must_use]
    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }
}

impl fmt::Debug for PackageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageRequest")
            .field("flow", &self.flow)
            .field("flow_dir", &self.flow_dir)
            .field("modules", &self.modules)
            .field("config", &self.config)
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum State {
    Pending,
    Available(Arc<PackageBlob>),
    Failed(Arc<PackageError>),
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    settled: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, outcome: Result<PackageBlob, PackageError>) {
        let mut state = self.lock();
        if !matches!(*state, State::Pending) {
            return;
        }
        *state = match outcome {
            Ok(blob) => State::Available(Arc::new(blob)),
            Err(err) => State::Failed(Arc::new(err)),
        };
        self.settled.notify_all();
    }
}

/// Handle on a package being assembled.
#[derive(Debug, Clone)]
pub struct PackageController {
    flow_name: String,
    created_at: SystemTime,
    shared: Arc<Shared>,
}

impl PackageController {
    /// Start assembling the package described by `request`.
    ///
    /// With `background` enabled in the configuration, the pipeline runs on
    /// a detached thread and this returns immediately; otherwise it runs to
    /// completion first. Failures are never raised here; they surface from
    /// [`Self::wait`].
    #[must_use]
    pub fn start(request: PackageRequest) -> Self {
        let controller = Self {
            flow_name: request.flow.name.clone(),
            created_at: SystemTime::now(),
            shared: Arc::new(Shared::new()),
        };

        if request.config.background {
            let shared = Arc::clone(&controller.shared);
            let spawned = thread::Builder::new()
                .name(format!("codepack-{}", controller.flow_name))
                .spawn(move || shared.publish(run_guarded(request)));
            if let Err(err) = spawned {
                controller.shared.publish(Err(PackageError::WorkerLost {
                    reason: format!("could not spawn worker: {err}"),
                }));
            }
        } else {
            controller.shared.publish(run_guarded(request));
        }
        controller
    }

    /// Name of the flow being packaged.
    #[must_use]
    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    /// When the controller was started.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Current state, without blocking.
    #[must_use]
    pub fn status(&self) -> PackageStatus {
        match *self.shared.lock() {
            State::Pending => PackageStatus::Pending,
            State::Available(_) => PackageStatus::Available,
            State::Failed(_) => PackageStatus::Failed,
        }
    }

    /// `Some(true)` once available, `Some(false)` once failed, `None` while
    /// pending.
    #[must_use]
    pub fn is_package_available(&self) -> Option<bool> {
        match self.status() {
            PackageStatus::Pending => None,
            PackageStatus::Available => Some(true),
            PackageStatus::Failed => Some(false),
        }
    }

    /// The package, if it is already available.
    #[must_use]
    pub fn blob(&self) -> Option<Arc<PackageBlob>> {
        match &*self.shared.lock() {
            State::Available(blob) => Some(Arc::clone(blob)),
            State::Pending | State::Failed(_) => None,
        }
    }

    /// Block until the package settles or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Timing out leaves the worker running, so
    /// a later call may still observe completion.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] if the package is still pending at the
    /// deadline, or [`WaitError::Failed`] carrying the stored failure.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Arc<PackageBlob>, WaitError> {
        let guard = self.shared.lock();
        let pending = |state: &mut State| matches!(state, State::Pending);
        let guard = match timeout {
            Some(limit) => {
                self.shared
                    .settled
                    .wait_timeout_while(guard, limit, pending)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .shared
                .settled
                .wait_while(guard, pending)
                .unwrap_or_else(PoisonError::into_inner),
        };
        match &*guard {
            State::Pending => Err(WaitError::Timeout {
                timeout: timeout.unwrap_or_default(),
            }),
            State::Available(blob) => Ok(Arc::clone(blob)),
            State::Failed(err) => Err(WaitError::Failed(Arc::clone(err))),
        }
    }
}

impl fmt::Display for PackageController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let created = self
            .created_at
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        write!(
            f,
            "<code package for flow {} (created @ {created})>",
            self.flow_name
        )
    }
}

/// Run the pipeline, turning a panic in collaborator code into a failure.
fn run_guarded(request: PackageRequest) -> Result<PackageBlob, PackageError> {
    let flow_name = request.flow.name.clone();
    let echo = request.echo.clone();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(request))).unwrap_or_else(|_| {
        Err(PackageError::WorkerLost {
            reason: "package worker panicked".to_owned(),
        })
    });

    match &outcome {
        Ok(blob) => {
            let message = match &blob.url {
                Some(url) => format!("Package created and uploaded successfully at URL: {url}"),
                None => "Package created successfully".to_owned(),
            };
            log::info!("{message}");
            echo.line(&message);
        }
        Err(err) => {
            let message = format!(
                "Package creation/upload failed for flow: {flow_name}, error: {}",
                error_chain(err)
            );
            log::error!("{message}");
            echo.line(&message);
        }
    }
    outcome
}

fn run(request: PackageRequest) -> Result<PackageBlob, PackageError> {
    let PackageRequest {
        mut flow,
        mut environment,
        flow_dir,
        modules,
        config,
        store,
        index,
        cache,
        echo,
    } = request;

    environment
        .init_environment(&echo)
        .map_err(environment_error)?;
    let view = flow.view();
    for step in &mut flow.steps {
        for hook in &mut step.hooks {
            hook.package_init(&view, &step.name, environment.as_ref())
                .map_err(|err| hook_error(&step.name, err))?;
        }
    }

    let sources = Sources {
        flow: &flow,
        environment: environment.as_ref(),
        flow_dir: &flow_dir,
        modules: &modules,
        config: &config,
        index: index.as_ref(),
        cache,
    };
    let built = assemble(&sources)?;
    if let Some(warning) = &built.oversize {
        echo.line(&warning.to_string());
    }

    let mut blob = PackageBlob {
        bytes: built.bytes,
        digest: None,
        url: None,
        oversize: built.oversize,
    };
    if let Some(store) = store {
        let stored = store
            .save(std::slice::from_ref(&blob.bytes), 1)?
            .into_iter()
            .next()
            .ok_or(StorageError::MissingLocation {
                expected: 1,
                returned: 0,
            })?;
        blob.url = Some(stored.url);
        blob.digest = Some(stored.digest);
    }
    Ok(blob)
}

/// Inputs borrowed by [`assemble`].
struct Sources<'a> {
    flow: &'a FlowGraph,
    environment: &'a dyn Environment,
    flow_dir: &'a Utf8Path,
    modules: &'a [ModuleRecord],
    config: &'a PackageConfig,
    index: &'a dyn DistributionIndex,
    cache: DistributionCache,
}

/// Gather every contribution in precedence order and build the archive.
fn assemble(sources: &Sources<'_>) -> crate::error::Result<BuiltArchive> {
    let mut aggregator = FileAggregator::new();

    if let Some(runtime_root) = &sources.config.runtime_root {
        for file in collect(runtime_root, false, &SuffixList::runtime())? {
            aggregator.add_file(FileEntry::from_path(
                file.path,
                runtime_archive_path(&file.archive_path),
            ))?;
        }
    }

    let mut resolver = DistributionResolver::new(
        sources.index,
        sources.cache.clone(),
        sources.config.exclude_list(),
    );
    for module in sources.modules {
        aggregator.add_files(resolver.resolve_module(module)?)?;
    }

    for step in &sources.flow.steps {
        for hook in &step.hooks {
            let files = hook
                .add_to_package()
                .map_err(|err| hook_error(&step.name, err))?;
            aggregator.add_hook_files(&step.name, files)?;
        }
    }

    aggregator.add_runtime_files(
        sources
            .environment
            .add_to_package()
            .map_err(environment_error)?,
    )?;

    let suffixes = sources.config.effective_suffixes();
    for file in collect_contents(sources.flow_dir, true, &suffixes)? {
        aggregator.add_file(FileEntry::from_path(file.path, file.archive_path))?;
    }

    let mut info = sources
        .environment
        .environment_info(true)
        .map_err(environment_error)?;
    if let Value::Object(fields) = &mut info {
        fields.insert(
            "distributions".to_owned(),
            distributions_info(resolver.distributions_used()),
        );
    }
    let mut special = SpecialContentStore::new();
    special.put_json(SpecialFile::Info, &info)?;
    special.put_json(SpecialFile::Config, &sources.flow.config_values)?;

    ArchiveBuilder::new()
        .with_size_warning(sources.config.size_warning_bytes)
        .build(aggregator.files(), &special)
}

fn distributions_info(used: &BTreeMap<String, Arc<DistributionManifest>>) -> Value {
    let entries: Map<String, Value> = used
        .iter()
        .map(|(name, manifest)| {
            (
                name.clone(),
                json!({
                    "metadata": manifest.metadata_text,
                    "record": manifest.record_text,
                }),
            )
        })
        .collect();
    Value::Object(entries)
}

fn environment_error(err: CollaboratorError) -> AssemblyError {
    AssemblyError::Environment {
        message: err.message,
    }
}

fn hook_error(step: &str, err: CollaboratorError) -> AssemblyError {
    AssemblyError::Hook {
        step: step.to_owned(),
        message: err.message,
    }
}

/// Render `err` followed by each of its sources.
fn error_chain(err: &dyn StdError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.contains(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
