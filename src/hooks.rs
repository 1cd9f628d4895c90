//! Collaborator contracts consumed during packaging.
//!
//! The package controller never inspects how a flow executes, how its
//! environment is bootstrapped, or where finished packages are uploaded.
//! It talks to those systems only through the traits in this module.

use crate::error::StorageError;
use camino::Utf8PathBuf;
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A `(source path, archive name)` pair contributed by a collaborator.
pub type ContributedFile = (Utf8PathBuf, String);

/// Failure reported by a hook or environment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl CollaboratorError {
    /// Create an error carrying `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Sink for user-facing status lines.
#[derive(Clone)]
pub struct Echo(Arc<dyn Fn(&str) + Send + Sync>);

impl Echo {
    /// Forward lines to `sink`.
    #[must_use]
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self(Arc::new(sink))
    }

    /// An echo that discards every line.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    /// Emit one status line.
    pub fn line(&self, message: &str) {
        (self.0)(message);
    }
}

impl Default for Echo {
    fn default() -> Self {
        Self::silent()
    }
}

impl fmt::Debug for Echo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Echo(..)")
    }
}

/// Read-only description of a flow, handed to step hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphView {
    /// Flow name.
    pub name: String,
    /// Step names in graph order.
    pub steps: Vec<String>,
}

/// Per-step packaging hook.
pub trait StepHook: Send {
    /// Prepare the hook before any file is gathered.
    ///
    /// # Errors
    ///
    /// Returns an error to abort packaging.
    fn package_init(
        &mut self,
        graph: &GraphView,
        step: &str,
        environment: &dyn Environment,
    ) -> Result<(), CollaboratorError>;

    /// Files this hook needs inside the package, as `(source, file name)`.
    ///
    /// # Errors
    ///
    /// Returns an error to abort packaging.
    fn add_to_package(&self) -> Result<Vec<ContributedFile>, CollaboratorError>;
}

/// The execution environment a package is built for.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait Environment: Send {
    /// Bootstrap the environment, reporting progress through `echo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be initialised.
    fn init_environment(&mut self, echo: &Echo) -> Result<(), CollaboratorError>;

    /// Files the environment needs inside the package.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be enumerated.
    fn add_to_package(&self) -> Result<Vec<ContributedFile>, CollaboratorError>;

    /// Structured description of the environment, stored as `INFO`.
    ///
    /// # Errors
    ///
    /// Returns an error if the description cannot be produced.
    fn environment_info(&self, include_ext_info: bool) -> Result<Value, CollaboratorError>;
}

/// Location and digest of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Where the blob can be fetched from.
    pub url: String,
    /// Content digest of the blob.
    pub digest: String,
}

/// Destination for finished packages.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait PackageStore: Send + Sync {
    /// Persist `blobs`, returning one location per blob in order.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if any blob cannot be stored.
    fn save(&self, blobs: &[Vec<u8>], len_hint: usize) -> Result<Vec<StoredBlob>, StorageError>;
}

/// One step of a flow and the hooks attached to it.
pub struct FlowStep {
    /// Step name.
    pub name: String,
    /// Hooks attached to the step, in declaration order.
    pub hooks: Vec<Box<dyn StepHook>>,
}

impl FlowStep {
    /// A step without hooks.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hooks: Vec::new(),
        }
    }

    /// Attach `hook` to the step.
    #[must_use]
    pub fn with_hook(mut self, hook: impl StepHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }
}

impl fmt::Debug for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowStep")
            .field("name", &self.name)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// The flow being packaged.
#[derive(Debug)]
pub struct FlowGraph {
    /// Flow name.
    pub name: String,
    /// Steps in graph order.
    pub steps: Vec<FlowStep>,
    /// Configuration values snapshotted into `CONFIG_PARAMETERS`.
    pub config_values: Value,
}

impl FlowGraph {
    /// A flow with no steps and an empty configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            config_values: Value::Object(Map::new()),
        }
    }

    /// Append `step`.
    #[must_use]
    pub fn with_step(mut self, step: FlowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Replace the configuration snapshot.
    #[must_use]
    pub fn with_config(mut self, config_values: Value) -> Self {
        self.config_values = config_values;
        self
    }

    /// A read-only view for hooks.
    #[must_use]
    pub fn view(&self) -> GraphView {
        GraphView {
            name: self.name.clone(),
            steps: self.steps.iter().map(|step| step.name.clone()).collect(),
        }
    }
}

/// The environment of the current host, contributing no files.
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
    extensions: Map<String, Value>,
}

impl HostEnvironment {
    /// Create a host environment description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an installed extension, reported when extension info is requested.
    #[must_use]
    pub fn with_extension(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.extensions
            .insert(name.into(), Value::String(version.into()));
        self
    }
}

impl Environment for HostEnvironment {
    fn init_environment(&mut self, _echo: &Echo) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn add_to_package(&self) -> Result<Vec<ContributedFile>, CollaboratorError> {
        Ok(Vec::new())
    }

    fn environment_info(&self, include_ext_info: bool) -> Result<Value, CollaboratorError> {
        let mut info = Map::new();
        info.insert("environment_type".to_owned(), json!("host"));
        info.insert("platform".to_owned(), json!(std::env::consts::OS));
        info.insert("arch".to_owned(), json!(std::env::consts::ARCH));
        info.insert(
            "codepack_version".to_owned(),
            json!(env!("CARGO_PKG_VERSION")),
        );
        if include_ext_info {
            info.insert("ext_info".to_owned(), Value::Object(self.extensions.clone()));
        }
        Ok(Value::Object(info))
    }
}
