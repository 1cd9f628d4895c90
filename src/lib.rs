//! Deterministic, content-addressable code packages.
//!
//! A code package bundles everything needed to re-run a flow elsewhere: the
//! user's working directory, the runtime's own sources, the files behind
//! each imported module, files contributed by step hooks and the
//! environment, and generated metadata. Identical logical content always
//! yields identical bytes, so a package's digest doubles as a cache key.
//!
//! The pipeline is driven by [`PackageController`]:
//!
//! ```no_run
//! use codepack::{FlowGraph, HostEnvironment, PackageController, PackageRequest};
//!
//! let request = PackageRequest::new(FlowGraph::new("TrainFlow"), HostEnvironment::new(), ".");
//! let package = PackageController::start(request).wait(None)?;
//! println!("{} bytes", package.bytes.len());
//! # Ok::<(), codepack::WaitError>(())
//! ```

pub mod aggregator;
pub mod archive;
pub mod config;
pub mod controller;
pub mod distribution;
pub mod entry;
pub mod error;
pub mod hooks;
pub mod special;
pub mod store;
pub mod suffixes;
pub mod walk;

pub use aggregator::FileAggregator;
pub use archive::{ArchiveBuilder, ArchiveReader, BuiltArchive, OversizeWarning};
pub use config::{ConfigError, PackageConfig};
pub use controller::{PackageBlob, PackageController, PackageRequest, PackageStatus};
pub use distribution::{
    DistInfoIndex, DistributionCache, DistributionIndex, DistributionManifest,
    DistributionResolver, NoDistributions,
};
pub use entry::{CLOSING_MARKER, FileEntry, FileSource, ModuleRecord, RUNTIME_DIR};
pub use error::{AssemblyError, PackageError, StorageError, WaitError};
pub use hooks::{
    CollaboratorError, Echo, Environment, FlowGraph, FlowStep, GraphView, HostEnvironment,
    PackageStore, StepHook, StoredBlob,
};
pub use special::{SpecialContentStore, SpecialFile};
pub use store::LocalStore;
pub use suffixes::SuffixList;
pub use walk::{DirectoryListing, WalkError, walk};
