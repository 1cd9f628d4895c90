//! CLI argument definitions for the `codepack` binary.
//!
//! Kept apart from the entrypoint so parsing can be tested without running
//! any command.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Build and inspect deterministic code packages.
#[derive(Parser, Debug)]
#[command(name = "codepack")]
#[command(version, about)]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Package the current directory:\n",
    "    $ codepack build . -o flow.tgz\n\n",
    "  Include an installed module and store the result by digest:\n",
    "    $ codepack build . --site-dir .venv/lib/python3.11/site-packages \\\n",
    "        -m requests --store ~/.cache/codepack\n\n",
    "  Inspect a package:\n",
    "    $ codepack list flow.tgz\n",
    "    $ codepack info flow.tgz",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true
    )]
    pub verbosity: u8,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Assemble a package from a flow directory.
    Build(BuildArgs),

    /// List the entries of an existing package.
    List(PackageArgs),

    /// Print the environment description stored in a package.
    Info(PackageArgs),
}

/// Arguments for the build command.
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Directory holding the flow's source code.
    #[arg(value_name = "FLOW_DIR")]
    pub flow_dir: Utf8PathBuf,

    /// Write the package to this file.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<Utf8PathBuf>,

    /// Configuration file [default: FLOW_DIR/codepack.toml when present].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Extra file suffix to package from the flow directory (repeatable).
    #[arg(short, long = "suffix", value_name = "SUFFIX")]
    pub suffixes: Vec<String>,

    /// Site directory searched for installed modules (repeatable).
    #[arg(long = "site-dir", value_name = "DIR")]
    pub site_dirs: Vec<Utf8PathBuf>,

    /// Top-level module to package from the site directories (repeatable).
    #[arg(short, long = "module", value_name = "NAME", requires = "site_dirs")]
    pub modules: Vec<String>,

    /// Runtime source tree to package under the reserved directory.
    #[arg(long, value_name = "DIR")]
    pub runtime_root: Option<Utf8PathBuf>,

    /// Store the package by digest in this directory.
    #[arg(long, value_name = "DIR")]
    pub store: Option<Utf8PathBuf>,

    /// Name recorded for the flow [default: FLOW_DIR's name].
    #[arg(long, value_name = "NAME")]
    pub flow_name: Option<String>,

    /// Seconds to wait for the package before giving up.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Build on the calling thread instead of a background worker.
    #[arg(long)]
    pub foreground: bool,
}

/// Arguments naming an existing package.
#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    /// Path to a package produced by `codepack build`.
    #[arg(value_name = "PACKAGE")]
    pub package: Utf8PathBuf,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
