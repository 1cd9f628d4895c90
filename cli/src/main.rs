//! `codepack` CLI entrypoint.
//!
//! Builds packages from a flow directory and inspects existing packages.
//! All packaging logic lives in the `codepack` library; this binary only
//! wires concrete collaborators together.

mod cli;
mod error;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use cli::{BuildArgs, Cli, Command, PackageArgs};
use codepack::store::sha256_hex;
use codepack::{
    ArchiveReader, DistInfoIndex, Echo, FlowGraph, HostEnvironment, LocalStore, ModuleRecord,
    PackageConfig, PackageController, PackageRequest, SpecialFile,
};
use error::{CliError, Result};
use std::fs;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbosity);
    let mut stdout = std::io::stdout();
    match run(&cli, &mut stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("codepack: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    match &cli.command {
        Command::Build(args) => build(args, out),
        Command::List(args) => list(args, out),
        Command::Info(args) => info(args, out),
    }
}

fn build(args: &BuildArgs, out: &mut dyn Write) -> Result<()> {
    let flow_dir = args
        .flow_dir
        .canonicalize_utf8()
        .map_err(|source| CliError::Io {
            path: args.flow_dir.clone(),
            source,
        })?;
    let config = build_config(args, &flow_dir)?;
    let index = DistInfoIndex::scan(&args.site_dirs)?;
    let modules = args
        .modules
        .iter()
        .map(|name| locate_module(name, &args.site_dirs))
        .collect::<Result<Vec<_>>>()?;
    let flow_name = args
        .flow_name
        .clone()
        .or_else(|| flow_dir.file_name().map(str::to_owned))
        .unwrap_or_else(|| "flow".to_owned());

    let flow = FlowGraph::new(flow_name);
    let mut request = PackageRequest::new(flow, HostEnvironment::new(), flow_dir)
        .with_config(config)
        .with_modules(modules)
        .with_index(Arc::new(index))
        .with_echo(Echo::new(|line| log::info!("{line}")));
    if let Some(store_dir) = &args.store {
        request = request.with_store(Arc::new(LocalStore::new(store_dir.clone())));
    }

    let controller = PackageController::start(request);
    let blob = controller.wait(args.timeout.map(Duration::from_secs))?;

    if let Some(output) = &args.output {
        fs::write(output, &blob.bytes).map_err(|source| CliError::Io {
            path: output.clone(),
            source,
        })?;
        writeln!(out, "wrote {output}").map_err(CliError::Output)?;
    }
    let digest = blob
        .digest
        .clone()
        .unwrap_or_else(|| sha256_hex(&blob.bytes));
    writeln!(out, "{controller}").map_err(CliError::Output)?;
    writeln!(out, "size: {} bytes", blob.bytes.len()).map_err(CliError::Output)?;
    writeln!(out, "sha256: {digest}").map_err(CliError::Output)?;
    if let Some(url) = &blob.url {
        writeln!(out, "url: {url}").map_err(CliError::Output)?;
    }
    Ok(())
}

/// Merge the configuration file with command-line overrides.
fn build_config(args: &BuildArgs, flow_dir: &Utf8Path) -> Result<PackageConfig> {
    let mut config = match &args.config {
        Some(path) => PackageConfig::load(path)?,
        None => PackageConfig::discover(flow_dir)?,
    };
    config.suffixes.extend(args.suffixes.iter().cloned());
    if let Some(root) = &args.runtime_root {
        config.runtime_root = Some(root.clone());
    }
    if args.foreground {
        config.background = false;
    }
    Ok(config)
}

/// Find every root of top-level module `name` across `site_dirs`.
fn locate_module(name: &str, site_dirs: &[Utf8PathBuf]) -> Result<ModuleRecord> {
    let roots: Vec<Utf8PathBuf> = site_dirs
        .iter()
        .flat_map(|dir| [dir.join(name), dir.join(format!("{name}.py"))])
        .filter(|candidate| candidate.exists())
        .collect();
    if roots.is_empty() {
        return Err(CliError::ModuleNotFound {
            name: name.to_owned(),
        });
    }
    ModuleRecord::resolved(name, &roots).map_err(|source| CliError::Io {
        path: roots.first().cloned().unwrap_or_default(),
        source,
    })
}

fn read_package(path: &Utf8Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| CliError::Io {
        path: path.to_owned(),
        source,
    })
}

fn list(args: &PackageArgs, out: &mut dyn Write) -> Result<()> {
    let bytes = read_package(&args.package)?;
    for name in ArchiveReader::new(&bytes).entry_names()? {
        writeln!(out, "{name}").map_err(CliError::Output)?;
    }
    Ok(())
}

fn info(args: &PackageArgs, out: &mut dyn Write) -> Result<()> {
    let bytes = read_package(&args.package)?;
    let contents = ArchiveReader::new(&bytes)
        .read_special(SpecialFile::Info)?
        .ok_or_else(|| CliError::MissingInfo {
            path: args.package.clone(),
        })?;
    let rendered = match serde_json::from_slice::<serde_json::Value>(&contents) {
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| String::from_utf8_lossy(&contents).into_owned()),
        Err(_) => String::from_utf8_lossy(&contents).into_owned(),
    };
    writeln!(out, "{rendered}").map_err(CliError::Output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Workspace {
        _temp: TempDir,
        root: Utf8PathBuf,
    }

    #[fixture]
    fn workspace() -> Workspace {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::try_from(temp.path().to_owned()).expect("utf-8 temp path");
        let flow = root.join("train");
        fs::create_dir_all(&flow).expect("mkdir flow");
        fs::write(flow.join("flow.py"), "print('train')\n").expect("write flow");
        fs::write(flow.join("weights.bin"), "0101").expect("write data");
        Workspace { _temp: temp, root }
    }

    fn run_cli(args: &[&str]) -> Result<String> {
        let cli = Cli::parse_from(args);
        let mut out = Vec::new();
        run(&cli, &mut out)?;
        Ok(String::from_utf8(out).expect("utf-8 output"))
    }

    #[rstest]
    fn build_then_list_round_trips_entries(workspace: Workspace) {
        let flow = workspace.root.join("train");
        let package = workspace.root.join("train.tgz");

        let report = run_cli(&[
            "codepack",
            "build",
            flow.as_str(),
            "-o",
            package.as_str(),
            "--foreground",
        ])
        .expect("build succeeds");
        assert!(report.contains("<code package for flow train"));
        assert!(report.contains("sha256: "));

        let listing = run_cli(&["codepack", "list", package.as_str()]).expect("list succeeds");
        let names: Vec<&str> = listing.lines().collect();
        assert!(names.contains(&"flow.py"));
        assert!(!names.contains(&"weights.bin"));

        let info = run_cli(&["codepack", "info", package.as_str()]).expect("info succeeds");
        assert!(info.contains("\"environment_type\": \"host\""));
    }

    #[rstest]
    fn build_with_store_reports_url(workspace: Workspace) {
        let flow = workspace.root.join("train");
        let store = workspace.root.join("objects");

        let report = run_cli(&["codepack", "build", flow.as_str(), "--store", store.as_str()])
            .expect("build succeeds");

        assert!(report.contains("url: file://"));
    }

    #[rstest]
    fn unknown_module_is_reported(workspace: Workspace) {
        let site = workspace.root.join("site");
        fs::create_dir_all(&site).expect("mkdir site");

        let err = locate_module("missing", &[site]).expect_err("module absent");
        assert!(matches!(err, CliError::ModuleNotFound { .. }));
    }

    #[rstest]
    fn locate_module_finds_packages_and_single_files(workspace: Workspace) {
        let site = workspace.root.join("site");
        fs::create_dir_all(site.join("pkg")).expect("mkdir pkg");
        fs::write(site.join("six.py"), "").expect("write six");

        let pkg = locate_module("pkg", std::slice::from_ref(&site)).expect("pkg found");
        let six = locate_module("six", &[site]).expect("six found");

        assert_eq!(pkg.root_paths.len(), 1);
        assert!(six.root_paths.iter().all(|root| root.as_str().ends_with("six.py")));
    }
}
