//! Tests for CLI parsing.

use super::*;
use rstest::rstest;

fn build_args(cli: Cli) -> BuildArgs {
    match cli.command {
        Command::Build(args) => args,
        other => panic!("expected build command, got {other:?}"),
    }
}

#[rstest]
fn build_parses_defaults() {
    let cli = Cli::parse_from(["codepack", "build", "flows/train"]);
    assert_eq!(cli.verbosity, 0);

    let args = build_args(cli);
    assert_eq!(args.flow_dir, Utf8PathBuf::from("flows/train"));
    assert!(args.output.is_none());
    assert!(args.config.is_none());
    assert!(args.suffixes.is_empty());
    assert!(args.modules.is_empty());
    assert!(args.store.is_none());
    assert!(args.timeout.is_none());
    assert!(!args.foreground);
}

#[rstest]
fn build_collects_repeated_options() {
    let cli = Cli::parse_from([
        "codepack",
        "build",
        ".",
        "-s",
        ".sql",
        "--suffix",
        ".yaml",
        "--site-dir",
        "/venv/site-packages",
        "-m",
        "requests",
        "-m",
        "six",
        "--timeout",
        "30",
        "-vv",
    ]);
    assert_eq!(cli.verbosity, 2);

    let args = build_args(cli);
    assert_eq!(args.suffixes, vec![".sql", ".yaml"]);
    assert_eq!(args.modules, vec!["requests", "six"]);
    assert_eq!(args.site_dirs, vec![Utf8PathBuf::from("/venv/site-packages")]);
    assert_eq!(args.timeout, Some(30));
}

#[rstest]
fn modules_require_a_site_dir() {
    let outcome = Cli::try_parse_from(["codepack", "build", ".", "-m", "requests"]);
    assert!(outcome.is_err());
}

#[rstest]
#[case::list("list")]
#[case::info("info")]
fn inspection_commands_take_a_package(#[case] command: &str) {
    let cli = Cli::parse_from(["codepack", command, "flow.tgz"]);
    match cli.command {
        Command::List(args) | Command::Info(args) => {
            assert_eq!(args.package, Utf8PathBuf::from("flow.tgz"));
        }
        Command::Build(_) => panic!("expected an inspection command"),
    }
}
