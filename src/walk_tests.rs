//! Unit tests for cycle-safe traversal and file collection.

use super::*;
use rstest::{fixture, rstest};
use std::collections::BTreeSet;
use std::fs;
use tempfile::TempDir;

/// A scratch directory addressed through a UTF-8 path.
struct Scratch {
    _temp: TempDir,
    root: Utf8PathBuf,
}

#[fixture]
fn scratch() -> Scratch {
    let temp = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::try_from(temp.path().to_owned())
        .expect("utf-8 temp path")
        .canonicalize_utf8()
        .expect("canonical temp path");
    Scratch { _temp: temp, root }
}

fn touch(path: &Utf8Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, b"x").expect("write");
}

fn suffixes(list: &[&str]) -> SuffixList {
    SuffixList::new(list.iter().copied())
}

#[rstest]
fn walk_visits_nested_directories_in_sorted_order(scratch: Scratch) {
    touch(&scratch.root.join("b/two.py"));
    touch(&scratch.root.join("a/one.py"));
    touch(&scratch.root.join("a/inner/three.py"));
    touch(&scratch.root.join("top.py"));

    let listings: Vec<DirectoryListing> = walk(&scratch.root)
        .collect::<Result<_, _>>()
        .expect("walk succeeds");
    let dirs: Vec<String> = listings
        .iter()
        .map(|l| {
            l.path
                .strip_prefix(&scratch.root)
                .expect("under root")
                .to_string()
        })
        .collect();

    assert_eq!(dirs, vec!["", "a", "a/inner", "b"]);
    assert_eq!(listings[0].files, vec!["top.py".to_owned()]);
}

#[rstest]
fn walk_is_restartable(scratch: Scratch) {
    touch(&scratch.root.join("pkg/mod.py"));

    let first: Vec<_> = walk(&scratch.root).map(|l| l.expect("listing")).collect();
    let second: Vec<_> = walk(&scratch.root).map(|l| l.expect("listing")).collect();
    assert_eq!(first, second);
}

#[cfg(unix)]
#[rstest]
fn walk_terminates_on_symlink_cycle(scratch: Scratch) {
    use std::os::unix::fs::symlink;

    let a = scratch.root.join("a");
    let b = scratch.root.join("b");
    touch(&a.join("in_a.py"));
    touch(&b.join("in_b.py"));
    symlink(&b, a.join("link")).expect("link a -> b");
    symlink(&a, b.join("link")).expect("link b -> a");

    let listings: Vec<DirectoryListing> = walk(&scratch.root)
        .collect::<Result<_, _>>()
        .expect("walk succeeds");

    let real: Vec<Utf8PathBuf> = listings
        .iter()
        .map(|l| l.path.canonicalize_utf8().expect("canonical"))
        .collect();
    let distinct: BTreeSet<_> = real.iter().cloned().collect();

    assert_eq!(real.len(), 3, "root, a and b are each visited once");
    assert_eq!(distinct.len(), 3);
    assert!(distinct.contains(&a));
    assert!(distinct.contains(&b));
}

#[cfg(unix)]
#[rstest]
fn walk_follows_symlink_to_outside_directory_once(scratch: Scratch) {
    use std::os::unix::fs::symlink;

    let outside = scratch.root.join("outside");
    let tree = scratch.root.join("tree");
    touch(&outside.join("shared.py"));
    fs::create_dir_all(&tree).expect("mkdir tree");
    symlink(&outside, tree.join("x")).expect("link x");
    symlink(&outside, tree.join("y")).expect("link y");

    let files: Vec<String> = walk(&tree)
        .map(|l| l.expect("listing"))
        .flat_map(|l| {
            l.files
                .into_iter()
                .map(move |f| l.path.join(f).to_string())
                .collect::<Vec<_>>()
        })
        .collect();

    assert_eq!(files, vec![tree.join("x/shared.py").to_string()]);
}

#[rstest]
fn walk_reports_missing_root(scratch: Scratch) {
    let mut iter = walk(&scratch.root.join("absent"));
    assert!(matches!(iter.next(), Some(Err(WalkError::Io { .. }))));
    assert!(iter.next().is_none());
}

#[rstest]
fn collect_names_files_relative_to_root_parent(scratch: Scratch) {
    let runtime = scratch.root.join("runtime");
    touch(&runtime.join("__init__.py"));
    touch(&runtime.join("ui/index.html"));
    touch(&runtime.join("ui/data.bin"));

    let collected = collect(&runtime, false, &suffixes(&[".py", ".html"])).expect("collect");
    let names: Vec<&str> = collected.iter().map(|c| c.archive_path.as_str()).collect();

    assert_eq!(names, vec!["runtime/__init__.py", "runtime/ui/index.html"]);
    assert_eq!(collected[0].path, runtime.join("__init__.py"));
}

#[rstest]
fn collect_contents_names_files_relative_to_root(scratch: Scratch) {
    touch(&scratch.root.join("flow.py"));
    touch(&scratch.root.join("data.bin"));
    touch(&scratch.root.join("lib/helpers.py"));

    let collected =
        collect_contents(&scratch.root, true, &suffixes(&[".py"])).expect("collect");
    let names: Vec<&str> = collected.iter().map(|c| c.archive_path.as_str()).collect();

    assert_eq!(names, vec!["flow.py", "lib/helpers.py"]);
}

#[rstest]
#[case::hidden_excluded(true, vec!["flow.py"])]
#[case::hidden_included(false, vec!["flow.py", ".venv/site.py"])]
fn collect_contents_applies_hidden_exclusion(
    scratch: Scratch,
    #[case] exclude_hidden: bool,
    #[case] expected: Vec<&str>,
) {
    touch(&scratch.root.join("flow.py"));
    touch(&scratch.root.join(".venv/site.py"));

    let collected =
        collect_contents(&scratch.root, exclude_hidden, &suffixes(&[".py"])).expect("collect");
    let names: Vec<&str> = collected.iter().map(|c| c.archive_path.as_str()).collect();

    assert_eq!(names, expected);
}

#[rstest]
fn collect_matches_dotfiles_exactly(scratch: Scratch) {
    touch(&scratch.root.join(".env"));
    touch(&scratch.root.join(".hidden.py"));
    touch(&scratch.root.join("conf.env"));

    let collected =
        collect_contents(&scratch.root, true, &suffixes(&[".env", ".py"])).expect("collect");
    let names: Vec<&str> = collected.iter().map(|c| c.archive_path.as_str()).collect();

    assert_eq!(names, vec![".env", "conf.env"]);
}

#[cfg(target_os = "linux")]
#[rstest]
fn non_utf8_names_are_skipped(scratch: Scratch) {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    touch(&scratch.root.join("flow.py"));
    let stray = scratch.root.as_std_path().join(OsStr::from_bytes(b"data\xff.bin"));
    fs::write(&stray, b"x").expect("write stray file");
    let stray_dir = scratch.root.as_std_path().join(OsStr::from_bytes(b"dir\xfe"));
    fs::create_dir(&stray_dir).expect("mkdir stray dir");
    fs::write(stray_dir.join("inner.py"), b"x").expect("write inner file");

    let collected =
        collect_contents(&scratch.root, true, &suffixes(&[".py"])).expect("collect");
    let names: Vec<&str> = collected.iter().map(|c| c.archive_path.as_str()).collect();

    assert_eq!(names, vec!["flow.py"]);
}
