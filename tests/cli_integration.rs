//! Tests for the `codecells` command-line interface.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn codecells(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_codecells"))
        .args(args)
        .current_dir(dir)
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run codecells")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn setup_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("analysis.py"),
        "rows = load()\n\n# @cell total\ntotal = sum(\n    rows,\n)\n",
    )
    .unwrap();
    fs::create_dir(dir.path().join("lib")).unwrap();
    fs::write(
        dir.path().join("lib").join("stats.rs"),
        "fn main() {\n    // @cell mean\n    let mean = 2.5;\n}\n",
    )
    .unwrap();
    fs::create_dir(dir.path().join(".codecells_assets")).unwrap();
    fs::write(
        dir.path().join(".codecells_assets").join("ignored.py"),
        "# @cell hidden\nx = 1\n",
    )
    .unwrap();
    dir
}

fn bar() -> String {
    "=".repeat(49)
}

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let output = codecells(dir.path(), &["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["list", "patch", "strip", "watch"] {
        assert!(text.contains(command), "missing {command} in help");
    }
}

#[test]
fn list_json_walks_directories() {
    let dir = setup_workspace();
    let output = codecells(dir.path(), &["list", ".", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let files = listed.as_array().unwrap();
    assert_eq!(files.len(), 2);

    let names: Vec<(&str, u64)> = files
        .iter()
        .flat_map(|file| file["cells"].as_array().unwrap())
        .map(|cell| (cell["name"].as_str().unwrap(), cell["line"].as_u64().unwrap()))
        .collect();
    assert!(names.contains(&("total", 4)));
    assert!(names.contains(&("mean", 3)));
    assert!(!names.iter().any(|(name, _)| *name == "hidden"));
}

#[test]
fn list_reports_bad_annotations() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bad.py"), "x = 1\n# @cell dangling\n").unwrap();

    let output = codecells(dir.path(), &["list", "bad.py"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("dangling"));
}

#[test]
fn patch_then_strip() {
    let dir = setup_workspace();
    let file = dir.path().join("analysis.py");
    let original = fs::read_to_string(&file).unwrap();

    let output = codecells(
        dir.path(),
        &["patch", "analysis.py", "--line", "4", "--text", "42"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("inserted"));
    let expected = format!("{original}#{bar}\n42\n{bar}#\n", bar = bar());
    assert_eq!(fs::read_to_string(&file).unwrap(), expected);

    let output = codecells(
        dir.path(),
        &["patch", "analysis.py", "--line", "4", "--text", "42"],
    );
    assert!(stdout(&output).contains("already up to date"));

    let output = codecells(dir.path(), &["strip", "analysis.py", "--dry-run"]);
    assert!(stdout(&output).contains("would remove 1"));
    assert_eq!(fs::read_to_string(&file).unwrap(), expected);

    let output = codecells(dir.path(), &["strip", "analysis.py"]);
    assert!(output.status.success());
    assert_eq!(fs::read_to_string(&file).unwrap(), original);
}

#[test]
fn patch_dry_run_with_diff_leaves_file() {
    let dir = setup_workspace();
    let file = dir.path().join("analysis.py");
    let original = fs::read_to_string(&file).unwrap();

    let output = codecells(
        dir.path(),
        &["patch", "analysis.py", "--line", "4", "--text", "42", "--dry-run", "--diff"],
    );
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("+42"));
    assert!(text.contains("DRY RUN"));
    assert_eq!(fs::read_to_string(&file).unwrap(), original);
}

#[test]
fn patch_out_of_range_fails() {
    let dir = setup_workspace();
    let output = codecells(
        dir.path(),
        &["patch", "analysis.py", "--line", "99", "--text", "x"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("out of range"));
}

#[test]
fn config_file_is_discovered() {
    let dir = setup_workspace();
    fs::write(
        dir.path().join("codecells.toml"),
        "[markers]\nstyle = \"block_comment\"\n\n[boundary]\ncomment_leaders = [\"//\"]\n",
    )
    .unwrap();
    let file = dir.path().join("lib").join("stats.rs");

    let output = codecells(
        &dir.path().join("lib"),
        &["patch", "stats.rs", "--line", "3", "--text", "2.5"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let bar = "=".repeat(48);
    let expected =
        format!("fn main() {{\n    // @cell mean\n    let mean = 2.5;\n/*{bar}\n2.5\n{bar}*/\n}}\n");
    assert_eq!(fs::read_to_string(&file).unwrap(), expected);
}

#[test]
fn invalid_config_is_reported() {
    let dir = setup_workspace();
    fs::write(dir.path().join("broken.toml"), "[render]\nmax_lines = 0\n").unwrap();

    let output = codecells(dir.path(), &["--config", "broken.toml", "list", "."]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("render.max_lines"));
}
