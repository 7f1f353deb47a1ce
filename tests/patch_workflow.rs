//! End-to-end patching through the public API.

use codecells::config::load_from_str;
use codecells::{
    AnnotationDeclarer, Declarer, Markers, PatchError, PatchKind, SourcePatcher, WriteMode,
};
use proptest::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn multi_line_call_gets_block_after_closing_line() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "report.py",
        "totals = summarize(\n    rows,  # (all of them\n    by=\"region\",\n)\nprint(totals)\n",
    );

    SourcePatcher::default()
        .patch(&path, 1, "{'north': 3}")
        .unwrap();

    let expected = format!(
        "totals = summarize(\n    rows,  # (all of them\n    by=\"region\",\n)\n{}print(totals)\n",
        Markers::default().render_block("{'north': 3}")
    );
    assert_eq!(fs::read_to_string(&path).unwrap(), expected);
}

#[test]
fn tree_sitter_python_from_config() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "notebook.py",
        "def double(x):\n    return x * 2\n\nprint(double(2))\n",
    );
    let config = load_from_str(
        r#"
[boundary]
finder = "tree_sitter"
language = "python"
"#,
    )
    .unwrap();

    config.patcher().patch(&path, 1, "<function double>").unwrap();

    let expected = format!(
        "def double(x):\n    return x * 2\n{}\nprint(double(2))\n",
        Markers::default().render_block("<function double>")
    );
    assert_eq!(fs::read_to_string(&path).unwrap(), expected);
}

#[test]
fn file_ending_at_a_cell_repatches_in_place() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "tail.py", "# @cell total\ntotal = sum(\n    rows,\n)");
    let config = load_from_str("[boundary]\nfinder = \"tree_sitter\"\nlanguage = \"python\"\n")
        .unwrap();
    let patcher = config.patcher();

    assert_eq!(patcher.patch(&path, 2, "6").unwrap().kind, PatchKind::Inserted);
    assert_eq!(patcher.patch(&path, 2, "7").unwrap().kind, PatchKind::Replaced);
    assert_eq!(patcher.patch(&path, 2, "7").unwrap().kind, PatchKind::Unchanged);

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(
        content,
        format!(
            "# @cell total\ntotal = sum(\n    rows,\n){}",
            Markers::default().render_block("7")
        )
    );

    let declared = AnnotationDeclarer::default()
        .declare(&path, &content)
        .unwrap();
    assert_eq!(declared.len(), 1);
    assert_eq!(declared[0].line, 2);
}

#[test]
fn block_comment_markers_inside_rust_function() {
    let dir = TempDir::new().unwrap();
    let original = "fn main() {\n    // @cell answer\n    let x = compute(\n        1,\n    );\n    println!(\"{x}\");\n}\n";
    let path = write(&dir, "main.rs", original);
    let config = load_from_str(
        r#"
[markers]
style = "block_comment"

[boundary]
comment_leaders = ["//"]
"#,
    )
    .unwrap();
    let patcher = config.patcher();

    patcher.patch(&path, 3, "42").unwrap();
    let outcome = patcher.patch(&path, 3, "43").unwrap();
    assert_eq!(outcome.kind, PatchKind::Replaced);

    let expected = format!(
        "fn main() {{\n    // @cell answer\n    let x = compute(\n        1,\n    );\n{}    println!(\"{{x}}\");\n}}\n",
        Markers::block_comment().render_block("43")
    );
    assert_eq!(fs::read_to_string(&path).unwrap(), expected);

    assert_eq!(patcher.strip(&path).unwrap(), 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), original);
}

#[test]
fn atomic_write_mode_from_config() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "cells.py", "x = 1\ny = 2\n");
    let config = load_from_str("[patch]\nwrite_mode = \"atomic\"\n").unwrap();
    let patcher = config.patcher();
    assert_eq!(patcher.write_mode(), WriteMode::Atomic);

    patcher.patch(&path, 2, "2").unwrap();
    let expected = format!("x = 1\ny = 2\n{}", Markers::default().render_block("2"));
    assert_eq!(fs::read_to_string(&path).unwrap(), expected);

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name != "cells.py")
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}

#[test]
fn unterminated_block_is_refused() {
    let dir = TempDir::new().unwrap();
    let original = format!("x = 1\n{}stale\n", Markers::default().prefix());
    let path = write(&dir, "cells.py", &original);

    let err = SourcePatcher::default().patch(&path, 1, "1").unwrap_err();
    assert!(matches!(err, PatchError::UnterminatedBlock { offset: 6, .. }));
    assert_eq!(fs::read_to_string(&path).unwrap(), original);
}

#[test]
fn suffix_missing_final_newline_still_closes_block() {
    let dir = TempDir::new().unwrap();
    let markers = Markers::default();
    let stale = markers.render_block("old");
    let original = format!("x = 1\n{}", stale.trim_end_matches('\n'));
    let path = write(&dir, "cells.py", &original);

    SourcePatcher::default().patch(&path, 1, "new").unwrap();
    let expected = format!("x = 1\n{}", markers.render_block("new"));
    assert_eq!(fs::read_to_string(&path).unwrap(), expected);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn second_patch_replaces_first(
        lines in prop::collection::vec("[a-z][a-z0-9 =+]{0,20}", 1..8),
        pick in any::<prop::sample::Index>(),
        first in "[a-z0-9 ]{0,30}",
        second in "[a-z0-9 ]{0,30}",
    ) {
        let dir = TempDir::new().unwrap();
        let original = lines.join("\n") + "\n";
        let path = write(&dir, "cells.py", &original);
        let line = pick.index(lines.len()) + 1;
        let patcher = SourcePatcher::default();

        patcher.patch(&path, line, &first).unwrap();
        patcher.patch(&path, line, &second).unwrap();

        let split: usize = lines[..line].iter().map(|l| l.len() + 1).sum();
        let expected = format!(
            "{}{}{}",
            &original[..split],
            Markers::default().render_block(&second),
            &original[split..]
        );
        prop_assert_eq!(fs::read_to_string(&path).unwrap(), expected);

        let outcome = patcher.patch(&path, line, &second).unwrap();
        prop_assert_eq!(outcome.kind, PatchKind::Unchanged);
    }
}
