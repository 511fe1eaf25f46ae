//! End-to-end tests of the `mutscope` binary on a scratch git repository.

use std::path::Path;
use std::process::{Command, Output};

use git2::{IndexAddOption, Repository, Signature};
use mutscope_core::{MutantRecord, MutantStatus};
use mutscope_registry::{MutantRegistry, SqliteRegistry};

const CONFIG: &str = r#"
[coverage]
previous = "cov_old.json"
current = "cov.json"

[registry]
path = "state/registry.db"
"#;

const V1: &str = "def add(a, b):\n    return a + b\n\ndef sub(a, b):\n    return a - b\n";
const V2: &str = "def add(a, b):\n    return b + a\n\ndef sub(a, b):\n    return a - b\n";

fn commit_all(repo: &Repository, message: &str) -> String {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*.py"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*.py"].iter(), None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parents = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
        .to_string()
}

/// Repository with `calc.py` edited on line 2 between two commits, and
/// coverage stores for both versions. Returns the baseline commit.
fn scratch_repo(dir: &Path) -> String {
    let repo = Repository::init(dir).unwrap();
    std::fs::write(dir.join(".mutscope.toml"), CONFIG).unwrap();
    std::fs::write(dir.join("calc.py"), V1).unwrap();
    let base = commit_all(&repo, "initial");
    std::fs::write(dir.join("calc.py"), V2).unwrap();
    commit_all(&repo, "swap operands");

    let coverage = r#"{"calc.py": {"1": [""], "2": ["t.py::test_add|run"], "4": [""], "5": ["t.py::test_sub|run"]}}"#;
    std::fs::write(dir.join("cov_old.json"), coverage).unwrap();
    std::fs::write(dir.join("cov.json"), coverage).unwrap();
    base
}

fn mutscope(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mutscope"))
        .args(args)
        .current_dir(dir)
        .env_remove("MUTSCOPE_LOG")
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "mutscope failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn diff_reports_changed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let base = scratch_repo(dir.path());

    let json = stdout_json(&mutscope(dir.path(), &["diff", "--base", &base, "--format", "json"]));
    assert_eq!(json["records"]["calc.py"]["removed"], serde_json::json!([2]));
    assert_eq!(json["records"]["calc.py"]["added"], serde_json::json!([2]));
    assert!(!dir.path().join("state").exists(), "diff must not create the registry");

    let text = mutscope(dir.path(), &["diff", "--base", &base]);
    assert!(String::from_utf8_lossy(&text.stdout).contains("calc.py"));
}

#[test]
fn diff_reads_a_patch_file() {
    let dir = tempfile::tempdir().unwrap();
    let patch = "\
diff --git a/calc.py b/calc.py
--- a/calc.py
+++ b/calc.py
@@ -2 +2,2 @@
-    return a + b
+    return b + a
+    # swapped
";
    std::fs::write(dir.path().join("change.patch"), patch).unwrap();

    let json = stdout_json(&mutscope(
        dir.path(),
        &["diff", "--patch", "change.patch", "--format", "json"],
    ));
    assert_eq!(json["records"]["calc.py"]["added"], serde_json::json!([2, 3]));
}

#[test]
fn tests_selects_tests_covering_the_edit() {
    let dir = tempfile::tempdir().unwrap();
    let base = scratch_repo(dir.path());

    let output = mutscope(dir.path(), &["tests", "--base", &base]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "t.py::test_add|run");
}

#[test]
fn tests_without_previous_coverage_selects_all() {
    let dir = tempfile::tempdir().unwrap();
    let base = scratch_repo(dir.path());
    std::fs::remove_file(dir.path().join("cov_old.json")).unwrap();

    let json = stdout_json(&mutscope(dir.path(), &["tests", "--base", &base, "--format", "json"]));
    assert_eq!(json["kind"], "all");
}

#[test]
fn affected_apply_resets_verdicts_and_moves_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let base = scratch_repo(dir.path());

    {
        let mut registry = SqliteRegistry::open(&dir.path().join("state/registry.db")).unwrap();
        for (line, status) in [(1, MutantStatus::Killed), (4, MutantStatus::Survived)] {
            let mutant = MutantRecord::new("calc.py", line, "number", 0);
            registry.set_status(&mutant, status, "stale-fp").unwrap();
        }
        registry
            .set_metadata(mutscope_registry::store::BASELINE_KEY, &base)
            .unwrap();
    }

    let json = stdout_json(&mutscope(dir.path(), &["affected", "--apply", "--format", "json"]));
    let affected = json["report"]["affected"].as_array().unwrap();
    assert_eq!(affected.len(), 1);
    assert_eq!(affected[0]["lineNumber"], 1);
    assert_eq!(json["applied"]["reset"], 1);

    // The mutant on the replaced line has no code left to attach to.
    let registry = SqliteRegistry::open(&dir.path().join("state/registry.db")).unwrap();
    let all = registry.mutants(None).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].line_number, 4);
    assert_eq!(all[0].status, MutantStatus::Survived);
    assert_ne!(all[0].tests_fingerprint, "stale-fp");
    let head = Repository::open(dir.path())
        .unwrap()
        .head()
        .unwrap()
        .peel_to_commit()
        .unwrap()
        .id()
        .to_string();
    assert_eq!(
        registry
            .metadata(mutscope_registry::store::BASELINE_KEY)
            .unwrap(),
        Some(head)
    );
    drop(registry);

    // With the baseline at HEAD nothing is left to do.
    let json = stdout_json(&mutscope(dir.path(), &["affected", "--format", "json"]));
    assert!(json["report"]["affected"].as_array().unwrap().is_empty());
}

#[test]
fn relink_moves_lines_once_and_records_the_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let base = scratch_repo(dir.path());
    let repo = Repository::open(dir.path()).unwrap();
    std::fs::write(dir.path().join("calc.py"), format!("# header\n{V2}")).unwrap();
    commit_all(&repo, "add header");

    let mutant = MutantRecord::new("calc.py", 4, "number", 0);
    {
        let mut registry = SqliteRegistry::open(&dir.path().join("state/registry.db")).unwrap();
        registry.set_status(&mutant, MutantStatus::Survived, "fp").unwrap();
    }

    let output = mutscope(dir.path(), &["relink", "--base", &base]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    // Once the baseline sits at HEAD a second pass has nothing to move.
    let output = mutscope(dir.path(), &["relink"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    // The old base no longer describes the stored numbering.
    let output = mutscope(dir.path(), &["relink", "--base", &base]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("mutscope baseline"));

    let registry = SqliteRegistry::open(&dir.path().join("state/registry.db")).unwrap();
    let all = registry.mutants(None).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].line_number, 5);
}

#[test]
fn relink_refuses_the_working_tree() {
    let dir = tempfile::tempdir().unwrap();
    scratch_repo(dir.path());
    let output = mutscope(dir.path(), &["relink", "--worktree"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("committed target"));
}

#[test]
fn baseline_then_diff_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    scratch_repo(dir.path());

    let output = mutscope(dir.path(), &["baseline"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("Baseline set to "));

    let json = stdout_json(&mutscope(dir.path(), &["diff", "--format", "json"]));
    assert!(json["records"].as_object().unwrap().is_empty());
}

#[test]
fn tests_for_strips_phase_suffix() {
    let dir = tempfile::tempdir().unwrap();
    scratch_repo(dir.path());

    let output = mutscope(dir.path(), &["tests-for", "calc.py", "5"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "t.py::test_sub");

    let output = mutscope(dir.path(), &["tests-for", "calc.py", "1"]);
    assert!(String::from_utf8_lossy(&output.stdout).trim().is_empty());
}

#[cfg(unix)]
#[test]
fn measure_rotates_and_records_coverage() {
    let dir = tempfile::tempdir().unwrap();
    scratch_repo(dir.path());
    let config = format!(
        "{CONFIG}\n[runner]\ncommand = \"sh\"\nargs = [\"-c\", \"echo '{{\\\"calc.py\\\": {{\\\"2\\\": [\\\"t\\\"]}}}}' > cov.json\"]\n"
    );
    std::fs::write(dir.path().join(".mutscope.toml"), config).unwrap();

    let json = stdout_json(&mutscope(dir.path(), &["measure", "--rotate", "--format", "json"]));
    assert_eq!(json["status"], "fresh");
    assert_eq!(json["files"], 1);
    assert_eq!(json["lines"], 1);

    let rotated = std::fs::read_to_string(dir.path().join("cov_old.json")).unwrap();
    assert!(rotated.contains("test_add"));
}

#[test]
fn no_command_prints_welcome() {
    let dir = tempfile::tempdir().unwrap();
    let output = mutscope(dir.path(), &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Quick start:"));
}
