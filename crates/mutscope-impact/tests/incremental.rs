//! Integration test: git diff → test selection → registry update on a real
//! repository with a rename and an edit.

use std::path::Path;

use git2::{IndexAddOption, Repository, Signature};
use mutscope_core::{ChangeKey, MutantRecord, MutantStatus};
use mutscope_coverage::select::TestSelection;
use mutscope_coverage::snapshot::CoverageSnapshot;
use mutscope_difflens::extract::{extract_changes, DiffTarget, GitChangeSource};
use mutscope_difflens::filter::SourceFilter;
use mutscope_registry::store::BASELINE_KEY;
use mutscope_registry::{MutantRegistry, SqliteRegistry};
use tempfile::TempDir;

const CALC_V1: &str = "\
def add(a, b):
    return a + b

def sub(a, b):
    return a - b

def mul(a, b):
    return a * b

def div(a, b):
    return a / b
";

const CORE_V2: &str = "\
def add(a, b):
    return b + a

def sub(a, b):
    c = a - b
    return a - b

def mul(a, b):
    return a * b

def div(a, b):
    return a / b

LIMIT = 10
";

fn commit_all(repo: &Repository, message: &str) -> String {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
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

fn snapshot(file: &str, lines: &[(u32, &str)]) -> CoverageSnapshot {
    lines
        .iter()
        .map(|(line, ctx)| (file.to_string(), *line, ctx.to_string()))
        .collect()
}

fn tested(file: &str, line: u32, status: MutantStatus) -> MutantRecord {
    let mut m = MutantRecord::new(file, line, "number", 0);
    m.status = status;
    m.tests_fingerprint = "fp".into();
    m
}

fn setup(dir: &Path) -> (Repository, String) {
    let repo = Repository::init(dir).unwrap();
    std::fs::write(dir.join("calc.py"), CALC_V1).unwrap();
    let base = commit_all(&repo, "initial");

    std::fs::remove_file(dir.join("calc.py")).unwrap();
    std::fs::write(dir.join("core.py"), CORE_V2).unwrap();
    commit_all(&repo, "rename calc to core and edit");
    (repo, base)
}

#[test]
fn rename_with_edit_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (_repo, base) = setup(dir.path());

    // Step 1: Extract
    let source = GitChangeSource::open(dir.path(), &base, DiffTarget::Head).unwrap();
    let changes = extract_changes(&source, &SourceFilter::accept_all()).unwrap();
    let key = ChangeKey::Rename {
        from: "calc.py".into(),
        to: "core.py".into(),
    };
    let record = changes
        .records()
        .find(|(k, _)| **k == key)
        .map(|(_, r)| r.clone())
        .expect("rename should be detected");
    assert_eq!(record.removed, vec![2]);
    assert_eq!(record.added, vec![2, 5, 13, 14]);
    assert!(changes.failures().is_empty());

    // Step 2: Coverage before and after
    let previous = snapshot(
        "calc.py",
        &[
            (1, ""),
            (2, "t_add"),
            (4, ""),
            (5, "t_sub"),
            (7, ""),
            (8, "t_mul"),
            (10, ""),
            (11, "t_div"),
        ],
    );
    let current = snapshot(
        "core.py",
        &[
            (1, ""),
            (2, "t_add"),
            (4, ""),
            (5, "t_sub"),
            (6, "t_sub"),
            (8, ""),
            (9, "t_mul"),
            (11, ""),
            (12, "t_div"),
            (14, ""),
        ],
    );

    // Step 3: Registry in baseline numbering
    let db = dir.path().join(".mutscope/mutants.sqlite");
    let mut registry = SqliteRegistry::open(&db).unwrap();
    for m in [
        tested("calc.py", 1, MutantStatus::Killed),
        tested("calc.py", 4, MutantStatus::Survived),
        tested("calc.py", 7, MutantStatus::Survived),
        tested("calc.py", 10, MutantStatus::Killed),
    ] {
        registry.set_status(&m, m.status, "fp").unwrap();
    }
    let new_code = MutantRecord::new("core.py", 13, "number", 0);

    // Step 4: Analyse
    let report = mutscope_impact::analyze(
        &changes,
        Some(&previous),
        &current,
        &registry,
        &[new_code.clone()],
        "fp",
    )
    .unwrap();
    let TestSelection::Only(tests) = &report.selection else {
        panic!("previous coverage was given");
    };
    assert_eq!(tests.iter().collect::<Vec<_>>(), vec!["t_add", "t_sub"]);
    let affected: Vec<u32> = report.affected.iter().map(|m| m.line_number).collect();
    assert_eq!(affected, vec![1, 4]);
    assert_eq!(report.newly_relevant, vec![new_code.clone()]);

    // Step 5: Apply
    let head = mutscope_difflens::extract::resolve_commit(dir.path(), "HEAD").unwrap();
    let outcome = mutscope_impact::apply(&report, &mut registry, Some(&head)).unwrap();
    assert_eq!(outcome.reset, 2);
    assert_eq!(outcome.relink.relinked.len(), 3);
    assert_eq!(outcome.relink.demoted.len(), 1);
    assert_eq!(outcome.flagged, 1);

    let status_of = |file: &str, line: u32| {
        registry
            .find(&MutantRecord::new(file, line, "number", 0))
            .unwrap()
            .map(|m| m.status)
    };
    assert_eq!(status_of("core.py", 0), None);
    assert_eq!(status_of("core.py", 1), None);
    assert_eq!(status_of("core.py", 5), Some(MutantStatus::Untested));
    assert_eq!(status_of("core.py", 8), Some(MutantStatus::Survived));
    assert_eq!(status_of("core.py", 11), Some(MutantStatus::Killed));
    assert_eq!(status_of("core.py", 13), Some(MutantStatus::Untested));
    assert_eq!(status_of("calc.py", 7), Some(MutantStatus::Untested));
    assert_eq!(registry.metadata(BASELINE_KEY).unwrap(), Some(head));
}

#[test]
fn reanalysing_after_apply_is_stable() {
    let dir = TempDir::new().unwrap();
    let (_repo, _base) = setup(dir.path());

    let head = mutscope_difflens::extract::resolve_commit(dir.path(), "HEAD").unwrap();
    let source = GitChangeSource::open(dir.path(), &head, DiffTarget::Head).unwrap();
    let changes = extract_changes(&source, &SourceFilter::accept_all()).unwrap();
    assert!(changes.is_empty());

    let current = snapshot("core.py", &[(2, "t_add"), (5, "t_sub")]);
    let mut registry = SqliteRegistry::in_memory().unwrap();
    registry
        .set_status(&tested("core.py", 1, MutantStatus::Survived), MutantStatus::Survived, "fp")
        .unwrap();

    let report =
        mutscope_impact::analyze(&changes, Some(&current), &current, &registry, &[], "fp").unwrap();
    assert!(report.selection.is_empty());
    assert_eq!(report.retest_count(), 0);

    mutscope_impact::apply(&report, &mut registry, None).unwrap();
    let stored = registry.mutants(None).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, MutantStatus::Survived);
}

#[test]
fn workdir_target_sees_uncommitted_edits() {
    let dir = TempDir::new().unwrap();
    let (_repo, _base) = setup(dir.path());
    std::fs::write(
        dir.path().join("core.py"),
        CORE_V2.replace("return a * b", "return a ** b"),
    )
    .unwrap();

    let source = GitChangeSource::open(dir.path(), "HEAD", DiffTarget::Workdir).unwrap();
    let changes = extract_changes(&source, &SourceFilter::accept_all()).unwrap();
    let record = changes.record_for("core.py").unwrap();
    assert_eq!(record.removed, vec![9]);
    assert_eq!(record.added, vec![9]);
}
