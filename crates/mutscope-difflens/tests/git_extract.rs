use std::path::Path;

use git2::{IndexAddOption, Repository, Signature};
use mutscope_core::{ChangeKey, FailureKind};
use mutscope_difflens::extract::{extract_changes, resolve_commit, DiffTarget, GitChangeSource};
use mutscope_difflens::filter::SourceFilter;

fn commit_all(repo: &Repository, message: &str) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parents = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap();
}

fn write(dir: &Path, rel: &str, content: &[u8]) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn added_deleted_and_untracked_files() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write(dir.path(), "pkg/gone.py", b"x = 1\ny = 2\n");
    write(dir.path(), "pkg/keep.py", b"a = 1\n");
    commit_all(&repo, "initial");

    std::fs::remove_file(dir.path().join("pkg/gone.py")).unwrap();
    write(dir.path(), "pkg/fresh.py", b"z = 3\n");

    let source = GitChangeSource::open(dir.path(), "HEAD", DiffTarget::Workdir).unwrap();
    let changes = extract_changes(&source, &SourceFilter::accept_all()).unwrap();

    let gone = changes.record_for("pkg/gone.py").unwrap();
    assert_eq!(gone.removed, vec![1, 2]);
    assert!(gone.added.is_empty());
    let fresh = changes.record_for("pkg/fresh.py").unwrap();
    assert_eq!(fresh.added, vec![1]);
    assert!(changes.record_for("pkg/keep.py").is_none());
}

#[test]
fn head_target_ignores_uncommitted_edits() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write(dir.path(), "a.py", b"a = 1\n");
    commit_all(&repo, "initial");
    let base = resolve_commit(dir.path(), "HEAD").unwrap();
    write(dir.path(), "a.py", b"a = 2\n");

    let source = GitChangeSource::open(dir.path(), &base, DiffTarget::Head).unwrap();
    let changes = extract_changes(&source, &SourceFilter::accept_all()).unwrap();
    assert!(changes.is_empty());
}

#[test]
fn pure_rename_is_keyed_old_to_new() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let body: String = (1..=20).map(|i| format!("value_{i} = {i}\n")).collect();
    write(dir.path(), "old.py", body.as_bytes());
    commit_all(&repo, "initial");
    let base = resolve_commit(dir.path(), "HEAD").unwrap();
    std::fs::rename(dir.path().join("old.py"), dir.path().join("new.py")).unwrap();
    commit_all(&repo, "rename");

    let source = GitChangeSource::open(dir.path(), &base, DiffTarget::Head).unwrap();
    let changes = extract_changes(&source, &SourceFilter::accept_all()).unwrap();
    let records: Vec<_> = changes.records().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(
        *records[0].0,
        ChangeKey::Rename {
            from: "old.py".into(),
            to: "new.py".into(),
        }
    );
    assert!(records[0].1.is_empty());
}

#[test]
fn non_utf8_blob_is_a_per_file_failure() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    write(dir.path(), "latin.py", b"s = 'caf\xe9'\n");
    write(dir.path(), "ok.py", b"a = 1\n");
    commit_all(&repo, "initial");
    write(dir.path(), "latin.py", b"s = 'th\xe9'\n");
    write(dir.path(), "ok.py", b"a = 2\n");

    let source = GitChangeSource::open(dir.path(), "HEAD", DiffTarget::Workdir).unwrap();
    let changes = extract_changes(&source, &SourceFilter::accept_all()).unwrap();

    assert_eq!(changes.failures().len(), 1);
    assert_eq!(changes.failures()[0].path, "latin.py");
    assert_eq!(changes.failures()[0].kind, FailureKind::UnreadableBlob);
    assert_eq!(changes.record_for("ok.py").unwrap().added, vec![1]);
    assert_eq!(changes.stale_paths().collect::<Vec<_>>(), vec!["latin.py"]);
}

#[test]
fn unknown_base_is_a_git_error() {
    let dir = tempfile::tempdir().unwrap();
    Repository::init(dir.path()).unwrap();
    let result = GitChangeSource::open(dir.path(), "no-such-ref", DiffTarget::Head);
    assert!(matches!(result, Err(mutscope_core::MutscopeError::Git(_))));
}
