//! Repository-level tests: verification and concurrent writers

use dvault_core::{FileEntry, ObjectId, Repository, Tree, Workdir};
use std::fs;
use std::thread;
use tempfile::TempDir;

fn entry_for(content: &[u8]) -> FileEntry {
    FileEntry {
        blob: ObjectId::from_data(content),
        size: content.len() as u64,
        mode: 0o644,
        mtime: 0,
    }
}

#[test]
fn test_verify_detects_corrupt_and_missing_blobs() {
    let tmp = TempDir::new().unwrap();
    let repo = Repository::create(tmp.path().join("repo")).unwrap();

    let good = repo.blobs().put(b"good").unwrap();
    let bad = repo.blobs().put(b"bad").unwrap();
    let absent = entry_for(b"never stored");
    let manifest = Tree::from_files([
        ("good.txt", FileEntry { blob: good, ..entry_for(b"good") }),
        ("bad.txt", FileEntry { blob: bad, ..entry_for(b"bad") }),
        ("absent.txt", absent),
    ])
    .unwrap();
    repo.revisions().commit_revision("s", manifest).unwrap();

    let report = repo.verify().unwrap();
    assert_eq!(report.problems.len(), 1);
    assert!(report.problems[0].contains("absent.txt"));
    assert_eq!(report.blobs, 2);

    fs::write(repo.blobs().path_for(&bad), b"tampered").unwrap();
    let report = repo.verify().unwrap();
    assert_eq!(report.revisions, 1);
    assert_eq!(report.files, 3);
    assert_eq!(report.problems.len(), 2);
    assert!(!report.is_ok());
}

#[test]
fn test_concurrent_commits_get_distinct_consecutive_ids() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("repo");
    Repository::create(&path).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let path = path.clone();
            thread::spawn(move || {
                let repo = Repository::open(&path).unwrap();
                (0..10)
                    .map(|i| {
                        let name = format!("t{}/f{}.txt", t, i);
                        let tree = Tree::from_files([(name.as_str(), entry_for(name.as_bytes()))])
                            .unwrap();
                        repo.revisions().commit_revision(&format!("thread-{}", t), tree).unwrap()
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=80).collect::<Vec<u64>>());

    let repo = Repository::open(&path).unwrap();
    assert_eq!(repo.revisions().head().unwrap(), Some(80));
    for id in 1..=80 {
        assert_eq!(repo.revisions().get_revision(Some(id)).unwrap().id, id);
    }
}

#[test]
fn test_concurrent_identical_blobs() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("repo");
    Repository::create(&path).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let repo = Repository::open(&path).unwrap();
                repo.blobs().put(b"shared content").unwrap()
            })
        })
        .collect();
    let ids: Vec<ObjectId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));

    let repo = Repository::open(&path).unwrap();
    assert_eq!(repo.blobs().ids().unwrap(), vec![ids[0]]);
    assert_eq!(repo.blobs().get(&ids[0]).unwrap().as_ref(), b"shared content");
}

#[test]
fn test_concurrent_scoped_checkins_keep_each_other() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("repo");
    Repository::create(&path).unwrap();

    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|scope| {
            let path = path.clone();
            let root = tmp.path().join(format!("wd-{}", scope));
            thread::spawn(move || {
                let repo = Repository::open(&path).unwrap();
                fs::create_dir_all(&root).unwrap();
                let mut wd = Workdir::bind(repo, scope, scope, None, &root).unwrap();
                for i in 0..5 {
                    fs::write(root.join(format!("{}.txt", i)), format!("{} {}", scope, i)).unwrap();
                    wd.checkin().unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let repo = Repository::open(&path).unwrap();
    let latest = repo.revisions().get_revision(None).unwrap();
    assert_eq!(latest.id, 10);
    assert_eq!(latest.manifest.file_count(), 10);
    for scope in ["left", "right"] {
        for i in 0..5 {
            let entry = latest.manifest.file(&format!("{}/{}.txt", scope, i)).unwrap();
            assert_eq!(
                repo.blobs().get(&entry.blob).unwrap().as_ref(),
                format!("{} {}", scope, i).as_bytes()
            );
        }
    }
}

#[test]
fn test_log_lists_sessions() {
    let tmp = TempDir::new().unwrap();
    let repo = Repository::create(tmp.path().join("repo")).unwrap();
    repo.revisions().commit_revision("alice", Tree::new()).unwrap();
    repo.revisions()
        .commit_revision("bob", Tree::from_files([("x", entry_for(b"x"))]).unwrap())
        .unwrap();

    let log = repo.revisions().log(usize::MAX).unwrap();
    let sessions: Vec<&str> = log.iter().map(|s| s.session.as_str()).collect();
    assert_eq!(sessions, vec!["bob", "alice"]);
    assert_eq!(log[0].file_count, 1);
}
