use clusteros::core::elector::raft::fsm::RaftCommand;
use clusteros::core::elector::raft::log::{HardState, LogEntry, LogPayload, LogStore, StableStore};
use clusteros::core::elector::raft::snapshot::{Snapshot, SnapshotStore};

fn entry(index: u64, term: u64) -> LogEntry {
    LogEntry {
        index,
        term,
        payload: LogPayload::Command(RaftCommand::SetLeader {
            role: "slurm-controller".to_string(),
            node_id: format!("n{index}"),
        }),
    }
}

#[test]
fn test_log_append_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raft.log");

    {
        let mut log = LogStore::open(&path).unwrap();
        log.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 2);
    }

    let log = LogStore::open(&path).unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log.last_index(), 3);
    assert_eq!(log.term_at(2), Some(1));
    assert_eq!(log.term_at(3), Some(2));
    assert_eq!(log.term_at(4), None);
}

#[test]
fn test_log_truncate_from_drops_the_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raft.log");

    let mut log = LogStore::open(&path).unwrap();
    log.append(&[entry(1, 1), entry(2, 1), entry(3, 1)]).unwrap();
    log.truncate_from(2).unwrap();
    assert_eq!(log.last_index(), 1);

    // The truncation survives a reopen.
    let log = LogStore::open(&path).unwrap();
    assert_eq!(log.last_index(), 1);
}

#[test]
fn test_log_compaction_moves_the_base() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raft.log");

    let mut log = LogStore::open(&path).unwrap();
    log.append(&[entry(1, 1), entry(2, 1), entry(3, 2), entry(4, 2)])
        .unwrap();
    log.compact_to(2, 1).unwrap();

    assert_eq!(log.first_index(), 3);
    assert_eq!(log.last_index(), 4);
    assert_eq!(log.term_at(2), Some(1));
    assert!(log.get(2).is_none());
    assert!(log.get(3).is_some());

    let mut reopened = LogStore::open(&path).unwrap();
    reopened.set_base(2, 1);
    assert_eq!(reopened.first_index(), 3);
    assert_eq!(reopened.last_index(), 4);
}

#[test]
fn test_log_tolerates_a_torn_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raft.log");

    {
        let mut log = LogStore::open(&path).unwrap();
        log.append(&[entry(1, 1), entry(2, 1)]).unwrap();
    }
    // Simulate a crash mid-append: garbage after the valid records.
    let mut contents = std::fs::read(&path).unwrap();
    contents.extend_from_slice(&[0xde, 0xad, 0xbe]);
    std::fs::write(&path, contents).unwrap();

    let log = LogStore::open(&path).unwrap();
    assert_eq!(log.last_index(), 2);
}

#[test]
fn test_entries_from() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = LogStore::open(&dir.path().join("raft.log")).unwrap();
    log.append(&[entry(1, 1), entry(2, 1), entry(3, 1)]).unwrap();

    assert_eq!(log.entries_from(2).len(), 2);
    assert_eq!(log.entries_from(4).len(), 0);
}

#[test]
fn test_stable_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = StableStore::open(&dir.path().join("raft.stable"));

    // Absent file reads as the zero state.
    let fresh = store.load().unwrap();
    assert_eq!(fresh.current_term, 0);
    assert!(fresh.voted_for.is_none());

    store
        .save(&HardState {
            current_term: 7,
            voted_for: Some("n1".to_string()),
        })
        .unwrap();
    let loaded = store.load().unwrap();
    assert_eq!(loaded.current_term, 7);
    assert_eq!(loaded.voted_for.as_deref(), Some("n1"));
}

#[test]
fn test_snapshot_store_retains_three() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open(dir.path()).unwrap();
    assert!(store.latest().is_none());

    for i in 1..=5u64 {
        store
            .save(&Snapshot {
                last_index: i * 10,
                last_term: i,
                voters: Default::default(),
                data: serde_json::to_vec(&serde_json::json!({"i": i})).unwrap(),
            })
            .unwrap();
    }

    let latest = store.latest().unwrap();
    assert_eq!(latest.last_index, 50);

    let kept = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| e.path().extension().map(|x| x == "snap").unwrap_or(false))
        .count();
    assert_eq!(kept, 3);
}
