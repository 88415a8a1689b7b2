//! Replay protection for countersigned token submissions.
use std::{collections::HashSet, sync::Mutex};

/// Set-membership over previously submitted countersigned tokens.
///
/// "check_and_record" must be atomic: two concurrent submissions of the
/// same token must not both observe it as fresh. Scope and eviction are
/// deployment concerns; the contract is only set-membership semantics.
pub trait ReplayGuard: Send + Sync {
    /// Records the token, returning true only on its first submission.
    fn check_and_record(&self, encoded: &str) -> bool;

    /// Returns true if the token was submitted before. A true result
    /// means callers must refuse the token.
    fn seen(&self, encoded: &str) -> bool;
}

/// In-memory, process-lifetime guard.
#[derive(Debug, Default)]
pub struct MemoryReplayGuard {
    seen: Mutex<HashSet<String>>,
}

impl MemoryReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayGuard for MemoryReplayGuard {
    fn check_and_record(&self, encoded: &str) -> bool {
        self.seen.lock().unwrap().insert(encoded.to_string())
    }

    fn seen(&self, encoded: &str) -> bool {
        self.seen.lock().unwrap().contains(encoded)
    }
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- replay::test_replay_guard --exact --show-output
#[test]
fn test_replay_guard() {
    let guard = MemoryReplayGuard::new();

    assert!(!guard.seen("t1"));
    assert!(guard.check_and_record("t1"));
    assert!(guard.seen("t1"));

    // recording is idempotent; every later submission is a replay
    assert!(!guard.check_and_record("t1"));
    assert!(guard.seen("t1"));

    assert!(guard.check_and_record("t2"));
    assert!(guard.seen("t1"));
    assert!(guard.seen("t2"));
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- replay::test_replay_guard_concurrent --exact --show-output
#[test]
fn test_replay_guard_concurrent() {
    use std::sync::{atomic::AtomicUsize, atomic::Ordering, Arc};

    let guard = Arc::new(MemoryReplayGuard::new());
    let accepted = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let guard = guard.clone();
        let accepted = accepted.clone();
        handles.push(std::thread::spawn(move || {
            if guard.check_and_record("the-same-token") {
                accepted.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // exactly one submission wins the race
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}
