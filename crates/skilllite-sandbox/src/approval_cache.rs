//! Approval Cache (part of the Confirmation Gate, C3): remembers a user's
//! approval of a risky skill so re-running unchanged source doesn't
//! re-prompt. In-process, `RwLock`-guarded, keyed by `code_hash` — readers
//! take a shared view, writers (store/evict) take an exclusive one; entries
//! expire after a fixed TTL and a hash mismatch evicts the old entry
//! outright (mutated source never inherits a prior approval).

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Where an approval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalSource {
    User,
    Auto,
    Remembered,
}

impl ApprovalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalSource::User => "user",
            ApprovalSource::Auto => "auto",
            ApprovalSource::Remembered => "remembered",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalRecord {
    pub scan_id: String,
    pub expires_at: Instant,
    pub source: ApprovalSource,
}

fn cache() -> &'static RwLock<HashMap<String, ApprovalRecord>> {
    static CACHE: OnceLock<RwLock<HashMap<String, ApprovalRecord>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Look up a still-valid approval for `code_hash`, evicting it first if it
/// has expired.
pub fn lookup(code_hash: &str) -> Option<ApprovalRecord> {
    {
        let guard = cache().read().unwrap_or_else(|e| e.into_inner());
        match guard.get(code_hash) {
            Some(record) if record.expires_at > Instant::now() => return Some(record.clone()),
            Some(_) => {}
            None => return None,
        }
    }
    evict(code_hash);
    None
}

/// Record an approval for `code_hash`, valid for the default TTL.
pub fn store(code_hash: &str, scan_id: &str, source: ApprovalSource) {
    let mut guard = cache().write().unwrap_or_else(|e| e.into_inner());
    guard.insert(
        code_hash.to_string(),
        ApprovalRecord {
            scan_id: scan_id.to_string(),
            expires_at: Instant::now() + DEFAULT_TTL,
            source,
        },
    );
}

/// Drop any cached approval for `code_hash` (mutated source never transfers
/// a prior approval; callers evict explicitly once a hash no longer matches).
pub fn evict(code_hash: &str) {
    let mut guard = cache().write().unwrap_or_else(|e| e.into_inner());
    guard.remove(code_hash);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_finds_an_unexpired_approval() {
        let hash = "test-hash-stores-and-finds";
        evict(hash);
        assert!(lookup(hash).is_none());
        store(hash, "scan-1", ApprovalSource::User);
        let record = lookup(hash).expect("approval should be cached");
        assert_eq!(record.scan_id, "scan-1");
        assert_eq!(record.source, ApprovalSource::User);
    }

    #[test]
    fn exact_hash_match_required() {
        let hash_a = "test-hash-a";
        let hash_b = "test-hash-b";
        evict(hash_a);
        evict(hash_b);
        store(hash_a, "scan-2", ApprovalSource::Auto);
        assert!(lookup(hash_b).is_none(), "a different hash must never hit the cache");
    }

    #[test]
    fn eviction_clears_the_entry() {
        let hash = "test-hash-eviction";
        store(hash, "scan-3", ApprovalSource::Remembered);
        assert!(lookup(hash).is_some());
        evict(hash);
        assert!(lookup(hash).is_none());
    }
}
