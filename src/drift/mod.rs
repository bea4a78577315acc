use crate::util::{Result, TrekError};
use std::path::Path;

/// Outcome of comparing a freshly computed schema diff with `diff.lock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockReport {
    /// The lock file was (re)written.
    pub updated: bool,
    /// A lock file existed before this reconciliation.
    pub had_baseline: bool,
}

/// Persists `diff` to the lock file unless it already holds exactly these bytes.
pub fn reconcile_lock(lock_path: &Path, diff: &str) -> Result<LockReport> {
    let stored = match std::fs::read(lock_path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(TrekError::io(lock_path, e)),
    };

    let had_baseline = stored.is_some();
    if stored.as_deref() == Some(diff.as_bytes()) {
        return Ok(LockReport {
            updated: false,
            had_baseline,
        });
    }

    std::fs::write(lock_path, diff).map_err(|e| TrekError::io(lock_path, e))?;
    Ok(LockReport {
        updated: true,
        had_baseline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DIFF: &str = "--- reference.sql\n+++ target.sql\n@@ -1,1 +1,1 @@\n-old\n+new\n";

    #[test]
    fn first_reconciliation_creates_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("diff.lock");

        let report = reconcile_lock(&lock, DIFF).unwrap();

        assert!(report.updated);
        assert!(!report.had_baseline);
        assert_eq!(fs::read_to_string(&lock).unwrap(), DIFF);
    }

    #[test]
    fn empty_diff_still_creates_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("diff.lock");

        let report = reconcile_lock(&lock, "").unwrap();

        assert!(report.updated);
        assert!(lock.exists());
        assert!(!reconcile_lock(&lock, "").unwrap().updated);
    }

    #[test]
    fn identical_diff_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("diff.lock");
        fs::write(&lock, DIFF).unwrap();
        let before = fs::metadata(&lock).unwrap().modified().unwrap();

        let report = reconcile_lock(&lock, DIFF).unwrap();

        assert!(!report.updated);
        assert!(report.had_baseline);
        assert_eq!(fs::metadata(&lock).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn any_byte_difference_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("diff.lock");
        fs::write(&lock, DIFF).unwrap();

        let changed = DIFF.replace("+new\n", "+new \n");
        let report = reconcile_lock(&lock, &changed).unwrap();

        assert!(report.updated);
        assert!(report.had_baseline);
        assert_eq!(fs::read_to_string(&lock).unwrap(), changed);
    }
}
