#![forbid(unsafe_code)]

//! Exclusive file lock around a batch of proxy operations.
//!
//! While a [`ScopedLock`] is held, the proxy it was taken on skips its
//! per-call `before` notifications; [`run_locked`] emits a single `before`
//! for the whole batch instead. `after` notifications and bubbling are not
//! affected.
//!
//! The lock is advisory (`flock(2)` on Unix), process-wide, and exclusive.
//! It is released when the guard drops, including during unwinding.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::broker::Phase;
use crate::error::{Error, Result};
use crate::proxy::ObservableProxy;

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    rustix::fs::flock(file, rustix::fs::FlockOperation::LockExclusive).map_err(Into::into)
}

#[cfg(unix)]
fn unlock(file: &File) -> std::io::Result<()> {
    rustix::fs::flock(file, rustix::fs::FlockOperation::Unlock).map_err(Into::into)
}

#[cfg(not(unix))]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    file.lock()
}

#[cfg(not(unix))]
fn unlock(file: &File) -> std::io::Result<()> {
    file.unlock()
}

/// Guard for an exclusive lock on a proxy's lock file.
///
/// Holding the guard marks the proxy as locked. Dropping it releases the
/// OS lock, then clears the flag.
#[must_use = "the lock is released when the guard is dropped"]
pub struct ScopedLock {
    file: File,
    path: PathBuf,
    proxy: ObservableProxy,
}

impl std::fmt::Debug for ScopedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedLock")
            .field("path", &self.path)
            .field("kind", &self.proxy.kind())
            .finish()
    }
}

impl ScopedLock {
    /// Block until the exclusive lock on `proxy`'s lock file is held.
    ///
    /// The file is created if missing and never truncated. Emits nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if the proxy has no lock file.
    /// - [`Error::LockReentry`] if the proxy is already locked.
    /// - [`Error::LockAcquisition`] if the file cannot be opened or locked.
    pub fn acquire(proxy: &ObservableProxy) -> Result<Self> {
        let path = proxy
            .options()
            .lock_file()
            .ok_or(Error::Configuration)?
            .to_path_buf();
        if proxy.is_locked() {
            return Err(Error::LockReentry);
        }

        let acquisition = |source: std::io::Error| Error::LockAcquisition {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(acquisition)?;
        lock_exclusive(&file).map_err(acquisition)?;

        debug!(path = %path.display(), kind = %proxy.kind(), "lock acquired");
        proxy.set_locked(true);
        Ok(Self {
            file,
            path,
            proxy: proxy.clone(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        if let Err(err) = unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "lock release failed");
        }
        self.proxy.set_locked(false);
        debug!(path = %self.path.display(), "lock released");
    }
}

/// Run `body` as one locked batch on `proxy`.
///
/// Acquires the lock, emits one `(subject, before)`, runs `body`, and
/// releases the lock however `body` exits. Returns what `body` returns.
pub fn run_locked<R>(
    proxy: &ObservableProxy,
    body: impl FnOnce(&ObservableProxy) -> R,
) -> Result<R> {
    let guard = ScopedLock::acquire(proxy)?;
    proxy.emit(Phase::Before);
    let out = body(proxy);
    drop(guard);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::options::ProxyOptions;
    use crate::proxy::create;
    use crate::test_support::Recorder;
    use crate::value::Value;

    fn locked_map(dir: &tempfile::TempDir, rec: &Rc<Recorder>) -> ObservableProxy {
        let options = ProxyOptions::new().with_lock_file(dir.path().join("state.lock"));
        create(Value::from(json!({"a": {}})), Some(rec.clone()), options)
            .into_proxy()
            .expect("map is wrapped")
    }

    #[test]
    fn batch_emits_a_single_before() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new();
        let h = locked_map(&dir, &rec);

        h.lock(|h| {
            h.set("x", 1).unwrap();
            h.set("y", 2).unwrap();
            h.get("x").unwrap();
        })
        .unwrap();

        assert_eq!(rec.count(Phase::Before), 1);
        assert_eq!(rec.count(Phase::After), 2);
        assert!(!h.is_locked());
        assert!(dir.path().join("state.lock").exists());
    }

    #[test]
    fn locked_batch_before_carries_current_subject() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new();
        let h = locked_map(&dir, &rec);
        h.lock(|_| ()).unwrap();
        assert_eq!(rec.payloads(Phase::Before), vec![json!({"a": {}})]);
        assert_eq!(rec.count(Phase::After), 0);
    }

    #[test]
    fn nested_proxies_keep_notifying_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new();
        let h = locked_map(&dir, &rec);

        h.lock(|h| {
            let a = h.get("a").unwrap().into_proxy().unwrap();
            assert_eq!(a.options().lock_file(), h.options().lock_file());
            assert!(!a.is_locked());
            a.set("b", true).unwrap();
        })
        .unwrap();

        assert_eq!(rec.count(Phase::Before), 1);
        assert_eq!(rec.payloads(Phase::After), vec![json!({"a": {"b": true}})]);
    }

    #[test]
    fn body_result_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let h = locked_map(&dir, &Recorder::new());
        let len = h.lock(|h| h.len()).unwrap().unwrap();
        assert_eq!(len, 1);

        let flattened: Result<usize> = h.lock_with(|h| h.len());
        assert_eq!(flattened.unwrap(), 1);
    }

    #[test]
    fn released_when_body_panics() {
        let dir = tempfile::tempdir().unwrap();
        let h = locked_map(&dir, &Recorder::new());

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            h.lock::<()>(|_| panic!("boom")).unwrap();
        }));
        assert!(outcome.is_err());
        assert!(!h.is_locked());
        h.lock(|h| h.set("again", 1).unwrap()).unwrap();
    }

    #[test]
    fn missing_lock_file_is_a_configuration_error() {
        let rec = Recorder::new();
        let h = create(Value::empty_map(), Some(rec.clone()), ProxyOptions::default())
            .into_proxy()
            .unwrap();
        let mut ran = false;
        let err = h.lock(|_| ran = true).unwrap_err();
        assert!(matches!(err, Error::Configuration));
        assert!(!ran);
        assert!(rec.events().is_empty());
    }

    #[test]
    fn relocking_the_same_proxy_fails() {
        let dir = tempfile::tempdir().unwrap();
        let h = locked_map(&dir, &Recorder::new());
        let inner = h.lock(|h| h.lock(|_| ())).unwrap();
        assert!(matches!(inner, Err(Error::LockReentry)));
        assert!(!h.is_locked());
    }

    #[test]
    fn unopenable_lock_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("state.lock");
        let h = create(
            Value::empty_seq(),
            None,
            ProxyOptions::new().with_lock_file(&path),
        )
        .into_proxy()
        .unwrap();
        match h.lock(|_| ()) {
            Err(Error::LockAcquisition { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected LockAcquisition, got {other:?}"),
        }
    }

    #[test]
    fn guard_exposes_path() {
        let dir = tempfile::tempdir().unwrap();
        let h = locked_map(&dir, &Recorder::new());
        let guard = ScopedLock::acquire(&h).unwrap();
        assert_eq!(guard.path(), dir.path().join("state.lock"));
        assert!(h.is_locked());
        drop(guard);
        assert!(!h.is_locked());
    }

    /// Try the lock through a separate open file description, then let go.
    #[cfg(unix)]
    fn lockable_elsewhere(path: &Path) -> bool {
        use rustix::fs::{FlockOperation, flock};

        let other = OpenOptions::new().create(true).append(true).open(path).unwrap();
        let acquired = flock(&other, FlockOperation::NonBlockingLockExclusive).is_ok();
        if acquired {
            flock(&other, FlockOperation::Unlock).unwrap();
        }
        acquired
    }

    #[cfg(unix)]
    #[test]
    fn lock_excludes_other_descriptors_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.lock");
        let h = locked_map(&dir, &Recorder::new());

        let contended = h.lock(|_| lockable_elsewhere(&path)).unwrap();
        assert!(!contended, "second descriptor locked while the batch held it");
        assert!(lockable_elsewhere(&path));
    }

    #[test]
    fn failing_body_still_releases() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new();
        let h = locked_map(&dir, &rec);

        let out: Result<()> = h.lock_with(|h| {
            h.set("x", 1)?;
            Err(Error::KeyNotFound("missing".into()))
        });
        assert!(matches!(out, Err(Error::KeyNotFound(ref k)) if k == "missing"));
        assert!(!h.is_locked());
        #[cfg(unix)]
        assert!(lockable_elsewhere(&dir.path().join("state.lock")));

        h.lock(|h| h.set("y", 2).unwrap()).unwrap();
        assert_eq!(rec.count(Phase::Before), 2);
        assert_eq!(rec.count(Phase::After), 2);
    }

    #[test]
    #[traced_test]
    fn lock_lifecycle_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let h = locked_map(&dir, &Recorder::new());
        h.lock(|_| ()).unwrap();
        assert!(logs_contain("lock acquired"));
        assert!(logs_contain("lock released"));
    }
}
