#![forbid(unsafe_code)]

//! Construction options for observable proxies.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Options a proxy is built with.
///
/// Wrappers a proxy creates for nested collections inherit `lock_file` but
/// not `always_update_after`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyOptions {
    /// File used as the exclusive lock handle. Locking is unavailable
    /// without one.
    pub lock_file: Option<PathBuf>,
    /// Emit `after` for every intercepted operation, mutating or not.
    pub always_update_after: bool,
}

impl ProxyOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable locking through the file at `path`.
    #[must_use]
    pub fn with_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_always_update_after(mut self, enabled: bool) -> Self {
        self.always_update_after = enabled;
        self
    }

    #[must_use]
    pub fn lock_file(&self) -> Option<&Path> {
        self.lock_file.as_deref()
    }

    /// Options for a wrapper created while forwarding an operation.
    #[must_use]
    pub(crate) fn for_child(&self) -> Self {
        Self {
            lock_file: self.lock_file.clone(),
            always_update_after: false,
        }
    }

    /// Decode options from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = ProxyOptions::default();
        assert_eq!(opts.lock_file(), None);
        assert!(!opts.always_update_after);
    }

    #[test]
    fn builder() {
        let opts = ProxyOptions::new()
            .with_lock_file("/tmp/obcol.lock")
            .with_always_update_after(true);
        assert_eq!(opts.lock_file(), Some(Path::new("/tmp/obcol.lock")));
        assert!(opts.always_update_after);
    }

    #[test]
    fn child_keeps_lock_file_only() {
        let opts = ProxyOptions::new()
            .with_lock_file("a.lock")
            .with_always_update_after(true);
        let child = opts.for_child();
        assert_eq!(child.lock_file(), Some(Path::new("a.lock")));
        assert!(!child.always_update_after);
    }

    #[test]
    fn from_json_fills_defaults() {
        let opts = ProxyOptions::from_json(r#"{"always_update_after": true}"#).unwrap();
        assert!(opts.always_update_after);
        assert_eq!(opts.lock_file, None);

        let opts = ProxyOptions::from_json(r#"{"lock_file": "state.lock"}"#).unwrap();
        assert_eq!(opts.lock_file(), Some(Path::new("state.lock")));
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(ProxyOptions::from_json("{not json").is_err());
    }
}
