//! Decide whether a caller-supplied relative path may be read.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::scope::{DenyRule, relative_to_root};

/// Why a path was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GuardRejection {
    #[error("outside scope")]
    OutOfScope,
    #[error("legacy denied")]
    LegacyDenied,
    #[error("not found")]
    NotFound,
}

/// Resolves relative paths inside a fixed root under a deny rule.
///
/// The guard holds no state beyond its inputs; the same path against an
/// unchanged tree always yields the same decision.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    deny: DenyRule,
}

impl PathGuard {
    /// `root` is canonicalized once; it must exist.
    pub fn new(root: &Path, deny: DenyRule) -> std::io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
            deny,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` to a canonical absolute path of a regular file.
    ///
    /// Order of checks: scope, deny rule, existence. A path that cannot be
    /// canonicalized is checked lexically for scope first so that
    /// `../../missing` reports `OutOfScope` rather than `NotFound`.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, GuardRejection> {
        let joined = self.root.join(relative);
        let canonical = match joined.canonicalize() {
            Ok(path) => path,
            Err(_) => {
                let lexical = normalize_lexically(&joined);
                let Some(rel) = relative_to_root(&self.root, &lexical) else {
                    return Err(self.reject(relative, GuardRejection::OutOfScope));
                };
                if self.deny.denies(rel) {
                    return Err(self.reject(relative, GuardRejection::LegacyDenied));
                }
                return Err(self.reject(relative, GuardRejection::NotFound));
            }
        };
        let Some(rel) = relative_to_root(&self.root, &canonical) else {
            return Err(self.reject(relative, GuardRejection::OutOfScope));
        };
        if self.deny.denies(rel) {
            return Err(self.reject(relative, GuardRejection::LegacyDenied));
        }
        if !canonical.is_file() {
            return Err(self.reject(relative, GuardRejection::NotFound));
        }
        Ok(canonical)
    }

    fn reject(&self, relative: &str, reason: GuardRejection) -> GuardRejection {
        debug!(path = relative, %reason, "path rejected");
        reason
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
