//! Deterministic scope and denylist decisions over already-resolved paths.
//!
//! The path guard canonicalizes on disk and then asks these functions; they
//! never touch the filesystem themselves.

use std::path::{Component, Path};

/// Denylist for component files that must never be bundled.
///
/// A path is denied when its directory is (or is inside) one of
/// `legacy_dirs`, or when its file name starts with one of
/// `forbidden_prefixes`. Either condition alone is sufficient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenyRule {
    /// Legacy directories, relative to the repository root.
    pub legacy_dirs: Vec<String>,
    /// File name prefixes marking do-not-bundle files (e.g. `fs_`).
    pub forbidden_prefixes: Vec<String>,
}

impl DenyRule {
    pub fn new<D, P>(legacy_dirs: D, forbidden_prefixes: P) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            legacy_dirs: legacy_dirs.into_iter().map(Into::into).collect(),
            forbidden_prefixes: forbidden_prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Decide whether `relative` (a path relative to the root) is denied.
    pub fn denies(&self, relative: &Path) -> bool {
        self.in_legacy_dir(relative) || self.has_forbidden_prefix(relative)
    }

    fn in_legacy_dir(&self, relative: &Path) -> bool {
        let Some(parent) = relative.parent() else {
            return false;
        };
        let parent = normal_components(parent);
        self.legacy_dirs.iter().any(|dir| {
            let legacy = normal_components(Path::new(dir));
            !legacy.is_empty() && parent.starts_with(&legacy)
        })
    }

    fn has_forbidden_prefix(&self, relative: &Path) -> bool {
        let Some(name) = relative.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        self.forbidden_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
    }
}

/// Return `candidate` relative to `root` when it is `root` or a descendant.
///
/// Both paths must already be canonical; comparison is by whole components so
/// `/repo-other` is not inside `/repo`.
pub fn relative_to_root<'a>(root: &Path, candidate: &'a Path) -> Option<&'a Path> {
    candidate.strip_prefix(root).ok()
}

fn normal_components(path: &Path) -> Vec<&std::ffi::OsStr> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect()
}
