//! Component bundling: guarded reads, short digests, delimited concatenation.
//!
//! A bundle request is all-or-nothing. The first path the guard rejects (or
//! that cannot be read as UTF-8 text) aborts the request and no partial bundle
//! is returned. Every call re-reads and re-hashes; nothing is cached.

use std::fs;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::core::types::{Bundle, ManifestEntry};
use crate::io::path_guard::{GuardRejection, PathGuard};

/// Hex characters kept from the content hash.
pub const DIGEST_LEN: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("{reason}: {path}")]
    Rejected {
        path: String,
        reason: GuardRejection,
    },
    #[error("unreadable: {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl BundleError {
    /// The requested path that stopped the bundle.
    pub fn path(&self) -> &str {
        match self {
            BundleError::Rejected { path, .. } | BundleError::Read { path, .. } => path,
        }
    }

    pub fn rejection(&self) -> Option<GuardRejection> {
        match self {
            BundleError::Rejected { reason, .. } => Some(*reason),
            BundleError::Read { .. } => None,
        }
    }
}

/// Short, stable content digest used for traceability.
pub fn short_digest(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    let mut hex = hex::encode(hash);
    hex.truncate(DIGEST_LEN);
    hex
}

pub fn begin_header(path: &str, digest: &str) -> String {
    format!("# ==== BEGIN COMPONENT: {path} (digest:{digest}) ====")
}

pub fn end_header(path: &str) -> String {
    format!("# ==== END COMPONENT: {path} ====")
}

/// Load `paths` in order and assemble a [`Bundle`].
#[instrument(skip_all, fields(root = %guard.root().display(), count = paths.len()))]
pub fn bundle<S: AsRef<str>>(guard: &PathGuard, paths: &[S]) -> Result<Bundle, BundleError> {
    let mut parts = Vec::with_capacity(paths.len());
    let mut manifest = Vec::with_capacity(paths.len());

    for rel in paths {
        let rel = rel.as_ref();
        let resolved = guard.resolve(rel).map_err(|reason| BundleError::Rejected {
            path: rel.to_string(),
            reason,
        })?;
        let text = fs::read_to_string(&resolved).map_err(|source| BundleError::Read {
            path: rel.to_string(),
            source,
        })?;
        let digest = short_digest(&text);
        debug!(path = rel, %digest, bytes = text.len(), "component loaded");

        parts.push(format!(
            "\n{}\n{}\n{}\n",
            begin_header(rel, &digest),
            text,
            end_header(rel)
        ));
        manifest.push(ManifestEntry {
            id: rel.to_string(),
            digest,
            size: text.len(),
        });
    }

    info!(components = manifest.len(), "bundle assembled");
    Ok(Bundle {
        text: parts.join("\n"),
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scope::DenyRule;
    use std::path::Path;

    fn guard(root: &Path) -> PathGuard {
        PathGuard::new(root, DenyRule::new(["legacy"], ["fs_"])).expect("guard")
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn bundle_keeps_request_order_and_headers() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "a/x.py", "x = 1\n");
        write(temp.path(), "b/y.py", "y = 2\n");

        let out = bundle(&guard(temp.path()), &["b/y.py", "a/x.py"]).expect("bundle");
        let ids: Vec<&str> = out.manifest.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b/y.py", "a/x.py"]);
        assert_eq!(out.manifest[0].size, 6);
        assert_eq!(out.manifest[0].digest.len(), DIGEST_LEN);

        let y_begin = out.text.find("BEGIN COMPONENT: b/y.py").expect("y header");
        let x_begin = out.text.find("BEGIN COMPONENT: a/x.py").expect("x header");
        assert!(y_begin < x_begin);
        assert!(out.text.contains(&format!(
            "{}\ny = 2\n\n{}",
            begin_header("b/y.py", &out.manifest[0].digest),
            end_header("b/y.py")
        )));
    }

    #[test]
    fn bundle_is_idempotent_for_unchanged_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "a/x.py", "print('x')\n");
        let guard = guard(temp.path());
        let first = bundle(&guard, &["a/x.py"]).expect("first");
        let second = bundle(&guard, &["a/x.py"]).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn bundle_rereads_changed_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "a/x.py", "v1\n");
        let guard = guard(temp.path());
        let first = bundle(&guard, &["a/x.py"]).expect("first");
        write(temp.path(), "a/x.py", "v2 longer\n");
        let second = bundle(&guard, &["a/x.py"]).expect("second");
        assert_ne!(first.manifest[0].digest, second.manifest[0].digest);
        assert_eq!(second.manifest[0].size, 10);
    }

    #[test]
    fn first_invalid_path_aborts_whole_request() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "a/x.py", "x\n");
        write(temp.path(), "legacy/y.py", "y\n");

        let err = bundle(
            &guard(temp.path()),
            &["a/x.py", "legacy/y.py", "missing.py"],
        )
        .unwrap_err();
        assert_eq!(err.path(), "legacy/y.py");
        assert_eq!(err.rejection(), Some(GuardRejection::LegacyDenied));
        assert_eq!(err.to_string(), "legacy denied: legacy/y.py");
    }

    #[test]
    fn non_utf8_file_is_a_read_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bin.dat");
        fs::write(&path, [0xff, 0xfe, 0x00]).expect("write");
        let err = bundle(&guard(temp.path()), &["bin.dat"]).unwrap_err();
        assert!(matches!(err, BundleError::Read { .. }));
        assert_eq!(err.path(), "bin.dat");
    }

    #[test]
    fn empty_request_yields_empty_bundle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = bundle::<&str>(&guard(temp.path()), &[]).expect("bundle");
        assert!(out.text.is_empty());
        assert!(out.manifest.is_empty());
    }

    #[test]
    fn short_digest_is_stable() {
        assert_eq!(short_digest("abc"), "ba7816bf8f");
    }
}
