//! Translation between logical paths and on-disk cache paths.
//!
//! Logical paths are server-relative strings as they appear on the wire.
//! Inside the cache directory every file is versioned: `<relpath>_v<n>` for
//! installed versions, with one or more `_tmp` suffixes for a writer's
//! private working copy. Nothing else is ever written below the cache root,
//! so the mapping is reversible with plain string surgery.

use std::path::{Path, PathBuf};

/// Maps logical paths into a cache directory and back.
#[derive(Debug, Clone)]
pub struct PathMapper {
    cache_root: PathBuf,
}

impl PathMapper {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Absolute position of a logical path below the cache root,
    /// without any version suffix.
    pub fn server_path(&self, logical: &str) -> PathBuf {
        self.cache_root.join(normalize_logical(logical))
    }

    /// On-disk path of one installed version of a logical path.
    pub fn versioned_cache_path(&self, logical: &str, version: i64) -> PathBuf {
        let mut raw = self.server_path(logical).into_os_string();
        raw.push(format!("_v{}", version));
        PathBuf::from(raw)
    }

    /// A working-copy path that does not currently exist on disk, formed by
    /// stacking `_tmp` suffixes onto the versioned path. Uniqueness holds
    /// only against the disk state at call time; the caller must keep the
    /// cache lock across the create that follows.
    pub fn fresh_temp_path(&self, logical: &str, version: i64) -> PathBuf {
        let mut raw = self.versioned_cache_path(logical, version).into_os_string();
        loop {
            raw.push("_tmp");
            let candidate = PathBuf::from(raw.clone());
            if !candidate.exists() {
                return candidate;
            }
        }
    }
}

/// Normalize a logical path, preserving at most one leading `../`.
///
/// The remainder is folded lexically: `.` components vanish and interior
/// `..` components cancel the preceding component. Surplus leading `..`s
/// collapse into the single preserved one.
pub fn normalize_logical(logical: &str) -> PathBuf {
    let escapes = logical.starts_with("../");
    let mut parts: Vec<&str> = Vec::new();
    for comp in logical.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut out = PathBuf::new();
    if escapes {
        out.push("..");
    }
    for part in parts {
        out.push(part);
    }
    out
}

/// Undo the cache naming scheme: drop trailing `_tmp`s, then a `_v<digits>`
/// suffix, returning the unversioned server path.
pub fn strip_versioning(path: &Path) -> PathBuf {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return path.to_path_buf();
    };
    let mut name = name;
    while let Some(rest) = name.strip_suffix("_tmp") {
        name = rest;
    }
    if let Some(idx) = name.rfind("_v") {
        let digits = &name[idx + 2..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            name = &name[..idx];
        }
    }
    path.with_file_name(name)
}
