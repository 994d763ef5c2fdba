//! Name & path resolver (C1): turns response headers, the original URL,
//! and the caller's goal directory/rename/conflict policy into an
//! absolute, filesystem-legal destination path.

mod conflict;
mod content_disposition;
mod filename;
mod sanitize;

pub use sanitize::byte_width;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::mission::ConflictPolicy;

/// Everything the resolver needs to know about a response before it can
/// pick a destination path.
pub struct ResolveInput<'a> {
    pub url: &'a str,
    pub goal_dir: &'a Path,
    pub rename: Option<&'a str>,
    pub conflict_policy: ConflictPolicy,
    pub content_disposition: Option<&'a str>,
    /// Response charset discovered by C4 (§4.4), e.g. `"utf-8"`. Only
    /// consulted for a `filename*` parameter that omits its own charset
    /// token; see [`content_disposition::parse_content_disposition_filename`].
    pub encoding: &'a str,
}

/// Result of §4.1: a declared size (if known), the resolved absolute
/// path, and whether the mission should short-circuit to `skipped`.
pub struct ResolvedTarget {
    pub path: PathBuf,
    pub skip: bool,
}

/// Runs the full name & path resolution algorithm (§4.1 steps 1-6).
pub fn resolve(input: ResolveInput<'_>) -> Result<ResolvedTarget> {
    let unix_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let rand_hint = (unix_time.wrapping_mul(2654435761) % 100) as u32;

    let derived = filename::select_candidate(
        input.url,
        input.content_disposition,
        input.encoding,
        unix_time,
        rand_hint,
    );

    let named = match input.rename {
        Some(rename) => filename::apply_rename(rename, &derived),
        None => derived,
    };

    let sanitized_name = sanitize::sanitize_filename(&named);
    let sanitized_dir = sanitize::sanitize_goal_dir(&input.goal_dir.to_string_lossy());
    let dir = PathBuf::from(sanitized_dir)
        .canonicalize_best_effort();

    let resolution = conflict::resolve(&dir, &sanitized_name, input.conflict_policy)?;

    Ok(ResolvedTarget {
        path: resolution.path,
        skip: resolution.skip,
    })
}

trait CanonicalizeBestEffort {
    fn canonicalize_best_effort(self) -> PathBuf;
}

impl CanonicalizeBestEffort for PathBuf {
    /// Resolves to an absolute path, creating missing directories as
    /// needed (§4.1 step 4). Falls back to joining onto the current
    /// directory when `canonicalize` fails because the path doesn't
    /// exist yet.
    fn canonicalize_best_effort(self) -> PathBuf {
        let _ = std::fs::create_dir_all(&self);
        self.canonicalize().unwrap_or_else(|_| {
            if self.is_absolute() {
                self
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(&self))
                    .unwrap_or(self)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_to_absolute_path_with_derived_filename() {
        let dir = tempfile::tempdir().unwrap();
        let out = resolve(ResolveInput {
            url: "https://example.com/archive.zip",
            goal_dir: dir.path(),
            rename: None,
            conflict_policy: ConflictPolicy::Rename,
            content_disposition: None,
            encoding: "utf-8",
        })
        .unwrap();

        assert!(out.path.is_absolute());
        assert_eq!(out.path.file_name().unwrap(), "archive.zip");
        assert!(out.path.exists());
        assert!(!out.skip);
    }

    #[test]
    fn content_disposition_filename_wins_over_url() {
        let dir = tempfile::tempdir().unwrap();
        let out = resolve(ResolveInput {
            url: "https://example.com/archive.zip",
            goal_dir: dir.path(),
            rename: None,
            conflict_policy: ConflictPolicy::Rename,
            content_disposition: Some("attachment; filename=\"real.tar.gz\""),
            encoding: "utf-8",
        })
        .unwrap();
        assert_eq!(out.path.file_name().unwrap(), "real.tar.gz");
    }

    #[test]
    fn skip_policy_short_circuits_without_new_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("g.txt"), b"pre-existing").unwrap();

        let out = resolve(ResolveInput {
            url: "https://example.com/irrelevant",
            goal_dir: dir.path(),
            rename: Some("g.txt"),
            conflict_policy: ConflictPolicy::Skip,
            content_disposition: None,
            encoding: "utf-8",
        })
        .unwrap();
        assert!(out.skip);
        assert_eq!(out.path.file_name().unwrap(), "g.txt");
    }

    #[test]
    fn rename_collision_yields_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let first = resolve(ResolveInput {
            url: "https://example.com/a.bin",
            goal_dir: dir.path(),
            rename: None,
            conflict_policy: ConflictPolicy::Rename,
            content_disposition: None,
            encoding: "utf-8",
        })
        .unwrap();
        let second = resolve(ResolveInput {
            url: "https://example.com/a.bin",
            goal_dir: dir.path(),
            rename: None,
            conflict_policy: ConflictPolicy::Rename,
            content_disposition: None,
            encoding: "utf-8",
        })
        .unwrap();
        assert_ne!(first.path, second.path);
    }
}
