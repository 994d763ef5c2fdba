//! Conflict resolution for destination paths: §4.1 step 5.
//!
//! Filename-collision probing happens under a single process-wide mutex
//! (§5, "Resolver's filename-collision check") so concurrent `rename`
//! probes targeting the same base name never hand out the same path.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::error::{DdmError, Result};
use crate::mission::ConflictPolicy;

/// Outcome of resolving a conflict against an existing filesystem entry.
pub struct Resolution {
    pub path: PathBuf,
    /// True when the mission should short-circuit to `Skipped` without a
    /// backing file ever being created.
    pub skip: bool,
    /// True when a zero-byte placeholder file has already been created at
    /// `path` and the downloader should reuse, not recreate, it.
    pub placeholder_created: bool,
}

static COLLISION_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

/// Resolves `dir/name` against `policy`, creating a zero-byte placeholder
/// for `rename`/`overwrite` outcomes per §4.1's closing guarantee.
pub fn resolve(dir: &Path, name: &str, policy: ConflictPolicy) -> Result<Resolution> {
    let _guard = COLLISION_MUTEX.get_or_init(|| Mutex::new(())).lock().unwrap();

    let candidate = dir.join(name);

    match policy {
        ConflictPolicy::Skip => {
            if candidate.exists() {
                return Ok(Resolution {
                    path: candidate,
                    skip: true,
                    placeholder_created: false,
                });
            }
            create_placeholder(&candidate)?;
            Ok(Resolution {
                path: candidate,
                skip: false,
                placeholder_created: true,
            })
        }
        ConflictPolicy::Overwrite => {
            if candidate.exists() {
                std::fs::remove_file(&candidate).map_err(|source| DdmError::FileSystemError {
                    path: candidate.clone(),
                    source,
                })?;
            }
            create_placeholder(&candidate)?;
            Ok(Resolution {
                path: candidate,
                skip: false,
                placeholder_created: true,
            })
        }
        ConflictPolicy::Add => {
            // Keep whatever is there; the downloader appends starting at
            // the existing file's current size (see DESIGN.md's decision
            // on the open question this policy leaves unresolved).
            if !candidate.exists() {
                create_placeholder(&candidate)?;
            }
            Ok(Resolution {
                path: candidate,
                skip: false,
                placeholder_created: false,
            })
        }
        ConflictPolicy::Rename => {
            if !candidate.exists() {
                create_placeholder(&candidate)?;
                return Ok(Resolution {
                    path: candidate,
                    skip: false,
                    placeholder_created: true,
                });
            }
            let path = probe_rename(dir, name)?;
            create_placeholder(&path)?;
            Ok(Resolution {
                path,
                skip: false,
                placeholder_created: true,
            })
        }
    }
}

/// Probes `name_1.ext`, `name_2.ext`, … until an unused path is found.
///
/// The very first probe always appends `_1`, even if `name`'s stem already
/// ends in `_<digits>`; only once that first probe also collides do later
/// probes increment the trailing number they find, rather than stacking a
/// second `_N` suffix. This mirrors the source's `first_time` flag
/// verbatim — `get_usable_path`'s loop only consults the `(.*)_(\d+)$`
/// match once `first_time` has already flipped false.
fn probe_rename(dir: &Path, name: &str) -> Result<PathBuf> {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (name.to_string(), None),
    };

    let mut current_stem = stem;
    let mut first_probe = true;
    loop {
        let next_stem = if first_probe {
            format!("{}_1", current_stem)
        } else {
            match strip_trailing_counter(&current_stem) {
                Some((base, n)) => format!("{}_{}", base, n + 1),
                None => format!("{}_1", current_stem),
            }
        };
        first_probe = false;
        current_stem = next_stem;

        let candidate_name = match &ext {
            Some(ext) => format!("{}.{}", current_stem, ext),
            None => current_stem.clone(),
        };
        let candidate = dir.join(&candidate_name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
}

/// If `stem` matches `(.*)_(\d+)$`, returns `(prefix, counter)` so the next
/// probe can increment the existing counter instead of stacking a new one.
fn strip_trailing_counter(stem: &str) -> Option<(String, u64)> {
    let idx = stem.rfind('_')?;
    let (prefix, suffix) = stem.split_at(idx);
    let digits = &suffix[1..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    Some((prefix.to_string(), n))
}

fn create_placeholder(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| DdmError::FileSystemError {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    File::create(path).map_err(|source| DdmError::FileSystemError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_returns_existing_path_without_creating_anything() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("x.bin");
        File::create(&existing).unwrap();

        let r = resolve(dir.path(), "x.bin", ConflictPolicy::Skip).unwrap();
        assert!(r.skip);
        assert_eq!(r.path, existing);
    }

    #[test]
    fn rename_probes_sequential_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a.bin")).unwrap();
        File::create(dir.path().join("a_1.bin")).unwrap();

        let r = resolve(dir.path(), "a.bin", ConflictPolicy::Rename).unwrap();
        assert_eq!(r.path, dir.path().join("a_2.bin"));
        assert!(r.path.exists());
    }

    #[test]
    fn rename_first_probe_always_appends_1_even_over_existing_counter() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a_5.bin")).unwrap();

        let r = resolve(dir.path(), "a_5.bin", ConflictPolicy::Rename).unwrap();
        assert_eq!(r.path, dir.path().join("a_5_1.bin"));
    }

    #[test]
    fn rename_second_probe_increments_the_counter_from_first_probe() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a_5.bin")).unwrap();
        File::create(dir.path().join("a_5_1.bin")).unwrap();

        let r = resolve(dir.path(), "a_5.bin", ConflictPolicy::Rename).unwrap();
        assert_eq!(r.path, dir.path().join("a_5_2.bin"));
    }

    #[test]
    fn overwrite_removes_existing_file_and_creates_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("o.bin");
        std::fs::write(&p, b"old contents").unwrap();

        let r = resolve(dir.path(), "o.bin", ConflictPolicy::Overwrite).unwrap();
        assert_eq!(r.path, p);
        assert_eq!(std::fs::metadata(&p).unwrap().len(), 0);
    }

    #[test]
    fn add_keeps_existing_bytes_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("partial.bin");
        std::fs::write(&p, b"existing").unwrap();

        let r = resolve(dir.path(), "partial.bin", ConflictPolicy::Add).unwrap();
        assert_eq!(r.path, p);
        assert_eq!(std::fs::read(&p).unwrap(), b"existing");
    }
}
