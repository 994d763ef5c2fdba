//! Filename selection: §4.1 steps 1-2 (priority-ordered candidate, then
//! rename application).

use super::content_disposition::parse_content_disposition_filename;

/// Last path segment of a URL, stripped of query/fragment. `None` when the
/// path is empty or root (`"/"`).
fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().split('/').filter(|s| !s.is_empty()).last()?;
    if segment.is_empty() || segment == "." || segment == ".." {
        None
    } else {
        Some(segment.to_string())
    }
}

/// Priority-ordered filename candidate: `Content-Disposition`, then URL
/// path, then a synthesized `untitled_<unix_time>_<rand>` name.
///
/// `rand_hint` stands in for the spec's `rand 0..100` — callers pass a
/// value they've already drawn so this function stays deterministic and
/// testable (it never calls into a PRNG itself).
pub fn select_candidate(
    url: &str,
    content_disposition: Option<&str>,
    encoding: &str,
    unix_time: u64,
    rand_hint: u32,
) -> String {
    content_disposition
        .and_then(|cd| parse_content_disposition_filename(cd, encoding))
        .filter(|s| !s.is_empty())
        .or_else(|| filename_from_url_path(url))
        .unwrap_or_else(|| format!("untitled_{}_{}", unix_time, rand_hint % 100))
}

/// Applies a caller-supplied rename hint over a derived candidate.
///
/// Used verbatim if it already contains a `.`; otherwise the derived
/// candidate's extension (if any) is appended.
pub fn apply_rename(rename: &str, derived: &str) -> String {
    if rename.contains('.') {
        return rename.to_string();
    }
    match derived.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!("{}.{}", rename, ext),
        _ => rename.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_content_disposition_over_url() {
        let name = select_candidate(
            "https://example.com/archive.zip",
            Some("attachment; filename=\"real-name.tar.gz\""),
            "utf-8",
            0,
            0,
        );
        assert_eq!(name, "real-name.tar.gz");
    }

    #[test]
    fn falls_back_to_url_path() {
        let name = select_candidate("https://example.com/a/b/file.deb", None, "utf-8", 0, 0);
        assert_eq!(name, "file.deb");
    }

    #[test]
    fn synthesizes_when_nothing_usable() {
        let name = select_candidate(
            "https://example.com/",
            None,
            "utf-8",
            1_700_000_000,
            42,
        );
        assert_eq!(name, "untitled_1700000000_42");
    }

    #[test]
    fn rename_used_verbatim_when_it_has_a_dot() {
        assert_eq!(apply_rename("custom.bin", "original.zip"), "custom.bin");
    }

    #[test]
    fn rename_gets_derived_extension_when_missing() {
        assert_eq!(apply_rename("custom", "original.zip"), "custom.zip");
    }

    #[test]
    fn rename_without_dot_and_no_derived_extension_stays_bare() {
        assert_eq!(apply_rename("custom", "original"), "custom");
    }
}
