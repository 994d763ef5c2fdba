//! Filename sanitisation: §4.1 step 3 and the §8 byte-width law.

/// Characters that cannot appear in a resolved filename.
const ILLEGAL_NAME_CHARS: &[char] = &['<', '>', '/', '\\', '|', ':', '*', '?', '\n'];

/// Characters stripped from a goal directory, after the path anchor has
/// been preserved (§4.1 step 4).
const ILLEGAL_DIR_CHARS: &[char] = &['*', ':', '|', '<', '>', '?', '"'];

const MAX_NAME_WIDTH: usize = 255;

/// "Width" of a string per the spec's East-Asian-aware counting rule:
/// ASCII counts as 1, anything else counts as 2. Matches `byteWidth`
/// in §8 ("abc汉" => 3 + 2 = 5).
pub fn byte_width(s: &str) -> usize {
    s.chars()
        .map(|c| if c.is_ascii() { 1 } else { 2 })
        .sum()
}

/// Sanitises a candidate filename: trims whitespace, strips the illegal
/// character set, then truncates the stem (extension preserved) from the
/// right until its width is within [`MAX_NAME_WIDTH`].
///
/// Idempotent: `sanitize(sanitize(x)) == sanitize(x)`, since every pass
/// over already-clean input is a no-op.
pub fn sanitize_filename(name: &str) -> String {
    let trimmed = name.trim();
    let stripped: String = trimmed
        .chars()
        .filter(|c| !ILLEGAL_NAME_CHARS.contains(c))
        .collect();

    if byte_width(&stripped) <= MAX_NAME_WIDTH {
        return stripped;
    }

    let (stem, ext) = match stripped.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (stripped.as_str(), None),
    };
    let ext_width = ext.map(|e| byte_width(e) + 1).unwrap_or(0);
    let budget = MAX_NAME_WIDTH.saturating_sub(ext_width);

    let mut truncated_stem = String::new();
    let mut width = 0;
    for c in stem.chars() {
        let w = if c.is_ascii() { 1 } else { 2 };
        if width + w > budget {
            break;
        }
        truncated_stem.push(c);
        width += w;
    }

    match ext {
        Some(ext) => format!("{}.{}", truncated_stem, ext),
        None => truncated_stem,
    }
}

/// Strips the directory-illegal character set from a goal directory,
/// preserving the path anchor (leading `/` on Unix).
pub fn sanitize_goal_dir(dir: &str) -> String {
    let (anchor, rest) = if let Some(rest) = dir.strip_prefix('/') {
        ("/", rest)
    } else {
        ("", dir)
    };
    let cleaned: String = rest
        .chars()
        .filter(|c| !ILLEGAL_DIR_CHARS.contains(c))
        .collect();
    format!("{}{}", anchor, cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_width_matches_spec_example() {
        assert_eq!(byte_width("abc汉"), 5);
    }

    #[test]
    fn strips_illegal_characters() {
        assert_eq!(sanitize_filename("a<b>c:d*e?f|g.txt"), "abcdefg.txt");
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(sanitize_filename("  file.txt  "), "file.txt");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_filename("a<b>weird:name*.txt");
        let twice = sanitize_filename(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn truncates_stem_preserving_extension_and_staying_within_width() {
        let long_stem: String = "x".repeat(300);
        let name = format!("{}.bin", long_stem);
        let out = sanitize_filename(&name);
        assert!(byte_width(&out) <= MAX_NAME_WIDTH);
        assert!(out.ends_with(".bin"));
    }

    #[test]
    fn truncation_counts_east_asian_chars_as_two() {
        let long_stem: String = "汉".repeat(200);
        let name = format!("{}.txt", long_stem);
        let out = sanitize_filename(&name);
        assert!(byte_width(&out) <= MAX_NAME_WIDTH);
    }

    #[test]
    fn goal_dir_preserves_root_anchor() {
        assert_eq!(sanitize_goal_dir("/home/*user:dir"), "/home/userdir");
    }
}
