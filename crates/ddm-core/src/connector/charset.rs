//! Charset discovery for filename decoding (§4.4): `Content-Type`'s
//! `charset=`, then a `<meta charset=…>` scan of an HTML body prefix,
//! falling back to UTF-8.

/// Extracts `charset=…` from a `Content-Type` header value, if present.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let part = part.trim();
        let (name, value) = part.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Scans the first bytes of an HTML body for a `<meta charset="...">` or
/// `<meta http-equiv="Content-Type" content="...; charset=...">` tag.
/// Only decodable as ASCII/Latin-1 text, since the charset itself is
/// still unknown at this point.
pub fn charset_from_html_meta(body_prefix: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body_prefix);
    let lower = text.to_lowercase();

    if let Some(idx) = lower.find("charset=") {
        let rest = &text[idx + "charset=".len()..];
        let value: String = rest
            .trim_start_matches(['"', '\''])
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        if !value.is_empty() {
            return Some(value);
        }
    }
    None
}

/// Determines the response encoding: `Content-Type` charset, else an
/// HTML `<meta charset>` scan when the response is `text/html`, else the
/// UTF-8 default.
pub fn discover_encoding(content_type: Option<&str>, html_prefix: Option<&[u8]>) -> String {
    if let Some(ct) = content_type {
        if let Some(cs) = charset_from_content_type(ct) {
            return cs;
        }
        if ct.trim_start().starts_with("text/html") {
            if let Some(prefix) = html_prefix {
                if let Some(cs) = charset_from_html_meta(prefix) {
                    return cs;
                }
            }
        }
    }
    "utf-8".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_charset_from_content_type() {
        assert_eq!(
            charset_from_content_type("text/plain; charset=iso-8859-1"),
            Some("iso-8859-1".to_string())
        );
    }

    #[test]
    fn no_charset_param_returns_none() {
        assert_eq!(charset_from_content_type("application/octet-stream"), None);
    }

    #[test]
    fn finds_meta_charset_in_html() {
        let html = b"<html><head><meta charset=\"gb2312\"></head></html>";
        assert_eq!(
            charset_from_html_meta(html),
            Some("gb2312".to_string())
        );
    }

    #[test]
    fn discover_encoding_defaults_to_utf8() {
        assert_eq!(discover_encoding(None, None), "utf-8");
    }

    #[test]
    fn discover_encoding_prefers_content_type_charset() {
        assert_eq!(
            discover_encoding(Some("text/html; charset=shift_jis"), None),
            "shift_jis"
        );
    }

    #[test]
    fn discover_encoding_falls_back_to_html_meta() {
        let html = b"<meta charset=euc-kr>";
        assert_eq!(
            discover_encoding(Some("text/html"), Some(html.as_slice())),
            "euc-kr"
        );
    }
}
