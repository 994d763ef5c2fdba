//! `Content-Disposition` header parsing (filename and filename*).

/// Extracts the filename from a raw Content-Disposition header value.
///
/// Prefers `filename*=<charset>''<pct-encoded>` (RFC 5987) over plain
/// `filename="…"`, per priority order 1.a in the resolver algorithm.
///
/// `fallback_encoding` is the response's discovered charset (§4.4). It is
/// consulted only for a `filename*` value that omits its own charset
/// token (`filename*=''pct-encoded`, a malformed but observed-in-the-wild
/// variant) — RFC 5987's pct-encoded bytes travel safely through the
/// header line regardless of charset, so decoding them per a declared
/// charset is sound. The plain `filename=` token carries no such escape:
/// by the time it reaches this function it has already round-tripped
/// through `std::str::from_utf8` at the header layer, so it is valid
/// UTF-8 or it isn't here at all — re-decoding it under a different
/// charset would corrupt it rather than fix anything, so it's used as-is.
pub fn parse_content_disposition_filename(
    header_value: &str,
    fallback_encoding: &str,
) -> Option<String> {
    let value = header_value.trim();
    let mut filename_from_token: Option<String> = None;
    let mut filename_star: Option<String> = None;

    for param in value.split(';') {
        let param = param.trim();
        let Some((name, v)) = param.split_once('=') else {
            continue;
        };
        let name = ascii_lowercase(name.trim());
        let v = v.trim();

        if name == "filename*" {
            if let Some((charset, rest)) = v.split_once("''") {
                let charset = if charset.is_empty() {
                    fallback_encoding
                } else {
                    charset
                };
                let bytes = percent_decode_bytes(rest);
                let decoded = decode_bytes(&bytes, charset);
                if !decoded.is_empty() {
                    filename_star = Some(decoded);
                }
            }
        } else if name == "filename" {
            let unquoted = if v.starts_with('"') && v.ends_with('"') && v.len() >= 2 {
                decode_quoted_filename(&v[1..v.len() - 1])
            } else {
                v.to_string()
            };
            if !unquoted.is_empty() {
                filename_from_token = Some(unquoted);
            }
        }
    }

    filename_star.or(filename_from_token)
}

/// Decodes `bytes` per `charset`: UTF-8 (the default, and anything
/// unrecognized) lossily, ISO-8859-1/Latin-1 byte-for-byte (every byte is
/// already its own Unicode scalar value). Other declared charsets
/// (Shift_JIS, GB2312, …) fall back to lossy UTF-8 — full transcoding is
/// out of scope (spec.md §1's "content decoding/transcoding beyond
/// charset discovery" non-goal).
fn decode_bytes(bytes: &[u8], charset: &str) -> String {
    let charset = charset.trim().to_ascii_lowercase();
    match charset.as_str() {
        "iso-8859-1" | "latin1" | "latin-1" | "windows-1252" => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_quoted_filename(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '"' || next == '\\' {
                    out.push(chars.next().unwrap());
                    continue;
                }
            }
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

/// Percent-decode a `filename*` value into raw bytes, left for the caller
/// to interpret under whatever charset preceded the `''` marker.
fn percent_decode_bytes(input: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut bytes = input.as_bytes().iter().copied();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let h = bytes.next().and_then(hex_digit);
            let l = bytes.next().and_then(hex_digit);
            match (h, l) {
                (Some(high), Some(low)) => out.push(high << 4 | low),
                _ => {
                    out.push(b'%');
                    if let Some(x) = h {
                        out.push(x);
                    }
                    if let Some(x) = l {
                        out.push(x);
                    }
                }
            }
        } else {
            out.push(b);
        }
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn ascii_lowercase(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_uppercase() {
                c.to_ascii_lowercase()
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quoted() {
        let r = parse_content_disposition_filename("attachment; filename=\"report.pdf\"", "utf-8");
        assert_eq!(r.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn parse_token() {
        let r = parse_content_disposition_filename("attachment; filename=report.pdf", "utf-8");
        assert_eq!(r.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn parse_filename_star_utf8() {
        let r = parse_content_disposition_filename(
            "attachment; filename*=UTF-8''caf%C3%A9.txt",
            "utf-8",
        );
        assert_eq!(r.as_deref(), Some("café.txt"));
    }

    #[test]
    fn filename_star_takes_precedence_over_filename() {
        let r = parse_content_disposition_filename(
            "attachment; filename=\"fallback.bin\"; filename*=UTF-8''real%20name.dat",
            "utf-8",
        );
        assert_eq!(r.as_deref(), Some("real name.dat"));
    }

    #[test]
    fn filename_star_latin1_charset_decodes_byte_for_byte() {
        // 0xE9 is "é" in Latin-1; lossy-UTF-8 would instead produce U+FFFD.
        let r = parse_content_disposition_filename(
            "attachment; filename*=ISO-8859-1''caf%E9.txt",
            "utf-8",
        );
        assert_eq!(r.as_deref(), Some("café.txt"));
    }

    #[test]
    fn filename_star_without_charset_token_uses_fallback_encoding() {
        let r = parse_content_disposition_filename(
            "attachment; filename*=''caf%E9.txt",
            "iso-8859-1",
        );
        assert_eq!(r.as_deref(), Some("café.txt"));
    }
}
