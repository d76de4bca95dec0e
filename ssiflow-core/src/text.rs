//! HTML entity decoding and the escape helpers used by `echo`,
//! `printenv`, and the query-string variables.

/// The ISO-Latin-1 named entity set. Names longer than 6 bytes are never
/// looked up.
const MAX_ENTITY_LEN: usize = 6;

#[rustfmt::skip]
const ENTITIES: &[(&str, u32)] = &[
    ("lt", 60), ("gt", 62),
    ("amp", 38), ("ETH", 208), ("eth", 240),
    ("quot", 34), ("Auml", 196), ("Euml", 203), ("Iuml", 207), ("Ouml", 214),
    ("Uuml", 220), ("auml", 228), ("euml", 235), ("iuml", 239), ("ouml", 246),
    ("uuml", 252), ("yuml", 255),
    ("Acirc", 194), ("Aring", 197), ("AElig", 198), ("Ecirc", 202),
    ("Icirc", 206), ("Ocirc", 212), ("Ucirc", 219), ("THORN", 222),
    ("szlig", 223), ("acirc", 226), ("aring", 229), ("aelig", 230),
    ("ecirc", 234), ("icirc", 238), ("ocirc", 244), ("ucirc", 251),
    ("thorn", 254),
    ("Agrave", 192), ("Aacute", 193), ("Atilde", 195), ("Ccedil", 199),
    ("Egrave", 200), ("Eacute", 201), ("Igrave", 204), ("Iacute", 205),
    ("Ntilde", 209), ("Ograve", 210), ("Oacute", 211), ("Otilde", 213),
    ("Oslash", 216), ("Ugrave", 217), ("Uacute", 218), ("Yacute", 221),
    ("agrave", 224), ("aacute", 225), ("atilde", 227), ("ccedil", 231),
    ("egrave", 232), ("eacute", 233), ("igrave", 236), ("iacute", 237),
    ("ntilde", 241), ("ograve", 242), ("oacute", 243), ("otilde", 245),
    ("oslash", 248), ("ugrave", 249), ("uacute", 250), ("yacute", 253),
];

/// True for character codes that a numeric reference may decode to.
/// Everything else (unused control codes, anything >= 256) is deleted
/// from the output, `&#00;` included.
fn numeric_ref_allowed(val: u32) -> bool {
    !(val <= 8 || (11..=31).contains(&val) || (127..=160).contains(&val) || val >= 256)
}

/// Decode HTML entities and numeric character references.
///
/// Unknown entities are left undecoded (the `&` and the following bytes
/// pass through); an entity with no terminating `;` is treated as plain
/// text; references to unused character codes are deleted outright.
pub fn decode_entities(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'&' {
            let ch = s[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
            continue;
        }

        let semi = match s[i + 1..].find(';') {
            Some(rel) => i + 1 + rel,
            None => {
                // no terminator anywhere: plain data
                out.push('&');
                i += 1;
                continue;
            }
        };
        let body = &s[i + 1..semi];

        if let Some(digits) = body.strip_prefix('#') {
            let mut val: u32 = 0;
            let mut ok = !digits.is_empty();
            for b in digits.bytes() {
                if b.is_ascii_digit() {
                    val = (val.saturating_mul(10)).saturating_add(u32::from(b - b'0'));
                } else {
                    ok = false;
                    break;
                }
            }
            if ok && numeric_ref_allowed(val) {
                if let Some(ch) = char::from_u32(val) {
                    out.push(ch);
                }
            }
            // malformed or unused references produce nothing
            i = semi + 1;
        } else if body.len() < 2 || body.len() > MAX_ENTITY_LEN {
            out.push('&');
            i += 1;
        } else {
            match ENTITIES.iter().find(|(name, _)| *name == body) {
                Some(&(_, val)) => {
                    out.push(char::from_u32(val).unwrap());
                    i = semi + 1;
                }
                None => {
                    out.push('&');
                    i += 1;
                }
            }
        }
    }
    out
}

/// Escape `&`, `<`, `>`, and `"` as entities.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Percent-encode everything outside the unreserved set and `/`.
pub fn escape_uri(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Decode `%XX` escapes. Malformed escapes are left as-is; `+` is not
/// treated as a space.
pub fn unescape_url(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut raw = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3).and_then(|h| {
                let hi = (h[0] as char).to_digit(16)?;
                let lo = (h[1] as char).to_digit(16)?;
                Some((hi * 16 + lo) as u8)
            });
            if let Some(b) = hex {
                raw.push(b);
                i += 3;
                continue;
            }
        }
        raw.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&raw).into_owned()
}

/// Backslash-escape shell metacharacters, the historical treatment of
/// `QUERY_STRING_UNESCAPED`.
pub fn escape_shell(s: &str) -> String {
    const SPECIALS: &[u8] = b"&;`'\"|*?~<>^()[]{}$\\\n";
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii() && SPECIALS.contains(&(ch as u8)) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
