use std::{fmt::Debug, sync::LazyLock};

use regex::bytes::Regex;

#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Charset {
    Utf8,
    Ascii,
    Latin1,
    Windows1252,
    Utf16Le,
    Utf16Be,
}

impl Debug for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Charset {
    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "utf-8",
            Charset::Ascii => "us-ascii",
            Charset::Latin1 => "iso-8859-1",
            Charset::Windows1252 => "windows-1252",
            Charset::Utf16Le => "utf-16le",
            Charset::Utf16Be => "utf-16be",
        }
    }

    /// Look up a charset by one of its common labels. Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches(['"', '\'']).to_ascii_lowercase();
        let charset = match label.as_str() {
            "utf-8" | "utf8" | "unicode-1-1-utf-8" => Charset::Utf8,
            "us-ascii" | "ascii" | "ansi_x3.4-1968" => Charset::Ascii,
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "latin-1" | "l1" => {
                Charset::Latin1
            }
            "windows-1252" | "cp1252" | "x-cp1252" => Charset::Windows1252,
            // without a BOM, little endian is by far the most common
            "utf-16" | "utf-16le" | "utf16le" => Charset::Utf16Le,
            "utf-16be" | "utf16be" => Charset::Utf16Be,
            _ => return None,
        };
        Some(charset)
    }

    /// Strict decoding. `None` when the bytes are not valid in this charset.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Charset::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            Charset::Ascii => bytes
                .is_ascii()
                .then(|| String::from_utf8_lossy(bytes).into_owned()),
            Charset::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            Charset::Windows1252 => Some(bytes.iter().map(|&b| windows_1252_char(b)).collect()),
            Charset::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            Charset::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
        }
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes.chunks_exact(2).map(|pair| to_unit([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

/// Total over all bytes: the five holes in the 0x80..0x9f block map to C1 controls.
fn windows_1252_char(b: u8) -> char {
    const HIGH: [char; 32] = [
        '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}',
        '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
        '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}',
        '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
        '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}',
        '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
        '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
        '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
    ];
    match b {
        0x80..=0x9f => HIGH[(b - 0x80) as usize],
        _ => b as char,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetSource {
    ByteOrderMark,
    Declared,
    Sniffed,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Decoded {
    pub text: String,
    pub charset: Charset,
    pub source: CharsetSource,
    /// Invalid sequences were replaced with U+FFFD.
    pub lossy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload is not valid in any candidate charset (tried {tried:?})")]
pub struct DecodeError {
    pub tried: Vec<Charset>,
}

fn byte_order_mark(bytes: &[u8]) -> Option<(Charset, usize)> {
    match bytes {
        [0xef, 0xbb, 0xbf, ..] => Some((Charset::Utf8, 3)),
        [0xff, 0xfe, ..] => Some((Charset::Utf16Le, 2)),
        [0xfe, 0xff, ..] => Some((Charset::Utf16Be, 2)),
        _ => None,
    }
}

/// Find a charset declared inside the document itself, `<meta charset>` or an XML declaration.
pub fn sniff_charset(bytes: &[u8]) -> Option<&str> {
    static REGEX_META: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_.:-]+)"#).unwrap()
    });
    static REGEX_XML: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)^\s*<\?xml[^>]*?encoding\s*=\s*["']([a-z0-9_.:-]+)["']"#).unwrap()
    });

    // declarations have to appear early in the document
    let head = &bytes[..bytes.len().min(2048)];
    REGEX_XML
        .captures(head)
        .or_else(|| REGEX_META.captures(head))
        .and_then(|captures| captures.get(1))
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
}

/// Decode a payload trying, in order: byte order mark, the declared charset, a charset
/// sniffed from the document, UTF-8, and finally windows-1252.
///
/// windows-1252 accepts every byte, so only payloads containing NUL bytes outside a
/// UTF-16 encoding fail; those are binary rather than text.
pub fn decode(bytes: &[u8], declared: Option<&str>) -> Result<Decoded, DecodeError> {
    let mut tried = Vec::new();

    if let Some((charset, bom_len)) = byte_order_mark(bytes) {
        tried.push(charset);
        if let Some(text) = charset.decode(&bytes[bom_len..]) {
            return Ok(Decoded {
                text,
                charset,
                source: CharsetSource::ByteOrderMark,
                lossy: false,
            });
        }
    }

    let candidates = [
        (declared, CharsetSource::Declared),
        (sniff_charset(bytes), CharsetSource::Sniffed),
        (Some("utf-8"), CharsetSource::Fallback),
    ];
    let binary = memchr::memchr(0, bytes).is_some();
    for (label, source) in candidates {
        let Some(label) = label else {
            continue;
        };
        let Some(charset) = Charset::from_label(label) else {
            tracing::debug!(message = "ignoring unknown charset label", label, ?source);
            continue;
        };
        if tried.contains(&charset) {
            continue;
        }
        tried.push(charset);

        if let Some(text) = charset.decode(bytes) {
            return Ok(Decoded {
                text,
                charset,
                source,
                lossy: false,
            });
        }
    }

    if binary {
        return Err(DecodeError { tried });
    }
    // stray high bytes in an undeclared page are almost always Latin-1 or windows-1252
    let text: String = bytes.iter().map(|&b| windows_1252_char(b)).collect();
    Ok(Decoded {
        text,
        charset: Charset::Windows1252,
        source: CharsetSource::Fallback,
        lossy: false,
    })
}

/// Like [`decode`], but ends the chain with lossy UTF-8 instead of failing.
pub fn decode_lossy(bytes: &[u8], declared: Option<&str>) -> Decoded {
    decode(bytes, declared).unwrap_or_else(|e| {
        tracing::debug!(message = "falling back to lossy UTF-8", tried = ?e.tried);
        Decoded {
            text: String::from_utf8_lossy(bytes).into_owned(),
            charset: Charset::Utf8,
            source: CharsetSource::Fallback,
            lossy: true,
        }
    })
}
