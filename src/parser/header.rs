//! Header handling: source-supplied header sets, subject decoding, dates.

use chrono::{DateTime, Local, TimeZone, Utc};
use tracing::debug;

/// Header fields as `(lowercase_name, value)` pairs, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    fields: Vec<(String, String)>,
}

impl HeaderSet {
    /// Build from already-split pairs. Names are lowercased.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                .collect(),
        }
    }

    /// Parse the header block at the start of a raw message.
    ///
    /// Stops at the first blank line. Continuation lines (leading space or
    /// tab) are joined to the previous field. Header bytes that are not
    /// UTF-8 are read as Windows-1252.
    pub fn from_raw(bytes: &[u8]) -> Self {
        let text = decode_header_bytes(header_block(bytes));
        let mut fields: Vec<(String, String)> = Vec::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some(last) = fields.last_mut() {
                    last.1.push(' ');
                    last.1.push_str(line.trim());
                }
            } else if let Some(colon) = line.find(':') {
                let name = line[..colon].trim().to_ascii_lowercase();
                let value = line[colon + 1..].trim().to_string();
                fields.push((name, value));
            }
        }

        Self { fields }
    }

    /// First value for a header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The bytes up to and including the first empty line.
fn header_block(bytes: &[u8]) -> &[u8] {
    bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .into_iter()
        .chain(bytes.windows(4).position(|w| w == b"\r\n\r\n"))
        .min()
        .map_or(bytes, |end| &bytes[..end + 2])
}

/// Decode raw header bytes: UTF-8, else Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Resolve RFC 2047 encoded-words in a raw `Subject:` value.
///
/// Example: `"=?UTF-8?Q?Caf=C3=A9?="` → `"Café"`. Text that is not encoded
/// passes through unchanged.
pub fn decode_subject(raw: &str) -> String {
    use mail_parser::MessageParser;

    // Wrap the value in a minimal message so mail-parser decodes it for us.
    let wrapped = format!("Subject: {}\r\n\r\n", raw.trim());
    MessageParser::default()
        .parse(wrapped.as_bytes())
        .and_then(|m| m.subject().map(str::to_string))
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Parse an email date string.
///
/// Tries RFC 2822, then RFC 3339, then mail-parser's lenient parser.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(dt) = mail_parser::DateTime::parse_rfc822(trimmed).filter(|d| d.is_valid()) {
        if let Some(parsed) = Utc.timestamp_opt(dt.to_timestamp(), 0).single() {
            return Some(parsed);
        }
    }

    debug!(date = trimmed, "Could not parse date");
    None
}

/// Parse a date header and express it in the local timezone.
pub fn parse_local_date(date_str: &str) -> Option<DateTime<Local>> {
    parse_date(date_str).map(|dt| dt.with_timezone(&Local))
}
