use fnv::FnvHasher;
use std::hash::Hasher;

/// Longest escaped line kept in a notice. Three of these plus the header stay
/// under the chat backend's 4096-character message limit.
pub const MAX_LINE_CHARS: usize = 1000;
const TRUNCATION_MARK: char = '…';

/// 64-bit FNV-1a over the raw line bytes.
pub fn fingerprint(line: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(line);
    hasher.finish()
}

/// Splits fetched log output into lines, dropping the line terminator and a
/// trailing carriage return. A trailing newline does not produce an empty
/// final line.
pub fn split_lines(raw: &[u8]) -> Vec<&[u8]> {
    if raw.is_empty() {
        return Vec::new();
    }
    let body = raw.strip_suffix(b"\n").unwrap_or(raw);
    body.split(|byte| *byte == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

fn is_stripped_control(ch: char) -> bool {
    matches!(ch, '\u{00}'..='\u{08}' | '\u{0B}'..='\u{0C}' | '\u{0E}'..='\u{1F}')
}

fn entity(ch: char) -> Option<&'static str> {
    match ch {
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '&' => Some("&amp;"),
        _ => None,
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match entity(ch) {
            Some(escaped) => out.push_str(escaped),
            None => out.push(ch),
        }
    }
    out
}

/// Makes a raw log line safe to embed in a markup notice. The escaped result
/// is cut at `MAX_LINE_CHARS` between characters, never inside an entity, and
/// marked with a trailing ellipsis.
pub fn sanitize_line(raw: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(raw);
    let mut out = String::new();
    let mut width = 0;
    for ch in decoded.chars().filter(|ch| !is_stripped_control(*ch)) {
        let escaped = entity(ch);
        let step = escaped.map_or(1, str::len);
        if width + step > MAX_LINE_CHARS {
            out.push(TRUNCATION_MARK);
            break;
        }
        match escaped {
            Some(escaped) => out.push_str(escaped),
            None => out.push(ch),
        }
        width += step;
    }
    out
}
