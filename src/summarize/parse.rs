//! Lenient parsing of model output.
//!
//! Models wrap JSON in code fences, add prose around it, leave trailing commas, put raw
//! newlines or stray quotes inside strings, or get cut off mid-array. Repairs are tried in
//! order of invasiveness; the first candidate that parses wins.

use crate::dedup::url_key;
use crate::error::ProviderError;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One entry of the model's answer, before the quality gate.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawSummary {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub is_technical: Option<bool>,
    #[serde(default)]
    pub title_ko: Option<String>,
    #[serde(default)]
    pub summary_ko: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Value,
}

pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.find("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

/// Byte index of the bracket closing the one at `start`, skipping string contents.
fn find_matching(text: &str, start: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut in_string = false;
    let mut escape = false;
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        match b {
            b'\\' => escape = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth += 1,
            _ if b == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Cut prose around the outermost array (or object, if there is no array).
pub fn extract_json_payload(text: &str) -> &str {
    let text = text.trim();
    let array_at = text.find('[');
    let object_at = text.find('{');
    let (start, open, close) = match (array_at, object_at) {
        (Some(a), Some(o)) if o < a => (o, b'{', b'}'),
        (Some(a), _) => (a, b'[', b']'),
        (None, Some(o)) => (o, b'{', b'}'),
        (None, None) => return text,
    };
    match find_matching(text, start, open, close) {
        Some(end) => &text[start..=end],
        None => &text[start..],
    }
}

pub fn remove_trailing_commas(text: &str) -> String {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r",\s*([}\]])").unwrap());
    re.replace_all(text, "$1").into_owned()
}

/// Escape raw control characters inside strings, and quotes inside value strings that are
/// clearly not the closing quote (not followed by `,` `}` `]` or the end).
pub fn fix_json_strings(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut in_value = false;
    let mut escape = false;
    let mut last_sig: Option<char> = None;

    for (i, &c) in chars.iter().enumerate() {
        if escape {
            out.push(c);
            escape = false;
            continue;
        }
        if !in_string {
            if c == '"' {
                in_string = true;
                in_value = last_sig == Some(':');
            }
            if !c.is_whitespace() {
                last_sig = Some(c);
            }
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escape = true;
            }
            '"' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !in_value || matches!(next, None | Some(',') | Some('}') | Some(']')) {
                    out.push('"');
                    in_string = false;
                    in_value = false;
                    last_sig = Some('"');
                } else {
                    out.push_str("\\\"");
                }
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Close an unterminated string and any open brackets so truncated output may still parse.
pub fn close_unterminated(text: &str) -> String {
    let mut s = text.trim().to_string();
    if !s.starts_with('[') {
        s.insert(0, '[');
    }
    let mut in_string = false;
    let mut escape = false;
    let mut stack: Vec<char> = Vec::new();
    for c in s.chars() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' => escape = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' | '[' => stack.push(c),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    if in_string {
        s.push('"');
    }
    while let Some(open) = stack.pop() {
        s.push(if open == '{' { '}' } else { ']' });
    }
    s
}

/// Keep the array up to its last complete top-level object.
pub fn trim_to_last_complete_object(text: &str) -> Option<String> {
    let s = text.trim();
    let start = s.find('[')?;
    let mut in_string = false;
    let mut escape = false;
    let mut brackets = 0usize;
    let mut braces = 0usize;
    let mut last_end = None;
    for (i, c) in s.char_indices().skip_while(|(i, _)| *i < start) {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' => escape = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '[' => brackets += 1,
            ']' => brackets = brackets.saturating_sub(1),
            '{' => braces += 1,
            '}' => {
                braces = braces.saturating_sub(1);
                if braces == 0 && brackets >= 1 {
                    last_end = Some(i);
                }
            }
            _ => {}
        }
    }
    last_end.map(|end| format!("{}]", &s[start..=end]))
}

/// Best-effort parse into a JSON array. A lone object is wrapped.
pub fn parse_json_lenient(content: &str) -> Option<Vec<Value>> {
    let payload = extract_json_payload(strip_code_fences(content));

    let mut candidates: Vec<(&str, String)> = Vec::new();
    if payload.starts_with('{') && payload.ends_with('}') {
        candidates.push(("wrapped_object", format!("[{payload}]")));
    }
    candidates.push(("raw", payload.to_string()));
    let fixed = fix_json_strings(payload);
    candidates.push(("fixed_strings", fixed.clone()));

    let closed = remove_trailing_commas(&close_unterminated(&fixed));
    candidates.push(("closed", closed.clone()));
    // Trim before closing, so a half-written object can't survive as a synthetic one.
    if let Some(trimmed) = trim_to_last_complete_object(&fixed) {
        candidates.push(("trimmed", trimmed));
    }

    for (label, candidate) in candidates {
        match serde_json::from_str::<Value>(&remove_trailing_commas(&candidate)) {
            Ok(Value::Array(items)) => {
                if label != "raw" {
                    debug!(target: "summarize", repair = label, "parsed model output after repair");
                }
                return Some(items);
            }
            Ok(obj @ Value::Object(_)) => return Some(vec![obj]),
            Ok(_) => continue,
            Err(_) => continue,
        }
    }
    None
}

/// Parse a batch answer and align it with the batch urls.
///
/// Entries are matched by normalized url first; entries whose url is missing or unknown fill
/// the remaining slots in order. An entry for an already-filled url is ignored.
pub fn parse_batch_response(
    content: &str,
    urls: &[String],
) -> Result<Vec<Option<RawSummary>>, ProviderError> {
    let values = parse_json_lenient(content).ok_or_else(|| {
        let head: String = content.chars().take(200).collect();
        ProviderError::Malformed(format!("unparseable model output: {head}"))
    })?;

    let index: HashMap<String, usize> = urls
        .iter()
        .enumerate()
        .map(|(i, u)| (url_key(u), i))
        .collect();
    let mut slots: Vec<Option<RawSummary>> = vec![None; urls.len()];
    let mut unmatched: Vec<RawSummary> = Vec::new();

    for value in values {
        let Ok(raw) = serde_json::from_value::<RawSummary>(value) else {
            continue;
        };
        match raw.url.as_deref().map(url_key).and_then(|k| index.get(&k).copied()) {
            Some(i) if slots[i].is_none() => slots[i] = Some(raw),
            Some(_) => debug!(target: "summarize", "duplicate answer for one url ignored"),
            None => unmatched.push(raw),
        }
    }

    let free: Vec<usize> = (0..slots.len()).filter(|&i| slots[i].is_none()).collect();
    for (raw, i) in unmatched.into_iter().zip(free) {
        warn!(target: "summarize", returned = ?raw.url, expected = %urls[i], "url not matched, assigning by order");
        slots[i] = Some(raw);
    }
    Ok(slots)
}
