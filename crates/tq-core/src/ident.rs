//! # Direct-Hit Identifiers
//!
//! Recognizes the two query shapes that bypass search: event ids (32 hex
//! characters, optionally in dashed UUID form) and project-qualified short
//! ids such as `BACKEND-1A3`.

use regex::Regex;
use std::sync::OnceLock;

/// Short id suffix alphabet (Crockford base32: no I, L, O, U).
const BASE32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

fn short_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:issue+:)?(.*?)(?:[\s_-])([A-Za-z0-9]+)$").expect("short id pattern")
    })
}

/// Normalize an event id to 32 lowercase hex characters. Returns `None` for
/// anything that is not an event id.
pub fn normalize_event_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let compact: String = match raw.len() {
        32 => raw.to_string(),
        36 => {
            let dashes_ok = raw
                .char_indices()
                .all(|(i, c)| matches!(i, 8 | 13 | 18 | 23) == (c == '-'));
            if !dashes_ok {
                return None;
            }
            raw.chars().filter(|c| *c != '-').collect()
        }
        _ => return None,
    };
    compact
        .chars()
        .all(|c| c.is_ascii_hexdigit())
        .then(|| compact.to_ascii_lowercase())
}

pub fn base32_encode(mut number: u64) -> String {
    if number == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while number > 0 {
        out.push(BASE32_ALPHABET[(number % 32) as usize]);
        number /= 32;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

pub fn base32_decode(value: &str) -> Option<u64> {
    let mut number: u64 = 0;
    for c in value.chars() {
        let c = match c.to_ascii_uppercase() {
            'O' => '0',
            'I' | 'L' => '1',
            other => other,
        };
        let digit = BASE32_ALPHABET.iter().position(|b| *b as char == c)? as u64;
        number = number.checked_mul(32)?.checked_add(digit)?;
    }
    Some(number)
}

/// A parsed `SLUG-SUFFIX` short id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortId {
    /// Lowercased project slug.
    pub project_slug: String,
    pub short_id: u64,
}

impl ShortId {
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = short_id_re().captures(raw.trim())?;
        let slug = caps.get(1)?.as_str();
        if slug.is_empty() {
            return None;
        }
        let short_id = base32_decode(caps.get(2)?.as_str())?;
        Some(Self {
            project_slug: slug.to_lowercase(),
            short_id,
        })
    }

    pub fn format(project_slug: &str, short_id: u64) -> String {
        format!("{}-{}", project_slug.to_uppercase(), base32_encode(short_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_forms() {
        let id = "b1946ac92492d2347c6235b4d2611184";
        assert_eq!(normalize_event_id(id).as_deref(), Some(id));
        assert_eq!(
            normalize_event_id("B1946AC9-2492-D234-7C62-35B4D2611184").as_deref(),
            Some(id)
        );
        assert_eq!(normalize_event_id("b1946ac92492d2347c6235b4d261118"), None);
        assert_eq!(normalize_event_id("z1946ac92492d2347c6235b4d2611184"), None);
        assert_eq!(normalize_event_id("is:unresolved"), None);
    }

    #[test]
    fn test_base32() {
        assert_eq!(base32_encode(0), "0");
        assert_eq!(base32_encode(31), "Z");
        assert_eq!(base32_encode(32), "10");
        assert_eq!(base32_decode("10"), Some(32));
        assert_eq!(base32_decode("1o"), Some(32));
        assert_eq!(base32_decode("U"), None);
    }

    #[test]
    fn test_short_id_with_dashed_slug() {
        let parsed = ShortId::parse("my-backend-1A").unwrap();
        assert_eq!(parsed.project_slug, "my-backend");
        assert_eq!(parsed.short_id, 32 + 10);
        assert_eq!(ShortId::format("my-backend", 42), "MY-BACKEND-1A");
        assert_eq!(ShortId::parse("unresolved"), None);
    }
}
