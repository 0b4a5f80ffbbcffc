//! Front-matter note format.
//!
//! ```text
//! ---
//! id: 3f2a...
//! title: Groceries
//! createdAt: 2024-05-01T10:00:00.000Z
//! updatedAt: 2024-05-01T10:05:00.000Z
//! ---
//!
//! body, verbatim
//! ```

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

const SENTINEL: &str = "---";

/// A note as stored in the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Result of parsing raw note text. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedNote {
    pub id: Option<String>,
    pub title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub body: String,
}

/// Current time at the precision the note format stores.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Header values are single-line.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Render a note with its front-matter header.
pub fn serialize_note(note: &Note) -> String {
    let stamp = |ts: &Option<DateTime<Utc>>| ts.as_ref().map(format_timestamp).unwrap_or_default();
    [
        SENTINEL.to_string(),
        format!("id: {}", single_line(&note.id)),
        format!("title: {}", single_line(&note.title)),
        format!("createdAt: {}", stamp(&note.created_at)),
        format!("updatedAt: {}", stamp(&note.updated_at)),
        SENTINEL.to_string(),
        String::new(),
        note.body.clone(),
    ]
    .join("\n")
}

/// Parse note text.
///
/// Text without an opening or closing sentinel is all body. Header keys
/// may come in any order; unknown keys are ignored. Header values are
/// trimmed. Exactly one blank line after the closing sentinel is dropped,
/// so the body comes back byte for byte.
pub fn parse_note(raw: &str) -> ParsedNote {
    let mut result = ParsedNote {
        body: raw.to_string(),
        ..ParsedNote::default()
    };

    if !raw.starts_with(SENTINEL) {
        return result;
    }
    let Some(offset) = raw[SENTINEL.len()..].find("\n---") else {
        return result;
    };
    let end = SENTINEL.len() + offset;
    let header = raw[SENTINEL.len()..end].trim();

    // Rest of the closing sentinel line, then one blank line.
    let mut rest = &raw[end + 4..];
    match rest.find('\n') {
        Some(i) if rest[..i].trim().is_empty() => rest = &rest[i + 1..],
        None if rest.trim().is_empty() => rest = "",
        _ => {}
    }
    let body = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);

    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "id" if !value.is_empty() => result.id = Some(value.to_string()),
            "title" => result.title = value.to_string(),
            "createdAt" => result.created_at = parse_timestamp(value),
            "updatedAt" => result.updated_at = parse_timestamp(value),
            _ => {}
        }
    }

    result.body = body.to_string();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn sample() -> Note {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Note {
            id: "abc123".to_string(),
            title: "Groceries".to_string(),
            body: "milk\neggs\n".to_string(),
            created_at: Some(ts),
            updated_at: Some(ts + chrono::Duration::minutes(5)),
        }
    }

    #[test]
    fn test_serialized_layout() {
        let text = serialize_note(&sample());
        assert_eq!(
            text,
            "---\nid: abc123\ntitle: Groceries\ncreatedAt: 2024-05-01T10:00:00.000Z\n\
             updatedAt: 2024-05-01T10:05:00.000Z\n---\n\nmilk\neggs\n"
        );
    }

    #[test]
    fn test_parse_serialized() {
        let note = sample();
        let parsed = parse_note(&serialize_note(&note));
        assert_eq!(parsed.id.as_deref(), Some("abc123"));
        assert_eq!(parsed.title, note.title);
        assert_eq!(parsed.body, note.body);
        assert_eq!(parsed.created_at, note.created_at);
        assert_eq!(parsed.updated_at, note.updated_at);
    }

    #[test]
    fn test_missing_opening_sentinel_is_all_body() {
        let raw = "just some text\n---\nmore";
        assert_eq!(
            parse_note(raw),
            ParsedNote {
                body: raw.to_string(),
                ..ParsedNote::default()
            }
        );
    }

    #[test]
    fn test_missing_closing_sentinel_is_all_body() {
        let raw = "---\nid: x\ntitle: never closed";
        let parsed = parse_note(raw);
        assert!(parsed.id.is_none());
        assert_eq!(parsed.body, raw);
    }

    #[test]
    fn test_header_order_and_unknown_keys() {
        let raw = "---\ntags: a,b\nupdatedAt: nonsense\ntitle:  Spaced  \nid: n1\n---\n\nhello";
        let parsed = parse_note(raw);
        assert_eq!(parsed.id.as_deref(), Some("n1"));
        assert_eq!(parsed.title, "Spaced");
        assert!(parsed.updated_at.is_none());
        assert_eq!(parsed.body, "hello");
    }

    #[test]
    fn test_body_leading_newlines_survive() {
        let mut note = sample();
        note.body = "\n\n  indented".to_string();
        assert_eq!(parse_note(&serialize_note(&note)).body, note.body);
    }

    #[test]
    fn test_multiline_title_is_flattened() {
        let mut note = sample();
        note.title = "two\nlines".to_string();
        let parsed = parse_note(&serialize_note(&note));
        assert_eq!(parsed.title, "two lines");
        assert_eq!(parsed.body, note.body);
    }

    #[test]
    fn test_empty_body_and_missing_timestamps() {
        let note = Note {
            id: "e".to_string(),
            title: String::new(),
            body: String::new(),
            created_at: None,
            updated_at: None,
        };
        let parsed = parse_note(&serialize_note(&note));
        assert_eq!(parsed.body, "");
        assert_eq!(parsed.title, "");
        assert!(parsed.created_at.is_none());
    }

    fn timestamp() -> impl Strategy<Value = Option<DateTime<Utc>>> {
        proptest::option::of(
            (0i64..4_102_444_800_000).prop_map(|ms| Utc.timestamp_millis_opt(ms).unwrap()),
        )
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            id in "[a-f0-9]{1,32}",
            title in "[A-Za-z0-9][A-Za-z0-9 ,.!?-]{0,40}[A-Za-z0-9]|",
            body in "(?s).{0,200}",
            created_at in timestamp(),
            updated_at in timestamp(),
        ) {
            let note = Note { id, title, body, created_at, updated_at };
            let parsed = parse_note(&serialize_note(&note));
            prop_assert_eq!(parsed.id.as_deref(), Some(note.id.as_str()));
            prop_assert_eq!(parsed.title, note.title);
            prop_assert_eq!(parsed.body, note.body);
            prop_assert_eq!(parsed.created_at, note.created_at);
            prop_assert_eq!(parsed.updated_at, note.updated_at);
        }
    }
}
