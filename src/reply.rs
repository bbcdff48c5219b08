//! Tolerant parsing of extraction-service replies.
//!
//! The service returns free-form text that usually, but not reliably,
//! contains a JSON array of event objects. It may be wrapped in markdown
//! fences, preceded by commentary, or be a single bare object. Anything
//! that cannot be coaxed into zero-or-more event-shaped objects is an
//! empty result, never an error; the chunk simply stays eligible for
//! retry.

use serde_json::Value;

use crate::models::{Event, Sensitivity};

/// Extract candidate events from a free-form reply. Returns an empty list
/// on any parse failure.
pub fn parse_events(reply: &str) -> Vec<Event> {
    let values = parse_value_list(reply);
    values.into_iter().filter_map(event_from_value).collect()
}

/// Locate and parse the first well-formed JSON object span in the text.
/// Used by the classifier, whose rubric asks for a single object.
pub fn parse_object(reply: &str) -> Option<Value> {
    if let Some(span) = balanced_span(reply, '{', '}') {
        if let Ok(obj @ Value::Object(_)) = serde_json::from_str::<Value>(span) {
            return Some(obj);
        }
    }
    let stripped = reply.replace("```json", "").replace("```", "");
    match serde_json::from_str::<Value>(stripped.trim()) {
        Ok(obj @ Value::Object(_)) => Some(obj),
        _ => None,
    }
}

/// Locate and parse the first well-formed JSON array (or single object)
/// span in the text.
fn parse_value_list(reply: &str) -> Vec<Value> {
    if let Some(span) = balanced_span(reply, '[', ']') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(span) {
            return items;
        }
    }
    if let Some(span) = balanced_span(reply, '{', '}') {
        if let Ok(obj @ Value::Object(_)) = serde_json::from_str::<Value>(span) {
            return vec![obj];
        }
    }
    // Last resort: strip markdown fences and try the whole thing.
    let stripped = reply
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string();
    match serde_json::from_str::<Value>(&stripped) {
        Ok(Value::Array(items)) => items,
        Ok(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    }
}

/// First balanced `open`..`close` span, respecting JSON string literals.
fn balanced_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        let pos = start + i;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..pos + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Convert one JSON object into an [`Event`], tolerating missing fields.
/// Objects without a usable summary are dropped. The date is passed
/// through as-is here; normalization against the bucket happens in the
/// worker, which knows the bucket id.
fn event_from_value(value: Value) -> Option<Event> {
    let obj = value.as_object()?;

    let summary = match obj.get("summary") {
        Some(Value::String(s)) => s.trim().to_string(),
        // Some engines emit the summary as a list of fragments.
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    };
    if summary.is_empty() {
        return None;
    }

    let date = obj
        .get("date")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    let evidence = obj
        .get("evidence")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let sensitivity = match obj.get("sensitivity").and_then(|v| v.as_str()) {
        Some("Sensitive") => Sensitivity::Sensitive,
        // Anything else (missing, "Public", garbage) is treated as
        // Public; the audit path only needs explicit Sensitive tags.
        _ => Sensitivity::Public,
    };

    let tags = obj
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|t| t.as_str())
                .map(|t| t.to_string())
                .collect()
        })
        .unwrap_or_default();

    Some(Event {
        date,
        summary,
        evidence,
        sensitivity,
        tags,
        rank: None,
    })
}

/// Normalize a candidate date to `YYYY-MM-DD`.
///
/// - `YYYY-MM-DD` is accepted as-is (when it is a real calendar date);
/// - `M/D/YYYY` is repaired;
/// - anything else falls back to the first day of the chunk's own bucket
///   (`YYYY-MM` → `YYYY-MM-01`, `YYYY` → `YYYY-01-01`);
/// - `None` if no date can be established at all.
pub fn normalize_date(raw: &str, bucket: &str) -> Option<String> {
    if let Some(date) = parse_iso(raw) {
        return Some(date);
    }
    if let Some(date) = parse_slash(raw) {
        return Some(date);
    }
    bucket_default_date(bucket)
}

fn parse_iso(raw: &str) -> Option<String> {
    let raw = raw.trim();
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_slash(raw: &str) -> Option<String> {
    let raw = raw.trim();
    chrono::NaiveDate::parse_from_str(raw, "%m/%d/%Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// First day of a bucket: `"2020-01"` → `2020-01-01`, `"2016"` →
/// `2016-01-01`. Range and sentinel buckets have no default date.
pub fn bucket_default_date(bucket: &str) -> Option<String> {
    let mut parts = bucket.split('-');
    let year = parts.next()?;
    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match parts.next() {
        None => Some(format!("{}-01-01", year)),
        Some(month) if month.len() == 2 && month.chars().all(|c| c.is_ascii_digit()) => {
            Some(format!("{}-{}-01", year, month))
        }
        // "2008-2018" style range bucket: no single default day.
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_array() {
        let reply = r#"[{"date": "2020-01-05", "summary": "Fixed bug", "sensitivity": "Public"}]"#;
        let events = parse_events(reply);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "Fixed bug");
    }

    #[test]
    fn parses_array_inside_commentary_and_fences() {
        let reply = "Sure! Here are the events:\n```json\n[{\"date\": \"2020-01-05\", \"summary\": \"One\"}, {\"date\": \"2020-01-06\", \"summary\": \"Two\"}]\n```\nLet me know if you need more.";
        let events = parse_events(reply);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn parses_single_object() {
        let reply = r#"{"date": "2020-01-05", "summary": "Solo event"}"#;
        let events = parse_events(reply);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn bracket_inside_string_does_not_break_span() {
        let reply = r#"[{"summary": "Used array[0] syntax", "date": "2020-01-05"}]"#;
        let events = parse_events(reply);
        assert_eq!(events.len(), 1);
        assert!(events[0].summary.contains("array[0]"));
    }

    #[test]
    fn garbage_is_empty_not_error() {
        assert!(parse_events("I could not find any events, sorry.").is_empty());
        assert!(parse_events("").is_empty());
        assert!(parse_events("[unclosed").is_empty());
    }

    #[test]
    fn summary_fragments_are_joined() {
        let reply = r#"[{"date": "2020-01-05", "summary": ["Fixed", "retry logic"]}]"#;
        let events = parse_events(reply);
        assert_eq!(events[0].summary, "Fixed retry logic");
    }

    #[test]
    fn object_without_summary_is_dropped() {
        let reply = r#"[{"date": "2020-01-05"}, {"date": "2020-01-06", "summary": "kept"}]"#;
        let events = parse_events(reply);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "kept");
    }

    #[test]
    fn iso_date_accepted_as_is() {
        assert_eq!(
            normalize_date("2020-03-01", "2020-03"),
            Some("2020-03-01".to_string())
        );
    }

    #[test]
    fn slash_date_repaired() {
        assert_eq!(
            normalize_date("3/7/2020", "2020-03"),
            Some("2020-03-07".to_string())
        );
    }

    #[test]
    fn unparseable_date_falls_back_to_bucket() {
        assert_eq!(
            normalize_date("sometime in spring", "2020-03"),
            Some("2020-03-01".to_string())
        );
        assert_eq!(
            normalize_date("", "2016"),
            Some("2016-01-01".to_string())
        );
    }

    #[test]
    fn no_date_at_all_is_none() {
        assert_eq!(normalize_date("no idea", "Unknown"), None);
        assert_eq!(normalize_date("", "2008-2018"), None);
    }

    #[test]
    fn invalid_calendar_date_falls_back() {
        assert_eq!(
            normalize_date("2020-13-45", "2020-05"),
            Some("2020-05-01".to_string())
        );
    }
}
