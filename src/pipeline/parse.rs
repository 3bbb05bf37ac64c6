//! Reply parsing: raw model text → validated [`Transaction`] list.
//!
//! Models asked for bare JSON still sometimes wrap it in a ```` ```json ````
//! fence or prefix it with a byte-order mark. Those artefacts are stripped
//! first (string contents are never rewritten); everything after that is
//! strict:
//!
//! 1. de-fence and trim
//! 2. decode as JSON → [`ExtractionError::MalformedResponse`]
//! 3. require an array → [`ExtractionError::UnexpectedResponseShape`]
//! 4. validate every element against [`TRANSACTION_SCHEMA`] and deserialise
//!    it → [`ExtractionError::InvalidTransaction`] on the first bad element
//!
//! [`parse`] is pure and synchronous.

use crate::error::{snippet, ExtractionError};
use crate::output::Transaction;
use crate::schema::{json_kind, TRANSACTION_SCHEMA};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Outcome of parsing one reply. No partial success.
pub type ExtractionResult = Result<Vec<Transaction>, ExtractionError>;

/// A fence marker with an optional language tag (` ``` `, ` ```json `, …).
static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z0-9_+-]*").unwrap());

/// Characters `serde_json` rejects ahead of the first token.
const LEADING_INVISIBLE: [char; 3] = ['\u{FEFF}', '\u{200B}', '\u{2060}'];

/// Remove every fence marker anywhere in the text, then trim.
///
/// A leading BOM or zero-width prefix is dropped as well. Anything inside
/// the JSON, string values included, is left untouched.
pub fn defence(raw: &str) -> String {
    let s = RE_FENCE.replace_all(raw, "");
    s.trim()
        .trim_start_matches(LEADING_INVISIBLE)
        .trim()
        .to_string()
}

/// Parse a raw reply into transactions, in reply order.
pub fn parse(raw: &str) -> ExtractionResult {
    let cleaned = defence(raw);

    let value: Value =
        serde_json::from_str(&cleaned).map_err(|e| ExtractionError::MalformedResponse {
            raw: snippet(raw),
            reason: e.to_string(),
        })?;

    let Value::Array(elements) = value else {
        return Err(ExtractionError::UnexpectedResponseShape {
            found: json_kind(&value).to_string(),
            raw: snippet(raw),
        });
    };

    let transactions = elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            TRANSACTION_SCHEMA
                .check_element(&element)
                .map_err(|reason| ExtractionError::InvalidTransaction { index, reason })?;
            serde_json::from_value::<Transaction>(element).map_err(|e| {
                ExtractionError::InvalidTransaction {
                    index,
                    reason: e.to_string(),
                }
            })
        })
        .collect::<ExtractionResult>()?;

    debug!("Parsed {} transaction(s)", transactions.len());
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn tx(date: &str, description: &str, amount: f64, category: &str, notes: &str) -> Transaction {
        Transaction {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            description: description.into(),
            amount,
            category: category.into(),
            notes: notes.into(),
        }
    }

    // ── De-fencing ───────────────────────────────────────────────────────

    #[test]
    fn test_defence_strips_json_fence() {
        assert_eq!(defence("```json\n[]\n```"), "[]");
    }

    #[test]
    fn test_defence_strips_bare_fence_and_bom() {
        assert_eq!(defence("\u{FEFF}```\n[1]\n```  "), "[1]");
    }

    #[test]
    fn test_defence_keeps_joiners_inside_strings() {
        let raw = "\u{FEFF}```json\n[\"Caf\u{200C}e\", \"\u{1F468}\u{200D}\u{1F469}\"]\n```";
        assert_eq!(
            defence(raw),
            "[\"Caf\u{200C}e\", \"\u{1F468}\u{200D}\u{1F469}\"]"
        );
    }

    #[test]
    fn test_defence_leaves_plain_json() {
        assert_eq!(defence("  [{\"a\":1}]\n"), "[{\"a\":1}]");
    }

    // ── Happy path ───────────────────────────────────────────────────────

    #[test]
    fn test_fenced_single_transaction() {
        let raw = "```json\n[{\"date\":\"2024-01-05\",\"description\":\"Coffee\",\"amount\":-3.5,\"category\":\"Dining\",\"notes\":\"\"}]\n```";
        let parsed = parse(raw).unwrap();
        assert_eq!(parsed, vec![tx("2024-01-05", "Coffee", -3.5, "Dining", "")]);
    }

    #[test]
    fn test_order_is_reply_order() {
        let raw = r#"[
            {"date":"2024-02-01","description":"Salary","amount":2500,"category":"Salary"},
            {"date":"2024-01-31","description":"Rent","amount":-900.0,"category":"Bills","notes":"Jan"}
        ]"#;
        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].description, "Salary");
        assert_eq!(parsed[0].amount, 2500.0);
        assert_eq!(parsed[1].notes, "Jan");
    }

    #[test]
    fn test_empty_array_is_ok() {
        assert!(parse("[]").unwrap().is_empty());
    }

    #[test]
    fn test_notes_absent_or_null_become_empty() {
        let raw = r#"[
            {"date":"2024-03-01","description":"A","amount":1,"category":"Other"},
            {"date":"2024-03-02","description":"B","amount":2,"category":"Other","notes":null}
        ]"#;
        let parsed = parse(raw).unwrap();
        assert_eq!(parsed[0].notes, "");
        assert_eq!(parsed[1].notes, "");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let raw = r#"[{"date":"2024-03-01","description":"A","amount":1,"category":"Other","balance":42.0}]"#;
        assert_eq!(parse(raw).unwrap().len(), 1);
    }

    #[test]
    fn test_round_trip_and_idempotence() {
        let list = vec![
            tx("2024-01-05", "Coffee", -3.5, "Dining", ""),
            tx("2024-01-06", "Refund", 12.25, "Shopping", "partial"),
        ];
        let raw = serde_json::to_string(&list).unwrap();
        let first = parse(&raw).unwrap();
        assert_eq!(first, list);
        assert_eq!(parse(&raw).unwrap(), first);
    }

    #[test]
    fn test_round_trip_keeps_zero_width_joiners() {
        let list = vec![tx(
            "2024-03-02",
            "Caf\u{200C}e Tehran",
            -12.0,
            "Dining",
            "\u{1F468}\u{200D}\u{1F469}",
        )];
        let raw = format!("```json\n{}\n```", serde_json::to_string(&list).unwrap());
        assert_eq!(parse(&raw).unwrap(), list);
    }

    // ── Failures ─────────────────────────────────────────────────────────

    #[test]
    fn test_not_json_is_malformed() {
        let err = parse("not json at all").unwrap_err();
        match err {
            ExtractionError::MalformedResponse { raw, .. } => assert_eq!(raw, "not json at all"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_object_is_unexpected_shape() {
        let err = parse(r#"{"not":"an array"}"#).unwrap_err();
        match err {
            ExtractionError::UnexpectedResponseShape { found, .. } => assert_eq!(found, "object"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_field_names_index() {
        let raw = r#"[
            {"date":"2024-03-01","description":"A","amount":1,"category":"Other"},
            {"date":"2024-03-02","description":"B","category":"Other"}
        ]"#;
        match parse(raw).unwrap_err() {
            ExtractionError::InvalidTransaction { index, reason } => {
                assert_eq!(index, 1);
                assert!(reason.contains("amount"), "got: {reason}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_amount_as_string_is_invalid() {
        let raw = r#"[{"date":"2024-03-01","description":"A","amount":"-4.20","category":"Other"}]"#;
        assert!(matches!(
            parse(raw),
            Err(ExtractionError::InvalidTransaction { index: 0, .. })
        ));
    }

    #[test]
    fn test_bad_date_is_invalid() {
        for date in ["05/01/2024", "2024-1-5", "+2024-01-05"] {
            let raw = format!(
                r#"[{{"date":"{date}","description":"A","amount":1,"category":"Other"}}]"#
            );
            assert!(
                matches!(parse(&raw), Err(ExtractionError::InvalidTransaction { index: 0, .. })),
                "{date} should be rejected"
            );
        }
    }

    #[test]
    fn test_non_object_element_is_invalid() {
        assert!(matches!(
            parse("[1, 2]"),
            Err(ExtractionError::InvalidTransaction { index: 0, .. })
        ));
    }

    #[test]
    fn test_long_raw_is_truncated_in_error() {
        let raw = format!("oops {}", "x".repeat(1000));
        match parse(&raw).unwrap_err() {
            ExtractionError::MalformedResponse { raw, .. } => assert!(raw.chars().count() <= 201),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
