//! Output types: transactions and per-cycle statistics.

use chrono::NaiveDate;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// One extracted statement line.
///
/// `amount` follows the debit/credit sign convention the model is instructed
/// to use: negative for withdrawals and expenses, positive for deposits and
/// income. The convention is not re-checked here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Calendar date, serialised as `YYYY-MM-DD`.
    #[serde(deserialize_with = "strict_iso_date")]
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    pub category: String,
    /// Free-form notes; empty when the model supplied none.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub notes: String,
}

impl Transaction {
    /// `true` for money leaving the account.
    pub fn is_debit(&self) -> bool {
        self.amount < 0.0
    }
}

/// Exactly `YYYY-MM-DD`: no sign, no unpadded fields, no time part.
fn strict_iso_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let shape_ok = s.len() == 10
        && s.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shape_ok {
        return Err(D::Error::custom(format!("date `{s}` is not YYYY-MM-DD")));
    }
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| D::Error::custom(format!("date `{s}` is not YYYY-MM-DD: {e}")))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Result of one successful extraction cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Transactions in the order the model returned them.
    pub transactions: Vec<Transaction>,
    pub stats: ExtractionStats,
}

/// Counters and timings for one extraction cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Number of uploaded files.
    pub files: usize,
    /// Number of image payloads sent to the model.
    pub payloads: usize,
    /// Total size of the base64 image data sent, in bytes.
    pub payload_bytes: usize,
    /// Input tokens reported by the service (0 when not reported).
    pub input_tokens: u64,
    /// Output tokens reported by the service (0 when not reported).
    pub output_tokens: u64,
    pub normalize_duration_ms: u64,
    pub inference_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl ExtractionOutput {
    /// Sum of all amounts (credits minus debits).
    pub fn net_amount(&self) -> f64 {
        self.transactions.iter().map(|t| t.amount).sum()
    }
}

/// What a selection normalizes to, without calling the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub files: Vec<FileSummary>,
    /// One entry per payload, in request order.
    pub payloads: Vec<PayloadSummary>,
    pub total_encoded_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub name: String,
    pub media_type: String,
    pub payloads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSummary {
    pub mime_type: String,
    pub encoded_bytes: usize,
}
