//! Instruction prompt for bank-statement transaction extraction.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constant here is
//! used only when no override is provided. The output contract itself lives in
//! [`crate::schema`] and is sent alongside the prompt, so the rules below only
//! restate it for models without a structured-output mode.

use crate::schema::TransactionSchema;

/// Default extraction instructions, sent before the page images.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are an expert financial assistant specialized in extracting transaction data from bank statements.
Your task is to analyze the provided image(s) of a bank statement and extract ALL transactional entries.

IMPORTANT INSTRUCTIONS:
1.  Identify every individual transaction (both debits and credits).
2.  Ignore all non-transactional information, such as page headers, footers, bank logos, promotional text, summary tables, and opening/closing balances.
3.  For each transaction, extract the details according to the provided JSON schema.
4.  Date format MUST be YYYY-MM-DD.
5.  Amount MUST be a negative number for withdrawals/expenses/debits and a positive number for deposits/credits/income.
6.  Auto-assign a relevant category. Examples: "Groceries", "Dining", "Transportation", "Salary", "Bills", "Shopping", "Entertainment". If unsure, use "Other".
7.  Return the data as a single, valid JSON array of objects.
8.  Do NOT include any explanations, introductory text, or markdown formatting (like ```json) around the JSON output. Your entire response must be only the JSON array."#;

/// Instructions plus the schema as text, for providers that cannot take a
/// response schema out of band.
pub fn with_inline_schema(instructions: &str, schema: &TransactionSchema) -> String {
    format!(
        "{instructions}\n\nJSON schema of the expected output:\n{}",
        schema.json_schema()
    )
}
