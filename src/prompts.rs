//! Prompts sent to the vision model.
//!
//! Callers can override the default via
//! [`crate::config::SplitConfig::extraction_prompt`]; the override must still
//! ask for the same two-key JSON object, since the parser in
//! [`crate::pipeline::extract`] only accepts that shape.

/// Default prompt for reading identifying fields off one invoice page.
pub const EXTRACTION_PROMPT: &str = r##"Extract data from this Logistics/Warehouse Invoice page.
I need the main Invoice/Packing List Number and the exact Company Name mentioned in the 'SHIP TO' section.

Rules:
- Copy the invoice number exactly as printed, without labels such as "Invoice No." or "#".
- Copy the company name exactly as printed in the SHIP TO block, without the address.
- If the page is a continuation, attachment or annex without its own invoice number, use null.
- If a field is not visible on this page, use null. Never guess.

Response format MUST be strictly JSON: {"invoiceNo": "ID_OR_NULL", "shipTo": "COMPANY_NAME_OR_NULL"}"##;

/// Placeholder literals a model may echo back instead of a real `null`.
pub const PLACEHOLDER_VALUES: &[&str] = &[
    "null",
    "none",
    "n/a",
    "na",
    "unknown",
    "id_or_null",
    "company_name_or_null",
];
