//! Opportunistic expense extraction from chat text.
//!
//! An ordered list of patterns is tried against the raw message; the first
//! one that yields a positive amount and a non-empty merchant wins. Runs
//! before (and independently of) any model call.

use anyhow::Result;
use regex::Regex;

/// An amount/merchant pair detected in free text
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedExpense {
    pub amount: f64,
    pub merchant: String,
}

/// Try each pattern in order against `text`.
///
/// Every pattern names its fields via `amount`/`merchant` capture groups,
/// so argument order is carried by the pattern itself regardless of which
/// side of the phrase the amount sits on.
pub fn extract_expense(text: &str) -> Result<Option<ExtractedExpense>> {
    // "spent $9 at Starbucks", "paid 20 for parking"
    let verb_first = Regex::new(concat!(
        r"(?i)(?:spent|paid|bought|cost|costs)\s+",
        r"\$?(?P<amount>[\d,]+(?:\.\d{1,2})?)\s+",
        r"(?:(?:at|on|for)\b\s*)?(?P<merchant>.+)"
    ))?;

    // "$15 at the gas station"
    let amount_first = Regex::new(concat!(
        r"(?i)\$(?P<amount>[\d,]+(?:\.\d{1,2})?)\s+",
        r"(?:at|on|for)\b\s+(?P<merchant>.+)"
    ))?;

    // "bought coffee for $5" -- merchant precedes the amount
    let merchant_first = Regex::new(concat!(
        r"(?i)(?:bought|got)\s+(?P<merchant>.+?)\s+",
        r"for\s+\$?(?P<amount>[\d,]+(?:\.\d{1,2})?)"
    ))?;

    // "at Blue Bottle yesterday" keeps only "Blue Bottle"
    let temporal = Regex::new(r"(?i)\b(?:today|yesterday|just now)\b")?;

    for pattern in [&verb_first, &amount_first, &merchant_first] {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };

        let amount: f64 = caps["amount"].replace(',', "").parse().unwrap_or(0.0);
        let merchant = clean_merchant(&caps["merchant"], &temporal);

        if amount > 0.0 && !merchant.is_empty() {
            return Ok(Some(ExtractedExpense { amount, merchant }));
        }
    }

    Ok(None)
}

/// Cut the phrase at the first temporal qualifier, then trim trailing
/// punctuation.
fn clean_merchant(raw: &str, temporal: &Regex) -> String {
    let mut merchant = raw.trim().to_string();

    if let Some(start) = temporal.find(&merchant).map(|m| m.start()) {
        merchant.truncate(start);
    }

    merchant
        .trim()
        .trim_end_matches(['.', ',', '!', '?'])
        .trim()
        .to_string()
}
