//! One-shot expense categorization against the fixed category set.
//!
//! Failures never escape: an off-list reply or a dead model call degrades
//! to `Other` with a lowered confidence, and the outcome records which.

use tally_core::Category;

use crate::llm::{ChatMessage, CompletionRequest, ModelClient};

pub const CONFIDENCE_MATCHED: f64 = 0.95;
pub const CONFIDENCE_OFF_LIST: f64 = 0.5;
pub const CONFIDENCE_CALL_FAILED: f64 = 0.3;

const MAX_TOKENS: u32 = 10;
const TEMPERATURE: f32 = 0.1;

/// How a category was arrived at
#[derive(Debug, Clone, PartialEq)]
pub enum CategorySource {
    /// The model answered with a recognized category name
    Model,
    /// The model answered, but outside the fixed set
    OffList { raw: String },
    /// The call itself failed
    CallFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryOutcome {
    pub category: Category,
    pub confidence: f64,
    pub source: CategorySource,
}

impl CategoryOutcome {
    pub fn is_degraded(&self) -> bool {
        !matches!(self.source, CategorySource::Model)
    }
}

/// Ask the model to place one expense into the fixed category set
pub async fn categorize(
    model: &dyn ModelClient,
    merchant: &str,
    amount: f64,
    notes: Option<&str>,
) -> CategoryOutcome {
    let req = CompletionRequest {
        messages: vec![ChatMessage::user(classification_prompt(
            merchant, amount, notes,
        ))],
        max_tokens: MAX_TOKENS,
        temperature: TEMPERATURE,
    };

    match model.complete(req).await {
        Ok(reply) => {
            let raw = reply.text();
            match Category::parse(&raw) {
                Some(category) => CategoryOutcome {
                    category,
                    confidence: CONFIDENCE_MATCHED,
                    source: CategorySource::Model,
                },
                None => {
                    tracing::warn!(reply = %raw, "categorizer reply outside the fixed set");
                    CategoryOutcome {
                        category: Category::Other,
                        confidence: CONFIDENCE_OFF_LIST,
                        source: CategorySource::OffList { raw },
                    }
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "categorization call failed");
            CategoryOutcome {
                category: Category::Other,
                confidence: CONFIDENCE_CALL_FAILED,
                source: CategorySource::CallFailed {
                    reason: err.to_string(),
                },
            }
        }
    }
}

fn classification_prompt(merchant: &str, amount: f64, notes: Option<&str>) -> String {
    let names = Category::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let mut prompt = format!(
        "Categorize this expense into exactly one of: {names}.\n\n\
         Merchant: {merchant}\n\
         Amount: ${amount:.2}\n"
    );
    if let Some(notes) = notes {
        prompt.push_str(&format!("Notes: {notes}\n"));
    }
    prompt.push_str("\nRespond with only the category name.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::StubModel;

    #[tokio::test]
    async fn test_recognized_reply_is_high_confidence() {
        let model = StubModel::texts(&["Food"]);
        let outcome = categorize(&model, "Starbucks", 9.0, None).await;
        assert_eq!(outcome.category, Category::Food);
        assert_eq!(outcome.confidence, CONFIDENCE_MATCHED);
        assert!(!outcome.is_degraded());
    }

    #[tokio::test]
    async fn test_reply_with_whitespace_still_matches() {
        let model = StubModel::texts(&["  Transport\n"]);
        let outcome = categorize(&model, "Shell", 40.0, None).await;
        assert_eq!(outcome.category, Category::Transport);
        assert_eq!(outcome.source, CategorySource::Model);
    }

    #[tokio::test]
    async fn test_off_list_reply_degrades_to_other() {
        let model = StubModel::texts(&["Groceries"]);
        let outcome = categorize(&model, "Safeway", 60.0, None).await;
        assert_eq!(outcome.category, Category::Other);
        assert_eq!(outcome.confidence, CONFIDENCE_OFF_LIST);
        assert_eq!(
            outcome.source,
            CategorySource::OffList {
                raw: "Groceries".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_call_failure_degrades_to_other() {
        let model = StubModel::failing();
        let outcome = categorize(&model, "Safeway", 60.0, None).await;
        assert_eq!(outcome.category, Category::Other);
        assert_eq!(outcome.confidence, CONFIDENCE_CALL_FAILED);
        assert!(outcome.is_degraded());
    }

    #[tokio::test]
    async fn test_prompt_names_every_category() {
        let model = StubModel::texts(&["Bills"]);
        categorize(&model, "PG&E", 120.0, Some("utility bill")).await;
        let requests = model.requests.lock().unwrap();
        let prompt = &requests[0].messages[0].content;
        for c in Category::ALL {
            assert!(prompt.contains(c.as_str()));
        }
        assert!(prompt.contains("utility bill"));
    }
}
