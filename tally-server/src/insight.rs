//! Insight analyzer: trend math from core plus two sequential model calls.
//!
//! The description prompt depends on the label the first call picked, so
//! the calls cannot overlap. Neither call is allowed to fail the report;
//! both degrade to fixed fallbacks.

use tally_core::{
    compute_trends, heuristic_patterns, starter_report, top_categories, Expense,
    SpendingPersonality, SpendingTrends, MIN_EXPENSES_FOR_INSIGHTS, PERSONALITIES,
};

use crate::llm::{ChatMessage, CompletionRequest, ModelClient};

const LABEL_MAX_TOKENS: u32 = 16;
const DESCRIPTION_MAX_TOKENS: u32 = 80;
const TEMPERATURE: f32 = 0.7;

const FALLBACK_PERSONALITY: &str = "Balanced Spender";
const FALLBACK_DESCRIPTION: &str =
    "You keep your spending steady without leaning hard on any one habit.";

/// Build the full insight report for one user's expense list
pub async fn analyze(model: &dyn ModelClient, expenses: &[Expense]) -> SpendingPersonality {
    if expenses.len() < MIN_EXPENSES_FOR_INSIGHTS {
        return starter_report();
    }

    let trends = compute_trends(expenses);
    let personality = personality_label(model, &trends).await;
    let description = personality_description(model, &personality, &trends).await;
    let patterns = heuristic_patterns(&trends);

    SpendingPersonality {
        personality,
        description,
        patterns,
        trends,
    }
}

async fn personality_label(model: &dyn ModelClient, trends: &SpendingTrends) -> String {
    let req = CompletionRequest {
        messages: vec![ChatMessage::user(label_prompt(trends))],
        max_tokens: LABEL_MAX_TOKENS,
        temperature: TEMPERATURE,
    };

    match model.complete(req).await {
        Ok(reply) => {
            let raw = reply.text();
            match canonical_personality(&raw) {
                Some(label) => label.to_string(),
                None => {
                    tracing::warn!(reply = %raw, "personality reply outside the fixed set");
                    FALLBACK_PERSONALITY.to_string()
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "personality call failed");
            FALLBACK_PERSONALITY.to_string()
        }
    }
}

async fn personality_description(
    model: &dyn ModelClient,
    label: &str,
    trends: &SpendingTrends,
) -> String {
    let req = CompletionRequest {
        messages: vec![ChatMessage::user(description_prompt(label, trends))],
        max_tokens: DESCRIPTION_MAX_TOKENS,
        temperature: TEMPERATURE,
    };

    match model.complete(req).await {
        Ok(reply) => {
            let text = reply.text();
            if text.is_empty() {
                FALLBACK_DESCRIPTION.to_string()
            } else {
                text
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "personality description call failed");
            FALLBACK_DESCRIPTION.to_string()
        }
    }
}

fn canonical_personality(raw: &str) -> Option<&'static str> {
    let raw = raw.trim().trim_matches(['"', '.']);
    PERSONALITIES
        .iter()
        .find(|p| p.eq_ignore_ascii_case(raw))
        .copied()
}

fn trend_lines(trends: &SpendingTrends) -> String {
    let top = top_categories(trends, 3)
        .iter()
        .map(|t| format!("{} ${:.2}", t.category, t.total))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Weekend spending: ${:.2}\nWeekday spending: ${:.2}\nTop categories: {top}",
        trends.weekend_total, trends.weekday_total
    )
}

fn label_prompt(trends: &SpendingTrends) -> String {
    format!(
        "Based on these spending trends, pick the personality that fits best.\n\n\
         {}\n\n\
         Choose exactly one of: {}.\n\
         Respond with only the personality name.",
        trend_lines(trends),
        PERSONALITIES.join(", ")
    )
}

fn description_prompt(label: &str, trends: &SpendingTrends) -> String {
    format!(
        "This spender's personality is \"{label}\".\n\n\
         {}\n\n\
         In one friendly sentence, describe what that personality means for them.",
        trend_lines(trends)
    )
}
