//! The per-user container: authoritative state, the five operations, and
//! the chat dispatch flow.
//!
//! Every mutation persists through the store before the call returns, so
//! a container can be dropped and rebuilt from storage at any point.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use thiserror::Error;

use tally_core::{
    extract_expense, Expense, ExpenseDraft, ExpenseFilter, Message, Role, SpendingContext,
    SpendingPersonality, UserState,
};

use crate::categorize::{self, CategoryOutcome};
use crate::insight;
use crate::llm::{ChatMessage, CompletionRequest, ModelClient, ReplyError};
use crate::store::StateStore;

/// Shown whenever the conversational call fails
pub const CHAT_FALLBACK: &str =
    "Sorry, I'm having trouble thinking right now. Please try again in a moment.";

const CHAT_MAX_TOKENS: u32 = 300;
const CHAT_TEMPERATURE: f32 = 0.7;

const PARSE_MAX_TOKENS: u32 = 100;
const PARSE_TEMPERATURE: f32 = 0.1;

/// Why a free-text expense could not be parsed and stored
#[derive(Debug, Error)]
pub enum ParseExpenseError {
    #[error("model call failed: {0}")]
    ModelCall(#[source] anyhow::Error),
    #[error("model reply was not usable: {0}")]
    UnusableReply(#[from] ReplyError),
    #[error("no expense found in the text")]
    NoExpense,
    #[error("failed to persist the expense: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Result tag for the conversational call: a real answer, or the static
/// fallback with the reason it was needed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Answered(String),
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResult {
    pub outcome: ChatOutcome,
    pub expense_added: bool,
}

impl ChatResult {
    /// The text the user sees
    pub fn response(&self) -> &str {
        match &self.outcome {
            ChatOutcome::Answered(text) => text,
            ChatOutcome::Fallback { .. } => CHAT_FALLBACK,
        }
    }
}

pub struct UserContainer {
    pub state: UserState,
}

impl UserContainer {
    /// Load prior state for this user, or default-construct and persist it
    pub fn initialize(store: &dyn StateStore, user_id: &str) -> Result<Self> {
        match store.load(user_id)? {
            Some(state) => Ok(Self { state }),
            None => {
                let state = UserState::new(user_id);
                store.save(&state)?;
                Ok(Self { state })
            }
        }
    }

    pub fn add_expense(&mut self, store: &dyn StateStore, draft: ExpenseDraft) -> Result<Expense> {
        let expense = self.state.add_expense(draft);
        store.save(&self.state)?;
        Ok(expense)
    }

    pub fn get_expenses(&self, filter: &ExpenseFilter) -> Vec<Expense> {
        self.state.get_expenses(filter)
    }

    pub fn add_message(
        &mut self,
        store: &dyn StateStore,
        role: Role,
        content: impl Into<String>,
    ) -> Result<Message> {
        let message = self.state.add_message(role, content);
        store.save(&self.state)?;
        Ok(message)
    }

    pub fn spending_context(&self) -> SpendingContext {
        self.state.spending_context()
    }

    /// Ask the model to pull `{amount, merchant}` out of free text, then
    /// categorize and store the result.
    pub async fn parse_and_add(
        &mut self,
        model: &dyn ModelClient,
        store: &dyn StateStore,
        text: &str,
    ) -> Result<Expense, ParseExpenseError> {
        let req = CompletionRequest {
            messages: vec![ChatMessage::user(extraction_prompt(text))],
            max_tokens: PARSE_MAX_TOKENS,
            temperature: PARSE_TEMPERATURE,
        };
        let reply = model
            .complete(req)
            .await
            .map_err(ParseExpenseError::ModelCall)?;

        let payload = reply.json_payload()?;
        if payload.is_null() {
            return Err(ParseExpenseError::NoExpense);
        }

        let amount = payload.get("amount").and_then(amount_value);
        let merchant = payload
            .get("merchant")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let (Some(amount), Some(merchant)) = (amount, merchant) else {
            return Err(ParseExpenseError::NoExpense);
        };
        if amount <= 0.0 {
            return Err(ParseExpenseError::NoExpense);
        }

        let outcome = categorize::categorize(model, merchant, amount, None).await;
        let expense = self.state.add_expense(ExpenseDraft {
            amount,
            merchant: merchant.to_string(),
            category: outcome.category,
            date: today(),
            notes: Some(categorization_note(&outcome)),
        });
        store.save(&self.state).map_err(ParseExpenseError::Storage)?;
        Ok(expense)
    }

    /// One conversational turn. Appends the user message, opportunistically
    /// extracts and stores an expense from it, asks the model for a reply
    /// built on the current spending context, and appends the answer.
    pub async fn chat(
        &mut self,
        model: &dyn ModelClient,
        store: &dyn StateStore,
        message: &str,
    ) -> Result<ChatResult> {
        self.state.add_message(Role::User, message);
        store.save(&self.state)?;

        let mut expense_added = false;
        match extract_expense(message) {
            Ok(Some(found)) => {
                let outcome = categorize::categorize(model, &found.merchant, found.amount, None).await;
                self.state.add_expense(ExpenseDraft {
                    amount: found.amount,
                    merchant: found.merchant,
                    category: outcome.category,
                    date: today(),
                    notes: Some(categorization_note(&outcome)),
                });
                store.save(&self.state)?;
                expense_added = true;
            }
            Ok(None) => {}
            Err(err) => {
                // extraction is best-effort; the chat goes on without it
                tracing::debug!(error = %err, "chat extraction failed");
            }
        }

        let context = self.state.spending_context();
        let system = system_prompt(&context, &self.state.preferences.currency);
        let user_content = if expense_added {
            format!(
                "{message}\n\n\
                 [An expense from this message was just saved. Briefly confirm it was recorded.]"
            )
        } else {
            message.to_string()
        };

        let req = CompletionRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user_content)],
            max_tokens: CHAT_MAX_TOKENS,
            temperature: CHAT_TEMPERATURE,
        };

        let outcome = match model.complete(req).await {
            Ok(reply) => {
                let text = reply.text();
                if text.is_empty() {
                    ChatOutcome::Fallback {
                        reason: "empty model reply".to_string(),
                    }
                } else {
                    ChatOutcome::Answered(text)
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "chat call failed");
                ChatOutcome::Fallback {
                    reason: err.to_string(),
                }
            }
        };

        let result = ChatResult {
            outcome,
            expense_added,
        };
        self.state.add_message(Role::Assistant, result.response());
        store.save(&self.state)?;
        Ok(result)
    }

    pub async fn insights(&self, model: &dyn ModelClient) -> SpendingPersonality {
        insight::analyze(model, &self.state.expenses).await
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn categorization_note(outcome: &CategoryOutcome) -> String {
    format!(
        "Auto-categorized as {} ({:.0}% confidence)",
        outcome.category,
        outcome.confidence * 100.0
    )
}

/// Accept both JSON numbers and numeric strings for the amount field
fn amount_value(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
        _ => None,
    }
}

fn extraction_prompt(text: &str) -> String {
    format!(
        "Extract the expense from this message: \"{text}\"\n\n\
         Reply with only JSON in the form {{\"amount\": <number>, \"merchant\": \"<name>\"}}.\n\
         If the message contains no expense, reply with exactly: null"
    )
}

fn system_prompt(context: &SpendingContext, currency: &str) -> String {
    let symbol = currency_symbol(currency);

    let mut prompt = format!(
        "You are Tally, a friendly expense-tracking assistant.\n\n\
         What you know about this user's spending:\n\
         - Total spent: {symbol}{:.2} across {} expenses\n",
        context.total_spent, context.count
    );

    if let Some(top) = context.top_category {
        prompt.push_str(&format!("- Top category: {top}\n"));
    }

    if !context.by_category.is_empty() {
        let breakdown = context
            .by_category
            .iter()
            .map(|t| format!("{} {symbol}{:.2}", t.category, t.total))
            .collect::<Vec<_>>()
            .join(", ");
        prompt.push_str(&format!("- Breakdown: {breakdown}\n"));
    }

    if !context.recent.is_empty() {
        let recent = context
            .recent
            .iter()
            .map(|e| format!("{symbol}{:.2} at {} ({})", e.amount, e.merchant, e.category))
            .collect::<Vec<_>>()
            .join(", ");
        prompt.push_str(&format!("- Recent: {recent}\n"));
    }

    prompt.push_str(
        "\nBe concise and practical. Use the numbers above when the user asks about their spending.",
    );
    prompt
}

fn currency_symbol(code: &str) -> String {
    match code {
        "USD" => "$".to_string(),
        "EUR" => "\u{20ac}".to_string(),
        "GBP" => "\u{a3}".to_string(),
        other => format!("{other} "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::StubModel;
    use crate::llm::ModelReply;
    use crate::store::MemoryStore;
    use tally_core::{Category, MAX_HISTORY};

    fn draft(amount: f64, merchant: &str) -> ExpenseDraft {
        ExpenseDraft {
            amount,
            merchant: merchant.to_string(),
            category: Category::Food,
            date: today(),
            notes: None,
        }
    }

    #[test]
    fn test_initialize_persists_default_state() {
        let store = MemoryStore::default();
        let container = UserContainer::initialize(&store, "alice").unwrap();
        assert_eq!(container.state.user_id, "alice");
        assert!(store.load("alice").unwrap().is_some());
    }

    #[test]
    fn test_initialize_reloads_prior_state() {
        let store = MemoryStore::default();
        {
            let mut container = UserContainer::initialize(&store, "alice").unwrap();
            container.add_expense(&store, draft(9.0, "Starbucks")).unwrap();
        }
        let container = UserContainer::initialize(&store, "alice").unwrap();
        assert_eq!(container.state.expenses.len(), 1);
        assert_eq!(container.state.expenses[0].merchant, "Starbucks");
    }

    #[tokio::test]
    async fn test_parse_and_add_happy_path() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        // first reply parses the text, second categorizes
        let model = StubModel::texts(&[r#"{"amount": 12.5, "merchant": "Starbucks"}"#, "Food"]);

        let expense = container
            .parse_and_add(&model, &store, "just grabbed a latte, 12.50 at starbucks")
            .await
            .unwrap();

        assert_eq!(expense.amount, 12.5);
        assert_eq!(expense.merchant, "Starbucks");
        assert_eq!(expense.category, Category::Food);
        assert!(expense.notes.as_deref().unwrap().contains("95% confidence"));
        assert_eq!(store.load("u").unwrap().unwrap().expenses.len(), 1);
    }

    #[tokio::test]
    async fn test_parse_and_add_accepts_fenced_reply() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        let model = StubModel::texts(&[
            "```json\n{\"amount\": 8, \"merchant\": \"Chipotle\"}\n```",
            "Food",
        ]);

        let expense = container.parse_and_add(&model, &store, "8 bucks chipotle").await.unwrap();
        assert_eq!(expense.amount, 8.0);
    }

    #[tokio::test]
    async fn test_parse_and_add_accepts_structured_reply() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        let model = StubModel::with_replies(vec![
            Ok(ModelReply::Structured(serde_json::json!({
                "amount": "4.25",
                "merchant": "7-Eleven"
            }))),
            Ok(ModelReply::Text("Shopping".to_string())),
        ]);

        let expense = container.parse_and_add(&model, &store, "slurpee run").await.unwrap();
        assert_eq!(expense.amount, 4.25);
        assert_eq!(expense.category, Category::Shopping);
    }

    #[tokio::test]
    async fn test_parse_and_add_null_sentinel() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        let model = StubModel::texts(&["null"]);

        let err = container
            .parse_and_add(&model, &store, "how are you?")
            .await
            .unwrap_err();
        assert!(matches!(err, ParseExpenseError::NoExpense));
        assert!(container.state.expenses.is_empty());
    }

    #[tokio::test]
    async fn test_parse_and_add_unusable_reply() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        let model = StubModel::texts(&["I couldn't find an expense, sorry!"]);

        let err = container.parse_and_add(&model, &store, "hmm").await.unwrap_err();
        assert!(matches!(err, ParseExpenseError::UnusableReply(_)));
    }

    #[tokio::test]
    async fn test_parse_and_add_missing_fields() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        let model = StubModel::texts(&[r#"{"amount": 5}"#]);

        let err = container.parse_and_add(&model, &store, "five bucks").await.unwrap_err();
        assert!(matches!(err, ParseExpenseError::NoExpense));
    }

    #[tokio::test]
    async fn test_chat_saves_detected_expense_and_answers() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        // first call categorizes the extracted expense, second is the chat
        let model = StubModel::texts(&["Food", "Got it, your $9.00 at Starbucks is saved."]);

        let result = container
            .chat(&model, &store, "I spent $9 at Starbucks")
            .await
            .unwrap();

        assert!(result.expense_added);
        assert_eq!(result.response(), "Got it, your $9.00 at Starbucks is saved.");
        assert_eq!(container.state.expenses.len(), 1);
        assert_eq!(container.state.expenses[0].merchant, "Starbucks");

        // user turn + assistant turn recorded
        assert_eq!(container.state.conversations.len(), 2);
        assert_eq!(container.state.conversations[0].role, Role::User);
        assert_eq!(container.state.conversations[1].role, Role::Assistant);

        // the chat prompt carried the hidden save acknowledgement
        let requests = model.requests.lock().unwrap();
        let chat_req = &requests[1];
        assert!(chat_req.messages[1].content.contains("just saved"));
        assert!(chat_req.messages[0].content.contains("Total spent: $9.00"));
    }

    #[tokio::test]
    async fn test_chat_without_expense_sends_raw_message() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        let model = StubModel::texts(&["You're all set."]);

        let result = container.chat(&model, &store, "am I doing ok?").await.unwrap();
        assert!(!result.expense_added);

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[1].content, "am I doing ok?");
    }

    #[tokio::test]
    async fn test_chat_model_failure_uses_static_fallback() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        let model = StubModel::failing();

        let result = container.chat(&model, &store, "hello").await.unwrap();
        assert!(matches!(result.outcome, ChatOutcome::Fallback { .. }));
        assert_eq!(result.response(), CHAT_FALLBACK);
        // the fallback still lands in the conversation history
        assert_eq!(container.state.conversations[1].content, CHAT_FALLBACK);
    }

    #[tokio::test]
    async fn test_chat_expense_categorization_failure_still_saves() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();
        // categorization fails (no reply queued for it), chat succeeds
        let model = StubModel::with_replies(vec![
            Err(anyhow::anyhow!("model down")),
            Ok(ModelReply::Text("Saved it.".to_string())),
        ]);

        let result = container.chat(&model, &store, "paid $30 for gas").await.unwrap();
        assert!(result.expense_added);
        let expense = &container.state.expenses[0];
        assert_eq!(expense.category, Category::Other);
        assert!(expense.notes.as_deref().unwrap().contains("30% confidence"));
    }

    #[tokio::test]
    async fn test_chat_history_stays_bounded() {
        let store = MemoryStore::default();
        let mut container = UserContainer::initialize(&store, "u").unwrap();

        for i in 0..15 {
            let model = StubModel::texts(&["ok"]);
            container.chat(&model, &store, &format!("note {i}")).await.unwrap();
        }
        assert_eq!(container.state.conversations.len(), MAX_HISTORY);

        let persisted = store.load("u").unwrap().unwrap();
        assert_eq!(persisted.conversations.len(), MAX_HISTORY);
    }
}
