//! The per-user aggregate: expenses, bounded conversation, preferences.
//!
//! One `UserState` exists per distinct user id. Every mutation is followed
//! by a persist in the owning container; nothing here touches storage.

use chrono::{NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::expense::{Category, Expense, Preferences};
use crate::insights::CategoryTotal;
use crate::message::{Message, Role, MAX_HISTORY};

/// Everything tally knows about one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserState {
    pub user_id: String,
    /// Insertion order = chronological add order
    pub expenses: Vec<Expense>,
    /// Most recent `MAX_HISTORY` chat turns
    pub conversations: Vec<Message>,
    pub preferences: Preferences,
}

/// An expense as submitted, before an id is assigned
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseDraft {
    pub amount: f64,
    pub merchant: String,
    pub category: Category,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

/// Optional filters for listing expenses. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpenseFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub category: Option<Category>,
}

impl ExpenseFilter {
    pub fn matches(&self, expense: &Expense) -> bool {
        if let Some(start) = self.start_date {
            if expense.date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if expense.date > end {
                return false;
            }
        }
        if let Some(category) = self.category {
            if expense.category != category {
                return false;
            }
        }
        true
    }
}

/// Read-side projection over the expense list, recomputed on every call
#[derive(Debug, Clone, PartialEq)]
pub struct SpendingContext {
    pub total_spent: f64,
    /// Totals in first-occurrence order of each category
    pub by_category: Vec<CategoryTotal>,
    pub top_category: Option<Category>,
    /// The five most recently added expenses, oldest of them first
    pub recent: Vec<Expense>,
    pub count: usize,
}

impl UserState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            expenses: Vec::new(),
            conversations: Vec::new(),
            preferences: Preferences::default(),
        }
    }

    /// Assign an id and append. Returns the stored expense.
    pub fn add_expense(&mut self, draft: ExpenseDraft) -> Expense {
        let expense = Expense {
            id: new_expense_id(),
            amount: draft.amount,
            merchant: draft.merchant,
            category: draft.category,
            date: draft.date,
            notes: draft.notes,
        };
        self.expenses.push(expense.clone());
        expense
    }

    /// Expenses matching the filter, original order preserved
    pub fn get_expenses(&self, filter: &ExpenseFilter) -> Vec<Expense> {
        self.expenses
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Append a timestamped chat turn, keeping only the most recent
    /// `MAX_HISTORY` entries.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> Message {
        let message = Message::now(role, content);
        self.conversations.push(message.clone());
        if self.conversations.len() > MAX_HISTORY {
            let excess = self.conversations.len() - MAX_HISTORY;
            self.conversations.drain(..excess);
        }
        message
    }

    /// Summarize spending for prompts and replies. Ties for the top
    /// category go to whichever category appeared first.
    pub fn spending_context(&self) -> SpendingContext {
        let total_spent: f64 = self.expenses.iter().map(|e| e.amount).sum();

        let mut by_category: Vec<CategoryTotal> = Vec::new();
        for e in &self.expenses {
            match by_category.iter_mut().find(|t| t.category == e.category) {
                Some(t) => t.total += e.amount,
                None => by_category.push(CategoryTotal {
                    category: e.category,
                    total: e.amount,
                }),
            }
        }

        let mut top_category = None;
        let mut top_total = 0.0;
        for t in &by_category {
            if t.total > top_total {
                top_total = t.total;
                top_category = Some(t.category);
            }
        }

        let recent_start = self.expenses.len().saturating_sub(5);
        let recent = self.expenses[recent_start..].to_vec();

        SpendingContext {
            total_spent,
            by_category,
            top_category,
            recent,
            count: self.expenses.len(),
        }
    }
}

/// Generate a best-effort-unique expense id: unix millis plus a short
/// random base36 suffix.
pub fn new_expense_id() -> String {
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..7)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(amount: f64, merchant: &str, category: Category, date: &str) -> ExpenseDraft {
        ExpenseDraft {
            amount,
            merchant: merchant.to_string(),
            category,
            date: date.parse().unwrap(),
            notes: None,
        }
    }

    #[test]
    fn test_add_then_list_roundtrip() {
        let mut state = UserState::new("u1");
        state.add_expense(draft(9.0, "Starbucks", Category::Food, "2026-08-01"));
        let added = state.add_expense(draft(30.0, "Shell", Category::Transport, "2026-08-02"));

        let all = state.get_expenses(&ExpenseFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all.last().unwrap(), &added);
    }

    #[test]
    fn test_expense_ids_are_distinct() {
        let mut state = UserState::new("u1");
        let a = state.add_expense(draft(1.0, "A", Category::Other, "2026-08-01"));
        let b = state.add_expense(draft(2.0, "B", Category::Other, "2026-08-01"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_filter_by_date_range_inclusive() {
        let mut state = UserState::new("u1");
        state.add_expense(draft(1.0, "A", Category::Food, "2026-08-01"));
        state.add_expense(draft(2.0, "B", Category::Food, "2026-08-05"));
        state.add_expense(draft(3.0, "C", Category::Food, "2026-08-09"));

        let filter = ExpenseFilter {
            start_date: Some("2026-08-01".parse().unwrap()),
            end_date: Some("2026-08-05".parse().unwrap()),
            ..Default::default()
        };
        let hits = state.get_expenses(&filter);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].merchant, "A");
        assert_eq!(hits[1].merchant, "B");
    }

    #[test]
    fn test_filter_by_category_no_matches_is_empty() {
        let mut state = UserState::new("u1");
        state.add_expense(draft(1.0, "A", Category::Food, "2026-08-01"));

        let filter = ExpenseFilter {
            category: Some(Category::Bills),
            ..Default::default()
        };
        assert!(state.get_expenses(&filter).is_empty());
    }

    #[test]
    fn test_conversation_truncates_to_most_recent() {
        let mut state = UserState::new("u1");
        for i in 0..25 {
            state.add_message(Role::User, format!("msg {i}"));
        }
        assert_eq!(state.conversations.len(), MAX_HISTORY);
        assert_eq!(state.conversations[0].content, "msg 5");
        assert_eq!(state.conversations.last().unwrap().content, "msg 24");
    }

    #[test]
    fn test_spending_context_totals() {
        let mut state = UserState::new("u1");
        state.add_expense(draft(10.0, "A", Category::Food, "2026-08-01"));
        state.add_expense(draft(20.0, "B", Category::Transport, "2026-08-02"));
        state.add_expense(draft(5.0, "C", Category::Food, "2026-08-03"));

        let ctx = state.spending_context();
        assert_eq!(ctx.total_spent, 35.0);
        assert_eq!(ctx.count, 3);
        assert_eq!(ctx.top_category, Some(Category::Transport));
        assert_eq!(ctx.by_category[0].category, Category::Food);
        assert_eq!(ctx.by_category[0].total, 15.0);
    }

    #[test]
    fn test_top_category_tie_goes_to_first_seen() {
        let mut state = UserState::new("u1");
        state.add_expense(draft(10.0, "A", Category::Shopping, "2026-08-01"));
        state.add_expense(draft(10.0, "B", Category::Food, "2026-08-02"));
        let ctx = state.spending_context();
        assert_eq!(ctx.top_category, Some(Category::Shopping));
    }

    #[test]
    fn test_recent_is_last_five_in_order() {
        let mut state = UserState::new("u1");
        for i in 1..=7 {
            state.add_expense(draft(i as f64, &format!("M{i}"), Category::Other, "2026-08-01"));
        }
        let ctx = state.spending_context();
        assert_eq!(ctx.recent.len(), 5);
        assert_eq!(ctx.recent[0].merchant, "M3");
        assert_eq!(ctx.recent[4].merchant, "M7");
    }

    #[test]
    fn test_empty_state_context() {
        let state = UserState::new("u1");
        let ctx = state.spending_context();
        assert_eq!(ctx.total_spent, 0.0);
        assert_eq!(ctx.top_category, None);
        assert!(ctx.recent.is_empty());
    }
}
