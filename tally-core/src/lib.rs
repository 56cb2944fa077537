//! tally-core: domain types and pure logic for the Tally expense tracker

pub mod expense;
pub mod extract;
pub mod insights;
pub mod message;
pub mod state;

pub use expense::{Category, Expense, Preferences};
pub use extract::{extract_expense, ExtractedExpense};
pub use insights::{
    compute_trends, heuristic_patterns, starter_report, top_categories, CategoryTotal,
    PatternInsight, PatternKind, SpendingPersonality, SpendingTrends,
    MIN_EXPENSES_FOR_INSIGHTS, PERSONALITIES, STARTER_DESCRIPTION, STARTER_PERSONALITY,
};
pub use message::{Message, Role, MAX_HISTORY};
pub use state::{ExpenseDraft, ExpenseFilter, SpendingContext, UserState};
