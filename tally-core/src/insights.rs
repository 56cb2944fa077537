//! Spending aggregates behind the insight report: weekend/weekday and
//! per-category trends, the heuristic pattern observations, and the fixed
//! starter report shown before enough data exists.

use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::expense::{Category, Expense};

/// Insight generation needs at least this many expenses
pub const MIN_EXPENSES_FOR_INSIGHTS: usize = 5;

/// Personality shown until enough expenses exist
pub const STARTER_PERSONALITY: &str = "Getting Started";

pub const STARTER_DESCRIPTION: &str =
    "Add at least 5 expenses to unlock your spending personality.";

/// The closed vocabulary the model picks a personality label from
pub const PERSONALITIES: [&str; 5] = [
    "Balanced Spender",
    "Weekend Warrior",
    "Foodie at Heart",
    "Deal Hunter",
    "Big Ticket Dreamer",
];

/// Weekend spending must exceed weekday spending by this factor before
/// the day-of-week observation fires
const WEEKEND_SKEW_FACTOR: f64 = 1.3;

/// Above this share of total spending, the top-category recommendation
/// suggests a budget
const DOMINANT_CATEGORY_PCT: f64 = 40.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryTotal {
    pub category: Category,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpendingTrends {
    pub weekend_total: f64,
    pub weekday_total: f64,
    /// Totals in first-occurrence order of each category
    pub category_totals: Vec<CategoryTotal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    DayOfWeek,
    Category,
}

/// One heuristic observation about spending behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternInsight {
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub insight: String,
    pub recommendation: String,
}

/// The full insight report returned to the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpendingPersonality {
    pub personality: String,
    pub description: String,
    pub patterns: Vec<PatternInsight>,
    pub trends: SpendingTrends,
}

impl SpendingTrends {
    pub fn total(&self) -> f64 {
        self.weekend_total + self.weekday_total
    }

    fn zeroed() -> Self {
        Self {
            weekend_total: 0.0,
            weekday_total: 0.0,
            category_totals: Vec::new(),
        }
    }
}

/// Weekend (Sat/Sun) vs weekday totals plus per-category totals
pub fn compute_trends(expenses: &[Expense]) -> SpendingTrends {
    let mut weekend_total = 0.0;
    let mut weekday_total = 0.0;
    let mut category_totals: Vec<CategoryTotal> = Vec::new();

    for e in expenses {
        match e.date.weekday() {
            Weekday::Sat | Weekday::Sun => weekend_total += e.amount,
            _ => weekday_total += e.amount,
        }

        match category_totals.iter_mut().find(|t| t.category == e.category) {
            Some(t) => t.total += e.amount,
            None => category_totals.push(CategoryTotal {
                category: e.category,
                total: e.amount,
            }),
        }
    }

    SpendingTrends {
        weekend_total,
        weekday_total,
        category_totals,
    }
}

/// The top `n` categories by total, highest first
pub fn top_categories(trends: &SpendingTrends, n: usize) -> Vec<CategoryTotal> {
    let mut sorted = trends.category_totals.clone();
    sorted.sort_by(|a, b| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted.truncate(n);
    sorted
}

/// Up to two observations derived without the model: a day-of-week skew
/// (only when weekends outspend weekdays by 30%) and the top category.
pub fn heuristic_patterns(trends: &SpendingTrends) -> Vec<PatternInsight> {
    let mut patterns = Vec::new();
    let total = trends.total();
    if total <= 0.0 {
        return patterns;
    }

    if trends.weekend_total > trends.weekday_total * WEEKEND_SKEW_FACTOR {
        let weekend_pct = trends.weekend_total / total * 100.0;
        patterns.push(PatternInsight {
            kind: PatternKind::DayOfWeek,
            insight: format!("{weekend_pct:.0}% of your spending happens on weekends"),
            recommendation: "Set a weekend budget before Saturday so the fun stays intentional."
                .to_string(),
        });
    }

    if let Some(top) = top_category(trends) {
        let pct = top.total / total * 100.0;
        let recommendation = if pct > DOMINANT_CATEGORY_PCT {
            format!(
                "{} dominates your spending. A monthly cap for it would go a long way.",
                top.category
            )
        } else {
            "Your spending is spread fairly evenly across categories.".to_string()
        };
        patterns.push(PatternInsight {
            kind: PatternKind::Category,
            insight: format!(
                "{} is your biggest category at {pct:.0}% of total spending",
                top.category
            ),
            recommendation,
        });
    }

    patterns
}

/// Fixed report returned while fewer than
/// [`MIN_EXPENSES_FOR_INSIGHTS`] expenses exist.
pub fn starter_report() -> SpendingPersonality {
    SpendingPersonality {
        personality: STARTER_PERSONALITY.to_string(),
        description: STARTER_DESCRIPTION.to_string(),
        patterns: Vec::new(),
        trends: SpendingTrends::zeroed(),
    }
}

/// Highest-total category; ties go to whichever appeared first
fn top_category(trends: &SpendingTrends) -> Option<&CategoryTotal> {
    let mut top: Option<&CategoryTotal> = None;
    for t in &trends.category_totals {
        if top.is_none_or(|best| t.total > best.total) {
            top = Some(t);
        }
    }
    top
}
