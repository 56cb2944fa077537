//! Expense records and the fixed category vocabulary

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single tracked purchase. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expense {
    /// Unique identifier, `{unix_millis}-{random suffix}`
    pub id: String,
    /// Positive amount in the user's currency
    pub amount: f64,
    /// Where the money went
    pub merchant: String,
    /// One of the five fixed categories
    pub category: Category,
    /// Calendar date of the purchase (YYYY-MM-DD)
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The closed set of spending categories. Everything the categorizer
/// cannot place lands in `Other`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    Food,
    Transport,
    Shopping,
    Bills,
    Other,
}

impl Category {
    /// All categories in canonical order
    pub const ALL: [Category; 5] = [
        Category::Food,
        Category::Transport,
        Category::Shopping,
        Category::Bills,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "Food",
            Category::Transport => "Transport",
            Category::Shopping => "Shopping",
            Category::Bills => "Bills",
            Category::Other => "Other",
        }
    }

    /// Parse a category name. Leading/trailing whitespace is ignored;
    /// the name itself must match exactly.
    pub fn parse(s: &str) -> Option<Category> {
        match s.trim() {
            "Food" => Some(Category::Food),
            "Transport" => Some(Category::Transport),
            "Shopping" => Some(Category::Shopping),
            "Bills" => Some(Category::Bills),
            "Other" => Some(Category::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user settings stored alongside the expense list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    pub currency: String,
    pub categories: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            categories: Category::ALL.iter().map(|c| c.as_str().to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_roundtrip() {
        for c in Category::ALL {
            assert_eq!(Category::parse(c.as_str()), Some(c));
        }
    }

    #[test]
    fn test_category_parse_trims_but_stays_exact() {
        assert_eq!(Category::parse("  Food \n"), Some(Category::Food));
        assert_eq!(Category::parse("food"), None);
        assert_eq!(Category::parse("Groceries"), None);
    }

    #[test]
    fn test_expense_serde_shape() {
        let e = Expense {
            id: "1700000000000-a1b2c3d".to_string(),
            amount: 12.5,
            merchant: "Starbucks".to_string(),
            category: Category::Food,
            date: NaiveDate::from_ymd_opt(2026, 8, 7).unwrap(),
            notes: None,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["category"], "Food");
        assert_eq!(json["date"], "2026-08-07");
        assert!(json.get("notes").is_none());
    }

    #[test]
    fn test_default_preferences() {
        let p = Preferences::default();
        assert_eq!(p.currency, "USD");
        assert_eq!(p.categories.len(), 5);
        assert_eq!(p.categories[0], "Food");
    }
}
