//! Goal progress for a single day.
//!
//! Joins the goal table with that day's ledger rows and interprets each
//! value against its target. Nothing here writes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{is_binary_unit, CoachStore, Goal, LedgerEntry};
use crate::error::StoreResult;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GoalProgress {
    pub category: String,
    pub goal_name: String,
    pub target: f64,
    pub unit: String,
    pub current: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    /// 0.0..=1.0
    Fraction(f64),
    Binary(bool),
}

impl Completion {
    pub fn is_complete(&self) -> bool {
        match self {
            Completion::Fraction(f) => *f >= 1.0,
            Completion::Binary(done) => *done,
        }
    }
}

/// Pure interpretation of a goal's value for the day.
pub fn completion(unit: &str, current: f64, target: f64) -> Completion {
    if is_binary_unit(unit) {
        return Completion::Binary(current >= 1.0);
    }
    if target <= 0.0 || !target.is_finite() {
        return Completion::Fraction(0.0);
    }
    Completion::Fraction((current / target).clamp(0.0, 1.0))
}

impl GoalProgress {
    pub fn completion(&self) -> Completion {
        completion(&self.unit, self.current, self.target)
    }

    /// One-line rendering used in prompts and the CLI.
    pub fn summary_line(&self) -> String {
        match self.completion() {
            Completion::Binary(done) => format!(
                "{} [{}]: {}",
                self.goal_name,
                self.category,
                if done { "done" } else { "not done" }
            ),
            Completion::Fraction(f) => format!(
                "{} [{}]: {}/{} {} ({:.0}%)",
                self.goal_name,
                self.category,
                trim_number(self.current),
                trim_number(self.target),
                self.unit,
                f * 100.0
            ),
        }
    }
}

pub fn trim_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

/// Category descending, then goal name ascending.
pub fn display_order(a: &GoalProgress, b: &GoalProgress) -> Ordering {
    b.category
        .cmp(&a.category)
        .then_with(|| a.goal_name.cmp(&b.goal_name))
}

/// Left-join goals with one day's ledger rows. Missing rows count as zero.
pub fn join_progress(goals: &[Goal], entries: &[LedgerEntry]) -> Vec<GoalProgress> {
    let by_goal: HashMap<&str, f64> = entries
        .iter()
        .map(|e| (e.goal_name.as_str(), e.value))
        .collect();

    let mut rows: Vec<GoalProgress> = goals
        .iter()
        .map(|g| GoalProgress {
            category: g.category.clone(),
            goal_name: g.name.clone(),
            target: g.target,
            unit: g.unit.clone(),
            current: by_goal.get(g.name.as_str()).copied().unwrap_or(0.0),
        })
        .collect();
    rows.sort_by(display_order);
    rows
}

pub fn format_progress_for_prompt(progress: &[GoalProgress]) -> String {
    if progress.is_empty() {
        return "No goals defined.".to_string();
    }
    progress
        .iter()
        .map(|p| format!("- {}", p.summary_line()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ProgressAggregator {
    store: Arc<dyn CoachStore>,
    clock: Arc<dyn Clock>,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn CoachStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn todays_progress(&self) -> StoreResult<Vec<GoalProgress>> {
        self.store.progress(self.clock.today())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::SqliteStore;
    use chrono::NaiveDate;

    #[test]
    fn test_fraction_clamps_at_one() {
        assert_eq!(completion("reps", 15.0, 10.0), Completion::Fraction(1.0));
        assert_eq!(completion("reps", 5.0, 10.0), Completion::Fraction(0.5));
    }

    #[test]
    fn test_zero_target_is_zero_not_nan() {
        assert_eq!(completion("reps", 5.0, 0.0), Completion::Fraction(0.0));
        assert_eq!(completion("reps", 5.0, -2.0), Completion::Fraction(0.0));
    }

    #[test]
    fn test_binary_goals() {
        assert_eq!(completion("bool", 0.0, 1.0), Completion::Binary(false));
        assert_eq!(completion("bool", 1.0, 1.0), Completion::Binary(true));
        assert_eq!(completion("bool", 2.0, 1.0), Completion::Binary(true));
        assert!(completion("session", 1.0, 1.0).is_complete());
    }

    #[test]
    fn test_join_progress_orders_and_defaults() {
        let goals = vec![
            Goal::new("Pullups", 15.0, "reps", "Athleticism"),
            Goal::new("Job Apps", 5.0, "apps", "Career"),
            Goal::new("DSA Problems", 3.0, "q's", "Career"),
        ];
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let entries = vec![LedgerEntry::new(day, "Pullups", 6.0)];

        let rows = join_progress(&goals, &entries);
        let names: Vec<_> = rows.iter().map(|r| r.goal_name.as_str()).collect();
        assert_eq!(names, vec!["DSA Problems", "Job Apps", "Pullups"]);
        assert_eq!(rows[2].current, 6.0);
        assert_eq!(rows[0].current, 0.0);
    }

    #[test]
    fn test_todays_progress_is_idempotent() {
        let store: Arc<dyn CoachStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        store.upsert_entry(&LedgerEntry::new(day, "Dips", 10.0)).unwrap();
        let aggregator = ProgressAggregator::new(store, Arc::new(FixedClock::at(day, 9, 0)));

        let first = aggregator.todays_progress().unwrap();
        let second = aggregator.todays_progress().unwrap();
        assert_eq!(first, second);
        let dips = first.iter().find(|p| p.goal_name == "Dips").unwrap();
        assert_eq!(dips.completion(), Completion::Fraction(0.5));
    }

    #[test]
    fn test_summary_line_formats() {
        let row = GoalProgress {
            category: "Career".to_string(),
            goal_name: "Deep Work".to_string(),
            target: 4.0,
            unit: "hours".to_string(),
            current: 1.5,
        };
        assert_eq!(row.summary_line(), "Deep Work [Career]: 1.5/4 hours (38%)");
    }
}
