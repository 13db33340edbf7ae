//! Keyword-driven extraction of structured updates from chat text.
//!
//! This is a heuristic, not a grammar. Every trigger that matches produces
//! an intent; overlapping triggers for the same goal are all emitted.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::db::MealType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Intent {
    LogMetric { goal_name: String, value: f64 },
    LogFood { meal_type: MealType, description: String },
    MarkBoolean { goal_name: String },
}

const NUMBER: &str = r"(\d+(?:\.\d+)?)";
/// A metric trigger with no number counts as one only after "did".
const METRIC_COMPLETION: &str = "did";
/// Boolean goals accept either word.
const BOOLEAN_COMPLETION: [&str; 2] = ["did", "done"];
const MEAL_WORDS: [(&str, MealType); 5] = [
    ("breakfast", MealType::Breakfast),
    ("lunch", MealType::Lunch),
    ("snacks", MealType::Snacks),
    ("snack", MealType::Snacks),
    ("dinner", MealType::Dinner),
];

struct MetricTrigger {
    goal_name: String,
    present: Regex,
    before: Regex,
    after: Regex,
    /// Words of other goals' triggers, which may not sit between a number and this trigger.
    foreign: Vec<String>,
}

struct BooleanTrigger {
    goal_name: String,
    present: Regex,
}

/// Trigger phrase → canonical goal name tables.
#[derive(Debug, Clone)]
pub struct TriggerTable {
    pub metrics: Vec<(String, String)>,
    pub booleans: Vec<(String, String)>,
    pub food_verbs: Vec<String>,
}

impl Default for TriggerTable {
    fn default() -> Self {
        let pairs = |items: &[(&str, &str)]| {
            items
                .iter()
                .map(|(k, g)| (k.to_string(), g.to_string()))
                .collect::<Vec<_>>()
        };
        Self {
            metrics: pairs(&[
                ("pullups", "Pullups"),
                ("pull ups", "Pullups"),
                ("dips", "Dips"),
                ("pushups", "Pushups"),
                ("dsa", "DSA Problems"),
                ("problems", "DSA Problems"),
                ("apps", "Job Apps"),
                ("deep work", "Deep Work"),
                ("weight", "Weight"),
            ]),
            booleans: pairs(&[("plyo", "Plyometrics")]),
            food_verbs: ["ate", "had", "consumed", "mess"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TriggerTable {
    pub fn with_metric(mut self, trigger: &str, goal_name: &str) -> Self {
        self.metrics.push((trigger.to_lowercase(), goal_name.to_string()));
        self
    }

    pub fn with_boolean(mut self, trigger: &str, goal_name: &str) -> Self {
        self.booleans.push((trigger.to_lowercase(), goal_name.to_string()));
        self
    }
}

pub struct CommandInterpreter {
    metrics: Vec<MetricTrigger>,
    booleans: Vec<BooleanTrigger>,
    food: Option<Regex>,
    did: Regex,
    completion: Regex,
}

fn word(phrase: &str) -> String {
    format!(r"\b{}\b", regex::escape(phrase))
}

impl CommandInterpreter {
    pub fn new(table: &TriggerTable) -> Result<Self, regex::Error> {
        let mut metrics = Vec::with_capacity(table.metrics.len());
        for (trigger, goal_name) in &table.metrics {
            let phrase = word(&trigger.to_lowercase());
            metrics.push(MetricTrigger {
                goal_name: goal_name.clone(),
                present: Regex::new(&phrase)?,
                // "15 pullups", "3 dsa problems", "2 hours deep work"
                before: Regex::new(&format!(r"{}\s*(?:([a-z']+)\s+)?{}", NUMBER, phrase))?,
                // "pullups 15", "weight: 72.5"
                after: Regex::new(&format!(r"{}\s*[:=-]?\s*{}", phrase, NUMBER))?,
                foreign: table
                    .metrics
                    .iter()
                    .filter(|(_, other)| other != goal_name)
                    .flat_map(|(t, _)| t.to_lowercase().split_whitespace().map(str::to_string).collect::<Vec<_>>())
                    .collect(),
            });
        }

        let mut booleans = Vec::with_capacity(table.booleans.len());
        for (trigger, goal_name) in &table.booleans {
            booleans.push(BooleanTrigger {
                goal_name: goal_name.clone(),
                present: Regex::new(&word(&trigger.to_lowercase()))?,
            });
        }

        let food = if table.food_verbs.is_empty() {
            None
        } else {
            let verbs = table
                .food_verbs
                .iter()
                .map(|v| regex::escape(&v.to_lowercase()))
                .collect::<Vec<_>>()
                .join("|");
            // A sentence ends at . ! ? followed by whitespace, so "1.5 rotis" stays whole
            Some(Regex::new(&format!(r"\b(?:{})\b\s+(.+?)(?:[.!?](?:\s|$)|\n|$)", verbs))?)
        };

        let did = Regex::new(&word(METRIC_COMPLETION))?;
        let completion = Regex::new(&format!(r"\b(?:{})\b", BOOLEAN_COMPLETION.join("|")))?;

        Ok(Self {
            metrics,
            booleans,
            food,
            did,
            completion,
        })
    }

    pub fn parse(&self, text: &str) -> Vec<Intent> {
        let text = text.to_lowercase();
        let did = self.did.is_match(&text);
        let mut intents = Vec::new();

        for trigger in &self.metrics {
            if !trigger.present.is_match(&text) {
                continue;
            }
            let value = trigger
                .before
                .captures_iter(&text)
                .find(|c| {
                    c.get(2)
                        .map_or(true, |between| !trigger.foreign.iter().any(|w| w == between.as_str()))
                })
                .or_else(|| trigger.after.captures(&text))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok());
            match value {
                Some(value) => intents.push(Intent::LogMetric {
                    goal_name: trigger.goal_name.clone(),
                    value,
                }),
                // "did dsa" counts as one
                None if did => intents.push(Intent::LogMetric {
                    goal_name: trigger.goal_name.clone(),
                    value: 1.0,
                }),
                None => {}
            }
        }

        if let Some(food) = &self.food {
            if let Some(description) = food
                .captures(&text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|d| !d.is_empty())
            {
                intents.push(Intent::LogFood {
                    meal_type: detect_meal_type(&text),
                    description,
                });
            }
        }

        if self.completion.is_match(&text) {
            for trigger in &self.booleans {
                if trigger.present.is_match(&text) {
                    intents.push(Intent::MarkBoolean {
                        goal_name: trigger.goal_name.clone(),
                    });
                }
            }
        }

        intents
    }
}

fn detect_meal_type(text: &str) -> MealType {
    MEAL_WORDS
        .iter()
        .find(|(w, _)| {
            text.split(|c: char| !c.is_alphanumeric())
                .any(|token| token == *w)
        })
        .map(|(_, meal)| *meal)
        .unwrap_or(MealType::QuickLog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpreter() -> CommandInterpreter {
        CommandInterpreter::new(&TriggerTable::default()).unwrap()
    }

    fn metric(goal: &str, value: f64) -> Intent {
        Intent::LogMetric {
            goal_name: goal.to_string(),
            value,
        }
    }

    #[test]
    fn test_number_before_trigger() {
        assert_eq!(interpreter().parse("did 15 pullups"), vec![metric("Pullups", 15.0)]);
    }

    #[test]
    fn test_missing_number_with_did_counts_one() {
        assert_eq!(interpreter().parse("did dsa"), vec![metric("DSA Problems", 1.0)]);
    }

    #[test]
    fn test_food_captures_rest_of_sentence() {
        assert_eq!(
            interpreter().parse("ate 2 eggs and toast"),
            vec![Intent::LogFood {
                meal_type: MealType::QuickLog,
                description: "2 eggs and toast".to_string(),
            }]
        );
    }

    #[test]
    fn test_no_triggers_is_empty() {
        assert!(interpreter().parse("how is the weather today?").is_empty());
        assert!(interpreter().parse("").is_empty());
    }

    #[test]
    fn test_multiple_intents_in_one_input() {
        let intents = interpreter().parse("Did 15 pullups and ate 2 eggs");
        assert_eq!(
            intents,
            vec![
                metric("Pullups", 15.0),
                Intent::LogFood {
                    meal_type: MealType::QuickLog,
                    description: "2 eggs".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_case_insensitive_and_decimal_after_trigger() {
        assert_eq!(interpreter().parse("WEIGHT: 72.5"), vec![metric("Weight", 72.5)]);
    }

    #[test]
    fn test_overlapping_triggers_all_emitted() {
        let intents = interpreter().parse("did 3 dsa problems");
        assert_eq!(intents, vec![metric("DSA Problems", 3.0), metric("DSA Problems", 3.0)]);
    }

    #[test]
    fn test_trigger_without_number_or_did_is_ignored() {
        assert!(interpreter().parse("thinking about pullups").is_empty());
    }

    #[test]
    fn test_boolean_goal_needs_completion_word() {
        assert_eq!(
            interpreter().parse("plyo done"),
            vec![Intent::MarkBoolean {
                goal_name: "Plyometrics".to_string()
            }]
        );
        assert!(interpreter().parse("plyo later").is_empty());
    }

    #[test]
    fn test_meal_type_detected_and_sentence_bounded() {
        let intents = interpreter().parse("Had poha for breakfast. Feeling good");
        assert_eq!(
            intents,
            vec![Intent::LogFood {
                meal_type: MealType::Breakfast,
                description: "poha for breakfast".to_string(),
            }]
        );
    }

    #[test]
    fn test_trigger_words_need_word_boundaries() {
        // "late" and "update" contain "ate"
        assert!(interpreter().parse("running late, will update later").is_empty());
    }

    #[test]
    fn test_custom_table_entries() {
        let table = TriggerTable::default()
            .with_metric("km", "Running")
            .with_boolean("stretch", "Stretching");
        let interpreter = CommandInterpreter::new(&table).unwrap();
        assert_eq!(
            interpreter.parse("did 5 km and stretch"),
            vec![
                metric("Running", 5.0),
                Intent::MarkBoolean {
                    goal_name: "Stretching".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_decimal_does_not_end_food_sentence() {
        assert_eq!(
            interpreter().parse("ate 1.5 rotis and dal. Then slept"),
            vec![Intent::LogFood {
                meal_type: MealType::QuickLog,
                description: "1.5 rotis and dal".to_string(),
            }]
        );
        assert_eq!(
            interpreter().parse("had 2.5 eggs"),
            vec![Intent::LogFood {
                meal_type: MealType::QuickLog,
                description: "2.5 eggs".to_string(),
            }]
        );
    }

    #[test]
    fn test_done_alone_does_not_log_a_metric() {
        assert!(interpreter().parse("pullups done").is_empty());
        assert_eq!(interpreter().parse("did pullups"), vec![metric("Pullups", 1.0)]);
    }

    #[test]
    fn test_number_is_not_borrowed_across_goals() {
        assert_eq!(
            interpreter().parse("did 15 pullups dips"),
            vec![metric("Pullups", 15.0), metric("Dips", 1.0)]
        );
        assert_eq!(interpreter().parse("15 pullups dips"), vec![metric("Pullups", 15.0)]);
    }
}
