//! Conversation orchestrator
//!
//! One call per user message:
//! 1. Parse structured updates out of the text and write them
//! 2. Route explicit commands (plan, review day, status, done)
//! 3. Otherwise build a context prompt and ask the model for a coaching reply
//!
//! Writes from step 1 are never rolled back, whatever happens afterwards.

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{ChatTurn, CoachStore, FoodLogEntry, Goal, LedgerEntry, MealType, NewFoodEntry, Sender};
use crate::error::{CoachError, StoreError};
use crate::interpreter::{CommandInterpreter, Intent};
use crate::llm::{ModelOutcome, ModelRouter};
use crate::logging;
use crate::memory::{ProfileMemory, RewriteOutcome};
use crate::planner::{PlanGenerator, PlanOutcome};
use crate::progress::{format_progress_for_prompt, trim_number, GoalProgress, ProgressAggregator};
use crate::prompts;
use crate::schedule::{format_schedule, MarkDone, Schedule};

pub const WEIGHT_GOAL: &str = "Weight";
const REVIEW_CHAT_TURNS: usize = 10;
const QUICK_LOG_PLAN: &str = "Quick Log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Plan,
    Review,
    Status,
    Done,
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_phrase(words: &[String], phrase: &[&str]) -> bool {
    words
        .windows(phrase.len())
        .any(|w| w.iter().zip(phrase).all(|(a, b)| a == b))
}

/// Explicit commands. Status and done only count when the message carried no
/// structured update, so "plyo done" logs a session instead of closing a task.
pub fn detect_command(text: &str, has_intents: bool) -> Option<Command> {
    let words = words(text);
    let has = |w: &str| words.iter().any(|x| x == w);

    if has("plan") {
        return Some(Command::Plan);
    }
    if has_phrase(&words, &["review", "day"]) || has_phrase(&words, &["end", "day"]) {
        return Some(Command::Review);
    }
    if has_intents {
        return None;
    }
    if has("status") || has("next") {
        return Some(Command::Status);
    }
    if has("done") {
        return Some(Command::Done);
    }
    None
}

/// One successfully written intent.
#[derive(Debug, Clone, PartialEq)]
struct SavedUpdate {
    label: String,
    /// Lowercase word the reply has to mention to count as acknowledging it.
    key: String,
}

fn confirmation(saved: &[SavedUpdate]) -> String {
    let labels: Vec<&str> = saved.iter().map(|s| s.label.as_str()).collect();
    format!("Logged {}.", labels.join(", "))
}

fn acknowledges(reply: &str, saved: &[SavedUpdate]) -> bool {
    let reply = reply.to_lowercase();
    reply.contains("logged") || saved.iter().all(|s| reply.contains(&s.key))
}

pub struct Orchestrator {
    store: Arc<dyn CoachStore>,
    clock: Arc<dyn Clock>,
    router: Arc<ModelRouter>,
    interpreter: CommandInterpreter,
    schedule: Arc<Schedule>,
    planner: PlanGenerator,
    aggregator: ProgressAggregator,
    profile: ProfileMemory,
    history_window: usize,
    session_id: String,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CoachStore>,
        clock: Arc<dyn Clock>,
        router: Arc<ModelRouter>,
        interpreter: CommandInterpreter,
        profile: ProfileMemory,
        history_window: usize,
    ) -> Self {
        let schedule = Arc::new(Schedule::new(store.clone(), clock.clone()));
        let planner = PlanGenerator::new(router.clone(), schedule.clone(), clock.clone());
        let aggregator = ProgressAggregator::new(store.clone(), clock.clone());
        let session_id = uuid::Uuid::new_v4().to_string();
        logging::log_conversation(Some(&session_id), "Session started");

        Self {
            store,
            clock,
            router,
            interpreter,
            schedule,
            planner,
            aggregator,
            profile,
            history_window,
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn store(&self) -> &Arc<dyn CoachStore> {
        &self.store
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn todays_progress(&self) -> Result<Vec<GoalProgress>, CoachError> {
        Ok(self.aggregator.todays_progress()?)
    }

    /// Returns false when a goal with that name already exists.
    pub fn add_goal(&self, name: &str, target: f64, unit: &str, category: &str) -> Result<bool, CoachError> {
        let added = self.store.add_goal(&Goal::new(name.trim(), target, unit.trim(), category.trim()))?;
        if added {
            logging::log_ledger(Some(&self.session_id), &format!(
                "Added goal {} ({} {}, {})", name, trim_number(target), unit, category
            ));
        }
        Ok(added)
    }

    pub fn weight_logged_today(&self) -> Result<bool, CoachError> {
        Ok(self.store.entry(self.clock.today(), WEIGHT_GOAL)?.is_some())
    }

    pub fn log_weight(&self, kg: f64) -> Result<(), CoachError> {
        self.store
            .upsert_entry(&LedgerEntry::new(self.clock.today(), WEIGHT_GOAL, kg))?;
        logging::log_ledger(Some(&self.session_id), &format!("Weight = {} kg", trim_number(kg)));
        Ok(())
    }

    /// Set today's value for a goal directly. Returns the stored goal name,
    /// or `None` when no goal matches.
    pub fn set_entry(&self, goal: &str, value: f64) -> Result<Option<String>, CoachError> {
        let Some(name) = self.goal_name(goal)? else {
            return Ok(None);
        };
        self.store
            .upsert_entry(&LedgerEntry::new(self.clock.today(), &name, value))?;
        logging::log_ledger(Some(&self.session_id), &format!("{} = {} (direct)", name, trim_number(value)));
        Ok(Some(name))
    }

    /// Reset today's value for a goal to zero.
    pub fn undo_entry(&self, goal: &str) -> Result<Option<String>, CoachError> {
        self.set_entry(goal, 0.0)
    }

    /// Record a meal with what was on offer next to what was eaten.
    pub fn log_meal(&self, meal_type: MealType, menu: &str, ate: &str) -> Result<FoodLogEntry, CoachError> {
        let entry = self.store.append_food(&NewFoodEntry {
            date: self.clock.today(),
            time: self.clock.time_of_day(),
            meal_type,
            planned: menu.trim().to_string(),
            actual: ate.trim().to_string(),
        })?;
        logging::log_ledger(Some(&self.session_id), &format!(
            "{}: {} (menu: {})", meal_type.as_str(), entry.actual, entry.planned
        ));
        Ok(entry)
    }

    fn goal_name(&self, goal: &str) -> Result<Option<String>, CoachError> {
        let goal = goal.trim();
        Ok(self
            .store
            .goal_names()?
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(goal)))
    }

    fn append_turn(&self, sender: Sender, message: &str) -> Result<(), StoreError> {
        self.store.append_chat(&ChatTurn {
            timestamp: self.clock.now(),
            sender,
            message: message.to_string(),
        })
    }

    /// Write one intent. Metric and boolean updates replace the day's value.
    fn apply_intent(&self, intent: &Intent) -> Result<SavedUpdate, StoreError> {
        let today = self.clock.today();
        let saved = match intent {
            Intent::LogMetric { goal_name, value } => {
                self.store.upsert_entry(&LedgerEntry::new(today, goal_name, *value))?;
                SavedUpdate {
                    label: format!("{} = {}", goal_name, trim_number(*value)),
                    key: goal_name.to_lowercase(),
                }
            }
            Intent::MarkBoolean { goal_name } => {
                self.store.upsert_entry(&LedgerEntry::new(today, goal_name, 1.0))?;
                SavedUpdate {
                    label: format!("{} done", goal_name),
                    key: goal_name.to_lowercase(),
                }
            }
            Intent::LogFood { meal_type, description } => {
                self.store.append_food(&NewFoodEntry {
                    date: today,
                    time: self.clock.time_of_day(),
                    meal_type: *meal_type,
                    planned: QUICK_LOG_PLAN.to_string(),
                    actual: description.clone(),
                })?;
                let label = match meal_type {
                    MealType::QuickLog => format!("meal: {}", description),
                    other => format!("{}: {}", other.as_str(), description),
                };
                SavedUpdate {
                    label,
                    key: description.to_lowercase(),
                }
            }
        };
        logging::log_ledger(Some(&self.session_id), &saved.label);
        Ok(saved)
    }

    fn apply_intents(&self, intents: &[Intent]) -> Result<Vec<SavedUpdate>, CoachError> {
        let mut saved: Vec<SavedUpdate> = Vec::with_capacity(intents.len());
        for intent in intents {
            match self.apply_intent(intent) {
                Ok(update) => saved.push(update),
                Err(source) => {
                    let failed = match intent {
                        Intent::LogMetric { goal_name, value } => format!("{} = {}", goal_name, trim_number(*value)),
                        Intent::MarkBoolean { goal_name } => format!("{} done", goal_name),
                        Intent::LogFood { description, .. } => format!("meal '{}'", description),
                    };
                    logging::log_error(Some(&self.session_id), &format!("Failed to save {}: {}", failed, source));
                    return Err(CoachError::Persistence {
                        saved: saved.into_iter().map(|s| s.label).collect(),
                        failed,
                        source,
                    });
                }
            }
        }
        Ok(saved)
    }

    /// Handle one raw chat message and return the reply to show.
    ///
    /// Any failure is reported together with what this message already saved.
    pub async fn handle_input(&self, raw: &str) -> Result<String, CoachError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok("Nothing to do. Try 'Plan my day' or 'Did 15 pullups'.".to_string());
        }

        let history = self
            .store
            .recent_chat(self.history_window)
            .map_err(|e| self.interrupted(&[], e.into()))?;
        self.append_turn(Sender::User, raw)
            .map_err(|e| self.interrupted(&[], e.into()))?;

        let intents = self.interpreter.parse(raw);
        let saved = self.apply_intents(&intents)?;

        self.respond(raw, &history, !intents.is_empty(), &saved)
            .await
            .map_err(|e| self.interrupted(&saved, e))
    }

    fn interrupted(&self, saved: &[SavedUpdate], source: CoachError) -> CoachError {
        logging::log_error(Some(&self.session_id), &format!("Message failed after saving {}: {}", saved.len(), source));
        CoachError::Interrupted {
            saved: saved.iter().map(|s| s.label.clone()).collect(),
            source: Box::new(source),
        }
    }

    async fn respond(
        &self,
        raw: &str,
        history: &[ChatTurn],
        has_intents: bool,
        saved: &[SavedUpdate],
    ) -> Result<String, CoachError> {
        let reply = match detect_command(raw, has_intents) {
            Some(command) => {
                logging::log_conversation(Some(&self.session_id), &format!("Command {:?}", command));
                let body = self.run_command(command, raw).await?;
                if saved.is_empty() {
                    body
                } else {
                    format!("{}\n{}", confirmation(saved), body)
                }
            }
            None => self.coach_reply(raw, history, saved).await?,
        };

        self.append_turn(Sender::Assistant, &reply)?;
        Ok(reply)
    }

    async fn run_command(&self, command: Command, raw: &str) -> Result<String, CoachError> {
        let session = Some(self.session_id.as_str());
        match command {
            Command::Plan => {
                let progress = self.aggregator.todays_progress()?;
                let profile = match self.profile.read() {
                    Ok(text) => Some(text),
                    Err(e) => {
                        logging::log_error(session, &format!("Could not read profile: {}", e));
                        None
                    }
                };
                let outcome = self
                    .planner
                    .generate_plan(raw, &progress, profile.as_deref(), session)
                    .await?;
                Ok(match outcome {
                    PlanOutcome::Locked(tasks) => format!("PLAN LOCKED.\n{}", format_schedule(&tasks)),
                    PlanOutcome::NoTasks { .. } => {
                        "Could not build a plan: the model did not answer with 'HH:MM|task' lines. Your schedule is unchanged."
                            .to_string()
                    }
                    PlanOutcome::ModelFailed { reason } => {
                        format!("Could not build a plan: {}. Your schedule is unchanged.", reason)
                    }
                })
            }
            Command::Review => {
                let logs = format_progress_for_prompt(&self.aggregator.todays_progress()?);
                let chat = prompts::format_chat(&self.store.recent_chat(REVIEW_CHAT_TURNS)?);
                let outcome = self
                    .profile
                    .rewrite(&self.router, &logs, &chat, session)
                    .await?;
                Ok(match outcome {
                    RewriteOutcome::Updated => {
                        "Profile updated. I will use it to adjust tomorrow's plan. Go to sleep.".to_string()
                    }
                    RewriteOutcome::Kept { reason } => {
                        format!("Profile not updated: {}. The old profile was kept.", reason)
                    }
                })
            }
            Command::Status => Ok(match self.schedule.current_mission(self.clock.today())? {
                Some(task) => format!("CURRENT MISSION ({}) {}", task.time_slot, task.task),
                None => "No active missions.".to_string(),
            }),
            Command::Done => {
                let Some(task) = self.schedule.current_mission(self.clock.today())? else {
                    return Ok("No task to complete.".to_string());
                };
                Ok(match self.schedule.mark_done(task.id)? {
                    MarkDone::Completed(task) | MarkDone::AlreadyDone(task) => {
                        format!("Task complete: {} {}. Type 'status' for the next one.", task.time_slot, task.task)
                    }
                    MarkDone::NotFound => "No task to complete.".to_string(),
                })
            }
        }
    }

    async fn coach_reply(
        &self,
        raw: &str,
        history: &[ChatTurn],
        saved: &[SavedUpdate],
    ) -> Result<String, CoachError> {
        let progress = self.aggregator.todays_progress()?;
        let update = if saved.is_empty() {
            String::new()
        } else {
            format!("Saved: {}", saved.iter().map(|s| s.label.as_str()).collect::<Vec<_>>().join("; "))
        };

        let prompt = prompts::coach_reply_prompt(
            &self.clock.time_of_day(),
            &format_progress_for_prompt(&progress),
            &update,
            &prompts::format_chat(history),
            raw,
        );

        Ok(match self.router.complete(&prompt, Some(&self.session_id)).await {
            ModelOutcome::Reply { text, .. } => {
                let text = text.trim().to_string();
                if saved.is_empty() || acknowledges(&text, saved) {
                    text
                } else {
                    format!("{}\n{}", confirmation(saved), text)
                }
            }
            ModelOutcome::Failed { reason, .. } => {
                if saved.is_empty() {
                    format!("Coach is offline ({}). Nothing was logged from this message.", reason)
                } else {
                    format!("Coach is offline ({}). Your update was saved: {}.", reason, confirmation_list(saved))
                }
            }
        })
    }
}

fn confirmation_list(saved: &[SavedUpdate]) -> String {
    saved.iter().map(|s| s.label.as_str()).collect::<Vec<_>>().join(", ")
}
