use chrono::NaiveTime;
use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{PlannedTask, ScheduleTask};
use crate::error::StoreResult;
use crate::llm::{ModelOutcome, ModelRouter};
use crate::logging;
use crate::progress::{format_progress_for_prompt, GoalProgress};
use crate::prompts;
use crate::schedule::Schedule;

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    /// Today's schedule was replaced with these tasks.
    Locked(Vec<ScheduleTask>),
    /// The model answered but no `HH:MM|task` line survived parsing.
    NoTasks { reply: String },
    ModelFailed { reason: String },
}

/// Zero-pad "9:00" to "09:00"; anything that is not a time is kept as written.
fn normalize_slot(slot: &str) -> String {
    NaiveTime::parse_from_str(slot, "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|_| slot.to_string())
}

/// Keep lines containing `|`, split on the first one, drop empty halves.
pub fn parse_plan_lines(text: &str) -> Vec<PlannedTask> {
    text.lines()
        .filter_map(|line| line.split_once('|'))
        .map(|(slot, task)| (slot.trim(), task.trim()))
        .filter(|(slot, task)| !slot.is_empty() && !task.is_empty())
        .map(|(slot, task)| PlannedTask::new(&normalize_slot(slot), task))
        .collect()
}

pub struct PlanGenerator {
    router: Arc<ModelRouter>,
    schedule: Arc<Schedule>,
    clock: Arc<dyn Clock>,
}

impl PlanGenerator {
    pub fn new(router: Arc<ModelRouter>, schedule: Arc<Schedule>, clock: Arc<dyn Clock>) -> Self {
        Self {
            router,
            schedule,
            clock,
        }
    }

    /// Ask the model for today's plan. The schedule is only touched when the
    /// reply yields at least one task.
    pub async fn generate_plan(
        &self,
        request: &str,
        progress: &[GoalProgress],
        profile: Option<&str>,
        session: Option<&str>,
    ) -> StoreResult<PlanOutcome> {
        let prompt = prompts::plan_prompt(
            &self.clock.time_of_day(),
            &format_progress_for_prompt(progress),
            profile,
            request,
        );

        let reply = match self.router.complete(&prompt, session).await {
            ModelOutcome::Reply { text, .. } => text,
            ModelOutcome::Failed { reason, .. } => {
                logging::log_schedule(session, &format!("Plan generation failed: {}", reason));
                return Ok(PlanOutcome::ModelFailed { reason });
            }
        };

        let tasks = parse_plan_lines(&reply);
        if tasks.is_empty() {
            logging::log_schedule(session, "Model reply had no HH:MM|task lines, keeping old plan");
            return Ok(PlanOutcome::NoTasks { reply });
        }

        let stored = self.schedule.replace_plan(self.clock.today(), &tasks)?;
        Ok(PlanOutcome::Locked(stored))
    }
}
