pub mod anthropic;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod gemini;
pub mod interpreter;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod prompts;
pub mod schedule;
pub mod sheet;

use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use clock::{Clock, SystemClock};
use config::{Args, CoachConfig};
use error::CoachError;
use interpreter::{CommandInterpreter, TriggerTable};
use db::MealType;
use memory::ProfileMemory;
use orchestrator::Orchestrator;
use progress::trim_number;
use schedule::format_schedule;

const HELP: &str = "Talk normally: 'Did 15 pullups', 'Had poha for breakfast', 'plyo done'.
Commands: 'Plan my day', 'status', 'done', 'Review day'.
Dashboard:
  /progress            today's goals
  /schedule            today's plan
  /food                today's meals
  /goals               goal list
  /goal Name|target|unit|category   add a goal
  /log <goal>|<value>  set today's value for a goal
  /undo <goal>         reset today's value to zero
  /meal <Breakfast|Lunch|Snacks|Dinner>|<menu>|<what you ate>
  /history             every ledger entry, newest first
  /consistency         entries logged per day
  /metric <goal>       one goal over time
  /help  /quit";

// ============ App Initialization ============

/// Open the store, start logging and wire up the orchestrator.
pub fn init_app(config: &CoachConfig, clock: Arc<dyn Clock>) -> Result<Orchestrator, CoachError> {
    if let Err(e) = logging::init_logging(&config.log_dir) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    if let Ok(removed) = logging::cleanup_old_logs(&config.log_dir) {
        if removed > 0 {
            logging::log_conversation(None, &format!("Removed {} old log files", removed));
        }
    }

    let store = config.open_store()?;
    let router = Arc::new(config.model_router()?);
    let interpreter = CommandInterpreter::new(&TriggerTable::default())
        .map_err(|e| CoachError::Config(format!("bad trigger table: {}", e)))?;

    logging::log_conversation(None, &format!(
        "App initialized ({:?} at {}, {:?})",
        config.backend,
        config.db_path.display(),
        config.provider
    ));

    Ok(Orchestrator::new(
        store,
        clock,
        router,
        interpreter,
        ProfileMemory::new(&config.profile_path),
        config.history_window,
    ))
}

// ============ Dashboard ============

fn progress_text(coach: &Orchestrator) -> Result<String, CoachError> {
    let progress = coach.todays_progress()?;
    if progress.is_empty() {
        return Ok("No goals yet. Add one with /goal Name|target|unit|category".to_string());
    }
    let mut lines = Vec::new();
    let mut category = "";
    for p in &progress {
        if p.category != category {
            lines.push(format!("{}:", p.category));
            category = p.category.as_str();
        }
        let mark = if p.completion().is_complete() { "[x]" } else { "[ ]" };
        lines.push(format!("  {} {}", mark, p.summary_line()));
    }
    Ok(lines.join("\n"))
}

fn schedule_text(coach: &Orchestrator) -> Result<String, CoachError> {
    let schedule = coach.schedule();
    Ok(format_schedule(&schedule.full_schedule(schedule.today())?))
}

fn food_text(coach: &Orchestrator) -> Result<String, CoachError> {
    let food = coach.store().food_for_date(coach.schedule().today())?;
    if food.is_empty() {
        return Ok("No meals logged today.".to_string());
    }
    Ok(food
        .iter()
        .map(|f| format!("{} [{}] {} (planned: {})", f.time, f.meal_type.as_str(), f.actual, f.planned))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn goals_text(coach: &Orchestrator) -> Result<String, CoachError> {
    Ok(coach
        .store()
        .goals()?
        .iter()
        .map(|g| format!("{} - {} {} ({})", g.name, trim_number(g.target), g.unit, g.category))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn history_text(coach: &Orchestrator) -> Result<String, CoachError> {
    let rows = coach.store().raw_history()?;
    if rows.is_empty() {
        return Ok("Nothing logged yet.".to_string());
    }
    Ok(rows
        .iter()
        .map(|e| match &e.note {
            Some(note) => format!("{}  {}  {}  ({})", e.date, e.goal_name, trim_number(e.value), note),
            None => format!("{}  {}  {}", e.date, e.goal_name, trim_number(e.value)),
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

fn consistency_text(coach: &Orchestrator) -> Result<String, CoachError> {
    let days = coach.store().consistency_data()?;
    if days.is_empty() {
        return Ok("Nothing logged yet.".to_string());
    }
    Ok(days
        .iter()
        .map(|(date, count)| format!("{}  {} entries", date, count))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn metric_text(coach: &Orchestrator, goal: &str) -> Result<String, CoachError> {
    let points = coach.store().metric_history(goal)?;
    if points.is_empty() {
        return Ok(format!("No entries for '{}'.", goal));
    }
    Ok(points
        .iter()
        .map(|(date, value)| format!("{}  {}", date, trim_number(*value)))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn add_goal_text(coach: &Orchestrator, input: &str) -> Result<String, CoachError> {
    let parts: Vec<&str> = input.split('|').map(str::trim).collect();
    let [name, target, unit, category] = parts.as_slice() else {
        return Ok("Usage: /goal Name|target|unit|category".to_string());
    };
    let Ok(target) = target.parse::<f64>() else {
        return Ok(format!("'{}' is not a number.", target));
    };
    if target <= 0.0 {
        return Ok("Target must be greater than zero.".to_string());
    }
    Ok(if coach.add_goal(name, target, unit, category)? {
        format!("Goal '{}' added.", name)
    } else {
        format!("Goal '{}' already exists.", name)
    })
}

fn log_text(coach: &Orchestrator, input: &str) -> Result<String, CoachError> {
    let Some((goal, value)) = input.split_once('|') else {
        return Ok("Usage: /log <goal>|<value>".to_string());
    };
    let value = value.trim();
    let Ok(value) = value.parse::<f64>() else {
        return Ok(format!("'{}' is not a number.", value));
    };
    if !value.is_finite() || value < 0.0 {
        return Ok("Value must be zero or more.".to_string());
    }
    Ok(match coach.set_entry(goal, value)? {
        Some(name) => format!("{} set to {} for today.", name, trim_number(value)),
        None => format!("No goal named '{}'. See /goals.", goal.trim()),
    })
}

fn undo_text(coach: &Orchestrator, goal: &str) -> Result<String, CoachError> {
    if goal.is_empty() {
        return Ok("Usage: /undo <goal>".to_string());
    }
    Ok(match coach.undo_entry(goal)? {
        Some(name) => format!("{} reset to 0 for today.", name),
        None => format!("No goal named '{}'. See /goals.", goal),
    })
}

fn meal_text(coach: &Orchestrator, input: &str) -> Result<String, CoachError> {
    const USAGE: &str = "Usage: /meal <Breakfast|Lunch|Snacks|Dinner>|<menu>|<what you ate>";
    let parts: Vec<&str> = input.split('|').map(str::trim).collect();
    let [meal, menu, ate] = parts.as_slice() else {
        return Ok(USAGE.to_string());
    };
    let meal_type = match MealType::from_str(meal) {
        Some(MealType::QuickLog) | None => return Ok(USAGE.to_string()),
        Some(meal_type) => meal_type,
    };
    if ate.is_empty() {
        return Ok(USAGE.to_string());
    }
    let entry = coach.log_meal(meal_type, menu, ate)?;
    Ok(format!(
        "{} logged at {}: ate {} (menu: {}).",
        entry.meal_type.as_str(),
        entry.time,
        entry.actual,
        entry.planned
    ))
}

/// Slash commands read the stores directly and never call the model.
/// Returns `None` for anything that should go to the conversation.
pub fn dashboard_command(coach: &Orchestrator, line: &str) -> Option<Result<String, CoachError>> {
    let line = line.trim();
    let rest = line.strip_prefix('/')?;
    let (command, arg) = rest.split_once(' ').unwrap_or((rest, ""));
    let arg = arg.trim();

    Some(match command.to_lowercase().as_str() {
        "progress" => progress_text(coach),
        "schedule" => schedule_text(coach),
        "food" => food_text(coach),
        "goals" => goals_text(coach),
        "goal" => add_goal_text(coach, arg),
        "log" => log_text(coach, arg),
        "undo" => undo_text(coach, arg),
        "meal" => meal_text(coach, arg),
        "history" => history_text(coach),
        "consistency" => consistency_text(coach),
        "metric" if !arg.is_empty() => metric_text(coach, arg),
        "metric" => Ok("Usage: /metric <goal name>".to_string()),
        "help" => Ok(HELP.to_string()),
        other => Ok(format!("Unknown command '/{}'. Try /help.", other)),
    })
}

// ============ Run ============

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

async fn morning_weight_check(coach: &Orchestrator, lines: &mut Lines<BufReader<Stdin>>) -> Result<(), CoachError> {
    if coach.weight_logged_today()? {
        return Ok(());
    }
    prompt("Morning check: weight in kg (empty to skip): ");
    let Some(line) = lines.next_line().await? else {
        return Ok(());
    };
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    match line.parse::<f64>() {
        Ok(kg) if kg > 0.0 => {
            coach.log_weight(kg)?;
            println!("Weight logged: {} kg", trim_number(kg));
        }
        _ => println!("'{}' is not a weight, skipped.", line),
    }
    Ok(())
}

async fn repl(config: CoachConfig) -> Result<(), CoachError> {
    let coach = init_app(&config, Arc::new(SystemClock))?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    morning_weight_check(&coach, &mut lines).await?;
    println!("Coach ready. /help for commands.");

    loop {
        prompt("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "/quit" | "/exit") {
            break;
        }

        let result = match dashboard_command(&coach, line) {
            Some(result) => result,
            None => coach.handle_input(line).await,
        };
        match result {
            Ok(reply) => println!("{}\n", reply),
            Err(e) => {
                logging::log_error(Some(coach.session_id()), &e.to_string());
                println!("{}\n", e);
            }
        }
    }

    logging::log_conversation(Some(coach.session_id()), "Session ended");
    Ok(())
}

pub fn run() -> Result<(), CoachError> {
    let _ = dotenvy::dotenv();
    let config = CoachConfig::from_args(Args::parse())?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(repl(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{CoachStore, LedgerEntry, SqliteStore};
    use crate::llm::testing::{router, ScriptedClient};
    use chrono::NaiveDate;

    fn coach() -> Orchestrator {
        let store: Arc<dyn CoachStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        store.upsert_entry(&LedgerEntry::new(date, "Pullups", 15.0)).unwrap();
        Orchestrator::new(
            store,
            Arc::new(FixedClock::at(date, 8, 0)),
            Arc::new(router(Arc::new(ScriptedClient::new(vec![])))),
            CommandInterpreter::new(&TriggerTable::default()).unwrap(),
            ProfileMemory::new(&std::env::temp_dir().join(format!("coach-profile-{}.md", uuid::Uuid::new_v4()))),
            10,
        )
    }

    fn run_command(coach: &Orchestrator, line: &str) -> String {
        dashboard_command(coach, line).unwrap().unwrap()
    }

    #[test]
    fn test_plain_text_is_not_a_dashboard_command() {
        assert!(dashboard_command(&coach(), "did 15 pullups").is_none());
    }

    #[test]
    fn test_progress_groups_by_category() {
        let text = run_command(&coach(), "/progress");
        let health = text.find("Health:").unwrap();
        let career = text.find("Career:").unwrap();
        let athleticism = text.find("Athleticism:").unwrap();
        assert!(health < career && career < athleticism);
        assert!(text.contains("[x] Pullups [Athleticism]: 15/15 reps (100%)"));
    }

    #[test]
    fn test_goal_add_and_duplicate() {
        let coach = coach();
        assert_eq!(run_command(&coach, "/goal Reading|30|pages|Mind"), "Goal 'Reading' added.");
        assert_eq!(run_command(&coach, "/goal Reading|10|pages|Mind"), "Goal 'Reading' already exists.");
        assert_eq!(run_command(&coach, "/goal Reading|0|pages|Mind"), "Target must be greater than zero.");
        assert!(run_command(&coach, "/goal Reading").starts_with("Usage"));
        assert!(run_command(&coach, "/goals").contains("Reading - 30 pages (Mind)"));
    }

    #[test]
    fn test_history_views() {
        let coach = coach();
        assert_eq!(run_command(&coach, "/history"), "2024-01-01  Pullups  15");
        assert_eq!(run_command(&coach, "/consistency"), "2024-01-01  1 entries");
        assert_eq!(run_command(&coach, "/metric Pullups"), "2024-01-01  15");
        assert_eq!(run_command(&coach, "/metric Dips"), "No entries for 'Dips'.");
        assert_eq!(run_command(&coach, "/schedule"), "No plan. Type 'Plan my day'.");
        assert_eq!(run_command(&coach, "/food"), "No meals logged today.");
        assert!(run_command(&coach, "/bogus").contains("Unknown command"));
    }

    #[test]
    fn test_direct_log_and_undo() {
        let coach = coach();
        assert_eq!(run_command(&coach, "/log dips|12"), "Dips set to 12 for today.");
        assert_eq!(run_command(&coach, "/log Pullups | 9"), "Pullups set to 9 for today.");
        assert!(run_command(&coach, "/progress").contains("Dips [Athleticism]: 12/20 reps"));
        assert_eq!(run_command(&coach, "/metric Pullups"), "2024-01-01  9");

        assert_eq!(run_command(&coach, "/undo dips"), "Dips reset to 0 for today.");
        assert_eq!(run_command(&coach, "/metric Dips"), "2024-01-01  0");

        assert_eq!(run_command(&coach, "/log Juggling|3"), "No goal named 'Juggling'. See /goals.");
        assert_eq!(run_command(&coach, "/log Dips|lots"), "'lots' is not a number.");
        assert_eq!(run_command(&coach, "/log Dips|-1"), "Value must be zero or more.");
        assert!(run_command(&coach, "/log Dips").starts_with("Usage"));
        assert!(run_command(&coach, "/undo").starts_with("Usage"));
    }

    #[test]
    fn test_meal_records_menu_and_plate() {
        let coach = coach();
        assert_eq!(
            run_command(&coach, "/meal lunch|Chola Bhatura, Rice, Dal|Only chola, 2 eggs"),
            "Lunch logged at 08:00: ate Only chola, 2 eggs (menu: Chola Bhatura, Rice, Dal)."
        );
        assert_eq!(
            run_command(&coach, "/food"),
            "08:00 [Lunch] Only chola, 2 eggs (planned: Chola Bhatura, Rice, Dal)"
        );
        assert!(run_command(&coach, "/meal brunch|eggs|eggs").starts_with("Usage"));
        assert!(run_command(&coach, "/meal dinner|dal").starts_with("Usage"));
    }
}
