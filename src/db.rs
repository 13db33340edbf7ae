use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::progress::GoalProgress;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Units that mark a goal as done/not-done instead of cumulative.
pub const BINARY_UNITS: [&str; 2] = ["bool", "session"];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Goal {
    pub name: String,
    pub target: f64,
    pub unit: String,
    pub category: String,
}

impl Goal {
    pub fn new(name: &str, target: f64, unit: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            target,
            unit: unit.to_string(),
            category: category.to_string(),
        }
    }

    pub fn is_binary(&self) -> bool {
        is_binary_unit(&self.unit)
    }
}

pub fn is_binary_unit(unit: &str) -> bool {
    BINARY_UNITS.iter().any(|u| u.eq_ignore_ascii_case(unit))
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LedgerEntry {
    pub date: NaiveDate,
    pub goal_name: String,
    pub value: f64,
    pub note: Option<String>,
}

impl LedgerEntry {
    pub fn new(date: NaiveDate, goal_name: &str, value: f64) -> Self {
        Self {
            date,
            goal_name: goal_name.to_string(),
            value,
            note: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MealType {
    Breakfast,
    Lunch,
    Snacks,
    Dinner,
    QuickLog,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "Breakfast",
            MealType::Lunch => "Lunch",
            MealType::Snacks => "Snacks",
            MealType::Dinner => "Dinner",
            MealType::QuickLog => "Quick Log",
        }
    }

    pub fn from_str(s: &str) -> Option<MealType> {
        match s.trim().to_lowercase().as_str() {
            "breakfast" => Some(MealType::Breakfast),
            "lunch" => Some(MealType::Lunch),
            "snack" | "snacks" => Some(MealType::Snacks),
            "dinner" => Some(MealType::Dinner),
            "quick log" | "quicklog" | "snack/meal" => Some(MealType::QuickLog),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFoodEntry {
    pub date: NaiveDate,
    pub time: String,
    pub meal_type: MealType,
    pub planned: String,
    pub actual: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FoodLogEntry {
    pub id: i64,
    pub date: NaiveDate,
    pub time: String,
    pub meal_type: MealType,
    pub planned: String,
    pub actual: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Done => "DONE",
        }
    }

    pub fn from_str(s: &str) -> Option<TaskStatus> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "DONE" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

/// A (time slot, task) pair before it has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub time_slot: String,
    pub task: String,
}

impl PlannedTask {
    pub fn new(time_slot: &str, task: &str) -> Self {
        Self {
            time_slot: time_slot.to_string(),
            task: task.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScheduleTask {
    pub id: i64,
    pub date: NaiveDate,
    pub time_slot: String,
    pub task: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Option<Sender> {
        match s {
            "user" => Some(Sender::User),
            "assistant" => Some(Sender::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatTurn {
    pub timestamp: NaiveDateTime,
    pub sender: Sender,
    pub message: String,
}

// ============ Storage Contract ============

/// Everything the coach needs from a persistence backend.
///
/// Implementations serialise their own access; `replace_schedule` must be
/// atomic with respect to `schedule_for_date` readers.
pub trait CoachStore: Send + Sync {
    /// Returns `false` when a goal with the same name already exists.
    fn add_goal(&self, goal: &Goal) -> StoreResult<bool>;
    fn goals(&self) -> StoreResult<Vec<Goal>>;

    /// Insert or replace the value for (date, goal_name).
    fn upsert_entry(&self, entry: &LedgerEntry) -> StoreResult<()>;
    fn entry(&self, date: NaiveDate, goal_name: &str) -> StoreResult<Option<LedgerEntry>>;
    fn entries_for_date(&self, date: NaiveDate) -> StoreResult<Vec<LedgerEntry>>;
    /// Every ledger row, newest date first.
    fn raw_history(&self) -> StoreResult<Vec<LedgerEntry>>;

    fn append_food(&self, entry: &NewFoodEntry) -> StoreResult<FoodLogEntry>;
    fn food_for_date(&self, date: NaiveDate) -> StoreResult<Vec<FoodLogEntry>>;

    /// Drop every task for `date` and insert `tasks` as PENDING, in one unit.
    fn replace_schedule(&self, date: NaiveDate, tasks: &[PlannedTask]) -> StoreResult<Vec<ScheduleTask>>;
    /// Tasks for `date` ordered by time slot.
    fn schedule_for_date(&self, date: NaiveDate) -> StoreResult<Vec<ScheduleTask>>;
    fn task(&self, id: i64) -> StoreResult<Option<ScheduleTask>>;
    /// Returns `false` when no task has this id.
    fn set_task_status(&self, id: i64, status: TaskStatus) -> StoreResult<bool>;

    fn append_chat(&self, turn: &ChatTurn) -> StoreResult<()>;
    /// Most recent `limit` turns, oldest first.
    fn recent_chat(&self, limit: usize) -> StoreResult<Vec<ChatTurn>>;

    /// Ledger entry counts per date, oldest first.
    fn consistency_data(&self) -> StoreResult<Vec<(NaiveDate, i64)>>;
    /// (date, value) for one goal, oldest first.
    fn metric_history(&self, goal_name: &str) -> StoreResult<Vec<(NaiveDate, f64)>>;

    /// Every goal left-joined with its ledger value for `date`.
    fn progress(&self, date: NaiveDate) -> StoreResult<Vec<GoalProgress>> {
        let goals = self.goals()?;
        let entries = self.entries_for_date(date)?;
        Ok(crate::progress::join_progress(&goals, &entries))
    }

    fn goal_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.goals()?.into_iter().map(|g| g.name).collect())
    }
}

/// Goals created on first run.
pub fn default_goals() -> Vec<Goal> {
    vec![
        Goal::new("Pullups", 15.0, "reps", "Athleticism"),
        Goal::new("Dips", 20.0, "reps", "Athleticism"),
        Goal::new("Plyometrics", 1.0, "session", "Athleticism"),
        Goal::new("Clean Eating", 1.0, "bool", "Athleticism"),
        Goal::new("DSA Problems", 3.0, "q's", "Career"),
        Goal::new("Job Apps", 5.0, "apps", "Career"),
        Goal::new("Deep Work", 4.0, "hours", "Career"),
        Goal::new("Weight", 75.0, "kg", "Health"),
    ]
}

/// Seed the default goals when the goal table is empty. Returns how many were added.
pub fn seed_default_goals(store: &dyn CoachStore) -> StoreResult<usize> {
    if !store.goals()?.is_empty() {
        return Ok(0);
    }
    let mut added = 0;
    for goal in default_goals() {
        if store.add_goal(&goal)? {
            added += 1;
        }
    }
    Ok(added)
}

pub fn validate_goal(goal: &Goal) -> StoreResult<()> {
    if goal.name.trim().is_empty() {
        return Err(StoreError::Invalid("goal name is empty".to_string()));
    }
    if !goal.target.is_finite() || goal.target <= 0.0 {
        return Err(StoreError::Invalid(format!(
            "target for '{}' must be positive, got {}",
            goal.name, goal.target
        )));
    }
    Ok(())
}

pub fn validate_entry(entry: &LedgerEntry) -> StoreResult<()> {
    if !entry.value.is_finite() || entry.value < 0.0 {
        return Err(StoreError::Invalid(format!(
            "value for '{}' must be non-negative, got {}",
            entry.goal_name, entry.value
        )));
    }
    Ok(())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

// ============ SQLite Backend ============

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        seed_default_goals(&store)?;
        Ok(store)
    }

    fn with_connection<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut *conn)?)
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        -- Goal definitions
        CREATE TABLE IF NOT EXISTS goals (
            name TEXT PRIMARY KEY,
            target REAL NOT NULL,
            unit TEXT NOT NULL,
            category TEXT NOT NULL
        );

        -- One row per (date, goal)
        CREATE TABLE IF NOT EXISTS daily_entries (
            date TEXT NOT NULL,
            goal_name TEXT NOT NULL,
            value REAL NOT NULL,
            note TEXT,
            PRIMARY KEY (date, goal_name)
        );

        -- Meals, append-only
        CREATE TABLE IF NOT EXISTS food_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            meal_type TEXT NOT NULL,
            menu_description TEXT NOT NULL,
            what_i_ate TEXT NOT NULL
        );

        -- Chat turns, append-only
        CREATE TABLE IF NOT EXISTS chat_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            sender TEXT NOT NULL,
            message TEXT NOT NULL
        );

        -- Daily plan
        CREATE TABLE IF NOT EXISTS schedule (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            time_slot TEXT NOT NULL,
            task TEXT NOT NULL,
            status TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_schedule_date ON schedule(date);
        ",
    )?;

    // Migration: older ledgers carried an `rpe` column and no note
    let has_note: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('daily_entries') WHERE name='note'",
            [],
            |row| Ok(row.get::<_, i64>(0)? > 0),
        )?;

    if !has_note {
        conn.execute("ALTER TABLE daily_entries ADD COLUMN note TEXT", [])?;
    }

    Ok(())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(message),
    )
}

fn date_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, format!("bad date '{}': {}", raw, e)))
}

fn ledger_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        date: date_column(row, 0)?,
        goal_name: row.get(1)?,
        value: row.get(2)?,
        note: row.get(3)?,
    })
}

fn food_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FoodLogEntry> {
    let meal: String = row.get(3)?;
    Ok(FoodLogEntry {
        id: row.get(0)?,
        date: date_column(row, 1)?,
        time: row.get(2)?,
        meal_type: MealType::from_str(&meal).unwrap_or(MealType::QuickLog),
        planned: row.get(4)?,
        actual: row.get(5)?,
    })
}

fn task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleTask> {
    let status: String = row.get(4)?;
    Ok(ScheduleTask {
        id: row.get(0)?,
        date: date_column(row, 1)?,
        time_slot: row.get(2)?,
        task: row.get(3)?,
        status: TaskStatus::from_str(&status)
            .ok_or_else(|| conversion_error(4, format!("unknown task status '{}'", status)))?,
    })
}

fn chat_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatTurn> {
    let raw_ts: String = row.get(0)?;
    let sender: String = row.get(1)?;
    Ok(ChatTurn {
        timestamp: NaiveDateTime::parse_from_str(&raw_ts, TIMESTAMP_FORMAT)
            .map_err(|e| conversion_error(0, format!("bad timestamp '{}': {}", raw_ts, e)))?,
        sender: Sender::from_str(&sender)
            .ok_or_else(|| conversion_error(1, format!("unknown sender '{}'", sender)))?,
        message: row.get(2)?,
    })
}

impl CoachStore for SqliteStore {
    // ============ Goals ============

    fn add_goal(&self, goal: &Goal) -> StoreResult<bool> {
        validate_goal(goal)?;
        self.with_connection(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO goals (name, target, unit, category) VALUES (?1, ?2, ?3, ?4)",
                params![goal.name, goal.target, goal.unit, goal.category],
            )?;
            Ok(inserted > 0)
        })
    }

    fn goals(&self) -> StoreResult<Vec<Goal>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT name, target, unit, category FROM goals ORDER BY name ASC")?;
            let goals = stmt.query_map([], |row| {
                Ok(Goal {
                    name: row.get(0)?,
                    target: row.get(1)?,
                    unit: row.get(2)?,
                    category: row.get(3)?,
                })
            })?;
            goals.collect()
        })
    }

    // ============ Daily Ledger ============

    fn upsert_entry(&self, entry: &LedgerEntry) -> StoreResult<()> {
        validate_entry(entry)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO daily_entries (date, goal_name, value, note) VALUES (?1, ?2, ?3, ?4)",
                params![format_date(entry.date), entry.goal_name, entry.value, entry.note],
            )?;
            Ok(())
        })
    }

    fn entry(&self, date: NaiveDate, goal_name: &str) -> StoreResult<Option<LedgerEntry>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT date, goal_name, value, note FROM daily_entries WHERE date = ?1 AND goal_name = ?2",
                params![format_date(date), goal_name],
                ledger_row,
            )
            .optional()
        })
    }

    fn entries_for_date(&self, date: NaiveDate) -> StoreResult<Vec<LedgerEntry>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date, goal_name, value, note FROM daily_entries WHERE date = ?1 ORDER BY goal_name ASC",
            )?;
            let entries = stmt.query_map(params![format_date(date)], ledger_row)?;
            entries.collect()
        })
    }

    fn raw_history(&self) -> StoreResult<Vec<LedgerEntry>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date, goal_name, value, note FROM daily_entries ORDER BY date DESC, goal_name ASC",
            )?;
            let entries = stmt.query_map([], ledger_row)?;
            entries.collect()
        })
    }

    // ============ Food Log ============

    fn append_food(&self, entry: &NewFoodEntry) -> StoreResult<FoodLogEntry> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO food_logs (date, time, meal_type, menu_description, what_i_ate)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    format_date(entry.date),
                    entry.time,
                    entry.meal_type.as_str(),
                    entry.planned,
                    entry.actual
                ],
            )?;
            Ok(FoodLogEntry {
                id: conn.last_insert_rowid(),
                date: entry.date,
                time: entry.time.clone(),
                meal_type: entry.meal_type,
                planned: entry.planned.clone(),
                actual: entry.actual.clone(),
            })
        })
    }

    fn food_for_date(&self, date: NaiveDate) -> StoreResult<Vec<FoodLogEntry>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, date, time, meal_type, menu_description, what_i_ate
                 FROM food_logs WHERE date = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![format_date(date)], food_row)?;
            rows.collect()
        })
    }

    // ============ Schedule ============

    fn replace_schedule(&self, date: NaiveDate, tasks: &[PlannedTask]) -> StoreResult<Vec<ScheduleTask>> {
        let day = format_date(date);
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM schedule WHERE date = ?1", params![day])?;
            let mut stored = Vec::with_capacity(tasks.len());
            {
                let mut insert = tx.prepare(
                    "INSERT INTO schedule (date, time_slot, task, status) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for planned in tasks {
                    insert.execute(params![
                        day,
                        planned.time_slot,
                        planned.task,
                        TaskStatus::Pending.as_str()
                    ])?;
                    stored.push(ScheduleTask {
                        id: tx.last_insert_rowid(),
                        date,
                        time_slot: planned.time_slot.clone(),
                        task: planned.task.clone(),
                        status: TaskStatus::Pending,
                    });
                }
            }
            tx.commit()?;
            stored.sort_by(|a, b| a.time_slot.cmp(&b.time_slot).then(a.id.cmp(&b.id)));
            Ok(stored)
        })
    }

    fn schedule_for_date(&self, date: NaiveDate) -> StoreResult<Vec<ScheduleTask>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, date, time_slot, task, status FROM schedule
                 WHERE date = ?1 ORDER BY time_slot ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![format_date(date)], task_row)?;
            rows.collect()
        })
    }

    fn task(&self, id: i64) -> StoreResult<Option<ScheduleTask>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, date, time_slot, task, status FROM schedule WHERE id = ?1",
                params![id],
                task_row,
            )
            .optional()
        })
    }

    fn set_task_status(&self, id: i64, status: TaskStatus) -> StoreResult<bool> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE schedule SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?;
            Ok(updated > 0)
        })
    }

    // ============ Chat Log ============

    fn append_chat(&self, turn: &ChatTurn) -> StoreResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO chat_history (timestamp, sender, message) VALUES (?1, ?2, ?3)",
                params![
                    turn.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    turn.sender.as_str(),
                    turn.message
                ],
            )?;
            Ok(())
        })
    }

    fn recent_chat(&self, limit: usize) -> StoreResult<Vec<ChatTurn>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, sender, message FROM chat_history ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], chat_row)?;
            let mut turns = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            turns.reverse();
            Ok(turns)
        })
    }

    // ============ Analytics ============

    fn consistency_data(&self) -> StoreResult<Vec<(NaiveDate, i64)>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date, COUNT(*) FROM daily_entries GROUP BY date ORDER BY date ASC",
            )?;
            let rows = stmt.query_map([], |row| Ok((date_column(row, 0)?, row.get(1)?)))?;
            rows.collect()
        })
    }

    fn metric_history(&self, goal_name: &str) -> StoreResult<Vec<(NaiveDate, f64)>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date, value FROM daily_entries WHERE goal_name = ?1 ORDER BY date ASC",
            )?;
            let rows = stmt.query_map(params![goal_name], |row| {
                Ok((date_column(row, 0)?, row.get(1)?))
            })?;
            rows.collect()
        })
    }

    fn progress(&self, date: NaiveDate) -> StoreResult<Vec<GoalProgress>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.category, g.name, g.target, g.unit, COALESCE(d.value, 0)
                 FROM goals g
                 LEFT JOIN daily_entries d ON g.name = d.goal_name AND d.date = ?1
                 ORDER BY g.category DESC, g.name ASC",
            )?;
            let rows = stmt.query_map(params![format_date(date)], |row| {
                Ok(GoalProgress {
                    category: row.get(0)?,
                    goal_name: row.get(1)?,
                    target: row.get(2)?,
                    unit: row.get(3)?,
                    current: row.get(4)?,
                })
            })?;
            rows.collect()
        })
    }
}
