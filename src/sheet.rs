//! Spreadsheet-style backend.
//!
//! The workbook is a set of named worksheets holding rows of string cells,
//! the way a hosted spreadsheet exposes them. Row lookups, header offsets and
//! cell parsing stay inside this module. When a path is given the workbook is
//! saved as JSON after every write; each write is applied to a copy and only
//! swapped in once saved, so a failed save leaves the previous state intact.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::db::{
    format_date, seed_default_goals, validate_entry, validate_goal, ChatTurn, CoachStore,
    FoodLogEntry, Goal, LedgerEntry, MealType, NewFoodEntry, PlannedTask, ScheduleTask, Sender,
    TaskStatus, DATE_FORMAT, TIMESTAMP_FORMAT,
};
use crate::error::{StoreError, StoreResult};

const GOALS: &str = "Goals";
const DAILY: &str = "Daily";
const FOOD: &str = "Food";
const SCHEDULE: &str = "Schedule";
const CHAT: &str = "Chat";
const META: &str = "Meta";

const NEXT_FOOD_ID: &str = "next_food_id";
const NEXT_TASK_ID: &str = "next_task_id";

fn headers(sheet: &str) -> &'static [&'static str] {
    match sheet {
        GOALS => &["name", "target", "unit", "category"],
        DAILY => &["date", "goal_name", "value", "note"],
        FOOD => &["id", "date", "time", "meal_type", "planned", "actual"],
        SCHEDULE => &["id", "date", "time_slot", "task", "status"],
        CHAT => &["timestamp", "sender", "message"],
        _ => &["key", "value"],
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Worksheet {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Workbook {
    sheets: BTreeMap<String, Worksheet>,
}

impl Workbook {
    fn ensure_sheets(&mut self) {
        for name in [GOALS, DAILY, FOOD, SCHEDULE, CHAT, META] {
            self.sheets.entry(name.to_string()).or_insert_with(|| Worksheet {
                header: headers(name).iter().map(|h| h.to_string()).collect(),
                rows: Vec::new(),
            });
        }
    }

    fn sheet(&self, name: &str) -> StoreResult<&Worksheet> {
        self.sheets.get(name).ok_or_else(|| StoreError::Corrupt {
            sheet: name.to_string(),
            detail: "worksheet missing".to_string(),
        })
    }

    fn sheet_mut(&mut self, name: &str) -> StoreResult<&mut Worksheet> {
        self.sheets.get_mut(name).ok_or_else(|| StoreError::Corrupt {
            sheet: name.to_string(),
            detail: "worksheet missing".to_string(),
        })
    }

    /// Hand out the next id from the Meta sheet and advance the counter.
    fn next_id(&mut self, key: &str) -> StoreResult<i64> {
        let meta = self.sheet_mut(META)?;
        match meta.rows.iter_mut().find(|r| cell(r, 0) == key) {
            Some(row) => {
                let id: i64 = parse_cell(META, row, 1)?;
                set_cell(row, 1, (id + 1).to_string());
                Ok(id)
            }
            None => {
                meta.rows.push(vec![key.to_string(), "2".to_string()]);
                Ok(1)
            }
        }
    }
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn set_cell(row: &mut Vec<String>, idx: usize, value: String) {
    if row.len() <= idx {
        row.resize(idx + 1, String::new());
    }
    row[idx] = value;
}

fn parse_cell<T: std::str::FromStr>(sheet: &str, row: &[String], idx: usize) -> StoreResult<T> {
    cell(row, idx).trim().parse::<T>().map_err(|_| StoreError::Corrupt {
        sheet: sheet.to_string(),
        detail: format!("cannot parse '{}' in column {}", cell(row, idx), idx),
    })
}

fn parse_date_cell(sheet: &str, row: &[String], idx: usize) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(cell(row, idx), DATE_FORMAT).map_err(|_| StoreError::Corrupt {
        sheet: sheet.to_string(),
        detail: format!("bad date '{}'", cell(row, idx)),
    })
}

fn goal_from_row(row: &[String]) -> StoreResult<Goal> {
    Ok(Goal {
        name: cell(row, 0).to_string(),
        target: parse_cell(GOALS, row, 1)?,
        unit: cell(row, 2).to_string(),
        category: cell(row, 3).to_string(),
    })
}

fn entry_from_row(row: &[String]) -> StoreResult<LedgerEntry> {
    let note = cell(row, 3);
    Ok(LedgerEntry {
        date: parse_date_cell(DAILY, row, 0)?,
        goal_name: cell(row, 1).to_string(),
        value: parse_cell(DAILY, row, 2)?,
        note: if note.is_empty() { None } else { Some(note.to_string()) },
    })
}

fn food_from_row(row: &[String]) -> StoreResult<FoodLogEntry> {
    Ok(FoodLogEntry {
        id: parse_cell(FOOD, row, 0)?,
        date: parse_date_cell(FOOD, row, 1)?,
        time: cell(row, 2).to_string(),
        meal_type: MealType::from_str(cell(row, 3)).unwrap_or(MealType::QuickLog),
        planned: cell(row, 4).to_string(),
        actual: cell(row, 5).to_string(),
    })
}

fn task_from_row(row: &[String]) -> StoreResult<ScheduleTask> {
    Ok(ScheduleTask {
        id: parse_cell(SCHEDULE, row, 0)?,
        date: parse_date_cell(SCHEDULE, row, 1)?,
        time_slot: cell(row, 2).to_string(),
        task: cell(row, 3).to_string(),
        status: TaskStatus::from_str(cell(row, 4)).ok_or_else(|| StoreError::Corrupt {
            sheet: SCHEDULE.to_string(),
            detail: format!("unknown status '{}'", cell(row, 4)),
        })?,
    })
}

fn chat_from_row(row: &[String]) -> StoreResult<ChatTurn> {
    Ok(ChatTurn {
        timestamp: NaiveDateTime::parse_from_str(cell(row, 0), TIMESTAMP_FORMAT).map_err(|_| {
            StoreError::Corrupt {
                sheet: CHAT.to_string(),
                detail: format!("bad timestamp '{}'", cell(row, 0)),
            }
        })?,
        sender: Sender::from_str(cell(row, 1)).ok_or_else(|| StoreError::Corrupt {
            sheet: CHAT.to_string(),
            detail: format!("unknown sender '{}'", cell(row, 1)),
        })?,
        message: cell(row, 2).to_string(),
    })
}

fn sort_tasks(tasks: &mut [ScheduleTask]) {
    tasks.sort_by(|a, b| a.time_slot.cmp(&b.time_slot).then(a.id.cmp(&b.id)));
}

pub struct SheetStore {
    path: Option<PathBuf>,
    book: Mutex<Workbook>,
}

impl SheetStore {
    /// Open (or create) a workbook file.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut book: Workbook = if path.exists() {
            serde_json::from_str(&fs::read_to_string(path)?)?
        } else {
            Workbook::default()
        };
        book.ensure_sheets();
        let store = Self {
            path: Some(path.to_path_buf()),
            book: Mutex::new(book),
        };
        seed_default_goals(&store)?;
        Ok(store)
    }

    pub fn in_memory() -> StoreResult<Self> {
        let mut book = Workbook::default();
        book.ensure_sheets();
        let store = Self {
            path: None,
            book: Mutex::new(book),
        };
        seed_default_goals(&store)?;
        Ok(store)
    }

    fn read<T>(&self, f: impl FnOnce(&Workbook) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.book.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Workbook) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.book.lock().map_err(|_| StoreError::Poisoned)?;
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        if let Some(path) = &self.path {
            save(path, &draft)?;
        }
        *guard = draft;
        Ok(out)
    }
}

fn save(path: &Path, book: &Workbook) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_string_pretty(book)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl CoachStore for SheetStore {
    fn add_goal(&self, goal: &Goal) -> StoreResult<bool> {
        validate_goal(goal)?;
        self.write(|book| {
            let sheet = book.sheet_mut(GOALS)?;
            if sheet.rows.iter().any(|r| cell(r, 0) == goal.name) {
                return Ok(false);
            }
            sheet.rows.push(vec![
                goal.name.clone(),
                goal.target.to_string(),
                goal.unit.clone(),
                goal.category.clone(),
            ]);
            Ok(true)
        })
    }

    fn goals(&self) -> StoreResult<Vec<Goal>> {
        self.read(|book| {
            let mut goals = book
                .sheet(GOALS)?
                .rows
                .iter()
                .map(|r| goal_from_row(r))
                .collect::<StoreResult<Vec<_>>>()?;
            goals.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(goals)
        })
    }

    fn upsert_entry(&self, entry: &LedgerEntry) -> StoreResult<()> {
        validate_entry(entry)?;
        let day = format_date(entry.date);
        self.write(|book| {
            let sheet = book.sheet_mut(DAILY)?;
            let row = vec![
                day.clone(),
                entry.goal_name.clone(),
                entry.value.to_string(),
                entry.note.clone().unwrap_or_default(),
            ];
            match sheet
                .rows
                .iter()
                .position(|r| cell(r, 0) == day && cell(r, 1) == entry.goal_name)
            {
                Some(idx) => sheet.rows[idx] = row,
                None => sheet.rows.push(row),
            }
            Ok(())
        })
    }

    fn entry(&self, date: NaiveDate, goal_name: &str) -> StoreResult<Option<LedgerEntry>> {
        let day = format_date(date);
        self.read(|book| {
            book.sheet(DAILY)?
                .rows
                .iter()
                .find(|r| cell(r, 0) == day && cell(r, 1) == goal_name)
                .map(|r| entry_from_row(r))
                .transpose()
        })
    }

    fn entries_for_date(&self, date: NaiveDate) -> StoreResult<Vec<LedgerEntry>> {
        let day = format_date(date);
        self.read(|book| {
            let mut entries = book
                .sheet(DAILY)?
                .rows
                .iter()
                .filter(|r| cell(r, 0) == day)
                .map(|r| entry_from_row(r))
                .collect::<StoreResult<Vec<_>>>()?;
            entries.sort_by(|a, b| a.goal_name.cmp(&b.goal_name));
            Ok(entries)
        })
    }

    fn raw_history(&self) -> StoreResult<Vec<LedgerEntry>> {
        self.read(|book| {
            let mut entries = book
                .sheet(DAILY)?
                .rows
                .iter()
                .map(|r| entry_from_row(r))
                .collect::<StoreResult<Vec<_>>>()?;
            entries.sort_by(|a, b| b.date.cmp(&a.date).then(a.goal_name.cmp(&b.goal_name)));
            Ok(entries)
        })
    }

    fn append_food(&self, entry: &NewFoodEntry) -> StoreResult<FoodLogEntry> {
        self.write(|book| {
            let id = book.next_id(NEXT_FOOD_ID)?;
            book.sheet_mut(FOOD)?.rows.push(vec![
                id.to_string(),
                format_date(entry.date),
                entry.time.clone(),
                entry.meal_type.as_str().to_string(),
                entry.planned.clone(),
                entry.actual.clone(),
            ]);
            Ok(FoodLogEntry {
                id,
                date: entry.date,
                time: entry.time.clone(),
                meal_type: entry.meal_type,
                planned: entry.planned.clone(),
                actual: entry.actual.clone(),
            })
        })
    }

    fn food_for_date(&self, date: NaiveDate) -> StoreResult<Vec<FoodLogEntry>> {
        let day = format_date(date);
        self.read(|book| {
            book.sheet(FOOD)?
                .rows
                .iter()
                .filter(|r| cell(r, 1) == day)
                .map(|r| food_from_row(r))
                .collect()
        })
    }

    fn replace_schedule(&self, date: NaiveDate, tasks: &[PlannedTask]) -> StoreResult<Vec<ScheduleTask>> {
        let day = format_date(date);
        self.write(|book| {
            book.sheet_mut(SCHEDULE)?.rows.retain(|r| cell(r, 1) != day);
            let mut stored = Vec::with_capacity(tasks.len());
            for planned in tasks {
                let id = book.next_id(NEXT_TASK_ID)?;
                book.sheet_mut(SCHEDULE)?.rows.push(vec![
                    id.to_string(),
                    day.clone(),
                    planned.time_slot.clone(),
                    planned.task.clone(),
                    TaskStatus::Pending.as_str().to_string(),
                ]);
                stored.push(ScheduleTask {
                    id,
                    date,
                    time_slot: planned.time_slot.clone(),
                    task: planned.task.clone(),
                    status: TaskStatus::Pending,
                });
            }
            sort_tasks(&mut stored);
            Ok(stored)
        })
    }

    fn schedule_for_date(&self, date: NaiveDate) -> StoreResult<Vec<ScheduleTask>> {
        let day = format_date(date);
        self.read(|book| {
            let mut tasks = book
                .sheet(SCHEDULE)?
                .rows
                .iter()
                .filter(|r| cell(r, 1) == day)
                .map(|r| task_from_row(r))
                .collect::<StoreResult<Vec<_>>>()?;
            sort_tasks(&mut tasks);
            Ok(tasks)
        })
    }

    fn task(&self, id: i64) -> StoreResult<Option<ScheduleTask>> {
        let key = id.to_string();
        self.read(|book| {
            book.sheet(SCHEDULE)?
                .rows
                .iter()
                .find(|r| cell(r, 0) == key)
                .map(|r| task_from_row(r))
                .transpose()
        })
    }

    fn set_task_status(&self, id: i64, status: TaskStatus) -> StoreResult<bool> {
        let key = id.to_string();
        self.write(|book| {
            let sheet = book.sheet_mut(SCHEDULE)?;
            match sheet.rows.iter_mut().find(|r| cell(r, 0) == key) {
                Some(row) => {
                    set_cell(row, 4, status.as_str().to_string());
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn append_chat(&self, turn: &ChatTurn) -> StoreResult<()> {
        self.write(|book| {
            book.sheet_mut(CHAT)?.rows.push(vec![
                turn.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                turn.sender.as_str().to_string(),
                turn.message.clone(),
            ]);
            Ok(())
        })
    }

    fn recent_chat(&self, limit: usize) -> StoreResult<Vec<ChatTurn>> {
        self.read(|book| {
            let rows = &book.sheet(CHAT)?.rows;
            let start = rows.len().saturating_sub(limit);
            rows[start..].iter().map(|r| chat_from_row(r)).collect()
        })
    }

    fn consistency_data(&self) -> StoreResult<Vec<(NaiveDate, i64)>> {
        self.read(|book| {
            let mut counts: BTreeMap<NaiveDate, i64> = BTreeMap::new();
            for row in &book.sheet(DAILY)?.rows {
                *counts.entry(parse_date_cell(DAILY, row, 0)?).or_insert(0) += 1;
            }
            Ok(counts.into_iter().collect())
        })
    }

    fn metric_history(&self, goal_name: &str) -> StoreResult<Vec<(NaiveDate, f64)>> {
        self.read(|book| {
            let mut history = book
                .sheet(DAILY)?
                .rows
                .iter()
                .filter(|r| cell(r, 1) == goal_name)
                .map(|r| -> StoreResult<(NaiveDate, f64)> {
                    Ok((parse_date_cell(DAILY, r, 0)?, parse_cell(DAILY, r, 2)?))
                })
                .collect::<StoreResult<Vec<_>>>()?;
            history.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(history)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::default_goals;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("coach-sheet-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_seeds_and_rejects_duplicate_goal() {
        let store = SheetStore::in_memory().unwrap();
        assert_eq!(store.goals().unwrap().len(), default_goals().len());
        assert!(!store.add_goal(&Goal::new("Pullups", 30.0, "reps", "Athleticism")).unwrap());
    }

    #[test]
    fn test_ledger_replaces_by_key() {
        let store = SheetStore::in_memory().unwrap();
        store.upsert_entry(&LedgerEntry::new(day(1), "Pullups", 10.0)).unwrap();
        store.upsert_entry(&LedgerEntry::new(day(1), "Pullups", 12.0)).unwrap();
        store.upsert_entry(&LedgerEntry::new(day(2), "Pullups", 5.0)).unwrap();
        assert_eq!(store.entry(day(1), "Pullups").unwrap().unwrap().value, 12.0);
        assert_eq!(store.consistency_data().unwrap(), vec![(day(1), 1), (day(2), 1)]);
        assert_eq!(store.metric_history("Pullups").unwrap(), vec![(day(1), 12.0), (day(2), 5.0)]);
    }

    #[test]
    fn test_progress_matches_sqlite_ordering() {
        let sheet = SheetStore::in_memory().unwrap();
        let sqlite = crate::db::SqliteStore::open_in_memory().unwrap();
        for store in [&sheet as &dyn CoachStore, &sqlite as &dyn CoachStore] {
            store.upsert_entry(&LedgerEntry::new(day(1), "Job Apps", 2.0)).unwrap();
        }
        assert_eq!(sheet.progress(day(1)).unwrap(), sqlite.progress(day(1)).unwrap());
    }

    #[test]
    fn test_task_ids_are_not_reused_after_replace() {
        let store = SheetStore::in_memory().unwrap();
        let first = store.replace_schedule(day(1), &[PlannedTask::new("08:00", "Wake")]).unwrap();
        let second = store.replace_schedule(day(1), &[PlannedTask::new("08:00", "Wake")]).unwrap();
        assert!(second[0].id > first[0].id);
        assert!(store.task(first[0].id).unwrap().is_none());
    }

    #[test]
    fn test_workbook_survives_reopen() {
        let path = temp_path();
        {
            let store = SheetStore::open(&path).unwrap();
            store.upsert_entry(&LedgerEntry::new(day(4), "Dips", 18.0)).unwrap();
            store
                .append_chat(&ChatTurn {
                    timestamp: day(4).and_hms_opt(9, 30, 0).unwrap(),
                    sender: Sender::User,
                    message: "did 18 dips".to_string(),
                })
                .unwrap();
        }
        let store = SheetStore::open(&path).unwrap();
        assert_eq!(store.entry(day(4), "Dips").unwrap().unwrap().value, 18.0);
        assert_eq!(store.recent_chat(10).unwrap()[0].message, "did 18 dips");
        assert_eq!(store.goals().unwrap().len(), default_goals().len());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_cell_is_reported() {
        let store = SheetStore::in_memory().unwrap();
        {
            let mut book = store.book.lock().unwrap();
            book.sheet_mut(DAILY)
                .unwrap()
                .rows
                .push(vec!["2024-01-01".into(), "Dips".into(), "lots".into(), String::new()]);
        }
        let err = store.entries_for_date(day(1)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_failed_save_leaves_state_unchanged() {
        let path = temp_path();
        let mut store = SheetStore::open(&path).unwrap();
        store.upsert_entry(&LedgerEntry::new(day(5), "Pullups", 10.0)).unwrap();

        // A regular file as the parent directory makes every save fail
        let blocker = temp_path();
        fs::write(&blocker, "not a directory").unwrap();
        store.path = Some(blocker.join("book.json"));

        assert!(store.upsert_entry(&LedgerEntry::new(day(5), "Pullups", 12.0)).is_err());
        assert!(store.replace_schedule(day(5), &[PlannedTask::new("08:00", "Wake")]).is_err());
        assert_eq!(store.entry(day(5), "Pullups").unwrap().unwrap().value, 10.0);
        assert!(store.schedule_for_date(day(5)).unwrap().is_empty());

        let reopened = SheetStore::open(&path).unwrap();
        assert_eq!(reopened.entry(day(5), "Pullups").unwrap().unwrap().value, 10.0);
        let _ = fs::remove_file(&path);
        let _ = fs::remove_file(&blocker);
    }
}
