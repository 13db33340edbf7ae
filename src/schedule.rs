use chrono::NaiveDate;
use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{CoachStore, PlannedTask, ScheduleTask, TaskStatus};
use crate::error::StoreResult;
use crate::logging;

/// Result of trying to complete a task.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkDone {
    Completed(ScheduleTask),
    AlreadyDone(ScheduleTask),
    NotFound,
}

/// Daily plan lifecycle: PENDING → DONE, one plan per date.
pub struct Schedule {
    store: Arc<dyn CoachStore>,
    clock: Arc<dyn Clock>,
}

impl Schedule {
    pub fn new(store: Arc<dyn CoachStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn replace_plan(&self, date: NaiveDate, tasks: &[PlannedTask]) -> StoreResult<Vec<ScheduleTask>> {
        let stored = self.store.replace_schedule(date, tasks)?;
        logging::log_schedule(None, &format!("Replaced plan for {} with {} tasks", date, stored.len()));
        Ok(stored)
    }

    /// Earliest pending slot for `date`. Does not look at the clock: a
    /// 07:00 task still pending at noon is still the mission.
    pub fn current_mission(&self, date: NaiveDate) -> StoreResult<Option<ScheduleTask>> {
        Ok(self
            .store
            .schedule_for_date(date)?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by(|a, b| a.time_slot.cmp(&b.time_slot).then(a.id.cmp(&b.id))))
    }

    pub fn mark_done(&self, task_id: i64) -> StoreResult<MarkDone> {
        let Some(task) = self.store.task(task_id)? else {
            return Ok(MarkDone::NotFound);
        };
        if task.status == TaskStatus::Done {
            return Ok(MarkDone::AlreadyDone(task));
        }
        if !self.store.set_task_status(task_id, TaskStatus::Done)? {
            return Ok(MarkDone::NotFound);
        }
        logging::log_schedule(None, &format!("Completed {} {}", task.time_slot, task.task));
        Ok(MarkDone::Completed(ScheduleTask {
            status: TaskStatus::Done,
            ..task
        }))
    }

    pub fn full_schedule(&self, date: NaiveDate) -> StoreResult<Vec<ScheduleTask>> {
        self.store.schedule_for_date(date)
    }
}

pub fn format_schedule(tasks: &[ScheduleTask]) -> String {
    if tasks.is_empty() {
        return "No plan. Type 'Plan my day'.".to_string();
    }
    tasks
        .iter()
        .map(|t| match t.status {
            TaskStatus::Done => format!("[x] {} - {}", t.time_slot, t.task),
            TaskStatus::Pending => format!("[ ] {} - {}", t.time_slot, t.task),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::SqliteStore;
    use crate::sheet::SheetStore;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn schedule_with(store: Arc<dyn CoachStore>) -> Schedule {
        Schedule::new(store, Arc::new(FixedClock::at(date(), 12, 0)))
    }

    fn backends() -> Vec<Arc<dyn CoachStore>> {
        vec![
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            Arc::new(SheetStore::in_memory().unwrap()),
        ]
    }

    #[test]
    fn test_replace_then_full_schedule() {
        for store in backends() {
            let schedule = schedule_with(store);
            schedule
                .replace_plan(date(), &[PlannedTask::new("08:00", "Wake"), PlannedTask::new("09:00", "Work")])
                .unwrap();
            let tasks = schedule.full_schedule(date()).unwrap();
            assert_eq!(tasks.len(), 2);
            assert_eq!(tasks[0].time_slot, "08:00");
            assert_eq!(tasks[1].task, "Work");
            assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));

            schedule.replace_plan(date(), &[PlannedTask::new("10:00", "Gym")]).unwrap();
            let tasks = schedule.full_schedule(date()).unwrap();
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].task, "Gym");
        }
    }

    #[test]
    fn test_mission_progression() {
        for store in backends() {
            let schedule = schedule_with(store);
            schedule
                .replace_plan(
                    date(),
                    &[
                        PlannedTask::new("18:00", "Gym"),
                        PlannedTask::new("08:00", "Wake"),
                        PlannedTask::new("09:00", "Deep Work"),
                    ],
                )
                .unwrap();

            let first = schedule.current_mission(date()).unwrap().unwrap();
            assert_eq!(first.time_slot, "08:00");
            assert!(matches!(schedule.mark_done(first.id).unwrap(), MarkDone::Completed(_)));

            let second = schedule.current_mission(date()).unwrap().unwrap();
            assert_eq!(second.time_slot, "09:00");
            schedule.mark_done(second.id).unwrap();
            let third = schedule.current_mission(date()).unwrap().unwrap();
            schedule.mark_done(third.id).unwrap();

            assert!(schedule.current_mission(date()).unwrap().is_none());
        }
    }

    #[test]
    fn test_mission_ignores_current_time() {
        let store: Arc<dyn CoachStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        // Clock says 12:00, the 07:00 task is overdue but still the mission
        let schedule = schedule_with(store);
        schedule
            .replace_plan(date(), &[PlannedTask::new("07:00", "Run"), PlannedTask::new("15:00", "Read")])
            .unwrap();
        assert_eq!(schedule.current_mission(date()).unwrap().unwrap().task, "Run");
    }

    #[test]
    fn test_mark_done_twice_is_noop() {
        for store in backends() {
            let schedule = schedule_with(store);
            let stored = schedule.replace_plan(date(), &[PlannedTask::new("08:00", "Wake")]).unwrap();
            let id = stored[0].id;
            assert!(matches!(schedule.mark_done(id).unwrap(), MarkDone::Completed(_)));
            assert!(matches!(schedule.mark_done(id).unwrap(), MarkDone::AlreadyDone(_)));
            assert_eq!(schedule.mark_done(id + 100).unwrap(), MarkDone::NotFound);
            assert_eq!(schedule.full_schedule(date()).unwrap()[0].status, TaskStatus::Done);
        }
    }

    #[test]
    fn test_format_schedule() {
        assert_eq!(format_schedule(&[]), "No plan. Type 'Plan my day'.");
        let task = ScheduleTask {
            id: 1,
            date: date(),
            time_slot: "08:00".to_string(),
            task: "Wake".to_string(),
            status: TaskStatus::Done,
        };
        assert_eq!(format_schedule(&[task]), "[x] 08:00 - Wake");
    }
}
