//! This module reconciles Grocy tasks and chores with the to-dos of a calendar
//!
//! A run is made of three phases, in this order:
//! 1. calendar → inventory: completions, renames, due date and description changes made in the calendar are applied to Grocy,
//!    and to-dos created in the calendar are imported as new Grocy tasks
//! 2. tasks → calendar: every Grocy task is created or updated in the calendar
//! 3. chores → calendar: every Grocy chore is created or updated in the calendar
//!
//! The [`SyncMap`] is the only memory kept between runs. Nothing is transactional: every write commits on its own,
//! and a run interrupted midway is converged from by the dirty-checks of the next one.

use std::collections::HashMap;
use std::error::Error;

use serde::Serialize;

use crate::ical::{build_from_chore, build_from_task, extract_due_date};
use crate::inventory::{GrocyChore, GrocyTask, NewTask, TaskUpdate};
use crate::mapper::{EntityKind, SyncMap, SyntheticUid, SENTINEL_ID};
use crate::mapper::{DIRECTION_DUPLICATE, DIRECTION_TO_CALENDAR, DIRECTION_TO_INVENTORY};
use crate::todo::{normalize_grocy_due, Due, Todo, TodoStatus};
use crate::traits::{InventoryApi, TodoStore};

pub mod sync_progress;
use sync_progress::SyncProgress;
use sync_progress::{FeedbackSender, SyncEvent};

const PHASE_CALENDAR_TO_INVENTORY: &str = "Calendar → inventory";
const PHASE_TASKS_TO_CALENDAR: &str = "Tasks → calendar";
const PHASE_CHORES_TO_CALENDAR: &str = "Chores → calendar";


/// What a sync run did
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SyncStats {
    /// Tasks that have been pushed (created, updated, or checked as up-to-date) to the calendar
    pub tasks_synced: u32,
    /// Chores that have been pushed to the calendar
    pub chores_synced: u32,
    /// Changes applied to Grocy from the calendar
    pub calendar_to_inventory: u32,
    /// Human-readable description of every failure of this run
    pub errors: Vec<String>,
}

impl SyncStats {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}


/// Syncs a calendar with a Grocy instance.
///
/// `calendar` is usually a [`RemoteCalendar`](crate::calendar::remote_calendar::RemoteCalendar) and `inventory` a [`GrocyClient`](crate::inventory::GrocyClient),
/// but in-memory mocks can be used instead (see the `mock` module, behind the `in_memory_mocks` feature).
#[derive(Debug)]
pub struct Reconciler<C, I>
where
    C: TodoStore + Send + Sync,
    I: InventoryApi + Send + Sync,
{
    calendar: C,
    inventory: I,
    map: SyncMap,
}

impl<C, I> Reconciler<C, I>
where
    C: TodoStore + Send + Sync,
    I: InventoryApi + Send + Sync,
{
    pub fn new(calendar: C, inventory: I, map: SyncMap) -> Self {
        Self { calendar, inventory, map }
    }

    /// Returns the calendar
    pub fn calendar(&self) -> &C { &self.calendar }
    /// Returns the Grocy source
    pub fn inventory(&self) -> &I { &self.inventory }
    /// Returns the cross-reference table
    pub fn sync_map(&self) -> &SyncMap { &self.map }

    /// Get back the calendar, the inventory and the sync map
    pub fn into_parts(self) -> (C, I, SyncMap) {
        (self.calendar, self.inventory, self.map)
    }

    /// Performs a synchronisation between the calendar and Grocy, and provides feedback to the provided channel.
    ///
    /// See [`Self::sync`]
    pub async fn sync_with_feedback(&mut self, feedback_sender: FeedbackSender) -> SyncStats {
        let mut progress = SyncProgress::new_with_feedback_channel(feedback_sender);
        self.run_sync(&mut progress).await
    }

    /// Performs a synchronisation between the calendar and Grocy.
    ///
    /// A failure on a single item never stops the run, and a failure of a whole phase does not prevent the next phases to run.
    /// Every failure is reported in the returned stats.
    pub async fn sync(&mut self) -> SyncStats {
        let mut progress = SyncProgress::new();
        self.run_sync(&mut progress).await
    }

    async fn run_sync(&mut self, progress: &mut SyncProgress) -> SyncStats {
        progress.info("Starting a sync.");
        progress.feedback(SyncEvent::Started);
        let mut stats = SyncStats::default();

        if let Err(err) = self.calendar_to_inventory(&mut stats, progress).await {
            progress.error(&format!("{}: {}", PHASE_CALENDAR_TO_INVENTORY, err));
        }
        if let Err(err) = self.tasks_to_calendar(&mut stats, progress).await {
            progress.error(&format!("{}: {}", PHASE_TASKS_TO_CALENDAR, err));
        }
        if let Err(err) = self.chores_to_calendar(&mut stats, progress).await {
            progress.error(&format!("{}: {}", PHASE_CHORES_TO_CALENDAR, err));
        }

        let success = progress.is_success();
        progress.feedback(SyncEvent::Finished{ success });
        stats.errors = progress.errors().to_vec();
        progress.info(&format!("Sync ended: {} task(s) and {} chore(s) pushed, {} change(s) applied to Grocy, {} error(s)",
            stats.tasks_synced, stats.chores_synced, stats.calendar_to_inventory, stats.errors.len()));
        stats
    }


    async fn calendar_to_inventory(&mut self, stats: &mut SyncStats, progress: &mut SyncProgress) -> Result<(), Box<dyn Error>> {
        progress.feedback(SyncEvent::InProgress{ phase: PHASE_CALENDAR_TO_INVENTORY.to_string(), details: "fetching to-dos".to_string() });
        // Completed items must be requested explicitly, otherwise completions would go unnoticed
        let items = self.calendar.list_all_todos(true).await?;
        let mut tasks: HashMap<i64, GrocyTask> = self.inventory.get_all_tasks().await?
            .into_iter()
            .map(|task| (task.id, task))
            .collect();
        progress.info(&format!("Checking {} calendar item(s) against {} Grocy task(s)", items.len(), tasks.len()));

        for item in items {
            let todos = match crate::ical::parse(&item.data) {
                Err(err) => {
                    progress.warn(&format!("{}: unable to parse {}: {}", PHASE_CALENDAR_TO_INVENTORY, item.href, err));
                    continue;
                },
                Ok(todos) => todos,
            };

            for todo in todos {
                progress.feedback(SyncEvent::InProgress{ phase: PHASE_CALENDAR_TO_INVENTORY.to_string(), details: todo.summary().to_string() });
                let result = match SyntheticUid::parse(todo.uid()) {
                    Some((EntityKind::Task, task_id)) => self.pull_task(task_id, &todo, &tasks, stats, progress).await,
                    Some((EntityKind::Chore, chore_id)) => self.pull_chore(chore_id, &todo, stats, progress).await,
                    None if SyntheticUid::is_self_authored(todo.uid()) => {
                        progress.trace(&format!("Ignoring self-authored item {}", todo.uid()));
                        Ok(())
                    },
                    None => self.import_external(&todo, &mut tasks, stats, progress).await,
                };
                if let Err(err) = result {
                    progress.error(&format!("{} ({}): {}", PHASE_CALENDAR_TO_INVENTORY, todo.uid(), err));
                }
            }
        }
        Ok(())
    }

    /// The calendar state always wins over Grocy in this phase
    async fn pull_task(&mut self, task_id: i64, todo: &Todo, tasks: &HashMap<i64, GrocyTask>,
                       stats: &mut SyncStats, progress: &mut SyncProgress) -> Result<(), Box<dyn Error>>
    {
        let task = match tasks.get(&task_id) {
            None => {
                progress.debug(&format!("{} refers to a task that does not exist (anymore?). Skipping it", todo.uid()));
                return Ok(());
            },
            Some(task) => task,
        };
        let mut changed = false;

        // Other statuses (IN-PROCESS, CANCELLED...) leave the done flag alone
        if todo.status().is_completed() && task.done == false {
            self.inventory.complete_task(task_id).await?;
            progress.info(&format!("Task {} marked as done in Grocy", task_id));
            changed = true;
        } else if todo.status().is_needs_action() && task.done {
            self.inventory.undo_task(task_id).await?;
            progress.info(&format!("Task {} marked as not done in Grocy", task_id));
            changed = true;
        }

        if let Some(due) = todo.due() {
            let calendar_due = due.to_grocy();
            let grocy_due = normalize_grocy_due(task.due_or_empty());
            if calendar_due != grocy_due {
                self.inventory.update_task(task_id, &TaskUpdate::due_date(calendar_due.as_str())).await?;
                progress.info(&format!("Task {} due date updated: '{}' -> '{}'", task_id, grocy_due, calendar_due));
                changed = true;
            }
        }

        if todo.summary().is_empty() == false && todo.summary() != task.name {
            self.inventory.update_task(task_id, &TaskUpdate::name(todo.summary())).await?;
            progress.info(&format!("Task {} renamed: '{}' -> '{}'", task_id, task.name, todo.summary()));
            changed = true;
        }

        // An absent description and an empty one are the same thing
        if todo.description_or_empty() != task.description_or_empty() {
            self.inventory.update_task(task_id, &TaskUpdate::description(todo.description_or_empty())).await?;
            progress.info(&format!("Task {} description updated", task_id));
            changed = true;
        }

        if changed {
            let summary = if todo.summary().is_empty() { task.name.as_str() } else { todo.summary() };
            let due = match todo.due() {
                Some(due) => Some(due.to_date_string()),
                None => task.due_date.clone(),
            };
            self.map.upsert(EntityKind::Task, task_id, todo.uid(), todo.status().as_str(),
                            Some(summary), due.as_deref(), DIRECTION_TO_INVENTORY)?;
            stats.calendar_to_inventory += 1;
        }
        Ok(())
    }

    /// Chores cannot be edited from the calendar, they can only be executed
    async fn pull_chore(&mut self, chore_id: i64, todo: &Todo,
                        stats: &mut SyncStats, progress: &mut SyncProgress) -> Result<(), Box<dyn Error>>
    {
        if todo.status().is_completed() == false {
            return Ok(());
        }

        // The recorded status is the only thing that prevents executing the chore again on every run
        let (last_summary, last_due) = match self.map.lookup(EntityKind::Chore, chore_id) {
            None => {
                progress.debug(&format!("Chore {} is completed in the calendar but has never been synced. Ignoring it", chore_id));
                return Ok(());
            },
            Some(entry) if entry.last_status == TodoStatus::Completed.as_str() => {
                progress.trace(&format!("Chore {} has already been executed", chore_id));
                return Ok(());
            },
            Some(entry) => (entry.last_summary.clone(), entry.last_due.clone()),
        };

        self.inventory.execute_chore(chore_id).await?;
        progress.info(&format!("Chore {} executed in Grocy", chore_id));
        self.map.upsert(EntityKind::Chore, chore_id, todo.uid(), TodoStatus::Completed.as_str(),
                        last_summary.as_deref(), last_due.as_deref(), DIRECTION_TO_INVENTORY)?;
        stats.calendar_to_inventory += 1;
        Ok(())
    }

    /// Turns a to-do that has been created in the calendar into a new Grocy task
    async fn import_external(&mut self, todo: &Todo, tasks: &mut HashMap<i64, GrocyTask>,
                             stats: &mut SyncStats, progress: &mut SyncProgress) -> Result<(), Box<dyn Error>>
    {
        if self.map.lookup_by_uid(todo.uid()).is_some() {
            progress.trace(&format!("{} has already been imported", todo.uid()));
            return Ok(());
        }
        let summary = todo.summary();
        if summary.is_empty() {
            return Ok(());
        }
        let status = todo.status().as_str();
        let due_date = todo.due().map(Due::to_grocy);

        let wanted = summary.trim().to_lowercase();
        if tasks.values().any(|task| task.name.trim().to_lowercase() == wanted) {
            // Remember this UID, so that it is not considered again
            self.map.upsert(EntityKind::Task, SENTINEL_ID, todo.uid(), status,
                            Some(summary), due_date.as_deref(), DIRECTION_DUPLICATE)?;
            progress.info(&format!("'{}' already exists in Grocy, not importing {}", summary, todo.uid()));
            return Ok(());
        }

        let new_task = NewTask {
            name: summary.to_string(),
            description: todo.description().filter(|d| d.is_empty() == false).map(String::from),
            due_date: due_date.clone(),
        };
        let task_id = self.inventory.create_task(&new_task).await?;

        // The external UID is kept, so that the next phase updates this very to-do instead of creating a twin
        self.map.upsert(EntityKind::Task, task_id, todo.uid(), status,
                        Some(summary), due_date.as_deref(), DIRECTION_TO_INVENTORY)?;

        let done = todo.status().is_completed();
        if done {
            self.inventory.complete_task(task_id).await?;
        }
        tasks.insert(task_id, GrocyTask {
            id: task_id,
            name: new_task.name,
            description: new_task.description,
            due_date: new_task.due_date,
            done,
        });

        progress.info(&format!("Created Grocy task {} from '{}' ({})", task_id, summary, todo.uid()));
        stats.calendar_to_inventory += 1;
        Ok(())
    }


    async fn tasks_to_calendar(&mut self, stats: &mut SyncStats, progress: &mut SyncProgress) -> Result<(), Box<dyn Error>> {
        let tasks = self.inventory.get_all_tasks().await?;
        progress.info(&format!("Pushing {} task(s) to the calendar", tasks.len()));

        for task in tasks {
            progress.feedback(SyncEvent::InProgress{ phase: PHASE_TASKS_TO_CALENDAR.to_string(), details: task.name.clone() });
            if let Err(err) = self.push_task(&task, progress).await {
                progress.error(&format!("Task {}: {}", task.id, err));
                continue;
            }
            stats.tasks_synced += 1;
        }
        Ok(())
    }

    async fn push_task(&mut self, task: &GrocyTask, progress: &mut SyncProgress) -> Result<(), Box<dyn Error>> {
        // Tasks imported from the calendar keep the UID they were created with
        let uid = match self.map.lookup(EntityKind::Task, task.id) {
            Some(entry) => entry.external_uid.clone(),
            None => SyntheticUid::for_entity(EntityKind::Task, task.id),
        };
        let status = TodoStatus::from_done(task.done);

        let found = self.calendar.find_by_uid(&uid).await?;
        match found {
            Some((item, existing)) => {
                // The due date is not compared: Grocy due date changes are only pushed along with other changes
                let needs_update = *existing.status() != status
                    || existing.summary() != task.name
                    || existing.description_or_empty() != task.description_or_empty();
                if needs_update {
                    let ical = build_from_task(task, Some(&uid))?;
                    self.calendar.update(&item, ical).await?;
                    progress.debug(&format!("Task {} updated in the calendar ({})", task.id, uid));
                } else {
                    progress.trace(&format!("Task {} is up to date", task.id));
                }
            },
            None => {
                let ical = build_from_task(task, Some(&uid))?;
                self.calendar.save_new(ical).await?;
                progress.debug(&format!("Task {} created in the calendar ({})", task.id, uid));
            },
        }

        self.map.upsert(EntityKind::Task, task.id, &uid, status.as_str(),
                        Some(&task.name), task.due_date.as_deref(), DIRECTION_TO_CALENDAR)?;
        Ok(())
    }


    async fn chores_to_calendar(&mut self, stats: &mut SyncStats, progress: &mut SyncProgress) -> Result<(), Box<dyn Error>> {
        let chores = self.inventory.get_chores().await?;
        progress.info(&format!("Pushing {} chore(s) to the calendar", chores.len()));

        for chore in chores {
            progress.feedback(SyncEvent::InProgress{ phase: PHASE_CHORES_TO_CALENDAR.to_string(), details: chore.chore_name.clone() });
            if let Err(err) = self.push_chore(&chore, progress).await {
                progress.error(&format!("Chore {}: {}", chore.chore_id, err));
                continue;
            }
            stats.chores_synced += 1;
        }
        Ok(())
    }

    async fn push_chore(&mut self, chore: &GrocyChore, progress: &mut SyncProgress) -> Result<(), Box<dyn Error>> {
        let uid = SyntheticUid::for_entity(EntityKind::Chore, chore.chore_id);
        let next_date = chore_due_date(chore);

        // A chore that was not rewritten keeps the status observed in the calendar.
        // Recording it is what prevents the next runs to execute a completed chore again.
        let found = self.calendar.find_by_uid(&uid).await?;
        let recorded_status = match found {
            Some((item, existing)) => {
                let needs_update = existing.summary() != chore.chore_name
                    || extract_due_date(&existing) != next_date;
                if needs_update {
                    let ical = build_from_chore(chore)?;
                    self.calendar.update(&item, ical).await?;
                    progress.debug(&format!("Chore {} updated in the calendar (summary '{}', due '{}')", chore.chore_id, chore.chore_name, next_date));
                    TodoStatus::NeedsAction
                } else {
                    progress.trace(&format!("Chore {} is up to date", chore.chore_id));
                    existing.status().clone()
                }
            },
            None => {
                let ical = build_from_chore(chore)?;
                self.calendar.save_new(ical).await?;
                progress.debug(&format!("Chore {} created in the calendar", chore.chore_id));
                TodoStatus::NeedsAction
            },
        };

        self.map.upsert(EntityKind::Chore, chore.chore_id, &uid, recorded_status.as_str(),
                        Some(&chore.chore_name), chore.next_estimated_execution_time.as_deref(), DIRECTION_TO_CALENDAR)?;
        Ok(())
    }
}

/// The `YYYY-MM-DD` next execution date of a chore, or an empty string for chores that are never due
fn chore_due_date(chore: &GrocyChore) -> String {
    chore.next_estimated_execution_time.as_deref()
        .and_then(Due::from_grocy)
        .filter(|due| due.is_never() == false)
        .map(|due| due.to_date_string())
        .unwrap_or_default()
}
