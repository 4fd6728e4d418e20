//! In-memory calendar and Grocy instances.
//!
//! They are used in tests, to run the sync engine without any server. Both record the writes they receive,
//! and both can be told to fail some of their operations with a [`MockBehaviour`].
#![cfg(feature = "in_memory_mocks")]

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::inventory::{GrocyChore, GrocyTask, NewTask, TaskUpdate};
use crate::mock_behaviour::MockBehaviour;
use crate::todo::{Todo, TodoStatus};
use crate::traits::{InventoryApi, RemoteTodo, TodoStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn check<F>(behaviour: &Option<Arc<Mutex<MockBehaviour>>>, f: F) -> Result<(), Box<dyn Error>>
where
    F: FnOnce(&mut MockBehaviour) -> Result<(), Box<dyn Error>>,
{
    match behaviour {
        None => Ok(()),
        Some(b) => f(&mut lock(b)),
    }
}

/// A minimal iCal payload, as a calendar app would write it
pub fn todo_ical(uid: &str, summary: &str, status: TodoStatus, due: Option<&str>) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Mock//Calendar app//EN".to_string(),
        "BEGIN:VTODO".to_string(),
        format!("UID:{}", uid),
        "DTSTAMP:20240501T080000Z".to_string(),
        format!("SUMMARY:{}", summary),
        format!("STATUS:{}", status.as_str()),
    ];
    if let Some(due) = due {
        lines.push(format!("DUE:{}", due));
    }
    lines.push("END:VTODO".to_string());
    lines.push("END:VCALENDAR".to_string());
    lines.join("\r\n") + "\r\n"
}

/// A Grocy task that is not done, and has neither description nor due date
pub fn task(id: i64, name: &str) -> GrocyTask {
    GrocyTask {
        id,
        name: name.to_string(),
        description: None,
        due_date: None,
        done: false,
    }
}

pub fn chore(id: i64, name: &str, next_execution: Option<&str>) -> GrocyChore {
    GrocyChore {
        chore_id: id,
        chore_name: name.to_string(),
        description: None,
        next_estimated_execution_time: next_execution.map(String::from),
    }
}


#[derive(Clone, Debug)]
struct StoredTodo {
    etag: u64,
    data: String,
}

/// A calendar that lives in memory
#[derive(Debug, Default)]
pub struct MockCalendar {
    items: BTreeMap<String, StoredTodo>,
    next_etag: u64,
    n_saves: usize,
    n_updates: usize,
    mock_behaviour: Option<Arc<Mutex<MockBehaviour>>>,
}

impl MockCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(behaviour: Arc<Mutex<MockBehaviour>>) -> Self {
        Self { mock_behaviour: Some(behaviour), ..Self::default() }
    }

    fn href_for(uid: &str) -> String {
        format!("mock://calendar/{}.ics", sanitize_filename::sanitize(uid))
    }

    fn store(&mut self, href: String, data: String) {
        self.next_etag += 1;
        self.items.insert(href, StoredTodo { etag: self.next_etag, data });
    }

    /// Add or replace an item, as a user would do in a calendar app. This is not counted as a write
    pub fn put_raw(&mut self, uid: &str, data: String) {
        self.store(Self::href_for(uid), data);
    }

    /// Every to-do of this calendar
    pub fn todos(&self) -> Vec<Todo> {
        self.items.values()
            .filter_map(|item| crate::ical::parse(&item.data).ok())
            .flatten()
            .collect()
    }

    pub fn todo(&self, uid: &str) -> Option<Todo> {
        self.todos().into_iter().find(|todo| todo.uid() == uid)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The number of items created by [`TodoStore::save_new`]
    pub fn n_saves(&self) -> usize { self.n_saves }
    /// The number of items overwritten by [`TodoStore::update`]
    pub fn n_updates(&self) -> usize { self.n_updates }
    pub fn n_writes(&self) -> usize { self.n_saves + self.n_updates }
}

#[async_trait]
impl TodoStore for MockCalendar {
    async fn list_all_todos(&self, include_completed: bool) -> Result<Vec<RemoteTodo>, Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_list_todos())?;

        let items = self.items.iter()
            .filter(|(_, item)| {
                include_completed || crate::ical::parse(&item.data)
                    .map(|todos| todos.iter().all(|todo| todo.status().is_completed() == false))
                    .unwrap_or(true)
            })
            .map(|(href, item)| RemoteTodo {
                href: href.clone(),
                etag: Some(format!("\"{}\"", item.etag)),
                data: item.data.clone(),
            })
            .collect();
        Ok(items)
    }

    async fn save_new(&mut self, ical: String) -> Result<(), Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_save_new())?;

        let uid = match crate::ical::parse(&ical)?.into_iter().next() {
            None => return Err("Refusing to save an iCal file that contains no VTODO".into()),
            Some(todo) => todo.uid().to_string(),
        };
        let href = Self::href_for(&uid);
        if self.items.contains_key(&href) {
            return Err(format!("Item {} already exists", href).into());
        }
        self.store(href, ical);
        self.n_saves += 1;
        Ok(())
    }

    async fn update(&mut self, item: &RemoteTodo, ical: String) -> Result<(), Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_update_todo())?;

        match self.items.get(&item.href) {
            None => return Err(format!("Item {} does not exist", item.href).into()),
            Some(stored) => {
                if item.etag.as_deref() != Some(format!("\"{}\"", stored.etag).as_str()) {
                    return Err(format!("Item {} has changed in the meantime", item.href).into());
                }
            },
        }
        self.store(item.href.clone(), ical);
        self.n_updates += 1;
        Ok(())
    }
}


/// The writes a [`MockInventory`] has received
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InventoryCalls {
    pub completed: Vec<i64>,
    pub undone: Vec<i64>,
    pub updated: Vec<(i64, TaskUpdate)>,
    pub created: Vec<NewTask>,
    pub executed: Vec<i64>,
}

impl InventoryCalls {
    pub fn n_writes(&self) -> usize {
        self.completed.len() + self.undone.len() + self.updated.len() + self.created.len() + self.executed.len()
    }
}

#[derive(Debug, Default)]
struct InventoryState {
    tasks: BTreeMap<i64, GrocyTask>,
    chores: BTreeMap<i64, GrocyChore>,
    next_task_id: i64,
    calls: InventoryCalls,
}

/// A Grocy instance that lives in memory
#[derive(Debug, Default)]
pub struct MockInventory {
    state: Mutex<InventoryState>,
    mock_behaviour: Option<Arc<Mutex<MockBehaviour>>>,
}

impl MockInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(behaviour: Arc<Mutex<MockBehaviour>>) -> Self {
        Self { mock_behaviour: Some(behaviour), ..Self::default() }
    }

    pub fn add_task(&self, task: GrocyTask) {
        lock(&self.state).tasks.insert(task.id, task);
    }

    pub fn add_chore(&self, chore: GrocyChore) {
        lock(&self.state).chores.insert(chore.chore_id, chore);
    }

    /// The ID the next created task will get. By default, it follows the greatest existing ID
    pub fn set_next_task_id(&self, id: i64) {
        lock(&self.state).next_task_id = id;
    }

    /// Change a task, as a user would do in Grocy. This is not counted as a write
    pub fn edit_task<F: FnOnce(&mut GrocyTask)>(&self, task_id: i64, f: F) {
        if let Some(task) = lock(&self.state).tasks.get_mut(&task_id) {
            f(task);
        }
    }

    pub fn task(&self, task_id: i64) -> Option<GrocyTask> {
        lock(&self.state).tasks.get(&task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<GrocyTask> {
        lock(&self.state).tasks.values().cloned().collect()
    }

    pub fn calls(&self) -> InventoryCalls {
        lock(&self.state).calls.clone()
    }

    fn with_task<F>(&self, task_id: i64, f: F) -> Result<(), Box<dyn Error>>
    where
        F: FnOnce(&mut GrocyTask, &mut InventoryCalls),
    {
        let mut state = lock(&self.state);
        let state = &mut *state;
        match state.tasks.get_mut(&task_id) {
            None => Err(format!("No task with id {}", task_id).into()),
            Some(task) => {
                f(task, &mut state.calls);
                Ok(())
            },
        }
    }
}

#[async_trait]
impl InventoryApi for MockInventory {
    async fn get_all_tasks(&self) -> Result<Vec<GrocyTask>, Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_get_tasks())?;
        Ok(self.tasks())
    }

    async fn get_chores(&self) -> Result<Vec<GrocyChore>, Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_get_chores())?;
        Ok(lock(&self.state).chores.values().cloned().collect())
    }

    async fn complete_task(&self, task_id: i64) -> Result<(), Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_complete_task())?;
        self.with_task(task_id, |task, calls| {
            task.done = true;
            calls.completed.push(task_id);
        })
    }

    async fn undo_task(&self, task_id: i64) -> Result<(), Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_undo_task())?;
        self.with_task(task_id, |task, calls| {
            task.done = false;
            calls.undone.push(task_id);
        })
    }

    async fn update_task(&self, task_id: i64, update: &TaskUpdate) -> Result<(), Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_update_task())?;
        self.with_task(task_id, |task, calls| {
            if let Some(name) = &update.name {
                task.name = name.clone();
            }
            if let Some(description) = &update.description {
                task.description = Some(description.clone());
            }
            if let Some(due_date) = &update.due_date {
                task.due_date = Some(due_date.clone());
            }
            calls.updated.push((task_id, update.clone()));
        })
    }

    async fn create_task(&self, new_task: &NewTask) -> Result<i64, Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_create_task())?;
        let mut state = lock(&self.state);
        let greatest = state.tasks.keys().max().copied().unwrap_or(0);
        let id = std::cmp::max(state.next_task_id, greatest + 1);
        state.next_task_id = id + 1;

        state.tasks.insert(id, GrocyTask {
            id,
            name: new_task.name.clone(),
            description: new_task.description.clone(),
            due_date: new_task.due_date.clone(),
            done: false,
        });
        state.calls.created.push(new_task.clone());
        Ok(id)
    }

    async fn execute_chore(&self, chore_id: i64) -> Result<(), Box<dyn Error>> {
        check(&self.mock_behaviour, |b| b.can_execute_chore())?;
        let mut state = lock(&self.state);
        if state.chores.contains_key(&chore_id) == false {
            return Err(format!("No chore with id {}", chore_id).into());
        }
        state.calls.executed.push(chore_id);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calendar_filters_completed_items() {
        let mut cal = MockCalendar::new();
        cal.put_raw("a", todo_ical("a", "Open", TodoStatus::NeedsAction, None));
        cal.put_raw("b", todo_ical("b", "Done", TodoStatus::Completed, Some("20240501")));

        assert_eq!(cal.list_all_todos(true).await.unwrap().len(), 2);
        assert_eq!(cal.list_all_todos(false).await.unwrap().len(), 1);

        let (item, todo) = cal.find_by_uid("b").await.unwrap().unwrap();
        assert_eq!(todo.summary(), "Done");
        cal.update(&item, todo_ical("b", "Done twice", TodoStatus::Completed, None)).await.unwrap();
        assert_eq!(cal.todo("b").unwrap().summary(), "Done twice");

        // The etag has changed, the old handle is stale
        assert!(cal.update(&item, todo_ical("b", "Stale", TodoStatus::Completed, None)).await.is_err());
        assert_eq!(cal.n_writes(), 1);
    }

    #[tokio::test]
    async fn inventory_records_writes() {
        let inventory = MockInventory::new();
        inventory.add_task(task(3, "Descale the kettle"));
        inventory.set_next_task_id(42);

        let id = inventory.create_task(&NewTask { name: "Water plants".to_string(), ..NewTask::default() }).await.unwrap();
        assert_eq!(id, 42);
        inventory.complete_task(42).await.unwrap();
        assert!(inventory.task(42).unwrap().done);
        assert!(inventory.undo_task(7).await.is_err());

        let calls = inventory.calls();
        assert_eq!(calls.created.len(), 1);
        assert_eq!(calls.completed, vec![42]);
        assert_eq!(calls.n_writes(), 2);
    }
}
