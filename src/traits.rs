//! The two data sources the sync engine talks to

use std::error::Error;

use async_trait::async_trait;

use crate::todo::Todo;
use crate::inventory::{GrocyChore, GrocyTask, NewTask, TaskUpdate};

/// A to-do as fetched from a calendar: the raw iCal data, and a handle the calendar needs to update it in place
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteTodo {
    /// Where this item lives (for CalDAV servers, its URL)
    pub href: String,
    /// The version tag the server gave (e.g. a WebDAV `etag`), if any
    pub etag: Option<String>,
    /// The iCal payload
    pub data: String,
}

/// A calendar that stores to-dos.
///
/// CalDAV offers no reliable server-side index on UIDs, so looking up an item by UID is a scan over [`TodoStore::list_all_todos`].
#[async_trait]
pub trait TodoStore {
    /// Returns every to-do of this calendar.
    ///
    /// Implementors must honour `include_completed`: some servers leave completed items out of their default answers,
    /// and the sync engine would then never notice a completion.
    async fn list_all_todos(&self, include_completed: bool) -> Result<Vec<RemoteTodo>, Box<dyn Error>>;

    /// Store a new to-do
    async fn save_new(&mut self, ical: String) -> Result<(), Box<dyn Error>>;

    /// Overwrite an existing to-do. `item` must be a handle returned by this calendar in the current run
    async fn update(&mut self, item: &RemoteTodo, ical: String) -> Result<(), Box<dyn Error>>;

    /// Finds the to-do that has the given UID.
    ///
    /// This is O(n) in the size of the calendar. Unparseable items are skipped.
    async fn find_by_uid(&self, uid: &str) -> Result<Option<(RemoteTodo, Todo)>, Box<dyn Error>> {
        let items = self.list_all_todos(true).await?;
        for item in items {
            let todos = match crate::ical::parse(&item.data) {
                Err(err) => {
                    log::debug!("Ignoring unparseable item {} while looking for {}: {}", item.href, uid, err);
                    continue;
                },
                Ok(todos) => todos,
            };
            if let Some(todo) = todos.into_iter().find(|todo| todo.uid() == uid) {
                return Ok(Some((item, todo)));
            }
        }
        Ok(None)
    }
}

/// The subset of the Grocy API the sync engine needs
#[async_trait]
pub trait InventoryApi {
    /// Every task, including the done ones
    async fn get_all_tasks(&self) -> Result<Vec<GrocyTask>, Box<dyn Error>>;
    async fn get_chores(&self) -> Result<Vec<GrocyChore>, Box<dyn Error>>;

    async fn complete_task(&self, task_id: i64) -> Result<(), Box<dyn Error>>;
    async fn undo_task(&self, task_id: i64) -> Result<(), Box<dyn Error>>;
    async fn update_task(&self, task_id: i64, update: &TaskUpdate) -> Result<(), Box<dyn Error>>;
    /// Create a task, and return its new ID
    async fn create_task(&self, task: &NewTask) -> Result<i64, Box<dyn Error>>;

    /// Track an execution of a chore
    async fn execute_chore(&self, chore_id: i64) -> Result<(), Box<dyn Error>>;
}
