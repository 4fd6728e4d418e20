//! This module provides ways to tweak mocked calendars and inventories, so that they can return errors on some tests
#![cfg(feature = "in_memory_mocks")]

use std::error::Error;

/// This stores some behaviour tweaks, that describe how a mocked instance will behave during a given test
///
/// So that a functions fails _n_ times after _m_ initial successes, set `(m, n)` for the suited parameter
#[derive(Default, Clone, Debug)]
pub struct MockBehaviour {
    /// If this is true, every action will be allowed
    pub is_suspended: bool,

    // From the TodoStore trait
    pub list_todos_behaviour: (u32, u32),
    pub save_new_behaviour: (u32, u32),
    pub update_todo_behaviour: (u32, u32),

    // From the InventoryApi trait
    pub get_tasks_behaviour: (u32, u32),
    pub get_chores_behaviour: (u32, u32),
    pub complete_task_behaviour: (u32, u32),
    pub undo_task_behaviour: (u32, u32),
    pub update_task_behaviour: (u32, u32),
    pub create_task_behaviour: (u32, u32),
    pub execute_chore_behaviour: (u32, u32),
}

impl MockBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    /// All items will fail at once, for `n_fails` times
    pub fn fail_now(n_fails: u32) -> Self {
        Self {
            is_suspended: false,
            list_todos_behaviour: (0, n_fails),
            save_new_behaviour: (0, n_fails),
            update_todo_behaviour: (0, n_fails),
            get_tasks_behaviour: (0, n_fails),
            get_chores_behaviour: (0, n_fails),
            complete_task_behaviour: (0, n_fails),
            undo_task_behaviour: (0, n_fails),
            update_task_behaviour: (0, n_fails),
            create_task_behaviour: (0, n_fails),
            execute_chore_behaviour: (0, n_fails),
        }
    }

    /// Suspend this mock behaviour until you call `resume`
    pub fn suspend(&mut self) {
        self.is_suspended = true;
    }
    /// Make this behaviour active again
    pub fn resume(&mut self) {
        self.is_suspended = false;
    }

    pub fn can_list_todos(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.list_todos_behaviour, "list_todos")
    }
    pub fn can_save_new(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.save_new_behaviour, "save_new")
    }
    pub fn can_update_todo(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.update_todo_behaviour, "update_todo")
    }
    pub fn can_get_tasks(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.get_tasks_behaviour, "get_tasks")
    }
    pub fn can_get_chores(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.get_chores_behaviour, "get_chores")
    }
    pub fn can_complete_task(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.complete_task_behaviour, "complete_task")
    }
    pub fn can_undo_task(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.undo_task_behaviour, "undo_task")
    }
    pub fn can_update_task(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.update_task_behaviour, "update_task")
    }
    pub fn can_create_task(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.create_task_behaviour, "create_task")
    }
    pub fn can_execute_chore(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.execute_chore_behaviour, "execute_chore")
    }
}


/// Return Ok(()) in case the value is `(1+, _)` or `(_, 0)`, or return Err and decrement otherwise
fn decrement(value: &mut (u32, u32), descr: &str) -> Result<(), Box<dyn Error>> {
    let remaining_successes = value.0;
    let remaining_failures = value.1;

    if remaining_successes > 0 {
        value.0 = value.0 - 1;
        log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
        Ok(())
    } else {
        if remaining_failures > 0 {
            value.1 = value.1 - 1;
            log::debug!("Mock behaviour: failing a {} ({:?})", descr, value);
            Err(format!("Mocked behaviour requires this {} to fail this time. ({:?})", descr, value).into())
        } else {
            log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
            Ok(())
        }
    }
}
