//! A module to build ICal files

use std::error::Error;

use chrono::{DateTime, Utc};
use ics::parameters::Value;
use ics::properties::{Description, Due as DueProperty, LastModified, PercentComplete, Status, Summary};
use ics::{escape_text, ICalendar, ToDo};

use crate::inventory::{GrocyChore, GrocyTask};
use crate::mapper::{EntityKind, SyntheticUid};
use crate::todo::Due;

/// Create an iCal to-do from a Grocy task.
///
/// `uid` is the UID to write. When `None`, the synthetic UID of this task is used.
pub fn build_from_task(task: &GrocyTask, uid: Option<&str>) -> Result<String, Box<dyn Error>> {
    build_from_task_at(task, uid, &Utc::now())
}

/// Create an iCal to-do from a Grocy chore.
///
/// Chores have no completion state in Grocy, so they always are `NEEDS-ACTION`.
pub fn build_from_chore(chore: &GrocyChore) -> Result<String, Box<dyn Error>> {
    build_from_chore_at(chore, &Utc::now())
}

fn build_from_task_at(task: &GrocyTask, uid: Option<&str>, now: &DateTime<Utc>) -> Result<String, Box<dyn Error>> {
    let uid = match uid {
        Some(uid) => uid.to_string(),
        None => SyntheticUid::for_entity(EntityKind::Task, task.id),
    };
    let name = if task.name.is_empty() { format!("Task #{}", task.id) } else { task.name.clone() };
    let due = task.due_date.as_deref().and_then(Due::from_grocy);

    Ok(build_todo(
        &uid,
        &name,
        task.description.as_deref(),
        due,
        task.done,
        now,
    ))
}

fn build_from_chore_at(chore: &GrocyChore, now: &DateTime<Utc>) -> Result<String, Box<dyn Error>> {
    let uid = SyntheticUid::for_entity(EntityKind::Chore, chore.chore_id);
    let name = if chore.chore_name.is_empty() { format!("Chore #{}", chore.chore_id) } else { chore.chore_name.clone() };
    let due = chore.next_estimated_execution_time.as_deref().and_then(Due::from_grocy);

    Ok(build_todo(
        &uid,
        &name,
        chore.description.as_deref(),
        due,
        false,
        now,
    ))
}

fn build_todo(uid: &str, name: &str, description: Option<&str>, due: Option<Due>, completed: bool, now: &DateTime<Utc>) -> String {
    let s_now = format_date_time(now);

    let mut todo = ToDo::new(uid.to_string(), s_now.clone());
    todo.push(Summary::new(escape_text(name.to_string())));

    if let Some(description) = description.filter(|d| d.is_empty() == false) {
        todo.push(Description::new(escape_text(description.to_string())));
    }

    // The "never" placeholder means there is no due date at all
    match due.filter(|due| due.is_never() == false) {
        None => {},
        Some(Due::Date(date)) => {
            let mut prop = DueProperty::new(date.format("%Y%m%d").to_string());
            prop.add(Value::DATE);
            todo.push(prop);
        },
        Some(Due::DateTime(dt)) => {
            todo.push(DueProperty::new(dt.format("%Y%m%dT%H%M%S").to_string()));
        },
    }

    if completed {
        todo.push(Status::completed());
        todo.push(PercentComplete::new("100"));
    } else {
        todo.push(Status::needs_action());
    }
    todo.push(LastModified::new(s_now));

    let mut calendar = ICalendar::new("2.0", super::default_prod_id());
    calendar.add_todo(todo);

    calendar.to_string()
}

fn format_date_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}
