//! A module to parse ICal files

use std::error::Error;

use chrono::{NaiveDate, NaiveDateTime};
use ical::parser::ical::component::IcalTodo;
use ical::property::Property;

use crate::todo::{Due, Todo, TodoStatus};


/// Parse an iCal file into every [`Todo`] it contains.
///
/// A single payload may hold several `VCALENDAR` objects, and each of them several `VTODO`s.
/// Other components (events, journals...) are ignored.
pub fn parse(content: &str) -> Result<Vec<Todo>, Box<dyn Error>> {
    let reader = ical::IcalParser::new(content.as_bytes());

    let mut todos = Vec::new();
    let mut n_calendars = 0;
    for calendar in reader {
        let calendar = match calendar {
            Err(err) => return Err(format!("Unable to parse iCal data: {}", err).into()),
            Ok(calendar) => calendar,
        };
        n_calendars += 1;

        for ical_todo in &calendar.todos {
            match parse_todo(ical_todo) {
                Some(todo) => todos.push(todo),
                None => log::warn!("Ignoring a VTODO without UID"),
            }
        }
    }

    if n_calendars == 0 {
        return Err("Invalid iCal data to parse: no VCALENDAR found".into());
    }
    Ok(todos)
}

/// Returns the due date of a to-do as `YYYY-MM-DD`, or an empty string when it has none.
///
/// The far-future placeholder Grocy uses for "never" is reported as no due date.
pub fn extract_due_date(todo: &Todo) -> String {
    match todo.due() {
        None => String::new(),
        Some(due) if due.is_never() => String::new(),
        Some(due) => due.to_date_string(),
    }
}

fn parse_todo(todo: &IcalTodo) -> Option<Todo> {
    let uid = property_value(&todo.properties, "UID")?.trim().to_string();
    if uid.is_empty() {
        return None;
    }

    let summary = property_value(&todo.properties, "SUMMARY")
        .map(unescape_text)
        .unwrap_or_default();
    let description = property_value(&todo.properties, "DESCRIPTION")
        .map(unescape_text);
    let status = TodoStatus::parse(property_value(&todo.properties, "STATUS"));
    let due = find_property(&todo.properties, "DUE").and_then(parse_due);

    Some(Todo::new(uid, summary, description, due, status))
}

fn find_property<'a>(properties: &'a [Property], name: &str) -> Option<&'a Property> {
    properties.iter().find(|prop| prop.name.eq_ignore_ascii_case(name))
}

fn property_value<'a>(properties: &'a [Property], name: &str) -> Option<&'a str> {
    find_property(properties, name).and_then(|prop| prop.value.as_deref())
}

fn is_date_value(prop: &Property) -> bool {
    prop.params.as_ref()
        .map(|params| params.iter().any(|(key, values)| {
            key.eq_ignore_ascii_case("VALUE") && values.iter().any(|v| v.eq_ignore_ascii_case("DATE"))
        }))
        .unwrap_or(false)
}

/// Time zones are not converted: `Z` and `TZID` values are read as floating local times
fn parse_due(prop: &Property) -> Option<Due> {
    let value = prop.value.as_deref()?.trim();
    let value = value.trim_end_matches('Z');

    if is_date_value(prop) || value.len() == 8 {
        // The value is not necessarily ASCII
        return match value.get(..8).map(|date| NaiveDate::parse_from_str(date, "%Y%m%d")) {
            Some(Ok(date)) => Some(Due::Date(date)),
            _ => {
                log::warn!("Ignoring invalid DUE date {:?}", value);
                None
            }
        };
    }
    match NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        Ok(dt) => Some(Due::DateTime(dt)),
        Err(err) => {
            log::warn!("Ignoring invalid DUE value {:?}: {}", value, err);
            None
        }
    }
}

/// Reverts the TEXT escaping of RFC5545 (section 3.3.11)
fn unescape_text(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => result.push('\n'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }
    result
}
