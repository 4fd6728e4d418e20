//! Calendar-side to-do items (iCal `VTODO` components)

use std::fmt::{Display, Formatter};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Grocy uses this year as a "never" placeholder (e.g. `2999-12-31 23:59:59` for chores without a schedule)
pub const NEVER_YEAR: i32 = 2999;

/// The completion status of a to-do.
///
/// A Grocy task is either done or not, but calendars know more values (`IN-PROCESS`, `CANCELLED`, or anything an app makes up).
/// These are kept as they are, so that only an explicit `NEEDS-ACTION` reopens a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TodoStatus {
    NeedsAction,
    Completed,
    InProcess,
    Cancelled,
    Other(String),
}

impl TodoStatus {
    pub fn from_done(done: bool) -> Self {
        if done { TodoStatus::Completed } else { TodoStatus::NeedsAction }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TodoStatus::Completed)
    }

    pub fn is_needs_action(&self) -> bool {
        matches!(self, TodoStatus::NeedsAction)
    }

    pub fn as_str(&self) -> &str {
        match self {
            TodoStatus::NeedsAction => "NEEDS-ACTION",
            TodoStatus::Completed => "COMPLETED",
            TodoStatus::InProcess => "IN-PROCESS",
            TodoStatus::Cancelled => "CANCELLED",
            TodoStatus::Other(value) => value,
        }
    }

    /// Parse an iCal `STATUS` value. A missing status means `NEEDS-ACTION`
    pub fn parse(value: Option<&str>) -> Self {
        let value = match value.map(str::trim).filter(|v| v.is_empty() == false) {
            None => return TodoStatus::NeedsAction,
            Some(value) => value,
        };
        match value.to_ascii_uppercase().as_str() {
            "NEEDS-ACTION" => TodoStatus::NeedsAction,
            "COMPLETED" => TodoStatus::Completed,
            "IN-PROCESS" => TodoStatus::InProcess,
            "CANCELLED" => TodoStatus::Cancelled,
            _ => TodoStatus::Other(value.to_string()),
        }
    }
}

impl Default for TodoStatus {
    fn default() -> Self {
        TodoStatus::NeedsAction
    }
}

impl Display for TodoStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}


/// A due date, which is either an all-day date or a (floating) date-time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Due {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Due {
    /// Parse a Grocy timestamp (`YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`)
    pub fn from_grocy(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
            return Some(Due::DateTime(dt));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M") {
            return Some(Due::DateTime(dt));
        }
        NaiveDate::parse_from_str(value, "%Y-%m-%d").ok().map(Due::Date)
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            Due::Date(d) => *d,
            Due::DateTime(dt) => dt.date(),
        }
    }

    /// Whether this is the far-future placeholder Grocy uses for "no due date"
    pub fn is_never(&self) -> bool {
        self.date().year() >= NEVER_YEAR
    }

    /// The Grocy representation, always with a time part (`00:00:00` for all-day dates)
    pub fn to_grocy(&self) -> String {
        match self {
            Due::Date(d) => format!("{} 00:00:00", d.format("%Y-%m-%d")),
            Due::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// The `YYYY-MM-DD` part
    pub fn to_date_string(&self) -> String {
        self.date().format("%Y-%m-%d").to_string()
    }
}

/// Normalizes a Grocy timestamp so that it can be compared to [`Due::to_grocy`].
/// Unparseable values are returned as-is.
pub fn normalize_grocy_due(value: &str) -> String {
    match Due::from_grocy(value) {
        Some(due) => due.to_grocy(),
        None => value.trim().to_string(),
    }
}


/// A to-do, as parsed from a calendar payload
#[derive(Clone, Debug, PartialEq)]
pub struct Todo {
    /// Persistent, globally unique identifier within the calendar
    uid: String,
    summary: String,
    description: Option<String>,
    due: Option<Due>,
    status: TodoStatus,
}

impl Todo {
    pub fn new(uid: String, summary: String, description: Option<String>, due: Option<Due>, status: TodoStatus) -> Self {
        Self { uid, summary, description, due, status }
    }

    pub fn uid(&self) -> &str                   { &self.uid }
    pub fn summary(&self) -> &str               { &self.summary }
    pub fn description(&self) -> Option<&str>   { self.description.as_deref() }
    pub fn due(&self) -> Option<&Due>           { self.due.as_ref() }
    pub fn status(&self) -> &TodoStatus         { &self.status }

    /// The description, with an absent one read as empty
    pub fn description_or_empty(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grocy_due_dates() {
        let due = Due::from_grocy("2024-05-01").unwrap();
        assert_eq!(due, Due::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        assert_eq!(due.to_grocy(), "2024-05-01 00:00:00");

        let due = Due::from_grocy("2024-05-01 18:30:00").unwrap();
        assert_eq!(due.to_grocy(), "2024-05-01 18:30:00");
        assert_eq!(due.to_date_string(), "2024-05-01");

        assert!(Due::from_grocy("").is_none());
        assert!(Due::from_grocy("tomorrow").is_none());
        assert!(Due::from_grocy("2999-12-31 23:59:59").unwrap().is_never());
    }

    #[test]
    fn normalization_makes_date_and_midnight_equal() {
        assert_eq!(normalize_grocy_due("2024-05-01"), normalize_grocy_due("2024-05-01 00:00:00"));
        assert_eq!(normalize_grocy_due(""), "");
    }

    #[test]
    fn status_parsing() {
        assert_eq!(TodoStatus::parse(Some("COMPLETED")), TodoStatus::Completed);
        assert_eq!(TodoStatus::parse(Some("in-process")), TodoStatus::InProcess);
        assert_eq!(TodoStatus::parse(Some("CANCELLED")).as_str(), "CANCELLED");
        assert_eq!(TodoStatus::parse(Some("X-WAITING")), TodoStatus::Other("X-WAITING".to_string()));
        assert_eq!(TodoStatus::parse(None), TodoStatus::NeedsAction);
        assert_eq!(TodoStatus::parse(Some(" ")), TodoStatus::NeedsAction);
        assert!(TodoStatus::Cancelled.is_needs_action() == false);
        assert_eq!(TodoStatus::from_done(true).to_string(), "COMPLETED");
    }
}
