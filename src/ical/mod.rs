//! This module handles conversion between iCal files and internal representations
//!
//! Parsing relies on the `ical` crate, generation on the `ics` crate

mod parser;
pub use parser::{parse, extract_due_date};
mod builder;
pub use builder::{build_from_task, build_from_chore};

pub fn default_prod_id() -> String {
    crate::config::prod_id()
}
