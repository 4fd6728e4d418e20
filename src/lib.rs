//! This crate bridges a [Grocy](https://grocy.info) instance with the outside world.
//!
//! It provides:
//! * a bidirectional sync between Grocy tasks and chores and the to-dos of a CalDAV calendar (see the [`sync`] module).
//!   The CalDAV client in the [`client`] module and the Grocy client in the [`inventory`] module can also be used on their own.
//! * stock alerts (expiring, expired and missing products) that are pushed to notification channels (see [`alerts`] and [`notifiers`])
//!
//! Both run periodically, driven by a [`Service`](service::Service).
//!
//! The sync engine talks to its two data sources through the traits of the [`traits`] module,
//! so that in-memory mocks (the `mock` module, with the `in_memory_mocks` feature) can be used in place of actual servers.

pub mod traits;
pub mod error;
pub use error::SyncError;

pub mod calendar;
pub mod todo;
pub use todo::Todo;
pub mod ical;
pub mod mapper;
pub use mapper::SyncMap;
pub mod sync;
pub use sync::{Reconciler, SyncStats};

pub mod client;
pub mod inventory;
pub mod resource;

pub mod alerts;
pub mod notifiers;
pub mod scheduler;
pub mod service;

pub mod config;
pub mod crypto;
pub mod settings;
pub mod store;
pub mod utils;

pub mod mock;
pub mod mock_behaviour;

/// Unless you have specific needs, you should probably use this type to sync a CalDAV server with Grocy
pub type CalDavReconciler = Reconciler<calendar::remote_calendar::RemoteCalendar, inventory::GrocyClient>;
