//! This module maps Grocy tasks and chores to calendar to-dos, and remembers what has been synced
//!
//! The [`SyncMap`] is the only durable memory the sync engine has between two runs: CalDAV offers no reliable change feed.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Prefix of the UIDs of to-dos created from Grocy tasks
pub const UID_TASK_PREFIX: &str = "grocy-task-";
/// Prefix of the UIDs of to-dos created from Grocy chores
pub const UID_CHORE_PREFIX: &str = "grocy-chore-";
/// Suffix of every UID this crate generates. Any UID ending with it has been authored by us
pub const UID_DOMAIN: &str = "@grocylink";

/// The Grocy ID of sentinel mappings, i.e. external to-dos that are deliberately not linked to any Grocy record
pub const SENTINEL_ID: i64 = 0;

pub const DIRECTION_TO_CALENDAR: &str = "inventory→calendar";
pub const DIRECTION_TO_INVENTORY: &str = "calendar→inventory";
pub const DIRECTION_DUPLICATE: &str = "calendar→inventory (duplicate)";


#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Chore,
}

impl EntityKind {
    fn uid_prefix(&self) -> &'static str {
        match self {
            EntityKind::Task => UID_TASK_PREFIX,
            EntityKind::Chore => UID_CHORE_PREFIX,
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Task => write!(f, "task"),
            EntityKind::Chore => write!(f, "chore"),
        }
    }
}


/// The scheme of the UIDs this crate generates: `grocy-task-<id>@grocylink` and `grocy-chore-<id>@grocylink`
pub struct SyntheticUid;

impl SyntheticUid {
    pub fn for_entity(kind: EntityKind, id: i64) -> String {
        format!("{}{}{}", kind.uid_prefix(), id, UID_DOMAIN)
    }

    /// Returns the Grocy record a synthetic UID points to, or `None` if this is not a (valid) synthetic UID
    pub fn parse(uid: &str) -> Option<(EntityKind, i64)> {
        let inner = uid.strip_suffix(UID_DOMAIN)?;
        for kind in [EntityKind::Task, EntityKind::Chore].iter() {
            if let Some(id) = inner.strip_prefix(kind.uid_prefix()) {
                return id.parse().ok().map(|id| (*kind, id));
            }
        }
        None
    }

    /// Whether this UID has been created by this crate (even if it is not a valid synthetic UID)
    pub fn is_self_authored(uid: &str) -> bool {
        uid.ends_with(UID_DOMAIN)
    }
}


/// The last known state of a Grocy record and its calendar counterpart
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub entity_kind: EntityKind,
    /// The Grocy ID. [`SENTINEL_ID`] for external to-dos that are not linked on purpose
    pub entity_id: i64,
    /// The UID of the calendar to-do. This is the key used to find it on every run
    pub external_uid: String,
    /// Last observed completion status (e.g. `NEEDS-ACTION`, `COMPLETED`)
    pub last_status: String,
    pub last_summary: Option<String>,
    pub last_due: Option<String>,
    pub last_synced: DateTime<Utc>,
    /// Where the last change came from. Only used for diagnostics
    #[serde(default)]
    pub sync_direction: String,
}

impl SyncEntry {
    pub fn is_sentinel(&self) -> bool {
        self.entity_id == SENTINEL_ID
    }
}

/// Counters about the content of a [`SyncMap`]
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SyncMapStatus {
    pub tasks_synced: usize,
    pub chores_synced: usize,
    pub total_synced: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Default, Debug, PartialEq, Serialize, Deserialize)]
struct MapData {
    entries: Vec<SyncEntry>,
}


/// The cross-reference table between Grocy records and calendar to-dos.
///
/// There is at most one entry per (kind, id). Every write is immediately persisted to the backing file, if any.
#[derive(Debug, PartialEq)]
pub struct SyncMap {
    backing_file: Option<PathBuf>,
    entries: BTreeMap<(EntityKind, i64), SyncEntry>,
}

impl SyncMap {
    /// Initialize an empty map, that will be stored into `path`
    pub fn new(path: &Path) -> Self {
        Self {
            backing_file: Some(PathBuf::from(path)),
            entries: BTreeMap::new(),
        }
    }

    /// Initialize an empty map that is never persisted
    pub fn in_memory() -> Self {
        Self {
            backing_file: None,
            entries: BTreeMap::new(),
        }
    }

    /// Initialize a map from the content of a valid backing file if it exists.
    /// Returns an error otherwise
    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        let data: MapData = match std::fs::File::open(path) {
            Err(err) => {
                return Err(SyncError::storage(format!("Unable to open file {:?}: {}", path, err)));
            },
            Ok(file) => serde_json::from_reader(std::io::BufReader::new(file))?,
        };

        let mut entries = BTreeMap::new();
        for entry in data.entries {
            entries.insert((entry.entity_kind, entry.entity_id), entry);
        }

        Ok(Self {
            backing_file: Some(PathBuf::from(path)),
            entries,
        })
    }

    /// Load the map from `path`, or start with an empty one when the file does not exist yet
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::new(path))
        }
    }

    /// Store the current map to its backing file
    fn save_to_file(&self) -> Result<(), SyncError> {
        let path = match &self.backing_file {
            None => return Ok(()),
            Some(path) => path,
        };

        let data = MapData { entries: self.entries.values().cloned().collect() };
        let tmp_path = path.with_extension("json.tmp");
        let file = std::fs::File::create(&tmp_path)
            .map_err(|err| SyncError::storage(format!("Unable to save file {:?}: {}", tmp_path, err)))?;
        serde_json::to_writer_pretty(file, &data)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn lookup(&self, kind: EntityKind, id: i64) -> Option<&SyncEntry> {
        self.entries.get(&(kind, id))
    }

    pub fn lookup_by_uid(&self, uid: &str) -> Option<&SyncEntry> {
        self.entries.values().find(|entry| entry.external_uid == uid)
    }

    /// Insert the entry for (kind, id), or overwrite every of its fields if it exists already.
    /// `last_synced` is set to now.
    pub fn upsert(&mut self, kind: EntityKind, id: i64, uid: &str, status: &str,
                  summary: Option<&str>, due: Option<&str>, direction: &str) -> Result<(), SyncError>
    {
        let entry = SyncEntry {
            entity_kind: kind,
            entity_id: id,
            external_uid: uid.to_string(),
            last_status: status.to_string(),
            last_summary: summary.map(String::from),
            last_due: due.map(String::from),
            last_synced: Utc::now(),
            sync_direction: direction.to_string(),
        };
        log::trace!("Recording {} {} <-> {} ({}, {})", kind, id, uid, status, direction);
        self.entries.insert((kind, id), entry);
        self.save_to_file()
    }

    /// Delete a single entry. The next sync will handle the record as if it had never been synced
    pub fn remove(&mut self, kind: EntityKind, id: i64) -> Result<Option<SyncEntry>, SyncError> {
        let removed = self.entries.remove(&(kind, id));
        self.save_to_file()?;
        Ok(removed)
    }

    /// Wipe the whole table, e.g. to force a full resync
    pub fn clear(&mut self) -> Result<(), SyncError> {
        self.entries.clear();
        self.save_to_file()
    }

    /// Every entry, ordered by (kind, id)
    pub fn entries(&self) -> Vec<&SyncEntry> {
        self.entries.values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self) -> SyncMapStatus {
        SyncMapStatus {
            tasks_synced: self.entries.keys().filter(|(kind, _)| *kind == EntityKind::Task).count(),
            chores_synced: self.entries.keys().filter(|(kind, _)| *kind == EntityKind::Chore).count(),
            total_synced: self.entries.len(),
            last_sync: self.entries.values().map(|entry| entry.last_synced).max(),
        }
    }
}
