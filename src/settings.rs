//! Runtime settings of the bridge

use serde::{Deserialize, Serialize};

/// Language of the notification texts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    De,
    En,
}

impl Default for Language {
    fn default() -> Self {
        Language::De
    }
}

/// Every setting of the bridge.
///
/// Missing fields take their default value, so that older settings files keep loading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub grocy_url: String,
    pub grocy_api_key: String,
    pub grocy_verify_ssl: bool,

    pub default_days_before_expiry: u32,
    /// 0 disables the periodic stock check
    pub check_interval_hours: u32,
    pub notify_expiring: bool,
    pub notify_expired: bool,
    pub notify_missing: bool,

    pub caldav_url: String,
    pub caldav_username: String,
    pub caldav_password: String,
    /// Appended to `caldav_url`, e.g. `remote.php/dav`
    pub caldav_path: String,
    /// Name of the calendar to sync with. The first calendar of the server is used when empty
    pub caldav_calendar: String,
    pub caldav_verify_ssl: bool,
    pub caldav_sync_enabled: bool,
    /// 0 disables the periodic sync
    pub caldav_sync_interval_minutes: u32,

    pub language: Language,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grocy_url: String::new(),
            grocy_api_key: String::new(),
            grocy_verify_ssl: true,
            default_days_before_expiry: 5,
            check_interval_hours: 6,
            notify_expiring: true,
            notify_expired: true,
            notify_missing: true,
            caldav_url: String::new(),
            caldav_username: String::new(),
            caldav_password: String::new(),
            caldav_path: String::new(),
            caldav_calendar: String::new(),
            caldav_verify_ssl: true,
            caldav_sync_enabled: false,
            caldav_sync_interval_minutes: 30,
            language: Language::default(),
        }
    }
}

impl Settings {
    /// The CalDAV URL, with `caldav_path` appended if there is one
    pub fn caldav_full_url(&self) -> String {
        let path = self.caldav_path.trim();
        if path.is_empty() {
            return self.caldav_url.clone();
        }
        format!("{}/{}", self.caldav_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub fn grocy_configured(&self) -> bool {
        self.grocy_url.is_empty() == false && self.grocy_api_key.is_empty() == false
    }

    pub fn caldav_calendar_name(&self) -> Option<&str> {
        Some(self.caldav_calendar.as_str()).filter(|name| name.is_empty() == false)
    }
}
