//! The process-wide service: it runs the stock checks and the calendar syncs, on demand or periodically

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{self, Alert, AlertOptions};
use crate::client::Client;
use crate::error::SyncError;
use crate::inventory::GrocyClient;
use crate::mapper::{SyncEntry, SyncMapStatus};
use crate::notifiers::{Channel, Notifier};
use crate::scheduler::{JobId, Scheduler};
use crate::settings::Settings;
use crate::store::Store;
use crate::sync::{Reconciler, SyncStats};


/// Held for as long as a sync (or an operation that conflicts with a sync) runs
pub struct SyncGuard {
    flag: Arc<AtomicBool>,
}

impl SyncGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, SyncError> {
        match flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(Self { flag: Arc::clone(flag) }),
            Err(_) => Err(SyncError::AlreadyRunning),
        }
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}


pub struct Service {
    store: Store,
    scheduler: Scheduler,
    sync_running: Arc<AtomicBool>,
}

impl Service {
    /// Open the store in `data_dir`. No job is scheduled until [`Service::reschedule`] is called
    pub fn open(data_dir: &Path) -> Result<Arc<Self>, SyncError> {
        Ok(Arc::new(Self {
            store: Store::open(data_dir)?,
            scheduler: Scheduler::new(),
            sync_running: Arc::new(AtomicBool::new(false)),
        }))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Reserve the right to sync. Fails with [`SyncError::AlreadyRunning`] while another sync runs
    pub fn try_begin_sync(&self) -> Result<SyncGuard, SyncError> {
        SyncGuard::acquire(&self.sync_running)
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_running.load(Ordering::Acquire)
    }

    /// (Re-)register the periodic jobs from the current settings. This must be called after every settings change
    pub fn reschedule(self: &Arc<Self>) -> Result<(), SyncError> {
        let settings = self.store.settings()?;

        if settings.check_interval_hours > 0 {
            let service = Arc::clone(self);
            self.scheduler.replace(JobId::StockCheck, Duration::from_secs(u64::from(settings.check_interval_hours) * 3600), move || {
                let service = Arc::clone(&service);
                async move { service.scheduled_stock_check().await }
            });
        } else {
            self.scheduler.cancel(JobId::StockCheck);
        }

        if settings.caldav_sync_enabled && settings.caldav_sync_interval_minutes > 0 {
            let service = Arc::clone(self);
            self.scheduler.replace(JobId::CalendarSync, Duration::from_secs(u64::from(settings.caldav_sync_interval_minutes) * 60), move || {
                let service = Arc::clone(&service);
                async move { service.scheduled_calendar_sync().await }
            });
        } else {
            self.scheduler.cancel(JobId::CalendarSync);
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }


    async fn scheduled_stock_check(&self) {
        if let Err(err) = self.run_stock_check().await {
            log::error!("Stock check failed: {}", err);
        }
    }

    async fn scheduled_calendar_sync(&self) {
        match self.run_calendar_sync().await {
            Ok(None) => log::debug!("Calendar sync is disabled"),
            Ok(Some(stats)) => log::info!("Calendar sync finished: {:?}", stats),
            Err(SyncError::AlreadyRunning) => log::info!("A sync is already running, skipping this one"),
            Err(err) => log::error!("Calendar sync failed: {}", err),
        }
    }

    /// Checks the stock and notifies every enabled channel. Returns the alerts that have been sent
    pub async fn run_stock_check(&self) -> Result<Vec<Alert>, SyncError> {
        log::info!("Starting a stock check");
        let settings = self.store.settings()?;
        if settings.grocy_configured() == false {
            log::warn!("Grocy is not configured, skipping the stock check");
            return Ok(Vec::new());
        }

        let options = AlertOptions::from_settings(&settings);
        let overrides = self.store.product_overrides()?;
        let grocy = GrocyClient::from_settings(&settings)?;
        let volatile = grocy.volatile_stock(alerts::query_window(options.default_days, &overrides)).await?;

        let today = chrono::Local::now().naive_local().date();
        let alerts = alerts::evaluate(&volatile, &overrides, &options, today);
        if alerts.is_empty() {
            log::info!("No alert today");
            return Ok(alerts);
        }

        let (title, message) = alerts::format_alerts(&alerts, options.language);
        self.notify_all(&alerts, &title, &message).await?;
        Ok(alerts)
    }

    /// A failing channel never prevents the other ones to be notified
    async fn notify_all(&self, alerts: &[Alert], title: &str, message: &str) -> Result<(), SyncError> {
        let notifier = Notifier::new()?;
        for record in self.store.channels()? {
            if record.enabled == false {
                continue;
            }
            let result = match Channel::from_record(&record) {
                Err(err) => Err(err),
                Ok(channel) => notifier.send(&channel, title, message).await,
            };

            match result {
                Ok(()) => {
                    for alert in alerts {
                        self.store.add_log_entry(Some(&alert.product_name), alert.kind.as_str(), &record.name, &alert.detail, true)?;
                    }
                    log::info!("Notification sent via {}", record.name);
                },
                Err(err) => {
                    log::error!("Channel {} failed: {}", record.name, err);
                    self.store.add_log_entry(None, "error", &record.name, &err.to_string(), false)?;
                },
            }
        }
        Ok(())
    }

    /// Sends a test message on a channel
    pub async fn test_channel(&self, channel_id: i64) -> Result<(), SyncError> {
        let record = match self.store.channels()?.into_iter().find(|c| c.id == channel_id) {
            None => return Err(SyncError::configuration(format!("No channel with id {}", channel_id))),
            Some(record) => record,
        };
        let channel = Channel::from_record(&record)?;
        let result = Notifier::new()?.test(&channel).await;
        let (message, success) = match &result {
            Ok(()) => (crate::notifiers::TEST_MESSAGE.to_string(), true),
            Err(err) => (err.to_string(), false),
        };
        self.store.add_log_entry(None, "test", &record.name, &message, success)?;
        result
    }


    /// The periodic sync. Returns `None` when the calendar sync is disabled
    pub async fn run_calendar_sync(&self) -> Result<Option<SyncStats>, SyncError> {
        let settings = self.store.settings()?;
        if settings.caldav_sync_enabled == false {
            return Ok(None);
        }
        self.sync_with(&settings).await.map(Some)
    }

    /// A sync triggered by hand. It runs even when the periodic sync is disabled
    pub async fn sync_now(&self) -> Result<SyncStats, SyncError> {
        let settings = self.store.settings()?;
        self.sync_with(&settings).await
    }

    async fn sync_with(&self, settings: &Settings) -> Result<SyncStats, SyncError> {
        let _guard = self.try_begin_sync()?;

        if settings.grocy_configured() == false {
            return Err(SyncError::configuration("Grocy URL or API key is not configured"));
        }
        let mut client = Client::from_settings(settings)?;
        let grocy = GrocyClient::from_settings(settings)?;
        let map = self.store.open_sync_map()?;

        // Connection failures abort the run before anything is written
        let calendar = client.connect(settings.caldav_calendar_name()).await?;

        let mut reconciler = Reconciler::new(calendar, grocy, map);
        let stats = reconciler.sync().await;
        Ok(stats)
    }

    /// Names of the calendars of the configured CalDAV server
    pub async fn list_calendars(&self) -> Result<Vec<String>, SyncError> {
        let settings = self.store.settings()?;
        Client::from_settings(&settings)?.list_calendars().await
    }

    pub async fn test_caldav(&self) -> Result<(bool, String), SyncError> {
        let settings = self.store.settings()?;
        Ok(crate::client::test_connection(&settings).await)
    }

    pub async fn test_grocy(&self) -> Result<(bool, String), SyncError> {
        let settings = self.store.settings()?;
        Ok(GrocyClient::from_settings(&settings)?.test_connection().await)
    }

    pub fn sync_entries(&self) -> Result<Vec<SyncEntry>, SyncError> {
        Ok(self.store.open_sync_map()?.entries().into_iter().cloned().collect())
    }

    pub fn sync_status(&self) -> Result<SyncMapStatus, SyncError> {
        Ok(self.store.open_sync_map()?.status())
    }

    /// Forget every link between Grocy and the calendar. The next sync will be a full one
    pub fn clear_sync_map(&self) -> Result<(), SyncError> {
        let _guard = self.try_begin_sync()?;
        self.store.open_sync_map()?.clear()?;
        log::info!("Sync map cleared");
        Ok(())
    }
}
