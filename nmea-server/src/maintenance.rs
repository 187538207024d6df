//! Periodic housekeeping for the contact database.
//!
//! Three independent tasks run on their own intervals:
//! 1. Track sampling appends the latest fix of every moving contact.
//! 2. Purging drops contacts older than the configured maximum age.
//! 3. Cache saving writes a snapshot to the persistent store.
//!
//! Each task has its own cancellation token, so one can be stopped without
//! touching the others. A failing cache save is logged and retried on the
//! next tick.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nmea_core::config::TrackingConfig;
use nmea_core::contact_db::{CacheStore, ContactDb};

pub type SharedCache = Arc<dyn CacheStore + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTask {
    TrackSampler,
    Purger,
    CacheSaver,
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MaintenanceTask::TrackSampler => "track-sampler",
            MaintenanceTask::Purger => "purger",
            MaintenanceTask::CacheSaver => "cache-saver",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaintenanceSettings {
    pub track_interval: Duration,
    pub purge_interval: Duration,
    pub cache_interval: Duration,
    /// Seconds since the last update after which a contact is purged.
    pub max_age_secs: f64,
}

impl MaintenanceSettings {
    pub fn from_config(cfg: &TrackingConfig) -> Self {
        MaintenanceSettings {
            track_interval: Duration::from_secs(cfg.track_interval_secs.max(1)),
            purge_interval: Duration::from_secs(cfg.purge_interval_secs.max(1)),
            cache_interval: Duration::from_secs(cfg.cache_interval_secs.max(1)),
            max_age_secs: cfg.max_age_secs as f64,
        }
    }
}

struct Handle {
    task: MaintenanceTask,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Running maintenance tasks.
pub struct Maintenance {
    handles: Vec<Handle>,
}

impl Maintenance {
    /// Spawn the tasks. Without a cache store the saver is not started.
    pub fn start(db: Arc<ContactDb>, cache: Option<SharedCache>, settings: MaintenanceSettings) -> Self {
        let mut handles = Vec::with_capacity(3);

        let sampler_db = Arc::clone(&db);
        handles.push(spawn_periodic(
            MaintenanceTask::TrackSampler,
            settings.track_interval,
            move || {
                let db = Arc::clone(&sampler_db);
                async move {
                    let sampled = db.sample_tracks();
                    if sampled > 0 {
                        debug!(sampled, "track points recorded");
                    }
                }
            },
        ));

        let purge_db = Arc::clone(&db);
        let max_age = settings.max_age_secs;
        handles.push(spawn_periodic(
            MaintenanceTask::Purger,
            settings.purge_interval,
            move || {
                let db = Arc::clone(&purge_db);
                async move {
                    let removed = db.purge(max_age);
                    if removed > 0 {
                        info!(removed, remaining = db.len(), "stale contacts purged");
                    }
                }
            },
        ));

        if let Some(store) = cache {
            handles.push(spawn_periodic(
                MaintenanceTask::CacheSaver,
                settings.cache_interval,
                move || save_snapshot(Arc::clone(&db), Arc::clone(&store)),
            ));
        }

        Maintenance { handles }
    }

    pub fn tasks(&self) -> Vec<MaintenanceTask> {
        self.handles.iter().map(|h| h.task).collect()
    }

    /// Stop one task. Returns false when it was not running.
    pub fn cancel(&self, task: MaintenanceTask) -> bool {
        match self.handles.iter().find(|h| h.task == task) {
            Some(h) if !h.cancel.is_cancelled() => {
                h.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self, task: MaintenanceTask) -> bool {
        self.handles
            .iter()
            .any(|h| h.task == task && !h.join.is_finished())
    }

    /// Cancel every task and wait for them to exit.
    pub async fn shutdown(self) {
        for h in &self.handles {
            h.cancel.cancel();
        }
        for h in self.handles {
            if let Err(e) = h.join.await {
                warn!(task = %h.task, error = %e, "maintenance task ended abnormally");
            }
        }
    }
}

/// Write one snapshot off the async runtime. Errors are logged only.
pub async fn save_snapshot(db: Arc<ContactDb>, store: SharedCache) {
    let result = tokio::task::spawn_blocking(move || db.save_cache(store.as_ref())).await;
    match result {
        Ok(Ok(saved)) => debug!(saved, "contact cache saved"),
        Ok(Err(e)) => warn!(error = %e, "contact cache save failed"),
        Err(e) => warn!(error = %e, "contact cache save panicked"),
    }
}

fn spawn_periodic<F, Fut>(task: MaintenanceTask, period: Duration, mut tick: F) -> Handle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately.
        interval.tick().await;
        debug!(task = %task, period_ms = period.as_millis() as u64, "maintenance task started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
        debug!(task = %task, "maintenance task stopped");
    });
    Handle { task, cancel, join }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use nmea_core::types::{now, Contact, ContactSource, ContactUpdate, NmeaError};
    use parking_lot::Mutex;
    use tokio::time::sleep;

    #[derive(Default)]
    struct MemoryStore {
        saves: Mutex<Vec<Vec<Contact>>>,
        fail: bool,
    }

    impl CacheStore for MemoryStore {
        fn save(&self, contacts: &[Contact]) -> nmea_core::Result<()> {
            if self.fail {
                return Err(NmeaError::Cache("disk full".into()));
            }
            self.saves.lock().push(contacts.to_vec());
            Ok(())
        }

        fn load(&self) -> nmea_core::Result<Vec<Contact>> {
            Ok(self.saves.lock().last().cloned().unwrap_or_default())
        }
    }

    fn fast() -> MaintenanceSettings {
        MaintenanceSettings {
            track_interval: Duration::from_millis(20),
            purge_interval: Duration::from_millis(20),
            cache_interval: Duration::from_millis(20),
            max_age_secs: 600.0,
        }
    }

    fn moving(db: &ContactDb, label: &str, lat: f64) {
        let update = ContactUpdate::new(ContactSource::Tll).with_position(lat, -8.7);
        db.upsert(label, &update);
    }

    #[test]
    fn test_settings_from_config() {
        let cfg = nmea_core::config::Config::default().tracking;
        let s = MaintenanceSettings::from_config(&cfg);
        assert_eq!(s.track_interval, Duration::from_secs(5));
        assert_eq!(s.purge_interval, Duration::from_secs(60));
        assert_eq!(s.cache_interval, Duration::from_secs(120));
        assert_eq!(s.max_age_secs, 600.0);
    }

    #[tokio::test]
    async fn test_tasks_sample_purge_and_save() {
        let db = Arc::new(ContactDb::default());
        moving(&db, "VESSEL1", 41.1);
        let mut stale = Contact::new("OLD", ContactSource::Csv, now() - 10_000.0);
        stale.lat = 40.0;
        stale.lon = -8.0;
        db.restore(vec![stale]);

        let store = Arc::new(MemoryStore::default());
        let m = Maintenance::start(db.clone(), Some(store.clone()), fast());
        assert_eq!(m.tasks().len(), 3);

        sleep(Duration::from_millis(150)).await;
        m.shutdown().await;

        assert!(db.get("OLD").is_none());
        assert!(db.track("VESSEL1").is_some());
        let saves = store.saves.lock();
        assert!(!saves.is_empty());
        assert!(saves.last().unwrap().iter().any(|c| c.label == "VESSEL1"));
    }

    #[tokio::test]
    async fn test_cancel_one_task_leaves_others() {
        let db = Arc::new(ContactDb::default());
        let m = Maintenance::start(db.clone(), None, fast());
        assert_eq!(
            m.tasks(),
            vec![MaintenanceTask::TrackSampler, MaintenanceTask::Purger]
        );

        assert!(m.cancel(MaintenanceTask::TrackSampler));
        assert!(!m.cancel(MaintenanceTask::TrackSampler));
        assert!(!m.cancel(MaintenanceTask::CacheSaver));
        sleep(Duration::from_millis(60)).await;
        assert!(!m.is_running(MaintenanceTask::TrackSampler));
        assert!(m.is_running(MaintenanceTask::Purger));

        // Sampler stopped: new movement produces no track.
        moving(&db, "LATE", 42.0);
        sleep(Duration::from_millis(60)).await;
        assert!(db.track("LATE").is_none());

        m.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_cache_keeps_running() {
        let db = Arc::new(ContactDb::default());
        moving(&db, "VESSEL1", 41.1);
        let store = Arc::new(MemoryStore {
            fail: true,
            ..Default::default()
        });
        let m = Maintenance::start(db.clone(), Some(store), fast());
        sleep(Duration::from_millis(80)).await;
        assert!(m.is_running(MaintenanceTask::CacheSaver));
        m.shutdown().await;
        assert_eq!(db.len(), 1);
    }
}
