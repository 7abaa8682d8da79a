use chrono::{Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::AppConfig;

mod sled_store;
mod sqlite_store;

pub use sled_store::SledStore;
pub use sqlite_store::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// One analysis request/response pair as accepted for the audit log.
/// `created_at` is filled by the store at insert time.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub device_id: String,
    pub language: String,
    pub tone: String,
    pub request_data: String,
    pub response_data: Option<String>,
    pub status_code: u16,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub device_id: String,
    pub language: String,
    pub tone: String,
    pub request_data: String,
    pub response_data: Option<String>,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceCount {
    pub device_id: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateCount {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogStats {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub by_device: Vec<DeviceCount>,
    pub by_date: Vec<DateCount>,
}

/// Daily usage counters plus the append-only analysis log.
///
/// Both backends must look identical from the request handlers' point of
/// view. `increment_usage` is the only mutation that has to be atomic with
/// respect to concurrent callers for the same device.
pub trait UsageStore: Send + Sync {
    /// Ensures the usage and log collections exist. Safe to call repeatedly.
    fn init(&self) -> Result<(), StoreError>;

    /// Today's count for the device, 0 if it never analyzed today.
    /// Pure read; never creates a record.
    fn get_usage_count(&self, device_id: &str) -> Result<u32, StoreError>;

    /// Atomically create-or-increment today's record and return the
    /// post-increment count.
    fn increment_usage(&self, device_id: &str) -> Result<u32, StoreError>;

    fn save_analysis_log(&self, entry: &NewLogEntry) -> Result<(), StoreError>;

    /// Most-recent-first, at most `limit`, optionally filtered by device.
    fn get_logs(&self, limit: u32, device_id: Option<&str>) -> Result<Vec<LogEntry>, StoreError>;

    fn get_logs_stats(&self) -> Result<LogStats, StoreError>;

    /// Drops usage rows and log entries dated before now - retention_days.
    fn cleanup_old_data(&self, retention_days: u32) -> Result<(), StoreError>;
}

pub fn unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// All calendar math runs in KST; a device's "day" must not shift with the
/// server's locale.
fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

pub fn today_kst() -> String {
    Utc::now().with_timezone(&kst()).format("%Y-%m-%d").to_string()
}

pub fn now_kst() -> String {
    Utc::now()
        .with_timezone(&kst())
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// First date (inclusive) that survives cleanup.
pub fn cutoff_date_kst(retention_days: u32) -> String {
    (Utc::now().with_timezone(&kst()) - Duration::days(retention_days as i64))
        .format("%Y-%m-%d")
        .to_string()
}

pub fn open_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn UsageStore>> {
    let store: Arc<dyn UsageStore> = match cfg.storage_backend.as_str() {
        "sled" => {
            if let Some(parent) = Path::new(&cfg.sled_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Arc::new(SledStore::open(Path::new(&cfg.sled_path))?)
        }
        _ => {
            if let Some(parent) = Path::new(&cfg.database_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Arc::new(SqliteStore::open(Path::new(&cfg.database_path))?)
        }
    };
    store.init()?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> Vec<(&'static str, Arc<dyn UsageStore>, tempfile::TempDir)> {
        let sled_tmp = tempfile::tempdir().unwrap();
        let sled: Arc<dyn UsageStore> =
            Arc::new(SledStore::open(&sled_tmp.path().join("sled")).unwrap());
        let sqlite_tmp = tempfile::tempdir().unwrap();
        let sqlite: Arc<dyn UsageStore> =
            Arc::new(SqliteStore::open(&sqlite_tmp.path().join("usage.sqlite")).unwrap());
        let out = vec![("sled", sled, sled_tmp), ("sqlite", sqlite, sqlite_tmp)];
        for (_, s, _) in &out {
            s.init().unwrap();
            // init must be idempotent
            s.init().unwrap();
        }
        out
    }

    fn entry(device: &str, status: u16) -> NewLogEntry {
        NewLogEntry {
            device_id: device.to_string(),
            language: "ko".to_string(),
            tone: "gentle".to_string(),
            request_data: "spent too much on coffee".to_string(),
            response_data: (status == 200).then(|| "{\"summary\":\"ok\"}".to_string()),
            status_code: status,
            error_message: (status != 200).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn sequential_increments_count_exactly() {
        for (name, store, _tmp) in backends() {
            assert_eq!(store.get_usage_count("dev-a").unwrap(), 0, "{name}");
            for n in 1..=5u32 {
                let got = store.increment_usage("dev-a").unwrap();
                assert_eq!(got, n, "{name}: nth return value");
            }
            assert_eq!(store.get_usage_count("dev-a").unwrap(), 5, "{name}");
            // reads never create records for other devices
            assert_eq!(store.get_usage_count("dev-b").unwrap(), 0, "{name}");
        }
    }

    #[test]
    fn concurrent_increments_lose_no_updates() {
        for (name, store, _tmp) in backends() {
            let mut handles = Vec::new();
            for _ in 0..8 {
                let s = store.clone();
                handles.push(std::thread::spawn(move || {
                    for _ in 0..25 {
                        s.increment_usage("dev-k").unwrap();
                    }
                }));
            }
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(store.get_usage_count("dev-k").unwrap(), 200, "{name}");
        }
    }

    #[test]
    fn logs_are_most_recent_first_and_filterable() {
        for (name, store, _tmp) in backends() {
            store.save_analysis_log(&entry("dev-1", 200)).unwrap();
            store.save_analysis_log(&entry("dev-2", 429)).unwrap();
            store.save_analysis_log(&entry("dev-1", 500)).unwrap();

            let all = store.get_logs(50, None).unwrap();
            assert_eq!(all.len(), 3, "{name}");
            assert_eq!(all[0].status_code, 500, "{name}: newest first");
            assert_eq!(all[2].status_code, 200, "{name}");

            let limited = store.get_logs(2, None).unwrap();
            assert_eq!(limited.len(), 2, "{name}");

            let dev1 = store.get_logs(50, Some("dev-1")).unwrap();
            assert_eq!(dev1.len(), 2, "{name}");
            assert!(dev1.iter().all(|l| l.device_id == "dev-1"), "{name}");
        }
    }

    #[test]
    fn stats_aggregate_success_and_devices() {
        for (name, store, _tmp) in backends() {
            store.save_analysis_log(&entry("dev-1", 200)).unwrap();
            store.save_analysis_log(&entry("dev-1", 200)).unwrap();
            store.save_analysis_log(&entry("dev-2", 429)).unwrap();

            let stats = store.get_logs_stats().unwrap();
            assert_eq!(stats.total_requests, 3, "{name}");
            assert_eq!(stats.success_count, 2, "{name}");
            assert_eq!(stats.error_count, 1, "{name}");
            assert_eq!(stats.by_device[0].device_id, "dev-1", "{name}: desc by count");
            assert_eq!(stats.by_device[0].count, 2, "{name}");
            assert_eq!(stats.by_date.len(), 1, "{name}");
            assert_eq!(stats.by_date[0].date, today_kst(), "{name}");
            assert_eq!(stats.by_date[0].count, 3, "{name}");
        }
    }

    #[test]
    fn cleanup_keeps_todays_rows() {
        for (name, store, _tmp) in backends() {
            store.increment_usage("dev-1").unwrap();
            store.save_analysis_log(&entry("dev-1", 200)).unwrap();
            store.cleanup_old_data(7).unwrap();
            assert_eq!(store.get_usage_count("dev-1").unwrap(), 1, "{name}");
            assert_eq!(store.get_logs(50, None).unwrap().len(), 1, "{name}");
        }
    }
}
