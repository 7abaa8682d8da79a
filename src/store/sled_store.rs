use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{
    cutoff_date_kst, today_kst, unix_ms, DateCount, DeviceCount, LogEntry, LogStats, NewLogEntry,
    StoreError, UsageStore,
};

/// Embedded single-file backend for single-process deployments.
///
/// Key layout:
/// - `usage:{date}:{device_id}` -> u64 count (big-endian), date-first so
///   retention cleanup is one range delete
/// - `logline:{unix_ms:013}:{seq:010}` -> LogEntry as JSON; `unix_ms` is 13
///   digits (until year 2286), so keys are lexicographically time-ordered
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    log_seq: Arc<AtomicU64>,
}

const USAGE_PREFIX: &str = "usage:";
const LOG_PREFIX: &str = "logline:";

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            log_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    fn usage_key(device_id: &str) -> String {
        format!("{USAGE_PREFIX}{}:{device_id}", today_kst())
    }

    fn decode_count(v: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        let n = v.len().min(8);
        buf[8 - n..].copy_from_slice(&v[..n]);
        u64::from_be_bytes(buf)
    }

    fn usage_date_of_key(key: &[u8]) -> Option<&str> {
        let rest = key.strip_prefix(USAGE_PREFIX.as_bytes())?;
        let s = std::str::from_utf8(rest).ok()?;
        s.split(':').next()
    }

    fn log_entries(&self) -> impl Iterator<Item = LogEntry> + '_ {
        self.db
            .scan_prefix(LOG_PREFIX.as_bytes())
            .filter_map(|res| res.ok())
            .filter_map(|(_, v)| serde_json::from_slice::<LogEntry>(&v).ok())
    }
}

impl UsageStore for SledStore {
    fn init(&self) -> Result<(), StoreError> {
        // sled creates trees lazily; a flush is enough to materialize the dir.
        self.db.flush()?;
        Ok(())
    }

    fn get_usage_count(&self, device_id: &str) -> Result<u32, StoreError> {
        let v = self.db.get(Self::usage_key(device_id).as_bytes())?;
        Ok(v.map(|iv| Self::decode_count(&iv)).unwrap_or(0) as u32)
    }

    fn increment_usage(&self, device_id: &str) -> Result<u32, StoreError> {
        // update_and_fetch is a CAS loop inside sled, so concurrent callers
        // for the same device never lose an update.
        let merged = self
            .db
            .update_and_fetch(Self::usage_key(device_id).as_bytes(), |old| {
                let next = old.map(Self::decode_count).unwrap_or(0) + 1;
                Some(next.to_be_bytes().to_vec())
            })?;
        self.db.flush()?;
        let new_count = merged
            .map(|iv| Self::decode_count(&iv))
            .ok_or_else(|| StoreError::Corrupt("usage counter vanished mid-update".to_string()))?;
        Ok(new_count as u32)
    }

    fn save_analysis_log(&self, entry: &NewLogEntry) -> Result<(), StoreError> {
        let seq = self.log_seq.fetch_add(1, Ordering::Relaxed);
        let key = format!("{LOG_PREFIX}{:013}:{seq:010}", unix_ms());
        let row = LogEntry {
            id: key.clone(),
            device_id: entry.device_id.clone(),
            language: entry.language.clone(),
            tone: entry.tone.clone(),
            request_data: entry.request_data.clone(),
            response_data: entry.response_data.clone(),
            status_code: entry.status_code,
            error_message: entry.error_message.clone(),
            created_at: super::now_kst(),
        };
        let value = serde_json::to_vec(&row)
            .map_err(|e| StoreError::Corrupt(format!("log entry serialize: {e}")))?;
        self.db.insert(key.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    fn get_logs(&self, limit: u32, device_id: Option<&str>) -> Result<Vec<LogEntry>, StoreError> {
        let mut out = Vec::new();
        for res in self.db.scan_prefix(LOG_PREFIX.as_bytes()).rev() {
            let (_, v) = res?;
            let Ok(row) = serde_json::from_slice::<LogEntry>(&v) else {
                continue;
            };
            if let Some(d) = device_id {
                if row.device_id != d {
                    continue;
                }
            }
            out.push(row);
            if out.len() >= limit as usize {
                break;
            }
        }
        Ok(out)
    }

    fn get_logs_stats(&self) -> Result<LogStats, StoreError> {
        let mut total = 0u64;
        let mut success = 0u64;
        let mut by_device: HashMap<String, u64> = HashMap::new();
        let mut by_date: HashMap<String, u64> = HashMap::new();

        for row in self.log_entries() {
            total += 1;
            if row.status_code == 200 {
                success += 1;
            }
            *by_device.entry(row.device_id).or_default() += 1;
            let date = row.created_at.split(' ').next().unwrap_or("").to_string();
            *by_date.entry(date).or_default() += 1;
        }

        let mut by_device: Vec<DeviceCount> = by_device
            .into_iter()
            .map(|(device_id, count)| DeviceCount { device_id, count })
            .collect();
        by_device.sort_by(|a, b| b.count.cmp(&a.count).then(a.device_id.cmp(&b.device_id)));

        let mut by_date: Vec<DateCount> = by_date
            .into_iter()
            .map(|(date, count)| DateCount { date, count })
            .collect();
        by_date.sort_by(|a, b| b.date.cmp(&a.date));
        by_date.truncate(7);

        Ok(LogStats {
            total_requests: total,
            success_count: success,
            error_count: total - success,
            by_device,
            by_date,
        })
    }

    fn cleanup_old_data(&self, retention_days: u32) -> Result<(), StoreError> {
        let cutoff = cutoff_date_kst(retention_days);

        // Usage keys are date-first, so everything to delete sits in one range.
        let start = USAGE_PREFIX.as_bytes().to_vec();
        let end = format!("{USAGE_PREFIX}{cutoff}").into_bytes();
        let mut doomed: Vec<sled::IVec> = Vec::new();
        for res in self.db.range(start..end) {
            let (k, _) = res?;
            if Self::usage_date_of_key(&k).is_some() {
                doomed.push(k);
            }
        }

        for res in self.db.scan_prefix(LOG_PREFIX.as_bytes()) {
            let (k, v) = res?;
            let Ok(row) = serde_json::from_slice::<LogEntry>(&v) else {
                // Unreadable rows age out here rather than lingering forever.
                doomed.push(k);
                continue;
            };
            let date = row.created_at.split(' ').next().unwrap_or("");
            if date < cutoff.as_str() {
                doomed.push(k);
            }
        }

        for key in doomed {
            self.db.remove(key)?;
        }
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_scoped_to_the_calendar_day() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(&tmp.path().join("sled")).unwrap();
        store.init().unwrap();

        // Seed a stale record under an old date; today must still read 0.
        let old_key = format!("{USAGE_PREFIX}2020-01-01:dev-a");
        store
            .db
            .insert(old_key.as_bytes(), 9u64.to_be_bytes().to_vec())
            .unwrap();
        assert_eq!(store.get_usage_count("dev-a").unwrap(), 0);

        assert_eq!(store.increment_usage("dev-a").unwrap(), 1);
        assert_eq!(store.get_usage_count("dev-a").unwrap(), 1);
    }

    #[test]
    fn cleanup_drops_only_expired_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(&tmp.path().join("sled")).unwrap();
        store.init().unwrap();

        let old_key = format!("{USAGE_PREFIX}2020-01-01:dev-a");
        store
            .db
            .insert(old_key.as_bytes(), 9u64.to_be_bytes().to_vec())
            .unwrap();
        store.increment_usage("dev-a").unwrap();

        let stale = LogEntry {
            id: "logline:0000000000001:0000000000".to_string(),
            device_id: "dev-a".to_string(),
            language: "ko".to_string(),
            tone: "gentle".to_string(),
            request_data: "old".to_string(),
            response_data: None,
            status_code: 200,
            error_message: None,
            created_at: "2020-01-01 10:00:00".to_string(),
        };
        store
            .db
            .insert(stale.id.as_bytes(), serde_json::to_vec(&stale).unwrap())
            .unwrap();

        store.cleanup_old_data(7).unwrap();

        assert!(store.db.get(old_key.as_bytes()).unwrap().is_none());
        assert!(store.db.get(stale.id.as_bytes()).unwrap().is_none());
        assert_eq!(store.get_usage_count("dev-a").unwrap(), 1);
    }
}
