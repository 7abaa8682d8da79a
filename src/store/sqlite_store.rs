use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    cutoff_date_kst, now_kst, today_kst, DateCount, DeviceCount, LogEntry, LogStats, NewLogEntry,
    StoreError, UsageStore,
};

/// Relational backend. A single connection behind a mutex serializes all
/// statements, and the increment itself is one UPSERT, so concurrent
/// requests for the same device can never read-modify-write each other away.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }
}

impl UsageStore for SqliteStore {
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 device_id TEXT NOT NULL,
                 date TEXT NOT NULL,
                 count INTEGER DEFAULT 0,
                 UNIQUE(device_id, date)
             );
             CREATE TABLE IF NOT EXISTS analysis_logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 device_id TEXT NOT NULL,
                 language TEXT,
                 tone TEXT,
                 request_data TEXT,
                 response_data TEXT,
                 status_code INTEGER,
                 error_message TEXT,
                 created_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_usage_device_date ON usage(device_id, date);
             CREATE INDEX IF NOT EXISTS idx_logs_device_id ON analysis_logs(device_id);
             CREATE INDEX IF NOT EXISTS idx_logs_created_at ON analysis_logs(created_at);",
        )?;
        Ok(())
    }

    fn get_usage_count(&self, device_id: &str) -> Result<u32, StoreError> {
        let conn = self.conn.lock();
        let count: Option<u32> = conn
            .query_row(
                "SELECT count FROM usage WHERE device_id = ?1 AND date = ?2",
                params![device_id, today_kst()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    fn increment_usage(&self, device_id: &str) -> Result<u32, StoreError> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row(
            "INSERT INTO usage (device_id, date, count) VALUES (?1, ?2, 1)
             ON CONFLICT(device_id, date) DO UPDATE SET count = count + 1
             RETURNING count",
            params![device_id, today_kst()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn save_analysis_log(&self, entry: &NewLogEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO analysis_logs
             (device_id, language, tone, request_data, response_data, status_code, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.device_id,
                entry.language,
                entry.tone,
                entry.request_data,
                entry.response_data,
                entry.status_code,
                entry.error_message,
                now_kst(),
            ],
        )?;
        Ok(())
    }

    fn get_logs(&self, limit: u32, device_id: Option<&str>) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn.lock();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<LogEntry> {
            Ok(LogEntry {
                id: row.get::<_, i64>(0)?.to_string(),
                device_id: row.get(1)?,
                language: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                tone: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                request_data: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                response_data: row.get(5)?,
                status_code: row.get(6)?,
                error_message: row.get(7)?,
                created_at: row.get(8)?,
            })
        };

        let sql_base = "SELECT id, device_id, language, tone, request_data, response_data,
                               status_code, error_message, created_at
                        FROM analysis_logs";
        let rows = match device_id {
            Some(d) => {
                let mut stmt = conn.prepare(&format!(
                    "{sql_base} WHERE device_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
                ))?;
                let out = stmt
                    .query_map(params![d, limit], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                out
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{sql_base} ORDER BY created_at DESC, id DESC LIMIT ?1"
                ))?;
                let out = stmt
                    .query_map(params![limit], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                out
            }
        };
        Ok(rows)
    }

    fn get_logs_stats(&self) -> Result<LogStats, StoreError> {
        let conn = self.conn.lock();

        let total: u64 = conn.query_row("SELECT COUNT(*) FROM analysis_logs", [], |r| r.get(0))?;
        let success: u64 = conn.query_row(
            "SELECT COUNT(*) FROM analysis_logs WHERE status_code = 200",
            [],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT device_id, COUNT(*) as count
             FROM analysis_logs
             GROUP BY device_id
             ORDER BY count DESC, device_id ASC",
        )?;
        let by_device = stmt
            .query_map([], |row| {
                Ok(DeviceCount {
                    device_id: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT substr(created_at, 1, 10) as date, COUNT(*) as count
             FROM analysis_logs
             GROUP BY date
             ORDER BY date DESC
             LIMIT 7",
        )?;
        let by_date = stmt
            .query_map([], |row| {
                Ok(DateCount {
                    date: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

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
        let conn = self.conn.lock();
        conn.execute("DELETE FROM usage WHERE date < ?1", params![cutoff])?;
        conn.execute(
            "DELETE FROM analysis_logs WHERE substr(created_at, 1, 10) < ?1",
            params![cutoff],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_creates_then_bumps_one_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init().unwrap();
        assert_eq!(store.increment_usage("dev-a").unwrap(), 1);
        assert_eq!(store.increment_usage("dev-a").unwrap(), 2);

        let rows: u32 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM usage", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn cleanup_prunes_usage_and_logs_past_retention() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init().unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO usage (device_id, date, count) VALUES ('dev-a', '2020-01-01', 3)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO analysis_logs (device_id, status_code, created_at)
                 VALUES ('dev-a', 200, '2020-01-01 09:00:00')",
                [],
            )
            .unwrap();
        }
        store.increment_usage("dev-a").unwrap();

        store.cleanup_old_data(7).unwrap();

        assert_eq!(store.get_usage_count("dev-a").unwrap(), 1);
        let logs: u32 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM analysis_logs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(logs, 0);
    }
}
