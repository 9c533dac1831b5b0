use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Connection;

pub(crate) const RUNS_SCHEMA: &str = include_str!("../../sql/runs.sql");

pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA foreign_keys = ON;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

pub(crate) fn to_utc(value: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    value.map(|dt| Utc.from_utc_datetime(&dt))
}

pub(crate) fn join_paths(paths: &[String]) -> Option<String> {
    if paths.is_empty() {
        None
    } else {
        serde_json::to_string(paths).ok()
    }
}

pub(crate) fn split_paths(value: Option<String>) -> Vec<String> {
    value
        .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
        .unwrap_or_default()
}
