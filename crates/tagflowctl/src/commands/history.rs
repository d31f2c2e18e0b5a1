use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use tagflow_history::HistoryStore;

use crate::output::{self, OutputFormat};

pub async fn query(
    history_db: &Path,
    connection_id: &str,
    tag_id: &str,
    start: Option<String>,
    end: Option<String>,
    limit: Option<usize>,
    format: &OutputFormat,
) -> Result<()> {
    let store = HistoryStore::open(history_db).await?;
    let end = end.map(|s| s.parse()).transpose().context("parsing --end")?.unwrap_or_else(Utc::now);
    let start = start
        .map(|s| s.parse())
        .transpose()
        .context("parsing --start")?
        .unwrap_or_else(|| end - ChronoDuration::hours(24));

    let records = store.query(connection_id, tag_id, start, end, limit).await?;
    output::render(format, &records.iter().map(|r| (r.timestamp, r.value.clone(), r.quality)).collect::<Vec<_>>(), |_| {
        let rows = records
            .iter()
            .map(|r| vec![r.timestamp.to_rfc3339(), r.value.clone(), r.quality.to_string()])
            .collect();
        println!("{}", output::table(&["timestamp", "value", "quality"], rows));
    });
    Ok(())
}

pub async fn cleanup(history_db: &Path, retention_days: i64) -> Result<()> {
    let store = HistoryStore::open(history_db).await?;
    let removed = store.cleanup(ChronoDuration::days(retention_days)).await?;
    output::success(format!("removed {removed} record(s) older than {retention_days}d"));
    Ok(())
}
