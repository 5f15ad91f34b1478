//! Per-day, per-stream append-only journals for tabular pipeline output.
//!
//! One NDJSON file per (stream prefix, UTC day) under the journal
//! directory, plus a `.sources` sidecar listing the input files whose
//! records are already present. Uploads may be re-delivered, so appends
//! deduplicate on the source file name.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use etl_core::{Error, Record, Result, StreamKey};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// One journalled line: the record plus its provenance.
#[derive(Debug, Serialize)]
struct JournalLine<'a> {
    source: &'a str,
    #[serde(flatten)]
    record: &'a Record,
}

/// Append-only record store, one file per stream per UTC day.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the journal file for `key` on `day`.
    pub fn path_for(&self, key: &StreamKey, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.ndjson", key.prefix(), day.format("%Y%m%d")))
    }

    fn sources_path(&self, journal: &Path) -> PathBuf {
        journal.with_extension("sources")
    }

    /// Append `records` produced from input file `source`.
    ///
    /// Returns the number of records written: 0 if `source` was already
    /// journalled (idempotent under re-delivery). Records are grouped by
    /// the UTC day of their timestamp.
    pub async fn append(
        &self,
        key: &StreamKey,
        source: &str,
        records: &[Record],
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::journal(format!("create {}: {e}", self.dir.display())))?;

        let mut written = 0;
        for day in days_of(records) {
            let journal_path = self.path_for(key, day);
            if self.seen_sources(&journal_path).await?.contains(source) {
                info!(
                    stream = %key,
                    source,
                    day = %day,
                    "Source already journalled, skipping re-delivery"
                );
                continue;
            }

            let day_records: Vec<&Record> = records
                .iter()
                .filter(|r| r.timestamp.date_naive() == day)
                .collect();

            let mut buf = Vec::new();
            for record in &day_records {
                let line = JournalLine { source, record };
                serde_json::to_writer(&mut buf, &line)?;
                buf.push(b'\n');
            }

            append_bytes(&journal_path, &buf).await?;
            append_bytes(
                &self.sources_path(&journal_path),
                format!("{source}\n").as_bytes(),
            )
            .await?;

            written += day_records.len();
            debug!(
                stream = %key,
                source,
                day = %day,
                records = day_records.len(),
                "Appended journal records"
            );
        }

        Ok(written)
    }

    /// Source file names already present in the journal at `journal_path`.
    async fn seen_sources(&self, journal_path: &Path) -> Result<HashSet<String>> {
        let path = self.sources_path(journal_path);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text.lines().map(str::to_owned).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
            Err(e) => Err(Error::journal(format!("read {}: {e}", path.display()))),
        }
    }

    /// Count of lines in the journal for `key` on `day`. Test/diagnostic
    /// helper; the aggregation phase reads journals wholesale.
    pub async fn record_count(&self, key: &StreamKey, day: NaiveDate) -> Result<usize> {
        let path = self.path_for(key, day);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text.lines().count()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(Error::journal(format!("read {}: {e}", path.display()))),
        }
    }
}

/// Distinct UTC days covered by `records`, in order of first appearance.
fn days_of(records: &[Record]) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    for record in records {
        let day = record.timestamp.date_naive();
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| Error::journal(format!("open {}: {e}", path.display())))?;
    file.write_all(bytes)
        .await
        .map_err(|e| Error::journal(format!("append {}: {e}", path.display())))?;
    file.flush()
        .await
        .map_err(|e| Error::journal(format!("flush {}: {e}", path.display())))?;
    Ok(())
}
