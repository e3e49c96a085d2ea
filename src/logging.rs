use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::relay::{RelayOutcome, RelayReport};

const MAX_SESSION_RECORDS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Failed,
    Cancelled,
    TimedOut,
    WriteFailed,
}

impl SessionOutcome {
    /// Classify a finished relay. A completed stream whose last event was an
    /// error counts as failed.
    pub fn from_report(report: &RelayReport) -> Self {
        match report.outcome {
            RelayOutcome::Completed if report.stats.last_event == Some("error") => Self::Failed,
            RelayOutcome::Completed => Self::Completed,
            RelayOutcome::Cancelled => Self::Cancelled,
            RelayOutcome::TimedOut => Self::TimedOut,
        }
    }
}

/// One relay session, as persisted to the JSONL journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub outcome: SessionOutcome,
    pub events_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SessionRecord {
    pub fn new(id: Uuid, started_at: DateTime<Utc>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id,
            started_at,
            finished_at: Utc::now(),
            provider: provider.into(),
            model: model.into(),
            outcome: SessionOutcome::Completed,
            events_written: 0,
            detail: None,
        }
    }

    pub fn with_report(mut self, report: &RelayReport) -> Self {
        self.outcome = SessionOutcome::from_report(report);
        self.events_written = report.stats.events_written;
        self
    }

    pub fn with_detail(mut self, outcome: SessionOutcome, detail: impl Into<String>) -> Self {
        self.outcome = outcome;
        self.detail = Some(detail.into());
        self
    }
}

/// Ring buffer of session records persisted to JSONL.
pub struct SessionJournal {
    records: VecDeque<SessionRecord>,
    file_path: std::path::PathBuf,
    writer: Option<BufWriter<File>>,
}

impl SessionJournal {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut records = VecDeque::with_capacity(MAX_SESSION_RECORDS);

        if file_path.exists() {
            let file = File::open(&file_path)?;
            let reader = BufReader::new(file);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(record) = serde_json::from_str::<SessionRecord>(&line) {
                    if records.len() >= MAX_SESSION_RECORDS {
                        records.pop_front();
                    }
                    records.push_back(record);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        Ok(Self {
            records,
            file_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn record(&mut self, record: SessionRecord) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&record) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
        if self.records.len() >= MAX_SESSION_RECORDS {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn recent(&self, limit: usize) -> Vec<SessionRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    /// Rewrite the file with only the records still held in memory.
    pub fn compact(&mut self) -> std::io::Result<()> {
        self.writer = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::new(file);
        for record in &self.records {
            if let Ok(json) = serde_json::to_string(record) {
                writeln!(writer, "{}", json)?;
            }
        }
        writer.flush()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }
}

#[derive(Clone)]
pub struct SessionLog(Arc<Mutex<SessionJournal>>);

impl SessionLog {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(SessionJournal::new(file_path)?))))
    }

    pub fn record(&self, record: SessionRecord) {
        tracing::info!(
            session = %record.id,
            outcome = ?record.outcome,
            events = record.events_written,
            "Session finished"
        );
        if let Ok(mut journal) = self.0.lock() {
            journal.record(record);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<SessionRecord> {
        self.0.lock().map(|j| j.recent(limit)).unwrap_or_default()
    }

    pub fn compact(&self) -> std::io::Result<()> {
        match self.0.lock() {
            Ok(mut journal) => journal.compact(),
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayStats;

    fn report(outcome: RelayOutcome, last: Option<&'static str>, n: usize) -> RelayReport {
        RelayReport {
            outcome,
            stats: RelayStats {
                events_written: n,
                last_event: last,
            },
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(
            SessionOutcome::from_report(&report(RelayOutcome::Completed, Some("finish"), 3)),
            SessionOutcome::Completed
        );
        assert_eq!(
            SessionOutcome::from_report(&report(RelayOutcome::Completed, Some("error"), 1)),
            SessionOutcome::Failed
        );
        assert_eq!(
            SessionOutcome::from_report(&report(RelayOutcome::TimedOut, None, 0)),
            SessionOutcome::TimedOut
        );
    }

    #[test]
    fn test_records_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.jsonl");

        let log = SessionLog::new(&path).unwrap();
        for i in 0..3 {
            let record = SessionRecord::new(Uuid::new_v4(), Utc::now(), "openai", format!("m{i}"))
                .with_report(&report(RelayOutcome::Completed, Some("finish"), i));
            log.record(record);
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].model, "m2");
        drop(log);

        let reloaded = SessionLog::new(&path).unwrap();
        assert_eq!(reloaded.recent(10).len(), 3);
        reloaded.compact().unwrap();
        assert_eq!(SessionLog::new(&path).unwrap().recent(10).len(), 3);
    }
}
