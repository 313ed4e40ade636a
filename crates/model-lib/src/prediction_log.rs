//! Prediction log
//!
//! Every served prediction is recorded here and later completed, exactly
//! once, with the observed outcome. Completed entries feed drift windows.
//!
//! With a journal directory each subject gets an append-only JSON-lines file
//! (`<subject-slug>.jsonl`) that is replayed on open.

use crate::error::LogError;
use crate::models::{subject_slug, FeatureMap, ModelVersion, PredictionId};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One served prediction and, once known, its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionLogEntry {
    pub prediction_id: PredictionId,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub features: FeatureMap,
    pub predicted_value: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub confidence_level: Option<f64>,
    pub model_version: ModelVersion,
    pub actual_value: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PredictionLogEntry {
    pub fn new(
        subject: impl Into<String>,
        features: FeatureMap,
        predicted_value: f64,
        model_version: ModelVersion,
    ) -> Self {
        Self {
            prediction_id: PredictionId::new(),
            subject: subject.into(),
            timestamp: Utc::now(),
            features,
            predicted_value,
            lower_bound: None,
            upper_bound: None,
            confidence_level: None,
            model_version,
            actual_value: None,
            completed_at: None,
        }
    }

    pub fn with_interval(mut self, lower: f64, upper: f64, confidence: f64) -> Self {
        self.lower_bound = Some(lower);
        self.upper_bound = Some(upper);
        self.confidence_level = Some(confidence);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.actual_value.is_some()
    }

    pub fn absolute_error(&self) -> Option<f64> {
        self.actual_value.map(|actual| (actual - self.predicted_value).abs())
    }
}

/// Bounds for a drift window read
#[derive(Debug, Clone, Default)]
pub struct WindowQuery {
    pub max_entries: Option<usize>,
    pub max_age: Option<Duration>,
    pub model_version: Option<ModelVersion>,
}

/// Log counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogStats {
    pub subjects: usize,
    pub entries: usize,
    pub completed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalRecord {
    Recorded {
        entry: PredictionLogEntry,
    },
    Completed {
        prediction_id: PredictionId,
        actual_value: f64,
        completed_at: DateTime<Utc>,
    },
}

struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    fn open(path: PathBuf) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        // Terminate a torn tail so the next record starts on its own line
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                file.write_all(b"\n")?;
            }
        }
        Ok(Self { path, file })
    }

    fn append(&mut self, record: &JournalRecord) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(record).map_err(|e| self.persist_error(e.into()))?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|_| self.file.flush())
            .map_err(|e| self.persist_error(e))
    }

    fn persist_error(&self, source: io::Error) -> LogError {
        LogError::Persist {
            path: self.path.clone(),
            source,
        }
    }
}

#[derive(Default)]
struct SubjectLog {
    entries: Vec<PredictionLogEntry>,
    positions: HashMap<PredictionId, usize>,
    journal: Option<Journal>,
}

impl SubjectLog {
    fn insert(&mut self, entry: PredictionLogEntry) {
        self.positions.insert(entry.prediction_id, self.entries.len());
        self.entries.push(entry);
    }

    fn apply_completion(&mut self, id: PredictionId, actual: f64, completed_at: DateTime<Utc>) -> bool {
        match self.positions.get(&id).map(|&pos| &mut self.entries[pos]) {
            Some(entry) if !entry.is_completed() => {
                entry.actual_value = Some(actual);
                entry.completed_at = Some(completed_at);
                true
            }
            _ => false,
        }
    }
}

/// Per-subject prediction log; subjects never contend with each other
pub struct PredictionLogger {
    subjects: DashMap<String, SubjectLog>,
    index: DashMap<PredictionId, String>,
    journal_dir: Option<PathBuf>,
}

impl PredictionLogger {
    /// Volatile log
    pub fn in_memory() -> Self {
        Self {
            subjects: DashMap::new(),
            index: DashMap::new(),
            journal_dir: None,
        }
    }

    /// Journaled log rooted at `dir`, replaying existing journals
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| LogError::Persist {
            path: dir.clone(),
            source,
        })?;

        let logger = Self {
            subjects: DashMap::new(),
            index: DashMap::new(),
            journal_dir: Some(dir.clone()),
        };

        let entries = fs::read_dir(&dir).map_err(|source| LogError::Persist {
            path: dir.clone(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                logger.replay(&path)?;
            }
        }

        let stats = logger.stats();
        info!(
            dir = %dir.display(),
            subjects = stats.subjects,
            entries = stats.entries,
            completed = stats.completed,
            "Prediction log opened"
        );
        Ok(logger)
    }

    fn replay(&self, path: &Path) -> Result<(), LogError> {
        let persist = |source| LogError::Persist {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(persist)?);

        let mut log = SubjectLog::default();
        let mut subject: Option<String> = None;
        let mut skipped = 0usize;

        for line in reader.lines() {
            let line = line.map_err(persist)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(JournalRecord::Recorded { entry }) => {
                    if log.positions.contains_key(&entry.prediction_id) {
                        skipped += 1;
                        continue;
                    }
                    subject.get_or_insert_with(|| entry.subject.clone());
                    log.insert(entry);
                }
                Ok(JournalRecord::Completed {
                    prediction_id,
                    actual_value,
                    completed_at,
                }) => {
                    if !log.apply_completion(prediction_id, actual_value, completed_at) {
                        skipped += 1;
                    }
                }
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(path = %path.display(), skipped, "Skipped unusable prediction journal records");
        }

        let Some(subject) = subject else {
            debug!(path = %path.display(), "Empty prediction journal");
            return Ok(());
        };

        log.journal = Some(Journal::open(path.to_path_buf()).map_err(persist)?);
        for id in log.positions.keys() {
            self.index.insert(*id, subject.clone());
        }
        self.subjects.insert(subject, log);
        Ok(())
    }

    fn journal_path(&self, subject: &str) -> Option<PathBuf> {
        self.journal_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.jsonl", subject_slug(subject))))
    }

    /// Append a served prediction
    pub fn record(&self, entry: PredictionLogEntry) -> Result<PredictionId, LogError> {
        let id = entry.prediction_id;
        if self.index.contains_key(&id) {
            return Err(LogError::DuplicatePrediction { prediction_id: id });
        }

        let subject = entry.subject.clone();
        let mut log = match self.subjects.entry(subject.clone()) {
            Entry::Occupied(occupied) => occupied.into_ref(),
            Entry::Vacant(vacant) => {
                let journal = match self.journal_path(&subject) {
                    Some(path) => Some(Journal::open(path.clone()).map_err(|source| {
                        LogError::Persist { path, source }
                    })?),
                    None => None,
                };
                vacant.insert(SubjectLog {
                    journal,
                    ..SubjectLog::default()
                })
            }
        };

        if log.positions.contains_key(&id) {
            return Err(LogError::DuplicatePrediction { prediction_id: id });
        }
        if let Some(journal) = log.journal.as_mut() {
            journal.append(&JournalRecord::Recorded { entry: entry.clone() })?;
        }
        log.insert(entry);
        drop(log);

        self.index.insert(id, subject);
        Ok(id)
    }

    /// Attach the observed outcome to a prediction
    pub fn complete(&self, id: PredictionId, actual: f64) -> Result<PredictionLogEntry, LogError> {
        self.complete_inner(id, None, actual)
    }

    /// Like [`complete`](Self::complete), but the prediction must belong to `subject`
    pub fn complete_for(&self, subject: &str, id: PredictionId, actual: f64) -> Result<PredictionLogEntry, LogError> {
        self.complete_inner(id, Some(subject), actual)
    }

    fn complete_inner(
        &self,
        id: PredictionId,
        expected_subject: Option<&str>,
        actual: f64,
    ) -> Result<PredictionLogEntry, LogError> {
        let subject = self
            .index
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(LogError::UnknownPrediction { prediction_id: id })?;

        if let Some(expected) = expected_subject {
            if expected != subject {
                return Err(LogError::SubjectMismatch {
                    prediction_id: id,
                    expected: expected.to_string(),
                    actual: subject,
                });
            }
        }

        let mut log = self
            .subjects
            .get_mut(&subject)
            .ok_or(LogError::UnknownPrediction { prediction_id: id })?;
        let pos = *log
            .positions
            .get(&id)
            .ok_or(LogError::UnknownPrediction { prediction_id: id })?;

        if log.entries[pos].is_completed() {
            return Err(LogError::AlreadyCompleted { prediction_id: id });
        }
        if !actual.is_finite() {
            return Err(LogError::InvalidActual { prediction_id: id });
        }

        let completed_at = Utc::now();
        if let Some(journal) = log.journal.as_mut() {
            journal.append(&JournalRecord::Completed {
                prediction_id: id,
                actual_value: actual,
                completed_at,
            })?;
        }
        log.apply_completion(id, actual, completed_at);
        Ok(log.entries[pos].clone())
    }

    pub fn get(&self, id: PredictionId) -> Option<PredictionLogEntry> {
        let subject = self.index.get(&id)?.value().clone();
        let log = self.subjects.get(&subject)?;
        log.positions.get(&id).map(|&pos| log.entries[pos].clone())
    }

    /// Completed entries for a subject, most recent prediction first
    pub fn window(&self, subject: &str, query: &WindowQuery) -> Vec<PredictionLogEntry> {
        let Some(log) = self.subjects.get(subject) else {
            return Vec::new();
        };
        let cutoff = query.max_age.map(|age| Utc::now() - age);

        let mut completed: Vec<PredictionLogEntry> = log
            .entries
            .iter()
            .filter(|e| e.is_completed())
            .filter(|e| query.model_version.map_or(true, |v| e.model_version == v))
            .filter(|e| cutoff.map_or(true, |c| e.timestamp >= c))
            .cloned()
            .collect();
        drop(log);

        completed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(max) = query.max_entries {
            completed.truncate(max);
        }
        completed
    }

    /// Drop entries whose prediction is older than `age`; returns how many
    pub fn prune_older_than(&self, age: Duration) -> Result<usize, LogError> {
        let cutoff = Utc::now() - age;
        let mut removed = 0;

        for mut item in self.subjects.iter_mut() {
            let log = item.value_mut();
            let before = log.entries.len();
            let (kept, dropped): (Vec<_>, Vec<_>) =
                log.entries.drain(..).partition(|e| e.timestamp >= cutoff);
            if dropped.is_empty() {
                log.entries = kept;
                continue;
            }

            for entry in &dropped {
                self.index.remove(&entry.prediction_id);
            }
            log.positions.clear();
            for entry in kept {
                log.insert(entry);
            }
            removed += before - log.entries.len();

            if let Some(journal) = log.journal.take() {
                log.journal = Some(compact(journal.path, &log.entries)?);
            }
        }

        if removed > 0 {
            info!(removed, "Pruned prediction log");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> LogStats {
        let mut stats = LogStats::default();
        for item in self.subjects.iter() {
            stats.subjects += 1;
            stats.entries += item.entries.len();
            stats.completed += item.entries.iter().filter(|e| e.is_completed()).count();
        }
        stats
    }

    pub fn subjects(&self) -> Vec<String> {
        self.subjects.iter().map(|item| item.key().clone()).collect()
    }
}

/// Rewrite a journal to hold only `entries`, then swap it in
fn compact(path: PathBuf, entries: &[PredictionLogEntry]) -> Result<Journal, LogError> {
    let temp = path.with_extension("jsonl.tmp");
    let write = || -> io::Result<()> {
        let mut file = File::create(&temp)?;
        for entry in entries {
            let mut line = serde_json::to_vec(&JournalRecord::Recorded { entry: entry.clone() })?;
            line.push(b'\n');
            file.write_all(&line)?;
        }
        file.sync_all()?;
        fs::rename(&temp, &path)
    };
    write().map_err(|source| LogError::Persist {
        path: path.clone(),
        source,
    })?;
    Journal::open(path.clone()).map_err(|source| LogError::Persist { path, source })
}
