//! Labeled training data sources

use crate::models::{subject_slug, Dataset, LabeledRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Provider of labeled examples per subject
#[async_trait]
pub trait TrainingDataSource: Send + Sync {
    /// Cheap row count, checked before materializing a dataset
    async fn row_count(&self, subject: &str) -> Result<usize>;

    /// Full labeled dataset for the subject
    async fn fetch(&self, subject: &str) -> Result<Dataset>;
}

/// Rows held in memory, keyed by subject
#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    rows: DashMap<String, Vec<LabeledRow>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dataset: Dataset) {
        self.rows.insert(dataset.subject, dataset.rows);
    }

    pub fn push(&self, subject: &str, row: LabeledRow) {
        self.rows.entry(subject.to_string()).or_default().push(row);
    }
}

#[async_trait]
impl TrainingDataSource for InMemoryDataSource {
    async fn row_count(&self, subject: &str) -> Result<usize> {
        Ok(self.rows.get(subject).map_or(0, |rows| rows.len()))
    }

    async fn fetch(&self, subject: &str) -> Result<Dataset> {
        let rows = self.rows.get(subject).map(|rows| rows.clone()).unwrap_or_default();
        Ok(Dataset::new(subject, rows))
    }
}

/// One JSON-lines file of `LabeledRow`s per subject, named by subject slug
#[derive(Debug, Clone)]
pub struct JsonlDataSource {
    dir: PathBuf,
}

impl JsonlDataSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, subject: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", subject_slug(subject)))
    }

    async fn read(&self, subject: &str) -> Result<Option<String>> {
        let path = self.path_for(subject);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read training data {:?}", path)),
        }
    }
}

#[async_trait]
impl TrainingDataSource for JsonlDataSource {
    async fn row_count(&self, subject: &str) -> Result<usize> {
        Ok(self
            .read(subject)
            .await?
            .map_or(0, |content| content.lines().filter(|l| !l.trim().is_empty()).count()))
    }

    async fn fetch(&self, subject: &str) -> Result<Dataset> {
        let Some(content) = self.read(subject).await? else {
            return Ok(Dataset::new(subject, Vec::new()));
        };

        let mut rows = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LabeledRow>(line) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(
                    subject = %subject,
                    line = lineno + 1,
                    error = %e,
                    "Skipping malformed training row"
                ),
            }
        }
        Ok(Dataset::new(subject, rows))
    }
}
