//! JSON export and re-ingest of the whole store.
//!
//! Exports are written to a uniquely named sibling temp file, synced, and
//! renamed into place, so a crash mid-write never leaves a truncated export at
//! the destination and concurrent exports never share a temp file.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::connection::CacheStore;
use super::records::{CacheRecord, RecordKind, upsert};
use crate::Error;

/// On-disk export format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub total_jobs: usize,
    pub total_profiles: usize,
    pub jobs: Vec<CacheRecord>,
    pub profiles: Vec<CacheRecord>,
}

impl ExportDocument {
    fn from_records(records: Vec<CacheRecord>) -> Self {
        let (jobs, profiles): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.kind == RecordKind::Job);
        Self {
            exported_at: Utc::now().trunc_subsecs(6),
            total_jobs: jobs.len(),
            total_profiles: profiles.len(),
            jobs,
            profiles,
        }
    }

    pub fn into_records(self) -> impl Iterator<Item = CacheRecord> {
        self.jobs.into_iter().chain(self.profiles)
    }
}

/// What an export wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub jobs: usize,
    pub profiles: usize,
}

impl CacheStore {
    /// Write every record, fresh or expired, to `path` as pretty JSON.
    ///
    /// The store is only read. Either the complete export replaces `path` or
    /// `path` is left untouched.
    pub async fn export_all(&self, path: impl AsRef<Path>) -> Result<ExportSummary, Error> {
        let path = path.as_ref().to_path_buf();
        let document = ExportDocument::from_records(self.all_records().await?);
        let json = serde_json::to_vec_pretty(&document)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let dest = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &dest, &json))
            .await
            .map_err(std::io::Error::other)??;

        let summary = ExportSummary { path, jobs: document.total_jobs, profiles: document.total_profiles };
        tracing::info!(
            path = %summary.path.display(),
            jobs = summary.jobs,
            profiles = summary.profiles,
            "exported cache"
        );
        Ok(summary)
    }

    /// Upsert every record of an export, keeping original fetch times.
    ///
    /// Runs in one transaction: on any failure nothing is imported.
    /// Returns the number of records written.
    pub async fn import_all(&self, path: impl AsRef<Path>) -> Result<u64, Error> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let document: ExportDocument = serde_json::from_slice(&bytes)?;
        let records: Vec<CacheRecord> = document.into_records().collect();

        let imported = self
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                for record in &records {
                    upsert(&tx, record)?;
                }
                tx.commit()?;
                Ok(records.len() as u64)
            })
            .await
            .map_err(Error::from)?;

        tracing::info!(path = %path.display(), imported, "imported cache export");
        Ok(imported)
    }
}

/// The temp file deletes itself if anything fails before `persist`.
fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
