//! Bulk reconciliation over historical messages.
//!
//! Each owner already known to the store gets its backlog replayed through
//! `ArchiveService::archive`. One bad item never stops the pass.

use crate::error::StoreError;
use crate::vault::archive::{ArchiveOutcome, ArchiveService};
use crate::vault::descriptor::MediaDescriptor;
use crate::vault::reconcile::MediaFetcher;
use crate::vault::store::RecordStore;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

pub type HistoryItems<'a> = Box<dyn Iterator<Item = Result<MediaDescriptor>> + 'a>;

/// Finite, forward-only backlog of media objects per owner.
pub trait HistorySource {
    fn history(&self, owner_id: i64) -> Result<HistoryItems<'_>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OwnerScanCounts {
    pub processed: usize,
    pub saved: usize,
    pub already_known: usize,
    pub failed: usize,
    pub source_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub owners: BTreeMap<i64, OwnerScanCounts>,
}

impl ScanReport {
    pub fn total_failed(&self) -> usize {
        self.owners
            .values()
            .map(|c| c.failed + usize::from(c.source_error.is_some()))
            .sum()
    }
}

pub struct HistoryScanner<'a, S, F> {
    service: &'a ArchiveService<S, F>,
}

impl<'a, S: RecordStore, F: MediaFetcher> HistoryScanner<'a, S, F> {
    pub fn new(service: &'a ArchiveService<S, F>) -> Self {
        Self { service }
    }

    pub fn scan_all(&self, source: &dyn HistorySource) -> Result<ScanReport, StoreError> {
        let owners = self.service.store().distinct_owners()?;
        let mut report = ScanReport::default();

        for owner_id in owners {
            let counts = self.scan_owner(owner_id, source);
            tracing::info!(
                owner = owner_id,
                processed = counts.processed,
                saved = counts.saved,
                failed = counts.failed,
                "chat history checked"
            );
            report.owners.insert(owner_id, counts);
        }

        Ok(report)
    }

    fn scan_owner(&self, owner_id: i64, source: &dyn HistorySource) -> OwnerScanCounts {
        let mut counts = OwnerScanCounts::default();
        let items = match source.history(owner_id) {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(owner = owner_id, error = %format!("{err:#}"), "history unavailable");
                counts.source_error = Some(format!("{err:#}"));
                return counts;
            }
        };

        for item in items {
            counts.processed += 1;
            let descriptor = match item {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    tracing::warn!(owner = owner_id, error = %format!("{err:#}"), "skipping unreadable history item");
                    counts.failed += 1;
                    continue;
                }
            };
            match self.service.archive(owner_id, &descriptor) {
                ArchiveOutcome::Saved(_) => counts.saved += 1,
                ArchiveOutcome::AlreadyKnown => counts.already_known += 1,
                ArchiveOutcome::Failed(_) => counts.failed += 1,
            }
        }

        counts
    }
}

/// Backlog read from `<dir>/u<owner_id>.jsonl`, one descriptor per line.
/// A missing manifest is an empty backlog.
#[derive(Debug, Clone)]
pub struct ManifestHistorySource {
    dir: PathBuf,
}

impl ManifestHistorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn manifest_path(&self, owner_id: i64) -> PathBuf {
        self.dir.join(format!("u{owner_id}.jsonl"))
    }
}

impl HistorySource for ManifestHistorySource {
    fn history(&self, owner_id: i64) -> Result<HistoryItems<'_>> {
        let path = self.manifest_path(owner_id);
        if !path.exists() {
            return Ok(Box::new(std::iter::empty()));
        }
        let file =
            File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;

        let items = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(move |(idx, line)| -> Option<Result<MediaDescriptor>> {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        return Some(Err(err).with_context(|| {
                            format!("failed to read line {} of {}", idx + 1, path.display())
                        }));
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    return None;
                }
                Some(serde_json::from_str(trimmed).with_context(|| {
                    format!("failed to parse line {} of {}", idx + 1, path.display())
                }))
            });
        Ok(Box::new(items))
    }
}
