use crate::error::{ArchiveError, DuplicateField, StoreError};
use crate::vault::descriptor::{MediaDescriptor, MediaRecord};
use crate::vault::naming;
use crate::vault::paths::{owner_dir, owner_file_path};
use crate::vault::reconcile::{self, Commit, MediaFetcher, Reconciled, Staged};
use crate::vault::store::RecordStore;
use crate::vault::warn::{self, WarnEvent};
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

// Names tried for one new object before giving up until it is seen again.
// Concurrent copies of the same object each take one while they race.
const NAME_ATTEMPTS: usize = 8;

#[derive(Debug)]
pub enum ArchiveOutcome {
    AlreadyKnown,
    Saved(String),
    Failed(ArchiveError),
}

impl ArchiveOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Dedups incoming objects per owner and keeps disk and metadata in step.
///
/// A record is only ever written after its file is on disk, so a failed
/// download leaves nothing behind that claims otherwise and can simply be
/// retried by archiving the same object again.
pub struct ArchiveService<S, F> {
    store: S,
    fetcher: F,
    data_dir: PathBuf,
}

impl<S: RecordStore, F: MediaFetcher> ArchiveService<S, F> {
    pub fn new(store: S, fetcher: F, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            fetcher,
            data_dir: data_dir.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn archive(&self, owner_id: i64, descriptor: &MediaDescriptor) -> ArchiveOutcome {
        match self.try_archive(owner_id, descriptor) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "ARCHIVE_FAILED",
                    stage: "archive",
                    action: "archive-media",
                    owner: owner_id,
                    media: &descriptor.unique_media_id,
                    retry: "next-time-seen",
                    reason: failure_reason(&err),
                    err: &err.to_string(),
                });
                ArchiveOutcome::Failed(err)
            }
        }
    }

    fn try_archive(
        &self,
        owner_id: i64,
        descriptor: &MediaDescriptor,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        if let Some(record) = self.store.find(owner_id, &descriptor.unique_media_id)? {
            let target = owner_file_path(&self.data_dir, owner_id, &record.assigned_filename);
            if let Reconciled::Downloaded { bytes } =
                reconcile::ensure_present(&target, descriptor, &self.fetcher)?
            {
                tracing::info!(
                    owner = owner_id,
                    file = %record.assigned_filename,
                    bytes,
                    "restored missing file for known media"
                );
            }
            return Ok(ArchiveOutcome::AlreadyKnown);
        }

        self.archive_new(owner_id, descriptor)
    }

    /// Download once, then walk the candidate names until the bytes land on a
    /// free path and the record sticks. A name counts as lost when the path
    /// is already occupied on disk or another object's record claims it.
    fn archive_new(
        &self,
        owner_id: i64,
        descriptor: &MediaDescriptor,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let dir = owner_dir(&self.data_dir, owner_id);
        let parts = descriptor.name_parts();
        let extension = descriptor.extension();
        let mut lost: Vec<String> = Vec::new();
        let mut staged: Option<Staged> = None;

        for _ in 0..NAME_ATTEMPTS {
            let name = naming::allocate(
                &parts,
                &descriptor.unique_media_id,
                &extension,
                |candidate| {
                    if lost.iter().any(|name| name == candidate) {
                        return Ok(true);
                    }
                    self.store.name_in_use(owner_id, candidate)
                },
            )?;

            let ready = match staged.take() {
                Some(ready) => ready,
                None => {
                    tracing::info!(
                        owner = owner_id,
                        file_name = descriptor.file_name.as_deref().unwrap_or(""),
                        mime_type = descriptor.mime_type.as_deref().unwrap_or(""),
                        duration = descriptor.duration.unwrap_or(0),
                        file_size = descriptor.file_size.unwrap_or(0),
                        assigned = %name,
                        "saving"
                    );
                    reconcile::stage(&dir, &name, descriptor, &self.fetcher)?
                }
            };

            let target = dir.join(&name);
            if let Commit::Occupied(back) = ready.commit_new(&target)? {
                tracing::debug!(
                    owner = owner_id,
                    file = %name,
                    bytes = back.bytes(),
                    "name already on disk; trying next"
                );
                staged = Some(back);
                lost.push(name);
                continue;
            }

            let record = MediaRecord::new(owner_id, descriptor, name.clone(), Utc::now());
            match self.store.insert(&record) {
                Ok(()) => return Ok(ArchiveOutcome::Saved(name)),
                Err(StoreError::Duplicate { field, .. }) => {
                    // Someone else archived this object first: whatever they
                    // recorded is authoritative. Otherwise another object got
                    // this name between allocation and insert.
                    if let Some(winner) = self.store.find(owner_id, &descriptor.unique_media_id)? {
                        tracing::debug!(owner = owner_id, file = %name, "lost insert race; already known");
                        if winner.assigned_filename != name {
                            self.discard_orphan(&target);
                        }
                        return Ok(ArchiveOutcome::AlreadyKnown);
                    }
                    tracing::debug!(
                        owner = owner_id,
                        file = %name,
                        %field,
                        "name claimed by another object; trying next"
                    );
                    self.discard_orphan(&target);
                    lost.push(name);
                }
                Err(err) => {
                    self.discard_orphan(&target);
                    return Err(err.into());
                }
            }
        }

        Err(StoreError::Duplicate {
            owner_id,
            field: DuplicateField::AssignedFilename,
        }
        .into())
    }

    /// Best effort: a file we downloaded under a name no record points at.
    fn discard_orphan(&self, target: &Path) {
        match fs::remove_file(target) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                tracing::warn!(path = %target.display(), error = %err, "failed to remove orphaned download");
            }
            _ => {}
        }
    }
}

fn failure_reason(err: &ArchiveError) -> &'static str {
    match err {
        ArchiveError::Download(_) => "download-failed",
        ArchiveError::Persistence(_) => "store-failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DownloadError;
    use crate::vault::descriptor::sample_descriptor;
    use crate::vault::reconcile::testing::{FakeFetcher, InterruptingFetcher};
    use crate::vault::store::SqliteRecordStore;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn service<F: MediaFetcher>(root: &Path, fetcher: F) -> ArchiveService<SqliteRecordStore, F> {
        let store = SqliteRecordStore::open(root.join("files_data.sqlite")).expect("open store");
        ArchiveService::new(store, fetcher, root.join("data"))
    }

    fn owner_files(root: &Path, owner: i64) -> Vec<String> {
        let dir = root.join(format!("data/u{owner}"));
        if !dir.exists() {
            return Vec::new();
        }
        let mut out = fs::read_dir(dir)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        out.sort();
        out
    }

    #[test]
    fn first_archive_saves_file_and_record() {
        let tmp = tempdir().expect("tempdir");
        let svc = service(tmp.path(), FakeFetcher::with(&[("ref-AgAD1", b"bytes")]));

        let outcome = svc.archive(42, &sample_descriptor("AgAD1"));

        match outcome {
            ArchiveOutcome::Saved(name) => assert_eq!(name, "Bob - Song.mp3"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(owner_files(tmp.path(), 42), vec!["Bob - Song.mp3"]);
        let record = svc.store().find(42, "AgAD1").expect("find").expect("record");
        assert_eq!(record.original_filename.as_deref(), Some("bob_song.mp3"));
    }

    #[test]
    fn archiving_twice_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let svc = service(tmp.path(), FakeFetcher::with(&[("ref-AgAD1", b"bytes")]));
        let d = sample_descriptor("AgAD1");

        assert!(matches!(svc.archive(1, &d), ArchiveOutcome::Saved(_)));
        assert!(matches!(svc.archive(1, &d), ArchiveOutcome::AlreadyKnown));

        assert_eq!(svc.store().list_filenames(1).expect("list").len(), 1);
        assert_eq!(owner_files(tmp.path(), 1).len(), 1);
        assert_eq!(svc.fetcher.calls(), 1);
    }

    #[test]
    fn known_media_with_missing_file_is_downloaded_again() {
        let tmp = tempdir().expect("tempdir");
        let svc = service(tmp.path(), FakeFetcher::with(&[("ref-AgAD1", b"bytes")]));
        let d = sample_descriptor("AgAD1");
        assert!(matches!(svc.archive(1, &d), ArchiveOutcome::Saved(_)));
        fs::remove_file(tmp.path().join("data/u1/Bob - Song.mp3")).expect("remove");

        assert!(matches!(svc.archive(1, &d), ArchiveOutcome::AlreadyKnown));
        assert_eq!(owner_files(tmp.path(), 1), vec!["Bob - Song.mp3"]);
        assert_eq!(svc.fetcher.calls(), 2);
    }

    #[test]
    fn failed_download_writes_no_record_and_is_retryable() {
        let tmp = tempdir().expect("tempdir");
        let svc = service(tmp.path(), FakeFetcher::default());
        let d = sample_descriptor("AgAD1");

        let outcome = svc.archive(1, &d);
        assert!(matches!(
            outcome,
            ArchiveOutcome::Failed(ArchiveError::Download(DownloadError::Transport(_)))
        ));
        assert!(svc.store().find(1, "AgAD1").expect("find").is_none());
        assert!(owner_files(tmp.path(), 1).is_empty());

        svc.fetcher
            .payloads
            .lock()
            .expect("lock")
            .insert("ref-AgAD1".to_string(), b"late bytes".to_vec());
        assert!(matches!(svc.archive(1, &d), ArchiveOutcome::Saved(_)));
    }

    #[test]
    fn interrupted_download_leaves_no_record_and_no_target() {
        let tmp = tempdir().expect("tempdir");
        let svc = service(tmp.path(), InterruptingFetcher);

        let outcome = svc.archive(1, &sample_descriptor("AgAD1"));

        assert!(outcome.is_failed());
        assert!(svc.store().find(1, "AgAD1").expect("find").is_none());
        assert!(!tmp.path().join("data/u1/Bob - Song.mp3").exists());
    }

    #[test]
    fn name_collision_gets_id_prefixed_name() {
        let tmp = tempdir().expect("tempdir");
        let svc = service(
            tmp.path(),
            FakeFetcher::with(&[("ref-AgAD1", b"one"), ("ref-AgAD2", b"two")]),
        );

        assert!(matches!(
            svc.archive(1, &sample_descriptor("AgAD1")),
            ArchiveOutcome::Saved(_)
        ));
        let outcome = svc.archive(1, &sample_descriptor("AgAD2"));

        match outcome {
            ArchiveOutcome::Saved(name) => assert_eq!(name, "AgAD2_Bob - Song.mp3"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            owner_files(tmp.path(), 1),
            vec!["AgAD2_Bob - Song.mp3", "Bob - Song.mp3"]
        );
        assert_eq!(
            fs::read(tmp.path().join("data/u1/Bob - Song.mp3")).expect("read"),
            b"one"
        );
    }

    #[test]
    fn owners_have_separate_namespaces() {
        let tmp = tempdir().expect("tempdir");
        let svc = service(tmp.path(), FakeFetcher::with(&[("ref-AgAD1", b"bytes")]));
        let d = sample_descriptor("AgAD1");

        assert!(matches!(svc.archive(1, &d), ArchiveOutcome::Saved(_)));
        match svc.archive(2, &d) {
            ArchiveOutcome::Saved(name) => assert_eq!(name, "Bob - Song.mp3"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn records_stay_unique_across_many_objects() {
        let tmp = tempdir().expect("tempdir");
        let ids = ["a1", "a2", "a3", "a4"];
        let entries = ids
            .iter()
            .map(|id| (format!("ref-{id}"), id.as_bytes().to_vec()))
            .collect::<Vec<_>>();
        let fetcher = FakeFetcher::default();
        {
            let mut map = fetcher.payloads.lock().expect("lock");
            map.extend(entries);
        }
        let svc = service(tmp.path(), fetcher);

        for id in ids {
            assert!(!svc.archive(5, &sample_descriptor(id)).is_failed());
            assert!(!svc.archive(5, &sample_descriptor(id)).is_failed());
        }

        let names = svc.store().list_filenames(5).expect("list");
        let unique = names.iter().collect::<BTreeSet<_>>();
        assert_eq!(names.len(), ids.len());
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn concurrent_archival_of_same_object_records_once() {
        let tmp = tempdir().expect("tempdir");
        let mut fetcher = FakeFetcher::with(&[("ref-AgAD1", b"same bytes")]);
        fetcher.delay = Some(Duration::from_millis(50));
        let svc = Arc::new(service(tmp.path(), fetcher));
        let d = sample_descriptor("AgAD1");

        let outcomes = std::thread::scope(|scope| {
            let handles = (0..4)
                .map(|_| {
                    let svc = Arc::clone(&svc);
                    let d = d.clone();
                    scope.spawn(move || svc.archive(3, &d))
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().expect("join"))
                .collect::<Vec<_>>()
        });

        let saved = outcomes
            .iter()
            .filter(|o| matches!(o, ArchiveOutcome::Saved(_)))
            .count();
        assert_eq!(saved, 1, "outcomes: {outcomes:?}");
        assert!(outcomes.iter().all(|o| !o.is_failed()), "outcomes: {outcomes:?}");
        let names = svc.store().list_filenames(3).expect("list");
        assert_eq!(names.len(), 1);
        // Whichever thread inserted first owns the record; the others' copies
        // are cleaned up.
        assert_eq!(owner_files(tmp.path(), 3), names);
    }

    #[test]
    fn different_objects_racing_for_one_name_keep_their_own_bytes() {
        for _ in 0..10 {
            let tmp = tempdir().expect("tempdir");
            let mut fetcher =
                FakeFetcher::with(&[("ref-AgAD1", b"ONE-bytes"), ("ref-AgAD2", b"TWO-bytes")]);
            fetcher.delay = Some(Duration::from_millis(20));
            let svc = service(tmp.path(), fetcher);

            let outcomes = std::thread::scope(|scope| {
                let handles = ["AgAD1", "AgAD2"]
                    .into_iter()
                    .map(|id| {
                        let svc = &svc;
                        scope.spawn(move || svc.archive(9, &sample_descriptor(id)))
                    })
                    .collect::<Vec<_>>();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("join"))
                    .collect::<Vec<_>>()
            });

            assert!(
                outcomes.iter().all(|o| matches!(o, ArchiveOutcome::Saved(_))),
                "outcomes: {outcomes:?}"
            );
            for (id, bytes) in [("AgAD1", b"ONE-bytes"), ("AgAD2", b"TWO-bytes")] {
                let record = svc.store().find(9, id).expect("find").expect("record");
                let on_disk = fs::read(tmp.path().join("data/u9").join(&record.assigned_filename))
                    .expect("read");
                assert_eq!(on_disk, bytes, "record {id} -> {}", record.assigned_filename);
            }
            let mut names = svc.store().list_filenames(9).expect("list");
            names.sort();
            assert_eq!(owner_files(tmp.path(), 9), names);
        }
    }

    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn find(&self, _: i64, _: &str) -> Result<Option<MediaRecord>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
        fn name_in_use(&self, _: i64, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn insert(&self, _: &MediaRecord) -> Result<(), StoreError> {
            Ok(())
        }
        fn list_filenames(&self, _: i64) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        fn distinct_owners(&self) -> Result<BTreeSet<i64>, StoreError> {
            Ok(BTreeSet::new())
        }
    }

    #[test]
    fn store_failure_becomes_failed_outcome() {
        let tmp = tempdir().expect("tempdir");
        let svc = ArchiveService::new(
            BrokenStore,
            FakeFetcher::with(&[("ref-AgAD1", b"bytes")]),
            tmp.path().join("data"),
        );

        let outcome = svc.archive(1, &sample_descriptor("AgAD1"));

        assert!(matches!(
            outcome,
            ArchiveOutcome::Failed(ArchiveError::Persistence(StoreError::Io(_)))
        ));
        assert_eq!(svc.fetcher.calls(), 0);
    }

    /// Answers `name_in_use` with a stale "free" so allocation hands out a
    /// name that another object's record already holds.
    struct StaleNameStore {
        inner: SqliteRecordStore,
    }

    impl RecordStore for StaleNameStore {
        fn find(&self, owner_id: i64, id: &str) -> Result<Option<MediaRecord>, StoreError> {
            self.inner.find(owner_id, id)
        }
        fn name_in_use(&self, _: i64, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn insert(&self, record: &MediaRecord) -> Result<(), StoreError> {
            self.inner.insert(record)
        }
        fn list_filenames(&self, owner_id: i64) -> Result<Vec<String>, StoreError> {
            self.inner.list_filenames(owner_id)
        }
        fn distinct_owners(&self) -> Result<BTreeSet<i64>, StoreError> {
            self.inner.distinct_owners()
        }
    }

    #[test]
    fn name_claimed_by_another_object_at_insert_falls_back_to_id_name() {
        let tmp = tempdir().expect("tempdir");
        let inner = SqliteRecordStore::open(tmp.path().join("files_data.sqlite")).expect("open");
        let other = MediaRecord::new(1, &sample_descriptor("AgAD0"), "Bob - Song.mp3", Utc::now());
        inner.insert(&other).expect("seed other object");
        let svc = ArchiveService::new(
            StaleNameStore { inner },
            FakeFetcher::with(&[("ref-AgAD1", b"bytes")]),
            tmp.path().join("data"),
        );

        match svc.archive(1, &sample_descriptor("AgAD1")) {
            ArchiveOutcome::Saved(name) => assert_eq!(name, "AgAD1_Bob - Song.mp3"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The file placed under the other object's name was cleaned up.
        assert_eq!(owner_files(tmp.path(), 1), vec!["AgAD1_Bob - Song.mp3"]);
    }

    /// Accepts lookups but reports every name as taken at insert time.
    struct NameStolenStore;

    impl RecordStore for NameStolenStore {
        fn find(&self, _: i64, _: &str) -> Result<Option<MediaRecord>, StoreError> {
            Ok(None)
        }
        fn name_in_use(&self, _: i64, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn insert(&self, record: &MediaRecord) -> Result<(), StoreError> {
            Err(StoreError::Duplicate {
                owner_id: record.owner_id,
                field: DuplicateField::AssignedFilename,
            })
        }
        fn list_filenames(&self, _: i64) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        fn distinct_owners(&self) -> Result<BTreeSet<i64>, StoreError> {
            Ok(BTreeSet::new())
        }
    }

    #[test]
    fn name_that_never_sticks_fails_after_bounded_attempts() {
        let tmp = tempdir().expect("tempdir");
        let svc = ArchiveService::new(
            NameStolenStore,
            FakeFetcher::with(&[("ref-AgAD1", b"bytes")]),
            tmp.path().join("data"),
        );

        let outcome = svc.archive(1, &sample_descriptor("AgAD1"));

        assert!(matches!(
            outcome,
            ArchiveOutcome::Failed(ArchiveError::Persistence(StoreError::Duplicate {
                field: DuplicateField::AssignedFilename,
                ..
            }))
        ));
        assert_eq!(svc.fetcher.calls(), NAME_ATTEMPTS);
        assert!(owner_files(tmp.path(), 1).is_empty());
    }
}
