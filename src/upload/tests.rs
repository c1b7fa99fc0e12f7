use super::*;
use crate::config::CompletionPolicy;
use crate::device::CaptureMode;
use crate::diagnostics::{DiagnosticsRing, Severity};
use crate::error::{RecordError, UploadError};
use crate::events::{EventBus, EventFilter, PipelineEvent};
use crate::identifier::SessionIdentifier;
use crate::recorder::RecordedBlob;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RAW_ID: &str = "ab12xyz-q1w2e3-us3rXXXX-st9rXXXX-1700000000";
const FULL_USER: &str = "us3rXXXX-full-owner-0042";

struct Harness {
    storage: Arc<MemoryObjectStorage>,
    records: Arc<MemoryRecordStore>,
    diagnostics: Arc<DiagnosticsRing>,
    bus: EventBus,
    engine: UploadEngine,
}

fn identity() -> SessionIdentifier {
    SessionIdentifier::parse(RAW_ID).unwrap()
}

fn blob(data: &'static [u8]) -> RecordedBlob {
    RecordedBlob {
        data: Bytes::from_static(data),
        mime_type: "video/webm;codecs=vp9,opus".to_string(),
        mode: CaptureMode::Video,
        duration_seconds: 42,
    }
}

fn harness(policy: CompletionPolicy) -> Harness {
    let storage = Arc::new(MemoryObjectStorage::new());
    let records = Arc::new(MemoryRecordStore::new().with_record(
        RemoteSessionRecord::new(RAW_ID, RecordStatus::Active)
            .with_prompt("Tell me about your first job", "Sam", "Alex")
            .with_user_id(FULL_USER),
    ));
    let diagnostics = Arc::new(DiagnosticsRing::in_memory(50));
    let bus = EventBus::new(256);
    let engine = UploadEngine::new(storage.clone(), records.clone(), diagnostics.clone())
        .with_event_bus(bus.clone())
        .with_backoff(BackoffPolicy::new(
            3,
            Duration::from_millis(100),
            Duration::from_secs(1),
        ))
        .with_completion_policy(policy);
    Harness {
        storage,
        records,
        diagnostics,
        bus,
        engine,
    }
}

fn final_path() -> String {
    format!(
        "users/{}/recordings/{}/final/recording.webm",
        FULL_USER, RAW_ID
    )
}

#[test]
fn test_backoff_doubles_and_caps() {
    let policy = BackoffPolicy::new(6, Duration::from_millis(1000), Duration::from_millis(5000));
    assert_eq!(policy.base_delay_for(1), Duration::from_millis(1000));
    assert_eq!(policy.base_delay_for(2), Duration::from_millis(2000));
    assert_eq!(policy.base_delay_for(3), Duration::from_millis(4000));
    assert_eq!(policy.base_delay_for(4), Duration::from_millis(5000));
    assert_eq!(policy.base_delay_for(40), Duration::from_millis(5000));
}

#[test]
fn test_jitter_stays_within_bounds() {
    let policy = BackoffPolicy::new(3, Duration::from_millis(1000), Duration::from_millis(1100))
        .with_jitter(0.25);
    for _ in 0..200 {
        let delay = policy.delay_for(1);
        assert!(delay >= Duration::from_millis(750), "{:?}", delay);
        assert!(delay <= Duration::from_millis(1100), "{:?}", delay);
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_on_later_attempt() {
    let policy = BackoffPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100));
    let calls = AtomicU32::new(0);

    let result = retry_with_backoff(&policy, &CancellationToken::new(), |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 3 {
                Err(format!("attempt {} failed", attempt))
            } else {
                Ok("stored")
            }
        }
    })
    .await;

    assert_eq!(result, Ok(("stored", 3)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_keeps_last_error() {
    let policy = BackoffPolicy::new(2, Duration::from_millis(10), Duration::from_millis(100));
    let result: Result<((), u32), _> =
        retry_with_backoff(&policy, &CancellationToken::new(), |attempt| async move {
            Err(format!("boom {}", attempt))
        })
        .await;

    assert_eq!(
        result,
        Err(RetryError::Exhausted {
            attempts: 2,
            last_error: "boom 2".to_string()
        })
    );
}

#[tokio::test]
async fn test_retry_cancelled_before_first_attempt() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let policy = BackoffPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100));

    let result: Result<((), u32), RetryError<String>> =
        retry_with_backoff(&policy, &cancel, |_| async { Ok(()) }).await;

    assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0, .. })));
}

#[tokio::test]
async fn test_commit_with_cleanup_runs_cleanup_only_on_failure() {
    let cleanups = AtomicU32::new(0);

    let ok: Result<u32, CommitFailure<String>> = commit_with_cleanup(
        || async { Ok(7) },
        || async {
            cleanups.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        },
    )
    .await;
    assert_eq!(ok, Ok(7));
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);

    let failed: Result<u32, CommitFailure<String>> = commit_with_cleanup(
        || async { Err("write rejected".to_string()) },
        || async {
            cleanups.fetch_add(1, Ordering::SeqCst);
            Err::<(), String>("delete failed".to_string())
        },
    )
    .await;
    assert_eq!(
        failed,
        Err(CommitFailure {
            error: "write rejected".to_string(),
            cleaned_up: false
        })
    );
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_upload_success_finalizes_record() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    let mut events = h.bus.subscribe_filtered(EventFilter::All, "test");

    let result = h
        .engine
        .upload(&blob(b"hello world"), &identity(), &UploadOptions::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.storage_path, final_path());
    assert_eq!(result.attempts, 1);
    assert_eq!(result.bytes, 11);
    assert_eq!(result.identity, identity());
    assert!(result.soft_failures.is_empty());

    let stored = h.storage.get(&final_path()).unwrap();
    assert_eq!(&stored.data[..], b"hello world");
    assert_eq!(stored.content_type, "video/webm;codecs=vp9,opus");

    let record = h.records.record(RAW_ID).unwrap();
    assert_eq!(record.status, RecordStatus::ReadyForTranscription);
    assert_eq!(record.storage_paths.final_video.as_deref(), Some(final_path().as_str()));
    assert_eq!(record.recording_data.file_size, Some(11));
    assert_eq!(record.recording_data.duration, Some(42));
    assert_eq!(record.recording_data.upload_progress, Some(1.0));
    assert!(record.recording_data.upload_started_at.is_some());
    assert!(record.recording_completed_at.is_some());

    let seen = events.drain();
    let progress: Vec<f64> = seen.iter().filter_map(PipelineEvent::progress_fraction).collect();
    assert_eq!(progress.last(), Some(&1.0));
    assert!(seen
        .iter()
        .any(|e| matches!(e, PipelineEvent::UploadCompleted { .. })));
}

fn progress_writes(records: &MemoryRecordStore) -> Vec<f64> {
    records
        .applied_updates()
        .iter()
        .filter(|p| p.status.is_none())
        .filter_map(|p| p.upload_progress)
        .collect()
}

#[tokio::test]
async fn test_progress_is_written_while_bytes_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let records = Arc::new(MemoryRecordStore::new().with_record(
        RemoteSessionRecord::new(RAW_ID, RecordStatus::Active).with_user_id(FULL_USER),
    ));
    let engine = UploadEngine::new(
        Arc::new(FsObjectStorage::new(dir.path())),
        records.clone(),
        Arc::new(DiagnosticsRing::in_memory(50)),
    );
    let recording = RecordedBlob {
        data: Bytes::from(vec![3u8; 640 * 1024]),
        ..blob(b"")
    };

    engine
        .upload(&recording, &identity(), &UploadOptions::new())
        .await
        .unwrap();

    let written = progress_writes(&records);
    assert!(written.len() >= 9, "only {:?}", written);
    assert!(written[0] < 0.5);
    assert!(written.windows(2).all(|w| w[0] <= w[1]), "{:?}", written);
    assert!(written.iter().all(|f| *f > 0.0 && *f <= 1.0));
    assert_eq!(written.last(), Some(&1.0));
    assert_eq!(
        records.record(RAW_ID).unwrap().status,
        RecordStatus::ReadyForTranscription
    );
}

#[tokio::test(start_paused = true)]
async fn test_progress_writes_stay_monotone_across_retries() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    h.storage.fail_next_puts(1);

    h.engine
        .upload(&blob(b"payload!"), &identity(), &UploadOptions::new())
        .await
        .unwrap();

    // Halfway on the failed attempt, then done on the retry
    assert_eq!(progress_writes(&h.records), vec![0.5, 1.0]);
}

#[tokio::test]
async fn test_explicit_full_user_id_wins() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    let options = UploadOptions::new().with_full_user_id("caller-owner");

    let result = h
        .engine
        .upload(&blob(b"x"), &identity(), &options)
        .await
        .unwrap();

    assert!(result.storage_path.starts_with("users/caller-owner/recordings/"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    h.storage.fail_next_puts(2);

    let result = h
        .engine
        .upload(&blob(b"payload"), &identity(), &UploadOptions::new())
        .await
        .unwrap();

    assert_eq!(result.attempts, 3);
    assert_eq!(h.storage.put_attempts(), 3);
    assert_eq!(h.diagnostics.count(Severity::Warning), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_mark_failed_never_ready() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    h.storage.fail_all_puts(true);

    let err = h
        .engine
        .upload(&blob(b"payload"), &identity(), &UploadOptions::new())
        .await
        .unwrap_err();

    match &err {
        UploadError::Transfer(e) => {
            assert_eq!(e.attempts, 3);
            assert!(!e.cancelled);
        }
        other => panic!("expected transfer error, got {:?}", other),
    }
    assert!(err.is_retryable());

    let record = h.records.record(RAW_ID).unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert!(record.error.is_some());
    assert!(record.storage_paths.final_video.is_none());
    assert!(h
        .records
        .applied_updates()
        .iter()
        .all(|p| p.status != Some(RecordStatus::ReadyForTranscription)));
    assert_eq!(h.records.completion_attempts(), 0);
    assert!(h.diagnostics.count(Severity::Error) >= 1);
}

#[tokio::test]
async fn test_completion_failure_deletes_object() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    h.records.fail_next_completions(1);

    let err = h
        .engine
        .upload(&blob(b"payload"), &identity(), &UploadOptions::new())
        .await
        .unwrap_err();

    match &err {
        UploadError::Completion(e) => {
            assert!(e.object_removed);
            assert_eq!(e.storage_path, final_path());
        }
        other => panic!("expected completion error, got {:?}", other),
    }
    assert!(h.storage.get(&final_path()).is_none());
    assert_eq!(h.storage.deleted_paths(), vec![final_path()]);
    assert_eq!(
        h.records.record(RAW_ID).unwrap().status,
        RecordStatus::Uploading
    );
}

#[tokio::test]
async fn test_retry_upload_after_completion_failure_succeeds() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    h.records.fail_next_completions(1);
    assert!(h
        .engine
        .upload(&blob(b"payload"), &identity(), &UploadOptions::new())
        .await
        .is_err());

    let result = h
        .engine
        .upload(&blob(b"payload"), &identity(), &UploadOptions::new())
        .await
        .unwrap();

    assert!(result.success);
    assert!(h.storage.get(&final_path()).is_some());
}

#[tokio::test]
async fn test_retry_then_log_accepts_double_completion_failure() {
    let h = harness(CompletionPolicy::RetryThenLog);
    h.records.fail_next_completions(2);

    let result = h
        .engine
        .upload(&blob(b"payload"), &identity(), &UploadOptions::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.soft_failures.len(), 1);
    assert_eq!(result.soft_failures[0].step, "completion");
    assert_eq!(h.records.completion_attempts(), 2);
    assert!(h.storage.get(&final_path()).is_some());
    assert!(h.storage.deleted_paths().is_empty());
}

#[tokio::test]
async fn test_retry_then_log_second_attempt_commits() {
    let h = harness(CompletionPolicy::RetryThenLog);
    h.records.fail_next_completions(1);

    let result = h
        .engine
        .upload(&blob(b"payload"), &identity(), &UploadOptions::new())
        .await
        .unwrap();

    assert!(result.soft_failures.is_empty());
    assert_eq!(
        h.records.record(RAW_ID).unwrap().status,
        RecordStatus::ReadyForTranscription
    );
}

#[tokio::test]
async fn test_record_write_failures_are_soft() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    h.records.fail_updates(true);

    let result = h
        .engine
        .upload(&blob(b"payload"), &identity(), &UploadOptions::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.soft_failures[0].step, "mark_uploading");
    assert_eq!(
        h.records.record(RAW_ID).unwrap().status,
        RecordStatus::ReadyForTranscription
    );
}

#[tokio::test]
async fn test_empty_blob_is_rejected() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    let err = h
        .engine
        .upload(&blob(b""), &identity(), &UploadOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err, UploadError::EmptyBlob);
    assert!(!err.is_retryable());
    assert_eq!(h.storage.put_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_between_attempts() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    h.storage.fail_all_puts(true);
    let cancel = CancellationToken::new();
    let options = UploadOptions::new().with_cancel(cancel.clone());

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let err = h
        .engine
        .upload(&blob(b"payload"), &identity(), &options)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    match err {
        UploadError::Transfer(e) => {
            assert!(e.cancelled);
            assert_eq!(e.attempts, 1);
        }
        other => panic!("expected cancelled transfer, got {:?}", other),
    }
    assert_eq!(h.storage.put_attempts(), 1);
    assert_ne!(h.records.record(RAW_ID).unwrap().status, RecordStatus::Failed);
}

#[tokio::test]
async fn test_chunked_upload_commits_chunk_summary() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    let options = UploadOptions::new();
    let mut uploader = h
        .engine
        .chunked_uploader(&identity(), "video/webm", &options)
        .await;

    uploader.upload_chunk(Bytes::from_static(b"part-one")).await.unwrap();
    uploader.upload_chunk(Bytes::from_static(b"part-two")).await.unwrap();

    let result = h
        .engine
        .finish_chunked(uploader, &blob(b"part-onepart-two"), &identity(), &options)
        .await
        .unwrap();

    assert!(result.chunked);
    assert_eq!(
        result.storage_path,
        format!("users/{}/recordings/{}/chunks", FULL_USER, RAW_ID)
    );
    let record = h.records.record(RAW_ID).unwrap();
    assert_eq!(record.status, RecordStatus::ReadyForTranscription);
    assert_eq!(record.recording_data.total_chunks, Some(2));
    assert_eq!(record.recording_data.combined_size, Some(16));
    assert_eq!(
        record.storage_paths.chunks,
        Some(vec![
            format!("{}/chunk-0", result.storage_path),
            format!("{}/chunk-1", result.storage_path),
        ])
    );
    assert!(record.storage_paths.final_video.is_none());
}

#[tokio::test]
async fn test_chunked_falls_back_when_a_chunk_failed() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    h.storage.fail_paths_containing("chunk-1");
    let options = UploadOptions::new();
    let mut uploader = h
        .engine
        .chunked_uploader(&identity(), "video/webm", &options)
        .await;

    let first = uploader.upload_chunk(Bytes::from_static(b"aaa")).await.unwrap();
    assert!(uploader.upload_chunk(Bytes::from_static(b"bbb")).await.is_err());

    let result = h
        .engine
        .finish_chunked(uploader, &blob(b"aaabbb"), &identity(), &options)
        .await
        .unwrap();

    assert!(!result.chunked);
    assert_eq!(result.storage_path, final_path());
    assert!(h.storage.get(&first).is_none());
    assert_eq!(
        h.records.record(RAW_ID).unwrap().storage_paths.final_video,
        Some(final_path())
    );
}

#[tokio::test]
async fn test_chunked_falls_back_when_no_chunk_stored() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    let options = UploadOptions::new();
    let uploader = h
        .engine
        .chunked_uploader(&identity(), "video/webm", &options)
        .await;

    let result = h
        .engine
        .finish_chunked(uploader, &blob(b"whole"), &identity(), &options)
        .await
        .unwrap();

    assert!(!result.chunked);
    assert_eq!(result.storage_path, final_path());
}

#[tokio::test]
async fn test_mark_recording_advances_status() {
    let h = harness(CompletionPolicy::AtomicCleanup);
    h.engine.mark_recording(&identity()).await.unwrap();
    assert_eq!(
        h.records.record(RAW_ID).unwrap().status,
        RecordStatus::Recording
    );
}

#[test]
fn test_status_never_regresses() {
    let mut record = RemoteSessionRecord::new(RAW_ID, RecordStatus::ReadyForTranscription);

    let err = record
        .apply(&RecordPatch::status(RecordStatus::Uploading))
        .unwrap_err();
    assert!(matches!(err, RecordError::StatusRegression { .. }));
    assert_eq!(record.status, RecordStatus::ReadyForTranscription);

    // Progress writes never touch status
    record.apply(&RecordPatch::progress(0.4)).unwrap();
    assert_eq!(record.status, RecordStatus::ReadyForTranscription);

    // Failed and Uploading share a rank, so a retry can resume
    let mut failed = RemoteSessionRecord::new(RAW_ID, RecordStatus::Failed);
    failed.apply(&RecordPatch::status(RecordStatus::Uploading)).unwrap();
    assert_eq!(failed.status, RecordStatus::Uploading);
}

#[test]
fn test_patch_field_map_uses_dot_paths() {
    let transaction = CompletionTransaction::for_blob("users/u/recordings/s/final/recording.webm", 10, "audio/webm")
        .with_duration(Some(5));
    let map = transaction.to_patch().to_field_map();

    assert_eq!(map["status"], "ReadyForTranscription");
    assert_eq!(map["storagePaths.finalVideo"], "users/u/recordings/s/final/recording.webm");
    assert_eq!(map["recordingData.fileSize"], 10);
    assert_eq!(map["recordingData.mimeType"], "audio/webm");
    assert_eq!(map["recordingData.duration"], 5);
    assert!(map.contains_key("recordingCompletedAt"));
    assert!(!map.contains_key("storagePaths.chunks"));

    let failed = RecordPatch::failed("network down").to_field_map();
    assert_eq!(failed["status"], "failed");
    assert_eq!(failed["error.message"], "network down");
    assert!(failed.contains_key("error.timestamp"));
}

#[test]
fn test_record_json_shape() {
    let record = RemoteSessionRecord::new(RAW_ID, RecordStatus::Uploading).with_user_id(FULL_USER);
    let json = serde_json::to_value(&record).unwrap();

    assert_eq!(json["sessionId"], RAW_ID);
    assert_eq!(json["status"], "Uploading");
    assert_eq!(json["userId"], FULL_USER);
    assert!(json["recordingData"].is_object());
}

#[tokio::test]
async fn test_fs_record_store_rejects_regression() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsRecordStore::new(dir.path());
    store
        .put_record(&RemoteSessionRecord::new(RAW_ID, RecordStatus::Active))
        .await
        .unwrap();

    store
        .update(RAW_ID, RecordPatch::status(RecordStatus::Uploading))
        .await
        .unwrap();
    store
        .complete(
            RAW_ID,
            CompletionTransaction::for_blob("users/u/recordings/s/final/recording.webm", 3, "audio/webm"),
        )
        .await
        .unwrap();
    let err = store
        .update(RAW_ID, RecordPatch::status(RecordStatus::Recording))
        .await
        .unwrap_err();

    assert!(matches!(err, RecordError::StatusRegression { .. }));
    let reloaded = FsRecordStore::new(dir.path()).get(RAW_ID).await.unwrap().unwrap();
    assert_eq!(reloaded.status, RecordStatus::ReadyForTranscription);
    assert_eq!(reloaded.recording_data.file_size, Some(3));
}

#[tokio::test]
async fn test_fs_record_store_missing_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsRecordStore::new(dir.path());

    assert!(store.get(RAW_ID).await.unwrap().is_none());
    assert!(matches!(
        store.update(RAW_ID, RecordPatch::progress(0.5)).await,
        Err(RecordError::NotFound { .. })
    ));
    assert!(store.get("../escape").await.is_err());
}

#[tokio::test]
async fn test_fs_object_storage_roundtrip_and_path_checks() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FsObjectStorage::new(dir.path());
    let progress = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = progress.clone();
    let report = move |done: u64, total: u64| seen.lock().push((done, total));

    let data = Bytes::from(vec![7u8; 150 * 1024]);
    storage
        .put_object("users/u/recordings/s/final/recording.webm", data, "video/webm", &report)
        .await
        .unwrap();

    assert!(storage
        .object_exists("users/u/recordings/s/final/recording.webm")
        .await
        .unwrap());
    let reported = progress.lock().clone();
    assert_eq!(reported.first(), Some(&(0, 150 * 1024)));
    assert_eq!(reported.last(), Some(&(150 * 1024, 150 * 1024)));
    assert_eq!(reported.len(), 4);

    storage
        .delete_object("users/u/recordings/s/final/recording.webm")
        .await
        .unwrap();
    // Deleting twice is fine
    storage
        .delete_object("users/u/recordings/s/final/recording.webm")
        .await
        .unwrap();

    let noop = |_: u64, _: u64| {};
    assert!(storage
        .put_object("../outside", Bytes::from_static(b"x"), "text/plain", &noop)
        .await
        .is_err());
    assert!(storage.resolve("/absolute").is_err());
}
