//! End-to-end job runner: resolve, download, watermark, deliver.

use std::{path::PathBuf, sync::Arc};

use {
    tempfile::TempDir,
    tidemark_common::SourceDescriptor,
    tidemark_media::{WatermarkEngine, WatermarkError},
    tokio::sync::mpsc,
    tracing::{info, warn},
};

use crate::{
    delivery::{Controls, DeliveryLimits, DeliveryManager, DeliveryReport, DestinationChannel},
    error::{Error, Result},
    job::{JobOutcome, JobStatus, TransferJob},
    prefs::{PreferenceStore, RequesterId},
    progress::{Phase, ProgressTracker},
    reporter::ProgressReporter,
    source::{self, SourceResolver},
};

/// Status message posted when a job starts.
pub const STARTING_TEXT: &str = "Initializing file processing...";
/// Status message after a successful delivery.
pub const COMPLETED_TEXT: &str = "File processing completed!";

#[must_use]
pub fn failure_text(err: &Error) -> String {
    format!("Failed to download or process file: {err}")
}

/// Runs jobs against shared collaborators. One instance serves every
/// requester; each job owns its own scratch directory and token.
pub struct TransferPipeline {
    resolver: SourceResolver,
    engine: WatermarkEngine,
    prefs: Arc<PreferenceStore>,
    limits: DeliveryLimits,
    temp_root: Option<PathBuf>,
}

impl TransferPipeline {
    #[must_use]
    pub fn new(
        resolver: SourceResolver,
        engine: WatermarkEngine,
        prefs: Arc<PreferenceStore>,
    ) -> Self {
        Self {
            resolver,
            engine,
            prefs,
            limits: DeliveryLimits::default(),
            temp_root: None,
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: DeliveryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Parent directory for per-job scratch space. Defaults to the system temp dir.
    #[must_use]
    pub fn with_temp_root(mut self, temp_root: Option<PathBuf>) -> Self {
        self.temp_root = temp_root;
        self
    }

    #[must_use]
    pub fn prefs(&self) -> &Arc<PreferenceStore> {
        &self.prefs
    }

    /// Create a pending job with the requester's current watermark settings.
    pub async fn new_job(
        &self,
        requester: RequesterId,
        source: SourceDescriptor,
        final_name: String,
    ) -> TransferJob {
        let watermark = self.prefs.snapshot(requester).await;
        TransferJob::new(source, final_name, watermark)
    }

    /// Drive `job` to a terminal state, reporting into `destination`.
    ///
    /// Cancellation ends the job silently; the cancel handler owns the
    /// user-facing message. Failures post one failure message.
    pub async fn run(
        &self,
        mut job: TransferJob,
        destination: Arc<dyn DestinationChannel>,
    ) -> JobOutcome {
        info!(
            job_id = %job.id,
            source = job.source.label(),
            kind = %job.kind,
            final_name = %job.final_name,
            "job started"
        );

        let status = match destination
            .post_message(STARTING_TEXT, Controls::Cancel { job_id: job.id })
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to post status message");
                None
            },
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = status.map(|handle| {
            ProgressReporter::new(destination.clone(), handle, job.id, job.cancel.clone()).spawn(rx)
        });
        let mut tracker =
            ProgressTracker::new(job.final_name.clone(), job.total_bytes, tx, job.cancel.clone());

        let result = self.execute(&mut job, &destination, &mut tracker).await;

        job.downloaded_bytes = tracker.bytes(Phase::Download);
        job.uploaded_bytes = tracker.bytes(Phase::Upload);
        drop(tracker);
        if let Some(reporter) = reporter
            && let Err(e) = reporter.await
        {
            warn!(job_id = %job.id, error = %e, "progress reporter task failed");
        }

        match result {
            Ok((report, watermarked)) => {
                job.advance(JobStatus::Completed);
                info!(
                    job_id = %job.id,
                    bytes = report.bytes,
                    calls = report.calls,
                    watermarked,
                    "job completed"
                );
                if let Some(handle) = status
                    && let Err(e) = destination
                        .edit_message(handle, COMPLETED_TEXT, Controls::None)
                        .await
                {
                    warn!(job_id = %job.id, error = %e, "failed to edit status message");
                }
                JobOutcome::Completed {
                    delivered_bytes: report.bytes,
                    delivery_calls: report.calls,
                    watermarked,
                }
            },
            Err(Error::Cancelled) => {
                job.advance(JobStatus::Cancelled);
                info!(
                    job_id = %job.id,
                    downloaded = job.downloaded_bytes,
                    uploaded = job.uploaded_bytes,
                    "job cancelled"
                );
                JobOutcome::Cancelled
            },
            Err(e) => {
                job.advance(JobStatus::Failed);
                warn!(job_id = %job.id, error = %e, "job failed");
                if let Err(post_err) = destination
                    .post_message(&failure_text(&e), Controls::None)
                    .await
                {
                    warn!(job_id = %job.id, error = %post_err, "failed to report job failure");
                }
                JobOutcome::Failed(e)
            },
        }
    }

    async fn execute(
        &self,
        job: &mut TransferJob,
        destination: &Arc<dyn DestinationChannel>,
        tracker: &mut ProgressTracker,
    ) -> Result<(DeliveryReport, bool)> {
        if job.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let work_dir = self.work_dir().await?;

        job.advance(JobStatus::Downloading);
        let cancel = job.cancel.clone();
        let resolved = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            resolved = self.resolver.resolve(&job.source) => resolved?,
        };
        if resolved.declared_size > 0 {
            job.total_bytes = resolved.declared_size;
            tracker.set_download_total(resolved.declared_size);
        }
        let data = source::download_to_buffer(resolved.stream, tracker, &cancel).await?;
        job.total_bytes = data.len() as u64;

        let mut watermarked = false;
        let output = if WatermarkEngine::applies_to(job.kind, &job.watermark) {
            job.advance(JobStatus::Watermarking);
            match self
                .engine
                .apply(
                    job.kind,
                    data.clone(),
                    &job.final_name,
                    &job.watermark,
                    work_dir.path(),
                    &cancel,
                )
                .await
            {
                Ok(marked) => {
                    watermarked = true;
                    marked
                },
                Err(WatermarkError::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "watermark failed, delivering original");
                    data
                },
            }
        } else {
            data
        };

        job.advance(JobStatus::Uploading);
        let report = DeliveryManager::new(destination.clone(), self.limits)
            .deliver(job.kind, output, &job.final_name, tracker, &cancel)
            .await?;
        // Cancel pressed while the last delivery call was in flight.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok((report, watermarked))
    }

    async fn work_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tidemark-");
        match &self.temp_root {
            Some(root) => {
                tokio::fs::create_dir_all(root)
                    .await
                    .map_err(|e| Error::external("failed to create temp root", e))?;
                builder.tempdir_in(root)
            },
            None => builder.tempdir(),
        }
        .map_err(|e| Error::external("failed to create job work dir", e))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            delivery::tests::{Call, RecordingDestination},
            source::{
                ByteStream, ObjectStore, RemoteObject,
                tests::{MemoryStore, ScriptedHttp},
            },
        },
        anyhow::Result as AnyResult,
        async_trait::async_trait,
        bytes::Bytes,
        futures::StreamExt,
        tidemark_common::{ContentKind, RgbaColor, WatermarkSpec},
        tidemark_media::Transcoder,
    };

    const MIB: usize = 1024 * 1024;

    fn defaults() -> WatermarkSpec {
        WatermarkSpec {
            text: "Tidemark".into(),
            color: RgbaColor::default(),
            font_size: 40,
            image_path: None,
        }
    }

    fn pipeline_with(
        store: Arc<dyn ObjectStore>,
        http: Arc<ScriptedHttp>,
        transcoder: &str,
        temp_root: &std::path::Path,
    ) -> TransferPipeline {
        TransferPipeline::new(
            SourceResolver::new(store, http),
            WatermarkEngine::new(None, Transcoder::new(transcoder)),
            Arc::new(PreferenceStore::new(defaults())),
        )
        .with_temp_root(Some(temp_root.to_path_buf()))
    }

    fn store_with(id: &str, chunks: usize, chunk_len: usize) -> Arc<MemoryStore> {
        let mut store = MemoryStore::default();
        store.objects.insert(id.into(), (chunks, chunk_len));
        Arc::new(store)
    }

    fn no_http() -> Arc<ScriptedHttp> {
        Arc::new(ScriptedHttp::failing_probe("500"))
    }

    /// Emits `before_cancel` chunks, fires the token, then keeps producing.
    struct CancellingStore {
        token: tokio_util::sync::CancellationToken,
        before_cancel: usize,
    }

    #[async_trait]
    impl ObjectStore for CancellingStore {
        async fn resolve(&self, _object_id: &str) -> AnyResult<RemoteObject> {
            let token = self.token.clone();
            let before_cancel = self.before_cancel;
            let stream: ByteStream = futures::stream::iter(0..1000usize)
                .map(move |i| {
                    if i == before_cancel {
                        token.cancel();
                    }
                    Ok(Bytes::from(vec![0u8; 1024]))
                })
                .boxed();
            Ok(RemoteObject {
                stream,
                size: Some(1000 * 1024),
                mime: Some("video/mp4".into()),
            })
        }
    }

    #[cfg(unix)]
    fn fake_transcoder(dir: &std::path::Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        // Writes a marker into the last argument, the output path.
        let path = dir.join("fake-transcoder.sh");
        std::fs::write(
            &path,
            "#!/bin/sh\nfor last; do :; done\nprintf 'watermarked-video' > \"$last\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn video_under_limit_is_transcoded_and_sent_once() {
        let tools = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let transcoder = fake_transcoder(tools.path());
        let pipeline = pipeline_with(
            store_with("vid", 30, MIB),
            no_http(),
            transcoder.to_str().unwrap(),
            scratch.path(),
        );
        let dest = Arc::new(RecordingDestination::default());

        let job = pipeline
            .new_job(
                1,
                SourceDescriptor::remote("vid", Some((30 * MIB) as u64), Some("video/mp4".into())),
                "clip.mp4".into(),
            )
            .await;
        assert_eq!(job.kind, ContentKind::Motion);
        let outcome = pipeline.run(job, dest.clone()).await;

        let JobOutcome::Completed {
            delivery_calls,
            watermarked,
            ..
        } = outcome
        else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(delivery_calls, 1);
        assert!(watermarked);
        let sent = dest.single_payloads().await;
        assert_eq!(sent, vec![Bytes::from_static(b"watermarked-video")]);
        assert!(matches!(
            &dest.delivery_calls().await[0],
            Call::Single { kind: ContentKind::Motion, file_name, .. } if file_name == "clip.mp4"
        ));
        // Per-job scratch space is gone.
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn large_document_goes_out_as_one_batch_of_six() {
        let scratch = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(
            store_with("doc", 120, MIB),
            no_http(),
            "tidemark-no-such-transcoder",
            scratch.path(),
        );
        let dest = Arc::new(RecordingDestination::default());
        let job = pipeline
            .new_job(1, SourceDescriptor::remote("doc", None, None), "big.pdf".into())
            .await;
        let job_id = job.id;

        let outcome = pipeline.run(job, dest.clone()).await;

        assert!(matches!(
            outcome,
            JobOutcome::Completed {
                delivery_calls: 1,
                watermarked: false,
                ..
            }
        ));
        let calls = dest.calls().await;
        assert_eq!(calls[0], Call::Post {
            text: STARTING_TEXT.into(),
            controls: Controls::Cancel { job_id },
        });
        let delivered = dest.delivery_calls().await;
        assert_eq!(delivered.len(), 1);
        let Call::Batch { names, .. } = &delivered[0] else {
            panic!("expected a batch, got {:?}", delivered[0]);
        };
        assert_eq!(names.len(), 6);
        assert_eq!(calls.last().unwrap(), &Call::Edit {
            id: 1,
            text: COMPLETED_TEXT.into(),
        });
    }

    #[tokio::test]
    async fn url_probe_failure_fails_without_download() {
        let scratch = tempfile::tempdir().unwrap();
        let http = Arc::new(ScriptedHttp::failing_probe("404"));
        let pipeline = pipeline_with(
            Arc::new(MemoryStore::default()),
            http.clone(),
            "tidemark-no-such-transcoder",
            scratch.path(),
        );
        let dest = Arc::new(RecordingDestination::default());
        let job = pipeline
            .new_job(
                1,
                SourceDescriptor::url("https://example.com/missing.png").unwrap(),
                "missing.png".into(),
            )
            .await;

        let outcome = pipeline.run(job, dest.clone()).await;

        let JobOutcome::Failed(err) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(matches!(err, Error::SourceUnavailable { .. }));
        assert_eq!(http.gets.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(dest.delivery_calls().await.is_empty());
        let Call::Post { text, .. } = dest.calls().await.last().unwrap().clone() else {
            panic!("expected a failure message");
        };
        assert!(text.starts_with("Failed to download or process file: "), "{text}");
    }

    #[tokio::test]
    async fn cancel_mid_download_never_delivers() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = Arc::new(RecordingDestination::default());
        let job = TransferJob::new(
            SourceDescriptor::remote("vid", None, None),
            "clip.mp4".into(),
            defaults(),
        );
        let pipeline = pipeline_with(
            Arc::new(CancellingStore {
                token: job.cancel.clone(),
                before_cancel: 3,
            }),
            no_http(),
            "tidemark-no-such-transcoder",
            scratch.path(),
        );

        let outcome = pipeline.run(job, dest.clone()).await;

        assert!(matches!(outcome, JobOutcome::Cancelled), "got {outcome:?}");
        assert!(dest.delivery_calls().await.is_empty());
        assert!(!dest.calls().await.iter().any(|c| matches!(
            c,
            Call::Post { text, .. } if text.starts_with("Failed")
        )));
    }

    #[tokio::test]
    async fn cancel_after_two_batches_stops_delivery() {
        let scratch = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(
            store_with("doc", 30, 20),
            no_http(),
            "tidemark-no-such-transcoder",
            scratch.path(),
        )
        .with_limits(DeliveryLimits {
            single_shot_limit: 50,
            chunk_size: 20,
            batch_limit: 10,
        });
        let job = pipeline
            .new_job(1, SourceDescriptor::remote("doc", None, None), "a.bin".into())
            .await;
        let dest = Arc::new(RecordingDestination::cancelling_after_batches(
            2,
            job.cancel.clone(),
        ));

        let outcome = pipeline.run(job, dest.clone()).await;

        assert!(matches!(outcome, JobOutcome::Cancelled), "got {outcome:?}");
        assert_eq!(dest.delivery_calls().await.len(), 2);
        assert!(
            !dest
                .calls()
                .await
                .contains(&Call::Edit {
                    id: 1,
                    text: COMPLETED_TEXT.into(),
                })
        );
    }

    #[tokio::test]
    async fn watermark_failure_delivers_original_bytes() {
        let scratch = tempfile::tempdir().unwrap();
        // No font, so the image strategy fails.
        let pipeline = pipeline_with(
            store_with("img", 1, 64),
            no_http(),
            "tidemark-no-such-transcoder",
            scratch.path(),
        );
        let dest = Arc::new(RecordingDestination::default());
        let job = pipeline
            .new_job(1, SourceDescriptor::remote("img", None, None), "photo.png".into())
            .await;

        let outcome = pipeline.run(job, dest.clone()).await;

        assert!(matches!(
            outcome,
            JobOutcome::Completed {
                watermarked: false,
                delivered_bytes: 64,
                ..
            }
        ));
        assert_eq!(dest.single_payloads().await[0], Bytes::from(vec![1u8; 64]));
    }

    #[tokio::test]
    async fn cancel_during_final_upload_is_not_reported_complete() {
        let scratch = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(
            store_with("doc", 1, 64),
            no_http(),
            "tidemark-no-such-transcoder",
            scratch.path(),
        );
        let job = pipeline
            .new_job(1, SourceDescriptor::remote("doc", None, None), "notes.txt".into())
            .await;
        let dest = Arc::new(RecordingDestination::cancelling_on_single(job.cancel.clone()));

        let outcome = pipeline.run(job, dest.clone()).await;

        assert!(matches!(outcome, JobOutcome::Cancelled), "got {outcome:?}");
        assert_eq!(dest.delivery_calls().await.len(), 1);
        let calls = dest.calls().await;
        assert!(!calls.contains(&Call::Edit {
            id: 1,
            text: COMPLETED_TEXT.into(),
        }));
        assert!(!calls.iter().any(|c| matches!(
            c,
            Call::Post { text, .. } if text.starts_with("Failed")
        )));
    }

    #[tokio::test]
    async fn job_snapshots_requester_preferences() {
        let scratch = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(
            Arc::new(MemoryStore::default()),
            no_http(),
            "tidemark-no-such-transcoder",
            scratch.path(),
        );
        pipeline.prefs().set_text(5, "custom".into()).await;
        let job = pipeline
            .new_job(5, SourceDescriptor::remote("x", None, None), "a.png".into())
            .await;
        pipeline.prefs().set_text(5, "later".into()).await;
        assert_eq!(job.watermark.text, "custom");
    }
}
