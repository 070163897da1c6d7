//! Single-shot versus chunked delivery to the requesting conversation.

use std::sync::Arc;

use {
    anyhow::Result as AnyResult,
    async_trait::async_trait,
    bytes::Bytes,
    tidemark_common::ContentKind,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
    uuid::Uuid,
};

use crate::{
    error::{Error, Result},
    plan::{self, ChunkPlan},
    progress::{Phase, ProgressTracker},
};

/// Posted before the first batch of an oversized output.
pub const CHUNKED_NOTICE: &str = "Sending large file in chunks...";

/// Caption of single-shot deliveries.
#[must_use]
pub fn delivery_caption(final_name: &str) -> String {
    format!("Here is your watermarked file: `{final_name}`")
}

/// A message the destination posted and can later edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub id: i64,
}

/// Inline controls attached to a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controls {
    None,
    /// A Cancel button routed to the job.
    Cancel { job_id: Uuid },
}

/// One named file inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub data: Bytes,
}

/// The conversation a job delivers into.
#[async_trait]
pub trait DestinationChannel: Send + Sync {
    /// Deliver one object. `Motion` uses the platform's video primitive,
    /// everything else the document primitive.
    async fn send_single(
        &self,
        kind: ContentKind,
        data: Bytes,
        file_name: &str,
        caption: &str,
    ) -> AnyResult<()>;

    /// Deliver 1 to 10 attachments in one call, in order.
    async fn send_batch(&self, kind: ContentKind, items: Vec<Attachment>) -> AnyResult<()>;

    async fn post_message(&self, text: &str, controls: Controls) -> AnyResult<MessageHandle>;

    async fn edit_message(
        &self,
        handle: MessageHandle,
        text: &str,
        controls: Controls,
    ) -> AnyResult<()>;
}

/// Size thresholds for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryLimits {
    pub single_shot_limit: usize,
    pub chunk_size: usize,
    pub batch_limit: usize,
}

impl Default for DeliveryLimits {
    fn default() -> Self {
        Self {
            single_shot_limit: plan::SINGLE_SHOT_LIMIT,
            chunk_size: plan::CHUNK_SIZE,
            batch_limit: plan::BATCH_LIMIT,
        }
    }
}

/// What a delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    /// `send_single` plus `send_batch` calls.
    pub calls: usize,
    pub chunks: usize,
    pub bytes: u64,
}

/// Decides between single-shot and batched-chunk delivery and drives the
/// upload phase of the progress tracker.
pub struct DeliveryManager {
    destination: Arc<dyn DestinationChannel>,
    limits: DeliveryLimits,
}

impl DeliveryManager {
    #[must_use]
    pub fn new(destination: Arc<dyn DestinationChannel>, limits: DeliveryLimits) -> Self {
        Self {
            destination,
            limits,
        }
    }

    /// Deliver `data` as `final_name`.
    ///
    /// Cancellation is checked before every destination call. Batches already
    /// sent stay sent when a later call fails or the job is cancelled.
    pub async fn deliver(
        &self,
        kind: ContentKind,
        data: Bytes,
        final_name: &str,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport> {
        tracker.begin_upload(data.len() as u64);

        if data.len() <= self.limits.single_shot_limit {
            return self.deliver_single(kind, data, final_name, tracker, cancel).await;
        }
        self.deliver_chunked(kind, data, final_name, tracker, cancel)
            .await
    }

    async fn deliver_single(
        &self,
        kind: ContentKind,
        data: Bytes,
        final_name: &str,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport> {
        ensure_live(cancel)?;
        let len = data.len() as u64;
        self.destination
            .send_single(kind, data, final_name, &delivery_caption(final_name))
            .await
            .map_err(|e| Error::delivery_failed("send_single", &e))?;
        tracker.record(Phase::Upload, len);
        debug!(file_name = final_name, bytes = len, %kind, "delivered single object");
        Ok(DeliveryReport {
            calls: 1,
            chunks: 0,
            bytes: len,
        })
    }

    async fn deliver_chunked(
        &self,
        kind: ContentKind,
        data: Bytes,
        final_name: &str,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport> {
        let plan = ChunkPlan::new(data.len(), self.limits.chunk_size, self.limits.batch_limit);
        info!(
            file_name = final_name,
            bytes = data.len(),
            chunks = plan.chunk_count(),
            batches = plan.batch_count(),
            "delivering in chunks"
        );

        ensure_live(cancel)?;
        self.destination
            .post_message(CHUNKED_NOTICE, Controls::None)
            .await
            .map_err(|e| Error::delivery_failed("post chunk notice", &e))?;

        let mut report = DeliveryReport::default();
        let mut index = 0usize;
        for batch in plan.batches() {
            ensure_live(cancel)?;
            let items: Vec<Attachment> = batch
                .iter()
                .map(|range| {
                    let item = Attachment {
                        file_name: plan::chunk_name(final_name, index),
                        data: data.slice(range.clone()),
                    };
                    index += 1;
                    item
                })
                .collect();
            let batch_bytes: u64 = batch.iter().map(|r| r.len() as u64).sum();
            let count = items.len();

            self.destination
                .send_batch(kind, items)
                .await
                .map_err(|e| {
                    Error::delivery_failed(&format!("send_batch {}", report.calls + 1), &e)
                })?;

            report.calls += 1;
            report.chunks += count;
            report.bytes += batch_bytes;
            tracker.record(Phase::Upload, report.bytes);
            debug!(batch = report.calls, chunks = count, bytes = report.bytes, "batch delivered");
        }
        Ok(report)
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicUsize, Ordering},
        tokio::sync::{Mutex, mpsc},
    };

    const MIB: usize = 1024 * 1024;

    /// Calls seen by [`RecordingDestination`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Single {
            kind: ContentKind,
            file_name: String,
            len: usize,
            caption: String,
        },
        Batch {
            kind: ContentKind,
            names: Vec<String>,
            lens: Vec<usize>,
        },
        Post {
            text: String,
            controls: Controls,
        },
        Edit {
            id: i64,
            text: String,
        },
    }

    /// Records calls. Optionally cancels a token after N batches or on a
    /// single send, or fails a specific batch.
    #[derive(Default)]
    pub(crate) struct RecordingDestination {
        calls: Mutex<Vec<Call>>,
        single_payloads: Mutex<Vec<Bytes>>,
        cancel_after_batches: Option<(usize, CancellationToken)>,
        cancel_on_single: Option<CancellationToken>,
        fail_batch: Option<usize>,
        next_id: AtomicUsize,
        batches: AtomicUsize,
    }

    impl RecordingDestination {
        pub(crate) fn cancelling_after_batches(batches: usize, token: CancellationToken) -> Self {
            Self {
                cancel_after_batches: Some((batches, token)),
                ..Default::default()
            }
        }

        /// Cancels `token` while the single upload is in flight; the upload itself succeeds.
        pub(crate) fn cancelling_on_single(token: CancellationToken) -> Self {
            Self {
                cancel_on_single: Some(token),
                ..Default::default()
            }
        }

        pub(crate) fn failing_batch(batch: usize) -> Self {
            Self {
                fail_batch: Some(batch),
                ..Default::default()
            }
        }

        pub(crate) async fn calls(&self) -> Vec<Call> {
            self.calls.lock().await.clone()
        }

        pub(crate) async fn single_payloads(&self) -> Vec<Bytes> {
            self.single_payloads.lock().await.clone()
        }

        pub(crate) async fn delivery_calls(&self) -> Vec<Call> {
            self.calls()
                .await
                .into_iter()
                .filter(|c| matches!(c, Call::Single { .. } | Call::Batch { .. }))
                .collect()
        }
    }

    #[async_trait]
    impl DestinationChannel for RecordingDestination {
        async fn send_single(
            &self,
            kind: ContentKind,
            data: Bytes,
            file_name: &str,
            caption: &str,
        ) -> AnyResult<()> {
            self.calls.lock().await.push(Call::Single {
                kind,
                file_name: file_name.into(),
                len: data.len(),
                caption: caption.into(),
            });
            self.single_payloads.lock().await.push(data);
            if let Some(token) = &self.cancel_on_single {
                token.cancel();
            }
            Ok(())
        }

        async fn send_batch(&self, kind: ContentKind, items: Vec<Attachment>) -> AnyResult<()> {
            let n = self.batches.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_batch == Some(n) {
                anyhow::bail!("media group rejected");
            }
            self.calls.lock().await.push(Call::Batch {
                kind,
                names: items.iter().map(|i| i.file_name.clone()).collect(),
                lens: items.iter().map(|i| i.data.len()).collect(),
            });
            if let Some((after, token)) = &self.cancel_after_batches
                && n == *after
            {
                token.cancel();
            }
            Ok(())
        }

        async fn post_message(&self, text: &str, controls: Controls) -> AnyResult<MessageHandle> {
            self.calls.lock().await.push(Call::Post {
                text: text.into(),
                controls,
            });
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            Ok(MessageHandle { id })
        }

        async fn edit_message(
            &self,
            handle: MessageHandle,
            text: &str,
            _controls: Controls,
        ) -> AnyResult<()> {
            self.calls.lock().await.push(Call::Edit {
                id: handle.id,
                text: text.into(),
            });
            Ok(())
        }
    }

    fn tracker(cancel: &CancellationToken) -> ProgressTracker {
        let (tx, _rx) = mpsc::unbounded_channel();
        ProgressTracker::new("out.bin", 0, tx, cancel.clone())
    }

    fn small_limits() -> DeliveryLimits {
        DeliveryLimits {
            single_shot_limit: 50,
            chunk_size: 20,
            batch_limit: 10,
        }
    }

    #[tokio::test]
    async fn small_output_is_one_single_call() {
        let dest = Arc::new(RecordingDestination::default());
        let manager = DeliveryManager::new(dest.clone(), DeliveryLimits::default());
        let cancel = CancellationToken::new();
        let mut tracker = tracker(&cancel);

        let report = manager
            .deliver(
                ContentKind::Motion,
                Bytes::from(vec![0u8; 30 * MIB]),
                "clip.mp4",
                &mut tracker,
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(report.calls, 1);
        assert_eq!(dest.calls().await, vec![Call::Single {
            kind: ContentKind::Motion,
            file_name: "clip.mp4".into(),
            len: 30 * MIB,
            caption: "Here is your watermarked file: `clip.mp4`".into(),
        }]);
        assert_eq!(tracker.bytes(Phase::Upload), (30 * MIB) as u64);
    }

    #[tokio::test]
    async fn exactly_at_limit_is_single_shot() {
        let dest = Arc::new(RecordingDestination::default());
        let manager = DeliveryManager::new(dest.clone(), small_limits());
        let cancel = CancellationToken::new();
        let report = manager
            .deliver(
                ContentKind::GenericDocument,
                Bytes::from(vec![1u8; 50]),
                "a.pdf",
                &mut tracker(&cancel),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(report.calls, 1);
        assert_eq!(report.chunks, 0);
    }

    #[tokio::test]
    async fn oversized_output_is_one_batch_of_six() {
        let dest = Arc::new(RecordingDestination::default());
        let manager = DeliveryManager::new(dest.clone(), DeliveryLimits::default());
        let cancel = CancellationToken::new();
        let len = 120 * MIB;

        let report = manager
            .deliver(
                ContentKind::GenericDocument,
                Bytes::from(vec![7u8; len]),
                "big.pdf",
                &mut tracker(&cancel),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(report, DeliveryReport {
            calls: 1,
            chunks: 6,
            bytes: len as u64,
        });
        let calls = dest.calls().await;
        assert_eq!(calls[0], Call::Post {
            text: CHUNKED_NOTICE.into(),
            controls: Controls::None,
        });
        let Call::Batch { kind, names, lens } = &calls[1] else {
            panic!("expected batch, got {:?}", calls[1]);
        };
        assert_eq!(*kind, ContentKind::GenericDocument);
        assert_eq!(names[0], "big.pdf.part001");
        assert_eq!(names[5], "big.pdf.part006");
        assert!(lens.iter().all(|l| *l == 20 * MIB));
    }

    #[tokio::test]
    async fn batches_are_full_except_the_last() {
        let dest = Arc::new(RecordingDestination::default());
        let manager = DeliveryManager::new(dest.clone(), small_limits());
        let cancel = CancellationToken::new();
        // 23 chunks of 20 bytes, the last 15.
        let len = 22 * 20 + 15;

        let report = manager
            .deliver(
                ContentKind::Motion,
                Bytes::from(vec![0u8; len]),
                "v.mkv",
                &mut tracker(&cancel),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(report.calls, 3);
        assert_eq!(report.chunks, 23);
        let batches: Vec<Vec<usize>> = dest
            .delivery_calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::Batch { lens, kind, .. } => {
                    assert_eq!(kind, ContentKind::Motion);
                    Some(lens)
                },
                _ => None,
            })
            .collect();
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batches[1].len(), 10);
        assert_eq!(batches[2].len(), 3);
        assert_eq!(*batches[2].last().unwrap(), 15);
    }

    #[tokio::test]
    async fn cancellation_between_batches_stops_delivery() {
        let cancel = CancellationToken::new();
        let dest = Arc::new(RecordingDestination::cancelling_after_batches(2, cancel.clone()));
        let manager = DeliveryManager::new(dest.clone(), small_limits());

        let err = manager
            .deliver(
                ContentKind::GenericDocument,
                Bytes::from(vec![0u8; 30 * 20]),
                "a.bin",
                &mut tracker(&cancel),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(dest.delivery_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_delivery_makes_no_calls() {
        let dest = Arc::new(RecordingDestination::default());
        let manager = DeliveryManager::new(dest.clone(), small_limits());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = manager
            .deliver(
                ContentKind::Image,
                Bytes::from_static(b"tiny"),
                "a.png",
                &mut tracker(&cancel),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(dest.calls().await.is_empty());
    }

    #[tokio::test]
    async fn failed_batch_is_delivery_failure_without_retry() {
        let dest = Arc::new(RecordingDestination::failing_batch(2));
        let manager = DeliveryManager::new(dest.clone(), small_limits());
        let cancel = CancellationToken::new();
        let err = manager
            .deliver(
                ContentKind::GenericDocument,
                Bytes::from(vec![0u8; 30 * 20]),
                "a.bin",
                &mut tracker(&cancel),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeliveryFailed { .. }), "got {err:?}");
        assert!(err.to_string().contains("media group rejected"));
        // The first batch stays delivered; nothing after the failure is attempted.
        assert_eq!(dest.delivery_calls().await.len(), 1);
    }
}
