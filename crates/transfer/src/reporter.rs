use std::sync::Arc;

use {
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    uuid::Uuid,
};

use crate::{
    delivery::{Controls, DestinationChannel, MessageHandle},
    progress::ProgressUpdate,
};

/// Renders progress updates into the job's status message.
///
/// Runs as its own task so slow edits never block the transfer. Queued
/// updates are coalesced to the newest one before each edit.
pub struct ProgressReporter {
    destination: Arc<dyn DestinationChannel>,
    handle: MessageHandle,
    job_id: Uuid,
    cancel: CancellationToken,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(
        destination: Arc<dyn DestinationChannel>,
        handle: MessageHandle,
        job_id: Uuid,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            destination,
            handle,
            job_id,
            cancel,
        }
    }

    /// Consume updates until the sender is dropped or the job is cancelled.
    pub fn spawn(self, updates: mpsc::UnboundedReceiver<ProgressUpdate>) -> JoinHandle<()> {
        tokio::spawn(self.run(updates))
    }

    async fn run(self, mut updates: mpsc::UnboundedReceiver<ProgressUpdate>) {
        let mut last_text: Option<String> = None;
        while let Some(mut update) = updates.recv().await {
            while let Ok(newer) = updates.try_recv() {
                update = newer;
            }
            if self.cancel.is_cancelled() {
                debug!(job_id = %self.job_id, "job cancelled, reporter stopping");
                break;
            }
            if last_text.as_deref() == Some(update.text.as_str()) {
                continue;
            }
            let controls = Controls::Cancel {
                job_id: self.job_id,
            };
            if let Err(e) = self
                .destination
                .edit_message(self.handle, &update.text, controls)
                .await
            {
                warn!(job_id = %self.job_id, error = %e, "failed to edit status message");
            }
            last_text = Some(update.text);
        }
    }
}
