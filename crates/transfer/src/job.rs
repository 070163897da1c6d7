use std::collections::HashMap;

use {
    tidemark_common::{ContentKind, SourceDescriptor, WatermarkSpec},
    tokio::sync::RwLock,
    tokio_util::sync::CancellationToken,
    tracing::warn,
    uuid::Uuid,
};

use crate::error::Error;

/// Lifecycle of a job. Transitions only move forward; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Downloading,
    Watermarking,
    Uploading,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading => 1,
            Self::Watermarking => 2,
            Self::Uploading => 3,
            Self::Completed | Self::Cancelled | Self::Failed => 4,
        }
    }

    /// Forward moves only. Stages may be skipped (no watermark), and any
    /// live state may end in a terminal one.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Watermarking => "watermarking",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-flight request, owned by the task driving it.
#[derive(Debug)]
pub struct TransferJob {
    pub id: Uuid,
    pub source: SourceDescriptor,
    status: JobStatus,
    /// 0 means unknown.
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub uploaded_bytes: u64,
    pub cancel: CancellationToken,
    pub watermark: WatermarkSpec,
    /// Always carries the original content's extension.
    pub final_name: String,
    pub kind: ContentKind,
}

impl TransferJob {
    #[must_use]
    pub fn new(source: SourceDescriptor, final_name: String, watermark: WatermarkSpec) -> Self {
        let total_bytes = match &source {
            SourceDescriptor::RemoteUpload { declared_size, .. } => declared_size.unwrap_or(0),
            SourceDescriptor::UrlDownload { .. } => 0,
        };
        Self {
            id: Uuid::new_v4(),
            kind: ContentKind::from_file_name(&final_name),
            source,
            status: JobStatus::Pending,
            total_bytes,
            downloaded_bytes: 0,
            uploaded_bytes: 0,
            cancel: CancellationToken::new(),
            watermark,
            final_name,
        }
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Move to `next`. Backward or post-terminal moves are refused and logged.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            warn!(job_id = %self.id, from = %self.status, to = %next, "refused status transition");
            false
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// How a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        delivered_bytes: u64,
        delivery_calls: usize,
        watermarked: bool,
    },
    Cancelled,
    Failed(Error),
}

impl JobOutcome {
    #[must_use]
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Cancelled => JobStatus::Cancelled,
            Self::Failed(_) => JobStatus::Failed,
        }
    }
}

/// Cancellation tokens of running jobs, keyed by job id.
///
/// Routes Cancel presses to the right job.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, job: &TransferJob) {
        self.jobs.write().await.insert(job.id, job.cancel.clone());
    }

    pub async fn remove(&self, id: &Uuid) {
        self.jobs.write().await.remove(id);
    }

    /// Fire the job's token. Returns `false` when the job is unknown or finished.
    pub async fn cancel(&self, id: &Uuid) -> bool {
        match self.jobs.read().await.get(id) {
            Some(token) => {
                token.cancel();
                true
            },
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
