use std::{collections::HashMap, sync::Arc};

use {
    tidemark_common::SourceDescriptor,
    tidemark_transfer::{JobRegistry, RequesterId, TransferPipeline, WatermarkField},
    tokio::sync::Mutex,
    tokio_util::sync::CancellationToken,
};

/// A source waiting for its output name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIntake {
    pub source: SourceDescriptor,
    /// Name the source arrived with; its extension is kept.
    pub original_name: String,
}

/// What the next text message from a requester answers.
#[derive(Debug, Default)]
struct Conversation {
    intake: Option<PendingIntake>,
    setting: Option<WatermarkField>,
}

/// Shared state of one running bot.
pub struct BotState {
    pub bot: teloxide::Bot,
    pub pipeline: Arc<TransferPipeline>,
    pub jobs: Arc<JobRegistry>,
    pub default_output_name: String,
    pub cancel: CancellationToken,
    conversations: Mutex<HashMap<RequesterId, Conversation>>,
}

impl BotState {
    #[must_use]
    pub fn new(
        bot: teloxide::Bot,
        pipeline: Arc<TransferPipeline>,
        default_output_name: impl Into<String>,
    ) -> Self {
        Self {
            bot,
            pipeline,
            jobs: Arc::new(JobRegistry::new()),
            default_output_name: default_output_name.into(),
            cancel: CancellationToken::new(),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Remember a source until the requester names it. Replaces any earlier one.
    pub async fn set_intake(&self, requester: RequesterId, intake: PendingIntake) {
        self.conversations
            .lock()
            .await
            .entry(requester)
            .or_default()
            .intake = Some(intake);
    }

    pub async fn take_intake(&self, requester: RequesterId) -> Option<PendingIntake> {
        self.conversations
            .lock()
            .await
            .get_mut(&requester)
            .and_then(|c| c.intake.take())
    }

    pub async fn await_setting(&self, requester: RequesterId, field: WatermarkField) {
        self.conversations
            .lock()
            .await
            .entry(requester)
            .or_default()
            .setting = Some(field);
    }

    pub async fn awaited_setting(&self, requester: RequesterId) -> Option<WatermarkField> {
        self.conversations
            .lock()
            .await
            .get(&requester)
            .and_then(|c| c.setting)
    }

    pub async fn clear_setting(&self, requester: RequesterId) {
        if let Some(c) = self.conversations.lock().await.get_mut(&requester) {
            c.setting = None;
        }
    }
}
