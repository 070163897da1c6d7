use {
    anyhow::Result,
    async_trait::async_trait,
    bytes::Bytes,
    teloxide::{
        ApiError, RequestError,
        payloads::{EditMessageTextSetters, SendDocumentSetters, SendMessageSetters, SendVideoSetters},
        prelude::*,
        types::{
            ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, InputMedia,
            InputMediaDocument, InputMediaVideo, MessageId,
        },
    },
    tidemark_common::ContentKind,
    tidemark_transfer::{Attachment, Controls, DestinationChannel, MessageHandle},
    tracing::debug,
    uuid::Uuid,
};

/// Callback data prefix of the per-job Cancel button.
pub const CANCEL_PREFIX: &str = "cancel:";

/// Delivers into one Telegram chat.
#[derive(Clone)]
pub struct TelegramDestination {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramDestination {
    #[must_use]
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[must_use]
pub fn cancel_keyboard(job_id: Uuid) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "Cancel",
        format!("{CANCEL_PREFIX}{job_id}"),
    )]])
}

fn keyboard(controls: Controls) -> Option<InlineKeyboardMarkup> {
    match controls {
        Controls::None => None,
        Controls::Cancel { job_id } => Some(cancel_keyboard(job_id)),
    }
}

fn input_file(data: Bytes, file_name: impl Into<String>) -> InputFile {
    InputFile::memory(Vec::from(data)).file_name(file_name.into())
}

fn is_message_not_modified_error(error: &RequestError) -> bool {
    matches!(error, RequestError::Api(ApiError::MessageNotModified))
}

#[async_trait]
impl DestinationChannel for TelegramDestination {
    async fn send_single(
        &self,
        kind: ContentKind,
        data: Bytes,
        file_name: &str,
        caption: &str,
    ) -> Result<()> {
        debug!(chat_id = self.chat_id.0, file_name, bytes = data.len(), %kind, "sending file");
        let input = input_file(data, file_name);
        match kind {
            ContentKind::Motion => {
                self.bot
                    .send_video(self.chat_id, input)
                    .caption(caption)
                    .await?;
            },
            ContentKind::Image | ContentKind::GenericDocument => {
                self.bot
                    .send_document(self.chat_id, input)
                    .caption(caption)
                    .await?;
            },
        }
        Ok(())
    }

    async fn send_batch(&self, kind: ContentKind, items: Vec<Attachment>) -> Result<()> {
        debug!(chat_id = self.chat_id.0, items = items.len(), %kind, "sending media group");
        let media: Vec<InputMedia> = items
            .into_iter()
            .map(|item| {
                let input = input_file(item.data, item.file_name);
                match kind {
                    ContentKind::Motion => InputMedia::Video(InputMediaVideo::new(input)),
                    ContentKind::Image | ContentKind::GenericDocument => {
                        InputMedia::Document(InputMediaDocument::new(input))
                    },
                }
            })
            .collect();
        self.bot.send_media_group(self.chat_id, media).await?;
        Ok(())
    }

    async fn post_message(&self, text: &str, controls: Controls) -> Result<MessageHandle> {
        let mut request = self.bot.send_message(self.chat_id, text);
        if let Some(markup) = keyboard(controls) {
            request = request.reply_markup(markup);
        }
        let message = request.await?;
        Ok(MessageHandle {
            id: i64::from(message.id.0),
        })
    }

    async fn edit_message(&self, handle: MessageHandle, text: &str, controls: Controls) -> Result<()> {
        let message_id = MessageId(
            i32::try_from(handle.id)
                .map_err(|_| anyhow::anyhow!("message id {} out of range", handle.id))?,
        );
        let mut request = self.bot.edit_message_text(self.chat_id, message_id, text);
        if let Some(markup) = keyboard(controls) {
            request = request.reply_markup(markup);
        }
        match request.await {
            Ok(_) => Ok(()),
            Err(e) if is_message_not_modified_error(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
