use std::sync::Arc;

use {
    teloxide::{
        payloads::{AnswerCallbackQuerySetters, EditMessageTextSetters, SendMessageSetters},
        prelude::*,
        types::{
            CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MediaKind,
            MessageId, MessageKind,
        },
    },
    tidemark_common::{SourceDescriptor, naming},
    tidemark_transfer::{JobOutcome, RequesterId, WatermarkField},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::{
    outbound::{CANCEL_PREFIX, TelegramDestination},
    state::{BotState, PendingIntake},
};

// ── Texts ───────────────────────────────────────────────────────────────────

pub const GREETING: &str = "Hello! Send me a file or a URL to add a watermark.";
pub const HELP_TEXT: &str = "Available Commands:\n/start - Start the bot\n/help - Show this message";
pub const MENU_TEXT: &str = "Choose what to edit:";
pub const FILENAME_PROMPT: &str = "Please provide the custom filename you want to add, or send `/default` to keep default name.";
pub const UNSUPPORTED_TEXT: &str =
    "Unsupported file format. Only image and video formats are supported.";
pub const INVALID_LINK_TEXT: &str = "Invalid download link provided";
pub const CANCELLED_TEXT: &str = "Task Cancelled.";
pub const ALREADY_FINISHED_TEXT: &str = "This task has already finished.";

const PHOTO_FILE_NAME: &str = "image.jpg";
const PHOTO_MIME: &str = "image/jpeg";
const FALLBACK_MIME: &str = "application/octet-stream";

fn setting_prompt(field: WatermarkField) -> &'static str {
    match field {
        WatermarkField::Text => "Please enter the custom text for the watermark:",
        WatermarkField::Color => {
            "Please enter the custom color for the watermark in rgba format:(e.g. 255,255,255,128)"
        },
        WatermarkField::Size => "Please enter the custom size for the watermark (integer)",
    }
}

// ── Callback data ───────────────────────────────────────────────────────────

/// Inline button payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    SettingsMenu,
    SetField(WatermarkField),
    Back,
    Cancel(Uuid),
}

impl CallbackAction {
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(id) = data.strip_prefix(CANCEL_PREFIX) {
            return Uuid::parse_str(id).ok().map(Self::Cancel);
        }
        match data {
            "set_watermark" => Some(Self::SettingsMenu),
            "set_watermark_text" => Some(Self::SetField(WatermarkField::Text)),
            "set_watermark_color" => Some(Self::SetField(WatermarkField::Color)),
            "set_watermark_size" => Some(Self::SetField(WatermarkField::Size)),
            "help_back" => Some(Self::Back),
            _ => None,
        }
    }

    #[must_use]
    pub fn data(self) -> String {
        match self {
            Self::SettingsMenu => "set_watermark".into(),
            Self::SetField(WatermarkField::Text) => "set_watermark_text".into(),
            Self::SetField(WatermarkField::Color) => "set_watermark_color".into(),
            Self::SetField(WatermarkField::Size) => "set_watermark_size".into(),
            Self::Back => "help_back".into(),
            Self::Cancel(id) => format!("{CANCEL_PREFIX}{id}"),
        }
    }
}

fn button(label: &str, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, action.data())
}

fn help_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button(
        "Set Watermark",
        CallbackAction::SettingsMenu,
    )]])
}

fn settings_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("Text", CallbackAction::SetField(WatermarkField::Text))],
        vec![button("Color", CallbackAction::SetField(WatermarkField::Color))],
        vec![button("Size", CallbackAction::SetField(WatermarkField::Size))],
        vec![button("Back", CallbackAction::Back)],
    ])
}

// ── Intake ──────────────────────────────────────────────────────────────────

/// An uploaded file as announced by the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_id: String,
    pub file_name: String,
    pub size: Option<u64>,
    pub mime: String,
}

impl Upload {
    /// Only image and video uploads are accepted.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.mime.starts_with("image/") || self.mime.starts_with("video/")
    }

    fn into_intake(self) -> PendingIntake {
        PendingIntake {
            source: SourceDescriptor::remote(self.file_id, self.size, Some(self.mime)),
            original_name: self.file_name,
        }
    }
}

fn nonzero(size: u32) -> Option<u64> {
    (size > 0).then_some(u64::from(size))
}

/// Document, largest photo size, or video carried by `msg`.
#[must_use]
pub fn extract_upload(msg: &Message) -> Option<Upload> {
    let MessageKind::Common(common) = &msg.kind else {
        return None;
    };
    match &common.media_kind {
        MediaKind::Document(d) => Some(Upload {
            file_id: d.document.file.id.clone(),
            file_name: d
                .document
                .file_name
                .clone()
                .unwrap_or_else(|| naming::URL_FALLBACK_NAME.to_string()),
            size: nonzero(d.document.file.size),
            mime: d
                .document
                .mime_type
                .as_ref()
                .map_or_else(|| FALLBACK_MIME.to_string(), ToString::to_string),
        }),
        MediaKind::Photo(p) => p.photo.iter().max_by_key(|ps| ps.file.size).map(|ps| Upload {
            file_id: ps.file.id.clone(),
            file_name: PHOTO_FILE_NAME.to_string(),
            size: nonzero(ps.file.size),
            mime: PHOTO_MIME.to_string(),
        }),
        MediaKind::Video(v) => Some(Upload {
            file_id: v.video.file.id.clone(),
            file_name: v
                .video
                .file_name
                .clone()
                .unwrap_or_else(|| "video.mp4".to_string()),
            size: nonzero(v.video.file.size),
            mime: v
                .video
                .mime_type
                .as_ref()
                .map_or_else(|| "video/mp4".to_string(), ToString::to_string),
        }),
        _ => None,
    }
}

fn extract_text(msg: &Message) -> Option<&str> {
    match &msg.kind {
        MessageKind::Common(common) => match &common.media_kind {
            MediaKind::Text(t) => Some(t.text.as_str()),
            _ => None,
        },
        _ => None,
    }
}

/// Command name without the slash or a `@botname` suffix.
fn command(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('/')?;
    let word = rest.split_whitespace().next().unwrap_or_default();
    Some(word.split('@').next().unwrap_or_default())
}

fn is_url(text: &str) -> bool {
    text.starts_with("http://") || text.starts_with("https://")
}

fn requester_of(user: &teloxide::types::User) -> RequesterId {
    i64::try_from(user.id.0).unwrap_or(i64::MAX)
}

// ── Messages ────────────────────────────────────────────────────────────────

/// Handle one inbound message (called from the polling loop).
pub async fn handle_message(msg: Message, state: &Arc<BotState>) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    let Some(requester) = msg.from.as_ref().map(requester_of) else {
        debug!(chat_id = chat_id.0, "ignoring message without sender");
        return Ok(());
    };

    if let Some(text) = extract_text(&msg) {
        return handle_text(text.trim(), chat_id, requester, state).await;
    }

    let Some(upload) = extract_upload(&msg) else {
        debug!(chat_id = chat_id.0, "ignoring message without file or text");
        return Ok(());
    };
    if !upload.is_supported() {
        info!(chat_id = chat_id.0, mime = %upload.mime, "rejected unsupported upload");
        state.bot.send_message(chat_id, UNSUPPORTED_TEXT).await?;
        return Ok(());
    }
    info!(chat_id = chat_id.0, file_name = %upload.file_name, "upload received");
    state.set_intake(requester, upload.into_intake()).await;
    state.bot.send_message(chat_id, FILENAME_PROMPT).await?;
    Ok(())
}

async fn handle_text(
    text: &str,
    chat_id: ChatId,
    requester: RequesterId,
    state: &Arc<BotState>,
) -> anyhow::Result<()> {
    match command(text) {
        Some("start") => {
            state.bot.send_message(chat_id, GREETING).await?;
            return Ok(());
        },
        Some("help") => {
            state
                .bot
                .send_message(chat_id, HELP_TEXT)
                .reply_markup(help_keyboard())
                .await?;
            return Ok(());
        },
        _ => {},
    }

    if let Some(field) = state.awaited_setting(requester).await {
        return apply_setting(text, field, chat_id, requester, state).await;
    }

    if let Some(intake) = state.take_intake(requester).await {
        return start_job(text, intake, chat_id, requester, state).await;
    }

    if is_url(text) {
        let source = match SourceDescriptor::url(text) {
            Ok(source) => source,
            Err(e) => {
                debug!(chat_id = chat_id.0, error = %e, "rejected URL");
                state.bot.send_message(chat_id, INVALID_LINK_TEXT).await?;
                return Ok(());
            },
        };
        let original_name = match &source {
            SourceDescriptor::UrlDownload { url } => naming::name_from_url(url),
            SourceDescriptor::RemoteUpload { .. } => naming::URL_FALLBACK_NAME.to_string(),
        };
        info!(chat_id = chat_id.0, %original_name, "URL received");
        state
            .set_intake(requester, PendingIntake {
                source,
                original_name,
            })
            .await;
        state.bot.send_message(chat_id, FILENAME_PROMPT).await?;
    }
    Ok(())
}

async fn apply_setting(
    text: &str,
    field: WatermarkField,
    chat_id: ChatId,
    requester: RequesterId,
    state: &Arc<BotState>,
) -> anyhow::Result<()> {
    let prefs = state.pipeline.prefs();
    let reply = match prefs.apply_input(requester, field, text).await {
        Ok(()) => {
            state.clear_setting(requester).await;
            let current = prefs.snapshot(requester).await;
            match field {
                WatermarkField::Text => format!("Watermark text set to: `{}`", current.text),
                WatermarkField::Color => format!("Watermark color set to: `{}`", current.color),
                WatermarkField::Size => format!("Watermark size set to: `{}`", current.font_size),
            }
        },
        Err(e) => format!("Failed to set watermark, please check input\n\n {e}"),
    };
    state.bot.send_message(chat_id, reply).await?;
    Ok(())
}

async fn start_job(
    reply: &str,
    intake: PendingIntake,
    chat_id: ChatId,
    requester: RequesterId,
    state: &Arc<BotState>,
) -> anyhow::Result<()> {
    let final_name =
        naming::final_file_name(Some(reply), &state.default_output_name, &intake.original_name);
    state
        .bot
        .send_message(chat_id, format!("Processing file: {final_name}"))
        .await?;

    let job = state
        .pipeline
        .new_job(requester, intake.source, final_name)
        .await;
    state.jobs.register(&job).await;

    let job_id = job.id;
    let pipeline = Arc::clone(&state.pipeline);
    let jobs = Arc::clone(&state.jobs);
    let destination = Arc::new(TelegramDestination::new(state.bot.clone(), chat_id));
    tokio::spawn(async move {
        let outcome = pipeline.run(job, destination).await;
        jobs.remove(&job_id).await;
        match outcome {
            JobOutcome::Failed(e) => warn!(%job_id, chat_id = chat_id.0, error = %e, "job failed"),
            other => debug!(%job_id, status = %other.status(), "job finished"),
        }
    });
    Ok(())
}

// ── Callbacks ───────────────────────────────────────────────────────────────

/// Handle an inline button press.
pub async fn handle_callback_query(query: CallbackQuery, state: &Arc<BotState>) -> anyhow::Result<()> {
    let Some(action) = query.data.as_deref().and_then(CallbackAction::parse) else {
        state.bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };
    let requester = requester_of(&query.from);
    let origin: Option<(ChatId, MessageId)> = query.message.as_ref().map(|m| (m.chat().id, m.id()));

    match action {
        CallbackAction::Cancel(job_id) => {
            if state.jobs.cancel(&job_id).await {
                info!(%job_id, requester, "job cancelled by requester");
                state.bot.answer_callback_query(&query.id).await?;
                if let Some((chat_id, message_id)) = origin {
                    state
                        .bot
                        .edit_message_text(chat_id, message_id, CANCELLED_TEXT)
                        .await?;
                }
            } else {
                state
                    .bot
                    .answer_callback_query(&query.id)
                    .text(ALREADY_FINISHED_TEXT)
                    .await?;
            }
        },
        CallbackAction::SettingsMenu => {
            state.bot.answer_callback_query(&query.id).await?;
            if let Some((chat_id, message_id)) = origin {
                state
                    .bot
                    .edit_message_text(chat_id, message_id, MENU_TEXT)
                    .reply_markup(settings_keyboard())
                    .await?;
            }
        },
        CallbackAction::SetField(field) => {
            state.bot.answer_callback_query(&query.id).await?;
            state.await_setting(requester, field).await;
            if let Some((chat_id, message_id)) = origin {
                state
                    .bot
                    .edit_message_text(chat_id, message_id, setting_prompt(field))
                    .await?;
            }
        },
        CallbackAction::Back => {
            state.bot.answer_callback_query(&query.id).await?;
            if let Some((chat_id, message_id)) = origin {
                state
                    .bot
                    .edit_message_text(chat_id, message_id, HELP_TEXT)
                    .reply_markup(help_keyboard())
                    .await?;
            }
        },
    }
    Ok(())
}
