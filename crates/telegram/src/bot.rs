use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    teloxide::{
        ApiError, RequestError,
        payloads::GetUpdatesSetters,
        prelude::*,
        types::{AllowedUpdate, BotCommand, UpdateKind},
    },
    tidemark_config::TidemarkConfig,
    tidemark_media::WatermarkEngine,
    tidemark_transfer::{PreferenceStore, ReqwestFetcher, SourceResolver, TransferPipeline},
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{handlers, state::BotState, store::TelegramObjectStore};

/// Pause after a failed `getUpdates` call.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A running polling loop.
pub struct PollingHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollingHandle {
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop polling and wait for the loop to exit. Running jobs are not awaited.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "telegram polling task panicked");
        }
    }

    /// Wait until the loop exits on its own (token cancelled elsewhere or a
    /// conflicting instance took over).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "telegram polling task panicked");
        }
    }
}

/// Bot client whose request timeout outlasts the long-poll timeout.
pub fn build_bot(config: &TidemarkConfig) -> anyhow::Result<Bot> {
    let token = config
        .telegram
        .token()
        .context("telegram.token is not configured")?;
    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(
            u64::from(config.telegram.poll_timeout_secs) + 15,
        ))
        .build()?;
    let mut bot = Bot::with_client(token, client);
    if let Some(api_url) = &config.telegram.api_url {
        let url = reqwest::Url::parse(api_url)
            .with_context(|| format!("invalid telegram.api_url: {api_url}"))?;
        bot = bot.set_api_url(url);
    }
    Ok(bot)
}

/// Wire the transfer pipeline to Telegram uploads and plain HTTP.
pub fn build_pipeline(config: &TidemarkConfig, bot: &Bot) -> anyhow::Result<TransferPipeline> {
    let probe_timeout = Duration::from_secs(config.transfer.probe_timeout_secs);
    let download_timeout = Duration::from_secs(config.transfer.download_timeout_secs);

    let file_client = reqwest::Client::builder()
        .connect_timeout(download_timeout)
        .read_timeout(download_timeout)
        .build()
        .context("failed to build file download client")?;
    let store = Arc::new(TelegramObjectStore::new(bot.clone(), file_client));
    let http = Arc::new(ReqwestFetcher::new(probe_timeout, download_timeout)?);

    let engine = WatermarkEngine::from_config(
        config.watermark.font_path.as_deref(),
        &config.transcoder.binary,
    );
    let prefs = Arc::new(PreferenceStore::new(config.watermark.to_spec()));

    Ok(
        TransferPipeline::new(SourceResolver::new(store, http), engine, prefs)
            .with_temp_root(config.transfer.temp_dir.clone()),
    )
}

/// Connect, register commands, and spawn the polling loop.
pub async fn start_polling(config: &TidemarkConfig) -> anyhow::Result<PollingHandle> {
    let bot = build_bot(config)?;

    // Verify credentials.
    let me = bot.get_me().await.context("telegram getMe failed")?;
    // Long polling does not work while a webhook is set.
    bot.delete_webhook().await?;

    let commands = vec![
        BotCommand::new("start", "Start the bot"),
        BotCommand::new("help", "Show available commands"),
    ];
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!("failed to register bot commands: {e}");
    }
    info!(username = ?me.username, "telegram bot connected (webhook cleared)");

    let pipeline = Arc::new(build_pipeline(config, &bot)?);
    let state = Arc::new(BotState::new(
        bot,
        pipeline,
        config.transfer.default_output_name.clone(),
    ));
    let cancel = state.cancel.clone();
    let poll_timeout = config.telegram.poll_timeout_secs;
    let task = tokio::spawn(poll_loop(state, poll_timeout));

    Ok(PollingHandle { cancel, task })
}

async fn poll_loop(state: Arc<BotState>, poll_timeout: u32) {
    info!("starting telegram polling loop");
    let cancel = state.cancel.clone();
    let mut offset: i32 = 0;

    loop {
        let request = state
            .bot
            .get_updates()
            .offset(offset)
            .timeout(poll_timeout)
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery]);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = request.send() => result,
        };

        match result {
            Ok(updates) => {
                debug!(count = updates.len(), "got telegram updates");
                for update in updates {
                    offset = update.id.as_offset();
                    dispatch(update.kind, &state).await;
                }
            },
            Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                warn!("telegram polling stopped: another instance is running with this token");
                cancel.cancel();
                break;
            },
            Err(e) => {
                warn!(error = %e, "telegram getUpdates failed");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(RETRY_DELAY) => {},
                }
            },
        }
    }
    info!("telegram polling stopped");
}

async fn dispatch(kind: UpdateKind, state: &Arc<BotState>) {
    match kind {
        UpdateKind::Message(msg) => {
            let chat_id = msg.chat.id.0;
            debug!(chat_id, "received telegram message");
            if let Err(e) = handlers::handle_message(msg, state).await {
                error!(chat_id, error = %e, "error handling telegram message");
            }
        },
        UpdateKind::CallbackQuery(query) => {
            debug!(callback_data = ?query.data, "received telegram callback query");
            if let Err(e) = handlers::handle_callback_query(query, state).await {
                error!(error = %e, "error handling telegram callback query");
            }
        },
        other => debug!("ignoring update: {other:?}"),
    }
}
