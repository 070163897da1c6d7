use {
    anyhow::Result,
    async_trait::async_trait,
    futures::{StreamExt, TryStreamExt},
    teloxide::prelude::*,
    tidemark_transfer::{ObjectStore, RemoteObject},
    tracing::debug,
};

use crate::error::Error;

/// Streams uploaded files from the Bot API file endpoint.
///
/// Uses its own HTTP client: the bot client's total request timeout is sized
/// for API calls, not for file bodies.
pub struct TelegramObjectStore {
    bot: Bot,
    client: reqwest::Client,
}

impl TelegramObjectStore {
    #[must_use]
    pub fn new(bot: Bot, client: reqwest::Client) -> Self {
        Self { bot, client }
    }

    /// `{api_url}/file/bot{token}/{file_path}`.
    fn file_url(&self, file_path: &str) -> crate::error::Result<reqwest::Url> {
        self.bot
            .api_url()
            .join(&format!("file/bot{}/{file_path}", self.bot.token()))
            .map_err(|e| Error::FileUrl {
                path: file_path.to_owned(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ObjectStore for TelegramObjectStore {
    async fn resolve(&self, object_id: &str) -> Result<RemoteObject> {
        let file = self
            .bot
            .get_file(object_id)
            .await
            .map_err(|source| Error::FileLookup {
                file_id: object_id.to_owned(),
                source,
            })?;
        let url = self.file_url(&file.path)?;
        debug!(object_id, size = file.meta.size, "downloading telegram file");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Error::from)?
            .error_for_status()
            .map_err(Error::from)?;
        Ok(RemoteObject {
            stream: response.bytes_stream().map_err(anyhow::Error::from).boxed(),
            size: Some(u64::from(file.meta.size)).filter(|size| *size > 0),
            mime: None,
        })
    }
}
