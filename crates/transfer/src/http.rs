use std::time::Duration;

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    futures::{StreamExt, TryStreamExt},
    reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE},
    tracing::debug,
    url::Url,
};

use crate::source::{ByteStream, HttpFetch, ProbeInfo};

/// [`HttpFetch`] over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl ReqwestFetcher {
    /// `download_timeout` bounds connecting and each read of the body.
    pub fn new(probe_timeout: Duration, download_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(download_timeout)
            .read_timeout(download_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            probe_timeout,
        })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn probe(&self, url: &Url) -> Result<ProbeInfo> {
        let response = self
            .client
            .head(url.clone())
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;
        let headers = response.headers();
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let mime = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!(%url, ?size, ?mime, "probed URL");
        Ok(ProbeInfo { size, mime })
    }

    async fn stream_get(&self, url: &Url) -> Result<ByteStream> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes_stream().map_err(anyhow::Error::from).boxed())
    }
}
