//! Turns a [`SourceDescriptor`] into one readable byte stream.

use std::sync::Arc;

use {
    anyhow::Result as AnyResult,
    async_trait::async_trait,
    bytes::{Bytes, BytesMut},
    futures::{StreamExt, stream::BoxStream},
    tidemark_common::SourceDescriptor,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
    url::Url,
};

use crate::{
    error::{Error, Result},
    progress::{Phase, ProgressTracker},
};

/// Mime type used when the source does not report one.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Sequential, read-once stream of source bytes.
pub type ByteStream = BoxStream<'static, AnyResult<Bytes>>;

/// An object already uploaded to the chat platform.
pub struct RemoteObject {
    pub stream: ByteStream,
    pub size: Option<u64>,
    pub mime: Option<String>,
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("size", &self.size)
            .field("mime", &self.mime)
            .finish_non_exhaustive()
    }
}

/// Retrieves uploaded objects by id.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn resolve(&self, object_id: &str) -> AnyResult<RemoteObject>;
}

/// Metadata from a HEAD probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    pub size: Option<u64>,
    pub mime: Option<String>,
}

/// Plain HTTP access for URL sources.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Metadata probe. Non-success statuses are errors.
    async fn probe(&self, url: &Url) -> AnyResult<ProbeInfo>;

    /// Streaming GET. Non-success statuses are errors.
    async fn stream_get(&self, url: &Url) -> AnyResult<ByteStream>;
}

/// A resolved source: the stream plus what is known about it up front.
pub struct ResolvedSource {
    pub stream: ByteStream,
    /// 0 when unknown.
    pub declared_size: u64,
    pub mime: String,
}

impl std::fmt::Debug for ResolvedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSource")
            .field("declared_size", &self.declared_size)
            .field("mime", &self.mime)
            .finish_non_exhaustive()
    }
}

/// Normalizes chat uploads and URLs into one streaming contract.
#[derive(Clone)]
pub struct SourceResolver {
    store: Arc<dyn ObjectStore>,
    http: Arc<dyn HttpFetch>,
}

impl SourceResolver {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, http: Arc<dyn HttpFetch>) -> Self {
        Self { store, http }
    }

    /// Resolve the source. URL sources are probed before any byte is read.
    pub async fn resolve(&self, source: &SourceDescriptor) -> Result<ResolvedSource> {
        match source {
            SourceDescriptor::RemoteUpload {
                object_id,
                declared_size,
                mime_hint,
            } => {
                let object = self
                    .store
                    .resolve(object_id)
                    .await
                    .map_err(|e| Error::source_unavailable(format!("{e:#}")))?;
                let declared_size = object.size.or(*declared_size).unwrap_or(0);
                let mime = object
                    .mime
                    .or_else(|| mime_hint.clone())
                    .unwrap_or_else(|| DEFAULT_MIME.to_string());
                debug!(object_id, declared_size, mime, "resolved remote upload");
                Ok(ResolvedSource {
                    stream: object.stream,
                    declared_size,
                    mime,
                })
            },
            SourceDescriptor::UrlDownload { url } => {
                let probe = self
                    .http
                    .probe(url)
                    .await
                    .map_err(|e| Error::source_unavailable(format!("probe {url}: {e:#}")))?;
                let stream = self
                    .http
                    .stream_get(url)
                    .await
                    .map_err(|e| Error::source_unavailable(format!("GET {url}: {e:#}")))?;
                let declared_size = probe.size.unwrap_or(0);
                let mime = probe.mime.unwrap_or_else(|| DEFAULT_MIME.to_string());
                debug!(%url, declared_size, mime, "resolved URL source");
                Ok(ResolvedSource {
                    stream,
                    declared_size,
                    mime,
                })
            },
        }
    }
}

/// Read `stream` to the end into memory, recording download progress.
///
/// Cancellation is checked before every read. On a stream error or
/// cancellation the partial buffer is dropped.
pub async fn download_to_buffer(
    mut stream: ByteStream,
    tracker: &mut ProgressTracker,
    cancel: &CancellationToken,
) -> Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(capacity_hint(tracker.total(Phase::Download)));
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                buffer.extend_from_slice(&chunk);
                tracker.record(Phase::Download, buffer.len() as u64);
            },
            Some(Err(e)) => return Err(Error::download_failed(format!("{e:#}"))),
            None => break,
        }
    }
    let received = buffer.len() as u64;
    tracker.finish_download(received);
    info!(bytes = received, "download complete");
    Ok(buffer.freeze())
}

/// Preallocate for known sizes, capped so a lying header cannot exhaust memory.
fn capacity_hint(declared: u64) -> usize {
    const MAX_PREALLOC: u64 = 256 * 1024 * 1024;
    usize::try_from(declared.min(MAX_PREALLOC)).unwrap_or(0)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        std::{
            collections::HashMap,
            sync::atomic::{AtomicUsize, Ordering},
        },
        tokio::sync::mpsc,
    };

    /// Stream of `chunks` chunks of `chunk_len` bytes each.
    pub(crate) fn chunked_stream(chunks: usize, chunk_len: usize) -> ByteStream {
        futures::stream::iter((0..chunks).map(move |_| Ok(Bytes::from(vec![1u8; chunk_len]))))
            .boxed()
    }

    /// In-memory objects keyed by id.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub objects: HashMap<String, (usize, usize)>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn resolve(&self, object_id: &str) -> AnyResult<RemoteObject> {
            let (chunks, chunk_len) = self
                .objects
                .get(object_id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("file not found: {object_id}"))?;
            Ok(RemoteObject {
                stream: chunked_stream(chunks, chunk_len),
                size: Some((chunks * chunk_len) as u64),
                mime: None,
            })
        }
    }

    /// HTTP double with a fixed probe answer. Counts GETs.
    pub(crate) struct ScriptedHttp {
        pub probe: std::result::Result<ProbeInfo, String>,
        pub body: Vec<u8>,
        pub gets: AtomicUsize,
    }

    impl ScriptedHttp {
        pub(crate) fn ok(body: Vec<u8>, mime: &str) -> Self {
            Self {
                probe: Ok(ProbeInfo {
                    size: Some(body.len() as u64),
                    mime: Some(mime.into()),
                }),
                body,
                gets: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing_probe(status: &str) -> Self {
            Self {
                probe: Err(status.to_string()),
                body: Vec::new(),
                gets: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HttpFetch for ScriptedHttp {
        async fn probe(&self, _url: &Url) -> AnyResult<ProbeInfo> {
            self.probe.clone().map_err(|status| anyhow::anyhow!("HTTP status {status}"))
        }

        async fn stream_get(&self, _url: &Url) -> AnyResult<ByteStream> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let body = Bytes::from(self.body.clone());
            Ok(futures::stream::iter(vec![Ok(body)]).boxed())
        }
    }

    fn tracker(total: u64, cancel: &CancellationToken) -> ProgressTracker {
        let (tx, _rx) = mpsc::unbounded_channel();
        ProgressTracker::new("f", total, tx, cancel.clone())
    }

    fn resolver(store: MemoryStore, http: ScriptedHttp) -> (SourceResolver, Arc<ScriptedHttp>) {
        let http = Arc::new(http);
        (SourceResolver::new(Arc::new(store), http.clone()), http)
    }

    #[tokio::test]
    async fn remote_upload_prefers_store_size_and_hint_mime() {
        let mut store = MemoryStore::default();
        store.objects.insert("abc".into(), (4, 10));
        let (resolver, _) = resolver(store, ScriptedHttp::failing_probe("500"));

        let resolved = resolver
            .resolve(&SourceDescriptor::remote("abc", Some(1), Some("video/mp4".into())))
            .await
            .unwrap();
        assert_eq!(resolved.declared_size, 40);
        assert_eq!(resolved.mime, "video/mp4");
    }

    #[tokio::test]
    async fn unknown_object_is_source_unavailable() {
        let (resolver, _) = resolver(MemoryStore::default(), ScriptedHttp::failing_probe("500"));
        let err = resolver
            .resolve(&SourceDescriptor::remote("missing", None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn url_probe_failure_never_downloads() {
        let (resolver, http) = resolver(MemoryStore::default(), ScriptedHttp::failing_probe("404"));
        let err = resolver
            .resolve(&SourceDescriptor::url("https://example.com/x.png").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
        assert!(err.to_string().contains("404"));
        assert_eq!(http.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn url_source_uses_probe_metadata() {
        let (resolver, _) = resolver(
            MemoryStore::default(),
            ScriptedHttp::ok(vec![9; 64], "image/png"),
        );
        let resolved = resolver
            .resolve(&SourceDescriptor::url("https://example.com/x.png").unwrap())
            .await
            .unwrap();
        assert_eq!(resolved.declared_size, 64);
        assert_eq!(resolved.mime, "image/png");
    }

    #[tokio::test]
    async fn missing_probe_metadata_defaults() {
        let http = ScriptedHttp {
            probe: Ok(ProbeInfo::default()),
            body: vec![1, 2, 3],
            gets: AtomicUsize::new(0),
        };
        let (resolver, _) = resolver(MemoryStore::default(), http);
        let resolved = resolver
            .resolve(&SourceDescriptor::url("https://example.com/f").unwrap())
            .await
            .unwrap();
        assert_eq!(resolved.declared_size, 0);
        assert_eq!(resolved.mime, DEFAULT_MIME);
    }

    #[tokio::test]
    async fn buffers_whole_stream_in_order() {
        let cancel = CancellationToken::new();
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ])
        .boxed();
        let mut tracker = tracker(11, &cancel);
        let data = download_to_buffer(stream, &mut tracker, &cancel).await.unwrap();
        assert_eq!(&data[..], b"hello world");
        assert_eq!(tracker.bytes(Phase::Download), 11);
    }

    #[tokio::test]
    async fn stream_error_is_download_failure() {
        let cancel = CancellationToken::new();
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(anyhow::anyhow!("connection reset")),
        ])
        .boxed();
        let err = download_to_buffer(stream, &mut tracker(100, &cancel), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DownloadFailed { .. }));
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn cancellation_stops_reading() {
        let cancel = CancellationToken::new();
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let token = cancel.clone();
        let stream = futures::stream::iter(0..100)
            .map(move |i| {
                counter.fetch_add(1, Ordering::SeqCst);
                if i == 2 {
                    token.cancel();
                }
                Ok(Bytes::from_static(b"x"))
            })
            .boxed();

        let err = download_to_buffer(stream, &mut tracker(100, &cancel), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn source_larger_than_declared_raises_total() {
        let cancel = CancellationToken::new();
        let mut tracker = tracker(5, &cancel);
        download_to_buffer(chunked_stream(3, 4), &mut tracker, &cancel)
            .await
            .unwrap();
        assert_eq!(tracker.total(Phase::Download), 12);
        assert!(tracker.bytes(Phase::Download) <= tracker.total(Phase::Download));
    }
}
