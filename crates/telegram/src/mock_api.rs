//! In-process Bot API double for tests.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        http::{StatusCode, Uri},
        routing::post,
    },
    serde_json::{Value, json},
    teloxide::Bot,
    tokio::{sync::oneshot, task::JoinHandle},
};

pub(crate) const TOKEN: &str = "test-token";
pub(crate) const CHAT_ID: i64 = 42;
pub(crate) const SENT_MESSAGE_ID: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TelegramApiMethod {
    SendMessage,
    EditMessageText,
    SendDocument,
    SendVideo,
    SendMediaGroup,
    GetFile,
    AnswerCallbackQuery,
    Other(String),
}

impl TelegramApiMethod {
    fn from_path(path: &str) -> Self {
        let method = path.rsplit('/').next().unwrap_or_default();
        match method {
            "SendMessage" => Self::SendMessage,
            "EditMessageText" => Self::EditMessageText,
            "SendDocument" => Self::SendDocument,
            "SendVideo" => Self::SendVideo,
            "SendMediaGroup" => Self::SendMediaGroup,
            "GetFile" => Self::GetFile,
            "AnswerCallbackQuery" => Self::AnswerCallbackQuery,
            _ => Self::Other(method.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct CapturedRequest {
    method: TelegramApiMethod,
    body: String,
}

#[derive(Clone, Default)]
struct ApiState {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    /// file_id -> (file_path, body)
    files: Arc<HashMap<String, (String, Vec<u8>)>>,
}

fn message_json(text: &str) -> Value {
    json!({
        "message_id": SENT_MESSAGE_ID,
        "date": 0,
        "chat": { "id": CHAT_ID, "type": "private", "first_name": "Alice" },
        "text": text,
    })
}

async fn api_handler(State(state): State<ApiState>, uri: Uri, body: Bytes) -> Json<Value> {
    let method = TelegramApiMethod::from_path(uri.path());
    let raw = String::from_utf8_lossy(&body).to_string();
    state
        .requests
        .lock()
        .expect("lock requests")
        .push(CapturedRequest {
            method: method.clone(),
            body: raw.clone(),
        });

    let result = match method {
        TelegramApiMethod::SendMessage
        | TelegramApiMethod::EditMessageText
        | TelegramApiMethod::SendDocument
        | TelegramApiMethod::SendVideo => message_json("ok"),
        TelegramApiMethod::SendMediaGroup => json!([message_json("ok")]),
        TelegramApiMethod::GetFile => {
            let request: Value = serde_json::from_str(&raw).unwrap_or_default();
            let file_id = request["file_id"].as_str().unwrap_or_default().to_string();
            match state.files.get(&file_id) {
                Some((path, data)) => json!({
                    "file_id": file_id,
                    "file_unique_id": format!("u-{file_id}"),
                    "file_size": data.len(),
                    "file_path": path,
                }),
                None => {
                    return Json(json!({
                        "ok": false,
                        "error_code": 400,
                        "description": "Bad Request: invalid file_id",
                    }));
                },
            }
        },
        TelegramApiMethod::AnswerCallbackQuery | TelegramApiMethod::Other(_) => json!(true),
    };
    Json(json!({ "ok": true, "result": result }))
}

async fn file_handler(State(state): State<ApiState>, uri: Uri) -> (StatusCode, Vec<u8>) {
    let prefix = format!("/file/bot{TOKEN}/");
    let Some(path) = uri.path().strip_prefix(&prefix) else {
        return (StatusCode::NOT_FOUND, Vec::new());
    };
    state
        .files
        .values()
        .find(|(p, _)| p == path)
        .map_or((StatusCode::NOT_FOUND, Vec::new()), |(_, data)| {
            (StatusCode::OK, data.clone())
        })
}

pub(crate) struct MockTelegramApi {
    state: ApiState,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl MockTelegramApi {
    pub(crate) async fn start() -> Self {
        Self::with_files(Vec::new()).await
    }

    /// Serve `(file_id, file_path, body)` through getFile and the file endpoint.
    pub(crate) async fn with_files(files: Vec<(&str, &str, Vec<u8>)>) -> Self {
        let state = ApiState {
            requests: Arc::default(),
            files: Arc::new(
                files
                    .into_iter()
                    .map(|(id, path, data)| (id.to_string(), (path.to_string(), data)))
                    .collect(),
            ),
        };
        let app = Router::new()
            .route("/{*path}", post(api_handler).get(file_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("serve mock telegram api");
        });

        Self {
            state,
            addr,
            shutdown: Some(shutdown_tx),
            server,
        }
    }

    pub(crate) fn bot(&self) -> Bot {
        let api_url = reqwest::Url::parse(&format!("http://{}/", self.addr)).expect("api url");
        Bot::new(TOKEN).set_api_url(api_url)
    }

    /// Raw bodies of every captured call to `method`, in order.
    pub(crate) fn requests_for(&self, method: TelegramApiMethod) -> Vec<String> {
        self.state
            .requests
            .lock()
            .expect("lock requests")
            .iter()
            .filter(|r| r.method == method)
            .map(|r| r.body.clone())
            .collect()
    }

    pub(crate) fn methods(&self) -> Vec<TelegramApiMethod> {
        self.state
            .requests
            .lock()
            .expect("lock requests")
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    pub(crate) async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.server.await.expect("server join");
    }
}
