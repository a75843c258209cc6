//! NapCat (OneBot v11) websocket client
//!
//! Inbound frames are parsed into [`InboundEvent`]s and handed to a callback.
//! Outbound [`Action`]s are queued on an mpsc channel and written by the
//! connection loop, so senders never touch the socket and queued actions
//! survive a reconnect.

use std::time::Duration;

use arc_chat::{ChatId, SegmentSink};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tracing::{debug, info, warn};

use crate::config::QqBotConfig;

/// Capacity of the outbound action queue
const OUTBOX_CAPACITY: usize = 256;

// --- Inbound ---

/// An event pushed by NapCat. Only the fields the bot reads are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEvent {
    #[serde(default)]
    pub post_type: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default, deserialize_with = "id_string")]
    pub message_id: Option<String>,
    #[serde(default, deserialize_with = "id_string")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "id_string")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub raw_message: String,
    /// Either an array of message segments or a plain string
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(default)]
    pub sender: Option<Sender>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sender {
    #[serde(default, deserialize_with = "id_string")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub nickname: String,
}

impl InboundEvent {
    /// Concatenated text segments of the message, falling back to
    /// `raw_message`
    pub fn text(&self) -> String {
        let text = match &self.message {
            serde_json::Value::Array(segments) => segments
                .iter()
                .filter(|seg| seg.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|seg| seg.pointer("/data/text").and_then(|t| t.as_str()))
                .collect::<String>(),
            serde_json::Value::String(s) => s.clone(),
            _ => String::new(),
        };
        if text.is_empty() {
            self.raw_message.clone()
        } else {
            text
        }
    }

    /// Sender id, from the event or the sender block
    pub fn sender_id(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or_else(|| self.sender.as_ref().and_then(|s| s.user_id.as_deref()))
    }

    pub fn nickname(&self) -> &str {
        self.sender.as_ref().map(|s| s.nickname.as_str()).unwrap_or("")
    }
}

/// OneBot ids arrive as numbers; accept strings too
fn id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}

// --- Outbound ---

/// One element of an outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessageSegment {
    Text { text: String },
}

impl MessageSegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// OneBot actions the bot performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum Action {
    SendPrivateMsg {
        user_id: String,
        message: Vec<MessageSegment>,
    },
    SendGroupMsg {
        group_id: String,
        message: Vec<MessageSegment>,
    },
    /// `event_type` 1 shows "typing..." in a private chat
    SetInputStatus { user_id: String, event_type: u8 },
}

impl Action {
    /// Send `text` to a chat
    pub fn send(chat: &ChatId, text: &str) -> Self {
        let message = vec![MessageSegment::text(text)];
        match chat {
            ChatId::Private(user_id) => Action::SendPrivateMsg {
                user_id: user_id.clone(),
                message,
            },
            ChatId::Group(group_id) => Action::SendGroupMsg {
                group_id: group_id.clone(),
                message,
            },
        }
    }

    pub fn typing(user_id: &str) -> Self {
        Action::SetInputStatus {
            user_id: user_id.to_string(),
            event_type: 1,
        }
    }
}

/// Create the outbound queue shared by the sink and the client
pub fn outbox() -> (NapcatSink, mpsc::Receiver<Action>) {
    let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
    (NapcatSink { tx }, rx)
}

/// [`SegmentSink`] that queues OneBot actions
#[derive(Debug, Clone)]
pub struct NapcatSink {
    tx: mpsc::Sender<Action>,
}

impl NapcatSink {
    pub async fn send(&self, action: Action) -> arc_chat::Result<()> {
        self.tx
            .send(action)
            .await
            .map_err(|_| arc_chat::Error::Delivery("outbox closed".into()))
    }
}

#[async_trait]
impl SegmentSink for NapcatSink {
    async fn deliver(&self, chat: &ChatId, text: &str) -> arc_chat::Result<()> {
        self.send(Action::send(chat, text)).await
    }

    async fn typing(&self, chat: &ChatId) -> arc_chat::Result<()> {
        match chat {
            ChatId::Private(user_id) => self.send(Action::typing(user_id)).await,
            ChatId::Group(_) => Ok(()),
        }
    }
}

// --- Connection ---

enum SessionEnd {
    /// The server went away; reconnect
    Disconnected,
    /// Every sender is gone; stop
    OutboxClosed,
}

/// Reconnecting websocket connection to NapCat
pub struct NapcatClient {
    ws_url: String,
    token: String,
    reconnect_delay: Duration,
    outbox: mpsc::Receiver<Action>,
}

impl NapcatClient {
    pub fn new(config: &QqBotConfig, outbox: mpsc::Receiver<Action>) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            token: config.token.clone(),
            reconnect_delay: config.reconnect_delay(),
            outbox,
        }
    }

    /// Connect and pump events until every [`NapcatSink`] is dropped,
    /// reconnecting after any disconnect.
    pub async fn run<F>(mut self, mut on_event: F)
    where
        F: FnMut(InboundEvent) + Send,
    {
        loop {
            match self.session(&mut on_event).await {
                Ok(SessionEnd::OutboxClosed) => {
                    info!("Outbox closed, stopping NapCat client");
                    return;
                }
                Ok(SessionEnd::Disconnected) => {
                    warn!(url = %self.ws_url, "NapCat connection closed");
                }
                Err(e) => {
                    warn!(url = %self.ws_url, error = %e, "NapCat connection failed");
                }
            }
            info!(delay = ?self.reconnect_delay, "Reconnecting to NapCat");
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn session<F>(&mut self, on_event: &mut F) -> anyhow::Result<SessionEnd>
    where
        F: FnMut(InboundEvent) + Send,
    {
        let mut request = self.ws_url.as_str().into_client_request()?;
        if !self.token.is_empty() {
            request.headers_mut().insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", self.token))?,
            );
        }

        let (ws_stream, _) = connect_async(request).await?;
        info!(url = %self.ws_url, "Connected to NapCat");
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundEvent>(&text) {
                            Ok(event) => on_event(event),
                            Err(e) => debug!(error = %e, "Ignoring unparsable frame"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
                action = self.outbox.recv() => match action {
                    Some(action) => {
                        let json = serde_json::to_string(&action)?;
                        debug!(frame = %json, "Sending action");
                        write.send(Message::Text(json.into())).await?;
                    }
                    None => {
                        let _ = write.close().await;
                        return Ok(SessionEnd::OutboxClosed);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::{accept_async, accept_hdr_async};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_parse_private_message() {
        let frame = r#"{
            "time": 1700000000, "self_id": 10000, "post_type": "message",
            "message_type": "private", "sub_type": "friend", "message_id": 555,
            "user_id": 42, "raw_message": "hello",
            "message": [{"type": "text", "data": {"text": "hello"}}],
            "sender": {"user_id": 42, "nickname": "Alice"}
        }"#;
        let event: InboundEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(event.post_type, "message");
        assert_eq!(event.message_id.as_deref(), Some("555"));
        assert_eq!(event.sender_id(), Some("42"));
        assert_eq!(event.nickname(), "Alice");
        assert_eq!(event.text(), "hello");
    }

    #[test]
    fn test_text_joins_text_segments_only() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"message": [
                {"type": "at", "data": {"qq": "10000"}},
                {"type": "text", "data": {"text": " hi "}},
                {"type": "image", "data": {"file": "x.png"}},
                {"type": "text", "data": {"text": "there"}}
            ], "raw_message": "[CQ:at,qq=10000] hi [CQ:image] there"}"#,
        )
        .unwrap();
        assert_eq!(event.text(), " hi there");
    }

    #[test]
    fn test_text_falls_back_to_raw_message() {
        let event: InboundEvent =
            serde_json::from_str(r#"{"message": [], "raw_message": "raw"}"#).unwrap();
        assert_eq!(event.text(), "raw");
    }

    #[test]
    fn test_meta_event_parses() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"post_type": "meta_event", "meta_event_type": "heartbeat", "self_id": 1}"#,
        )
        .unwrap();
        assert_eq!(event.post_type, "meta_event");
        assert_eq!(event.sender_id(), None);
    }

    #[test]
    fn test_action_wire_format() {
        let json = serde_json::to_value(Action::send(&ChatId::group("123"), "hi")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "action": "send_group_msg",
                "params": {
                    "group_id": "123",
                    "message": [{"type": "text", "data": {"text": "hi"}}]
                }
            })
        );

        let json = serde_json::to_value(Action::typing("42")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "action": "set_input_status",
                "params": {"user_id": "42", "event_type": 1}
            })
        );
    }

    #[tokio::test]
    async fn test_sink_queues_actions() {
        let (sink, mut rx) = outbox();
        let chat = ChatId::private("42");
        sink.typing(&chat).await.unwrap();
        sink.deliver(&chat, "hi").await.unwrap();
        sink.typing(&ChatId::group("1")).await.unwrap();
        drop(sink);

        assert_eq!(rx.recv().await, Some(Action::typing("42")));
        assert_eq!(rx.recv().await, Some(Action::send(&chat, "hi")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_sink_reports_closed_outbox() {
        let (sink, rx) = outbox();
        drop(rx);
        let result = sink.deliver(&ChatId::private("1"), "hi").await;
        assert!(matches!(result, Err(arc_chat::Error::Delivery(_))));
    }

    #[tokio::test]
    async fn test_client_pumps_frames_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            // First connection: push one event, read one action, then hang up.
            let (socket, _) = listener.accept().await.unwrap();
            let mut auth = String::new();
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                if let Some(value) = req.headers().get(AUTHORIZATION) {
                    auth = value.to_str().unwrap_or_default().to_string();
                }
                Ok(resp)
            };
            let mut ws = accept_hdr_async(socket, callback).await.unwrap();
            seen_tx.send(auth).unwrap();

            let event = r#"{"post_type":"message","message_type":"private","user_id":42,
                "raw_message":"hi","sender":{"user_id":42,"nickname":"Alice"}}"#;
            ws.send(Message::Text(event.to_string().into())).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Text(text) = frame {
                    seen_tx.send(text.as_str().to_string()).unwrap();
                    break;
                }
            }
            let _ = ws.close(None).await;
            drop(ws);

            // Second connection only arrives if the client reconnects.
            let (socket, _) = listener.accept().await.unwrap();
            let _ws = accept_async(socket).await.unwrap();
            seen_tx.send("reconnected".to_string()).unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let config = QqBotConfig {
            ws_url: format!("ws://{addr}"),
            token: "secret".to_string(),
            reconnect_delay_secs: 1,
            ..Default::default()
        };
        let (sink, outbox_rx) = outbox();
        sink.deliver(&ChatId::private("42"), "hello").await.unwrap();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let started = tokio::time::Instant::now();
        let client = tokio::spawn(NapcatClient::new(&config, outbox_rx).run(move |event| {
            let _ = event_tx.send(event);
        }));

        assert_eq!(timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap(), "Bearer secret");

        let event = timeout(WAIT, event_rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.sender_id(), Some("42"));
        assert_eq!(event.text(), "hi");

        let frame = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
        let action: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            action,
            serde_json::json!({
                "action": "send_private_msg",
                "params": {
                    "user_id": "42",
                    "message": [{"type": "text", "data": {"text": "hello"}}]
                }
            })
        );

        let reconnect = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
        assert_eq!(reconnect, "reconnected");
        assert!(started.elapsed() >= config.reconnect_delay());

        client.abort();
        drop(sink);
    }

    #[tokio::test]
    async fn test_client_stops_when_outbox_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let config = QqBotConfig {
            ws_url: format!("ws://{addr}"),
            ..Default::default()
        };
        let (sink, outbox_rx) = outbox();
        drop(sink);

        let run = NapcatClient::new(&config, outbox_rx).run(|_| {});
        assert!(timeout(WAIT, run).await.is_ok());
    }
}
