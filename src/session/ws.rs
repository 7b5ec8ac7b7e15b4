//! WebSocket streaming session.
//!
//! Connects to a real-time speech endpoint over `wss://`, announces the
//! stream with a `start_request` frame and then interleaves binary PCM16
//! chunks (outbound) with JSON event frames (inbound). The connection runs
//! on its own thread with a single-threaded tokio runtime, so the bridge
//! core stays free of async.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::session::{SessionEvent, SessionEventCallback, StreamingSession};
use crate::TransportError;

/// Outbound queue depth. At one kernel per chunk this is multiple seconds
/// of audio; a queue this far behind means the connection is effectively
/// dead and chunks should be shed.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Configuration for a [`WsSession`].
#[derive(Debug, Clone)]
pub struct WsSessionConfig {
    /// Endpoint URLs, tried in order until one connects.
    pub endpoints: Vec<String>,
    /// Sample rate announced in the start request.
    pub sample_rate: u32,
    /// Conversation name.
    pub meeting_title: String,
    /// BCP-47 language code.
    pub language_code: String,
    /// Minimum confidence for generated insights.
    pub confidence_threshold: f64,
    /// Insight categories to enable, e.g. `question`, `action_item`.
    pub insight_types: Vec<String>,
    /// Speaker identifier sent to the endpoint.
    pub speaker_user_id: String,
    /// Speaker display name.
    pub speaker_name: String,
    /// How long to wait for the connection and start request.
    pub connect_timeout: Duration,
}

impl Default for WsSessionConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            sample_rate: 48_000,
            meeting_title: "audio-bridge session".to_string(),
            language_code: "en-US".to_string(),
            confidence_threshold: 0.5,
            insight_types: vec!["question".to_string(), "action_item".to_string()],
            speaker_user_id: "audio-bridge@localhost".to_string(),
            speaker_name: "audio-bridge".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    r#type: &'static str,
    meeting_title: &'a str,
    insight_types: &'a [String],
    config: StartRequestConfig<'a>,
    speaker: Speaker<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequestConfig<'a> {
    confidence_threshold: f64,
    language_code: &'a str,
    speech_recognition: SpeechRecognition,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechRecognition {
    encoding: &'static str,
    sample_rate_hertz: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Speaker<'a> {
    user_id: &'a str,
    name: &'a str,
}

fn start_request_frame(config: &WsSessionConfig) -> Result<String, TransportError> {
    let request = StartRequest {
        r#type: "start_request",
        meeting_title: &config.meeting_title,
        insight_types: &config.insight_types,
        config: StartRequestConfig {
            confidence_threshold: config.confidence_threshold,
            language_code: &config.language_code,
            speech_recognition: SpeechRecognition {
                encoding: "LINEAR16",
                sample_rate_hertz: config.sample_rate,
            },
        },
        speaker: Speaker {
            user_id: &config.speaker_user_id,
            name: &config.speaker_name,
        },
    };
    serde_json::to_string(&request)
        .map_err(|e| TransportError::send_failed(format!("start_request encode: {e}")))
}

struct Inner {
    config: WsSessionConfig,
    open: AtomicBool,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
}

/// WebSocket implementation of [`StreamingSession`].
///
/// `open` tries each configured endpoint in order and keeps the first one
/// that accepts the connection, so a primary endpoint can be backed by
/// fallbacks. Audio is shed (with a send error) rather than queued without
/// bound when the connection stalls.
pub struct WsSession {
    inner: Arc<Inner>,
}

impl WsSession {
    /// Creates a session; connects on [`open`](StreamingSession::open).
    pub fn new(config: WsSessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                open: AtomicBool::new(false),
                outbound: Mutex::new(None),
            }),
        }
    }
}

impl StreamingSession for WsSession {
    fn name(&self) -> &str {
        "websocket"
    }

    fn open(&self, on_event: SessionEventCallback) -> Result<(), TransportError> {
        if self.inner.open.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.inner.config.endpoints.is_empty() {
            return Err(TransportError::ConnectFailed {
                url: "<none>".to_string(),
                reason: "no endpoints configured".to_string(),
            });
        }

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), TransportError>>(1);
        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("ws-session".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(TransportError::ConnectFailed {
                            url: inner.config.endpoints[0].clone(),
                            reason: format!("runtime: {e}"),
                        }));
                        return;
                    }
                };
                runtime.block_on(inner.connection(on_event, ready_tx));
            });
        if let Err(e) = spawned {
            return Err(TransportError::ConnectFailed {
                url: self.inner.config.endpoints[0].clone(),
                reason: format!("thread spawn: {e}"),
            });
        }

        match ready_rx.recv_timeout(self.inner.config.connect_timeout) {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectFailed {
                url: self.inner.config.endpoints[0].clone(),
                reason: "connect timed out".to_string(),
            }),
        }
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn send_audio(&self, pcm: &[u8]) -> Result<(), TransportError> {
        let outbound = self.inner.outbound.lock();
        let sender = outbound.as_ref().ok_or(TransportError::NotConnected)?;
        sender
            .try_send(Message::Binary(pcm.to_vec()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    TransportError::send_failed("outbound queue full")
                }
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
        // Dropping the sender ends the connection task's outbound stream,
        // which sends the close frame and unwinds the thread.
        self.inner.outbound.lock().take();
    }
}

impl Inner {
    /// The connection task: connect with fallback, announce the stream,
    /// then pump frames both ways until either side closes.
    async fn connection(
        self: Arc<Self>,
        on_event: SessionEventCallback,
        ready_tx: crossbeam_channel::Sender<Result<(), TransportError>>,
    ) {
        let mut stream = None;
        let mut last_error = None;
        for url in &self.config.endpoints {
            match connect_async(url.as_str()).await {
                Ok((ws, _response)) => {
                    tracing::info!(url, "websocket connected");
                    stream = Some(ws);
                    break;
                }
                Err(e) => {
                    tracing::warn!(url, error = %e, "endpoint unreachable, trying next");
                    last_error = Some(TransportError::ConnectFailed {
                        url: url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        let Some(ws) = stream else {
            let error = match last_error {
                Some(error) => error,
                None => TransportError::NotConnected,
            };
            let _ = ready_tx.send(Err(error));
            return;
        };

        let (mut sink, mut source) = ws.split();

        let frame = match start_request_frame(&self.config) {
            Ok(frame) => frame,
            Err(error) => {
                let _ = ready_tx.send(Err(error));
                return;
            }
        };
        if let Err(e) = sink.send(Message::Text(frame)).await {
            let _ = ready_tx.send(Err(TransportError::send_failed(format!(
                "start_request: {e}"
            ))));
            return;
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);
        *self.outbound.lock() = Some(outbound_tx);
        self.open.store(true, Ordering::Release);
        let _ = ready_tx.send(Ok(()));
        on_event(SessionEvent::Opened);

        loop {
            tokio::select! {
                inbound = source.next() => match inbound {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                        Ok(payload) => on_event(SessionEvent::Event { payload }),
                        Err(e) => {
                            tracing::warn!(error = %e, "discarding unparseable event frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "remote close".to_string());
                        self.open.store(false, Ordering::Release);
                        on_event(SessionEvent::Closed { reason });
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.open.store(false, Ordering::Release);
                        on_event(SessionEvent::Error {
                            detail: e.to_string(),
                        });
                        break;
                    }
                    None => {
                        self.open.store(false, Ordering::Release);
                        on_event(SessionEvent::Closed {
                            reason: "stream ended".to_string(),
                        });
                        break;
                    }
                },
                chunk = outbound_rx.recv() => match chunk {
                    Some(message) => {
                        if let Err(e) = sink.send(message).await {
                            self.open.store(false, Ordering::Release);
                            on_event(SessionEvent::Error {
                                detail: format!("send: {e}"),
                            });
                            break;
                        }
                    }
                    // close() dropped the sender: shut down cleanly.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }

        self.open.store(false, Ordering::Release);
        self.outbound.lock().take();
        tracing::debug!("websocket connection task finished");
    }
}
