//! One WebSocket session against the realtime speech service.
//!
//! A session owns two concurrent duties over a split socket: egress frames
//! audio into append events, ingress turns server events into transcript
//! chunks. Either duty failing ends the session; the pipeline's outer loop
//! decides whether and how fast to start the next one.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::audio::queue::AudioFrame;
use crate::config::SessionConfig;
use crate::error::{LivescribeError, Result, is_session_expired};
use crate::session::protocol::{
    ClientEvent, ResponsePayload, ServerEvent, SessionPayload, parse_server_event,
};
use crate::session::throttle::{Clock, CommitTimer, PartialThrottle, SystemClock};
use crate::types::{PipelineEvent, TranscriptChunk};

/// Per-turn transcript accumulation with throttled partial emission.
pub(crate) struct TurnState<C: Clock = SystemClock> {
    buffer: String,
    throttle: PartialThrottle<C>,
}

impl TurnState<SystemClock> {
    pub(crate) fn new(partial_interval: Duration) -> Self {
        Self::with_clock(partial_interval, SystemClock)
    }
}

impl<C: Clock> TurnState<C> {
    pub(crate) fn with_clock(partial_interval: Duration, clock: C) -> Self {
        TurnState {
            buffer: String::new(),
            throttle: PartialThrottle::with_clock(partial_interval, clock),
        }
    }

    /// Fold a delta into the turn buffer. Returns a partial chunk carrying
    /// the full accumulated text when the throttle allows emission.
    pub(crate) fn on_delta(&mut self, delta: &str) -> Option<TranscriptChunk> {
        if delta.is_empty() {
            return None;
        }
        self.buffer.push_str(delta);
        if self.throttle.should_emit() {
            Some(TranscriptChunk {
                text: self.buffer.clone(),
                is_final: false,
            })
        } else {
            None
        }
    }

    /// Close the turn. Explicit final text from the server wins over the
    /// accumulated buffer; an all-whitespace turn yields nothing. Either
    /// way the state is reset for the next turn.
    pub(crate) fn on_done(&mut self, explicit: Option<String>) -> Option<TranscriptChunk> {
        let text = explicit
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| std::mem::take(&mut self.buffer));
        self.buffer.clear();
        self.throttle.reset();

        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(TranscriptChunk {
                text: trimmed.to_string(),
                is_final: true,
            })
        }
    }
}

/// A single connection to the realtime service.
pub struct StreamSession {
    config: SessionConfig,
    url: String,
    api_key: String,
}

impl StreamSession {
    pub fn new(config: SessionConfig, url: String, api_key: String) -> Self {
        StreamSession {
            config,
            url,
            api_key,
        }
    }

    /// Open the WebSocket with auth headers. Kept separate from `run` so
    /// the reconnect loop can distinguish connect failures from session
    /// failures and reset its backoff once a connection lands.
    pub async fn connect(&self) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let mut request =
            self.url
                .as_str()
                .into_client_request()
                .map_err(|e| LivescribeError::Connection {
                    message: format!("invalid realtime URL: {}", e),
                })?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|e| {
            LivescribeError::Connection {
                message: format!("invalid API key header: {}", e),
            }
        })?;
        let headers = request.headers_mut();
        headers.insert("Authorization", auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws, _response) =
            connect_async(request)
                .await
                .map_err(|e| LivescribeError::Connection {
                    message: format!("websocket connect failed: {}", e),
                })?;
        Ok(ws)
    }

    /// Run the session over an open connection until the audio source is
    /// exhausted (Ok), the consumer goes away (Ok), or the
    /// connection/service fails (Err).
    pub async fn run(
        &self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        frames: &mut mpsc::Receiver<AudioFrame>,
        events: &mpsc::Sender<PipelineEvent>,
    ) -> Result<()> {
        let (sink, stream) = ws.split();

        let in_flight = Arc::new(AtomicBool::new(false));
        let commit = CommitTimer::new(self.config.force_commit_ms);
        let turn = TurnState::new(Duration::from_millis(
            self.config.effective_partial_emit_ms(),
        ));

        let egress = Self::run_egress(sink, frames, &self.config, Arc::clone(&in_flight), commit);
        let ingress = Self::run_ingress(
            stream,
            events,
            self.config.debug,
            Arc::clone(&in_flight),
            turn,
        );

        // Whichever duty finishes first decides the session's fate; the
        // other future is dropped with it.
        tokio::select! {
            result = egress => result,
            result = ingress => result,
        }
    }

    /// Egress duty: session.update first, then one append per frame, with
    /// the forced-commit timer checked after each send.
    async fn run_egress<S, C>(
        mut sink: S,
        frames: &mut mpsc::Receiver<AudioFrame>,
        config: &SessionConfig,
        in_flight: Arc<AtomicBool>,
        mut commit: CommitTimer<C>,
    ) -> Result<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
        C: Clock,
    {
        let update = ClientEvent::SessionUpdate {
            session: SessionPayload::from_config(config),
        };
        send_event(&mut sink, &update).await?;

        while let Some(frame) = frames.recv().await {
            let bytes = frame.to_le_bytes();
            let append = ClientEvent::Append {
                audio: STANDARD.encode(&bytes),
            };
            send_event(&mut sink, &append).await?;
            commit.note_sent(bytes.len());

            if commit.should_commit(in_flight.load(Ordering::SeqCst)) {
                send_event(&mut sink, &ClientEvent::Commit).await?;
                send_event(
                    &mut sink,
                    &ClientEvent::ResponseCreate {
                        response: ResponsePayload {
                            modalities: vec!["text".to_string()],
                        },
                    },
                )
                .await?;
                commit.mark_committed();
            }
        }

        // Audio source closed; treat as a clean end of session.
        Ok(())
    }

    /// Ingress duty: canonicalize server events and feed the output
    /// channel. Expired sessions surface as a protocol error so the outer
    /// loop can restart without backoff.
    async fn run_ingress<S, E, C>(
        mut stream: S,
        events: &mpsc::Sender<PipelineEvent>,
        debug: bool,
        in_flight: Arc<AtomicBool>,
        mut turn: TurnState<C>,
    ) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Message, E>> + Unpin,
        E: Display,
        C: Clock,
    {
        while let Some(message) = stream.next().await {
            let message = message.map_err(|e| LivescribeError::Connection {
                message: format!("websocket receive failed: {}", e),
            })?;

            let raw = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(LivescribeError::Connection {
                        message: "server closed the connection".to_string(),
                    });
                }
                _ => continue,
            };

            let Some(event) = parse_server_event(&raw) else {
                continue;
            };

            match event {
                ServerEvent::ResponseCreated => {
                    in_flight.store(true, Ordering::SeqCst);
                }
                ServerEvent::TextDelta(delta) => {
                    if let Some(chunk) = turn.on_delta(&delta)
                        && events.send(PipelineEvent::from_chunk(chunk)).await.is_err()
                    {
                        // Consumer gone; end the session cleanly.
                        return Ok(());
                    }
                }
                ServerEvent::TurnDone(explicit) => {
                    in_flight.store(false, Ordering::SeqCst);
                    if let Some(chunk) = turn.on_done(explicit)
                        && events.send(PipelineEvent::from_chunk(chunk)).await.is_err()
                    {
                        return Ok(());
                    }
                }
                ServerEvent::ServiceError(message) => {
                    if is_session_expired(&message) {
                        return Err(LivescribeError::Protocol { message });
                    }
                    if events
                        .send(PipelineEvent::Error { text: message })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                }
                ServerEvent::AudioOnly => {}
                ServerEvent::Unknown(event_type) => {
                    if debug {
                        eprintln!("livescribe: unhandled server event: {}", event_type);
                    }
                }
            }
        }

        Err(LivescribeError::Connection {
            message: "websocket stream ended".to_string(),
        })
    }
}

async fn send_event<S>(sink: &mut S, event: &ClientEvent) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    sink.send(Message::Text(event.to_json()))
        .await
        .map_err(|e| LivescribeError::Connection {
            message: format!("websocket send failed: {}", e),
        })
}
