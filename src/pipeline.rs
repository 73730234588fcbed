//! The capture-to-transcript pipeline.
//!
//! Owns the capture engine and the session reconnect loop, and exposes a
//! single event channel to collaborators. The pipeline keeps running
//! through session failures; only a failed startup (bad device, missing
//! credential) is fatal.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::audio::capture::CaptureEngine;
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, is_session_expired};
use crate::session::backoff::Backoff;
use crate::session::stream::StreamSession;
use crate::types::PipelineEvent;

pub struct Pipeline {
    config: Config,
}

/// Cloneable control handle for a started pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    stop: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
    last_answer: Arc<Mutex<String>>,
}

impl PipelineHandle {
    /// Request shutdown. The reconnect loop notices within one select.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The most recent final transcript, for consumers that attach late.
    /// Collaborators may overwrite it with `set_last_answer`.
    pub fn last_answer(&self) -> String {
        self.last_answer
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Replace the stored answer text. Used by collaborators (hotkey or
    /// clipboard bridges) that consume a final and want to mark it taken
    /// or substitute processed text.
    pub fn set_last_answer(&self, text: &str) {
        match self.last_answer.lock() {
            Ok(mut guard) => *guard = text.to_string(),
            Err(poisoned) => *poisoned.into_inner() = text.to_string(),
        }
    }
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Pipeline { config }
    }

    /// Validate credentials, open the capture device, and spawn the
    /// session loop. Returns the event channel and a control handle.
    pub fn start(self) -> Result<(mpsc::Receiver<PipelineEvent>, PipelineHandle)> {
        // Credential check before touching audio hardware: fail fast with
        // the actionable error.
        let api_key = self.config.realtime.resolve_api_key()?;

        let engine = Arc::new(CaptureEngine::new(self.config.audio.clone()));
        engine.start()?;

        let (events_tx, events_rx) = mpsc::channel(defaults::EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = PipelineHandle {
            stop: Arc::new(stop_tx),
            running: Arc::new(AtomicBool::new(true)),
            last_answer: Arc::new(Mutex::new(String::new())),
        };

        let loop_handle = handle.clone();
        let config = self.config;
        tokio::spawn(async move {
            run_loop(engine, config, api_key, events_tx, stop_rx, loop_handle).await;
        });

        Ok((events_rx, handle))
    }
}

async fn run_loop(
    engine: Arc<CaptureEngine>,
    config: Config,
    api_key: String,
    events: mpsc::Sender<PipelineEvent>,
    mut stop: watch::Receiver<bool>,
    handle: PipelineHandle,
) {
    let _ = events
        .send(PipelineEvent::Info {
            text: "connected".to_string(),
        })
        .await;

    let session = StreamSession::new(
        config.session.clone(),
        config.realtime.url.clone(),
        api_key,
    );
    let mut backoff = Backoff::new(
        Duration::from_secs(defaults::RECONNECT_BACKOFF_BASE_SECS),
        Duration::from_secs(defaults::RECONNECT_BACKOFF_MAX_SECS),
    );

    loop {
        if *stop.borrow() {
            break;
        }

        let result = tokio::select! {
            result = run_session(&session, &engine, &events, &mut backoff, &handle) => result,
            _ = stop.changed() => break,
        };

        match settle_session(result, &events, &mut backoff).await {
            ControlFlow::Break(()) => break,
            ControlFlow::Continue(delay) if delay.is_zero() => {}
            ControlFlow::Continue(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => break,
                }
            }
        }
    }

    engine.stop();
    let _ = events
        .send(PipelineEvent::Info {
            text: "pipeline_stopped".to_string(),
        })
        .await;
    handle.running.store(false, Ordering::SeqCst);
}

/// Emit the notifications for a completed session attempt and decide how
/// the loop proceeds: stop (clean end), retry at once (expired session),
/// or retry after the next backoff delay.
async fn settle_session(
    result: Result<()>,
    events: &mpsc::Sender<PipelineEvent>,
    backoff: &mut Backoff,
) -> ControlFlow<(), Duration> {
    let e = match result {
        Ok(()) => return ControlFlow::Break(()),
        Err(e) => e,
    };

    let message = e.to_string();
    let _ = events
        .send(PipelineEvent::Error {
            text: message.clone(),
        })
        .await;

    if is_session_expired(&message) {
        // Session lifetime limit, not a fault: reconnect at once and
        // leave the backoff schedule where it was.
        let _ = events
            .send(PipelineEvent::Info {
                text: "restarting_session".to_string(),
            })
            .await;
        ControlFlow::Continue(Duration::ZERO)
    } else {
        ControlFlow::Continue(backoff.next_delay())
    }
}

async fn run_session(
    session: &StreamSession,
    engine: &Arc<CaptureEngine>,
    events: &mpsc::Sender<PipelineEvent>,
    backoff: &mut Backoff,
    handle: &PipelineHandle,
) -> Result<()> {
    let ws = session.connect().await?;
    backoff.reset();

    let mut frames = engine.frame_source().into_receiver();

    // The session writes into a local channel that is drained on this same
    // task: when the session ends its sender drops, the drain loop runs
    // dry, and every buffered chunk has reached the output channel before
    // this function returns. Nothing can trail a later notification.
    let (tap_tx, mut tap_rx) = mpsc::channel(defaults::EVENT_CHANNEL_CAPACITY);
    let run = async {
        let result = session.run(ws, &mut frames, &tap_tx).await;
        drop(tap_tx);
        result
    };
    let (result, ()) = tokio::join!(run, forward_events(&mut tap_rx, events, handle));
    result
}

/// Forward session events to the output channel, recording each final on
/// the handle on the way through. Returns once the sending side closes
/// and the channel is drained.
async fn forward_events(
    rx: &mut mpsc::Receiver<PipelineEvent>,
    events: &mpsc::Sender<PipelineEvent>,
    handle: &PipelineHandle,
) {
    while let Some(event) = rx.recv().await {
        if let PipelineEvent::Final { text } = &event {
            handle.set_last_answer(text);
        }
        if events.send(event).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LivescribeError;

    fn test_handle() -> PipelineHandle {
        PipelineHandle {
            stop: Arc::new(watch::channel(false).0),
            running: Arc::new(AtomicBool::new(true)),
            last_answer: Arc::new(Mutex::new(String::new())),
        }
    }

    fn reconnect_backoff() -> Backoff {
        Backoff::new(
            Duration::from_secs(defaults::RECONNECT_BACKOFF_BASE_SECS),
            Duration::from_secs(defaults::RECONNECT_BACKOFF_MAX_SECS),
        )
    }

    #[tokio::test]
    async fn missing_credential_fails_before_audio() {
        // Point the key env somewhere empty via a config with no key; the
        // pipeline must fail without opening a device.
        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            return; // environment already carries a key; skip
        }
        let pipeline = Pipeline::new(Config::default());
        assert!(pipeline.start().is_err());
    }

    #[tokio::test]
    async fn expired_session_restarts_without_delay() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backoff = reconnect_backoff();

        let flow = settle_session(
            Err(LivescribeError::Protocol {
                message: "Your session hit the maximum duration of 30 minutes.".to_string(),
            }),
            &tx,
            &mut backoff,
        )
        .await;

        // Exactly one error, one restart notification, zero added delay.
        assert_eq!(flow, ControlFlow::Continue(Duration::ZERO));
        assert!(matches!(
            rx.try_recv().unwrap(),
            PipelineEvent::Error { text } if text.contains("maximum duration")
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::Info {
                text: "restarting_session".to_string()
            }
        );
        assert!(rx.try_recv().is_err());

        // The backoff schedule was left untouched by the expiry.
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn failures_back_off_exponentially() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backoff = reconnect_backoff();

        let mut delays = Vec::new();
        for _ in 0..3 {
            let flow = settle_session(
                Err(LivescribeError::Connection {
                    message: "connection reset".to_string(),
                }),
                &tx,
                &mut backoff,
            )
            .await;
            match flow {
                ControlFlow::Continue(delay) => delays.push(delay.as_secs()),
                ControlFlow::Break(()) => panic!("failure must not stop the loop"),
            }
        }
        assert_eq!(delays, vec![1, 2, 4]);

        // One error notification per failure, no restart notifications.
        for _ in 0..3 {
            assert!(matches!(
                rx.try_recv().unwrap(),
                PipelineEvent::Error { .. }
            ));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn clean_end_stops_the_loop() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backoff = reconnect_backoff();

        let flow = settle_session(Ok(()), &tx, &mut backoff).await;
        assert_eq!(flow, ControlFlow::Break(()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn forwarding_drains_before_returning() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let handle = test_handle();

        let (tap_tx, mut tap_rx) = mpsc::channel(8);
        tap_tx
            .send(PipelineEvent::Partial {
                text: "par".to_string(),
            })
            .await
            .unwrap();
        tap_tx
            .send(PipelineEvent::Final {
                text: "late chunk".to_string(),
            })
            .await
            .unwrap();
        drop(tap_tx);

        // Runs on this task: by the time it returns, every buffered chunk
        // is on the output channel, so anything sent afterwards (the
        // terminal notification) comes later.
        forward_events(&mut tap_rx, &events_tx, &handle).await;
        events_tx
            .send(PipelineEvent::Info {
                text: "pipeline_stopped".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            events_rx.try_recv().unwrap(),
            PipelineEvent::Partial {
                text: "par".to_string()
            }
        );
        assert_eq!(
            events_rx.try_recv().unwrap(),
            PipelineEvent::Final {
                text: "late chunk".to_string()
            }
        );
        assert_eq!(
            events_rx.try_recv().unwrap(),
            PipelineEvent::Info {
                text: "pipeline_stopped".to_string()
            }
        );
        assert_eq!(handle.last_answer(), "late chunk");
    }

    #[tokio::test]
    async fn last_answer_is_writable_by_collaborators() {
        let handle = test_handle();
        assert_eq!(handle.last_answer(), "");
        handle.set_last_answer("processed text");
        assert_eq!(handle.last_answer(), "processed text");
        handle.set_last_answer("");
        assert_eq!(handle.last_answer(), "");
    }

    #[test]
    #[ignore] // Requires audio hardware and a live OPENAI_API_KEY
    fn started_pipeline_emits_connected_first() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (mut events, handle) = Pipeline::new(Config::default()).start().unwrap();
            let first = events.recv().await.unwrap();
            assert_eq!(
                first,
                PipelineEvent::Info {
                    text: "connected".to_string()
                }
            );
            handle.stop();
        });
    }
}
