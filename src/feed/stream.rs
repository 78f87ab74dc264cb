//! Push-connection manager.
//!
//! Owns the only connection to the event endpoint. Decoded events are
//! forwarded, in arrival order, into a bounded channel; the sender waits
//! rather than dropping when the consumer is slow. Observers read a
//! [`ConnectionStatus`] snapshot from a watch channel.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_tungstenite::tungstenite::Message;

use crate::errors::StreamError;
use crate::logging::{agg_increment, log_connection, log_decode_failure};

use super::decode::decode;
use super::events::StreamEvent;
use super::link::{Link, LinkState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
    /// Ping, pong, binary: not part of the event contract.
    Other,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, StreamError>> + Send>>;

/// Opens one transport session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FrameStream, StreamError>;
}

/// Websocket transport.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, StreamError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        Ok(Box::pin(ws.map(|msg| match msg {
            Ok(Message::Text(text)) => Ok(Frame::Text(text)),
            Ok(Message::Close(_)) => Ok(Frame::Close),
            Ok(_) => Ok(Frame::Other),
            Err(e) => Err(StreamError::Transport(e.to_string())),
        })))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    pub state: LinkState,
    pub connected: bool,
    /// Single slot, overwritten by every decoded event.
    pub last_event: Option<StreamEvent>,
    pub last_error: Option<String>,
    pub attempts: u64,
    pub connects: u64,
    pub frames: u64,
    pub decode_failures: u64,
}

enum SessionEnd {
    Closed(Option<StreamError>),
    Shutdown,
}

pub struct ConnectionManager {
    url: String,
    link: Link,
    connector: Arc<dyn Connector>,
    sink: mpsc::Sender<StreamEvent>,
    status: watch::Sender<ConnectionStatus>,
    shutdown: watch::Receiver<bool>,
}

pub struct ConnectionHandle {
    status: watch::Receiver<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Close the connection and cancel any pending reconnect. Returns once
    /// the manager task has stopped.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl ConnectionManager {
    pub fn spawn(
        url: String,
        reconnect_delay: Duration,
        connector: Arc<dyn Connector>,
        sink: mpsc::Sender<StreamEvent>,
    ) -> ConnectionHandle {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = ConnectionManager {
            url,
            link: Link::new(reconnect_delay),
            connector,
            sink,
            status: status_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(manager.run());
        ConnectionHandle {
            status: status_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(mut self) {
        loop {
            if self.link.begin_connect().is_err() {
                break;
            }
            self.publish();
            log_connection("connecting", &self.url, None);

            let attempt = tokio::select! {
                biased;
                _ = wait_shutdown(&mut self.shutdown) => break,
                res = self.connector.connect(&self.url) => res,
            };

            match attempt {
                Ok(frames) => {
                    let _ = self.link.on_open();
                    self.publish();
                    log_connection("connected", &self.url, None);

                    match self.read_frames(frames).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Closed(err) => {
                            let err = err.map(|e| e.to_string());
                            let _ = self.link.on_close(err.clone(), Instant::now());
                            log_connection("disconnected", &self.url, err.as_deref());
                        }
                    }
                }
                Err(err) => {
                    let err = err.to_string();
                    log_connection("connect_failed", &self.url, Some(&err));
                    let _ = self.link.on_connect_failed(err, Instant::now());
                }
            }
            self.publish();

            let Some(at) = self.link.reconnect_at() else {
                break;
            };
            tokio::select! {
                biased;
                _ = wait_shutdown(&mut self.shutdown) => break,
                _ = sleep_until(at) => {}
            }
            self.link.take_due_reconnect(Instant::now());
        }

        self.link.teardown();
        self.publish();
        log_connection("closed", &self.url, None);
    }

    async fn read_frames(&mut self, mut frames: FrameStream) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = wait_shutdown(&mut self.shutdown) => return SessionEnd::Shutdown,
                f = frames.next() => f,
            };
            match next {
                Some(Ok(Frame::Text(text))) => {
                    self.status.send_modify(|s| s.frames += 1);
                    match decode(&text) {
                        Ok(event) => {
                            agg_increment(event.kind());
                            self.status.send_modify(|s| s.last_event = Some(event.clone()));
                            // A full channel waits; shutdown still wins.
                            let sent = tokio::select! {
                                biased;
                                _ = wait_shutdown(&mut self.shutdown) => return SessionEnd::Shutdown,
                                res = self.sink.send(event) => res,
                            };
                            if sent.is_err() {
                                // Nobody left to apply events.
                                return SessionEnd::Shutdown;
                            }
                        }
                        Err(err) => {
                            agg_increment("decode_failure");
                            self.status.send_modify(|s| s.decode_failures += 1);
                            log_decode_failure(&err.to_string(), &text);
                        }
                    }
                }
                Some(Ok(Frame::Other)) => {}
                Some(Ok(Frame::Close)) => return SessionEnd::Closed(Some(StreamError::ClosedByPeer)),
                None => return SessionEnd::Closed(None),
                Some(Err(err)) => return SessionEnd::Closed(Some(err)),
            }
        }
    }

    fn publish(&self) {
        let link = &self.link;
        self.status.send_modify(|s| {
            s.state = link.state();
            s.connected = link.is_connected();
            s.last_error = link.last_error().map(str::to_string);
            s.attempts = link.attempts();
            s.connects = link.connects();
        });
    }
}

/// Resolves once shutdown is requested or the handle is gone.
async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Each connect pops one scripted session; an exhausted script fails.
    struct Scripted {
        sessions: Mutex<VecDeque<Vec<Result<Frame, StreamError>>>>,
    }

    #[async_trait]
    impl Connector for Scripted {
        async fn connect(&self, _url: &str) -> Result<FrameStream, StreamError> {
            let next = self.sessions.lock().unwrap().pop_front();
            match next {
                Some(frames) => Ok(Box::pin(stream::iter(frames).chain(stream::pending()))),
                None => Err(StreamError::Connect("refused".to_string())),
            }
        }
    }

    fn text(s: &str) -> Result<Frame, StreamError> {
        Ok(Frame::Text(s.to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_frames_do_not_close_connection() {
        let connector = Arc::new(Scripted {
            sessions: Mutex::new(VecDeque::from(vec![vec![
                text("garbage"),
                text(r#"{"unknown":true}"#),
                Ok(Frame::Other),
                text(r#"{"action":"delete","id":"TXN-9"}"#),
            ]])),
        });
        let (tx, mut rx) = mpsc::channel(8);
        let handle = ConnectionManager::spawn(
            "ws://test/fraud/stream".to_string(),
            Duration::from_secs(3),
            connector,
            tx,
        );

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev, StreamEvent::Deleted("TXN-9".to_string()));

        let status = handle.status();
        assert!(status.connected);
        assert_eq!(status.frames, 3);
        assert_eq!(status.decode_failures, 2);
        assert_eq!(status.connects, 1);
        assert_eq!(status.last_event, Some(StreamEvent::Deleted("TXN-9".to_string())));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_is_recorded() {
        let connector = Arc::new(Scripted {
            sessions: Mutex::new(VecDeque::from(vec![vec![Ok(Frame::Close)]])),
        });
        let (tx, _rx) = mpsc::channel(8);
        let handle = ConnectionManager::spawn(
            "ws://test/fraud/stream".to_string(),
            Duration::from_secs(3),
            connector,
            tx,
        );
        let mut status = handle.subscribe();
        status
            .wait_for(|s| s.connects == 1 && s.state == LinkState::Disconnected)
            .await
            .unwrap();
        assert_eq!(status.borrow().last_error.as_deref(), Some("closed by peer"));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_with_full_channel_returns() {
        let frames = (0..5)
            .map(|i| text(&format!(r#"{{"action":"delete","id":"TXN-{}"}}"#, i)))
            .collect();
        let connector = Arc::new(Scripted {
            sessions: Mutex::new(VecDeque::from(vec![frames])),
        });
        // Capacity 1 and nobody reading: the second send blocks.
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionManager::spawn(
            "ws://test/fraud/stream".to_string(),
            Duration::from_secs(3),
            connector,
            tx,
        );
        let mut status = handle.subscribe();
        status.wait_for(|s| s.frames >= 2).await.unwrap();

        let done = tokio::time::timeout(Duration::from_secs(1), handle.shutdown()).await;
        assert!(done.is_ok(), "shutdown hung on a full event channel");
        assert_eq!(status.borrow().state, LinkState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_waiting_cancels_reconnect() {
        let connector = Arc::new(Scripted {
            sessions: Mutex::new(VecDeque::new()),
        });
        let (tx, _rx) = mpsc::channel(8);
        let handle = ConnectionManager::spawn(
            "ws://test/fraud/stream".to_string(),
            Duration::from_secs(3),
            connector,
            tx,
        );
        let mut status = handle.subscribe();
        status
            .wait_for(|s| s.state == LinkState::Disconnected && s.attempts == 1)
            .await
            .unwrap();
        assert_eq!(status.borrow().last_error.as_deref(), Some("connect failed: refused"));

        let watcher = handle.subscribe();
        handle.shutdown().await;
        let final_status = watcher.borrow().clone();
        assert_eq!(final_status.state, LinkState::Closed);
        assert_eq!(final_status.attempts, 1);
    }
}
