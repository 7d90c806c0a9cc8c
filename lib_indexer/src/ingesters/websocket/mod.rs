//! # WebSocket Message Ingester
//!
//! Maintains one authenticated WebSocket connection: sends the auth frame,
//! registers and sends the setup requests (ping, event subscription), then
//! pumps every inbound text frame through the correlator and the processor
//! router. Malformed or unknown frames are logged and dropped; the
//! connection stays up.

pub mod correlator;
pub mod message;
pub mod processor;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::configs::WebSocketServerConfig;
use crate::core::{MessageSink, Subscription, DEFAULT_SINK_CAPACITY};
use crate::ingesters::{MessageFilter, MessageHandler, MessageIngester};
use crate::model::Message;

use correlator::{MessageCorrelator, OutboundRequest};
use message::{parse_frame, OutboundFrame, OutboundMessage};
use processor::{
    AuthMessageProcessor, EventMessageProcessor, InboundMessageProcessor, ProcessorRouter,
};

pub struct WebSocketMessageIngester {
    name: String,
    config: WebSocketServerConfig,
    correlator: Arc<MessageCorrelator>,
    router: Arc<ProcessorRouter>,
    authenticated: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    message_id: Arc<AtomicU64>,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl WebSocketMessageIngester {
    pub fn new(name: &str, config: WebSocketServerConfig) -> Self {
        let authenticated = Arc::new(AtomicBool::new(false));
        let router = ProcessorRouter::new(MessageSink::new(DEFAULT_SINK_CAPACITY))
            .register("event", Arc::new(EventMessageProcessor))
            .register(
                "auth_required",
                Arc::new(AuthMessageProcessor::new(Arc::clone(&authenticated))),
            )
            .register(
                "auth_ok",
                Arc::new(AuthMessageProcessor::new(Arc::clone(&authenticated))),
            )
            .register(
                "auth_invalid",
                Arc::new(AuthMessageProcessor::new(Arc::clone(&authenticated))),
            )
            .register_catch_all(Arc::new(InboundMessageProcessor));
        Self {
            name: name.to_string(),
            config,
            correlator: Arc::new(MessageCorrelator::default()),
            router: Arc::new(router),
            authenticated,
            running: Arc::new(AtomicBool::new(false)),
            message_id: Arc::new(AtomicU64::new(0)),
            shutdown: Mutex::new(None),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> u64 {
        self.message_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Unwinds a failed or cancelled `start` back to the stopped state.
    fn abort_start(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut shutdown = self.shutdown.lock().expect("shutdown lock poisoned");
        shutdown.take();
    }
}

#[async_trait]
impl MessageIngester for WebSocketMessageIngester {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(source = %self.name, "ingester already running");
            return;
        }

        // Installed before the first await so a stop() landing mid-connect
        // always finds a token to cancel.
        let token = CancellationToken::new();
        {
            let mut shutdown = self.shutdown.lock().expect("shutdown lock poisoned");
            *shutdown = Some(token.clone());
        }

        let url = match url::Url::parse(&self.config.url) {
            Ok(url) => url,
            Err(e) => {
                error!(source = %self.name, url = %self.config.url, error = %e, "invalid websocket url");
                self.abort_start();
                return;
            }
        };

        info!(source = %self.name, url = %url, "connecting to websocket feed");
        let ws_stream = match connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!(source = %self.name, error = %e, "websocket connect failed");
                self.abort_start();
                return;
            }
        };
        if token.is_cancelled() {
            info!(source = %self.name, "stopped while connecting, discarding connection");
            self.abort_start();
            return;
        }
        let (mut write, mut read) = ws_stream.split();

        // The auth frame is the only request sent without a correlation id.
        let auth = OutboundMessage::Auth {
            access_token: self.config.access_token.clone(),
        };
        if let Err(e) = send_text(&mut write, &auth).await {
            error!(source = %self.name, error = %e, "failed to send auth frame");
            self.abort_start();
            return;
        }

        // Setup requests, each registered before its frame hits the wire so
        // a fast response cannot arrive before its pending entry exists.
        let setup = [
            OutboundMessage::Ping {},
            OutboundMessage::SubscribeEvents {
                event_type: self.config.event_type.clone(),
            },
        ];
        for outbound in setup {
            let frame = OutboundFrame {
                id: self.next_id(),
                message: outbound,
            };
            self.correlator.register_outbound(OutboundRequest {
                id: frame.id,
                type_tag: frame.message.type_tag().to_string(),
            });
            if let Err(e) = send_frame(&mut write, &frame).await {
                error!(source = %self.name, error = %e, "failed to send setup frame");
                self.abort_start();
                return;
            }
        }

        let source = self.name.clone();
        let correlator = Arc::clone(&self.correlator);
        let router = Arc::clone(&self.router);
        let running = Arc::clone(&self.running);
        let authenticated = Arc::clone(&self.authenticated);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(source = %source, "websocket ingester stopping");
                        let _ = write.send(tungstenite::Message::Close(None)).await;
                        break;
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(tungstenite::Message::Text(text))) => {
                                match parse_frame(text.as_str())
                                    .and_then(|parsed| correlator.correlate(parsed))
                                {
                                    Ok(correlation) => router.process(&correlation),
                                    Err(e) => {
                                        warn!(source = %source, error = %e, "dropping inbound frame");
                                    }
                                }
                            }
                            Some(Ok(tungstenite::Message::Ping(_)))
                            | Some(Ok(tungstenite::Message::Pong(_))) => {}
                            Some(Ok(tungstenite::Message::Close(_))) | None => {
                                warn!(source = %source, "websocket stream closed by remote host");
                                break;
                            }
                            Some(Err(e)) => {
                                error!(source = %source, error = %e, "websocket read error");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            authenticated.store(false, Ordering::SeqCst);
        });
    }

    async fn stop(&self) {
        let token = {
            let mut shutdown = self.shutdown.lock().expect("shutdown lock poisoned");
            shutdown.take()
        };
        match token {
            Some(token) => token.cancel(),
            None => debug!(source = %self.name, "stop requested while not running"),
        }
    }

    fn stream(&self) -> mpsc::Receiver<Message> {
        self.router.stream()
    }

    fn subscribe(&self, filter: MessageFilter, handler: MessageHandler) -> Subscription {
        self.router.subscribe(filter, handler)
    }
}

async fn send_text<S>(write: &mut S, outbound: &OutboundMessage) -> anyhow::Result<()>
where
    S: SinkExt<tungstenite::Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let raw = serde_json::to_string(outbound)?;
    write.send(tungstenite::Message::Text(raw.into())).await?;
    Ok(())
}

async fn send_frame<S>(write: &mut S, frame: &OutboundFrame) -> anyhow::Result<()>
where
    S: SinkExt<tungstenite::Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let raw = serde_json::to_string(frame)?;
    write.send(tungstenite::Message::Text(raw.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> WebSocketServerConfig {
        WebSocketServerConfig {
            url: "ws://127.0.0.1:9/api/websocket".to_string(),
            access_token: "token".to_string(),
            event_type: "state_changed".to_string(),
            inject_filter: None,
        }
    }

    #[tokio::test]
    async fn failed_connect_leaves_the_ingester_stopped() {
        let ingester = WebSocketMessageIngester::new("home", unreachable_config());
        ingester.start().await;
        assert!(!ingester.is_running());
        assert!(!ingester.is_authenticated());
    }

    #[tokio::test]
    async fn stop_before_start_is_a_safe_no_op() {
        let ingester = WebSocketMessageIngester::new("home", unreachable_config());
        ingester.stop().await;
        assert!(!ingester.is_running());
    }

    #[tokio::test]
    async fn stop_during_a_stalled_connect_is_not_lost() {
        use std::time::Duration;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Server that delays the handshake so stop() lands while start() is
        // still awaiting connect, then keeps the connection open.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(400)).await;
            if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                while let Some(Ok(_)) = ws.next().await {}
            }
        });

        let ingester = Arc::new(WebSocketMessageIngester::new(
            "home",
            WebSocketServerConfig {
                url: format!("ws://{addr}/api/websocket"),
                access_token: "token".to_string(),
                event_type: "state_changed".to_string(),
                inject_filter: None,
            },
        ));
        let starter = Arc::clone(&ingester);
        let start_task = tokio::spawn(async move { starter.start().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        ingester.stop().await;
        start_task.await.unwrap();

        // The stop must win even though it raced the connect.
        for _ in 0..50 {
            if !ingester.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!ingester.is_running());
    }

    #[tokio::test]
    async fn stream_is_available_while_stopped() {
        let ingester = WebSocketMessageIngester::new("home", unreachable_config());
        let mut stream = ingester.stream();
        assert!(stream.try_recv().is_err());
    }
}
