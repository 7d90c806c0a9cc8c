//! # MQTT Message Ingester
//!
//! Subscribes to a set of broker topics and emits one normalized message
//! per received publish, keeping the broker topic as the message topic.
//! Non-JSON payloads are dropped with a warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::configs::MqttBrokerConfig;
use crate::core::{MessageSink, Subscription, DEFAULT_SINK_CAPACITY};
use crate::ingesters::{MessageFilter, MessageHandler, MessageIngester};
use crate::model::{Message, MessagePayload};

const EVENT_LOOP_CAPACITY: usize = 50;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct MqttMessageIngester {
    name: String,
    config: MqttBrokerConfig,
    sink: MessageSink,
    running: Arc<AtomicBool>,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl MqttMessageIngester {
    pub fn new(name: &str, config: MqttBrokerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            sink: MessageSink::new(DEFAULT_SINK_CAPACITY),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
        }
    }

    /// Unwinds a failed or cancelled `start` back to the stopped state.
    fn abort_start(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut shutdown = self.shutdown.lock().expect("shutdown lock poisoned");
        shutdown.take();
    }
}

#[async_trait]
impl MessageIngester for MqttMessageIngester {
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

        // Installed before the first await so a stop() landing mid-setup
        // always finds a token to cancel.
        let token = CancellationToken::new();
        {
            let mut shutdown = self.shutdown.lock().expect("shutdown lock poisoned");
            *shutdown = Some(token.clone());
        }

        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("indexer-{}", self.name));
        let mut opts = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        opts.set_keep_alive(KEEP_ALIVE);
        if let (Some(u), Some(p)) = (self.config.username.clone(), self.config.password.clone()) {
            opts.set_credentials(u, p);
        }

        info!(
            source = %self.name,
            host = %self.config.host,
            port = self.config.port,
            "connecting to mqtt broker"
        );
        let (client, mut eventloop) = AsyncClient::new(opts, EVENT_LOOP_CAPACITY);
        for topic in &self.config.topics {
            if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                error!(source = %self.name, topic = %topic, error = %e, "mqtt subscribe failed");
                self.abort_start();
                return;
            }
        }
        if token.is_cancelled() {
            info!(source = %self.name, "stopped while connecting, discarding client");
            let _ = client.disconnect().await;
            self.abort_start();
            return;
        }

        let source = self.name.clone();
        let sink = self.sink.clone();
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(source = %source, "mqtt ingester stopping");
                        let _ = client.disconnect().await;
                        break;
                    }
                    event = eventloop.poll() => {
                        match event {
                            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                match serde_json::from_slice(&publish.payload) {
                                    Ok(value) => sink.emit(Message::with_topic(
                                        publish.topic,
                                        MessagePayload::Json(value),
                                    )),
                                    Err(e) => {
                                        warn!(
                                            source = %source,
                                            topic = %publish.topic,
                                            error = %e,
                                            "dropping non-json mqtt payload"
                                        );
                                    }
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(source = %source, error = %e, "mqtt poll error, retrying");
                                tokio::time::sleep(POLL_RETRY_DELAY).await;
                            }
                        }
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
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
        self.sink.stream()
    }

    fn subscribe(&self, filter: MessageFilter, handler: MessageHandler) -> Subscription {
        self.sink.subscribe(filter, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MqttBrokerConfig {
        MqttBrokerConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            client_id: None,
            username: None,
            password: None,
            topics: vec!["sensors/#".to_string()],
            inject_filter: None,
        }
    }

    #[tokio::test]
    async fn start_marks_running_and_stop_tears_down() {
        let ingester = MqttMessageIngester::new("broker", config());
        assert!(!ingester.is_running());

        // The event loop reconnects in the background, so start succeeds
        // even with an unreachable broker.
        ingester.start().await;
        assert!(ingester.is_running());

        ingester.stop().await;
        tokio::task::yield_now().await;
        // A second stop is a safe no-op.
        ingester.stop().await;
    }

    #[tokio::test]
    async fn double_start_does_not_spawn_a_second_loop() {
        let ingester = MqttMessageIngester::new("broker", config());
        ingester.start().await;
        ingester.start().await;
        assert!(ingester.is_running());
        ingester.stop().await;
    }
}
