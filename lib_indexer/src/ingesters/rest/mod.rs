//! # REST Message Ingester
//!
//! Polls a REST endpoint at a fixed rate and emits one normalized message
//! per record of the response. Transient HTTP failures are retried with
//! exponential backoff inside a single poll; a poll that still fails is
//! logged and the schedule keeps ticking.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::configs::{PayloadKind, RestMethod, RestServerConfig};
use crate::core::{MessageSink, Subscription, TaskScheduler, DEFAULT_SINK_CAPACITY};
use crate::ingesters::{MessageFilter, MessageHandler, MessageIngester};
use crate::model::{Device, EntityStateChange, Message, MessagePayload, Post};

const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Issues one configured REST call and emits its records.
pub struct RestCallHandler {
    name: String,
    config: RestServerConfig,
    client: ClientWithMiddleware,
    sink: MessageSink,
}

impl RestCallHandler {
    pub fn new(name: &str, config: RestServerConfig, sink: MessageSink) -> Self {
        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(MAX_TRANSIENT_RETRIES);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Self {
            name: name.to_string(),
            config,
            client,
            sink,
        }
    }

    /// Executes one poll: request, decode, emit. Record-level decode
    /// failures skip the record; the rest of the batch still goes out.
    pub async fn poll(&self) -> anyhow::Result<()> {
        let mut request = match self.config.method {
            RestMethod::Get => self.client.get(&self.config.url),
            RestMethod::Post => self.client.post(&self.config.url),
        };
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &self.config.request_body {
            request = request.json(body);
        }

        let response = request.send().await?.error_for_status()?;
        let body: serde_json::Value = response.json().await?;

        let mut emitted = 0usize;
        for record in records_of(body) {
            match decode_record(self.config.response_kind, record) {
                Ok(payload) => {
                    self.sink.emit(Message::normal(payload));
                    emitted += 1;
                }
                Err(e) => {
                    warn!(source = %self.name, error = %e, "skipping undecodable record");
                }
            }
        }
        debug!(source = %self.name, emitted, "poll completed");
        Ok(())
    }
}

/// A response is either an array of records or a single record.
fn records_of(body: serde_json::Value) -> Vec<serde_json::Value> {
    match body {
        serde_json::Value::Array(records) => records,
        other => vec![other],
    }
}

fn decode_record(
    kind: PayloadKind,
    record: serde_json::Value,
) -> Result<MessagePayload, serde_json::Error> {
    match kind {
        PayloadKind::Device => serde_json::from_value::<Device>(record).map(MessagePayload::Device),
        PayloadKind::Post => serde_json::from_value::<Post>(record).map(MessagePayload::Post),
        PayloadKind::EntityStateChange => serde_json::from_value::<EntityStateChange>(record)
            .map(MessagePayload::EntityStateChange),
        PayloadKind::Json => Ok(MessagePayload::Json(record)),
    }
}

/// Fixed-rate polling ingester; its scheduler id is the source name.
pub struct RestMessageIngester {
    name: String,
    handler: Arc<RestCallHandler>,
    scheduler: Arc<TaskScheduler>,
    period: std::time::Duration,
    sink: MessageSink,
}

impl RestMessageIngester {
    pub fn new(name: &str, config: RestServerConfig, scheduler: Arc<TaskScheduler>) -> Self {
        let sink = MessageSink::new(DEFAULT_SINK_CAPACITY);
        let period = config.poll_period();
        Self {
            name: name.to_string(),
            handler: Arc::new(RestCallHandler::new(name, config, sink.clone())),
            scheduler,
            period,
            sink,
        }
    }
}

#[async_trait]
impl MessageIngester for RestMessageIngester {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.scheduler.is_scheduled(&self.name)
    }

    async fn start(&self) {
        if self.is_running() {
            debug!(source = %self.name, "poller already scheduled");
            return;
        }
        info!(source = %self.name, period = ?self.period, "scheduling rest poller");
        let handler = Arc::clone(&self.handler);
        self.scheduler.schedule_fixed_rate(
            &self.name,
            move || {
                let handler = Arc::clone(&handler);
                async move { handler.poll().await }
            },
            self.period,
        );
    }

    async fn stop(&self) {
        self.scheduler.cancel(&self.name);
    }

    fn stream(&self) -> mpsc::Receiver<Message> {
        self.sink.stream()
    }

    fn subscribe(&self, filter: MessageFilter, handler: MessageHandler) -> Subscription {
        self.sink.subscribe(filter, handler)
    }
}
