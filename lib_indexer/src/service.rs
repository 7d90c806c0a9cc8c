//! # Services
//!
//! The lifecycle contract implemented by every long-running component, and
//! the ingestion service that bridges the configured ingesters onto the
//! event bus.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use crate::core::{EventBus, Subscription};
use crate::ingesters::MessageIngester;
use crate::model::{MessageEvent, SystemEvent};

/// Start/stop contract shared by the supervisor's managed components.
///
/// `start` and `stop` are idempotent: a second `start` while running and a
/// `stop` while stopped are safe no-ops. `is_running` reflects the state
/// transitions of the most recent call.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn is_running(&self) -> bool;

    async fn start(&self);

    async fn stop(&self);
}

struct RegisteredIngester {
    ingester: Arc<dyn MessageIngester>,
    inject_filter: Option<Regex>,
}

/// Runs the configured ingesters and republishes everything they accept
/// onto the bus as `message.in` events.
///
/// Each source may carry an inject filter: a regex over the message topic
/// that gates which messages reach the bus. Messages failing the filter are
/// consumed and discarded.
pub struct MessageIngesterService {
    ingesters: Mutex<BTreeMap<String, RegisteredIngester>>,
    bus: Arc<EventBus>,
    running: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl MessageIngesterService {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            ingesters: Mutex::new(BTreeMap::new()),
            bus,
            running: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Adds a source to the roster. Must be called before `start`.
    pub fn register(
        &self,
        source: &str,
        ingester: Arc<dyn MessageIngester>,
        inject_filter: Option<Regex>,
    ) {
        let mut ingesters = self.ingesters.lock().expect("roster lock poisoned");
        ingesters.insert(
            source.to_string(),
            RegisteredIngester {
                ingester,
                inject_filter,
            },
        );
    }

    pub fn source_count(&self) -> usize {
        self.ingesters.lock().expect("roster lock poisoned").len()
    }
}

#[async_trait]
impl Service for MessageIngesterService {
    fn name(&self) -> &str {
        "message-ingester-service"
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(service = self.name(), "service already running");
            return;
        }
        self.bus
            .publish(SystemEvent::new("service.start", self.name()));

        let roster: Vec<(String, Arc<dyn MessageIngester>, Option<Regex>)> = {
            let ingesters = self.ingesters.lock().expect("roster lock poisoned");
            ingesters
                .iter()
                .map(|(source, registered)| {
                    (
                        source.clone(),
                        Arc::clone(&registered.ingester),
                        registered.inject_filter.clone(),
                    )
                })
                .collect()
        };

        for (source, ingester, inject_filter) in roster {
            info!(service = self.name(), source = %source, "starting ingester");
            ingester.start().await;

            let bus = Arc::clone(&self.bus);
            let event_source = source.clone();
            let subscription = ingester.subscribe(
                Box::new(move |message| match &inject_filter {
                    Some(filter) => filter.is_match(&message.topic),
                    None => true,
                }),
                Box::new(move |message| {
                    bus.publish(MessageEvent::message_in(event_source.clone(), message));
                }),
            );
            self.subscriptions
                .lock()
                .expect("subscriptions lock poisoned")
                .push(subscription);
        }
    }

    async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!(service = self.name(), "service already stopped");
            return;
        }

        let roster: Vec<Arc<dyn MessageIngester>> = {
            let ingesters = self.ingesters.lock().expect("roster lock poisoned");
            ingesters
                .values()
                .map(|registered| Arc::clone(&registered.ingester))
                .collect()
        };
        for ingester in roster {
            info!(service = self.name(), source = ingester.name(), "stopping ingester");
            ingester.stop().await;
        }

        let subscriptions: Vec<Subscription> = {
            let mut held = self
                .subscriptions
                .lock()
                .expect("subscriptions lock poisoned");
            held.drain(..).collect()
        };
        for subscription in subscriptions {
            subscription.dispose();
        }

        self.bus
            .publish(SystemEvent::new("service.stop", self.name()));
    }
}
