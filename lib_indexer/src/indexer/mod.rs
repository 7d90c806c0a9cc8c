//! # Indexers
//!
//! Consumers of the `message.in` bus stream. Each indexer folds one payload
//! kind into its document store with find-or-init, merge, save semantics:
//! the first sighting of a key creates the document with `created_on` set,
//! every later sighting merges the new payload and bumps `modified_on`.

pub mod documents;
pub mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{BusEvent, EventBus};
use crate::model::{Device, EntityStateChange, MessagePayload, Post};
use crate::service::Service;

use documents::{DeviceDocument, DeviceEntityDocument, PostDocument};
use store::DocumentStore;

/// Folds device registry records into [`DeviceDocument`]s.
pub struct DeviceIndexer {
    store: Arc<dyn DocumentStore<DeviceDocument>>,
}

impl DeviceIndexer {
    pub fn new(store: Arc<dyn DocumentStore<DeviceDocument>>) -> Self {
        Self { store }
    }

    pub async fn index(&self, device: &Device) {
        let now = Utc::now();
        let mut document = match self.store.find_by_key(&device.device_id).await {
            Some(existing) => existing,
            None => DeviceDocument {
                device_id: device.device_id.clone(),
                area_id: None,
                manufacturer: None,
                device_model: None,
                device_name: None,
                entities: Vec::new(),
                created_on: now,
                modified_on: now,
            },
        };
        document.area_id = device.area_id.clone();
        document.manufacturer = device.manufacturer.clone();
        document.device_model = device.device_model.clone();
        document.device_name = device.device_name.clone();
        document.entities = device.entities.clone();
        document.modified_on = now;
        self.store.save(document).await;
    }
}

/// Folds state-change events into per-entity [`DeviceEntityDocument`]s.
pub struct EntityStateChangeIndexer {
    store: Arc<dyn DocumentStore<DeviceEntityDocument>>,
}

impl EntityStateChangeIndexer {
    pub fn new(store: Arc<dyn DocumentStore<DeviceEntityDocument>>) -> Self {
        Self { store }
    }

    pub async fn index(&self, change: &EntityStateChange) {
        let now = Utc::now();
        let new_state = &change.data.new_state;
        let mut document = match self.store.find_by_key(&new_state.entity_id).await {
            Some(existing) => existing,
            None => DeviceEntityDocument {
                entity_id: new_state.entity_id.clone(),
                state: String::new(),
                state_class: None,
                unit_of_measurement: None,
                device_class: None,
                last_changed: now,
                last_updated: now,
                change_count: 0,
                created_on: now,
                modified_on: now,
            },
        };
        document.state = new_state.state.clone();
        if let Some(attributes) = &new_state.attributes {
            document.state_class = attributes.state_class.clone();
            document.unit_of_measurement = attributes.unit_of_measurement.clone();
            document.device_class = attributes.device_class.clone();
        }
        document.last_changed = new_state.last_changed;
        document.last_updated = new_state.last_updated;
        document.change_count += 1;
        document.modified_on = now;
        self.store.save(document).await;
    }
}

/// Folds post records into [`PostDocument`]s.
pub struct PostIndexer {
    store: Arc<dyn DocumentStore<PostDocument>>,
}

impl PostIndexer {
    pub fn new(store: Arc<dyn DocumentStore<PostDocument>>) -> Self {
        Self { store }
    }

    pub async fn index(&self, post: &Post) {
        let now = Utc::now();
        let key = post.id.to_string();
        let mut document = match self.store.find_by_key(&key).await {
            Some(existing) => existing,
            None => PostDocument {
                post_id: key,
                title: String::new(),
                body: None,
                created_on: now,
                modified_on: now,
            },
        };
        document.title = post.title.clone();
        document.body = post.body.clone();
        document.modified_on = now;
        self.store.save(document).await;
    }
}

/// Bridges the bus to the indexers: one background task receives every
/// `message.in` event and dispatches on its payload kind. Raw JSON payloads
/// are not indexed and pass by at debug level.
pub struct MessageIndexerService {
    bus: Arc<EventBus>,
    devices: Arc<DeviceIndexer>,
    entities: Arc<EntityStateChangeIndexer>,
    posts: Arc<PostIndexer>,
    running: AtomicBool,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl MessageIndexerService {
    pub fn new(
        bus: Arc<EventBus>,
        devices: Arc<DeviceIndexer>,
        entities: Arc<EntityStateChangeIndexer>,
        posts: Arc<PostIndexer>,
    ) -> Self {
        Self {
            bus,
            devices,
            entities,
            posts,
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Service for MessageIndexerService {
    fn name(&self) -> &str {
        "message-indexer-service"
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(service = self.name(), "service already running");
            return;
        }
        info!(service = self.name(), "starting indexer loop");

        let token = CancellationToken::new();
        {
            let mut shutdown = self.shutdown.lock().expect("shutdown lock poisoned");
            *shutdown = Some(token.clone());
        }

        let mut receiver = self.bus.subscribe();
        let devices = Arc::clone(&self.devices);
        let entities = Arc::clone(&self.entities);
        let posts = Arc::clone(&self.posts);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv() => {
                        match event {
                            Ok(BusEvent::Message(event)) => {
                                match &event.data.payload {
                                    MessagePayload::Device(device) => {
                                        devices.index(device).await;
                                    }
                                    MessagePayload::EntityStateChange(change) => {
                                        entities.index(change).await;
                                    }
                                    MessagePayload::Post(post) => {
                                        posts.index(post).await;
                                    }
                                    MessagePayload::Json(_) => {
                                        debug!(
                                            source = %event.source,
                                            topic = %event.data.topic,
                                            "no indexer for raw json payload"
                                        );
                                    }
                                }
                            }
                            Ok(BusEvent::System(event)) => {
                                debug!(event_type = %event.event_type, source = %event.source, "system event");
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "indexer lagged behind the bus, events skipped");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!(service = self.name(), "service already stopped");
            return;
        }
        let token = {
            let mut shutdown = self.shutdown.lock().expect("shutdown lock poisoned");
            shutdown.take()
        };
        if let Some(token) = token {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::store::InMemoryStore;
    use crate::model::{EntityState, EntityStateAttributes, EntityStateChangeData};
    use chrono::TimeZone;

    fn state(entity_id: &str, value: &str) -> EntityState {
        EntityState {
            entity_id: entity_id.to_string(),
            state: value.to_string(),
            attributes: Some(EntityStateAttributes {
                state_class: Some("measurement".into()),
                unit_of_measurement: Some("C".into()),
                device_class: Some("temperature".into()),
            }),
            last_changed: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            last_updated: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
    }

    fn change(entity_id: &str, from: &str, to: &str) -> EntityStateChange {
        EntityStateChange {
            event_type: "state_changed".into(),
            origin: "LOCAL".into(),
            time_fired: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            data: EntityStateChangeData {
                old_state: state(entity_id, from),
                new_state: state(entity_id, to),
            },
        }
    }

    #[tokio::test]
    async fn first_sighting_creates_later_sightings_merge() {
        let store: Arc<InMemoryStore<DeviceEntityDocument>> = Arc::new(InMemoryStore::new());
        let indexer = EntityStateChangeIndexer::new(
            Arc::clone(&store) as Arc<dyn DocumentStore<DeviceEntityDocument>>
        );

        indexer.index(&change("sensor.kitchen", "20.1", "20.4")).await;
        let first = store.find_by_key("sensor.kitchen").await.unwrap();
        assert_eq!(first.state, "20.4");
        assert_eq!(first.change_count, 1);

        indexer.index(&change("sensor.kitchen", "20.4", "21.0")).await;
        let second = store.find_by_key("sensor.kitchen").await.unwrap();
        assert_eq!(second.state, "21.0");
        assert_eq!(second.change_count, 2);
        assert_eq!(second.created_on, first.created_on);
        assert!(second.modified_on >= first.modified_on);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn device_indexer_upserts_by_device_id() {
        let store: Arc<InMemoryStore<DeviceDocument>> = Arc::new(InMemoryStore::new());
        let indexer =
            DeviceIndexer::new(Arc::clone(&store) as Arc<dyn DocumentStore<DeviceDocument>>);
        let device = Device {
            device_id: "d1".into(),
            area_id: Some("kitchen".into()),
            manufacturer: Some("Acme".into()),
            device_model: None,
            device_name: Some("lamp".into()),
            entities: vec!["light.lamp".into()],
        };

        indexer.index(&device).await;
        indexer
            .index(&Device {
                device_name: Some("ceiling lamp".into()),
                ..device.clone()
            })
            .await;

        let document = store.find_by_key("d1").await.unwrap();
        assert_eq!(document.device_name.as_deref(), Some("ceiling lamp"));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn indexer_service_dispatches_bus_messages_by_payload_kind() {
        let bus = Arc::new(EventBus::default());
        let devices: Arc<InMemoryStore<DeviceDocument>> = Arc::new(InMemoryStore::new());
        let entities: Arc<InMemoryStore<DeviceEntityDocument>> = Arc::new(InMemoryStore::new());
        let posts: Arc<InMemoryStore<PostDocument>> = Arc::new(InMemoryStore::new());
        let service = MessageIndexerService::new(
            Arc::clone(&bus),
            Arc::new(DeviceIndexer::new(
                Arc::clone(&devices) as Arc<dyn DocumentStore<DeviceDocument>>
            )),
            Arc::new(EntityStateChangeIndexer::new(
                Arc::clone(&entities) as Arc<dyn DocumentStore<DeviceEntityDocument>>
            )),
            Arc::new(PostIndexer::new(
                Arc::clone(&posts) as Arc<dyn DocumentStore<PostDocument>>
            )),
        );
        service.start().await;
        assert!(service.is_running());

        use crate::model::{Message, MessageEvent, MessagePayload};
        bus.publish(MessageEvent::message_in(
            "feed",
            Message::normal(MessagePayload::EntityStateChange(change(
                "sensor.hall",
                "1",
                "2",
            ))),
        ));
        bus.publish(MessageEvent::message_in(
            "posts",
            Message::normal(MessagePayload::Post(Post {
                id: 9,
                title: "hello".into(),
                body: None,
            })),
        ));
        // Raw JSON has no indexer and is skipped.
        bus.publish(MessageEvent::message_in(
            "broker",
            Message::with_topic("sensors/x", MessagePayload::Json(serde_json::json!(1))),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(entities.count().await, 1);
        assert_eq!(posts.count().await, 1);
        assert_eq!(devices.count().await, 0);

        service.stop().await;
        assert!(!service.is_running());
        // Stopping twice is safe.
        service.stop().await;
    }
}
