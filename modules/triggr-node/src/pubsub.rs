//! Pub/sub bus: a topic-indexed subscriber registry. A subscriber is the
//! outbound queue of one websocket connection: bounded, drop-oldest on
//! overflow, with a `degraded` flag that clears on the next delivered
//! frame. Publishing collects matching queues under a read lock and
//! enqueues outside it.
//!
//! Topic keys are project-scoped internally (`<project>/collection:c:change`)
//! so equal collection names in different projects never cross-deliver; the
//! wire topic the client sees stays unscoped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{Notify, RwLock};

use triggr_common::ProjectId;
use triggr_store::{ChangeOp, ChangeRecord};

/// Outbound frame shape, serialized once per topic per change.
#[derive(Debug, Clone, Serialize)]
pub struct WsPayload<'a> {
    pub op: &'a str,
    pub topic: &'a str,
    pub doc: serde_json::Value,
}

fn op_str(op: ChangeOp) -> &'static str {
    match op {
        ChangeOp::Insert => "insert",
        ChangeOp::Update => "update",
        ChangeOp::Delete => "delete",
    }
}

/// Wire topics a change record maps to.
pub fn topics_of(change: &ChangeRecord) -> [String; 2] {
    [
        format!("collection:{}:change", change.collection),
        format!("document:{}:{}:change", change.collection, change.doc_id),
    ]
}

/// A topic string is valid iff it has one of the two supported shapes.
pub fn valid_topic(topic: &str) -> bool {
    let parts: Vec<&str> = topic.split(':').collect();
    match parts.as_slice() {
        ["collection", collection, "change"] => !collection.is_empty(),
        ["document", collection, id, "change"] => !collection.is_empty() && !id.is_empty(),
        _ => false,
    }
}

struct SubQueue {
    frames: VecDeque<String>,
    degraded: bool,
}

/// One websocket connection's outbound queue.
pub struct Subscriber {
    id: u64,
    project: ProjectId,
    capacity: usize,
    queue: Mutex<SubQueue>,
    notify: Notify,
    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,
}

impl Subscriber {
    /// Pop the next frame, waiting until one arrives or the subscriber is
    /// closed. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<String> {
        loop {
            {
                let mut q = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(frame) = q.frames.pop_front() {
                    return Some(frame);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Enqueue a frame; full queue drops the oldest and marks degraded.
    fn push(&self, frame: String) {
        let mut q = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if q.frames.len() >= self.capacity {
            q.frames.pop_front();
            q.degraded = true;
        }
        q.frames.push_back(frame);
        drop(q);
        self.notify.notify_one();
    }

    pub fn is_degraded(&self) -> bool {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).degraded
    }

    /// Called by the connection after a frame was actually written out.
    pub fn mark_delivered(&self) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).degraded = false;
    }

    pub fn close(&self, reason: Option<String>) {
        *self.close_reason.lock().unwrap_or_else(|e| e.into_inner()) = reason;
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).frames.len()
    }
}

pub struct PubSub {
    topics: RwLock<HashMap<String, Vec<Arc<Subscriber>>>>,
    queue_capacity: usize,
    next_id: AtomicU64,
}

impl PubSub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            queue_capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Create the outbound queue for a new connection.
    pub fn register(&self, project: ProjectId) -> Arc<Subscriber> {
        Arc::new(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            project,
            capacity: self.queue_capacity,
            queue: Mutex::new(SubQueue {
                frames: VecDeque::new(),
                degraded: false,
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
        })
    }

    pub async fn subscribe(&self, subscriber: &Arc<Subscriber>, topic: &str) -> bool {
        if !valid_topic(topic) {
            return false;
        }
        let key = scoped(subscriber.project, topic);
        let mut topics = self.topics.write().await;
        let entry = topics.entry(key).or_default();
        if !entry.iter().any(|s| s.id == subscriber.id) {
            entry.push(subscriber.clone());
        }
        true
    }

    pub async fn unsubscribe(&self, subscriber: &Arc<Subscriber>, topic: &str) {
        let key = scoped(subscriber.project, topic);
        let mut topics = self.topics.write().await;
        if let Some(entry) = topics.get_mut(&key) {
            entry.retain(|s| s.id != subscriber.id);
            if entry.is_empty() {
                topics.remove(&key);
            }
        }
    }

    /// Drop a connection from every topic. Connection teardown path.
    pub async fn unsubscribe_all(&self, subscriber: &Arc<Subscriber>) {
        let mut topics = self.topics.write().await;
        topics.retain(|_, entry| {
            entry.retain(|s| s.id != subscriber.id);
            !entry.is_empty()
        });
    }

    /// Fan a committed change out to every matching queue. Serialization
    /// happens once per topic; enqueueing happens outside the topic lock.
    pub async fn publish(&self, change: &ChangeRecord) {
        let doc = serde_json::to_value(&change.doc).unwrap_or(serde_json::Value::Null);
        for topic in topics_of(change) {
            let frame = serde_json::to_string(&WsPayload {
                op: op_str(change.op),
                topic: &topic,
                doc: doc.clone(),
            })
            .unwrap_or_default();

            let receivers: Vec<Arc<Subscriber>> = {
                let topics = self.topics.read().await;
                topics
                    .get(&scoped(change.project, &topic))
                    .map(|entry| entry.to_vec())
                    .unwrap_or_default()
            };
            for subscriber in receivers {
                subscriber.push(frame.clone());
            }
        }
    }

    /// Close every subscriber of one project with an explicit reason.
    /// Project-deletion teardown.
    pub async fn close_project(&self, project: ProjectId, reason: &str) {
        let mut topics = self.topics.write().await;
        let prefix = format!("{project}/");
        topics.retain(|key, entry| {
            if key.starts_with(&prefix) {
                for subscriber in entry.iter() {
                    subscriber.close(Some(reason.to_string()));
                }
                false
            } else {
                true
            }
        });
    }

    pub async fn subscription_count(&self) -> usize {
        self.topics.read().await.values().map(Vec::len).sum()
    }
}

fn scoped(project: ProjectId, topic: &str) -> String {
    format!("{project}/{topic}")
}

/// Adapter feeding the document store's change records into the bus.
pub struct PubSubSink(pub Arc<PubSub>);

#[async_trait::async_trait]
impl triggr_store::ChangeSink for PubSubSink {
    async fn publish(&self, change: ChangeRecord) {
        self.0.publish(&change).await;
    }
}
