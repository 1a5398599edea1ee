//! Document store: collections, documents, metadata, per-project
//! namespacing. Writers serialize per `(project, collection, doc_id)` via a
//! keyed lock table; readers never take a lock. Exactly one change record is
//! published per committed mutation, after the batch lands, while the keyed
//! lock is still held, so publish order matches commit order per key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use triggr_common::{valid_collection_name, ProjectId, Result, TriggrError, Value};

use crate::change::{ChangeOp, ChangeRecord, ChangeSink};
use crate::keys;
use crate::kv::{BatchOp, KvEngine};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMeta {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub data: Value,
    pub metadata: DocMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    pub count: u64,
    pub last_updated: DateTime<Utc>,
}

pub struct DocumentStore {
    kv: Arc<KvEngine>,
    sink: Arc<dyn ChangeSink>,
    write_locks: Mutex<HashMap<Vec<u8>, Arc<Mutex<()>>>>,
}

impl DocumentStore {
    pub fn new(kv: Arc<KvEngine>, sink: Arc<dyn ChangeSink>) -> Self {
        Self {
            kv,
            sink,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent. Creates an empty `CollectionMeta` if absent.
    pub async fn create_collection(
        &self,
        project: ProjectId,
        name: &str,
    ) -> Result<CollectionMeta> {
        check_collection_name(name)?;
        let meta_key = keys::collection_meta_key(project, name);
        if let Some(bytes) = self.kv.get(&meta_key)? {
            return keys::decode_record("collection meta", &bytes);
        }
        let meta = CollectionMeta {
            name: name.to_string(),
            count: 0,
            last_updated: Utc::now(),
        };
        self.kv
            .apply_batch(vec![BatchOp::Put {
                key: meta_key,
                value: keys::encode_record(&meta)?,
            }])
            .await?;
        Ok(meta)
    }

    pub fn list_collections(&self, project: ProjectId) -> Result<Vec<CollectionMeta>> {
        let mut out = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(&keys::collection_prefix(project))? {
            out.push(keys::decode_record("collection meta", &bytes)?);
        }
        Ok(out)
    }

    /// Insert a new document. Fails with `Conflict` if `doc_id` is taken;
    /// a missing `doc_id` gets a fresh v4 UUID.
    pub async fn insert_doc(
        &self,
        project: ProjectId,
        collection: &str,
        doc_id: Option<String>,
        data: Value,
    ) -> Result<Document> {
        check_collection_name(collection)?;
        check_data(&data)?;
        let doc_id = match doc_id {
            Some(id) => {
                check_doc_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let key = keys::doc_key(project, collection, &doc_id);
        let _guard = self.lock_key(&key).await;

        if self.kv.get(&key)?.is_some() {
            return Err(TriggrError::Conflict(format!(
                "document {collection}/{doc_id} already exists"
            )));
        }

        let now = Utc::now();
        let doc = Document {
            id: doc_id.clone(),
            collection: collection.to_string(),
            data,
            metadata: DocMeta {
                created_at: now,
                updated_at: now,
                version: 1,
                tags: Vec::new(),
            },
        };

        let mut meta = self.collection_meta_or_default(project, collection)?;
        meta.count += 1;
        meta.last_updated = now;

        self.commit_doc(project, &key, &doc, &meta).await?;
        self.publish(project, ChangeOp::Insert, &doc).await;
        Ok(doc)
    }

    /// Upsert. Creating emits `insert`; replacing preserves `created_at`,
    /// bumps `version`, and emits `update`.
    pub async fn put_doc(
        &self,
        project: ProjectId,
        collection: &str,
        doc_id: &str,
        data: Value,
    ) -> Result<Document> {
        check_collection_name(collection)?;
        check_doc_id(doc_id)?;
        check_data(&data)?;

        let key = keys::doc_key(project, collection, doc_id);
        let _guard = self.lock_key(&key).await;

        let now = Utc::now();
        let existing = self.read_doc(&key)?;
        let (doc, op, count_delta) = match existing {
            Some(prev) => (
                Document {
                    id: doc_id.to_string(),
                    collection: collection.to_string(),
                    data,
                    metadata: DocMeta {
                        created_at: prev.metadata.created_at,
                        updated_at: now,
                        version: prev.metadata.version + 1,
                        tags: prev.metadata.tags,
                    },
                },
                ChangeOp::Update,
                0,
            ),
            None => (
                Document {
                    id: doc_id.to_string(),
                    collection: collection.to_string(),
                    data,
                    metadata: DocMeta {
                        created_at: now,
                        updated_at: now,
                        version: 1,
                        tags: Vec::new(),
                    },
                },
                ChangeOp::Insert,
                1,
            ),
        };

        let mut meta = self.collection_meta_or_default(project, collection)?;
        meta.count += count_delta;
        meta.last_updated = now;

        self.commit_doc(project, &key, &doc, &meta).await?;
        self.publish(project, op, &doc).await;
        Ok(doc)
    }

    /// Shallow merge into an existing document. `NotFound` if absent.
    pub async fn patch_doc(
        &self,
        project: ProjectId,
        collection: &str,
        doc_id: &str,
        data: Value,
    ) -> Result<Document> {
        check_collection_name(collection)?;
        check_doc_id(doc_id)?;
        check_data(&data)?;

        let key = keys::doc_key(project, collection, doc_id);
        let _guard = self.lock_key(&key).await;

        let mut doc = self
            .read_doc(&key)?
            .ok_or_else(|| TriggrError::NotFound(format!("document {collection}/{doc_id}")))?;

        let now = Utc::now();
        doc.data.merge_shallow(data);
        doc.metadata.updated_at = now;
        doc.metadata.version += 1;

        let mut meta = self.collection_meta_or_default(project, collection)?;
        meta.last_updated = now;

        self.commit_doc(project, &key, &doc, &meta).await?;
        self.publish(project, ChangeOp::Update, &doc).await;
        Ok(doc)
    }

    pub fn get_doc(&self, project: ProjectId, collection: &str, doc_id: &str) -> Result<Document> {
        let key = keys::doc_key(project, collection, doc_id);
        self.read_doc(&key)?
            .ok_or_else(|| TriggrError::NotFound(format!("document {collection}/{doc_id}")))
    }

    pub fn list_docs(&self, project: ProjectId, collection: &str) -> Result<Vec<Document>> {
        check_collection_name(collection)?;
        let mut out = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(&keys::doc_prefix(project, collection))? {
            out.push(keys::decode_record("document", &bytes)?);
        }
        Ok(out)
    }

    /// Delete a document, returning it as it stood. `NotFound` if absent.
    pub async fn delete_doc(
        &self,
        project: ProjectId,
        collection: &str,
        doc_id: &str,
    ) -> Result<Document> {
        check_collection_name(collection)?;

        let key = keys::doc_key(project, collection, doc_id);
        let _guard = self.lock_key(&key).await;

        let doc = self
            .read_doc(&key)?
            .ok_or_else(|| TriggrError::NotFound(format!("document {collection}/{doc_id}")))?;

        let mut meta = self.collection_meta_or_default(project, collection)?;
        meta.count = meta.count.saturating_sub(1);
        meta.last_updated = Utc::now();

        self.kv
            .apply_batch(vec![
                BatchOp::Delete { key: key.clone() },
                BatchOp::Put {
                    key: keys::collection_meta_key(project, collection),
                    value: keys::encode_record(&meta)?,
                },
            ])
            .await?;
        self.publish(project, ChangeOp::Delete, &doc).await;
        Ok(doc)
    }

    /// Remove every document and collection of a project in one batch.
    /// Cascade cleanup on project deletion. No change records are emitted;
    /// the gateway closes the project's subscriptions instead.
    pub async fn delete_project_data(&self, project: ProjectId) -> Result<u64> {
        let mut ops = Vec::new();
        for (key, _) in self.kv.scan_prefix(&keys::doc_prefix_all(project))? {
            ops.push(BatchOp::Delete { key });
        }
        let docs = ops.len() as u64;
        for (key, _) in self.kv.scan_prefix(&keys::collection_prefix(project))? {
            ops.push(BatchOp::Delete { key });
        }
        if !ops.is_empty() {
            self.kv.apply_batch(ops).await?;
        }
        Ok(docs)
    }

    // --- Internals ---

    fn read_doc(&self, key: &[u8]) -> Result<Option<Document>> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(keys::decode_record("document", &bytes)?)),
            None => Ok(None),
        }
    }

    fn collection_meta_or_default(
        &self,
        project: ProjectId,
        collection: &str,
    ) -> Result<CollectionMeta> {
        match self.kv.get(&keys::collection_meta_key(project, collection))? {
            Some(bytes) => keys::decode_record("collection meta", &bytes),
            None => Ok(CollectionMeta {
                name: collection.to_string(),
                count: 0,
                last_updated: Utc::now(),
            }),
        }
    }

    async fn commit_doc(
        &self,
        project: ProjectId,
        key: &[u8],
        doc: &Document,
        meta: &CollectionMeta,
    ) -> Result<()> {
        self.kv
            .apply_batch(vec![
                BatchOp::Put {
                    key: key.to_vec(),
                    value: keys::encode_record(doc)?,
                },
                BatchOp::Put {
                    key: keys::collection_meta_key(project, &meta.name),
                    value: keys::encode_record(meta)?,
                },
            ])
            .await
    }

    async fn publish(&self, project: ProjectId, op: ChangeOp, doc: &Document) {
        self.sink
            .publish(ChangeRecord {
                project,
                op,
                collection: doc.collection.clone(),
                doc_id: doc.id.clone(),
                doc: doc.clone(),
            })
            .await;
    }

    /// Acquire the write lock for one document key. The returned guard owns
    /// the lock until dropped; different keys proceed in parallel.
    async fn lock_key(&self, key: &[u8]) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.write_locks.lock().await;
            table
                .entry(key.to_vec())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

fn check_collection_name(name: &str) -> Result<()> {
    if valid_collection_name(name) {
        Ok(())
    } else {
        Err(TriggrError::validation(format!(
            "invalid collection name {name:?}: expected [a-z0-9_]+"
        )))
    }
}

fn check_doc_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id.bytes().all(|b| b.is_ascii_graphic() && b != b'/');
    if ok {
        Ok(())
    } else {
        Err(TriggrError::validation(format!(
            "invalid document id {id:?}"
        )))
    }
}

fn check_data(data: &Value) -> Result<()> {
    match data {
        Value::Obj(_) => Ok(()),
        other => Err(TriggrError::validation(format!(
            "document data must be an object, got {}",
            other.kind()
        ))),
    }
}
