//! Project records and the in-memory registry cache.
//!
//! The plaintext API key exists exactly once: in the create_project return
//! value. Only its sha256 digest is persisted or cached.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::warn;

use triggr_common::{ProjectId, Result, TriggrError};
use triggr_store::{keys, BatchOp, DocumentStore, KvEngine};

use crate::descriptor::{ContractDescriptor, EventDecl};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub api_key_digest: String,
    pub project_name: String,
    pub description: String,
    pub contract_address: String,
    pub contract_hash: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub event_schema: Vec<EventDecl>,
}

impl Project {
    pub fn event(&self, name: &str) -> Option<&EventDecl> {
        self.event_schema.iter().find(|e| e.name == name)
    }
}

#[derive(Default)]
struct Cache {
    by_id: HashMap<ProjectId, Arc<Project>>,
}

/// Persistent record of projects plus a read-through cache rebuilt at
/// startup. Lookups by API key compare digests in constant time.
pub struct ProjectRegistry {
    kv: Arc<KvEngine>,
    cache: RwLock<Cache>,
}

impl ProjectRegistry {
    /// Open the registry, scanning all persisted projects into the cache.
    pub fn load(kv: Arc<KvEngine>) -> Result<Self> {
        let mut cache = Cache::default();
        for (key, bytes) in kv.scan_prefix(keys::PROJECT_PREFIX)? {
            match keys::decode_record::<Project>("project", &bytes) {
                Ok(project) => {
                    cache.by_id.insert(project.id, Arc::new(project));
                }
                Err(e) => {
                    // One bad record must not take the node down with it.
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "skipping unreadable project record");
                }
            }
        }
        Ok(Self {
            kv,
            cache: RwLock::new(cache),
        })
    }

    /// Create a project from an uploaded descriptor. Returns the record and
    /// the plaintext API key. This is the only time the key is visible.
    pub async fn create_project(
        &self,
        project_name: &str,
        description: &str,
        contract_address: &str,
        owner_id: &str,
        descriptor: &ContractDescriptor,
    ) -> Result<(Project, String)> {
        if project_name.trim().is_empty() {
            return Err(TriggrError::validation("project_name must not be empty"));
        }
        if contract_address.trim().is_empty() {
            return Err(TriggrError::validation("contract_addr must not be empty"));
        }

        let api_key = mint_api_key();
        let project = Project {
            id: ProjectId::new(),
            api_key_digest: digest(&api_key),
            project_name: project_name.to_string(),
            description: description.to_string(),
            contract_address: contract_address.to_string(),
            contract_hash: descriptor.contract_hash.clone(),
            owner_id: owner_id.to_string(),
            created_at: Utc::now(),
            event_schema: descriptor.events.clone(),
        };

        self.kv
            .apply_batch(vec![BatchOp::Put {
                key: keys::project_key(project.id),
                value: keys::encode_record(&project)?,
            }])
            .await?;

        let mut cache = self.cache.write().await;
        cache.by_id.insert(project.id, Arc::new(project.clone()));
        Ok((project, api_key))
    }

    pub async fn get(&self, id: ProjectId) -> Result<Arc<Project>> {
        self.cache
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| TriggrError::NotFound(format!("project {id}")))
    }

    /// Resolve an API key to its project. The digest comparison is constant
    /// time so lookup latency never leaks key material.
    pub async fn find_by_api_key(&self, api_key: &str) -> Option<Arc<Project>> {
        let wanted = digest(api_key);
        let cache = self.cache.read().await;
        cache
            .by_id
            .values()
            .find(|p| constant_time_eq(p.api_key_digest.as_bytes(), wanted.as_bytes()))
            .cloned()
    }

    pub async fn find_by_contract(&self, contract_address: &str) -> Vec<Arc<Project>> {
        let cache = self.cache.read().await;
        cache
            .by_id
            .values()
            .filter(|p| p.contract_address == contract_address)
            .cloned()
            .collect()
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> Vec<Arc<Project>> {
        let cache = self.cache.read().await;
        let mut projects: Vec<_> = cache
            .by_id
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        projects.sort_by_key(|p| p.created_at);
        projects
    }

    pub async fn list_all(&self) -> Vec<Arc<Project>> {
        self.cache.read().await.by_id.values().cloned().collect()
    }

    /// Delete a project and cascade: its triggers and its document space go
    /// with it in the same sweep.
    pub async fn delete_project(&self, id: ProjectId, docs: &DocumentStore) -> Result<()> {
        // Confirm it exists before mutating anything.
        self.get(id).await?;

        let mut ops = vec![BatchOp::Delete {
            key: keys::project_key(id),
        }];
        for (key, _) in self.kv.scan_prefix(&keys::trigger_prefix(id))? {
            ops.push(BatchOp::Delete { key });
        }
        self.kv.apply_batch(ops).await?;
        docs.delete_project_data(id).await?;

        self.cache.write().await.by_id.remove(&id);
        Ok(())
    }
}

fn mint_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn digest(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
