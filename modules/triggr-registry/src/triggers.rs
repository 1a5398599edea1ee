//! Trigger records. The compiled rule tree is derived state and never
//! persisted; only the comment-stripped source survives restarts, and the
//! router recompiles it at startup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use triggr_common::{valid_trigger_id, ProjectId, Result, TriggrError, MAX_DSL_SOURCE_BYTES};
use triggr_store::{keys, BatchOp, KvEngine};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub id: String,
    pub project: ProjectId,
    pub description: String,
    /// Original DSL text with comments stripped.
    pub source: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

pub struct TriggerRegistry {
    kv: Arc<KvEngine>,
}

impl TriggerRegistry {
    pub fn new(kv: Arc<KvEngine>) -> Self {
        Self { kv }
    }

    /// Store a new trigger. The caller compiles the source first; what
    /// arrives here is already comment-stripped and validated.
    pub async fn create(
        &self,
        project: ProjectId,
        id: &str,
        description: &str,
        source: &str,
    ) -> Result<TriggerRecord> {
        if !valid_trigger_id(id) {
            return Err(TriggrError::validation(format!(
                "invalid trigger id {id:?}: expected [a-z0-9_-]{{1,64}}"
            )));
        }
        if source.len() > MAX_DSL_SOURCE_BYTES {
            return Err(TriggrError::validation(format!(
                "trigger source is {} bytes; maximum is {MAX_DSL_SOURCE_BYTES}",
                source.len()
            )));
        }

        let key = keys::trigger_key(project, id);
        if self.kv.get(&key)?.is_some() {
            return Err(TriggrError::Conflict(format!("trigger {id} already exists")));
        }

        let record = TriggerRecord {
            id: id.to_string(),
            project,
            description: description.to_string(),
            source: source.to_string(),
            active: true,
            created_at: Utc::now(),
            last_run_at: None,
        };
        self.persist(&record).await?;
        Ok(record)
    }

    pub fn get(&self, project: ProjectId, id: &str) -> Result<TriggerRecord> {
        let bytes = self
            .kv
            .get(&keys::trigger_key(project, id))?
            .ok_or_else(|| TriggrError::NotFound(format!("trigger {id}")))?;
        keys::decode_record("trigger", &bytes)
    }

    /// Triggers of one project in ascending id order (the firing order).
    pub fn list(&self, project: ProjectId) -> Result<Vec<TriggerRecord>> {
        let mut out = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(&keys::trigger_prefix(project))? {
            out.push(keys::decode_record("trigger", &bytes)?);
        }
        Ok(out)
    }

    /// Every trigger of every project. Startup index rebuild only.
    pub fn list_all(&self) -> Result<Vec<TriggerRecord>> {
        let mut out = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(b"tkey/")? {
            out.push(keys::decode_record("trigger", &bytes)?);
        }
        Ok(out)
    }

    pub async fn set_active(&self, project: ProjectId, id: &str, active: bool) -> Result<TriggerRecord> {
        let mut record = self.get(project, id)?;
        record.active = active;
        self.persist(&record).await?;
        Ok(record)
    }

    /// Record an invocation. Called after every evaluation, success or not.
    pub async fn touch_last_run(&self, project: ProjectId, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut record = self.get(project, id)?;
        record.last_run_at = Some(at);
        self.persist(&record).await
    }

    pub async fn delete(&self, project: ProjectId, id: &str) -> Result<()> {
        let key = keys::trigger_key(project, id);
        if self.kv.get(&key)?.is_none() {
            return Err(TriggrError::NotFound(format!("trigger {id}")));
        }
        self.kv.apply_batch(vec![BatchOp::Delete { key }]).await
    }

    async fn persist(&self, record: &TriggerRecord) -> Result<()> {
        self.kv
            .apply_batch(vec![BatchOp::Put {
                key: keys::trigger_key(record.project, &record.id),
                value: keys::encode_record(record)?,
            }])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (TriggerRegistry, ProjectId) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(KvEngine::open(dir.keep()).unwrap());
        (TriggerRegistry::new(kv), ProjectId::new())
    }

    #[tokio::test]
    async fn create_get_roundtrip() {
        let (reg, project) = registry();
        let created = reg
            .create(project, "t1", "demo", "fn main(events) { delete @users:u1 }")
            .await
            .unwrap();
        assert!(created.active);
        assert!(created.last_run_at.is_none());

        let fetched = reg.get(project, "t1").unwrap();
        assert_eq!(fetched.source, created.source);
    }

    #[tokio::test]
    async fn duplicate_id_conflicts() {
        let (reg, project) = registry();
        reg.create(project, "t1", "", "src").await.unwrap();
        let err = reg.create(project, "t1", "", "src").await.unwrap_err();
        assert!(matches!(err, TriggrError::Conflict(_)));
    }

    #[tokio::test]
    async fn oversized_source_rejected_whole() {
        let (reg, project) = registry();
        let big = "x".repeat(MAX_DSL_SOURCE_BYTES + 1);
        let err = reg.create(project, "t1", "", &big).await.unwrap_err();
        assert!(matches!(err, TriggrError::Validation { .. }));
        assert!(reg.get(project, "t1").is_err());
    }

    #[tokio::test]
    async fn list_is_id_ordered() {
        let (reg, project) = registry();
        reg.create(project, "t2", "", "b").await.unwrap();
        reg.create(project, "t1", "", "a").await.unwrap();
        reg.create(project, "t10", "", "c").await.unwrap();

        let ids: Vec<String> = reg.list(project).unwrap().into_iter().map(|t| t.id).collect();
        // Lexicographic, not numeric: t1 < t10 < t2.
        assert_eq!(ids, vec!["t1", "t10", "t2"]);
    }

    #[tokio::test]
    async fn set_active_and_touch_last_run() {
        let (reg, project) = registry();
        reg.create(project, "t1", "", "src").await.unwrap();

        let flipped = reg.set_active(project, "t1", false).await.unwrap();
        assert!(!flipped.active);

        let now = Utc::now();
        reg.touch_last_run(project, "t1", now).await.unwrap();
        assert_eq!(reg.get(project, "t1").unwrap().last_run_at, Some(now));
    }
}
