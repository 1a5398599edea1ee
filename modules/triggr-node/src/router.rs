//! Trigger router: indexes compiled triggers by `(project, event name)` and
//! drives the evaluator for every decoded event coming off the intake
//! channel. The index is rebuilt at startup by recompiling every stored
//! source; per-trigger compile failures deactivate the trigger instead of
//! failing the boot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use triggr_chain::DecodedEvent;
use triggr_common::ProjectId;
use triggr_dsl::{compile, execute, CompiledTrigger, EventData};
use triggr_registry::{ProjectRegistry, TriggerRegistry};
use triggr_store::DocumentStore;

type TriggerKey = (ProjectId, String);

pub struct TriggerRouter {
    /// `(project, event name)` → trigger ids in ascending (firing) order.
    index: RwLock<HashMap<TriggerKey, Vec<String>>>,
    compiled: RwLock<HashMap<TriggerKey, Arc<CompiledTrigger>>>,
    projects: Arc<ProjectRegistry>,
    triggers: Arc<TriggerRegistry>,
    docs: Arc<DocumentStore>,
    budget: Duration,
}

impl TriggerRouter {
    pub fn new(
        projects: Arc<ProjectRegistry>,
        triggers: Arc<TriggerRegistry>,
        docs: Arc<DocumentStore>,
        budget: Duration,
    ) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            compiled: RwLock::new(HashMap::new()),
            projects,
            triggers,
            docs,
            budget,
        }
    }

    /// Recompile every stored trigger and build the event index. Triggers
    /// that no longer compile (schema drift, bad record) are deactivated
    /// with a diagnostic.
    pub async fn rebuild(&self) -> anyhow::Result<()> {
        let records = self.triggers.list_all()?;
        let mut rebuilt = 0usize;
        for record in records {
            let project = match self.projects.get(record.project).await {
                Ok(project) => project,
                Err(_) => {
                    warn!(trigger = %record.id, project = %record.project, "trigger belongs to no project; skipping");
                    continue;
                }
            };
            match compile(&record.source, &project.event_schema) {
                Ok(compiled) => {
                    self.insert_compiled(record.project, &record.id, compiled).await;
                    rebuilt += 1;
                }
                Err(e) => {
                    warn!(
                        project = %record.project,
                        trigger = %record.id,
                        cause = %e,
                        "stored trigger no longer compiles; deactivating"
                    );
                    let _ = self
                        .triggers
                        .set_active(record.project, &record.id, false)
                        .await;
                }
            }
        }
        info!(triggers = rebuilt, "trigger index rebuilt");
        Ok(())
    }

    /// Register a freshly created trigger. The per-event list is swapped
    /// atomically under the write lock, kept in ascending id order.
    pub async fn insert_compiled(
        &self,
        project: ProjectId,
        trigger_id: &str,
        compiled: CompiledTrigger,
    ) {
        let event_key = (project, compiled.bound_event.clone());
        self.compiled
            .write()
            .await
            .insert((project, trigger_id.to_string()), Arc::new(compiled));

        let mut index = self.index.write().await;
        let entry = index.entry(event_key).or_default();
        let mut ids = entry.clone();
        if !ids.iter().any(|id| id == trigger_id) {
            ids.push(trigger_id.to_string());
            ids.sort();
        }
        *entry = ids;
    }

    pub async fn remove(&self, project: ProjectId, trigger_id: &str) {
        let removed = self
            .compiled
            .write()
            .await
            .remove(&(project, trigger_id.to_string()));
        if let Some(compiled) = removed {
            let mut index = self.index.write().await;
            if let Some(entry) = index.get_mut(&(project, compiled.bound_event.clone())) {
                entry.retain(|id| id != trigger_id);
                if entry.is_empty() {
                    index.remove(&(project, compiled.bound_event.clone()));
                }
            }
        }
    }

    pub async fn remove_project(&self, project: ProjectId) {
        self.compiled.write().await.retain(|(p, _), _| *p != project);
        self.index.write().await.retain(|(p, _), _| *p != project);
    }

    /// Consume decoded events until the channel closes or shutdown flips.
    /// Events are processed one at a time, so events within a block commit
    /// before events of subsequent blocks.
    pub async fn run(
        self: Arc<Self>,
        mut intake: mpsc::Receiver<DecodedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = intake.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("trigger router stopped");
    }

    /// Fire every active trigger bound to this event, in ascending id
    /// order. Each trigger gets the wall-clock budget; failure or timeout
    /// aborts that trigger only. `last_run_at` is recorded win or lose.
    pub async fn handle_event(&self, event: DecodedEvent) {
        let ids: Vec<String> = {
            let index = self.index.read().await;
            match index.get(&(event.project, event.name.clone())) {
                Some(ids) => ids.clone(),
                None => return,
            }
        };

        let data = EventData {
            name: event.name.clone(),
            fields: event.fields.clone(),
        };

        for trigger_id in ids {
            let record = match self.triggers.get(event.project, &trigger_id) {
                Ok(record) => record,
                Err(_) => continue,
            };
            if !record.active {
                continue;
            }
            let compiled = {
                let compiled = self.compiled.read().await;
                match compiled.get(&(event.project, trigger_id.clone())) {
                    Some(compiled) => compiled.clone(),
                    None => continue,
                }
            };

            let outcome = tokio::time::timeout(
                self.budget,
                execute(&compiled.tree, &data, &self.docs, event.project),
            )
            .await;

            match outcome {
                Ok(Ok(mutations)) => {
                    debug!(
                        project = %event.project,
                        trigger = %trigger_id,
                        event = %event.name,
                        block = event.block_number,
                        mutations,
                        "trigger fired"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        project = %event.project,
                        trigger = %trigger_id,
                        event = %event.name,
                        block = event.block_number,
                        cause = %e,
                        "trigger evaluation failed"
                    );
                }
                Err(_) => {
                    warn!(
                        project = %event.project,
                        trigger = %trigger_id,
                        event = %event.name,
                        block = event.block_number,
                        budget_ms = self.budget.as_millis() as u64,
                        "trigger evaluation exceeded its budget; aborted"
                    );
                }
            }

            if let Err(e) = self
                .triggers
                .touch_last_run(event.project, &trigger_id, Utc::now())
                .await
            {
                warn!(trigger = %trigger_id, cause = %e, "failed to record last_run_at");
            }
        }
    }
}
