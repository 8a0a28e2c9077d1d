use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use wayfarer_core::Clock;

use crate::error::WorkflowError;
use crate::events::{apply_event, WorkflowEvent};
use crate::models::Project;

/// Tolerance within which a registry markdown file's mtime drifting from
/// the stored `last_orchestrator_update_at` is treated as cosmetic rather
/// than an external edit. Hardcoded rather than a config knob; see
/// DESIGN.md.
const CONFLICT_MTIME_TOLERANCE_SECS: i64 = 2;

/// Per-project durable state on disk:
/// ```text
/// {base}/{id}/
///   plan.json
///   checkpoint.json
///   events.ndjson
///   worker-logs/
///   llm-calls/
///   artifacts/
/// ```
pub struct FileWorkflowBackend {
    base_dir: PathBuf,
    clock: Arc<dyn Clock>,
    project_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileWorkflowBackend {
    pub fn new(base_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            base_dir: base_dir.into(),
            clock,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.base_dir.join(project_id)
    }

    pub fn ensure_dirs(&self, project_id: &str) -> Result<(), WorkflowError> {
        let dir = self.project_dir(project_id);
        std::fs::create_dir_all(dir.join("worker-logs"))?;
        std::fs::create_dir_all(dir.join("llm-calls"))?;
        std::fs::create_dir_all(dir.join("artifacts"))?;
        Ok(())
    }

    fn lock_for(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.project_locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn events_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("events.ndjson")
    }

    fn checkpoint_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("checkpoint.json")
    }

    fn plan_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("plan.json")
    }

    /// Scan the event log to find the next free `seq`, lazily — there is
    /// no separate counter file to get out of sync with the log itself.
    fn next_seq(&self, project_id: &str) -> Result<u64, WorkflowError> {
        Ok(self.list_events(project_id)?.last().map(|e| e.seq + 1).unwrap_or(1))
    }

    pub fn list_events(&self, project_id: &str) -> Result<Vec<WorkflowEvent>, WorkflowError> {
        let path = self.events_path(project_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let body = std::fs::read_to_string(path)?;
        let mut events = Vec::new();
        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str::<WorkflowEvent>(line)?);
        }
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    /// Append one event, serialized per project. `O_APPEND` plus `fsync`
    /// makes the event
    /// log the durable source of truth even if the checkpoint write that
    /// follows never happens.
    pub async fn append_event(
        &self,
        project_id: &str,
        event_type: &str,
        actor: &str,
        payload: serde_json::Value,
    ) -> Result<WorkflowEvent, WorkflowError> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        self.ensure_dirs(project_id)?;
        let seq = self.next_seq(project_id)?;
        let event = WorkflowEvent::new(seq, event_type, actor, self.clock.now_unix(), payload);

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(project_id))?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;

        Ok(event)
    }

    pub fn save_plan(&self, project_id: &str, project: &Project) -> Result<(), WorkflowError> {
        self.ensure_dirs(project_id)?;
        let plan = serde_json::json!({
            "phases": project.phases,
            "terminal_conditions": project.terminal_conditions,
        });
        atomic_write(&self.plan_path(project_id), &serde_json::to_vec_pretty(&plan)?)?;
        Ok(())
    }

    /// Write `checkpoint.json` atomically: tempfile in the same directory,
    /// fsync, rename over the target.
    pub fn checkpoint(&self, project: &mut Project) -> Result<(), WorkflowError> {
        self.ensure_dirs(&project.id)?;
        project.last_orchestrator_update_at = Some(self.clock.now_unix());
        let body = serde_json::to_vec_pretty(project)?;
        atomic_write(&self.checkpoint_path(&project.id), &body)?;
        Ok(())
    }

    pub fn load_checkpoint(&self, project_id: &str) -> Result<Option<Project>, WorkflowError> {
        let path = self.checkpoint_path(project_id);
        if !path.exists() {
            return Ok(None);
        }
        let body = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&body) {
            Ok(project) => Ok(Some(project)),
            Err(_) => Ok(None), // corrupt checkpoint: caller rebuilds from events
        }
    }

    /// Load the checkpoint (if any) as base state, replay every event with
    /// `seq > last_event_seq` in order, then — when `registry_path` is
    /// given — check the registry markdown for an external edit. A real
    /// conflict (a changed `plan_hash` past the mtime tolerance) pauses the
    /// project and records a `conflict.detected` event, unless it is
    /// already paused, done, or cancelled.
    pub async fn resume(
        &self,
        project_id: &str,
        registry_path: Option<&Path>,
        created_fallback: impl FnOnce() -> Option<Project>,
    ) -> Result<Option<Project>, WorkflowError> {
        let events = self.list_events(project_id)?;
        let mut project = match self.load_checkpoint(project_id)? {
            Some(p) => p,
            None => match created_fallback() {
                Some(p) => p,
                None => return Ok(None),
            },
        };
        for event in events.iter().filter(|e| e.seq > project.last_event_seq) {
            apply_event(&mut project, event);
        }

        if let Some(path) = registry_path {
            if let Some(reason) = self.detect_conflict(&project, path)? {
                if !matches!(
                    project.status,
                    crate::models::ProjectStatus::Paused | crate::models::ProjectStatus::Done | crate::models::ProjectStatus::Cancelled
                ) {
                    project.status = crate::models::ProjectStatus::Paused;
                    project.journal.push(crate::models::JournalEntry {
                        at_unix: self.clock.now_unix(),
                        text: format!("conflict detected; reconcile required: {reason}"),
                    });
                    let event = self
                        .append_event(project_id, crate::events::CONFLICT_DETECTED, "system", serde_json::json!({"reason": reason}))
                        .await?;
                    project.last_event_seq = event.seq;
                    self.checkpoint(&mut project)?;
                }
            }
        }

        Ok(Some(project))
    }

    pub fn list_project_ids(&self) -> Result<Vec<String>, WorkflowError> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn save_artifact(&self, project_id: &str, name: &str, content: &[u8]) -> Result<PathBuf, WorkflowError> {
        self.ensure_dirs(project_id)?;
        let path = self.project_dir(project_id).join("artifacts").join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Compare a registry markdown file's mtime against the project's
    /// `last_orchestrator_update_at`; within tolerance, no conflict. Past
    /// tolerance, only a changed `plan_hash` counts as a real conflict —
    /// everything else is cosmetic.
    pub fn detect_conflict(&self, project: &Project, registry_path: &Path) -> Result<Option<String>, WorkflowError> {
        let Ok(metadata) = std::fs::metadata(registry_path) else {
            return Ok(None);
        };
        let mtime_unix = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let Some(stored) = project.last_orchestrator_update_at else {
            return Ok(None);
        };
        if (mtime_unix - stored).abs() <= CONFLICT_MTIME_TOLERANCE_SECS {
            return Ok(None);
        }

        let body = std::fs::read_to_string(registry_path)?;
        let Some(parsed) = crate::registry_markdown::parse(&body) else {
            return Ok(None);
        };
        match (&parsed.frontmatter.plan_hash, &project.plan_hash) {
            (Some(registry_hash), Some(stored_hash)) if registry_hash != stored_hash => Ok(Some(format!(
                "registry plan_hash {registry_hash} differs from stored {stored_hash}"
            ))),
            _ => Ok(None),
        }
    }
}

fn atomic_write(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(body)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Budget;
    use wayfarer_core::FakeClock;

    fn backend() -> (FileWorkflowBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
        (FileWorkflowBackend::new(dir.path(), clock), dir)
    }

    #[tokio::test]
    async fn appended_events_get_strictly_increasing_seq() {
        let (backend, _dir) = backend();
        let e1 = backend.append_event("p1", "project.created", "system", serde_json::json!({})).await.unwrap();
        let e2 = backend.append_event("p1", "project.transitioned", "system", serde_json::json!({"to": "executing"})).await.unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
    }

    #[test]
    fn checkpoint_round_trips_project_state() {
        let (backend, _dir) = backend();
        let mut project = Project::new("p1", "goal", "ws", Budget::new(0.0, 0, 0), 1_000);
        backend.checkpoint(&mut project).unwrap();
        let loaded = backend.load_checkpoint("p1").unwrap().unwrap();
        assert_eq!(loaded.id, "p1");
        assert_eq!(loaded.goal, "goal");
    }

    #[test]
    fn corrupt_checkpoint_is_treated_as_absent() {
        let (backend, _dir) = backend();
        backend.ensure_dirs("p1").unwrap();
        std::fs::write(backend.checkpoint_path("p1"), b"not json").unwrap();
        assert!(backend.load_checkpoint("p1").unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_replays_events_past_the_checkpointed_seq() {
        let (backend, _dir) = backend();
        let mut project = Project::new("p1", "goal", "ws", Budget::new(0.0, 0, 0), 1_000);
        backend.checkpoint(&mut project).unwrap();
        backend.append_event("p1", "project.transitioned", "system", serde_json::json!({"to": "awaiting_approval"})).await.unwrap();
        backend.append_event("p1", "project.transitioned", "system", serde_json::json!({"to": "executing"})).await.unwrap();

        let resumed = backend.resume("p1", None, || None).await.unwrap().unwrap();
        assert_eq!(resumed.status, crate::models::ProjectStatus::Executing);
        assert_eq!(resumed.last_event_seq, 2);
    }

    #[tokio::test]
    async fn resume_pauses_and_records_conflict_on_plan_hash_mismatch() {
        let (backend, dir) = backend();
        let mut project = Project::new("p1", "goal", "ws", Budget::new(0.0, 0, 0), 1_000);
        project.status = crate::models::ProjectStatus::Executing;
        project.plan_hash = Some("stored-hash".to_string());
        project.last_orchestrator_update_at = Some(1_000);
        backend.checkpoint(&mut project).unwrap();

        // The registry file's real mtime sits far from the project's
        // `last_orchestrator_update_at` (unix 1_000), which alone clears the
        // tolerance window; only the differing plan_hash makes it a real
        // conflict rather than a cosmetic one.
        let registry_path = dir.path().join("p1.md");
        std::fs::write(
            &registry_path,
            "---\nid: p1\nplan_hash: different-hash\n---\n\n# goal\n",
        )
        .unwrap();

        let resumed = backend.resume("p1", Some(&registry_path), || None).await.unwrap().unwrap();
        assert_eq!(resumed.status, crate::models::ProjectStatus::Paused);
        assert!(resumed.journal.iter().any(|e| e.text.contains("conflict")));

        let events = backend.list_events("p1").unwrap();
        assert!(events.iter().any(|e| e.event_type == crate::events::CONFLICT_DETECTED));
    }
}
