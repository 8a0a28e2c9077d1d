use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use wayfarer_core::{ids, Clock};

use crate::backend::FileWorkflowBackend;
use crate::error::WorkflowError;
use crate::events::{self, WorkflowEvent};
use crate::models::{validate_transition, Budget, JournalEntry, Project, ProjectStatus};
use crate::registry_markdown;

fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut last_was_dash = false;
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

/// Durable project registry: resolves identity either through
/// an external markdown registry directory (slug-named files a human may
/// browse and edit) or, when no registry is configured, through legacy
/// sequential ids. Either way the authoritative state lives in the
/// workflow backend's checkpoint/event log.
pub struct ProjectStore {
    backend: Arc<FileWorkflowBackend>,
    base_dir: PathBuf,
    registry_dir: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    create_lock: tokio::sync::Mutex<()>,
    cache: Mutex<HashMap<String, Project>>,
}

impl ProjectStore {
    pub fn new(base_dir: impl Into<PathBuf>, registry_dir: Option<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let base_dir = base_dir.into();
        let backend = Arc::new(FileWorkflowBackend::new(base_dir.clone(), Arc::clone(&clock)));
        if let Some(dir) = &registry_dir {
            let _ = std::fs::create_dir_all(dir);
        }
        Self {
            backend,
            base_dir,
            registry_dir,
            clock,
            create_lock: tokio::sync::Mutex::new(()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<FileWorkflowBackend> {
        &self.backend
    }

    fn registry_path(&self, id: &str) -> Option<PathBuf> {
        self.registry_dir.as_ref().map(|dir| dir.join(format!("{id}.md")))
    }

    fn make_id(&self, goal: &str) -> String {
        match &self.registry_dir {
            Some(dir) => {
                let base = slugify(goal);
                let mut candidate = base.clone();
                let mut n = 2;
                while dir.join(format!("{candidate}.md")).exists() {
                    candidate = format!("{base}-{n}");
                    n += 1;
                }
                candidate
            }
            None => ids::next_legacy_project_id(self.clock.now()),
        }
    }

    /// Create a project in `Planning`, allocate its workspace, and — only
    /// when it has no phases yet — write a minimal registry markdown file
    /// so a clobbered human-authored registry is never the create path's
    /// fault.
    pub async fn create(&self, goal: &str, tags: Vec<String>, budget: Budget) -> Result<Project, WorkflowError> {
        let _guard = self.create_lock.lock().await;
        let id = self.make_id(goal);
        let workspace_dir = self.backend.project_dir(&id).to_string_lossy().into_owned();
        let mut project = Project::new(&id, goal, workspace_dir, budget, self.clock.now_unix());
        project.tags = tags;

        self.backend.ensure_dirs(&id)?;
        self.backend
            .append_event(&id, events::PROJECT_CREATED, "system", serde_json::json!({"goal": goal}))
            .await?;

        if project.phases.is_empty() {
            if let Some(path) = self.registry_path(&id) {
                let created = time::OffsetDateTime::from_unix_timestamp(self.clock.now_unix())
                    .map(|t| t.to_string())
                    .unwrap_or_default();
                let markdown = registry_markdown::render_minimal(&id, goal, &project.tags, &created);
                std::fs::write(&path, markdown)?;
            }
        }

        self.backend.checkpoint(&mut project)?;
        self.cache.lock().unwrap().insert(id.clone(), project.clone());
        Ok(project)
    }

    /// Resolution order: in-memory cache; then, when a registry directory
    /// is configured and holds a file for this id, the workflow backend's
    /// checkpoint/event log resumed against that registry path (merging
    /// in the registry's authoritative `goal`/`tags` and pausing on
    /// conflict) or, absent any checkpoint yet, a registry-only project
    /// synthesized from its frontmatter; otherwise the checkpoint/event
    /// log alone.
    pub async fn get(&self, id: &str) -> Result<Option<Project>, WorkflowError> {
        if let Some(project) = self.cache.lock().unwrap().get(id) {
            return Ok(Some(project.clone()));
        }

        if let Some(registry_path) = self.registry_path(id) {
            if registry_path.exists() {
                let body = std::fs::read_to_string(&registry_path)?;
                let parsed = registry_markdown::parse(&body);

                let resumed = self.backend.resume(id, Some(registry_path.as_path()), || None).await?;
                let project = match resumed {
                    Some(mut project) => {
                        if let Some(parsed) = &parsed {
                            if let Some(title) = &parsed.frontmatter.title {
                                project.goal = title.clone();
                            }
                            if !parsed.frontmatter.tags.is_empty() {
                                project.tags = parsed.frontmatter.tags.clone();
                            }
                        }
                        project
                    }
                    None => self.project_from_registry_only(id, parsed.as_ref()),
                };
                self.cache.lock().unwrap().insert(id.to_string(), project.clone());
                return Ok(Some(project));
            }
        }

        let resumed = self.backend.resume(id, None, || None).await?;
        if let Some(project) = &resumed {
            self.cache.lock().unwrap().insert(id.to_string(), project.clone());
        }
        Ok(resumed)
    }

    /// Build a minimal project straight from registry frontmatter when no
    /// workflow checkpoint exists yet for this id — a registry entry a
    /// human created or edited before any plan ran.
    fn project_from_registry_only(&self, id: &str, parsed: Option<&registry_markdown::ParsedRegistry>) -> Project {
        let goal = parsed
            .and_then(|p| p.frontmatter.title.clone())
            .or_else(|| parsed.and_then(|p| p.heading.clone()))
            .unwrap_or_else(|| id.to_string());
        let workspace_dir = self.backend.project_dir(id).to_string_lossy().into_owned();
        let mut project = Project::new(id, goal, workspace_dir, Budget::new(0.0, 0, self.clock.now_unix()), self.clock.now_unix());
        if let Some(parsed) = parsed {
            project.tags = parsed.frontmatter.tags.clone();
            if let Some(raw_status) = &parsed.frontmatter.status {
                project.status = registry_markdown::map_status(raw_status);
            }
            project.plan_hash = parsed.frontmatter.plan_hash.clone();
        }
        project
    }

    pub fn update(&self, project: &mut Project) -> Result<(), WorkflowError> {
        project.updated_at = self.clock.now_unix();
        self.backend.checkpoint(project)?;
        self.cache.lock().unwrap().insert(project.id.clone(), project.clone());
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), WorkflowError> {
        let dir = self.backend.project_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        if let Some(path) = self.registry_path(id) {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        self.cache.lock().unwrap().remove(id);
        Ok(())
    }

    /// Walks the registry directory first, so human-authored entries with
    /// no workflow state yet still show up, then picks up any
    /// workflow-only ids the registry doesn't know about.
    pub async fn list_projects(&self, status: Option<ProjectStatus>, tag: Option<&str>, limit: Option<usize>) -> Result<Vec<Project>, WorkflowError> {
        let mut projects = Vec::new();
        let mut seen = std::collections::HashSet::new();

        if let Some(dir) = &self.registry_dir {
            if dir.exists() {
                let mut entries: Vec<_> = std::fs::read_dir(dir)?
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("md"))
                    .collect();
                entries.sort_by_key(|e| e.file_name());
                for entry in entries {
                    let Some(id) = entry.path().file_stem().and_then(|s| s.to_str()).map(|s| s.to_string()) else {
                        continue;
                    };
                    seen.insert(id.clone());
                    if let Some(project) = self.get(&id).await? {
                        projects.push(project);
                    }
                }
            }
        }

        for id in self.backend.list_project_ids()? {
            if seen.contains(&id) {
                continue;
            }
            if let Some(project) = self.get(&id).await? {
                projects.push(project);
            }
        }
        if let Some(status) = status {
            projects.retain(|p| p.status == status);
        }
        if let Some(tag) = tag {
            projects.retain(|p| p.tags.iter().any(|t| t == tag));
        }
        projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = limit {
            projects.truncate(limit);
        }
        Ok(projects)
    }

    /// Validate against the static transition table, checkpoint, and
    /// record a `project.transitioned` event.
    pub async fn transition(&self, id: &str, new_status: ProjectStatus, actor: &str) -> Result<Project, WorkflowError> {
        let mut project = self.get(id).await?.ok_or_else(|| WorkflowError::ProjectNotFound(id.to_string()))?;
        validate_transition(project.status, new_status)?;

        let from = project.status;
        project.status = new_status;
        if new_status == ProjectStatus::Executing && project.started_at.is_none() {
            project.started_at = Some(self.clock.now_unix());
        }
        if new_status == ProjectStatus::Cancelled {
            project.cancel_requested_at = Some(self.clock.now_unix());
        }
        project.journal.push(JournalEntry {
            at_unix: self.clock.now_unix(),
            text: format!("{from:?} -> {new_status:?}"),
        });

        self.backend
            .append_event(
                id,
                events::PROJECT_TRANSITIONED,
                actor,
                serde_json::json!({"from": format!("{from:?}"), "to": status_payload(new_status)}),
            )
            .await?;
        self.update(&mut project)?;
        Ok(project)
    }

    pub fn append_journal(&self, project: &mut Project, text: impl Into<String>) {
        project.journal.push(JournalEntry {
            at_unix: self.clock.now_unix(),
            text: text.into(),
        });
    }

    pub fn save_artifact(&self, project: &mut Project, name: &str, content: &[u8], mime_type: &str) -> Result<(), WorkflowError> {
        let slug = slugify(name);
        self.backend.save_artifact(&project.id, &slug, content)?;
        project.artifacts.push(crate::models::Artifact {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            path: format!("artifacts/{slug}"),
        });
        self.update(project)?;
        Ok(())
    }

    pub fn workspace_path(&self, id: &str) -> PathBuf {
        self.backend.project_dir(id)
    }

    pub fn events(&self, id: &str) -> Result<Vec<WorkflowEvent>, WorkflowError> {
        self.backend.list_events(id)
    }
}

fn status_payload(status: ProjectStatus) -> &'static str {
    match status {
        ProjectStatus::Planning => "planning",
        ProjectStatus::AwaitingApproval => "awaiting_approval",
        ProjectStatus::Executing => "executing",
        ProjectStatus::Reviewing => "reviewing",
        ProjectStatus::Paused => "paused",
        ProjectStatus::Done => "done",
        ProjectStatus::Failed => "failed",
        ProjectStatus::Cancelled => "cancelled",
    }
}
