use serde::{Deserialize, Serialize};

use crate::models::ProjectStatus;

/// Delimits the block of a registry markdown file a human may hand-edit to
/// override the stored plan wholesale. Kept distinct from the YAML
/// frontmatter so an editor can replace the plan text without touching
/// `tags`/`status`.
const PLAN_OVERRIDE_START: &str = "<!-- WAYFARER:PLAN-OVERRIDE-START -->";
const PLAN_OVERRIDE_END: &str = "<!-- WAYFARER:PLAN-OVERRIDE-END -->";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frontmatter {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub plan_hash: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedRegistry {
    pub frontmatter: Frontmatter,
    pub heading: Option<String>,
    pub plan_override: Option<String>,
}

pub fn map_status(raw: &str) -> ProjectStatus {
    match raw.to_lowercase().as_str() {
        "planning" => ProjectStatus::Planning,
        "awaiting_approval" => ProjectStatus::AwaitingApproval,
        "reviewing" => ProjectStatus::Reviewing,
        "paused" => ProjectStatus::Paused,
        "done" => ProjectStatus::Done,
        "failed" => ProjectStatus::Failed,
        "cancelled" | "canceled" => ProjectStatus::Cancelled,
        // "active" and anything unrecognized default to executing, matching
        // the historical markdown convention this registry format grew out of.
        _ => ProjectStatus::Executing,
    }
}

/// Minimal registry markdown for a project with no phases yet: just
/// enough frontmatter to exist as a human-browsable file without risking
/// a later checkpoint clobbering hand-authored content.
pub fn render_minimal(id: &str, goal: &str, tags: &[String], created: &str) -> String {
    let frontmatter = Frontmatter {
        title: Some(goal.to_string()),
        status: Some("planning".to_string()),
        tags: tags.to_vec(),
        plan_hash: None,
        id: Some(id.to_string()),
        created: Some(created.to_string()),
        updated: Some(created.to_string()),
    };
    let yaml = serde_yaml::to_string(&frontmatter).unwrap_or_default();
    format!("---\n{yaml}---\n\n# {goal}\n")
}

/// Full registry rendering from a checkpointed project: re-renders the
/// registry markdown from the canonical checkpoint.
pub fn render_full(project: &crate::models::Project, created: &str, updated: &str) -> String {
    let frontmatter = Frontmatter {
        title: Some(project.goal.clone()),
        status: Some(status_str(project.status).to_string()),
        tags: project.tags.clone(),
        plan_hash: project.plan_hash.clone(),
        id: Some(project.id.clone()),
        created: Some(created.to_string()),
        updated: Some(updated.to_string()),
    };
    let yaml = serde_yaml::to_string(&frontmatter).unwrap_or_default();

    let mut body = format!("---\n{yaml}---\n\n# {}\n\n", project.goal);
    for phase in &project.phases {
        body.push_str(&format!("## {} ({:?})\n\n", phase.name, phase.status));
        for task in &phase.tasks {
            body.push_str(&format!("- [{}] {}\n", task.id, task.description));
        }
        body.push('\n');
    }
    body.push_str(PLAN_OVERRIDE_START);
    body.push('\n');
    body.push_str(PLAN_OVERRIDE_END);
    body.push('\n');
    body
}

fn status_str(status: ProjectStatus) -> &'static str {
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

/// Parse a registry markdown file's frontmatter, first `# ` heading, and
/// any plan-override block.
pub fn parse(markdown: &str) -> Option<ParsedRegistry> {
    let rest = markdown.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let yaml = &rest[..end];
    let body = &rest[end + 4..];
    let frontmatter: Frontmatter = serde_yaml::from_str(yaml).ok()?;

    let heading = body
        .lines()
        .find(|line| line.trim_start().starts_with("# "))
        .map(|line| line.trim_start().trim_start_matches("# ").to_string());

    let plan_override = body.find(PLAN_OVERRIDE_START).and_then(|start| {
        body.find(PLAN_OVERRIDE_END).map(|end| {
            let content_start = start + PLAN_OVERRIDE_START.len();
            body[content_start..end].trim().to_string()
        })
    });

    Some(ParsedRegistry {
        frontmatter,
        heading,
        plan_override,
    })
}
