use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::*;
use crate::errors::WorkspaceError;

type WsResult<T> = std::result::Result<T, WorkspaceError>;

/// Generate a prefixed random id, e.g. `task-6f1c…`.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Everything TickTrek persists. Serialized as a single JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub tickets: Vec<Ticket>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Per-user notification marks.
    #[serde(default)]
    pub seen: HashMap<String, SeenMarks>,
}

/// Result of deleting a project, for change broadcasts.
#[derive(Debug, Clone)]
pub struct ProjectRemoval {
    pub project: Project,
    pub removed_task_ids: Vec<String>,
    pub unlinked_ticket_ids: Vec<String>,
}

/// A changed or deleted team, plus the tasks that lost their assignee.
#[derive(Debug, Clone)]
pub struct TeamChange {
    pub team: Team,
    pub unassigned_tasks: Vec<Task>,
}

/// An updated project, plus the tasks that lost their assignee.
#[derive(Debug, Clone)]
pub struct ProjectChange {
    pub project: Project,
    pub unassigned_tasks: Vec<Task>,
}

/// A denied sign-up and what was detached from it.
#[derive(Debug, Clone)]
pub struct UserRemoval {
    pub user: User,
    pub team_ids: Vec<String>,
    pub unassigned_tasks: Vec<Task>,
}

pub const SEED_ORG_ID: &str = "ticktrek-inc";
pub const SEED_ADMIN_ID: &str = "user-1";
pub const SEED_ADMIN_EMAIL: &str = "admin.user@ticktrek-inc";

impl Snapshot {
    /// The initial data written when no data file exists yet.
    pub fn seeded(admin_password_hash: String) -> Self {
        Self {
            organizations: vec![Organization {
                id: SEED_ORG_ID.to_string(),
                name: "TickTrek Inc.".to_string(),
                invite_tokens: Vec::new(),
            }],
            users: vec![User {
                id: SEED_ADMIN_ID.to_string(),
                name: "Admin User".to_string(),
                email: SEED_ADMIN_EMAIL.to_string(),
                password_hash: admin_password_hash,
                role: UserRole::Admin,
                avatar: "https://picsum.photos/seed/admin/50".to_string(),
                organization_id: SEED_ORG_ID.to_string(),
                status: UserStatus::Active,
            }],
            ..Default::default()
        }
    }

    // ── Lookups ───────────────────────────────────────────────────────

    pub fn organization(&self, id: &str) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.id == id)
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }

    pub fn user_in(&self, org: &str, id: &str) -> WsResult<&User> {
        self.users
            .iter()
            .find(|u| u.id == id && u.organization_id == org)
            .ok_or_else(|| WorkspaceError::not_found("User", id))
    }

    pub fn team_in(&self, org: &str, id: &str) -> WsResult<&Team> {
        self.teams
            .iter()
            .find(|t| t.id == id && t.organization_id == org)
            .ok_or_else(|| WorkspaceError::not_found("Team", id))
    }

    pub fn project_in(&self, org: &str, id: &str) -> WsResult<&Project> {
        self.projects
            .iter()
            .find(|p| p.id == id && p.organization_id == org)
            .ok_or_else(|| WorkspaceError::not_found("Project", id))
    }

    pub fn task_in(&self, org: &str, id: &str) -> WsResult<&Task> {
        self.tasks
            .iter()
            .find(|t| t.id == id && self.project_in(org, &t.project_id).is_ok())
            .ok_or_else(|| WorkspaceError::not_found("Task", id))
    }

    pub fn ticket_in(&self, org: &str, id: &str) -> WsResult<&Ticket> {
        self.tickets
            .iter()
            .find(|t| t.id == id && t.organization_id == org)
            .ok_or_else(|| WorkspaceError::not_found("Ticket", id))
    }

    pub fn org_users<'a>(&'a self, org: &str) -> impl Iterator<Item = &'a User> {
        self.users.iter().filter(move |u| u.organization_id == org)
    }

    pub fn org_teams<'a>(&'a self, org: &str) -> impl Iterator<Item = &'a Team> {
        self.teams.iter().filter(move |t| t.organization_id == org)
    }

    pub fn org_projects<'a>(&'a self, org: &str) -> impl Iterator<Item = &'a Project> {
        self.projects.iter().filter(move |p| p.organization_id == org)
    }

    pub fn org_tasks<'a>(&'a self, org: &str) -> impl Iterator<Item = &'a Task> {
        self.tasks
            .iter()
            .filter(move |t| self.project_in(org, &t.project_id).is_ok())
    }

    pub fn org_tickets<'a>(&'a self, org: &str) -> impl Iterator<Item = &'a Ticket> {
        self.tickets.iter().filter(move |t| t.organization_id == org)
    }

    /// Members of every team assigned to the project, first-seen order, no duplicates.
    pub fn project_member_ids(&self, project: &Project) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for team in self.teams.iter().filter(|t| project.has_team(&t.id)) {
            for member in &team.member_ids {
                if !ids.contains(member) {
                    ids.push(member.clone());
                }
            }
        }
        ids
    }

    // ── Validation helpers ────────────────────────────────────────────

    fn require_text(field: &str, value: &str) -> WsResult<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(WorkspaceError::invalid(format!("{} is required", field)));
        }
        Ok(trimmed.to_string())
    }

    /// Team members must be distinct active `member`-role users of the
    /// organization, and the lead must be one of them.
    fn validated_members(
        &self,
        org: &str,
        lead_id: &str,
        member_ids: &[String],
    ) -> WsResult<Vec<String>> {
        let mut members: Vec<String> = Vec::new();
        for id in member_ids {
            if members.contains(id) {
                continue;
            }
            let user = self.user_in(org, id)?;
            if user.is_admin() {
                return Err(WorkspaceError::invalid(format!(
                    "{} is an admin and cannot be a team member",
                    user.name
                )));
            }
            if user.status != UserStatus::Active {
                return Err(WorkspaceError::invalid(format!(
                    "{} is awaiting approval and cannot join a team",
                    user.name
                )));
            }
            members.push(id.clone());
        }
        if members.is_empty() {
            return Err(WorkspaceError::invalid("A team needs at least one member"));
        }
        if !members.iter().any(|m| m == lead_id) {
            return Err(WorkspaceError::invalid("The team lead must be one of the team members"));
        }
        Ok(members)
    }

    fn validated_team_ids(&self, org: &str, team_ids: &[String]) -> WsResult<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        for id in team_ids {
            self.team_in(org, id)?;
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    fn validate_assignee(&self, project: &Project, assignee: Option<&str>) -> WsResult<()> {
        let Some(assignee) = assignee else {
            return Ok(());
        };
        if !self.project_member_ids(project).iter().any(|m| m == assignee) {
            return Err(WorkspaceError::invalid(format!(
                "User {} is not a member of any team assigned to project {}",
                assignee, project.name
            )));
        }
        let user = self.user_in(&project.organization_id, assignee)?;
        if user.status != UserStatus::Active {
            return Err(WorkspaceError::invalid(format!(
                "{} is awaiting approval and cannot be assigned tasks",
                user.name
            )));
        }
        Ok(())
    }

    /// Clear task assignees that are no longer on any team of the task's
    /// project. Returns the tasks that were changed.
    fn prune_orphan_assignees(&mut self, org: &str) -> Vec<Task> {
        let allowed: HashMap<String, Vec<String>> = self
            .org_projects(org)
            .map(|p| (p.id.clone(), self.project_member_ids(p)))
            .collect();
        let mut changed = Vec::new();
        for task in self.tasks.iter_mut() {
            let Some(members) = allowed.get(&task.project_id) else {
                continue;
            };
            if let Some(assignee) = &task.assignee_id
                && !members.contains(assignee)
            {
                task.assignee_id = None;
                changed.push(task.clone());
            }
        }
        changed
    }

    fn task_index(&self, org: &str, id: &str) -> WsResult<usize> {
        self.task_in(org, id)?;
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| WorkspaceError::not_found("Task", id))
    }

    fn ticket_index(&self, org: &str, id: &str) -> WsResult<usize> {
        self.tickets
            .iter()
            .position(|t| t.id == id && t.organization_id == org)
            .ok_or_else(|| WorkspaceError::not_found("Ticket", id))
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn add_task(&mut self, org: &str, new: NewTask) -> WsResult<Task> {
        let title = Self::require_text("Title", &new.title)?;
        let project = self.project_in(org, &new.project_id)?;
        self.validate_assignee(project, new.assignee_id.as_deref())?;
        let task = Task {
            id: new_id("task"),
            title,
            description: new.description.filter(|d| !d.trim().is_empty()),
            due_date: new.due_date,
            status: new.status,
            priority: new.priority,
            project_id: new.project_id,
            assignee_id: new.assignee_id,
            created_at: Utc::now(),
        };
        self.tasks.insert(0, task.clone());
        Ok(task)
    }

    pub fn update_task(&mut self, org: &str, id: &str, update: TaskUpdate) -> WsResult<Task> {
        let idx = self.task_index(org, id)?;
        let mut task = self.tasks[idx].clone();
        if let Some(title) = update.title {
            task.title = Self::require_text("Title", &title)?;
        }
        if let Some(description) = update.description {
            task.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(due) = update.due_date {
            task.due_date = due;
        }
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        if let Some(project_id) = update.project_id {
            task.project_id = project_id;
        }
        if let Some(assignee) = update.assignee_id {
            task.assignee_id = assignee;
        }
        let project = self.project_in(org, &task.project_id)?;
        self.validate_assignee(project, task.assignee_id.as_deref())?;
        self.tasks[idx] = task.clone();
        Ok(task)
    }

    pub fn move_task(&mut self, org: &str, id: &str, status: TaskStatus) -> WsResult<Task> {
        let idx = self.task_index(org, id)?;
        self.tasks[idx].status = status;
        Ok(self.tasks[idx].clone())
    }

    pub fn delete_task(&mut self, org: &str, id: &str) -> WsResult<Task> {
        let idx = self.task_index(org, id)?;
        Ok(self.tasks.remove(idx))
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn add_project(&mut self, org: &str, new: NewProject) -> WsResult<Project> {
        let name = Self::require_text("Project name", &new.name)?;
        let team_ids = self.validated_team_ids(org, &new.team_ids)?;
        let project = Project {
            id: new_id("proj"),
            organization_id: org.to_string(),
            name,
            description: new.description.trim().to_string(),
            team_ids,
            created_at: Utc::now(),
        };
        self.projects.insert(0, project.clone());
        Ok(project)
    }

    pub fn update_project(
        &mut self,
        org: &str,
        id: &str,
        update: ProjectUpdate,
    ) -> WsResult<ProjectChange> {
        let mut project = self.project_in(org, id)?.clone();
        if let Some(name) = update.name {
            project.name = Self::require_text("Project name", &name)?;
        }
        if let Some(description) = update.description {
            project.description = description.trim().to_string();
        }
        if let Some(team_ids) = update.team_ids {
            project.team_ids = self.validated_team_ids(org, &team_ids)?;
        }
        if let Some(slot) = self.projects.iter_mut().find(|p| p.id == id) {
            *slot = project.clone();
        }
        let unassigned_tasks = self.prune_orphan_assignees(org);
        Ok(ProjectChange {
            project,
            unassigned_tasks,
        })
    }

    /// Delete a project, its tasks, and unlink tickets that referenced it.
    pub fn delete_project(&mut self, org: &str, id: &str) -> WsResult<ProjectRemoval> {
        let project = self.project_in(org, id)?.clone();
        self.projects.retain(|p| p.id != id);

        let mut removed_task_ids = Vec::new();
        self.tasks.retain(|t| {
            if t.project_id == id {
                removed_task_ids.push(t.id.clone());
                false
            } else {
                true
            }
        });

        let mut unlinked_ticket_ids = Vec::new();
        for ticket in self.tickets.iter_mut() {
            if ticket.project_id.as_deref() == Some(id) {
                ticket.project_id = None;
                unlinked_ticket_ids.push(ticket.id.clone());
            }
        }

        Ok(ProjectRemoval {
            project,
            removed_task_ids,
            unlinked_ticket_ids,
        })
    }

    // ── Teams ─────────────────────────────────────────────────────────

    pub fn add_team(&mut self, org: &str, new: NewTeam) -> WsResult<Team> {
        let name = Self::require_text("Team name", &new.name)?;
        let member_ids = self.validated_members(org, &new.lead_id, &new.member_ids)?;
        let team = Team {
            id: new_id("team"),
            organization_id: org.to_string(),
            name,
            lead_id: new.lead_id,
            member_ids,
        };
        self.teams.insert(0, team.clone());
        Ok(team)
    }

    pub fn update_team(&mut self, org: &str, id: &str, update: NewTeam) -> WsResult<TeamChange> {
        self.team_in(org, id)?;
        let name = Self::require_text("Team name", &update.name)?;
        let member_ids = self.validated_members(org, &update.lead_id, &update.member_ids)?;
        let team = Team {
            id: id.to_string(),
            organization_id: org.to_string(),
            name,
            lead_id: update.lead_id,
            member_ids,
        };
        if let Some(slot) = self.teams.iter_mut().find(|t| t.id == id) {
            *slot = team.clone();
        }
        let unassigned_tasks = self.prune_orphan_assignees(org);
        Ok(TeamChange {
            team,
            unassigned_tasks,
        })
    }

    /// Delete a team and detach it from every project it was assigned to.
    pub fn delete_team(&mut self, org: &str, id: &str) -> WsResult<TeamChange> {
        let team = self.team_in(org, id)?.clone();
        self.teams.retain(|t| t.id != id);
        for project in self.projects.iter_mut() {
            project.team_ids.retain(|t| t != id);
        }
        let unassigned_tasks = self.prune_orphan_assignees(org);
        Ok(TeamChange {
            team,
            unassigned_tasks,
        })
    }

    // ── Tickets ───────────────────────────────────────────────────────

    pub fn raise_ticket(
        &mut self,
        org: &str,
        raised_by: &str,
        new: NewTicket,
    ) -> WsResult<Ticket> {
        let title = Self::require_text("Title", &new.title)?;
        let message = Self::require_text("Message", &new.message)?;
        self.user_in(org, raised_by)?;
        let assignee = self.user_in(org, &new.assignee_id)?;
        if assignee.status != UserStatus::Active {
            return Err(WorkspaceError::invalid(format!(
                "{} is awaiting approval and cannot be assigned tickets",
                assignee.name
            )));
        }
        if new.assignee_id == raised_by {
            return Err(WorkspaceError::invalid("A ticket cannot be assigned to its author"));
        }
        if let Some(project_id) = &new.project_id {
            self.project_in(org, project_id)?;
        }
        let ticket = Ticket {
            id: new_id("ticket"),
            organization_id: org.to_string(),
            title,
            message,
            raised_by: raised_by.to_string(),
            assignee_id: new.assignee_id,
            status: TicketStatus::Open,
            replies: Vec::new(),
            created_at: Utc::now(),
            priority: new.priority,
            project_id: new.project_id,
        };
        self.tickets.insert(0, ticket.clone());
        Ok(ticket)
    }

    pub fn set_ticket_status(
        &mut self,
        org: &str,
        id: &str,
        status: TicketStatus,
    ) -> WsResult<Ticket> {
        let idx = self.ticket_index(org, id)?;
        self.tickets[idx].status = status;
        Ok(self.tickets[idx].clone())
    }

    pub fn add_ticket_reply(
        &mut self,
        org: &str,
        id: &str,
        author_id: &str,
        message: &str,
    ) -> WsResult<Ticket> {
        let message = Self::require_text("Reply", message)?;
        let idx = self.ticket_index(org, id)?;
        if self.tickets[idx].status == TicketStatus::Closed {
            return Err(WorkspaceError::invalid("Cannot reply to a closed ticket"));
        }
        self.tickets[idx].replies.push(TicketReply {
            id: new_id("reply"),
            author_id: author_id.to_string(),
            message,
            created_at: Utc::now(),
        });
        Ok(self.tickets[idx].clone())
    }

    // ── Users & organizations ─────────────────────────────────────────

    pub fn add_organization(&mut self, org: Organization) -> WsResult<()> {
        if self.organization(&org.id).is_some() {
            return Err(WorkspaceError::Conflict(
                "An organization with this name already exists.".into(),
            ));
        }
        self.organizations.push(org);
        Ok(())
    }

    pub fn add_user(&mut self, user: User) -> WsResult<()> {
        if self.user_by_email(&user.email).is_some() {
            return Err(WorkspaceError::Conflict(
                "A user with this email already exists in the organization.".into(),
            ));
        }
        self.users.push(user);
        Ok(())
    }

    pub fn approve_user(&mut self, org: &str, id: &str) -> WsResult<User> {
        self.user_in(org, id)?;
        let user = self
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| WorkspaceError::not_found("User", id))?;
        user.status = UserStatus::Active;
        Ok(user.clone())
    }

    /// Reject a pending sign-up. Active users cannot be removed this way.
    ///
    /// The user is taken off every team and their tasks are unassigned. A
    /// team lead is refused until the team gets another lead.
    pub fn deny_user(&mut self, org: &str, id: &str) -> WsResult<UserRemoval> {
        let user = self.user_in(org, id)?.clone();
        if user.status != UserStatus::PendingApproval {
            return Err(WorkspaceError::invalid(format!(
                "{} is not awaiting approval",
                user.name
            )));
        }
        if let Some(team) = self.org_teams(org).find(|t| t.lead_id == id) {
            return Err(WorkspaceError::Conflict(format!(
                "{} leads team {}; assign another lead first",
                user.name, team.name
            )));
        }

        let mut team_ids = Vec::new();
        for team in self.teams.iter_mut().filter(|t| t.organization_id == org) {
            if team.has_member(id) {
                team.member_ids.retain(|m| m != id);
                team_ids.push(team.id.clone());
            }
        }
        self.users.retain(|u| u.id != id);
        self.seen.remove(id);
        let unassigned_tasks = self.prune_orphan_assignees(org);
        Ok(UserRemoval {
            user,
            team_ids,
            unassigned_tasks,
        })
    }

    pub fn add_invite_token(&mut self, org: &str, token: String) -> WsResult<()> {
        let org = self
            .organizations
            .iter_mut()
            .find(|o| o.id == org)
            .ok_or_else(|| WorkspaceError::not_found("Organization", org))?;
        org.invite_tokens.push(token);
        Ok(())
    }

    /// Remove an invite token, returning the organization it belonged to.
    pub fn consume_invite_token(&mut self, token: &str) -> Option<Organization> {
        let org = self
            .organizations
            .iter_mut()
            .find(|o| o.invite_tokens.iter().any(|t| t == token))?;
        org.invite_tokens.retain(|t| t != token);
        Some(org.clone())
    }

    pub fn mark_seen(&mut self, user_id: &str, marks: SeenMarks) {
        self.seen.insert(user_id.to_string(), marks);
    }
}

// ── Persistence ───────────────────────────────────────────────────────

/// The snapshot plus where it lives on disk (`None` for in-memory stores).
///
/// A file-backed store holds an exclusive lock on `<data>.lock` until it is
/// dropped, so only one process writes a given data file.
pub struct JsonStore {
    path: Option<PathBuf>,
    snapshot: Snapshot,
    _lock: Option<File>,
}

impl JsonStore {
    /// Open (or create and seed) the JSON data file at `path`.
    pub fn open(path: &Path, seed_admin_password: &str) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        let lock = Self::acquire_lock(path)?;

        if !path.exists() {
            let hash = super::auth::hash_password(seed_admin_password)
                .context("Failed to hash seed admin password")?;
            let store = Self {
                path: Some(path.to_path_buf()),
                snapshot: Snapshot::seeded(hash),
                _lock: Some(lock),
            };
            store.save()?;
            tracing::info!(path = %path.display(), "Seeded new data file");
            return Ok(store);
        }

        let snapshot = Self::load(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            snapshot,
            _lock: Some(lock),
        })
    }

    /// Lock file guarding `path`. Fails if another process holds it.
    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        FileExt::try_lock_exclusive(&file).map_err(|_| {
            anyhow!(
                "Data file {} is in use by another TickTrek process (lock held on {})",
                path.display(),
                lock_path.display()
            )
        })?;
        Ok(file)
    }

    /// An unsaved store for tests, starting from the given snapshot.
    pub fn in_memory(snapshot: Snapshot) -> Self {
        Self {
            path: None,
            snapshot,
            _lock: None,
        }
    }

    /// Read the data file. A corrupt or empty file is moved aside and an
    /// empty snapshot is returned in its place.
    fn load(path: &Path) -> Result<Snapshot> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data file: {}", path.display()))?;
        if content.trim().is_empty() {
            tracing::warn!(
                path = %path.display(),
                "Data file is empty, starting from an empty snapshot"
            );
            return Ok(Snapshot::default());
        }
        match serde_json::from_str(&content) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                let backup = path.with_extension(format!("corrupt-{}", Utc::now().timestamp()));
                std::fs::rename(path, &backup).with_context(|| {
                    format!("Failed to move corrupt data file to {}", backup.display())
                })?;
                tracing::error!(
                    error = %e,
                    backup = %backup.display(),
                    "Data file is corrupt, starting from an empty snapshot"
                );
                Ok(Snapshot::default())
            }
        }
    }

    /// Write the snapshot as pretty JSON via a temp file + rename.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content =
            serde_json::to_string_pretty(&self.snapshot).context("Failed to serialize data")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write data file: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace data file: {}", path.display()))?;
        Ok(())
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Apply `f` to the snapshot. On error, or when saving fails, the
    /// snapshot is restored to its previous state.
    pub fn apply<F, R, E>(&mut self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut Snapshot) -> std::result::Result<R, E>,
        E: From<WorkspaceError>,
    {
        let before = self.snapshot.clone();
        let out = match f(&mut self.snapshot) {
            Ok(out) => out,
            Err(e) => {
                self.snapshot = before;
                return Err(e);
            }
        };
        if let Err(e) = self.save() {
            self.snapshot = before;
            return Err(WorkspaceError::Storage(e).into());
        }
        Ok(out)
    }
}

/// Async-safe handle to the store.
///
/// Wraps `JsonStore` behind `Arc<Mutex>` and runs every access on tokio's
/// blocking pool, since saves do synchronous file I/O.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<std::sync::Mutex<JsonStore>>,
}

impl StoreHandle {
    pub fn new(store: JsonStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a read-only closure against the snapshot on a blocking thread.
    pub async fn call<F, R, E>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&Snapshot) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<WorkspaceError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = inner.lock().map_err(|_| WorkspaceError::LockPoisoned)?;
            f(guard.snapshot())
        })
        .await
        .map_err(|e| WorkspaceError::Storage(anyhow::anyhow!("Store task panicked: {}", e)))?
    }

    /// Run a mutating closure and persist the result if it succeeds.
    pub async fn mutate<F, R, E>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut Snapshot) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<WorkspaceError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().map_err(|_| WorkspaceError::LockPoisoned)?;
            guard.apply(f)
        })
        .await
        .map_err(|e| WorkspaceError::Storage(anyhow::anyhow!("Store task panicked: {}", e)))?
    }
}
