//! Role- and membership-based visibility rules.
//!
//! Everything here is a pure function of a [`Snapshot`] and the [`Viewer`]
//! asking. Rules, by standing:
//!
//! | Question                  | Admin            | Team lead                                   | Member                      |
//! |---------------------------|------------------|---------------------------------------------|-----------------------------|
//! | Visible projects          | all in org       | projects of their teams                     | projects of their teams     |
//! | Board tasks               | all in org       | tasks of projects they lead + assigned ones | tasks assigned to them      |
//! | Edit / delete a task      | yes              | if they lead a team on the task's project   | no                          |
//! | Create tasks in           | all projects     | projects of teams they lead                 | nowhere                     |
//! | Raise tickets to          | team leads       | their teammates                             | their teammates             |
//!
//! Project, team, user and invite management is admin-only.

use super::models::*;
use super::store::Snapshot;
use crate::errors::WorkspaceError;

type WsResult<T> = std::result::Result<T, WorkspaceError>;

/// A user together with their derived team relationships.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub user: User,
    /// Ids of teams the user is a member of.
    pub team_ids: Vec<String>,
    /// Ids of teams the user leads.
    pub led_team_ids: Vec<String>,
    pub standing: Standing,
}

impl Viewer {
    /// Resolve the viewer for `user_id`. Users awaiting approval are refused.
    pub fn resolve(snap: &Snapshot, user_id: &str) -> WsResult<Self> {
        let user = snap
            .user(user_id)
            .ok_or_else(|| WorkspaceError::not_found("User", user_id))?
            .clone();
        if !user.is_active() {
            return Err(WorkspaceError::AwaitingApproval);
        }
        Ok(Self::from_user(snap, user))
    }

    /// Derive memberships without the approval check.
    pub fn from_user(snap: &Snapshot, user: User) -> Self {
        let org_teams: Vec<&Team> = snap.org_teams(&user.organization_id).collect();
        let team_ids: Vec<String> = org_teams
            .iter()
            .filter(|t| t.has_member(&user.id))
            .map(|t| t.id.clone())
            .collect();
        let led_team_ids: Vec<String> = org_teams
            .iter()
            .filter(|t| t.lead_id == user.id)
            .map(|t| t.id.clone())
            .collect();
        let standing = if user.is_admin() {
            Standing::Admin
        } else if !led_team_ids.is_empty() {
            Standing::TeamLead
        } else {
            Standing::Member
        };
        Self {
            user,
            team_ids,
            led_team_ids,
            standing,
        }
    }

    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn org(&self) -> &str {
        &self.user.organization_id
    }

    pub fn is_admin(&self) -> bool {
        self.standing == Standing::Admin
    }

    pub fn is_lead(&self) -> bool {
        !self.led_team_ids.is_empty()
    }

    pub fn require_admin(&self, action: &str) -> WsResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(WorkspaceError::forbidden(format!(
                "Only administrators can {}",
                action
            )))
        }
    }

    fn in_my_teams(&self, project: &Project) -> bool {
        project.team_ids.iter().any(|t| self.team_ids.contains(t))
    }

    fn in_led_teams(&self, project: &Project) -> bool {
        project.team_ids.iter().any(|t| self.led_team_ids.contains(t))
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn visible_projects<'a>(&self, snap: &'a Snapshot) -> Vec<&'a Project> {
        snap.org_projects(self.org())
            .filter(|p| self.is_admin() || self.in_my_teams(p))
            .collect()
    }

    pub fn can_view_project(&self, project: &Project) -> bool {
        project.organization_id == self.user.organization_id
            && (self.is_admin() || self.in_my_teams(project))
    }

    pub fn visible_project<'a>(&self, snap: &'a Snapshot, id: &str) -> WsResult<&'a Project> {
        let project = snap.project_in(self.org(), id)?;
        if self.can_view_project(project) {
            Ok(project)
        } else {
            // Do not reveal projects outside the viewer's teams.
            Err(WorkspaceError::not_found("Project", id))
        }
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    /// Tasks and projects on the viewer's Kanban board, optionally narrowed
    /// to one project.
    pub fn board_scope<'a>(
        &self,
        snap: &'a Snapshot,
        project_filter: Option<&str>,
    ) -> BoardScope<'a> {
        let org = self.org();
        let (projects, tasks, title, description): (Vec<&Project>, Vec<&Task>, &str, &str) =
            match self.standing {
                Standing::Admin => (
                    snap.org_projects(org).collect(),
                    snap.org_tasks(org).collect(),
                    "Global Task Board",
                    "Overview of all tasks across all projects.",
                ),
                Standing::TeamLead => {
                    let projects: Vec<&Project> = snap
                        .org_projects(org)
                        .filter(|p| self.in_my_teams(p))
                        .collect();
                    let tasks: Vec<&Task> = snap
                        .org_tasks(org)
                        .filter(|t| {
                            self.is_assignee(t)
                                || snap
                                    .project_in(org, &t.project_id)
                                    .is_ok_and(|p| self.in_led_teams(p))
                        })
                        .collect();
                    (
                        projects,
                        tasks,
                        "My Team's Tasks",
                        "All tasks from projects you lead, plus tasks assigned to you.",
                    )
                }
                Standing::Member => (
                    snap.org_projects(org)
                        .filter(|p| self.in_my_teams(p))
                        .collect(),
                    snap.org_tasks(org).filter(|t| self.is_assignee(t)).collect(),
                    "My Assigned Tasks",
                    "All tasks that are directly assigned to you.",
                ),
            };

        let tasks = match project_filter {
            Some(project_id) => tasks
                .into_iter()
                .filter(|t| t.project_id == project_id)
                .collect(),
            None => tasks,
        };

        BoardScope {
            title: title.to_string(),
            description: description.to_string(),
            projects,
            tasks,
        }
    }

    pub fn is_assignee(&self, task: &Task) -> bool {
        task.assignee_id.as_deref() == Some(self.id())
    }

    /// A task is visible when it is on the viewer's board.
    pub fn can_view_task(&self, snap: &Snapshot, task: &Task) -> bool {
        self.board_scope(snap, Some(&task.project_id))
            .tasks
            .iter()
            .any(|t| t.id == task.id)
    }

    pub fn visible_task<'a>(&self, snap: &'a Snapshot, id: &str) -> WsResult<&'a Task> {
        let task = snap.task_in(self.org(), id)?;
        if self.can_view_task(snap, task) {
            Ok(task)
        } else {
            Err(WorkspaceError::not_found("Task", id))
        }
    }

    /// Admins, and leads of a team assigned to the task's project.
    pub fn can_edit_task(&self, snap: &Snapshot, task: &Task) -> bool {
        if self.is_admin() {
            return true;
        }
        snap.project_in(self.org(), &task.project_id)
            .is_ok_and(|p| self.in_led_teams(p))
    }

    /// Moving between Kanban columns is allowed for anything on the board.
    pub fn can_move_task(&self, snap: &Snapshot, task: &Task) -> bool {
        self.can_view_task(snap, task)
    }

    pub fn can_create_task(&self) -> bool {
        self.is_admin() || self.is_lead()
    }

    /// Projects the viewer may create tasks in.
    pub fn task_projects<'a>(&self, snap: &'a Snapshot) -> Vec<&'a Project> {
        match self.standing {
            Standing::Admin => snap.org_projects(self.org()).collect(),
            Standing::TeamLead => snap
                .org_projects(self.org())
                .filter(|p| self.in_led_teams(p))
                .collect(),
            Standing::Member => Vec::new(),
        }
    }

    pub fn require_task_project(&self, snap: &Snapshot, project_id: &str) -> WsResult<()> {
        if !self.can_create_task() {
            return Err(WorkspaceError::forbidden(
                "Only administrators and team leads can create tasks",
            ));
        }
        snap.project_in(self.org(), project_id)?;
        if self.task_projects(snap).iter().any(|p| p.id == project_id) {
            Ok(())
        } else {
            Err(WorkspaceError::forbidden(
                "You can only manage tasks in projects your teams lead",
            ))
        }
    }

    // ── Tickets ───────────────────────────────────────────────────────

    /// Tickets raised by or assigned to the viewer, newest first.
    pub fn visible_tickets<'a>(&self, snap: &'a Snapshot) -> Vec<&'a Ticket> {
        let mut tickets: Vec<&Ticket> = snap
            .org_tickets(self.org())
            .filter(|t| t.involves(self.id()))
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tickets
    }

    pub fn visible_ticket<'a>(&self, snap: &'a Snapshot, id: &str) -> WsResult<&'a Ticket> {
        let ticket = snap.ticket_in(self.org(), id)?;
        if ticket.involves(self.id()) {
            Ok(ticket)
        } else {
            Err(WorkspaceError::not_found("Ticket", id))
        }
    }

    /// Admins raise tickets to team leads; everyone else to their teammates.
    pub fn ticket_assignees<'a>(&self, snap: &'a Snapshot) -> Vec<&'a User> {
        let org = self.org();
        if self.is_admin() {
            let lead_ids: Vec<&str> = snap.org_teams(org).map(|t| t.lead_id.as_str()).collect();
            snap.org_users(org)
                .filter(|u| lead_ids.contains(&u.id.as_str()))
                .collect()
        } else {
            let teammates: Vec<&str> = snap
                .org_teams(org)
                .filter(|t| self.team_ids.contains(&t.id))
                .flat_map(|t| t.member_ids.iter().map(String::as_str))
                .collect();
            snap.org_users(org)
                .filter(|u| u.id != self.user.id && teammates.contains(&u.id.as_str()))
                .collect()
        }
    }

    /// Projects a ticket may be linked to.
    pub fn ticket_projects<'a>(&self, snap: &'a Snapshot) -> Vec<&'a Project> {
        self.visible_projects(snap)
    }

    pub fn require_ticket_target(&self, snap: &Snapshot, new: &NewTicket) -> WsResult<()> {
        if !self
            .ticket_assignees(snap)
            .iter()
            .any(|u| u.id == new.assignee_id)
        {
            return Err(WorkspaceError::forbidden(
                "You cannot raise a ticket to this user",
            ));
        }
        if let Some(project_id) = &new.project_id {
            self.visible_project(snap, project_id)?;
        }
        Ok(())
    }

    pub fn can_reply_ticket(&self, ticket: &Ticket) -> bool {
        ticket.status == TicketStatus::Open && ticket.involves(self.id())
    }

    /// The assignee may open or close; the raiser may only reopen.
    pub fn can_set_ticket_status(&self, ticket: &Ticket, status: TicketStatus) -> bool {
        if ticket.assignee_id == self.user.id {
            return true;
        }
        ticket.raised_by == self.user.id
            && ticket.status == TicketStatus::Closed
            && status == TicketStatus::Open
    }

    // ── Navigation ────────────────────────────────────────────────────

    pub fn nav_items(&self) -> Vec<NavItem> {
        let mut pages = vec![
            (Page::Dashboard, "/dashboard", "Dashboard"),
            (Page::Kanban, "/dashboard/kanban", "Task Board"),
            (Page::Projects, "/dashboard/projects", "Projects"),
        ];
        if self.is_admin() {
            pages.push((Page::Teams, "/dashboard/teams", "Teams"));
        }
        pages.extend([
            (Page::Tickets, "/dashboard/tickets", "Tickets"),
            (Page::Settings, "/dashboard/settings", "Settings"),
            (Page::Support, "/dashboard/support", "Support"),
        ]);
        pages
            .into_iter()
            .map(|(page, href, label)| NavItem {
                href: href.to_string(),
                label: label.to_string(),
                page,
            })
            .collect()
    }

    pub fn me(&self) -> Me {
        Me {
            user: PublicUser::from(&self.user),
            standing: self.standing,
            standing_label: self.standing.label().to_string(),
            nav: self.nav_items(),
        }
    }
}

/// Tasks and projects on one viewer's board.
#[derive(Debug, Clone)]
pub struct BoardScope<'a> {
    pub title: String,
    pub description: String,
    pub projects: Vec<&'a Project>,
    pub tasks: Vec<&'a Task>,
}

/// Users on any team assigned to the project, in team order.
pub fn assignable_users<'a>(snap: &'a Snapshot, project: &Project) -> Vec<&'a User> {
    snap.project_member_ids(project)
        .iter()
        .filter_map(|id| snap.user(id))
        .collect()
}

/// Lead of the project's first team.
pub fn project_team_lead<'a>(snap: &'a Snapshot, project: &Project) -> Option<&'a User> {
    let first = project.team_ids.first()?;
    let team = snap.team_in(&project.organization_id, first).ok()?;
    snap.user(&team.lead_id)
}
