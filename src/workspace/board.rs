//! Read-only views derived from a snapshot for one viewer: the Kanban board,
//! task lists and dashboards.

use serde::Deserialize;

use super::access::{BoardScope, Viewer, project_team_lead};
use super::models::*;
use super::store::Snapshot;

/// Filters for task lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    /// Case-insensitive substring of the title or description.
    pub search: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
}

impl TaskQuery {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status
            && task.status != status
        {
            return false;
        }
        if let Some(priority) = self.priority
            && task.priority != priority
        {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                task.title.to_lowercase().contains(&needle)
                    || task
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            }
        }
    }
}

pub fn task_card(snap: &Snapshot, viewer: &Viewer, task: &Task) -> TaskCard {
    let org = viewer.org();
    TaskCard {
        task: task.clone(),
        project_name: snap
            .project_in(org, &task.project_id)
            .ok()
            .map(|p| p.name.clone()),
        assignee: task
            .assignee_id
            .as_deref()
            .and_then(|id| snap.user_in(org, id).ok())
            .map(PublicUser::from),
        can_edit: viewer.can_edit_task(snap, task),
    }
}

/// Three columns in workflow order.
pub fn build_board(snap: &Snapshot, viewer: &Viewer, scope: BoardScope<'_>) -> BoardView {
    let columns = TaskStatus::ALL
        .iter()
        .map(|&status| BoardColumn {
            status,
            tasks: scope
                .tasks
                .iter()
                .filter(|t| t.status == status)
                .map(|t| task_card(snap, viewer, t))
                .collect(),
        })
        .collect();

    BoardView {
        title: scope.title,
        description: scope.description,
        available_projects: scope.projects.into_iter().cloned().collect(),
        columns,
    }
}

/// Tasks on the viewer's board that match `query`.
pub fn list_tasks(
    snap: &Snapshot,
    viewer: &Viewer,
    project: Option<&str>,
    query: &TaskQuery,
) -> Vec<TaskCard> {
    viewer
        .board_scope(snap, project)
        .tasks
        .into_iter()
        .filter(|t| query.matches(t))
        .map(|t| task_card(snap, viewer, t))
        .collect()
}

/// Percentage of completed tasks, rounded; 0 when there are none.
pub fn progress(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (completed as f64 / total as f64 * 100.0).round() as u32
}

fn progress_entry<'a>(
    id: &str,
    name: &str,
    tasks: impl Iterator<Item = &'a Task>,
) -> ProgressEntry {
    let (mut total, mut completed) = (0, 0);
    for task in tasks {
        total += 1;
        if task.status == TaskStatus::Completed {
            completed += 1;
        }
    }
    ProgressEntry {
        id: id.to_string(),
        name: name.to_string(),
        progress: progress(completed, total),
        total_tasks: total,
        completed_tasks: completed,
    }
}

pub fn admin_dashboard(snap: &Snapshot, viewer: &Viewer) -> AdminDashboard {
    let org = viewer.org();
    let team_progress = snap
        .org_teams(org)
        .map(|team| {
            let project_ids: Vec<&str> = snap
                .org_projects(org)
                .filter(|p| p.has_team(&team.id))
                .map(|p| p.id.as_str())
                .collect();
            progress_entry(
                &team.id,
                &team.name,
                snap.org_tasks(org)
                    .filter(|t| project_ids.contains(&t.project_id.as_str())),
            )
        })
        .collect();

    let project_progress = snap
        .org_projects(org)
        .map(|project| {
            progress_entry(
                &project.id,
                &project.name,
                snap.org_tasks(org).filter(|t| t.project_id == project.id),
            )
        })
        .collect();

    AdminDashboard {
        team_progress,
        project_progress,
    }
}

pub fn member_dashboard(snap: &Snapshot, viewer: &Viewer, query: &TaskQuery) -> MemberDashboard {
    let tasks = snap
        .org_tasks(viewer.org())
        .filter(|t| viewer.is_assignee(t) && query.matches(t))
        .map(|t| task_card(snap, viewer, t))
        .collect();
    MemberDashboard {
        tasks,
        can_add_task: viewer.can_create_task(),
    }
}

pub fn dashboard(snap: &Snapshot, viewer: &Viewer, query: &TaskQuery) -> Dashboard {
    if viewer.is_admin() {
        Dashboard::Admin(admin_dashboard(snap, viewer))
    } else {
        Dashboard::Member(member_dashboard(snap, viewer, query))
    }
}

pub fn project_detail(snap: &Snapshot, project: &Project) -> ProjectDetail {
    ProjectDetail {
        project: project.clone(),
        teams: project
            .team_ids
            .iter()
            .filter_map(|id| snap.team_in(&project.organization_id, id).ok())
            .cloned()
            .collect(),
        team_lead: project_team_lead(snap, project).map(PublicUser::from),
    }
}

pub fn team_detail(snap: &Snapshot, team: &Team) -> TeamDetail {
    let lead = snap.user(&team.lead_id);
    let mut members: Vec<PublicUser> = lead.into_iter().map(PublicUser::from).collect();
    members.extend(
        team.member_ids
            .iter()
            .filter(|id| **id != team.lead_id)
            .filter_map(|id| snap.user(id))
            .map(PublicUser::from),
    );
    TeamDetail {
        team: team.clone(),
        lead: lead.map(PublicUser::from),
        members,
    }
}

pub fn ticket_view(snap: &Snapshot, viewer: &Viewer, ticket: &Ticket) -> TicketView {
    let org = viewer.org();
    let name_of = |id: &str| snap.user_in(org, id).ok().map(|u| u.name.clone());
    TicketView {
        ticket: ticket.clone(),
        raised_by_name: name_of(&ticket.raised_by),
        assignee_name: name_of(&ticket.assignee_id),
        project_name: ticket
            .project_id
            .as_deref()
            .and_then(|id| snap.project_in(org, id).ok())
            .map(|p| p.name.clone()),
        can_reply: viewer.can_reply_ticket(ticket),
        can_close: viewer.can_set_ticket_status(ticket, TicketStatus::Closed)
            && ticket.status == TicketStatus::Open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::store::fixtures::snapshot;

    fn viewer(snap: &Snapshot, id: &str) -> Viewer {
        Viewer::resolve(snap, id).unwrap()
    }

    #[test]
    fn test_progress_rounding() {
        assert_eq!(progress(0, 0), 0);
        assert_eq!(progress(1, 3), 33);
        assert_eq!(progress(2, 3), 67);
        assert_eq!(progress(1, 2), 50);
        assert_eq!(progress(3, 3), 100);
    }

    #[test]
    fn test_board_columns_in_workflow_order() {
        let snap = snapshot();
        let admin = viewer(&snap, "user-1");
        let board = build_board(&snap, &admin, admin.board_scope(&snap, None));

        let statuses: Vec<TaskStatus> = board.columns.iter().map(|c| c.status).collect();
        assert_eq!(statuses, TaskStatus::ALL.to_vec());
        assert_eq!(board.columns[0].tasks.len(), 2);
        assert_eq!(board.columns[1].tasks.len(), 2);
        assert_eq!(board.columns[2].tasks.len(), 1);
        assert_eq!(board.available_projects.len(), 2);
    }

    #[test]
    fn test_task_cards_resolve_names_and_edit_rights() {
        let snap = snapshot();
        let tina = viewer(&snap, "user-2");
        let board = build_board(&snap, &tina, tina.board_scope(&snap, None));
        let card = board
            .columns
            .iter()
            .flat_map(|c| &c.tasks)
            .find(|c| c.task.id == "task-1")
            .unwrap();
        assert_eq!(card.project_name.as_deref(), Some("Project Phoenix"));
        assert_eq!(card.assignee.as_ref().unwrap().name, "Mike Member");
        assert!(card.can_edit);
    }

    #[test]
    fn test_task_query_search_is_case_insensitive() {
        let snap = snapshot();
        let mike = viewer(&snap, "user-3");
        let query = TaskQuery {
            search: Some("DESCRIPTION OF TASK-4".into()),
            ..Default::default()
        };
        let cards = list_tasks(&snap, &mike, None, &query);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].task.id, "task-4");
    }

    #[test]
    fn test_task_query_status_and_priority() {
        let mut snap = snapshot();
        snap.tasks[0].priority = Priority::High;
        let admin = viewer(&snap, "user-1");

        let in_progress = TaskQuery {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        assert_eq!(list_tasks(&snap, &admin, None, &in_progress).len(), 2);

        let high = TaskQuery {
            priority: Some(Priority::High),
            ..Default::default()
        };
        let cards = list_tasks(&snap, &admin, None, &high);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].task.id, "task-1");
    }

    #[test]
    fn test_admin_dashboard_progress() {
        let snap = snapshot();
        let dash = admin_dashboard(&snap, &viewer(&snap, "user-1"));

        let team1 = dash.team_progress.iter().find(|e| e.id == "team-1").unwrap();
        assert_eq!((team1.completed_tasks, team1.total_tasks), (1, 3));
        assert_eq!(team1.progress, 33);

        let proj2 = dash
            .project_progress
            .iter()
            .find(|e| e.id == "proj-2")
            .unwrap();
        assert_eq!(proj2.progress, 0);
        assert_eq!(proj2.total_tasks, 2);
    }

    #[test]
    fn test_member_dashboard_only_own_tasks() {
        let snap = snapshot();
        let dash = member_dashboard(&snap, &viewer(&snap, "user-4"), &TaskQuery::default());
        assert_eq!(dash.tasks.len(), 2);
        assert!(dash.tasks.iter().all(|c| c.task.assignee_id.as_deref() == Some("user-4")));
        assert!(!dash.can_add_task);

        let lead_dash = member_dashboard(&snap, &viewer(&snap, "user-5"), &TaskQuery::default());
        assert!(lead_dash.can_add_task);
        assert!(lead_dash.tasks.is_empty());
    }

    #[test]
    fn test_dashboard_kind_by_standing() {
        let snap = snapshot();
        let q = TaskQuery::default();
        assert!(matches!(
            dashboard(&snap, &viewer(&snap, "user-1"), &q),
            Dashboard::Admin(_)
        ));
        assert!(matches!(
            dashboard(&snap, &viewer(&snap, "user-2"), &q),
            Dashboard::Member(_)
        ));
    }

    #[test]
    fn test_team_detail_puts_lead_first() {
        let snap = snapshot();
        let team = snap.teams[1].clone(); // lead user-5, members [user-4, user-5]
        let detail = team_detail(&snap, &team);
        let ids: Vec<&str> = detail.members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["user-5", "user-4"]);
        assert_eq!(detail.lead.unwrap().id, "user-5");
    }

    #[test]
    fn test_project_detail_resolves_teams_and_lead() {
        let snap = snapshot();
        let detail = project_detail(&snap, &snap.projects[0]);
        assert_eq!(detail.teams.len(), 1);
        assert_eq!(detail.team_lead.unwrap().id, "user-2");
    }
}
