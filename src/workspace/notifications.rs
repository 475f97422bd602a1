//! Per-page "something new" badges, computed against what the user had
//! seen when they last cleared a badge.

use super::access::Viewer;
use super::models::*;
use super::store::Snapshot;

/// Badge state for `viewer` given the current snapshot.
pub fn compute(snap: &Snapshot, viewer: &Viewer) -> NotificationState {
    let empty = SeenMarks::default();
    let seen = snap.seen.get(viewer.id()).unwrap_or(&empty);
    let org = viewer.org();
    let mut state = NotificationState::default();
    let mut flag = |page: Page| {
        state.set(page, true);
        state.set(Page::Dashboard, true);
    };

    let new_task = snap.org_tasks(org).any(|t| {
        !seen.task_ids.contains(&t.id)
            && (viewer.is_assignee(t) || leads_project_of(snap, viewer, t))
    });
    if new_task {
        flag(Page::Kanban);
    }

    let new_project = viewer
        .visible_projects(snap)
        .iter()
        .any(|p| !seen.project_ids.contains(&p.id));
    if new_project {
        flag(Page::Projects);
    }

    let new_team = snap
        .org_teams(org)
        .any(|t| t.has_member(viewer.id()) && !seen.team_ids.contains(&t.id));
    if new_team {
        flag(Page::Teams);
    }

    let new_ticket = snap
        .org_tickets(org)
        .any(|t| t.assignee_id == viewer.user.id && !seen.ticket_replies.contains_key(&t.id));
    let new_reply = snap
        .org_tickets(org)
        .filter(|t| t.involves(viewer.id()))
        .any(|t| {
            let Some(&seen_replies) = seen.ticket_replies.get(&t.id) else {
                return false;
            };
            t.replies.len() > seen_replies
                && t.replies
                    .last()
                    .is_some_and(|r| r.author_id != viewer.user.id)
        });
    if new_ticket || new_reply {
        flag(Page::Tickets);
    }

    state
}

fn leads_project_of(snap: &Snapshot, viewer: &Viewer, task: &Task) -> bool {
    snap.project_in(viewer.org(), &task.project_id)
        .is_ok_and(|p| p.team_ids.iter().any(|t| viewer.led_team_ids.contains(t)))
}

/// Everything the viewer can currently see, as seen-marks.
pub fn current_marks(snap: &Snapshot, viewer: &Viewer) -> SeenMarks {
    let org = viewer.org();
    SeenMarks {
        task_ids: snap.org_tasks(org).map(|t| t.id.clone()).collect(),
        project_ids: viewer
            .visible_projects(snap)
            .iter()
            .map(|p| p.id.clone())
            .collect(),
        team_ids: snap.org_teams(org).map(|t| t.id.clone()).collect(),
        ticket_replies: snap
            .org_tickets(org)
            .filter(|t| t.involves(viewer.id()))
            .map(|t| (t.id.clone(), t.replies.len()))
            .collect(),
    }
}

/// Record the current state as seen and return the recomputed badges.
///
/// Clearing any page records everything, so badges on other pages for the
/// same changes go away too.
pub fn clear(snap: &mut Snapshot, viewer: &Viewer, page: Page) -> NotificationState {
    let marks = current_marks(snap, viewer);
    snap.mark_seen(viewer.id(), marks);
    tracing::debug!(user_id = %viewer.id(), page = page.as_str(), "Notifications cleared");
    compute(snap, viewer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::store::fixtures::{ORG, snapshot};
    use chrono::NaiveDate;

    fn viewer(snap: &Snapshot, id: &str) -> Viewer {
        Viewer::resolve(snap, id).unwrap()
    }

    fn cleared(id: &str) -> Snapshot {
        let mut snap = snapshot();
        let v = viewer(&snap, id);
        clear(&mut snap, &v, Page::Dashboard);
        snap
    }

    #[test]
    fn test_fresh_user_sees_everything_as_new() {
        let snap = snapshot();
        let state = compute(&snap, &viewer(&snap, "user-3"));
        assert!(state.kanban && state.projects && state.teams && state.dashboard);
        assert!(!state.tickets);
    }

    #[test]
    fn test_clear_resets_all_badges() {
        let snap = cleared("user-3");
        assert_eq!(
            compute(&snap, &viewer(&snap, "user-3")),
            NotificationState::default()
        );
    }

    #[test]
    fn test_new_assigned_task_flags_kanban() {
        let mut snap = cleared("user-3");
        snap.add_task(
            ORG,
            NewTask {
                title: "Fix nav".into(),
                description: None,
                due_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
                status: TaskStatus::Pending,
                priority: Priority::High,
                project_id: "proj-1".into(),
                assignee_id: Some("user-3".into()),
            },
        )
        .unwrap();
        let state = compute(&snap, &viewer(&snap, "user-3"));
        assert!(state.kanban);
        assert!(state.dashboard);
        assert!(!state.projects);
    }

    #[test]
    fn test_unrelated_task_does_not_flag() {
        let mut snap = cleared("user-3");
        snap.add_task(
            ORG,
            NewTask {
                title: "API limits".into(),
                description: None,
                due_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
                status: TaskStatus::Pending,
                priority: Priority::Low,
                project_id: "proj-2".into(),
                assignee_id: Some("user-4".into()),
            },
        )
        .unwrap();
        assert!(!compute(&snap, &viewer(&snap, "user-3")).kanban);
        // Larry leads team-2, so he is told about it.
        assert!(compute(&snap, &viewer(&snap, "user-5")).kanban);
    }

    #[test]
    fn test_new_team_membership_flags_teams() {
        let mut snap = cleared("user-3");
        snap.add_team(
            ORG,
            NewTeam {
                name: "QA".into(),
                lead_id: "user-4".into(),
                member_ids: vec!["user-4".into(), "user-3".into()],
            },
        )
        .unwrap();
        let state = compute(&snap, &viewer(&snap, "user-3"));
        assert!(state.teams);
        // The new team puts user-3 on no new projects.
        assert!(!state.projects);
    }

    #[test]
    fn test_new_ticket_and_reply_flag_tickets() {
        let mut snap = cleared("user-2");
        let ticket = snap
            .raise_ticket(
                ORG,
                "user-3",
                NewTicket {
                    title: "Access".into(),
                    message: "Please".into(),
                    assignee_id: "user-2".into(),
                    priority: Priority::Medium,
                    project_id: None,
                },
            )
            .unwrap();
        let tina = viewer(&snap, "user-2");
        assert!(compute(&snap, &tina).tickets);

        clear(&mut snap, &tina, Page::Tickets);
        assert!(!compute(&snap, &tina).tickets);

        // Her own reply does not flag her.
        snap.add_ticket_reply(ORG, &ticket.id, "user-2", "Done").unwrap();
        assert!(!compute(&snap, &tina).tickets);

        snap.add_ticket_reply(ORG, &ticket.id, "user-3", "Thanks!").unwrap();
        assert!(compute(&snap, &tina).tickets);
    }

    #[test]
    fn test_marks_are_per_user() {
        let snap = cleared("user-3");
        assert!(compute(&snap, &viewer(&snap, "user-2")).kanban);
    }
}
