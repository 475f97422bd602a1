use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::access::{Viewer, assignable_users};
use super::auth::{self, SessionStore, SignInRequest, SignUpMode, SignUpRequest};
use super::board::{self, TaskQuery};
use super::models::*;
use super::notifications;
use super::store::{Snapshot, StoreHandle};
use super::ws::{OrgEvent, WsMessage, broadcast_message, ws_handler};
use crate::errors::{AuthError, WorkspaceError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: StoreHandle,
    pub sessions: SessionStore,
    pub ws_tx: broadcast::Sender<OrgEvent>,
    /// Users joining through an invite start as `pending-approval`.
    pub require_approval: bool,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(store: StoreHandle, session_ttl_hours: u64, require_approval: bool) -> Self {
        let (ws_tx, _) = broadcast::channel(256);
        Self {
            store,
            sessions: SessionStore::new(session_ttl_hours),
            ws_tx,
            require_approval,
        }
    }

    fn broadcast(&self, org: &str, msg: WsMessage) {
        broadcast_message(&self.ws_tx, org, &msg);
    }

    /// `TaskUpdated` for each task a team or project change unassigned.
    fn broadcast_unassigned(&self, org: &str, tasks: Vec<Task>) {
        for task in tasks {
            self.broadcast(
                org,
                WsMessage::TaskUpdated {
                    task_id: task.id,
                    project_id: task.project_id,
                },
            );
        }
    }
}

// ── Request / response payload types ──────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub user: PublicUser,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpResponse {
    pub token: String,
    pub user: PublicUser,
    pub message: String,
    pub mode: SignUpMode,
}

#[derive(Deserialize)]
pub struct BoardParams {
    pub project: Option<String>,
}

#[derive(Deserialize)]
pub struct TaskListParams {
    pub project: Option<String>,
    pub search: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
}

impl TaskListParams {
    fn into_query(self) -> (Option<String>, TaskQuery) {
        (
            self.project,
            TaskQuery {
                search: self.search,
                status: self.status,
                priority: self.priority,
            },
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    /// Projects the caller may create tasks in.
    pub projects: Vec<Project>,
    /// Members of the requested project's teams.
    pub assignable_users: Vec<PublicUser>,
}

#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub status: TaskStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketOptions {
    pub assignees: Vec<PublicUser>,
    pub projects: Vec<Project>,
}

#[derive(Deserialize)]
pub struct TicketStatusRequest {
    pub status: TicketStatus,
}

#[derive(Deserialize)]
pub struct ReplyRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct InviteResponse {
    pub token: String,
    pub link: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<WorkspaceError> for ApiError {
    fn from(e: WorkspaceError) -> Self {
        let msg = e.to_string();
        match e {
            WorkspaceError::NotFound { .. } => ApiError::NotFound(msg),
            WorkspaceError::Forbidden(_) | WorkspaceError::AwaitingApproval => {
                ApiError::Forbidden(msg)
            }
            WorkspaceError::Invalid(_) => ApiError::BadRequest(msg),
            WorkspaceError::Conflict(_) => ApiError::Conflict(msg),
            WorkspaceError::Storage(_) | WorkspaceError::LockPoisoned => {
                tracing::error!(error = %msg, "Store failure");
                ApiError::Internal(msg)
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::Unauthenticated => {
                ApiError::Unauthorized(e.to_string())
            }
            AuthError::InvalidInvite => ApiError::BadRequest(e.to_string()),
            AuthError::Hash(msg) => {
                tracing::error!(error = %msg, "Password hashing failed");
                ApiError::Internal("Password hashing failed".into())
            }
            AuthError::Workspace(inner) => inner.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Authentication ────────────────────────────────────────────────────

/// The caller behind a valid `Authorization: Bearer <token>` header.
pub struct CurrentUser {
    pub user_id: String,
    pub token: String,
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(AuthError::Unauthenticated.to_string()))?
            .to_string();
        let user_id = state.sessions.resolve(&token).await?;
        Ok(Self { user_id, token })
    }
}

impl CurrentUser {
    /// Run `f` against the snapshot as this (approved) user.
    async fn read<F, R>(&self, state: &AppState, f: F) -> Result<R, ApiError>
    where
        F: FnOnce(&Snapshot, &Viewer) -> Result<R, WorkspaceError> + Send + 'static,
        R: Send + 'static,
    {
        let user_id = self.user_id.clone();
        let out = state
            .store
            .call(move |snap| {
                let viewer = Viewer::resolve(snap, &user_id)?;
                f(snap, &viewer)
            })
            .await?;
        Ok(out)
    }

    /// Like [`read`](Self::read) but mutating; the change is persisted on success.
    /// Returns the caller's organization id alongside the result.
    async fn write<F, R>(&self, state: &AppState, f: F) -> Result<(String, R), ApiError>
    where
        F: FnOnce(&mut Snapshot, &Viewer) -> Result<R, WorkspaceError> + Send + 'static,
        R: Send + 'static,
    {
        let user_id = self.user_id.clone();
        let out = state
            .store
            .mutate(move |snap| {
                let viewer = Viewer::resolve(snap, &user_id)?;
                let out = f(snap, &viewer)?;
                Ok::<_, WorkspaceError>((viewer.org().to_string(), out))
            })
            .await?;
        Ok(out)
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/signin", post(sign_in))
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/me", get(me))
        .route("/api/dashboard", get(dashboard))
        .route("/api/board", get(get_board))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/api/teams", get(list_teams).post(create_team))
        .route("/api/teams/{id}", patch(update_team).delete(delete_team))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/options", get(task_options))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", patch(move_task))
        .route("/api/tickets", get(list_tickets).post(raise_ticket))
        .route("/api/tickets/options", get(ticket_options))
        .route("/api/tickets/{id}", get(get_ticket))
        .route("/api/tickets/{id}/status", patch(set_ticket_status))
        .route("/api/tickets/{id}/replies", post(reply_ticket))
        .route("/api/users", get(list_users))
        .route("/api/users/{id}/approve", post(approve_user))
        .route("/api/users/{id}", axum::routing::delete(remove_user))
        .route("/api/invites", post(create_invite))
        .route("/api/notifications", get(get_notifications))
        .route("/api/notifications/{page}/clear", post(clear_notifications))
        .route("/ws", get(ws_handler))
}

// ── Handlers: auth ────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn sign_in(
    State(state): State<SharedState>,
    Json(req): Json<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.clone();
    let user = state
        .store
        .call(move |snap| auth::sign_in(snap, &req.email, &req.password))
        .await
        .inspect_err(|_| tracing::info!(email = %email, "Failed sign-in"))?;
    let token = state.sessions.issue(&user.id).await;
    tracing::info!(user_id = %user.id, "Signed in");
    Ok(Json(SessionResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

async fn sign_up(
    State(state): State<SharedState>,
    Json(req): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password = req.password.clone();
    let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(format!("Hashing task failed: {}", e)))??;
    let require_approval = state.require_approval;
    let outcome = state
        .store
        .mutate(move |snap| auth::sign_up(snap, req, hash, require_approval))
        .await?;

    if outcome.mode == SignUpMode::Join {
        state.broadcast(
            &outcome.user.organization_id,
            WsMessage::UserJoined {
                user_id: outcome.user.id.clone(),
            },
        );
    }
    let token = state.sessions.issue(&outcome.user.id).await;
    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            token,
            user: outcome.user,
            message: outcome.message,
            mode: outcome.mode,
        }),
    ))
}

async fn sign_out(State(state): State<SharedState>, current: CurrentUser) -> StatusCode {
    state.sessions.revoke(&current.token).await;
    StatusCode::NO_CONTENT
}

/// Works for users awaiting approval too, so clients can tell them apart.
async fn me(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user_id.clone();
    let me = state
        .store
        .call(move |snap| {
            let user = snap
                .user(&user_id)
                .ok_or_else(|| WorkspaceError::not_found("User", user_id.as_str()))?
                .clone();
            Ok::<_, WorkspaceError>(Viewer::from_user(snap, user).me())
        })
        .await?;
    Ok(Json(me))
}

// ── Handlers: views ───────────────────────────────────────────────────

async fn dashboard(
    State(state): State<SharedState>,
    current: CurrentUser,
    Query(query): Query<TaskQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let dash = current
        .read(&state, move |snap, viewer| {
            Ok(board::dashboard(snap, viewer, &query))
        })
        .await?;
    Ok(Json(dash))
}

async fn get_board(
    State(state): State<SharedState>,
    current: CurrentUser,
    Query(params): Query<BoardParams>,
) -> Result<impl IntoResponse, ApiError> {
    let view = current
        .read(&state, move |snap, viewer| {
            if let Some(project) = &params.project {
                viewer.visible_project(snap, project)?;
            }
            let scope = viewer.board_scope(snap, params.project.as_deref());
            Ok(board::build_board(snap, viewer, scope))
        })
        .await?;
    Ok(Json(view))
}

// ── Handlers: projects ────────────────────────────────────────────────

async fn list_projects(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let projects = current
        .read(&state, |snap, viewer| {
            Ok(viewer
                .visible_projects(snap)
                .into_iter()
                .map(|p| board::project_detail(snap, p))
                .collect::<Vec<_>>())
        })
        .await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(req): Json<NewProject>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, project) = current
        .write(&state, move |snap, viewer| {
            viewer.require_admin("create projects")?;
            snap.add_project(viewer.org(), req)
        })
        .await?;
    tracing::info!(project_id = %project.id, org = %org, "Project created");
    state.broadcast(
        &org,
        WsMessage::ProjectCreated {
            project_id: project.id.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = current
        .read(&state, move |snap, viewer| {
            let project = viewer.visible_project(snap, &id)?;
            Ok(board::project_detail(snap, project))
        })
        .await?;
    Ok(Json(detail))
}

async fn update_project(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<ProjectUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, change) = current
        .write(&state, move |snap, viewer| {
            viewer.require_admin("edit projects")?;
            snap.update_project(viewer.org(), &id, req)
        })
        .await?;
    let project = change.project;
    tracing::info!(
        project_id = %project.id,
        unassigned_tasks = change.unassigned_tasks.len(),
        "Project updated"
    );
    state.broadcast(
        &org,
        WsMessage::ProjectUpdated {
            project_id: project.id.clone(),
        },
    );
    state.broadcast_unassigned(&org, change.unassigned_tasks);
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, removal) = current
        .write(&state, move |snap, viewer| {
            viewer.require_admin("delete projects")?;
            snap.delete_project(viewer.org(), &id)
        })
        .await?;
    tracing::info!(
        project_id = %removal.project.id,
        removed_tasks = removal.removed_task_ids.len(),
        unlinked_tickets = removal.unlinked_ticket_ids.len(),
        "Project deleted"
    );
    state.broadcast(
        &org,
        WsMessage::ProjectDeleted {
            project_id: removal.project.id,
            removed_task_ids: removal.removed_task_ids,
        },
    );
    for ticket_id in removal.unlinked_ticket_ids {
        state.broadcast(&org, WsMessage::TicketUpdated { ticket_id });
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Handlers: teams ───────────────────────────────────────────────────

async fn list_teams(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let teams = current
        .read(&state, |snap, viewer| {
            viewer.require_admin("manage teams")?;
            Ok(snap
                .org_teams(viewer.org())
                .map(|t| board::team_detail(snap, t))
                .collect::<Vec<_>>())
        })
        .await?;
    Ok(Json(teams))
}

async fn create_team(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(req): Json<NewTeam>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, team) = current
        .write(&state, move |snap, viewer| {
            viewer.require_admin("manage teams")?;
            snap.add_team(viewer.org(), req)
        })
        .await?;
    tracing::info!(team_id = %team.id, members = team.member_ids.len(), "Team created");
    state.broadcast(
        &org,
        WsMessage::TeamCreated {
            team_id: team.id.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(team)))
}

async fn update_team(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<NewTeam>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, change) = current
        .write(&state, move |snap, viewer| {
            viewer.require_admin("manage teams")?;
            snap.update_team(viewer.org(), &id, req)
        })
        .await?;
    let team = change.team;
    tracing::info!(
        team_id = %team.id,
        unassigned_tasks = change.unassigned_tasks.len(),
        "Team updated"
    );
    state.broadcast(
        &org,
        WsMessage::TeamUpdated {
            team_id: team.id.clone(),
        },
    );
    state.broadcast_unassigned(&org, change.unassigned_tasks);
    Ok(Json(team))
}

async fn delete_team(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, change) = current
        .write(&state, move |snap, viewer| {
            viewer.require_admin("manage teams")?;
            snap.delete_team(viewer.org(), &id)
        })
        .await?;
    tracing::info!(
        team_id = %change.team.id,
        unassigned_tasks = change.unassigned_tasks.len(),
        "Team deleted"
    );
    state.broadcast(
        &org,
        WsMessage::TeamDeleted {
            team_id: change.team.id,
        },
    );
    state.broadcast_unassigned(&org, change.unassigned_tasks);
    Ok(StatusCode::NO_CONTENT)
}

// ── Handlers: tasks ───────────────────────────────────────────────────

async fn list_tasks(
    State(state): State<SharedState>,
    current: CurrentUser,
    Query(params): Query<TaskListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (project, query) = params.into_query();
    let cards = current
        .read(&state, move |snap, viewer| {
            Ok(board::list_tasks(snap, viewer, project.as_deref(), &query))
        })
        .await?;
    Ok(Json(cards))
}

async fn task_options(
    State(state): State<SharedState>,
    current: CurrentUser,
    Query(params): Query<BoardParams>,
) -> Result<impl IntoResponse, ApiError> {
    let options = current
        .read(&state, move |snap, viewer| {
            let projects = viewer.task_projects(snap);
            let assignable: Vec<PublicUser> = match &params.project {
                Some(id) => {
                    let project = projects
                        .iter()
                        .find(|p| &p.id == id)
                        .ok_or_else(|| WorkspaceError::not_found("Project", id.as_str()))?;
                    assignable_users(snap, project)
                        .into_iter()
                        .map(PublicUser::from)
                        .collect()
                }
                None => Vec::new(),
            };
            Ok(TaskOptions {
                projects: projects.into_iter().cloned().collect(),
                assignable_users: assignable,
            })
        })
        .await?;
    Ok(Json(options))
}

async fn create_task(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(req): Json<NewTask>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, card) = current
        .write(&state, move |snap, viewer| {
            viewer.require_task_project(snap, &req.project_id)?;
            let task = snap.add_task(viewer.org(), req)?;
            Ok(board::task_card(snap, viewer, &task))
        })
        .await?;
    tracing::info!(task_id = %card.task.id, project_id = %card.task.project_id, "Task created");
    state.broadcast(
        &org,
        WsMessage::TaskCreated {
            task_id: card.task.id.clone(),
            project_id: card.task.project_id.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(card)))
}

async fn get_task(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let card = current
        .read(&state, move |snap, viewer| {
            let task = viewer.visible_task(snap, &id)?;
            Ok(board::task_card(snap, viewer, task))
        })
        .await?;
    Ok(Json(card))
}

/// Task that `viewer` may edit, or the error explaining why not.
fn editable_task(snap: &Snapshot, viewer: &Viewer, id: &str) -> Result<Task, WorkspaceError> {
    let task = snap.task_in(viewer.org(), id)?;
    if !viewer.can_edit_task(snap, task) {
        if viewer.can_view_task(snap, task) {
            return Err(WorkspaceError::forbidden(
                "Only administrators and the project's team leads can edit this task",
            ));
        }
        return Err(WorkspaceError::not_found("Task", id));
    }
    Ok(task.clone())
}

async fn update_task(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<TaskUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, card) = current
        .write(&state, move |snap, viewer| {
            let existing = editable_task(snap, viewer, &id)?;
            if let Some(project_id) = &req.project_id
                && *project_id != existing.project_id
            {
                viewer.require_task_project(snap, project_id)?;
            }
            let task = snap.update_task(viewer.org(), &id, req)?;
            Ok(board::task_card(snap, viewer, &task))
        })
        .await?;
    tracing::info!(task_id = %card.task.id, "Task updated");
    state.broadcast(
        &org,
        WsMessage::TaskUpdated {
            task_id: card.task.id.clone(),
            project_id: card.task.project_id.clone(),
        },
    );
    Ok(Json(card))
}

async fn move_task(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, card) = current
        .write(&state, move |snap, viewer| {
            let task = viewer.visible_task(snap, &id)?;
            if !viewer.can_move_task(snap, task) {
                return Err(WorkspaceError::forbidden("You cannot move this task"));
            }
            let task = snap.move_task(viewer.org(), &id, req.status)?;
            Ok(board::task_card(snap, viewer, &task))
        })
        .await?;
    tracing::info!(task_id = %card.task.id, status = %card.task.status, "Task moved");
    state.broadcast(
        &org,
        WsMessage::TaskUpdated {
            task_id: card.task.id.clone(),
            project_id: card.task.project_id.clone(),
        },
    );
    Ok(Json(card))
}

async fn delete_task(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, task) = current
        .write(&state, move |snap, viewer| {
            editable_task(snap, viewer, &id)?;
            snap.delete_task(viewer.org(), &id)
        })
        .await?;
    tracing::info!(task_id = %task.id, "Task deleted");
    state.broadcast(
        &org,
        WsMessage::TaskDeleted {
            task_id: task.id,
            project_id: task.project_id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Handlers: tickets ─────────────────────────────────────────────────

async fn list_tickets(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let tickets = current
        .read(&state, |snap, viewer| {
            Ok(viewer
                .visible_tickets(snap)
                .into_iter()
                .map(|t| board::ticket_view(snap, viewer, t))
                .collect::<Vec<_>>())
        })
        .await?;
    Ok(Json(tickets))
}

async fn ticket_options(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let options = current
        .read(&state, |snap, viewer| {
            Ok(TicketOptions {
                assignees: viewer
                    .ticket_assignees(snap)
                    .into_iter()
                    .map(PublicUser::from)
                    .collect(),
                projects: viewer
                    .ticket_projects(snap)
                    .into_iter()
                    .cloned()
                    .collect(),
            })
        })
        .await?;
    Ok(Json(options))
}

async fn raise_ticket(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(req): Json<NewTicket>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, view) = current
        .write(&state, move |snap, viewer| {
            viewer.require_ticket_target(snap, &req)?;
            let ticket = snap.raise_ticket(viewer.org(), viewer.id(), req)?;
            Ok(board::ticket_view(snap, viewer, &ticket))
        })
        .await?;
    tracing::info!(
        ticket_id = %view.ticket.id,
        assignee = %view.ticket.assignee_id,
        "Ticket raised"
    );
    state.broadcast(
        &org,
        WsMessage::TicketRaised {
            ticket_id: view.ticket.id.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_ticket(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = current
        .read(&state, move |snap, viewer| {
            let ticket = viewer.visible_ticket(snap, &id)?;
            Ok(board::ticket_view(snap, viewer, ticket))
        })
        .await?;
    Ok(Json(view))
}

async fn set_ticket_status(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<TicketStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, view) = current
        .write(&state, move |snap, viewer| {
            let ticket = viewer.visible_ticket(snap, &id)?;
            if !viewer.can_set_ticket_status(ticket, req.status) {
                return Err(WorkspaceError::forbidden(
                    "Only the assignee can close a ticket",
                ));
            }
            let ticket = snap.set_ticket_status(viewer.org(), &id, req.status)?;
            Ok(board::ticket_view(snap, viewer, &ticket))
        })
        .await?;
    tracing::info!(
        ticket_id = %view.ticket.id,
        status = view.ticket.status.as_str(),
        "Ticket status changed"
    );
    state.broadcast(
        &org,
        WsMessage::TicketUpdated {
            ticket_id: view.ticket.id.clone(),
        },
    );
    Ok(Json(view))
}

async fn reply_ticket(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, view) = current
        .write(&state, move |snap, viewer| {
            viewer.visible_ticket(snap, &id)?;
            let ticket = snap.add_ticket_reply(viewer.org(), &id, viewer.id(), &req.message)?;
            Ok(board::ticket_view(snap, viewer, &ticket))
        })
        .await?;
    tracing::info!(
        ticket_id = %view.ticket.id,
        replies = view.ticket.replies.len(),
        "Ticket reply added"
    );
    state.broadcast(
        &org,
        WsMessage::TicketUpdated {
            ticket_id: view.ticket.id.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(view)))
}

// ── Handlers: users & invites ─────────────────────────────────────────

async fn list_users(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let users = current
        .read(&state, |snap, viewer| {
            viewer.require_admin("manage users")?;
            Ok(snap
                .org_users(viewer.org())
                .map(PublicUser::from)
                .collect::<Vec<_>>())
        })
        .await?;
    Ok(Json(users))
}

async fn approve_user(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, user) = current
        .write(&state, move |snap, viewer| {
            viewer.require_admin("approve users")?;
            snap.approve_user(viewer.org(), &id)
        })
        .await?;
    tracing::info!(user_id = %user.id, "User approved");
    state.broadcast(
        &org,
        WsMessage::UserApproved {
            user_id: user.id.clone(),
        },
    );
    Ok(Json(PublicUser::from(&user)))
}

async fn remove_user(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (org, removal) = current
        .write(&state, move |snap, viewer| {
            viewer.require_admin("remove users")?;
            snap.deny_user(viewer.org(), &id)
        })
        .await?;
    let user_id = removal.user.id;
    state.sessions.revoke_user(&user_id).await;
    tracing::info!(
        user_id = %user_id,
        teams = removal.team_ids.len(),
        unassigned_tasks = removal.unassigned_tasks.len(),
        "Pending user removed"
    );
    state.broadcast(&org, WsMessage::UserRemoved { user_id });
    for team_id in removal.team_ids {
        state.broadcast(&org, WsMessage::TeamUpdated { team_id });
    }
    state.broadcast_unassigned(&org, removal.unassigned_tasks);
    Ok(StatusCode::NO_CONTENT)
}

async fn create_invite(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let (org, token) = current
        .write(&state, |snap, viewer| auth::generate_invite(snap, viewer))
        .await?;
    tracing::info!(org = %org, "Invite link generated");
    let link = format!("/signup?token={}", token);
    Ok((StatusCode::CREATED, Json(InviteResponse { token, link })))
}

// ── Handlers: notifications ───────────────────────────────────────────

async fn get_notifications(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let badges = current
        .read(&state, |snap, viewer| Ok(notifications::compute(snap, viewer)))
        .await?;
    Ok(Json(badges))
}

async fn clear_notifications(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(page): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let page = Page::from_str(&page).map_err(ApiError::BadRequest)?;
    let (_, badges) = current
        .write(&state, move |snap, viewer| {
            Ok(notifications::clear(snap, viewer, page))
        })
        .await?;
    Ok(Json(badges))
}
