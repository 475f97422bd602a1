//! The TickTrek workspace: organizations, their people, projects, tasks and
//! tickets, and the HTTP surface over them.
//!
//! | Module          | Responsibility                                      |
//! |-----------------|-----------------------------------------------------|
//! | `models`        | Entities, request payloads and view types           |
//! | `store`         | Snapshot, mutations and the JSON-file store         |
//! | `access`        | Who may see or change what                          |
//! | `board`         | Kanban board, task lists and dashboards             |
//! | `notifications` | Per-page "something new" badges                     |
//! | `auth`          | Passwords, sign-in/up, invites and sessions         |
//! | `api`           | axum routes and handlers                            |
//! | `ws`            | Change notifications over WebSocket                 |
//! | `server`        | Router assembly and the listener                    |

pub mod access;
pub mod api;
pub mod auth;
pub mod board;
pub mod models;
pub mod notifications;
pub mod server;
pub mod store;
pub mod ws;
